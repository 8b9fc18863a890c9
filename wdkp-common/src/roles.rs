//! Role classification policy
//!
//! Maps a player's class and raw spec descriptor to the set of raid roles the
//! player can fill. The talent thresholds are game-balance data, so the table
//! lives behind the [`RolePolicy`] trait and can be replaced wholesale or
//! patched per class with [`TalentTreePolicy::with_profile`].

use bitflags::bitflags;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

bitflags! {
    /// Raid roles a player can fill
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct RoleSet: u8 {
        const TANK = 0b0001;
        const HEALER = 0b0010;
        const MELEE = 0b0100;
        const RANGED = 0b1000;
    }
}

impl RoleSet {
    /// Interpret the addon's free-text role ("Tank", "Healer", "Melee DPS", ...)
    pub fn from_role_text(text: &str) -> RoleSet {
        let lower = text.to_lowercase();
        let mut roles = RoleSet::empty();
        if lower.contains("tank") {
            roles |= RoleSet::TANK;
        }
        if lower.contains("heal") {
            roles |= RoleSet::HEALER;
        }
        if lower.contains("melee") {
            roles |= RoleSet::MELEE;
        }
        if lower.contains("ranged") || lower.contains("caster") {
            roles |= RoleSet::RANGED;
        }
        roles
    }
}

/// Classification policy: (class, spec descriptor) → roles
pub trait RolePolicy: Send + Sync {
    fn classify(&self, class: &str, spec: &str) -> RoleSet;
}

/// Roles granted by one talent tree once it holds enough points
#[derive(Debug, Clone, Copy)]
pub struct TreeRule {
    pub roles: RoleSet,
    pub min_points: u32,
}

/// Per-class talent table
#[derive(Debug, Clone, Copy)]
pub struct ClassProfile {
    /// Roles assumed when the spec can't be read or no tree qualifies
    pub base: RoleSet,
    pub trees: [TreeRule; 3],
}

static TALENT_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)\s*/\s*(\d+)").expect("static regex"));

/// Talent-distribution policy
///
/// Reads `a/b/c` point counts out of the spec descriptor (e.g.
/// `"Holy (31/20/0)"`), takes the tree with the most points and grants that
/// tree's roles if it meets the tree's threshold.
#[derive(Debug, Clone)]
pub struct TalentTreePolicy {
    profiles: HashMap<String, ClassProfile>,
}

const fn rule(roles: RoleSet, min_points: u32) -> TreeRule {
    TreeRule { roles, min_points }
}

impl Default for TalentTreePolicy {
    fn default() -> Self {
        use RoleSet as R;
        let any_dps = R::MELEE.union(R::RANGED);
        let table = [
            (
                "DEATHKNIGHT",
                R::TANK.union(R::MELEE),
                [rule(R::TANK, 31), rule(R::MELEE, 0), rule(R::MELEE, 0)],
            ),
            (
                "DRUID",
                R::all(),
                [rule(R::RANGED, 21), rule(R::TANK.union(R::MELEE), 21), rule(R::HEALER, 21)],
            ),
            ("HUNTER", R::RANGED, [rule(R::RANGED, 0); 3]),
            ("MAGE", R::RANGED, [rule(R::RANGED, 0); 3]),
            (
                "PALADIN",
                R::HEALER.union(R::TANK).union(R::MELEE),
                [rule(R::HEALER, 21), rule(R::TANK, 31), rule(R::MELEE, 21)],
            ),
            (
                "PRIEST",
                R::HEALER.union(R::RANGED),
                [rule(R::HEALER, 21), rule(R::HEALER, 21), rule(R::RANGED, 31)],
            ),
            ("ROGUE", R::MELEE, [rule(R::MELEE, 0); 3]),
            (
                "SHAMAN",
                R::HEALER.union(any_dps),
                [rule(R::RANGED, 21), rule(R::MELEE, 21), rule(R::HEALER, 21)],
            ),
            ("WARLOCK", R::RANGED, [rule(R::RANGED, 0); 3]),
            (
                "WARRIOR",
                R::MELEE.union(R::TANK),
                [rule(R::MELEE, 0), rule(R::MELEE, 0), rule(R::TANK, 31)],
            ),
        ];

        let profiles = table
            .into_iter()
            .map(|(class, base, trees)| (class.to_string(), ClassProfile { base, trees }))
            .collect();
        Self { profiles }
    }
}

impl TalentTreePolicy {
    /// Replace one class's table
    pub fn with_profile(mut self, class: &str, profile: ClassProfile) -> Self {
        self.profiles.insert(class.to_uppercase(), profile);
        self
    }
}

impl RolePolicy for TalentTreePolicy {
    fn classify(&self, class: &str, spec: &str) -> RoleSet {
        let Some(profile) = self.profiles.get(&class.to_uppercase()) else {
            return RoleSet::empty();
        };
        let Some(points) = talent_points(spec) else {
            return profile.base;
        };

        let (tree, spent) = points
            .iter()
            .enumerate()
            .fold((0, 0), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        let rule = profile.trees[tree];
        if spent >= rule.min_points && !rule.roles.is_empty() {
            rule.roles
        } else {
            profile.base
        }
    }
}

fn talent_points(spec: &str) -> Option<[u32; 3]> {
    let caps = TALENT_SPLIT.captures(spec)?;
    let mut points = [0u32; 3];
    for (slot, group) in points.iter_mut().zip(1..=3) {
        *slot = caps.get(group)?.as_str().parse().ok()?;
    }
    Some(points)
}
