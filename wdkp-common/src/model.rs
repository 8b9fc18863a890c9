//! Entity model: standings, loot awards and point history
//!
//! Entities are plain values. Relationships between them are expressed by
//! player key (lowercased name) and by position inside the owning team's
//! collections, never by embedded references.

use crate::roles::RoleSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthStr;

/// Team key used when an addon has no team concept
pub const DEFAULT_TEAM: &str = "__default";

/// Default recency window for the activity rule (45 days)
pub const DEFAULT_ACTIVITY_WINDOW_SECS: i64 = 45 * 24 * 60 * 60;

/// Positive history entries needed inside the window to count as active
pub const ACTIVITY_MIN_ENTRIES: usize = 2;

/// Normalized lookup key for a player name
pub fn player_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Round to a fixed number of decimals
///
/// Values too large to scale are returned unrounded.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(15) as i32);
    let scaled = value * factor;
    if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    }
}

/// Render points with the team's precision
pub fn format_points(value: f64, precision: u32) -> String {
    format!("{:.*}", precision as usize, value)
}

/// A player's current standing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    /// Name as written by the addon
    pub name: String,
    /// Current point balance (never negative)
    pub points: f64,
    pub lifetime_gained: f64,
    pub lifetime_spent: f64,
    /// Upper-case class token (e.g. `WARRIOR`)
    pub class: String,
    pub role: String,
    pub spec: String,
    pub roles: RoleSet,
    pub rank: Option<String>,
    /// Recomputed on every ingestion, see [`is_active`]
    pub active: bool,
    /// Position of the newest loot award in the team's loot list
    pub latest_loot: Option<usize>,
    /// Position of the newest positive entry in this player's history
    pub latest_history: Option<usize>,
}

impl Standing {
    /// Build a standing, taking absolute values of every amount
    pub fn new(
        name: impl Into<String>,
        points: f64,
        lifetime_gained: f64,
        lifetime_spent: f64,
        class: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            points: points.abs(),
            lifetime_gained: lifetime_gained.abs(),
            lifetime_spent: lifetime_spent.abs(),
            class: class.into().to_uppercase(),
            role: String::new(),
            spec: String::new(),
            roles: RoleSet::empty(),
            rank: None,
            active: false,
            latest_loot: None,
            latest_history: None,
        }
    }

    /// Placeholder for a player key that no longer resolves
    pub fn unknown() -> Self {
        Self::new("Unknown", 0.0, 0.0, 0.0, "UNKNOWN")
    }

    pub fn with_classification(
        mut self,
        role: impl Into<String>,
        spec: impl Into<String>,
        roles: RoleSet,
    ) -> Self {
        self.role = role.into();
        self.spec = spec.into();
        self.roles = roles;
        self
    }

    pub fn with_rank(mut self, rank: Option<String>) -> Self {
        self.rank = rank;
        self
    }

    /// Round every amount to `precision` decimals
    pub fn rounded(mut self, precision: u32) -> Self {
        self.points = round_to(self.points, precision);
        self.lifetime_gained = round_to(self.lifetime_gained, precision);
        self.lifetime_spent = round_to(self.lifetime_spent, precision);
        self
    }

    pub fn key(&self) -> String {
        player_key(&self.name)
    }

    /// Terminal columns taken by the name
    pub fn name_width(&self) -> usize {
        self.name.width()
    }

    /// Terminal columns taken by the formatted balance
    pub fn points_width(&self, precision: u32) -> usize {
        format_points(self.points, precision).width()
    }
}

static ITEM_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\|Hitem:(\d*)[^|]*\|h\[([^\]]*)\]\|h").expect("static regex")
});

/// Split an item link into `(item id, display name)`
///
/// Plain text is returned as the name with id 0.
pub fn parse_item_link(link: &str) -> (u64, String) {
    match ITEM_LINK.captures(link) {
        Some(caps) => {
            let id = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            (id, name.to_string())
        }
        None => (0, link.trim().to_string()),
    }
}

/// One loot award
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootEntry {
    /// Owning player key
    pub player: String,
    pub item_id: u64,
    pub item_name: String,
    /// Points paid (never negative)
    pub cost: f64,
    /// Seconds since epoch
    pub timestamp: i64,
    pub boss: Option<String>,
    pub zone: Option<String>,
}

impl LootEntry {
    pub fn new(player: &str, item_link: &str, cost: f64, timestamp: i64) -> Self {
        let (item_id, item_name) = parse_item_link(item_link);
        Self {
            player: player_key(player),
            item_id,
            item_name,
            cost: cost.abs(),
            timestamp,
            boss: None,
            zone: None,
        }
    }

    pub fn with_source(mut self, boss: Option<String>, zone: Option<String>) -> Self {
        self.boss = boss;
        self.zone = zone;
        self
    }

    pub fn name_width(&self) -> usize {
        self.item_name.width()
    }
}

/// One point change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Owning player key
    pub player: String,
    /// Signed point delta
    pub delta: f64,
    pub timestamp: i64,
    pub reason: String,
    pub officer: String,
}

impl HistoryEntry {
    pub fn new(
        player: &str,
        delta: f64,
        timestamp: i64,
        reason: impl Into<String>,
        officer: impl Into<String>,
    ) -> Self {
        Self {
            player: player_key(player),
            delta,
            timestamp,
            reason: reason.into(),
            officer: officer.into(),
        }
    }

    pub fn is_positive(&self) -> bool {
        self.delta > 0.0
    }
}

/// Fixed table of adjustment reason codes
const REASONS: [&str; 8] = [
    "On Time Bonus",
    "Boss Kill Bonus",
    "Raid Completion Bonus",
    "New Boss Kill Bonus",
    "Correcting Error",
    "DKP Adjust",
    "Unexcused Absence",
    "Other",
];

/// Human-readable label for a numeric reason code
pub fn reason_label(code: i64) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|c| c.checked_sub(1))
        .and_then(|i| REASONS.get(i))
        .copied()
        .unwrap_or("Unknown")
}

/// Activity rule
///
/// `history` must be ordered newest first. Walks the positive entries from
/// the newest backwards, counting those with `now - timestamp <= window`, and
/// stops at the first positive entry outside the window.
pub fn is_active(history: &[HistoryEntry], now: i64, window: i64) -> bool {
    let mut recent = 0usize;
    for entry in history.iter().filter(|e| e.is_positive()) {
        // An age that overflows i64 is outside any window
        match now.checked_sub(entry.timestamp) {
            Some(age) if age <= window => {}
            _ => break,
        }
        recent += 1;
        if recent >= ACTIVITY_MIN_ENTRIES {
            return true;
        }
    }
    false
}
