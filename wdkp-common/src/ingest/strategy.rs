//! Stage strategy and the shared per-team stage logic
//!
//! Every addon variant is a [`PipelineStrategy`]. The trait's default methods
//! implement the single-team layout; variants override only the stages whose
//! layout differs and reuse the `*_into` functions for the per-team work.

use super::{IngestSettings, Stage};
use crate::lua::Value;
use crate::model::{reason_label, round_to, HistoryEntry, LootEntry, Standing, DEFAULT_TEAM};
use crate::roles::{RolePolicy, RoleSet};
use crate::store::TenantStore;
use thiserror::Error;
use tracing::debug;

/// Names of the four root variables a variant reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootNames {
    pub config: &'static str,
    pub standings: &'static str,
    pub loot: &'static str,
    pub history: &'static str,
}

impl RootNames {
    pub fn for_stage(&self, stage: Stage) -> Option<&'static str> {
        match stage {
            Stage::Config => Some(self.config),
            Stage::Standings => Some(self.standings),
            Stage::Loot => Some(self.loot),
            Stage::History => Some(self.history),
            Stage::Parse | Stage::Finalize => None,
        }
    }
}

/// Inputs shared by every stage of one build
pub struct StageContext<'a> {
    pub settings: &'a IngestSettings,
    pub roles: &'a dyn RolePolicy,
    /// Reference time for the activity rule
    pub now: i64,
}

/// Per-stage record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub accepted: usize,
    pub skipped: usize,
}

impl StageStats {
    pub fn merge(&mut self, other: StageStats) {
        self.accepted += other.accepted;
        self.skipped += other.skipped;
    }
}

/// Hard failure of a stage's root structure
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StageError(pub String);

impl StageError {
    fn not_a_table(what: &str) -> Self {
        StageError(format!("{} is not a table", what))
    }
}

/// Ingestion stages for one addon variant
pub trait PipelineStrategy: Send + Sync {
    /// Variant name for logs
    fn name(&self) -> &'static str;

    fn roots(&self) -> RootNames;

    fn build_config(
        &self,
        store: &mut TenantStore,
        root: &Value,
        _ctx: &StageContext<'_>,
    ) -> Result<StageStats, StageError> {
        config_into(store, DEFAULT_TEAM, root)
    }

    fn build_standings(
        &self,
        store: &mut TenantStore,
        root: &Value,
        ctx: &StageContext<'_>,
    ) -> Result<StageStats, StageError> {
        standings_into(store, DEFAULT_TEAM, root, ctx)
    }

    fn build_loot(
        &self,
        store: &mut TenantStore,
        root: &Value,
        ctx: &StageContext<'_>,
    ) -> Result<StageStats, StageError> {
        loot_into(store, DEFAULT_TEAM, root, ctx)
    }

    fn build_history(
        &self,
        store: &mut TenantStore,
        root: &Value,
        ctx: &StageContext<'_>,
    ) -> Result<StageStats, StageError> {
        history_into(store, DEFAULT_TEAM, root, ctx)
    }

    /// Sort, link back-references, compute activity and groups
    fn finalize(&self, store: &mut TenantStore, ctx: &StageContext<'_>) -> StageStats {
        store.sort_chronological();
        store.link_latest(ctx.now, ctx.settings.activity_window_secs);
        store.rebuild_groups();
        StageStats {
            accepted: store.teams().count(),
            skipped: 0,
        }
    }
}

// ============================================================================
// Shared stage logic
// ============================================================================

/// Record the raw config and the team's rounding precision
///
/// Precision is read from `modes.rounding`; absent means whole numbers.
pub fn config_into(store: &mut TenantStore, team: &str, root: &Value) -> Result<StageStats, StageError> {
    if !root.is_table() {
        return Err(StageError::not_a_table("configuration root"));
    }
    let precision = rounding_of(root);
    let config = store.config_mut();
    config.rounding.insert(team.to_string(), precision);
    if config.settings.is_none() {
        config.settings = Some(root.clone());
    }
    Ok(StageStats {
        accepted: 1,
        skipped: 0,
    })
}

pub(crate) fn rounding_of(team_config: &Value) -> u32 {
    team_config
        .get("modes")
        .and_then(|modes| modes.get("rounding"))
        .and_then(Value::as_i64)
        .map(|r| r.clamp(0, 10) as u32)
        .unwrap_or(0)
}

/// Build one team's standings; malformed records are skipped
pub fn standings_into(
    store: &mut TenantStore,
    team: &str,
    table: &Value,
    ctx: &StageContext<'_>,
) -> Result<StageStats, StageError> {
    if !table.is_table() {
        return Err(StageError::not_a_table("standings table"));
    }
    store.ensure_team(team);
    let precision = store.config().rounding_for(team);
    let mut stats = StageStats::default();

    for record in table.members() {
        match standing_from(record, precision, ctx) {
            Ok(standing) => {
                store.upsert_standing(team, standing);
                stats.accepted += 1;
            }
            Err(reason) => {
                debug!(team = %team, reason = %reason, "Skipping standing record");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

/// Build one team's loot list; unresolved players are skipped
pub fn loot_into(
    store: &mut TenantStore,
    team: &str,
    table: &Value,
    _ctx: &StageContext<'_>,
) -> Result<StageStats, StageError> {
    if !table.is_table() {
        return Err(StageError::not_a_table("loot table"));
    }
    let precision = store.config().rounding_for(team);
    let mut stats = StageStats::default();

    for record in table.members() {
        let entry = match loot_from(record, precision) {
            Ok(entry) => entry,
            Err(reason) => {
                debug!(team = %team, reason = %reason, "Skipping loot record");
                stats.skipped += 1;
                continue;
            }
        };
        match store.append_loot(team, entry) {
            Ok(()) => stats.accepted += 1,
            Err(e) => {
                debug!(team = %team, error = %e, "Skipping loot record");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

/// Build one team's point history
///
/// One record may credit several players; each resolved player gets its own
/// entry and each unresolved one counts as a skip.
pub fn history_into(
    store: &mut TenantStore,
    team: &str,
    table: &Value,
    _ctx: &StageContext<'_>,
) -> Result<StageStats, StageError> {
    if !table.is_table() {
        return Err(StageError::not_a_table("history table"));
    }
    let precision = store.config().rounding_for(team);
    let mut stats = StageStats::default();

    for record in table.members() {
        let entries = match history_from(record, precision) {
            Ok(entries) => entries,
            Err(reason) => {
                debug!(team = %team, reason = %reason, "Skipping history record");
                stats.skipped += 1;
                continue;
            }
        };
        for entry in entries {
            let player = entry.player.clone();
            match store.append_history(team, &player, entry) {
                Ok(()) => stats.accepted += 1,
                Err(e) => {
                    debug!(team = %team, error = %e, "Skipping history entry");
                    stats.skipped += 1;
                }
            }
        }
    }
    Ok(stats)
}

// ============================================================================
// Record decoding
// ============================================================================

fn text_field<'v>(record: &'v Value, field: &str) -> Result<&'v str, String> {
    match record.get(field).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(format!("missing or empty '{}'", field)),
    }
}

fn number_field(record: &Value, field: &str) -> Result<f64, String> {
    record
        .get(field)
        .and_then(Value::as_f64)
        .filter(|f| f.is_finite())
        .ok_or_else(|| format!("missing or non-numeric '{}'", field))
}

fn optional_text(record: &Value, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Entries carrying `deletedby` were reversed by a later correction
fn is_deleted(record: &Value) -> bool {
    record.get("deletedby").is_some()
}

fn standing_from(record: &Value, precision: u32, ctx: &StageContext<'_>) -> Result<Standing, String> {
    if !record.is_table() {
        return Err("record is not a table".to_string());
    }
    let name = text_field(record, "player")?;
    let points = number_field(record, "dkp")?;
    let gained = number_field(record, "lifetime_gained")?;
    let spent = number_field(record, "lifetime_spent")?;
    let class = text_field(record, "class")?;
    let role = optional_text(record, "role").unwrap_or_default();
    let spec = optional_text(record, "spec").unwrap_or_default();

    let mut roles = if ctx.settings.smart_roles {
        ctx.roles.classify(class, &spec)
    } else {
        RoleSet::empty()
    };
    if roles.is_empty() {
        roles = RoleSet::from_role_text(&role);
    }

    Ok(Standing::new(name, points, gained, spent, class)
        .with_classification(role, spec, roles)
        .with_rank(optional_text(record, "rank"))
        .rounded(precision))
}

fn loot_from(record: &Value, precision: u32) -> Result<LootEntry, String> {
    if is_deleted(record) {
        return Err("entry was deleted".to_string());
    }
    let player = text_field(record, "player")?;
    let item = text_field(record, "loot")?;
    let cost = number_field(record, "cost")?;
    let timestamp = record
        .get("date")
        .and_then(Value::as_i64)
        .ok_or_else(|| "missing or non-integer 'date'".to_string())?;

    Ok(LootEntry::new(player, item, round_to(cost.abs(), precision), timestamp)
        .with_source(optional_text(record, "boss"), optional_text(record, "zone")))
}

fn history_from(record: &Value, precision: u32) -> Result<Vec<HistoryEntry>, String> {
    if is_deleted(record) {
        return Err("entry was deleted".to_string());
    }
    let players: Vec<&str> = text_field(record, "players")?
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if players.is_empty() {
        return Err("no players listed".to_string());
    }

    let deltas = deltas_for(record, players.len())?;
    let timestamp = record
        .get("date")
        .and_then(Value::as_i64)
        .ok_or_else(|| "missing or non-integer 'date'".to_string())?;
    let reason = match record.get("reason") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(code) => code.as_i64().map(reason_label).unwrap_or("Unknown").to_string(),
        None => reason_label(0).to_string(),
    };
    let officer = officer_of(record);

    Ok(players
        .iter()
        .zip(deltas)
        .map(|(player, delta)| {
            HistoryEntry::new(player, round_to(delta, precision), timestamp, reason.clone(), officer.clone())
        })
        .collect())
}

/// One delta per player: a single amount applies to everyone, a comma list
/// must match the player count. Percentage entries (decay) are rejected.
fn deltas_for(record: &Value, count: usize) -> Result<Vec<f64>, String> {
    match record.get("dkp") {
        Some(Value::String(s)) => {
            if s.contains('%') {
                return Err("percentage adjustment".to_string());
            }
            let values = s
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| match v.parse::<f64>() {
                    Ok(amount) if amount.is_finite() => Ok(amount),
                    _ => Err(format!("invalid amount '{}'", v)),
                })
                .collect::<Result<Vec<f64>, String>>()?;
            match values.len() {
                1 => Ok(vec![values[0]; count]),
                n if n == count => Ok(values),
                n => Err(format!("{} amounts for {} players", n, count)),
            }
        }
        Some(other) => other
            .as_f64()
            .filter(|amount| amount.is_finite())
            .map(|amount| vec![amount; count])
            .ok_or_else(|| "non-numeric 'dkp'".to_string()),
        None => Err("missing 'dkp'".to_string()),
    }
}

/// Explicit `officer`, else the name part of `index` ("Officer-1590000000")
fn officer_of(record: &Value) -> String {
    if let Some(officer) = optional_text(record, "officer") {
        return officer;
    }
    record
        .get("index")
        .and_then(Value::as_str)
        .map(|index| match index.rsplit_once('-') {
            Some((name, _)) => name.to_string(),
            None => index.to_string(),
        })
        .unwrap_or_default()
}
