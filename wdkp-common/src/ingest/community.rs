//! Team-partitioned variant
//!
//! Every root variable is a map from team id to that team's table:
//!
//! ```text
//! CommDKP_DKPTable = {
//! ["0"] = { { ["player"] = "Thrall", ... }, },
//! ["1"] = { ... },
//! }
//! ```
//!
//! The set of teams is defined by the standings root. Loot and history
//! tables for teams without standings are skipped wholesale.

use super::strategy::{
    config_into, history_into, loot_into, standings_into, PipelineStrategy, RootNames,
    StageContext, StageError, StageStats,
};
use crate::lua::Value;
use crate::store::TenantStore;
use tracing::{debug, warn};

/// Stage overrides for team-partitioned dumps
#[derive(Debug, Default, Clone, Copy)]
pub struct CommunityStrategy;

type TeamStage = fn(&mut TenantStore, &str, &Value, &StageContext<'_>) -> Result<StageStats, StageError>;

/// Run a per-team stage for every registered team in `root`
fn per_team(
    store: &mut TenantStore,
    root: &Value,
    ctx: &StageContext<'_>,
    what: &str,
    stage: TeamStage,
) -> Result<StageStats, StageError> {
    if !root.is_table() {
        return Err(StageError(format!("{} root is not a table", what)));
    }
    let mut stats = StageStats::default();
    for (team, table) in root.entries() {
        if !store.has_team(&team) {
            let dropped = table.members().count();
            warn!(team = %team, records = dropped, "Skipping {} for team without standings", what);
            stats.skipped += dropped;
            continue;
        }
        match stage(store, &team, table, ctx) {
            Ok(team_stats) => stats.merge(team_stats),
            Err(e) => {
                warn!(team = %team, error = %e, "Skipping malformed {} table", what);
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

impl PipelineStrategy for CommunityStrategy {
    fn name(&self) -> &'static str {
        "community"
    }

    fn roots(&self) -> RootNames {
        RootNames {
            config: "CommDKP_DB",
            standings: "CommDKP_DKPTable",
            loot: "CommDKP_Loot",
            history: "CommDKP_DKPHistory",
        }
    }

    /// Team entries are the ones that carry a `modes` table
    fn build_config(
        &self,
        store: &mut TenantStore,
        root: &Value,
        _ctx: &StageContext<'_>,
    ) -> Result<StageStats, StageError> {
        if !root.is_table() {
            return Err(StageError("configuration root is not a table".to_string()));
        }
        let mut stats = StageStats::default();
        for (team, team_config) in root.entries() {
            if team_config.get("modes").is_some() {
                stats.merge(config_into(store, &team, team_config)?);
            } else {
                debug!(key = %team, "Ignoring non-team configuration entry");
            }
        }
        store.config_mut().settings = Some(root.clone());
        Ok(stats)
    }

    fn build_standings(
        &self,
        store: &mut TenantStore,
        root: &Value,
        ctx: &StageContext<'_>,
    ) -> Result<StageStats, StageError> {
        if !root.is_table() {
            return Err(StageError("standings root is not a table".to_string()));
        }
        let mut stats = StageStats::default();
        for (team, table) in root.entries() {
            match standings_into(store, &team, table, ctx) {
                Ok(team_stats) => stats.merge(team_stats),
                Err(e) => {
                    warn!(team = %team, error = %e, "Skipping malformed standings table");
                    stats.skipped += 1;
                }
            }
        }
        Ok(stats)
    }

    fn build_loot(
        &self,
        store: &mut TenantStore,
        root: &Value,
        ctx: &StageContext<'_>,
    ) -> Result<StageStats, StageError> {
        per_team(store, root, ctx, "loot", loot_into)
    }

    fn build_history(
        &self,
        store: &mut TenantStore,
        root: &Value,
        ctx: &StageContext<'_>,
    ) -> Result<StageStats, StageError> {
        per_team(store, root, ctx, "history", history_into)
    }
}
