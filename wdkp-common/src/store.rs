//! Per-tenant indexed dataset
//!
//! A [`TenantStore`] holds one [`TeamData`] per team. Each team keeps:
//! - standings by player key (dump order)
//! - the loot list, newest first once finalized
//! - loot by player, as positions into the loot list
//! - history by player, newest first once finalized
//! - class groups, player keys sorted by balance descending
//!
//! Mutation methods are used by the ingest pipeline only. The store is
//! rebuilt from scratch on every upload, never patched.

use crate::lua::Value;
use crate::model::{is_active, player_key, HistoryEntry, LootEntry, Standing, DEFAULT_TEAM};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Snapshot format version written by [`TenantStore::serialize_snapshot`]
pub const SNAPSHOT_VERSION: u32 = 1;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The team has no data in this tenant
    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    /// A loot or history entry names a player with no standing
    #[error("Unknown player '{player}' in team {team}")]
    UnknownPlayer { team: String, player: String },

    /// Snapshot bytes could not be encoded or decoded
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Snapshot written by an incompatible version
    #[error("Unsupported snapshot version {found} (expected {expected})", expected = SNAPSHOT_VERSION)]
    SnapshotVersion { found: u32 },
}

/// Upload metadata supplied with a dump
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub comment: String,
    /// Preformatted upload date
    pub date: String,
    pub author: String,
}

/// Metadata recorded by a successful ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestMetadata {
    pub upload: UploadMetadata,
    /// Seconds since epoch
    pub ingested_at: i64,
}

/// Addon configuration extracted by the config stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddonConfig {
    /// Raw configuration root, kept opaque
    pub settings: Option<Value>,
    /// Decimal places per team
    pub rounding: IndexMap<String, u32>,
}

impl AddonConfig {
    pub fn rounding_for(&self, team: &str) -> u32 {
        self.rounding.get(team).copied().unwrap_or(0)
    }
}

/// Indices for one team
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamData {
    standings: IndexMap<String, Standing>,
    loot: Vec<LootEntry>,
    loot_by_player: IndexMap<String, Vec<usize>>,
    history_by_player: IndexMap<String, Vec<HistoryEntry>>,
    groups: IndexMap<String, Vec<String>>,
}

impl TeamData {
    pub fn standing(&self, name: &str) -> Option<&Standing> {
        self.standings.get(&player_key(name))
    }

    pub fn standings(&self) -> impl Iterator<Item = &Standing> {
        self.standings.values()
    }

    pub fn standing_count(&self) -> usize {
        self.standings.len()
    }

    /// All loot, newest first
    pub fn loot(&self) -> &[LootEntry] {
        &self.loot
    }

    pub fn player_loot(&self, name: &str) -> Vec<&LootEntry> {
        self.loot_by_player
            .get(&player_key(name))
            .map(|positions| positions.iter().filter_map(|&i| self.loot.get(i)).collect())
            .unwrap_or_default()
    }

    /// A player's history, newest first
    pub fn player_history(&self, name: &str) -> &[HistoryEntry] {
        self.history_by_player
            .get(&player_key(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn latest_loot(&self, name: &str) -> Option<&LootEntry> {
        self.standing(name)?
            .latest_loot
            .and_then(|i| self.loot.get(i))
    }

    pub fn latest_history(&self, name: &str) -> Option<&HistoryEntry> {
        let standing = self.standing(name)?;
        standing
            .latest_history
            .and_then(|i| self.player_history(&standing.name).get(i))
    }

    /// Case-insensitive substring search over item names, newest first
    pub fn find_loot(&self, query: &str) -> Vec<&LootEntry> {
        let needle = query.trim().to_lowercase();
        self.loot
            .iter()
            .filter(|entry| entry.item_name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Standings in a class group, balance descending
    pub fn group(&self, key: &str) -> Vec<&Standing> {
        self.groups
            .get(&key.trim().to_uppercase())
            .map(|keys| keys.iter().filter_map(|k| self.standings.get(k)).collect())
            .unwrap_or_default()
    }

    pub fn group_keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    fn upsert_standing(&mut self, standing: Standing) {
        self.standings.insert(standing.key(), standing);
    }

    fn append_loot(&mut self, entry: LootEntry) -> bool {
        if !self.standings.contains_key(&entry.player) {
            return false;
        }
        let position = self.loot.len();
        self.loot_by_player
            .entry(entry.player.clone())
            .or_default()
            .push(position);
        self.loot.push(entry);
        true
    }

    fn append_history(&mut self, player: &str, entry: HistoryEntry) -> bool {
        let key = player_key(player);
        if !self.standings.contains_key(&key) {
            return false;
        }
        self.history_by_player.entry(key).or_default().push(entry);
        true
    }

    /// Insert keeping the group sorted by balance desc, then name asc
    fn append_to_group(&mut self, group: &str, player: &str) -> bool {
        let key = player_key(player);
        let Some(standing) = self.standings.get(&key) else {
            return false;
        };
        let members = self.groups.entry(group.trim().to_uppercase()).or_default();
        if members.contains(&key) {
            return true;
        }
        let standings = &self.standings;
        let at = members.partition_point(|other| {
            standings
                .get(other)
                .map(|o| rank_order(o, standing) != Ordering::Greater)
                .unwrap_or(true)
        });
        members.insert(at, key);
        true
    }

    fn sort_chronological(&mut self) {
        let mut loot = std::mem::take(&mut self.loot);
        loot.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.loot_by_player.clear();
        for (position, entry) in loot.iter().enumerate() {
            self.loot_by_player
                .entry(entry.player.clone())
                .or_default()
                .push(position);
        }
        self.loot = loot;

        for history in self.history_by_player.values_mut() {
            history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
    }

    fn link_latest(&mut self, now: i64, window: i64) {
        for (key, standing) in self.standings.iter_mut() {
            standing.latest_loot = self.loot_by_player.get(key).and_then(|p| p.first().copied());
            let history = self
                .history_by_player
                .get(key)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            standing.latest_history = history.iter().position(HistoryEntry::is_positive);
            standing.active = is_active(history, now, window);
        }
    }

    fn rebuild_groups(&mut self) {
        self.groups.clear();
        let members: Vec<(String, String)> = self
            .standings
            .iter()
            .map(|(key, standing)| (standing.class.clone(), key.clone()))
            .collect();
        for (class, key) in members {
            self.append_to_group(&class, &key);
        }
    }
}

/// Balance descending, then name ascending
fn rank_order(a: &Standing, b: &Standing) -> Ordering {
    b.points
        .total_cmp(&a.points)
        .then_with(|| a.key().cmp(&b.key()))
}

/// Full per-tenant state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantStore {
    config: AddonConfig,
    teams: IndexMap<String, TeamData>,
    metadata: Option<IngestMetadata>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    store: TenantStore,
}

fn team_key(team: Option<&str>) -> &str {
    team.unwrap_or(DEFAULT_TEAM)
}

impl TenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every index, config and metadata
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    pub fn config(&self) -> &AddonConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AddonConfig {
        &mut self.config
    }

    pub fn metadata(&self) -> Option<&IngestMetadata> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: IngestMetadata) {
        self.metadata = Some(metadata);
    }

    pub fn teams(&self) -> impl Iterator<Item = &str> {
        self.teams.keys().map(String::as_str)
    }

    pub fn has_team(&self, team: &str) -> bool {
        self.teams.contains_key(team)
    }

    /// Register a team with no data yet
    pub fn ensure_team(&mut self, team: &str) {
        self.teams.entry(team.to_string()).or_default();
    }

    /// Team indices; `None` selects the default team
    pub fn team(&self, team: Option<&str>) -> Result<&TeamData, StoreError> {
        let key = team_key(team);
        self.teams
            .get(key)
            .ok_or_else(|| StoreError::UnknownTeam(key.to_string()))
    }

    // ------------------------------------------------------------------
    // Mutation (ingestion only)
    // ------------------------------------------------------------------

    pub fn upsert_standing(&mut self, team: &str, standing: Standing) {
        self.teams
            .entry(team.to_string())
            .or_default()
            .upsert_standing(standing);
    }

    pub fn append_loot(&mut self, team: &str, entry: LootEntry) -> Result<(), StoreError> {
        let data = self
            .teams
            .get_mut(team)
            .ok_or_else(|| StoreError::UnknownTeam(team.to_string()))?;
        let player = entry.player.clone();
        if data.append_loot(entry) {
            Ok(())
        } else {
            Err(StoreError::UnknownPlayer {
                team: team.to_string(),
                player,
            })
        }
    }

    pub fn append_history(
        &mut self,
        team: &str,
        player: &str,
        entry: HistoryEntry,
    ) -> Result<(), StoreError> {
        let data = self
            .teams
            .get_mut(team)
            .ok_or_else(|| StoreError::UnknownTeam(team.to_string()))?;
        if data.append_history(player, entry) {
            Ok(())
        } else {
            Err(StoreError::UnknownPlayer {
                team: team.to_string(),
                player: player.to_string(),
            })
        }
    }

    pub fn append_to_group(&mut self, team: &str, group: &str, player: &str) -> Result<(), StoreError> {
        let data = self
            .teams
            .get_mut(team)
            .ok_or_else(|| StoreError::UnknownTeam(team.to_string()))?;
        if data.append_to_group(group, player) {
            Ok(())
        } else {
            Err(StoreError::UnknownPlayer {
                team: team.to_string(),
                player: player.to_string(),
            })
        }
    }

    /// Sort loot and history newest first and rebuild loot positions
    pub fn sort_chronological(&mut self) {
        for data in self.teams.values_mut() {
            data.sort_chronological();
        }
    }

    /// Recompute latest-loot / latest-history references and activity
    pub fn link_latest(&mut self, now: i64, window: i64) {
        for data in self.teams.values_mut() {
            data.link_latest(now, window);
        }
    }

    /// Rebuild every class group from current standings
    pub fn rebuild_groups(&mut self) {
        for data in self.teams.values_mut() {
            data.rebuild_groups();
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_standing(&self, team: Option<&str>, name: &str) -> Result<Option<&Standing>, StoreError> {
        Ok(self.team(team)?.standing(name))
    }

    pub fn list_team_standings(&self, team: Option<&str>) -> Result<Vec<&Standing>, StoreError> {
        Ok(self.team(team)?.standings().collect())
    }

    pub fn find_loot_by_name(&self, team: Option<&str>, query: &str) -> Result<Vec<&LootEntry>, StoreError> {
        Ok(self.team(team)?.find_loot(query))
    }

    pub fn get_group(&self, team: Option<&str>, key: &str) -> Result<Vec<&Standing>, StoreError> {
        Ok(self.team(team)?.group(key))
    }

    pub fn player_loot(&self, team: Option<&str>, name: &str) -> Result<Vec<&LootEntry>, StoreError> {
        Ok(self.team(team)?.player_loot(name))
    }

    pub fn player_history(&self, team: Option<&str>, name: &str) -> Result<&[HistoryEntry], StoreError> {
        Ok(self.team(team)?.player_history(name))
    }

    pub fn latest_loot(&self, team: Option<&str>, name: &str) -> Result<Option<&LootEntry>, StoreError> {
        Ok(self.team(team)?.latest_loot(name))
    }

    pub fn latest_history(&self, team: Option<&str>, name: &str) -> Result<Option<&HistoryEntry>, StoreError> {
        Ok(self.team(team)?.latest_history(name))
    }

    pub fn loot(&self, team: Option<&str>) -> Result<&[LootEntry], StoreError> {
        Ok(self.team(team)?.loot())
    }

    /// Active standings, balance descending
    pub fn active_standings(&self, team: Option<&str>) -> Result<Vec<&Standing>, StoreError> {
        let mut active: Vec<&Standing> = self.team(team)?.standings().filter(|s| s.active).collect();
        active.sort_by(|a, b| rank_order(a, b));
        Ok(active)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn serialize_snapshot(&self) -> Result<Vec<u8>, StoreError> {
        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            store: self.clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    pub fn restore_snapshot(bytes: &[u8]) -> Result<TenantStore, StoreError> {
        let envelope: SnapshotEnvelope = serde_json::from_slice(bytes)?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(StoreError::SnapshotVersion {
                found: envelope.version,
            });
        }
        Ok(envelope.store)
    }
}
