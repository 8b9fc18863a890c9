//! Ingestion pipeline
//!
//! Turns an uploaded addon dump into a rebuilt [`TenantStore`].
//!
//! # Stages
//! 1. **Parse**: decode the dump into a [`Document`]
//! 2. **Config**: addon configuration (per-team rounding)
//! 3. **Standings**: player standings
//! 4. **Loot**: loot awards, resolved against stage 3
//! 5. **History**: point changes, resolved against stage 3
//! 6. **Finalize**: ordering, back-references, activity, class groups
//!
//! # Error Handling
//! - A parse failure rejects the upload and leaves the store untouched
//! - A missing root variable fails its stage and leaves the store cleared
//! - Individual bad records are skipped and counted, never fatal
//!
//! # Example
//! ```rust,ignore
//! let ingestor = Ingestor::new(AddonVariant::Monolith.strategy(), IngestSettings::default());
//! let report = ingestor.build(&mut store, &text, upload).await?;
//! ```

mod community;
mod monolith;
pub mod strategy;

pub use community::CommunityStrategy;
pub use monolith::MonolithStrategy;
pub use strategy::{PipelineStrategy, RootNames, StageContext, StageError, StageStats};

use crate::lua::{self, Document, ParseError, ParserOptions, Value};
use crate::model::DEFAULT_ACTIVITY_WINDOW_SECS;
use crate::roles::{RolePolicy, TalentTreePolicy};
use crate::store::{IngestMetadata, TenantStore, UploadMetadata};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default cap on upload comment length (characters)
pub const DEFAULT_COMMENT_MAX_CHARS: usize = 50;

/// Pipeline stage identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Parse,
    Config,
    Standings,
    Loot,
    History,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Parse => "parse",
            Stage::Config => "config",
            Stage::Standings => "standings",
            Stage::Loot => "loot",
            Stage::History => "history",
            Stage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Build failures, one per stage that can fail
#[derive(Debug, Error)]
pub enum BuildError {
    /// Nothing in the upload could be decoded
    #[error("could not parse file: {0}")]
    Parse(#[from] ParseError),

    #[error("config stage failed: {0}")]
    Config(String),

    #[error("standings stage failed: {0}")]
    Standings(String),

    #[error("loot stage failed: {0}")]
    Loot(String),

    #[error("history stage failed: {0}")]
    History(String),
}

impl BuildError {
    fn at(stage: Stage, reason: String) -> Self {
        match stage {
            Stage::Config => BuildError::Config(reason),
            Stage::Standings => BuildError::Standings(reason),
            Stage::Loot => BuildError::Loot(reason),
            Stage::History => BuildError::History(reason),
            // Parse builds its own variant; finalize cannot fail
            Stage::Parse | Stage::Finalize => {
                unreachable!("{} stage has no failure variant", stage)
            }
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            BuildError::Parse(_) => Stage::Parse,
            BuildError::Config(_) => Stage::Config,
            BuildError::Standings(_) => Stage::Standings,
            BuildError::Loot(_) => Stage::Loot,
            BuildError::History(_) => Stage::History,
        }
    }
}

/// Summary of a successful build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub variant: &'static str,
    /// Top-level variables decoded by the parser
    pub variables: usize,
    pub teams: usize,
    pub config: StageStats,
    pub standings: StageStats,
    pub loot: StageStats,
    pub history: StageStats,
}

/// Progress events emitted while building
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    StageCompleted { stage: Stage, stats: StageStats },
    Failed { stage: Stage, reason: String },
    Completed { teams: usize, standings: usize },
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Recency window for the activity rule
    pub activity_window_secs: i64,
    pub parser: ParserOptions,
    pub comment_max_chars: usize,
    /// Derive roles from talents instead of the addon's role text
    pub smart_roles: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            activity_window_secs: DEFAULT_ACTIVITY_WINDOW_SECS,
            parser: ParserOptions::default(),
            comment_max_chars: DEFAULT_COMMENT_MAX_CHARS,
            smart_roles: false,
        }
    }
}

/// Addon variant selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonVariant {
    #[default]
    Monolith,
    Community,
}

impl AddonVariant {
    pub fn strategy(self) -> Arc<dyn PipelineStrategy> {
        match self {
            AddonVariant::Monolith => Arc::new(MonolithStrategy),
            AddonVariant::Community => Arc::new(CommunityStrategy),
        }
    }
}

impl FromStr for AddonVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monolith" | "monolithdkp" => Ok(AddonVariant::Monolith),
            "community" | "communitydkp" => Ok(AddonVariant::Community),
            other => Err(format!("unknown addon variant '{}'", other)),
        }
    }
}

/// Pipeline driver for one addon variant
pub struct Ingestor {
    strategy: Arc<dyn PipelineStrategy>,
    roles: Arc<dyn RolePolicy>,
    settings: IngestSettings,
    event_tx: Option<mpsc::Sender<IngestEvent>>,
}

impl Ingestor {
    pub fn new(strategy: Arc<dyn PipelineStrategy>, settings: IngestSettings) -> Self {
        Self {
            strategy,
            roles: Arc::new(TalentTreePolicy::default()),
            settings,
            event_tx: None,
        }
    }

    /// Swap the role classification table
    pub fn with_role_policy(mut self, roles: Arc<dyn RolePolicy>) -> Self {
        self.roles = roles;
        self
    }

    /// Report stage progress on `event_tx`
    pub fn with_events(mut self, event_tx: mpsc::Sender<IngestEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Rebuild `store` from `text`, using the current time for activity
    pub async fn build(
        &self,
        store: &mut TenantStore,
        text: &str,
        upload: UploadMetadata,
    ) -> Result<BuildReport, BuildError> {
        self.build_at(store, text, upload, crate::time::now_epoch()).await
    }

    /// Rebuild `store` from `text` with an explicit reference time
    pub async fn build_at(
        &self,
        store: &mut TenantStore,
        text: &str,
        mut upload: UploadMetadata,
        now: i64,
    ) -> Result<BuildReport, BuildError> {
        let document = match lua::parse_with(text, &self.settings.parser) {
            Ok(document) => document,
            Err(e) => {
                warn!(variant = self.strategy.name(), error = %e, "Upload rejected by parser");
                self.emit_event(IngestEvent::Failed {
                    stage: Stage::Parse,
                    reason: e.to_string(),
                })
                .await;
                return Err(BuildError::Parse(e));
            }
        };

        info!(
            variant = self.strategy.name(),
            variables = document.len(),
            author = %upload.author,
            "Rebuilding tenant store"
        );

        store.clear();
        let ctx = StageContext {
            settings: &self.settings,
            roles: self.roles.as_ref(),
            now,
        };

        match self.run_stages(store, &document, &ctx).await {
            Ok(report) => {
                upload.comment = upload
                    .comment
                    .chars()
                    .take(self.settings.comment_max_chars)
                    .collect();
                store.set_metadata(IngestMetadata {
                    upload,
                    ingested_at: now,
                });

                let standings = store
                    .teams()
                    .filter_map(|t| store.team(Some(t)).ok())
                    .map(|t| t.standing_count())
                    .sum();
                info!(
                    teams = report.teams,
                    standings = standings,
                    loot = report.loot.accepted,
                    history = report.history.accepted,
                    "Tenant store rebuilt"
                );
                self.emit_event(IngestEvent::Completed {
                    teams: report.teams,
                    standings,
                })
                .await;
                Ok(report)
            }
            Err(e) => {
                store.clear();
                warn!(stage = %e.stage(), error = %e, "Ingestion failed, store cleared");
                self.emit_event(IngestEvent::Failed {
                    stage: e.stage(),
                    reason: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        store: &mut TenantStore,
        document: &Document,
        ctx: &StageContext<'_>,
    ) -> Result<BuildReport, BuildError> {
        let strategy = self.strategy.as_ref();
        let mut report = BuildReport {
            variant: strategy.name(),
            variables: document.len(),
            ..BuildReport::default()
        };

        let root = self.root(document, Stage::Config)?;
        report.config = self
            .run_stage(Stage::Config, strategy.build_config(store, root, ctx))
            .await?;

        let root = self.root(document, Stage::Standings)?;
        report.standings = self
            .run_stage(Stage::Standings, strategy.build_standings(store, root, ctx))
            .await?;

        let root = self.root(document, Stage::Loot)?;
        report.loot = self
            .run_stage(Stage::Loot, strategy.build_loot(store, root, ctx))
            .await?;

        let root = self.root(document, Stage::History)?;
        report.history = self
            .run_stage(Stage::History, strategy.build_history(store, root, ctx))
            .await?;

        let finalized = strategy.finalize(store, ctx);
        self.emit_event(IngestEvent::StageCompleted {
            stage: Stage::Finalize,
            stats: finalized,
        })
        .await;
        report.teams = store.teams().count();

        Ok(report)
    }

    /// Root variable consumed by `stage`
    fn root<'d>(&self, document: &'d Document, stage: Stage) -> Result<&'d Value, BuildError> {
        let name = self
            .strategy
            .roots()
            .for_stage(stage)
            .unwrap_or_default();
        document
            .get(name)
            .ok_or_else(|| BuildError::at(stage, format!("missing root variable '{}'", name)))
    }

    async fn run_stage(
        &self,
        stage: Stage,
        result: Result<StageStats, StageError>,
    ) -> Result<StageStats, BuildError> {
        let stats = result.map_err(|e| BuildError::at(stage, e.to_string()))?;
        debug!(
            stage = %stage,
            accepted = stats.accepted,
            skipped = stats.skipped,
            "Stage complete"
        );
        self.emit_event(IngestEvent::StageCompleted { stage, stats })
            .await;
        Ok(stats)
    }

    /// Emit event if channel configured
    async fn emit_event(&self, event: IngestEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}
