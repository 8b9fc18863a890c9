//! Request handling over the residency manager
//!
//! Every request first makes its tenant resident, then takes the store lock
//! it needs: write for uploads, read for queries. A handle that loses its
//! tenant to eviction before the lock is granted goes back through
//! `ensure_resident`.

use crate::render;
use crate::requests::{Request, Target};
use std::path::Path;
use tracing::{debug, info};
use wdkp_common::model::{Standing, DEFAULT_TEAM};
use wdkp_common::store::{TenantStore, UploadMetadata};
use wdkp_common::{BuildReport, Error, Ingestor, ResidencyError, ResidencyManager, Result, TenantId};

pub struct BotService {
    residency: ResidencyManager,
    ingestor: Ingestor,
}

impl BotService {
    pub fn new(residency: ResidencyManager, ingestor: Ingestor) -> Self {
        Self { residency, ingestor }
    }

    pub fn residency(&self) -> &ResidencyManager {
        &self.residency
    }

    /// Dispatch one parsed request, returning the lines to print
    pub async fn handle(&self, request: Request) -> Result<Vec<String>> {
        match request {
            Request::Upload {
                tenant,
                path,
                author,
                comment,
            } => {
                let upload = UploadMetadata {
                    comment,
                    date: wdkp_common::time::format_epoch(wdkp_common::time::now_epoch()),
                    author: author.unwrap_or_default(),
                };
                let report = self.upload_file(tenant, &path, upload).await?;
                Ok(vec![format!(
                    "Uploaded {} ({} teams, {} standings, {} loot, {} history entries)",
                    report.variant,
                    report.teams,
                    report.standings.accepted,
                    report.loot.accepted,
                    report.history.accepted
                )])
            }
            Request::Query {
                tenant,
                team,
                target,
            } => self.query(tenant, team.as_deref(), &target).await,
        }
    }

    pub async fn upload_file(
        &self,
        tenant: TenantId,
        path: &Path,
        upload: UploadMetadata,
    ) -> Result<BuildReport> {
        let text = tokio::fs::read_to_string(path).await?;
        debug!(tenant = %tenant, path = %path.display(), bytes = text.len(), "Read dump");
        self.upload_text(tenant, &text, upload).await
    }

    /// Rebuild the tenant's store from dump text
    pub async fn upload_text(
        &self,
        tenant: TenantId,
        text: &str,
        upload: UploadMetadata,
    ) -> Result<BuildReport> {
        loop {
            let handle = self.residency.ensure_resident(tenant).await?;
            let mut store = match handle.write().await {
                Ok(store) => store,
                Err(ResidencyError::Evicted(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let report = self.ingestor.build(&mut store, text, upload).await?;
            info!(tenant = %tenant, teams = report.teams, "Upload applied");
            return Ok(report);
        }
    }

    pub async fn query(
        &self,
        tenant: TenantId,
        team: Option<&str>,
        target: &Target,
    ) -> Result<Vec<String>> {
        loop {
            let handle = self.residency.ensure_resident(tenant).await?;
            let store = match handle.read().await {
                Ok(store) => store,
                Err(ResidencyError::Evicted(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            return answer(&store, team, target);
        }
    }

    /// Persist every resident tenant
    pub async fn shutdown(&self) -> Result<usize> {
        Ok(self.residency.flush_all().await?)
    }
}

fn answer(store: &TenantStore, team: Option<&str>, target: &Target) -> Result<Vec<String>> {
    let precision = store.config().rounding_for(team.unwrap_or(DEFAULT_TEAM));

    match target {
        Target::All => {
            let mut rows = store.list_team_standings(team)?;
            rows.sort_by(|a, b| by_balance(a, b));
            Ok(render::standings(&rows, precision))
        }
        Target::Loot(text) => {
            let found = store.find_loot_by_name(team, text)?;
            if found.is_empty() {
                return Err(Error::NotFound(format!("no loot matching '{}'", text)));
            }
            Ok(render::loot(&found, precision))
        }
        Target::History(name) => {
            if store.get_standing(team, name)?.is_none() {
                return Err(Error::NotFound(format!("player '{}'", name)));
            }
            Ok(render::history(store.player_history(team, name)?, precision))
        }
        Target::Name(name) => {
            if let Some(standing) = store.get_standing(team, name)? {
                return Ok(render::player(
                    standing,
                    store.latest_loot(team, name)?,
                    store.latest_history(team, name)?,
                    precision,
                ));
            }
            let group = store.get_group(team, name)?;
            if group.is_empty() {
                return Err(Error::NotFound(format!("no player or class named '{}'", name)));
            }
            Ok(render::standings(&group, precision))
        }
    }
}

fn by_balance(a: &Standing, b: &Standing) -> std::cmp::Ordering {
    b.points.total_cmp(&a.points).then_with(|| a.key().cmp(&b.key()))
}
