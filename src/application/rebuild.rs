//! Rebuild orchestration: explicit, webhook-triggered, and scheduled
//! rebuilds, each followed by a CDN purge of the paths that moved.

use std::collections::BTreeSet;
use std::sync::Arc;

use apalis::prelude::{Data, Error as ApalisError};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::ports::{EdgeCache, Purger};
use crate::cache::{MapCache, RebuildError};
use crate::domain::maps::Maps;
use crate::infra::telemetry::METRIC_BACKGROUND_FAILED;

pub struct RebuildService {
    maps: MapCache,
    edge: Arc<dyn EdgeCache>,
    purger: Option<Arc<dyn Purger>>,
    public_url: String,
}

impl RebuildService {
    pub fn new(
        maps: MapCache,
        edge: Arc<dyn EdgeCache>,
        purger: Option<Arc<dyn Purger>>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            maps,
            edge,
            purger,
            public_url: public_url.into(),
        }
    }

    /// Rebuild now. When any mapping changed since the snapshot this process
    /// last held, the local edge store is cleared and every affected public
    /// URL is purged at the CDN.
    pub async fn rebuild(&self, reason: &'static str) -> Result<Arc<Maps>, RebuildError> {
        let previous = self.maps.snapshot();
        let maps = self.maps.rebuild_maps().await?;

        info!(
            target = "canopy::rebuild",
            reason,
            families = maps.family.len(),
            details = maps.detail.len(),
            "maps refreshed"
        );

        let Some(previous) = previous else {
            return Ok(maps);
        };
        let urls = purge_urls(&previous, &maps, &self.public_url);
        if urls.is_empty() {
            return Ok(maps);
        }

        self.edge.invalidate_all().await;
        if let Some(purger) = &self.purger {
            spawn_purge(purger.clone(), urls);
        }

        Ok(maps)
    }

    /// Start a rebuild without waiting for it. Failures are logged.
    pub fn trigger(self: &Arc<Self>, reason: &'static str) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = service.rebuild(reason).await {
                counter!(METRIC_BACKGROUND_FAILED, "task" => "rebuild").increment(1);
                error!(
                    target = "canopy::rebuild",
                    reason,
                    error = %err,
                    "triggered rebuild failed"
                );
            }
        })
    }
}

/// Fully-qualified URLs to invalidate: old and new pretty paths plus the real
/// path of every added, removed, or moved entry.
pub fn purge_urls(previous: &Maps, current: &Maps, public_url: &str) -> Vec<String> {
    let mut paths = BTreeSet::new();
    for (before, after) in current.changed_since(previous) {
        for entry in before.into_iter().chain(after) {
            paths.insert(entry.pretty_path.as_str());
            paths.insert(entry.real_path.as_str());
        }
    }
    paths
        .into_iter()
        .map(|path| format!("{public_url}{path}"))
        .collect()
}

fn spawn_purge(purger: Arc<dyn Purger>, urls: Vec<String>) {
    tokio::spawn(async move {
        match purger.purge(&urls).await {
            Ok(()) => info!(
                target = "canopy::rebuild",
                urls = urls.len(),
                "purged changed paths"
            ),
            Err(err) => {
                counter!(METRIC_BACKGROUND_FAILED, "task" => "purge").increment(1);
                warn!(
                    target = "canopy::rebuild",
                    urls = urls.len(),
                    error = %err,
                    "purge failed"
                );
            }
        }
    });
}

/// Marker job for the cron-triggered rebuild.
#[derive(Default, Debug, Clone)]
pub struct ScheduledRebuildJob;

impl From<chrono::DateTime<chrono::Utc>> for ScheduledRebuildJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

/// Run the scheduled rebuild. Failures are logged, never retried.
pub async fn process_scheduled_rebuild(
    _job: ScheduledRebuildJob,
    service: Data<Arc<RebuildService>>,
) -> Result<(), ApalisError> {
    if let Err(err) = service.rebuild("schedule").await {
        error!(
            target = "canopy::rebuild",
            error = %err,
            "scheduled rebuild failed"
        );
    }
    Ok(())
}
