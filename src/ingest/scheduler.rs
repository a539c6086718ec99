// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ingest::{run_and_store, types::SourceProvider, IngestOptions};
use crate::source_weights::SourceWeights;
use crate::store::StoryStore;

#[derive(Clone)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
    pub options: IngestOptions,
    pub weights: SourceWeights,
}

/// Spawn a periodic ingest loop. Returns `None` when the interval is 0.
/// The first run happens immediately.
pub fn spawn_scheduler(
    cfg: IngestSchedulerCfg,
    providers: Vec<Arc<dyn SourceProvider>>,
    store: Arc<StoryStore>,
) -> Option<JoinHandle<()>> {
    if cfg.interval_secs == 0 {
        return None;
    }
    tracing::info!(target: "ingest", interval_secs = cfg.interval_secs, providers = providers.len(), "ingest scheduler started");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = run_and_store(&providers, &cfg.weights, cfg.options, &store).await {
                tracing::warn!(target: "ingest", error = %e, "scheduled ingest failed");
            }
        }
    }))
}
