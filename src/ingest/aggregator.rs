//! Concurrent fan-out over providers with per-provider isolation.
//!
//! Every provider runs on its own task under its own timeout. A provider that
//! errors, panics or runs out of time contributes a report and no records;
//! the others are unaffected. Records from a timed-out provider are discarded
//! (providers return whole batches, so there is nothing partial to keep).
//! Output order follows provider order, not completion order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};

use crate::ingest::types::{ProviderOutcome, ProviderReport, SourceProvider};
use crate::model::RawStory;

#[derive(Debug, Default)]
pub struct Aggregation {
    pub stories: Vec<RawStory>,
    pub reports: Vec<ProviderReport>,
}

impl Aggregation {
    pub fn failed_providers(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| !r.outcome.is_success())
            .count()
    }
}

/// Run all providers concurrently and collect their results.
///
/// `per_provider_cap` truncates each provider's batch (feed order) before
/// merging; 0 means no cap.
pub async fn aggregate(
    providers: &[Arc<dyn SourceProvider>],
    timeout: Duration,
    per_provider_cap: usize,
) -> Aggregation {
    let handles: Vec<_> = providers
        .iter()
        .map(|p| {
            let p = Arc::clone(p);
            let name = p.name();
            let handle = tokio::spawn(async move {
                let t0 = Instant::now();
                let res = tokio::time::timeout(timeout, p.fetch_latest()).await;
                (res, t0.elapsed())
            });
            (name, handle)
        })
        .collect();

    let started = Instant::now();
    let joined = futures::future::join_all(handles.into_iter().map(|(name, h)| async move {
        (name, h.await)
    }))
    .await;

    let mut agg = Aggregation::default();
    for (name, joined) in joined {
        let (outcome, elapsed) = match joined {
            Ok((Ok(Ok(mut batch)), elapsed)) => {
                if per_provider_cap > 0 {
                    batch.truncate(per_provider_cap);
                }
                let count = batch.len();
                agg.stories.append(&mut batch);
                tracing::info!(target: "ingest", provider = name, count, "provider fetched");
                (ProviderOutcome::Fetched { count }, elapsed)
            }
            Ok((Ok(Err(e)), elapsed)) => {
                tracing::warn!(target: "ingest", provider = name, error = ?e, "provider error");
                (
                    ProviderOutcome::Failed {
                        reason: format!("{e:#}"),
                    },
                    elapsed,
                )
            }
            Ok((Err(_), elapsed)) => {
                tracing::warn!(
                    target: "ingest",
                    provider = name,
                    timeout_ms = timeout.as_millis() as u64,
                    "provider timed out"
                );
                (
                    ProviderOutcome::TimedOut {
                        after_ms: timeout.as_millis() as u64,
                    },
                    elapsed,
                )
            }
            Err(join_err) => {
                tracing::warn!(target: "ingest", provider = name, error = %join_err, "provider task aborted");
                (
                    ProviderOutcome::Failed {
                        reason: format!("provider task aborted: {join_err}"),
                    },
                    started.elapsed(),
                )
            }
        };

        let ms = elapsed.as_secs_f64() * 1_000.0;
        histogram!("ingest_provider_ms", "provider" => name).record(ms);
        if !outcome.is_success() {
            counter!("ingest_provider_errors_total", "provider" => name).increment(1);
        }
        agg.reports.push(ProviderReport {
            provider: name,
            outcome,
            elapsed_ms: ms as u64,
        });
    }
    agg
}
