// src/ingest/types.rs
use anyhow::Result;
use serde::Serialize;

use crate::model::RawStory;

/// One ingestion source. A provider returns everything it could fetch or a
/// single terminal error; it never needs to guard against its siblings.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawStory>>;
    fn name(&self) -> &'static str;
}

/// How one provider fared in one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Fetched { count: usize },
    Failed { reason: String },
    TimedOut { after_ms: u64 },
}

impl ProviderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderOutcome::Fetched { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderReport {
    pub provider: &'static str,
    #[serde(flatten)]
    pub outcome: ProviderOutcome,
    pub elapsed_ms: u64,
}
