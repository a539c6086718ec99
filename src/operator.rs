//! Operator surface: ingest, list, show, advance, run_top.
//!
//! Thin layer over the store, the ingest run and the pipeline; the HTTP API
//! and the scheduler both go through here.

use serde::Serialize;
use std::sync::Arc;

use crate::error::{PipelineError, StoreError};
use crate::ingest::{self, types::SourceProvider, IngestOptions, IngestReport};
use crate::model::Story;
use crate::pipeline::{Pipeline, Stage, VideoJob};
use crate::source_weights::SourceWeights;
use crate::store::{StoryFilter, StoryStore};

/// A story plus its production record, if it has entered the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct StoryDetail {
    pub story: Story,
    pub job: Option<VideoJob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub story_id: String,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<RunOutcome>,
}

#[derive(Clone)]
pub struct Operator {
    store: Arc<StoryStore>,
    pipeline: Arc<Pipeline>,
    providers: Vec<Arc<dyn SourceProvider>>,
    weights: SourceWeights,
    ingest_opts: IngestOptions,
}

impl Operator {
    pub fn new(
        store: Arc<StoryStore>,
        pipeline: Arc<Pipeline>,
        providers: Vec<Arc<dyn SourceProvider>>,
        weights: SourceWeights,
        ingest_opts: IngestOptions,
    ) -> Self {
        Self {
            store,
            pipeline,
            providers,
            weights,
            ingest_opts,
        }
    }

    pub fn store(&self) -> &Arc<StoryStore> {
        &self.store
    }

    pub async fn ingest(&self) -> Result<IngestReport, StoreError> {
        ingest::run_and_store(&self.providers, &self.weights, self.ingest_opts, &self.store).await
    }

    pub fn list(&self, filter: &StoryFilter) -> Result<Vec<Story>, StoreError> {
        self.store.list_stories(filter)
    }

    /// Last persisted state, whatever happened to the process since.
    pub fn show(&self, prefix: &str) -> Result<StoryDetail, StoreError> {
        let story = self.store.find_by_prefix(prefix)?;
        let job = self.store.get_job(&story.id)?;
        Ok(StoryDetail { story, job })
    }

    pub async fn advance(&self, prefix: &str, target: Stage) -> Result<VideoJob, PipelineError> {
        if !target.is_producing() {
            return Err(PipelineError::InvalidTarget(target));
        }
        let id = self.store.resolve_prefix(prefix)?;
        self.pipeline.advance(&id, target).await
    }

    /// Take the `count` best stories still at INGESTED and advance each to
    /// `target` through the worker pool.
    pub async fn run_top(&self, count: usize, target: Stage) -> Result<RunSummary, PipelineError> {
        if !target.is_producing() {
            return Err(PipelineError::InvalidTarget(target));
        }
        let picked = self.store.list_stories(&StoryFilter {
            stage: Some(Stage::Ingested),
            source: None,
            limit: Some(count),
        })?;
        let ids: Vec<String> = picked.into_iter().map(|s| s.id).collect();
        let selected = ids.len();
        tracing::info!(target: "pipeline", selected, target_stage = %target, workers = self.pipeline.workers(), "auto-run started");

        let mut summary = RunSummary {
            selected,
            ..RunSummary::default()
        };
        for (id, res) in self.pipeline.run_many(ids, target).await {
            let outcome = match res {
                Ok(job) => {
                    summary.succeeded += 1;
                    RunOutcome {
                        story_id: id,
                        stage: job.stage,
                        error: None,
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    let stage = self
                        .store
                        .get_job(&id)
                        .ok()
                        .flatten()
                        .map(|j| j.stage)
                        .unwrap_or(Stage::Ingested);
                    RunOutcome {
                        story_id: id,
                        stage,
                        error: Some(e.to_string()),
                    }
                }
            };
            summary.results.push(outcome);
        }
        summary.results.sort_by(|a, b| a.story_id.cmp(&b.story_id));
        tracing::info!(target: "pipeline", succeeded = summary.succeeded, failed = summary.failed, "auto-run finished");
        Ok(summary)
    }
}
