//! Resumable per-story production pipeline.
//!
//! `advance` walks the stages from SCRIPTED up to a target. Each stage is
//! skipped when its artifact is recorded and still usable, adopted when the
//! artifact exists from an interrupted run but was never recorded, and
//! executed otherwise. The artifact is always on disk before the job row
//! claims it.

pub mod artifacts;
pub mod executor;
mod job;
mod stage;

pub use artifacts::{ArtifactDir, PublishReceipt};
pub use executor::{ExecutorSettings, StageExecutor};
pub use job::{JobArtifacts, VideoJob};
pub use stage::Stage;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::counter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PipelineError, StageError, StoreError};
use crate::model::Story;
use crate::store::StoryStore;
use artifacts::check_usable;

pub struct Pipeline {
    store: Arc<StoryStore>,
    executor: StageExecutor,
    output_dir: PathBuf,
    workers: usize,
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn set_pointer(job: &mut VideoJob, stage: Stage, path: PathBuf) {
    let a = &mut job.artifacts;
    match stage {
        Stage::Scripted => a.script = Some(path),
        Stage::Voiced => a.audio = Some(path),
        Stage::Timestamped => a.timestamps = Some(path),
        Stage::Captioned => a.captions = Some(path),
        Stage::Rendered => a.video = Some(path),
        Stage::Published | Stage::Ingested | Stage::Failed => {}
    }
}

fn record_outcome(stage: Stage, outcome: &'static str) {
    counter!("pipeline_stage_total", "stage" => stage.as_str(), "outcome" => outcome).increment(1);
}

impl Pipeline {
    pub fn new(
        store: Arc<StoryStore>,
        executor: StageExecutor,
        output_dir: impl Into<PathBuf>,
        workers: usize,
    ) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            store,
            executor,
            output_dir: output_dir.into(),
            workers: workers.max(1),
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn story_lock(&self, story_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(story_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the lock entry once no caller holds or waits on it.
    fn release_lock(&self, story_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks
            .get(story_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(story_id);
        }
    }

    /// Number of stories with a live lock entry.
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }

    /// Bring one story up to `target`. Concurrent calls for the same story
    /// queue behind each other.
    pub async fn advance(&self, story_id: &str, target: Stage) -> Result<VideoJob, PipelineError> {
        if !target.is_producing() {
            return Err(PipelineError::InvalidTarget(target));
        }
        let lock = self.story_lock(story_id);
        let result = {
            let _guard = lock.lock().await;
            self.advance_locked(story_id, target).await
        };
        self.release_lock(story_id, lock);
        result
    }

    async fn advance_locked(&self, story_id: &str, target: Stage) -> Result<VideoJob, PipelineError> {
        let story = self
            .store
            .get_story(story_id)?
            .ok_or_else(|| StoreError::MissingStory {
                id: story_id.to_string(),
            })?;
        let mut job = self.store.ensure_job(story_id)?;
        let art = ArtifactDir::new(&self.output_dir, story_id);

        if job.is_failed() {
            tracing::info!(
                target: "pipeline",
                story_id = %story.short_id(),
                failed_stage = ?job.failed_stage,
                resume_from = %job.completed_stage,
                "re-entering failed job"
            );
            job = self.store.update_job(story_id, |j| {
                j.stage = j.completed_stage;
                j.failed_stage = None;
            })?;
        }

        for stage in Stage::PRODUCING
            .iter()
            .copied()
            .filter(|s| target.reached(*s))
        {
            job = self.run_stage(stage, &story, job, &art).await?;
        }

        // A story that was uploaded once stays published even when a lower
        // target made us rebuild earlier artifacts.
        if target != Stage::Published
            && job.completed_stage == Stage::Rendered
            && job.artifacts.external_id.is_some()
        {
            job = self.run_stage(Stage::Published, &story, job, &art).await?;
        }
        Ok(job)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        story: &Story,
        job: VideoJob,
        art: &ArtifactDir,
    ) -> Result<VideoJob, PipelineError> {
        let short = story.short_id();
        let recorded = job.completed_stage.reached(stage);
        let usable = art.is_usable(stage).await;

        if recorded && usable {
            tracing::debug!(target: "pipeline", story_id = %short, stage = %stage, "stage already complete");
            record_outcome(stage, "skipped");
            return Ok(job);
        }

        let prev = stage.prev().unwrap_or(Stage::Ingested);
        if usable && job.completed_stage == prev {
            let external_id = match stage {
                Stage::Published => art.load_receipt().await.map(|r| r.external_id),
                _ => None,
            };
            let final_path = art.final_path(stage);
            let job = self.store.update_job(&story.id, |j| {
                j.completed_stage = stage;
                j.stage = stage;
                j.stage_error = None;
                j.stage_started_at = None;
                if let Some(p) = final_path {
                    set_pointer(j, stage, p);
                }
                if external_id.is_some() {
                    j.artifacts.external_id = external_id;
                }
            })?;
            tracing::info!(target: "pipeline", story_id = %short, stage = %stage, "adopted existing artifact");
            record_outcome(stage, "adopted");
            return Ok(job);
        }

        // The upload already happened: rewrite the lost receipt from the job
        // record instead of uploading again.
        if stage == Stage::Published && job.completed_stage.reached(prev) {
            if let Some(external_id) = job.artifacts.external_id.clone() {
                return self.restore_receipt(story, external_id, art).await;
            }
        }

        // Everything after `stage` was derived from what is about to be
        // replaced, except an upload that already went out.
        let published = job.artifacts.external_id.is_some() || art.is_usable(Stage::Published).await;
        let last_derived = if published && stage != Stage::Published {
            Stage::Rendered
        } else {
            Stage::Published
        };
        if let Err(e) = art.remove_range(stage, last_derived).await {
            let err = StageError::transient(stage, format!("clear old artifacts: {e}"));
            return Err(self.record_failure(story, err)?);
        }
        let job = self.store.update_job(&story.id, |j| {
            if j.completed_stage.reached(stage) {
                j.completed_stage = prev;
            }
            j.stage = j.completed_stage;
            j.artifacts.clear_range(stage, last_derived);
            j.stage_started_at = Some(Utc::now());
        })?;

        tracing::info!(target: "pipeline", story_id = %short, stage = %stage, "stage started");
        let run = self.executor.execute(stage, story, &job, art).await;
        let attempts = run.publish_attempts;
        if attempts > 0 {
            self.store
                .update_job(&story.id, |j| j.publish_attempts += attempts)?;
        }

        let produced = match run.outcome {
            Ok(p) => p,
            Err(err) => return Err(self.record_failure(story, err)?),
        };

        if let Err(err) = self.verify_staged(stage, art).await {
            return Err(self.record_failure(story, err)?);
        }
        let dest = match art.promote(stage).await {
            Ok(p) => p,
            Err(e) => {
                let err = StageError::transient(stage, format!("promote artifact: {e}"));
                return Err(self.record_failure(story, err)?);
            }
        };

        let job = self.store.update_job(&story.id, |j| {
            j.completed_stage = stage;
            j.stage = stage;
            j.stage_started_at = None;
            j.stage_error = None;
            set_pointer(j, stage, dest);
            if let Some(d) = produced.audio_duration_secs {
                j.artifacts.audio_duration_secs = Some(d);
            }
            if let Some(id) = produced.external_id {
                j.artifacts.external_id = Some(id);
            }
        })?;
        tracing::info!(target: "pipeline", story_id = %short, stage = %stage, "stage complete");
        record_outcome(stage, "completed");
        Ok(job)
    }

    /// Check the staged file before it replaces anything. A receipt without
    /// an id means the platform accepted nothing we can point at.
    async fn verify_staged(&self, stage: Stage, art: &ArtifactDir) -> Result<(), StageError> {
        let Some(staged) = art.staging_path(stage) else {
            return Err(StageError::fatal(stage, "no staging path"));
        };
        if check_usable(stage, &staged).await {
            return Ok(());
        }
        let _ = tokio::fs::remove_file(&staged).await;
        match stage {
            Stage::Published => Err(StageError::fatal(stage, "publisher returned an empty id")),
            _ => Err(StageError::transient(
                stage,
                format!("{} failed verification", staged.display()),
            )),
        }
    }

    async fn restore_receipt(
        &self,
        story: &Story,
        external_id: String,
        art: &ArtifactDir,
    ) -> Result<VideoJob, PipelineError> {
        let stage = Stage::Published;
        let receipt = PublishReceipt {
            platform: self.executor.publish_platform().to_string(),
            external_id,
            published_at: Utc::now(),
        };
        let written = match art.stage_json(stage, &receipt).await {
            Ok(_) => art.promote(stage).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let err = StageError::transient(stage, format!("restore receipt: {e}"));
            return Err(self.record_failure(story, err)?);
        }
        let job = self.store.update_job(&story.id, |j| {
            j.completed_stage = stage;
            j.stage = stage;
            j.stage_error = None;
            j.stage_started_at = None;
        })?;
        tracing::info!(target: "pipeline", story_id = %story.short_id(), "restored publish receipt");
        record_outcome(stage, "adopted");
        Ok(job)
    }

    /// Persist a stage failure and hand the error back for the caller.
    fn record_failure(&self, story: &Story, err: StageError) -> Result<PipelineError, StoreError> {
        let stage = err.stage();
        let message = err.message().to_string();
        let fatal = !err.is_retryable();
        self.store.update_job(&story.id, |j| {
            j.stage_started_at = None;
            j.stage_error = Some(message.clone());
            if fatal {
                j.stage = Stage::Failed;
                j.failed_stage = Some(stage);
            } else {
                j.stage = j.completed_stage;
            }
        })?;
        if fatal {
            tracing::error!(target: "pipeline", story_id = %story.short_id(), stage = %stage, error = %message, "stage failed");
            record_outcome(stage, "fatal");
        } else {
            tracing::warn!(target: "pipeline", story_id = %story.short_id(), stage = %stage, error = %message, "stage failed, will retry on re-entry");
            record_outcome(stage, "transient");
        }
        Ok(PipelineError::Stage(err))
    }

    /// Advance several stories, at most `workers` at a time. Results come
    /// back in completion order.
    pub async fn run_many(
        &self,
        story_ids: Vec<String>,
        target: Stage,
    ) -> Vec<(String, Result<VideoJob, PipelineError>)> {
        stream::iter(story_ids)
            .map(|id| async move {
                let res = self.advance(&id, target).await;
                (id, res)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await
    }
}
