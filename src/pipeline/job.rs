use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pipeline::Stage;

/// Pointers to each stage's output, as recorded in the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub script: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    pub audio_duration_secs: Option<f64>,
    pub timestamps: Option<PathBuf>,
    pub captions: Option<PathBuf>,
    pub video: Option<PathBuf>,
    pub external_id: Option<String>,
}

impl JobArtifacts {
    /// Forget the pointers of `stage` and every later stage.
    pub fn clear_from(&mut self, stage: Stage) {
        self.clear_range(stage, Stage::Published);
    }

    /// Forget the pointers of the stages `from..=to`.
    pub fn clear_range(&mut self, from: Stage, to: Stage) {
        for s in Stage::PRODUCING
            .iter()
            .filter(|s| s.reached(from) && to.reached(**s))
        {
            match s {
                Stage::Scripted => self.script = None,
                Stage::Voiced => {
                    self.audio = None;
                    self.audio_duration_secs = None;
                }
                Stage::Timestamped => self.timestamps = None,
                Stage::Captioned => self.captions = None,
                Stage::Rendered => self.video = None,
                Stage::Published => self.external_id = None,
                Stage::Ingested | Stage::Failed => {}
            }
        }
    }
}

/// Per-story production record. Created on first pipeline entry, never
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoJob {
    pub story_id: String,
    /// Current status: the last completed stage, or FAILED.
    pub stage: Stage,
    /// Last durably completed stage; never FAILED.
    pub completed_stage: Stage,
    pub stage_started_at: Option<DateTime<Utc>>,
    pub stage_error: Option<String>,
    pub failed_stage: Option<Stage>,
    pub artifacts: JobArtifacts,
    pub publish_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoJob {
    pub fn new(story_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            story_id: story_id.into(),
            stage: Stage::Ingested,
            completed_stage: Stage::Ingested,
            stage_started_at: None,
            stage_error: None,
            failed_stage: None,
            artifacts: JobArtifacts::default(),
            publish_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.stage == Stage::Failed
    }
}
