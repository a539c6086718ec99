//! One call per stage into the external collaborators, with the outcome
//! sorted into transient and fatal failures.

use chrono::Utc;
use std::future::Future;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::model::Story;
use crate::pipeline::artifacts::{check_usable, ArtifactDir, PublishReceipt};
use crate::pipeline::{Stage, VideoJob};
use crate::services::captions::build_ass;
use crate::services::publish::{PublishError, PublishRequest};
use crate::services::render::RenderRequest;
use crate::services::Services;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub stage_timeout: Duration,
    pub publish_max_attempts: u32,
    pub publish_backoff: Duration,
    pub voice_backend: String,
}

impl From<&PipelineConfig> for ExecutorSettings {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            stage_timeout: Duration::from_secs(cfg.stage_timeout_secs.max(1)),
            publish_max_attempts: cfg.publish_max_attempts.max(1),
            publish_backoff: Duration::from_millis(cfg.publish_backoff_ms),
            voice_backend: cfg.voice_backend.clone(),
        }
    }
}

/// What a successful stage left behind besides its staged file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Produced {
    pub audio_duration_secs: Option<f64>,
    pub external_id: Option<String>,
}

#[derive(Debug)]
pub struct StageRun {
    pub outcome: Result<Produced, StageError>,
    /// Upload attempts made during this call (publish only).
    pub publish_attempts: u32,
}

impl StageRun {
    fn once(outcome: Result<Produced, StageError>) -> Self {
        Self {
            outcome,
            publish_attempts: 0,
        }
    }
}

pub struct StageExecutor {
    services: Services,
    settings: ExecutorSettings,
}

impl StageExecutor {
    pub fn new(services: Services, settings: ExecutorSettings) -> Self {
        Self { services, settings }
    }

    pub fn publish_platform(&self) -> &'static str {
        self.services.publisher.platform()
    }

    /// Produce the artifact of `stage` at its staging path. Earlier
    /// artifacts are read from their final paths.
    pub async fn execute(
        &self,
        stage: Stage,
        story: &Story,
        job: &VideoJob,
        art: &ArtifactDir,
    ) -> StageRun {
        if let Err(e) = art.ensure_dir().await {
            return StageRun::once(Err(StageError::transient(
                stage,
                format!("create {}: {e}", art.dir().display()),
            )));
        }
        match stage {
            Stage::Scripted => StageRun::once(self.script(story, art).await),
            Stage::Voiced => StageRun::once(self.voice(art).await),
            Stage::Timestamped => StageRun::once(self.timestamps(art).await),
            Stage::Captioned => StageRun::once(self.captions(art).await),
            Stage::Rendered => StageRun::once(self.render(story, job, art).await),
            Stage::Published => self.publish(story, art).await,
            Stage::Ingested | Stage::Failed => StageRun::once(Err(StageError::fatal(
                stage,
                "not an executable stage",
            ))),
        }
    }

    async fn bounded<T, F>(&self, stage: Stage, fut: F) -> Result<T, StageError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.settings.stage_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(StageError::transient(stage, format!("{e:#}"))),
            Err(_) => Err(StageError::transient(
                stage,
                format!("timed out after {:?}", self.settings.stage_timeout),
            )),
        }
    }

    async fn stage_json<T: serde::Serialize>(
        stage: Stage,
        art: &ArtifactDir,
        value: &T,
    ) -> Result<(), StageError> {
        art.stage_json(stage, value)
            .await
            .map(|_| ())
            .map_err(|e| StageError::transient(stage, format!("write artifact: {e}")))
    }

    async fn script(&self, story: &Story, art: &ArtifactDir) -> Result<Produced, StageError> {
        let stage = Stage::Scripted;
        if !story.has_required_fields() {
            return Err(StageError::fatal(stage, "story is missing a title or url"));
        }
        let script = self.bounded(stage, self.services.script.generate(story)).await?;
        if !script.is_usable() {
            return Err(StageError::transient(stage, "generator returned an empty script"));
        }
        Self::stage_json(stage, art, &script).await?;
        Ok(Produced::default())
    }

    async fn voice(&self, art: &ArtifactDir) -> Result<Produced, StageError> {
        let stage = Stage::Voiced;
        let script = art
            .load_script()
            .await
            .ok_or_else(|| StageError::fatal(stage, "script artifact is missing or unusable"))?;
        let backend = self
            .services
            .voices
            .get(&self.settings.voice_backend)
            .ok_or_else(|| {
                StageError::fatal(
                    stage,
                    format!(
                        "unknown voice backend `{}` (known: {})",
                        self.settings.voice_backend,
                        self.services.voices.names().join(", ")
                    ),
                )
            })?;
        let out = staging(art, stage)?;
        self.bounded(stage, backend.synthesize(&script.full_text, &out))
            .await?;
        if !check_usable(stage, &out).await {
            return Err(StageError::transient(stage, "voice backend wrote no audio"));
        }
        let secs = self
            .bounded(stage, self.services.probe.duration_secs(&out))
            .await?;
        Ok(Produced {
            audio_duration_secs: Some(secs),
            external_id: None,
        })
    }

    async fn timestamps(&self, art: &ArtifactDir) -> Result<Produced, StageError> {
        let stage = Stage::Timestamped;
        let audio = art
            .final_path(Stage::Voiced)
            .ok_or_else(|| StageError::fatal(stage, "no audio path"))?;
        let words = self
            .bounded(stage, self.services.timestamps.extract(&audio))
            .await?;
        Self::stage_json(stage, art, &words).await?;
        Ok(Produced::default())
    }

    async fn captions(&self, art: &ArtifactDir) -> Result<Produced, StageError> {
        let stage = Stage::Captioned;
        let words = art
            .load_timestamps()
            .await
            .ok_or_else(|| StageError::fatal(stage, "timestamp data is missing or malformed"))?;
        let ass = build_ass(&words).map_err(|e| StageError::fatal(stage, e.to_string()))?;
        art.stage_bytes(stage, ass.as_bytes())
            .await
            .map_err(|e| StageError::transient(stage, format!("write artifact: {e}")))?;
        Ok(Produced::default())
    }

    async fn render(
        &self,
        story: &Story,
        job: &VideoJob,
        art: &ArtifactDir,
    ) -> Result<Produced, StageError> {
        let stage = Stage::Rendered;
        let (Some(audio), Some(captions)) = (
            art.final_path(Stage::Voiced),
            art.final_path(Stage::Captioned),
        ) else {
            return Err(StageError::fatal(stage, "no input paths"));
        };
        // Adopted audio has no recorded duration.
        let duration_secs = match job.artifacts.audio_duration_secs {
            Some(d) if d > 0.0 => d,
            _ => {
                self.bounded(stage, self.services.probe.duration_secs(&audio))
                    .await?
            }
        };
        let out = staging(art, stage)?;
        let req = RenderRequest {
            audio: &audio,
            captions: &captions,
            background: &self.services.background,
            title: &story.title,
            duration_secs,
        };
        self.bounded(stage, self.services.renderer.render(&req, &out))
            .await?;
        if !check_usable(stage, &out).await {
            return Err(StageError::transient(stage, "renderer produced no video"));
        }
        Ok(Produced::default())
    }

    async fn publish(&self, story: &Story, art: &ArtifactDir) -> StageRun {
        let stage = Stage::Published;
        let Some(video) = art.final_path(Stage::Rendered) else {
            return StageRun::once(Err(StageError::fatal(stage, "no video path")));
        };
        let script = art.load_script().await;
        let req = PublishRequest::for_story(story, script.as_ref(), &video);
        let publisher = &self.services.publisher;
        let max = self.settings.publish_max_attempts;

        let mut attempts = 0u32;
        let mut last_error = String::new();
        while attempts < max {
            attempts += 1;
            let result =
                tokio::time::timeout(self.settings.stage_timeout, publisher.publish(&req)).await;
            match result {
                Ok(Ok(external_id)) => {
                    let receipt = PublishReceipt {
                        platform: publisher.platform().to_string(),
                        external_id: external_id.clone(),
                        published_at: Utc::now(),
                    };
                    let outcome = Self::stage_json(stage, art, &receipt)
                        .await
                        .map(|()| Produced {
                            audio_duration_secs: None,
                            external_id: Some(external_id),
                        });
                    return StageRun {
                        outcome,
                        publish_attempts: attempts,
                    };
                }
                Ok(Err(PublishError::Rejected(reason))) => {
                    return StageRun {
                        outcome: Err(StageError::fatal(stage, reason)),
                        publish_attempts: attempts,
                    };
                }
                Ok(Err(e @ PublishError::Transient(_))) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.settings.stage_timeout)
                }
            }
            tracing::warn!(
                target: "pipeline",
                story_id = %story.short_id(),
                attempt = attempts,
                max,
                error = %last_error,
                "publish attempt failed"
            );
            if attempts < max {
                let backoff = self
                    .settings
                    .publish_backoff
                    .checked_mul(1u32 << (attempts - 1).min(16))
                    .unwrap_or(self.settings.publish_backoff);
                tokio::time::sleep(backoff).await;
            }
        }
        StageRun {
            outcome: Err(StageError::transient(
                stage,
                format!("gave up after {attempts} attempts: {last_error}"),
            )),
            publish_attempts: attempts,
        }
    }
}

fn staging(art: &ArtifactDir, stage: Stage) -> Result<std::path::PathBuf, StageError> {
    art.staging_path(stage)
        .ok_or_else(|| StageError::fatal(stage, "no staging path"))
}
