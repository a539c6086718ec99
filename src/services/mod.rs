//! External collaborators used by the production pipeline.
//!
//! Each concern sits behind a trait so the pipeline can be driven by fakes
//! in tests. Network clients share one `reqwest::Client`; local tools are
//! spawned through [`run_command`].

pub mod captions;
pub mod publish;
pub mod render;
pub mod script;
pub mod timestamps;
pub mod voice;

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::config::{AppConfig, Secrets};
use publish::{Publisher, YouTubeCredentials, YouTubePublisher};
use render::{Background, FfmpegRenderer, Renderer};
use script::{OpenAiScriptGenerator, ScriptGenerator};
use timestamps::{TimestampExtractor, WhisperCommand};
use voice::{EdgeTtsVoice, FfprobeProbe, MediaProbe, OpenAiVoice, VoiceRegistry};

const STDERR_TAIL_CHARS: usize = 400;

/// Everything the stage executor calls out to.
#[derive(Clone)]
pub struct Services {
    pub script: Arc<dyn ScriptGenerator>,
    pub voices: Arc<VoiceRegistry>,
    pub probe: Arc<dyn MediaProbe>,
    pub timestamps: Arc<dyn TimestampExtractor>,
    pub renderer: Arc<dyn Renderer>,
    pub publisher: Arc<dyn Publisher>,
    pub background: Background,
}

impl Services {
    pub fn from_config(cfg: &AppConfig, secrets: &Secrets, http: reqwest::Client) -> Result<Self> {
        let svc = &cfg.services;
        let voices = VoiceRegistry::new()
            .with(Arc::new(EdgeTtsVoice::new(&svc.edge_tts_bin, &svc.edge_voice)))
            .with(Arc::new(OpenAiVoice::new(
                http.clone(),
                &svc.openai_base_url,
                secrets.openai_api_key.clone(),
                &svc.tts_model,
                &svc.tts_voice,
            )));

        let publisher: Arc<dyn Publisher> = match cfg.pipeline.publish_platform.trim() {
            "youtube" => Arc::new(YouTubePublisher::new(
                http.clone(),
                YouTubeCredentials {
                    client_id: secrets.youtube_client_id.clone(),
                    client_secret: secrets.youtube_client_secret.clone(),
                    refresh_token: secrets.youtube_refresh_token.clone(),
                },
                &svc.youtube_category_id,
                &svc.youtube_privacy,
            )),
            other => bail!("unknown publish platform `{other}`"),
        };

        let background = match &cfg.pipeline.background_image {
            Some(path) => Background::Image(path.clone()),
            None => Background::Solid(cfg.pipeline.background_color.clone()),
        };

        Ok(Self {
            script: Arc::new(OpenAiScriptGenerator::new(
                http,
                &svc.openai_base_url,
                secrets.openai_api_key.clone(),
                &svc.script_model,
            )),
            voices: Arc::new(voices),
            probe: Arc::new(FfprobeProbe::new(&svc.ffprobe_bin)),
            timestamps: Arc::new(WhisperCommand::new(&svc.whisper_bin, &svc.whisper_model)),
            renderer: Arc::new(FfmpegRenderer::new(&svc.ffmpeg_bin, &svc.watermark)),
            publisher,
            background,
        })
    }
}

/// Run a local tool to completion. Non-zero exit is an error carrying the
/// tail of stderr; stdout is returned on success.
pub async fn run_command(bin: &str, args: &[String]) -> Result<String> {
    let output = tokio::process::Command::new(bin)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("spawn `{bin}`"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(0);
        bail!("`{bin}` exited with {}: {}", output.status, &stderr[start..]);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
