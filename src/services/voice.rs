//! Narration synthesis backends and audio probing.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::run_command;

#[async_trait]
pub trait VoiceBackend: Send + Sync {
    fn name(&self) -> &'static str;
    /// Write narration for `text` to `out` (mp3).
    async fn synthesize(&self, text: &str, out: &Path) -> Result<()>;
}

/// Backends selectable by name from config.
#[derive(Default, Clone)]
pub struct VoiceRegistry {
    backends: BTreeMap<&'static str, Arc<dyn VoiceBackend>>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn VoiceBackend>) {
        self.backends.insert(backend.name(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn VoiceBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VoiceBackend>> {
        self.backends.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.keys().copied().collect()
    }
}

/// OpenAI `/audio/speech`.
pub struct OpenAiVoice {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
}

impl OpenAiVoice {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        voice: &str,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            voice: voice.to_string(),
        }
    }
}

#[async_trait]
impl VoiceBackend for OpenAiVoice {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn synthesize(&self, text: &str, out: &Path) -> Result<()> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;

        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            voice: &'a str,
            input: &'a str,
        }

        let bytes = self
            .http
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(api_key)
            .json(&Req {
                model: &self.model,
                voice: &self.voice,
                input: text,
            })
            .send()
            .await
            .context("openai speech request")?
            .error_for_status()
            .context("openai speech status")?
            .bytes()
            .await
            .context("openai speech body")?;
        if bytes.is_empty() {
            bail!("openai returned empty audio");
        }
        tokio::fs::write(out, &bytes)
            .await
            .with_context(|| format!("write {}", out.display()))?;
        Ok(())
    }
}

/// Local `edge-tts` command.
pub struct EdgeTtsVoice {
    bin: String,
    voice: String,
}

impl EdgeTtsVoice {
    pub fn new(bin: &str, voice: &str) -> Self {
        Self {
            bin: bin.to_string(),
            voice: voice.to_string(),
        }
    }

    pub fn args(&self, text: &str, out: &Path) -> Vec<String> {
        vec![
            "--voice".into(),
            self.voice.clone(),
            "--text".into(),
            text.to_string(),
            "--write-media".into(),
            out.display().to_string(),
        ]
    }
}

#[async_trait]
impl VoiceBackend for EdgeTtsVoice {
    fn name(&self) -> &'static str {
        "edge"
    }

    async fn synthesize(&self, text: &str, out: &Path) -> Result<()> {
        run_command(&self.bin, &self.args(text, out)).await?;
        Ok(())
    }
}

/// Duration of a media file in seconds.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn duration_secs(&self, path: &Path) -> Result<f64>;
}

pub struct FfprobeProbe {
    bin: String,
}

impl FfprobeProbe {
    pub fn new(bin: &str) -> Self {
        Self {
            bin: bin.to_string(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn duration_secs(&self, path: &Path) -> Result<f64> {
        let args = [
            "-v".to_string(),
            "quiet".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            path.display().to_string(),
        ];
        let stdout = run_command(&self.bin, &args).await?;
        parse_probe_duration(&stdout)
    }
}

/// Pull `format.duration` out of ffprobe's JSON output.
pub fn parse_probe_duration(json: &str) -> Result<f64> {
    #[derive(Deserialize)]
    struct Probe {
        format: Format,
    }
    #[derive(Deserialize)]
    struct Format {
        duration: Option<String>,
    }

    let probe: Probe = serde_json::from_str(json).context("ffprobe json")?;
    let raw = probe
        .format
        .duration
        .ok_or_else(|| anyhow!("ffprobe reported no duration"))?;
    let secs: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("ffprobe duration `{raw}`"))?;
    if !secs.is_finite() || secs <= 0.0 {
        bail!("ffprobe duration {secs} is not positive");
    }
    Ok(secs)
}
