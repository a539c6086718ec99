//! Application configuration.
//!
//! Everything tunable lives in one TOML document (`config/app.toml` by
//! default). Every field has a serde default, so a missing file or a partial
//! file still yields a working configuration. Credentials never live here;
//! see [`Secrets`].

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::source_weights::SourceWeights;

const ENV_PATH: &str = "STORY_REEL_CONFIG";
const DEFAULT_PATH: &str = "config/app.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub scoring: SourceWeights,
    pub sources: SourcesConfig,
    pub pipeline: PipelineConfig,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    /// Root of the per-story artifact directories.
    pub output_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/story_reel.db"),
            output_dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Per-provider fetch budget.
    pub adapter_timeout_secs: u64,
    /// Periodic ingest interval; 0 disables the scheduler.
    pub interval_secs: u64,
    /// Cap on records kept from each provider per run (feed order).
    pub top_n: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: 30,
            interval_secs: 0,
            top_n: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub hackernews: HackerNewsConfig,
    pub reddit: RedditConfig,
    pub techcrunch: TechCrunchConfig,
    pub x: NitterConfig,
    pub fourchan: FourChanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HackerNewsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub top_n: usize,
    /// Top-level comments attached as context.
    pub comments: usize,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://hacker-news.firebaseio.com/v0".into(),
            top_n: 30,
            comments: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub enabled: bool,
    pub subreddits: Vec<String>,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subreddits: ["technology", "programming", "machinelearning", "artificial", "LocalLLaMA"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechCrunchConfig {
    pub enabled: bool,
    pub feed_url: String,
}

impl Default for TechCrunchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feed_url: "https://techcrunch.com/feed/".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NitterConfig {
    pub enabled: bool,
    pub instance: String,
    pub keywords: Vec<String>,
}

impl Default for NitterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance: "https://nitter.net".into(),
            keywords: [
                "AI breakthrough",
                "new programming language",
                "open source release",
                "tech layoffs",
                "GPU",
                "LLM",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FourChanConfig {
    pub enabled: bool,
    pub board: String,
    pub keywords: Vec<String>,
    pub top_n: usize,
    pub replies: usize,
}

impl Default for FourChanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            board: "g".into(),
            keywords: [
                "ai",
                "llm",
                "gpu",
                "linux",
                "rust",
                "python",
                "open source",
                "self-hosted",
                "homelab",
                "programming",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            top_n: 20,
            replies: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stories advanced concurrently by `run_top`.
    pub workers: usize,
    /// Budget for one external call.
    pub stage_timeout_secs: u64,
    pub publish_max_attempts: u32,
    pub publish_backoff_ms: u64,
    /// Registry name of the voice backend ("edge" | "openai").
    pub voice_backend: String,
    pub publish_platform: String,
    /// Background image; a solid colour is used when unset.
    pub background_image: Option<PathBuf>,
    pub background_color: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            stage_timeout_secs: 600,
            publish_max_attempts: 3,
            publish_backoff_ms: 500,
            voice_backend: "edge".into(),
            publish_platform: "youtube".into(),
            background_image: None,
            background_color: "0x0a0a28".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub openai_base_url: String,
    pub script_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub edge_tts_bin: String,
    pub edge_voice: String,
    pub whisper_bin: String,
    pub whisper_model: String,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub watermark: String,
    pub youtube_category_id: String,
    pub youtube_privacy: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".into(),
            script_model: "gpt-4o-mini".into(),
            tts_model: "tts-1".into(),
            tts_voice: "onyx".into(),
            edge_tts_bin: "edge-tts".into(),
            edge_voice: "en-US-GuyNeural".into(),
            whisper_bin: "whisper".into(),
            whisper_model: "base".into(),
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
            watermark: "story-reel".into(),
            youtube_category_id: "28".into(),
            youtube_privacy: "public".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parse a TOML document and sanitize it.
    pub fn parse(content: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(content)?;
        Ok(cfg.sanitized())
    }

    /// Load configuration using env var + fallbacks:
    /// 1) $STORY_REEL_CONFIG
    /// 2) config/app.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
        }
        let default_p = PathBuf::from(DEFAULT_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        Ok(Self::default())
    }

    fn sanitized(mut self) -> Self {
        self.scoring = self.scoring.sanitized();

        let defaults = PipelineConfig::default();
        if self.pipeline.workers == 0 {
            self.pipeline.workers = defaults.workers;
        }
        if self.pipeline.stage_timeout_secs == 0 {
            self.pipeline.stage_timeout_secs = defaults.stage_timeout_secs;
        }
        if self.pipeline.publish_max_attempts == 0 {
            self.pipeline.publish_max_attempts = defaults.publish_max_attempts;
        }
        self.pipeline.voice_backend = self.pipeline.voice_backend.trim().to_ascii_lowercase();
        self.pipeline.publish_platform = self.pipeline.publish_platform.trim().to_ascii_lowercase();

        if self.ingest.adapter_timeout_secs == 0 {
            self.ingest.adapter_timeout_secs = IngestConfig::default().adapter_timeout_secs;
        }
        self
    }
}

/// Credentials, read from the environment only.
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub youtube_client_id: Option<String>,
    pub youtube_client_secret: Option<String>,
    pub youtube_refresh_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        f.debug_struct("Secrets")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("youtube_client_id", &mask(&self.youtube_client_id))
            .field("youtube_client_secret", &mask(&self.youtube_client_secret))
            .field("youtube_refresh_token", &mask(&self.youtube_refresh_token))
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            openai_api_key: var("OPENAI_API_KEY"),
            youtube_client_id: var("YOUTUBE_CLIENT_ID"),
            youtube_client_secret: var("YOUTUBE_CLIENT_SECRET"),
            youtube_refresh_token: var("YOUTUBE_REFRESH_TOKEN"),
        }
    }
}
