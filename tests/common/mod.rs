// tests/common/mod.rs
//
// Call-counting fakes for every pipeline collaborator, plus a harness that
// wires them into a Pipeline over an in-memory store and a temp output dir.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use story_reel::ingest::scoring;
use story_reel::model::{RawStory, Script, ScriptSection, SourceKind, Story, WordTiming};
use story_reel::pipeline::{ExecutorSettings, Pipeline, StageExecutor};
use story_reel::services::publish::{PublishError, PublishRequest, Publisher};
use story_reel::services::render::{Background, RenderRequest, Renderer};
use story_reel::services::script::ScriptGenerator;
use story_reel::services::timestamps::TimestampExtractor;
use story_reel::services::voice::{MediaProbe, VoiceBackend, VoiceRegistry};
use story_reel::services::Services;
use story_reel::source_weights::SourceWeights;
use story_reel::store::StoryStore;

#[derive(Default)]
pub struct Calls {
    pub script: AtomicUsize,
    pub voice: AtomicUsize,
    pub probe: AtomicUsize,
    pub timestamps: AtomicUsize,
    pub render: AtomicUsize,
    pub publish: AtomicUsize,
}

impl Calls {
    /// (script, voice, timestamps, render, publish)
    pub fn snapshot(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.script.load(Ordering::SeqCst),
            self.voice.load(Ordering::SeqCst),
            self.timestamps.load(Ordering::SeqCst),
            self.render.load(Ordering::SeqCst),
            self.publish.load(Ordering::SeqCst),
        )
    }
}

pub struct FakeScript(pub Arc<Calls>);

#[async_trait]
impl ScriptGenerator for FakeScript {
    async fn generate(&self, story: &Story) -> Result<Script> {
        self.0.script.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to interleave.
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Script::assemble(
            story.id.clone(),
            "Stop scrolling.",
            vec![ScriptSection {
                text: format!("{} just happened.", story.title),
                screen_text: "NEWS".into(),
                duration_hint: 6.0,
            }],
            "Follow for more.",
        ))
    }
}

pub struct FakeVoice {
    pub calls: Arc<Calls>,
    /// Write a zero-byte file instead of audio.
    pub silent: AtomicBool,
}

#[async_trait]
impl VoiceBackend for FakeVoice {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn synthesize(&self, _text: &str, out: &Path) -> Result<()> {
        self.calls.voice.fetch_add(1, Ordering::SeqCst);
        let bytes: &[u8] = if self.silent.load(Ordering::SeqCst) {
            b""
        } else {
            b"ID3fake-mp3"
        };
        tokio::fs::write(out, bytes).await?;
        Ok(())
    }
}

pub struct FakeProbe(pub Arc<Calls>);

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn duration_secs(&self, _path: &Path) -> Result<f64> {
        self.0.probe.fetch_add(1, Ordering::SeqCst);
        Ok(12.5)
    }
}

pub struct FakeTimestamps {
    pub calls: Arc<Calls>,
    /// Return an inverted word timing.
    pub corrupt: AtomicBool,
}

#[async_trait]
impl TimestampExtractor for FakeTimestamps {
    async fn extract(&self, _audio: &Path) -> Result<Vec<WordTiming>> {
        self.calls.timestamps.fetch_add(1, Ordering::SeqCst);
        let mut words: Vec<WordTiming> = ["stop", "scrolling", "news", "just", "happened", "follow"]
            .iter()
            .enumerate()
            .map(|(i, w)| WordTiming {
                word: (*w).to_string(),
                start: i as f64 * 0.5,
                end: i as f64 * 0.5 + 0.4,
            })
            .collect();
        if self.corrupt.load(Ordering::SeqCst) {
            words[2].end = 0.1;
        }
        Ok(words)
    }
}

pub struct FakeRenderer {
    pub calls: Arc<Calls>,
    pub broken: AtomicBool,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, req: &RenderRequest<'_>, out: &Path) -> Result<()> {
        self.calls.render.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(anyhow!("ffmpeg exited with status 1"));
        }
        assert!(req.audio.exists() && req.captions.exists());
        tokio::fs::write(out, b"fake-mp4").await?;
        Ok(())
    }
}

pub enum PublishStep {
    Ok(&'static str),
    Transient,
    Rejected,
}

pub struct FakePublisher {
    pub calls: Arc<Calls>,
    /// Consumed front to back; empty means success with id "yt-default".
    pub script: Mutex<VecDeque<PublishStep>>,
}

#[async_trait]
impl Publisher for FakePublisher {
    fn platform(&self) -> &'static str {
        "fake"
    }

    async fn publish(&self, req: &PublishRequest) -> Result<String, PublishError> {
        self.calls.publish.fetch_add(1, Ordering::SeqCst);
        assert!(req.title.ends_with("#Shorts"));
        match self.script.lock().pop_front() {
            None => Ok("yt-default".into()),
            Some(PublishStep::Ok(id)) => Ok(id.into()),
            Some(PublishStep::Transient) => Err(PublishError::Transient(anyhow!("503 backend"))),
            Some(PublishStep::Rejected) => Err(PublishError::Rejected("policy violation".into())),
        }
    }
}

pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub store: Arc<StoryStore>,
    pub pipeline: Arc<Pipeline>,
    pub calls: Arc<Calls>,
    pub voice: Arc<FakeVoice>,
    pub timestamps: Arc<FakeTimestamps>,
    pub renderer: Arc<FakeRenderer>,
    pub publisher: Arc<FakePublisher>,
    pub services: Services,
}

pub fn settings() -> ExecutorSettings {
    ExecutorSettings {
        stage_timeout: Duration::from_secs(5),
        publish_max_attempts: 3,
        publish_backoff: Duration::from_millis(1),
        voice_backend: "fake".into(),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings(), 2)
    }

    pub fn with_settings(settings: ExecutorSettings, workers: usize) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(StoryStore::open_in_memory().unwrap());
        let calls = Arc::new(Calls::default());
        let voice = Arc::new(FakeVoice {
            calls: calls.clone(),
            silent: AtomicBool::new(false),
        });
        let timestamps = Arc::new(FakeTimestamps {
            calls: calls.clone(),
            corrupt: AtomicBool::new(false),
        });
        let renderer = Arc::new(FakeRenderer {
            calls: calls.clone(),
            broken: AtomicBool::new(false),
        });
        let publisher = Arc::new(FakePublisher {
            calls: calls.clone(),
            script: Mutex::new(VecDeque::new()),
        });

        let services = Services {
            script: Arc::new(FakeScript(calls.clone())),
            voices: Arc::new(VoiceRegistry::new().with(voice.clone())),
            probe: Arc::new(FakeProbe(calls.clone())),
            timestamps: timestamps.clone(),
            renderer: renderer.clone(),
            publisher: publisher.clone(),
            background: Background::Solid("black".into()),
        };
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            StageExecutor::new(services.clone(), settings),
            tmp.path().join("output"),
            workers,
        ));
        Self {
            tmp,
            store,
            pipeline,
            calls,
            voice,
            timestamps,
            renderer,
            publisher,
            services,
        }
    }

    /// Insert a scored story and return its id.
    pub fn add_story(&self, title: &str, url: &str) -> String {
        let story = sample_story(title, url);
        let id = story.id.clone();
        self.store.upsert_stories(&[story]).unwrap();
        id
    }

    pub fn output_dir(&self) -> std::path::PathBuf {
        self.tmp.path().join("output")
    }
}

pub fn sample_story(title: &str, url: &str) -> Story {
    let now = Utc::now();
    scoring::score(
        RawStory {
            source: SourceKind::HackerNews,
            title: title.into(),
            url: url.into(),
            raw_score: Some(250.0),
            created_at: now - ChronoDuration::hours(1),
            context: vec![],
        },
        &SourceWeights::default(),
        now,
    )
}
