//! Word-level timestamps from narration audio.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

use super::run_command;
use crate::model::WordTiming;

#[async_trait]
pub trait TimestampExtractor: Send + Sync {
    async fn extract(&self, audio: &Path) -> Result<Vec<WordTiming>>;
}

/// Local `whisper` CLI with word timestamps enabled.
pub struct WhisperCommand {
    bin: String,
    model: String,
}

impl WhisperCommand {
    pub fn new(bin: &str, model: &str) -> Self {
        Self {
            bin: bin.to_string(),
            model: model.to_string(),
        }
    }

    pub fn args(&self, audio: &Path, out_dir: &Path) -> Vec<String> {
        vec![
            audio.display().to_string(),
            "--model".into(),
            self.model.clone(),
            "--word_timestamps".into(),
            "True".into(),
            "--output_format".into(),
            "json".into(),
            "--output_dir".into(),
            out_dir.display().to_string(),
        ]
    }
}

impl WhisperCommand {
    async fn transcribe(&self, audio: &Path, out_dir: &Path) -> Result<Vec<WordTiming>> {
        run_command(&self.bin, &self.args(audio, out_dir)).await?;
        let stem = audio
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("audio path has no file stem"))?;
        let json_path = out_dir.join(format!("{stem}.json"));
        let raw = tokio::fs::read_to_string(&json_path)
            .await
            .with_context(|| format!("read {}", json_path.display()))?;
        parse_whisper_json(&raw)
    }
}

#[async_trait]
impl TimestampExtractor for WhisperCommand {
    async fn extract(&self, audio: &Path) -> Result<Vec<WordTiming>> {
        let out_dir = audio
            .parent()
            .ok_or_else(|| anyhow!("audio path has no parent"))?
            .join("whisper.partial");
        tokio::fs::create_dir_all(&out_dir).await?;
        let words = self.transcribe(audio, &out_dir).await;
        // Scratch output goes whether or not whisper succeeded.
        if let Err(e) = tokio::fs::remove_dir_all(&out_dir).await {
            tracing::debug!(target: "pipeline", dir = %out_dir.display(), error = %e, "whisper scratch cleanup");
        }
        words
    }
}

/// Flatten `segments[].words[]` from whisper's JSON output.
pub fn parse_whisper_json(raw: &str) -> Result<Vec<WordTiming>> {
    #[derive(Deserialize)]
    struct Output {
        #[serde(default)]
        segments: Vec<Segment>,
    }
    #[derive(Deserialize)]
    struct Segment {
        #[serde(default)]
        words: Vec<Word>,
    }
    #[derive(Deserialize)]
    struct Word {
        word: String,
        start: f64,
        end: f64,
    }

    let out: Output = serde_json::from_str(raw).context("whisper json")?;
    let words: Vec<WordTiming> = out
        .segments
        .into_iter()
        .flat_map(|s| s.words)
        .filter_map(|w| {
            let word = w.word.trim().to_string();
            (!word.is_empty()).then_some(WordTiming {
                word,
                start: w.start,
                end: w.end,
            })
        })
        .collect();
    if words.is_empty() {
        bail!("whisper produced no words");
    }
    Ok(words)
}
