//! On-disk layout of per-story artifacts and their verification.
//!
//! Every artifact is first written to a staging path next to its final
//! name, verified, then renamed into place. A file at a final path is only
//! trusted after [`ArtifactDir::is_usable`] says so.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::identity::short_id;
use crate::model::{Script, WordTiming};
use crate::pipeline::Stage;
use crate::services::captions::{validate_timings, ASS_HEADER};

/// Record of a successful upload, stored as the PUBLISHED artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub platform: String,
    pub external_id: String,
    pub published_at: DateTime<Utc>,
}

fn file_parts(stage: Stage) -> Option<(&'static str, &'static str)> {
    match stage {
        Stage::Scripted => Some(("script", "json")),
        Stage::Voiced => Some(("narration", "mp3")),
        Stage::Timestamped => Some(("timestamps", "json")),
        Stage::Captioned => Some(("captions", "ass")),
        Stage::Rendered => Some(("output", "mp4")),
        Stage::Published => Some(("publish", "json")),
        Stage::Ingested | Stage::Failed => None,
    }
}

/// `<output_dir>/<short_id>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDir {
    dir: PathBuf,
}

impl ArtifactDir {
    pub fn new(output_dir: &Path, story_id: &str) -> Self {
        Self {
            dir: output_dir.join(short_id(story_id)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn final_path(&self, stage: Stage) -> Option<PathBuf> {
        file_parts(stage).map(|(stem, ext)| self.dir.join(format!("{stem}.{ext}")))
    }

    /// `narration.partial.mp3`: keeps the extension so tools that sniff
    /// it (ffmpeg, edge-tts) still pick the right format.
    pub fn staging_path(&self, stage: Stage) -> Option<PathBuf> {
        file_parts(stage).map(|(stem, ext)| self.dir.join(format!("{stem}.partial.{ext}")))
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Rename the staged artifact into place.
    pub async fn promote(&self, stage: Stage) -> io::Result<PathBuf> {
        let (Some(staging), Some(dest)) = (self.staging_path(stage), self.final_path(stage)) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{stage} has no artifact"),
            ));
        };
        tokio::fs::rename(&staging, &dest).await?;
        Ok(dest)
    }

    /// Delete the final and staged files of `stage` and every later stage.
    pub async fn remove_from(&self, stage: Stage) -> io::Result<()> {
        self.remove_range(stage, Stage::Published).await
    }

    /// Delete the final and staged files of the stages `from..=to`.
    pub async fn remove_range(&self, from: Stage, to: Stage) -> io::Result<()> {
        for s in Stage::PRODUCING
            .iter()
            .filter(|s| s.reached(from) && to.reached(**s))
        {
            for path in [self.final_path(*s), self.staging_path(*s)].into_iter().flatten() {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Write `bytes` to the staging path of `stage`.
    pub async fn stage_bytes(&self, stage: Stage, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.staging_path(stage).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("{stage} has no artifact"))
        })?;
        self.ensure_dir().await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn stage_json<T: Serialize>(&self, stage: Stage, value: &T) -> io::Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
        self.stage_bytes(stage, &bytes).await
    }

    /// Does the final artifact of `stage` exist and hold something the next
    /// stage can consume?
    pub async fn is_usable(&self, stage: Stage) -> bool {
        match self.final_path(stage) {
            Some(path) => check_usable(stage, &path).await,
            None => false,
        }
    }

    pub async fn load_script(&self) -> Option<Script> {
        let path = self.final_path(Stage::Scripted)?;
        load_json::<Script>(&path).await.filter(Script::is_usable)
    }

    pub async fn load_timestamps(&self) -> Option<Vec<WordTiming>> {
        let path = self.final_path(Stage::Timestamped)?;
        load_json::<Vec<WordTiming>>(&path).await
    }

    pub async fn load_receipt(&self) -> Option<PublishReceipt> {
        let path = self.final_path(Stage::Published)?;
        load_json::<PublishReceipt>(&path)
            .await
            .filter(|r| !r.external_id.trim().is_empty())
    }
}

async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn non_empty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Verify a file as the artifact of `stage`. Works on staging paths too.
pub async fn check_usable(stage: Stage, path: &Path) -> bool {
    match stage {
        Stage::Scripted => load_json::<Script>(path)
            .await
            .is_some_and(|s| s.is_usable()),
        Stage::Voiced | Stage::Rendered => non_empty(path).await,
        Stage::Timestamped => load_json::<Vec<WordTiming>>(path)
            .await
            .is_some_and(|w| validate_timings(&w).is_ok()),
        Stage::Captioned => tokio::fs::read_to_string(path)
            .await
            .is_ok_and(|s| s.starts_with(ASS_HEADER) && s.len() > ASS_HEADER.len()),
        Stage::Published => load_json::<PublishReceipt>(path)
            .await
            .is_some_and(|r| !r.external_id.trim().is_empty()),
        Stage::Ingested | Stage::Failed => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptSection;

    fn dir(tmp: &tempfile::TempDir) -> ArtifactDir {
        ArtifactDir::new(tmp.path(), &"0123456789abcdef".repeat(4))
    }

    #[test]
    fn paths_use_short_id() {
        let a = ArtifactDir::new(Path::new("/out"), &"ab".repeat(32));
        assert_eq!(a.dir(), Path::new("/out/abababababab"));
        assert_eq!(
            a.final_path(Stage::Voiced),
            Some(PathBuf::from("/out/abababababab/narration.mp3"))
        );
        assert_eq!(
            a.staging_path(Stage::Rendered),
            Some(PathBuf::from("/out/abababababab/output.partial.mp4"))
        );
        assert_eq!(a.final_path(Stage::Ingested), None);
    }

    #[tokio::test]
    async fn zero_length_audio_is_not_usable() {
        let tmp = tempfile::tempdir().unwrap();
        let a = dir(&tmp);
        a.stage_bytes(Stage::Voiced, b"").await.unwrap();
        a.promote(Stage::Voiced).await.unwrap();
        assert!(!a.is_usable(Stage::Voiced).await);

        a.stage_bytes(Stage::Voiced, b"ID3").await.unwrap();
        a.promote(Stage::Voiced).await.unwrap();
        assert!(a.is_usable(Stage::Voiced).await);
    }

    #[tokio::test]
    async fn script_and_receipt_are_parsed() {
        let tmp = tempfile::tempdir().unwrap();
        let a = dir(&tmp);
        a.stage_bytes(Stage::Scripted, b"{not json").await.unwrap();
        a.promote(Stage::Scripted).await.unwrap();
        assert!(!a.is_usable(Stage::Scripted).await);

        let script = Script::assemble(
            "id",
            "hook",
            vec![ScriptSection {
                text: "body".into(),
                screen_text: String::new(),
                duration_hint: 5.0,
            }],
            "cta",
        );
        a.stage_json(Stage::Scripted, &script).await.unwrap();
        a.promote(Stage::Scripted).await.unwrap();
        assert!(a.is_usable(Stage::Scripted).await);
        assert_eq!(a.load_script().await, Some(script));

        let receipt = PublishReceipt {
            platform: "youtube".into(),
            external_id: " ".into(),
            published_at: Utc::now(),
        };
        a.stage_json(Stage::Published, &receipt).await.unwrap();
        a.promote(Stage::Published).await.unwrap();
        assert!(!a.is_usable(Stage::Published).await);
    }

    #[tokio::test]
    async fn captions_need_header_and_events() {
        let tmp = tempfile::tempdir().unwrap();
        let a = dir(&tmp);
        a.stage_bytes(Stage::Captioned, ASS_HEADER.as_bytes()).await.unwrap();
        a.promote(Stage::Captioned).await.unwrap();
        assert!(!a.is_usable(Stage::Captioned).await);
    }

    #[tokio::test]
    async fn remove_from_keeps_earlier_stages() {
        let tmp = tempfile::tempdir().unwrap();
        let a = dir(&tmp);
        for s in [Stage::Voiced, Stage::Rendered] {
            a.stage_bytes(s, b"x").await.unwrap();
            a.promote(s).await.unwrap();
        }
        a.stage_bytes(Stage::Published, b"{}").await.unwrap();
        a.remove_from(Stage::Captioned).await.unwrap();
        assert!(a.is_usable(Stage::Voiced).await);
        assert!(!a.is_usable(Stage::Rendered).await);
        assert!(!a.staging_path(Stage::Published).unwrap().exists());
    }

    #[tokio::test]
    async fn remove_range_leaves_the_receipt() {
        let tmp = tempfile::tempdir().unwrap();
        let a = dir(&tmp);
        a.stage_bytes(Stage::Rendered, b"x").await.unwrap();
        a.promote(Stage::Rendered).await.unwrap();
        let receipt = PublishReceipt {
            platform: "youtube".into(),
            external_id: "abc".into(),
            published_at: Utc::now(),
        };
        a.stage_json(Stage::Published, &receipt).await.unwrap();
        a.promote(Stage::Published).await.unwrap();

        a.remove_range(Stage::Voiced, Stage::Rendered).await.unwrap();
        assert!(!a.is_usable(Stage::Rendered).await);
        assert_eq!(a.load_receipt().await, Some(receipt));
    }
}
