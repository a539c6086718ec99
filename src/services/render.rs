//! Final video assembly through ffmpeg.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::run_command;

#[derive(Debug, Clone, PartialEq)]
pub enum Background {
    /// Still image looped for the whole clip.
    Image(PathBuf),
    /// ffmpeg colour spec, e.g. `0x0a0a28`.
    Solid(String),
}

#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub audio: &'a Path,
    pub captions: &'a Path,
    pub background: &'a Background,
    pub title: &'a str,
    pub duration_secs: f64,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, req: &RenderRequest<'_>, out: &Path) -> Result<()>;
}

pub struct FfmpegRenderer {
    bin: String,
    watermark: String,
}

impl FfmpegRenderer {
    pub fn new(bin: &str, watermark: &str) -> Self {
        Self {
            bin: bin.to_string(),
            watermark: watermark.to_string(),
        }
    }
}

fn escape_filter_path(p: &Path) -> String {
    p.display()
        .to_string()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn escape_drawtext(s: &str) -> String {
    s.replace('\\', "")
        .replace('\'', "\u{2019}")
        .replace(':', "\\:")
        .replace('%', "\\%")
}

/// Filter chain: burned captions, optional title card for the first two
/// seconds, watermark bottom right.
pub fn filtergraph(req: &RenderRequest<'_>, watermark: &str) -> String {
    let mut filters = vec![format!("ass='{}'", escape_filter_path(req.captions))];
    let title = req.title.trim();
    if !title.is_empty() {
        filters.push(format!(
            "drawtext=text='{}':fontsize=56:fontcolor=white:borderw=3:bordercolor=black:\
             x=(w-text_w)/2:y=(h/4)-text_h/2:enable='between(t,0,2)'",
            escape_drawtext(title)
        ));
    }
    if !watermark.trim().is_empty() {
        filters.push(format!(
            "drawtext=text='{}':fontsize=28:fontcolor=white@0.5:borderw=1:\
             bordercolor=black@0.3:x=w-text_w-30:y=h-text_h-30",
            escape_drawtext(watermark.trim())
        ));
    }
    filters.join(",")
}

pub fn ffmpeg_args(req: &RenderRequest<'_>, watermark: &str, out: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];
    match req.background {
        Background::Image(path) => {
            args.extend(["-loop", "1", "-i"].map(String::from));
            args.push(path.display().to_string());
        }
        Background::Solid(color) => {
            args.extend(["-f", "lavfi", "-i"].map(String::from));
            args.push(format!("color=c={color}:s=1080x1920:r=30"));
        }
    }
    args.push("-i".into());
    args.push(req.audio.display().to_string());
    args.push("-vf".into());
    args.push(filtergraph(req, watermark));
    for a in [
        "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-r", "30", "-s", "1080x1920",
        "-pix_fmt", "yuv420p", "-c:a", "aac", "-b:a", "192k", "-t",
    ] {
        args.push(a.to_string());
    }
    args.push(format!("{:.3}", req.duration_secs.max(0.0)));
    args.push("-shortest".into());
    args.push(out.display().to_string());
    args
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(&self, req: &RenderRequest<'_>, out: &Path) -> Result<()> {
        let args = ffmpeg_args(req, &self.watermark, out);
        tracing::debug!(target: "pipeline", out = %out.display(), "ffmpeg render");
        run_command(&self.bin, &args).await?;
        Ok(())
    }
}
