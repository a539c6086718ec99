//! ASS subtitles with karaoke fill, sized for vertical 1080x1920 video.

use std::fmt::Write as _;
use thiserror::Error;

use crate::model::WordTiming;

pub const ASS_HEADER: &str = "[Script Info]
Title: story-reel captions
ScriptType: v4.00+
PlayResX: 1080
PlayResY: 1920
WrapStyle: 0
ScaledBorderAndShadow: yes

[V4+ Styles]
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding
Style: Default,Arial Black,48,&H00FFFFFF,&H0000FFFF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,3,1,2,40,40,200,1

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
";

pub const WORDS_PER_LINE: usize = 5;
/// BGR: yellow.
const HIGHLIGHT: &str = "00FFFF";

#[derive(Debug, Error, PartialEq)]
pub enum CaptionError {
    #[error("no word timings")]
    Empty,
    #[error("word {index} (`{word}`) has invalid timing {start}..{end}")]
    InvalidTiming {
        index: usize,
        word: String,
        start: f64,
        end: f64,
    },
}

/// Non-empty, finite, non-negative, `start <= end`.
pub fn validate_timings(words: &[WordTiming]) -> Result<(), CaptionError> {
    if words.is_empty() {
        return Err(CaptionError::Empty);
    }
    for (index, w) in words.iter().enumerate() {
        let bad = !w.start.is_finite() || !w.end.is_finite() || w.start < 0.0 || w.end < w.start;
        if bad {
            return Err(CaptionError::InvalidTiming {
                index,
                word: w.word.clone(),
                start: w.start,
                end: w.end,
            });
        }
    }
    Ok(())
}

/// `H:MM:SS.cc`
pub fn format_ass_time(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let cs = total_cs % 100;
    let total_secs = total_cs / 100;
    format!(
        "{}:{:02}:{:02}.{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        cs
    )
}

/// Build the whole subtitle document. Timing problems are rejected up
/// front; nothing partial is produced.
pub fn build_ass(words: &[WordTiming]) -> Result<String, CaptionError> {
    validate_timings(words)?;

    let mut out = String::from(ASS_HEADER);
    for line in words.chunks(WORDS_PER_LINE) {
        let (Some(first), Some(last)) = (line.first(), line.last()) else {
            continue;
        };
        let karaoke = line
            .iter()
            .map(|w| {
                let cs = ((w.end - w.start) * 100.0).round().max(1.0) as u64;
                format!("{{\\kf{cs}}}{}", w.word.trim())
            })
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            out,
            "Dialogue: 0,{},{},Default,,0,0,0,,{{\\1c&H{HIGHLIGHT}&}}{karaoke}",
            format_ass_time(first.start),
            format_ass_time(last.end.max(first.start)),
        );
    }
    Ok(out)
}
