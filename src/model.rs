//! Core data types shared by ingestion, the store and the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::Stage;

/// Origin of a story. New sources get a new variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "hackernews")]
    HackerNews,
    #[serde(rename = "reddit")]
    Reddit,
    #[serde(rename = "techcrunch")]
    TechCrunch,
    #[serde(rename = "x")]
    X,
    #[serde(rename = "4chan")]
    FourChan,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::HackerNews,
        SourceKind::Reddit,
        SourceKind::TechCrunch,
        SourceKind::X,
        SourceKind::FourChan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::HackerNews => "hackernews",
            SourceKind::Reddit => "reddit",
            SourceKind::TechCrunch => "techcrunch",
            SourceKind::X => "x",
            SourceKind::FourChan => "4chan",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown source: {s}"))
    }
}

/// One discussion comment attached to a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub text: String,
}

impl Comment {
    pub fn new(author: Option<String>, text: impl Into<String>) -> Self {
        Self {
            author,
            text: text.into(),
        }
    }
}

/// Auxiliary discussion material, shaped per source. Consumers match on the
/// variant instead of probing keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextEntry {
    Comments {
        source: SourceKind,
        entries: Vec<Comment>,
    },
    TweetText {
        text: String,
    },
    Summary {
        text: String,
    },
    Thread {
        subject: String,
        excerpt: String,
        replies: Vec<String>,
    },
}

/// Union `incoming` into `into`. Comments from the same source are merged at
/// comment granularity; every other entry is added unless an equal one exists.
/// Nothing already in `into` is removed, and merging the same input twice is
/// a no-op.
pub fn merge_context(into: &mut Vec<ContextEntry>, incoming: &[ContextEntry]) {
    for entry in incoming {
        match entry {
            ContextEntry::Comments { source, entries } => {
                let existing = into.iter_mut().find_map(|e| match e {
                    ContextEntry::Comments {
                        source: s,
                        entries: have,
                    } if s == source => Some(have),
                    _ => None,
                });
                match existing {
                    Some(have) => {
                        for c in entries {
                            if !have.contains(c) {
                                have.push(c.clone());
                            }
                        }
                    }
                    None => into.push(entry.clone()),
                }
            }
            other => {
                if !into.contains(other) {
                    into.push(other.clone());
                }
            }
        }
    }
}

/// Total number of comments/replies carried in a context list.
pub fn comment_count(context: &[ContextEntry]) -> usize {
    context
        .iter()
        .map(|e| match e {
            ContextEntry::Comments { entries, .. } => entries.len(),
            ContextEntry::Thread { replies, .. } => replies.len(),
            _ => 0,
        })
        .sum()
}

/// A story as produced by a source adapter, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStory {
    pub source: SourceKind,
    pub title: String,
    pub url: String,
    /// Source-native popularity; `None` when the source has no such signal.
    pub raw_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub context: Vec<ContextEntry>,
}

/// A scored, identified story. Persisted in the story store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub source: SourceKind,
    pub title: String,
    pub url: String,
    pub raw_score: Option<f64>,
    pub normalized_score: f64,
    pub weighted_score: f64,
    pub created_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub context: Vec<ContextEntry>,
    pub stage: Stage,
}

impl Story {
    pub fn short_id(&self) -> &str {
        crate::identity::short_id(&self.id)
    }

    /// Title and url are the minimum a script can be written from.
    pub fn has_required_fields(&self) -> bool {
        !self.title.trim().is_empty() && !self.url.trim().is_empty()
    }
}

/// One narration section of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSection {
    pub text: String,
    pub screen_text: String,
    pub duration_hint: f64,
}

/// Narration script for one story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub story_id: String,
    pub hook: String,
    pub sections: Vec<ScriptSection>,
    pub cta: String,
    pub full_text: String,
}

impl Script {
    /// Build a script and derive `full_text` (hook, sections, cta in order).
    pub fn assemble(
        story_id: impl Into<String>,
        hook: impl Into<String>,
        sections: Vec<ScriptSection>,
        cta: impl Into<String>,
    ) -> Self {
        let hook = hook.into();
        let cta = cta.into();
        let mut parts: Vec<&str> = Vec::with_capacity(sections.len() + 2);
        parts.push(hook.trim());
        parts.extend(sections.iter().map(|s| s.text.trim()));
        parts.push(cta.trim());
        let full_text = parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            story_id: story_id.into(),
            hook,
            sections,
            cta,
            full_text,
        }
    }

    /// At least one section and something to narrate.
    pub fn is_usable(&self) -> bool {
        !self.sections.is_empty() && !self.full_text.trim().is_empty()
    }

    pub fn total_duration_hint(&self) -> f64 {
        self.sections.iter().map(|s| s.duration_hint.max(0.0)).sum()
    }
}

/// Word-level timing from the narration audio (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}
