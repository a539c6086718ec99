use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::HackerNewsConfig;
use crate::ingest::types::SourceProvider;
use crate::model::{Comment, ContextEntry, RawStory, SourceKind};

const ITEM_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct HnItem {
    pub id: u64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub kids: Vec<u64>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub dead: bool,
}

/// Discussion page for an item; self-posts use it as their url.
pub fn item_url(id: u64) -> String {
    format!("https://news.ycombinator.com/item?id={id}")
}

/// Map one HN story item (plus its already-fetched comments) to a raw story.
pub fn story_from_item(item: &HnItem, comments: Vec<Comment>, now: DateTime<Utc>) -> Option<RawStory> {
    if item.deleted || item.dead {
        return None;
    }
    if item.kind.as_deref().is_some_and(|k| k != "story") {
        return None;
    }
    let title = item.title.as_deref().unwrap_or_default().trim();
    if title.is_empty() {
        return None;
    }
    let url = item
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(String::from)
        .unwrap_or_else(|| item_url(item.id));
    let created_at = item
        .time
        .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
        .unwrap_or(now);

    let mut context = Vec::new();
    if !comments.is_empty() {
        context.push(ContextEntry::Comments {
            source: SourceKind::HackerNews,
            entries: comments,
        });
    }
    if let Some(text) = item.text.as_deref().filter(|t| !t.trim().is_empty()) {
        context.push(ContextEntry::Summary { text: text.to_string() });
    }

    Some(RawStory {
        source: SourceKind::HackerNews,
        title: title.to_string(),
        url,
        raw_score: Some(item.score.unwrap_or(0.0)),
        created_at,
        context,
    })
}

fn comment_from_item(item: &HnItem) -> Option<Comment> {
    if item.deleted || item.dead {
        return None;
    }
    let text = item.text.as_deref()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(Comment::new(item.by.clone(), text))
}

/// Build stories from a flat bag of items: every `story` item becomes a
/// record, and its first `max_comments` kids found in the bag become context.
pub fn parse_items(items: &[HnItem], max_comments: usize, now: DateTime<Utc>) -> Vec<RawStory> {
    let by_id: HashMap<u64, &HnItem> = items.iter().map(|i| (i.id, i)).collect();
    items
        .iter()
        .filter(|i| i.kind.as_deref() == Some("story"))
        .filter_map(|i| {
            let comments = i
                .kids
                .iter()
                .filter_map(|k| by_id.get(k))
                .filter_map(|c| comment_from_item(c))
                .take(max_comments)
                .collect();
            story_from_item(i, comments, now)
        })
        .collect()
}

pub struct HackerNewsProvider {
    mode: Mode,
    max_comments: usize,
}

enum Mode {
    Fixture(Vec<HnItem>),
    Http {
        base_url: String,
        top_n: usize,
        client: reqwest::Client,
    },
}

impl HackerNewsProvider {
    /// Fixture is a JSON array of HN items (stories and comments together).
    pub fn from_fixture(json: &str, max_comments: usize) -> Result<Self> {
        let items: Vec<HnItem> = serde_json::from_str(json).context("parsing hn fixture")?;
        Ok(Self {
            mode: Mode::Fixture(items),
            max_comments,
        })
    }

    pub fn from_config(cfg: &HackerNewsConfig, client: reqwest::Client) -> Self {
        Self {
            mode: Mode::Http {
                base_url: cfg.base_url.trim_end_matches('/').to_string(),
                top_n: cfg.top_n,
                client,
            },
            max_comments: cfg.comments,
        }
    }

    async fn fetch_http(&self, base_url: &str, top_n: usize, client: &reqwest::Client) -> Result<Vec<RawStory>> {
        let ids: Vec<u64> = client
            .get(format!("{base_url}/topstories.json"))
            .send()
            .await
            .context("hn topstories get()")?
            .error_for_status()
            .context("hn topstories status")?
            .json()
            .await
            .context("hn topstories json")?;

        let stories: Vec<HnItem> = fetch_items(client, base_url, ids.into_iter().take(top_n)).await;

        let now = Utc::now();
        let mut out = Vec::with_capacity(stories.len());
        for item in &stories {
            let kids: Vec<u64> = item.kids.iter().copied().take(self.max_comments * 2).collect();
            let comments: Vec<Comment> = fetch_items(client, base_url, kids.into_iter())
                .await
                .iter()
                .filter_map(comment_from_item)
                .take(self.max_comments)
                .collect();
            if let Some(s) = story_from_item(item, comments, now) {
                out.push(s);
            }
        }
        Ok(out)
    }
}

/// Fetch items concurrently, keeping input order and skipping failures.
async fn fetch_items(
    client: &reqwest::Client,
    base_url: &str,
    ids: impl Iterator<Item = u64>,
) -> Vec<HnItem> {
    let results: Vec<Option<HnItem>> = stream::iter(ids)
        .map(|id| async move {
            let res = async {
                client
                    .get(format!("{base_url}/item/{id}.json"))
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Option<HnItem>>()
                    .await
            }
            .await;
            match res {
                Ok(item) => item,
                Err(e) => {
                    tracing::debug!(target: "ingest", provider = "hackernews", item = id, error = %e, "hn item skipped");
                    None
                }
            }
        })
        .buffered(ITEM_FETCH_CONCURRENCY)
        .collect()
        .await;
    results.into_iter().flatten().collect()
}

#[async_trait]
impl SourceProvider for HackerNewsProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawStory>> {
        match &self.mode {
            Mode::Fixture(items) => Ok(parse_items(items, self.max_comments, Utc::now())),
            Mode::Http {
                base_url,
                top_n,
                client,
            } => self.fetch_http(base_url, *top_n, client).await,
        }
    }

    fn name(&self) -> &'static str {
        "hackernews"
    }
}
