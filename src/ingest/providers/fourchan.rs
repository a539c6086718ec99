use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::FourChanConfig;
use crate::ingest::normalize_text;
use crate::ingest::types::SourceProvider;
use crate::model::{ContextEntry, RawStory, SourceKind};

const TITLE_FALLBACK_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    threads: Vec<CatalogThread>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogThread {
    pub no: u64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub com: Option<String>,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ThreadDoc {
    #[serde(default)]
    posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    com: Option<String>,
}

/// Threads whose subject or opening post mentions any keyword, busiest first.
pub fn select_threads(catalog_json: &str, keywords: &[String], top_n: usize) -> Result<Vec<CatalogThread>> {
    let pages: Vec<CatalogPage> = serde_json::from_str(catalog_json).context("parsing 4chan catalog")?;
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    let mut matching: Vec<CatalogThread> = pages
        .into_iter()
        .flat_map(|p| p.threads)
        .filter(|t| {
            let haystack = format!(
                "{} {}",
                normalize_text(t.sub.as_deref().unwrap_or_default()),
                normalize_text(t.com.as_deref().unwrap_or_default())
            )
            .to_lowercase();
            keywords.iter().any(|k| haystack.contains(k.as_str()))
        })
        .collect();
    // Stable: equal reply counts keep catalog order.
    matching.sort_by(|a, b| b.replies.cmp(&a.replies));
    matching.truncate(top_n);
    Ok(matching)
}

/// First `max` non-empty replies after the opening post.
pub fn parse_replies(thread_json: &str, max: usize) -> Result<Vec<String>> {
    let doc: ThreadDoc = serde_json::from_str(thread_json).context("parsing 4chan thread")?;
    Ok(doc
        .posts
        .iter()
        .skip(1)
        .filter_map(|p| p.com.as_deref())
        .map(normalize_text)
        .filter(|t| !t.is_empty())
        .take(max)
        .collect())
}

pub fn thread_url(board: &str, no: u64) -> String {
    format!("https://boards.4chan.org/{board}/thread/{no}")
}

pub fn story_from_thread(board: &str, t: &CatalogThread, replies: Vec<String>, now: DateTime<Utc>) -> RawStory {
    let subject = normalize_text(t.sub.as_deref().unwrap_or_default());
    let excerpt = normalize_text(t.com.as_deref().unwrap_or_default());
    let title = if !subject.is_empty() {
        subject.clone()
    } else if !excerpt.is_empty() {
        excerpt.chars().take(TITLE_FALLBACK_CHARS).collect()
    } else {
        "(no subject)".to_string()
    };
    RawStory {
        source: SourceKind::FourChan,
        title,
        url: thread_url(board, t.no),
        raw_score: Some(t.replies as f64),
        created_at: t
            .time
            .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
            .unwrap_or(now),
        context: vec![ContextEntry::Thread {
            subject,
            excerpt,
            replies,
        }],
    }
}

pub struct FourChanProvider {
    board: String,
    keywords: Vec<String>,
    top_n: usize,
    max_replies: usize,
    mode: Mode,
}

enum Mode {
    Fixture {
        catalog: String,
        threads: HashMap<u64, String>,
    },
    Http {
        client: reqwest::Client,
    },
}

impl FourChanProvider {
    pub fn from_fixture(cfg: &FourChanConfig, catalog: &str, threads: HashMap<u64, String>) -> Self {
        Self::with_mode(
            cfg,
            Mode::Fixture {
                catalog: catalog.to_string(),
                threads,
            },
        )
    }

    pub fn from_config(cfg: &FourChanConfig, client: reqwest::Client) -> Self {
        Self::with_mode(cfg, Mode::Http { client })
    }

    fn with_mode(cfg: &FourChanConfig, mode: Mode) -> Self {
        Self {
            board: cfg.board.trim().to_string(),
            keywords: cfg.keywords.clone(),
            top_n: cfg.top_n,
            max_replies: cfg.replies,
            mode,
        }
    }

    async fn fetch_http(&self, client: &reqwest::Client) -> Result<Vec<RawStory>> {
        let catalog = client
            .get(format!("https://a.4cdn.org/{}/catalog.json", self.board))
            .send()
            .await
            .context("4chan catalog get()")?
            .error_for_status()
            .context("4chan catalog status")?
            .text()
            .await
            .context("4chan catalog .text()")?;
        let threads = select_threads(&catalog, &self.keywords, self.top_n)?;

        let now = Utc::now();
        let mut out = Vec::with_capacity(threads.len());
        for t in &threads {
            let url = format!("https://a.4cdn.org/{}/thread/{}.json", self.board, t.no);
            let replies = match fetch_text(client, &url).await.and_then(|b| parse_replies(&b, self.max_replies)) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(target: "ingest", provider = "4chan", thread = t.no, error = ?e, "replies skipped");
                    Vec::new()
                }
            };
            out.push(story_from_thread(&self.board, t, replies, now));
        }
        Ok(out)
    }
}

async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    Ok(client.get(url).send().await?.error_for_status()?.text().await?)
}

#[async_trait]
impl SourceProvider for FourChanProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawStory>> {
        match &self.mode {
            Mode::Fixture { catalog, threads } => {
                let now = Utc::now();
                let selected = select_threads(catalog, &self.keywords, self.top_n)?;
                Ok(selected
                    .iter()
                    .map(|t| {
                        let replies = threads
                            .get(&t.no)
                            .and_then(|j| parse_replies(j, self.max_replies).ok())
                            .unwrap_or_default();
                        story_from_thread(&self.board, t, replies, now)
                    })
                    .collect())
            }
            Mode::Http { client } => self.fetch_http(client).await,
        }
    }

    fn name(&self) -> &'static str {
        "4chan"
    }
}
