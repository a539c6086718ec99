//! RSS 2.0 / Atom feed adapter, instantiated per feed-shaped source
//! (Reddit subreddits, TechCrunch, Nitter search for X).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::config::{NitterConfig, RedditConfig, TechCrunchConfig};
use crate::ingest::types::SourceProvider;
use crate::model::{ContextEntry, RawStory, SourceKind};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}
#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    content: Option<TextNode>,
    summary: Option<TextNode>,
}
#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}
#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

/// One feed entry, format-independent.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Parse an RSS 2.0 or Atom document into entries, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    if is_atom(&xml_clean) {
        let feed: AtomFeed = from_str(&xml_clean).context("parsing atom xml")?;
        Ok(feed
            .entry
            .into_iter()
            .map(|e| {
                let link = e
                    .link
                    .iter()
                    .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                    .or_else(|| e.link.first())
                    .and_then(|l| l.href.clone())
                    .unwrap_or_default();
                let published = e
                    .published
                    .as_deref()
                    .or(e.updated.as_deref())
                    .and_then(parse_rfc3339);
                FeedEntry {
                    title: e.title.map(|t| t.value).unwrap_or_default(),
                    link,
                    published,
                    summary: e.content.or(e.summary).map(|t| t.value),
                }
            })
            .collect())
    } else {
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
        Ok(rss
            .channel
            .item
            .into_iter()
            .map(|it| FeedEntry {
                title: it.title.unwrap_or_default(),
                link: it.link.unwrap_or_default(),
                published: it.pub_date.as_deref().and_then(parse_rfc2822),
                summary: it.description,
            })
            .collect())
    }
}

fn is_atom(xml: &str) -> bool {
    let head: String = xml.chars().take(512).collect();
    head.contains("<feed") && !head.contains("<rss")
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::<Utc>::from_timestamp(odt.unix_timestamp(), 0)
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts.trim(), &Rfc3339).ok()?;
    DateTime::<Utc>::from_timestamp(odt.unix_timestamp(), 0)
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Which source a feed belongs to; decides score and context shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Reddit,
    TechCrunch,
    Nitter,
}

impl FeedKind {
    pub fn source(&self) -> SourceKind {
        match self {
            FeedKind::Reddit => SourceKind::Reddit,
            FeedKind::TechCrunch => SourceKind::TechCrunch,
            FeedKind::Nitter => SourceKind::X,
        }
    }
}

/// Map parsed entries to raw stories. Position in the feed is the Reddit
/// score (top entry = entry count); the other feeds carry no score.
pub fn entries_to_stories(kind: FeedKind, entries: Vec<FeedEntry>, now: DateTime<Utc>) -> Vec<RawStory> {
    let total = entries.len();
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(rank, e)| {
            let link = e.link.trim().to_string();
            if link.is_empty() {
                return None;
            }
            let summary = e.summary.filter(|s| !s.trim().is_empty());
            let (title, raw_score, context) = match kind {
                FeedKind::Reddit => (
                    e.title,
                    Some((total - rank) as f64),
                    summary
                        .map(|text| vec![ContextEntry::Summary { text }])
                        .unwrap_or_default(),
                ),
                FeedKind::TechCrunch => (
                    e.title,
                    None,
                    summary
                        .map(|text| vec![ContextEntry::Summary { text }])
                        .unwrap_or_default(),
                ),
                FeedKind::Nitter => {
                    let title = if e.title.trim().is_empty() {
                        link.clone()
                    } else {
                        e.title
                    };
                    let text = summary.unwrap_or_else(|| title.clone());
                    (title, None, vec![ContextEntry::TweetText { text }])
                }
            };
            if title.trim().is_empty() {
                return None;
            }
            Some(RawStory {
                source: kind.source(),
                title,
                url: link,
                raw_score,
                created_at: e.published.unwrap_or(now),
                context,
            })
        })
        .collect()
}

pub struct FeedProvider {
    kind: FeedKind,
    mode: Mode,
}

enum Mode {
    Fixture(Vec<String>),
    Http {
        urls: Vec<String>,
        client: reqwest::Client,
    },
}

impl FeedProvider {
    /// Each fixture string is one feed document.
    pub fn from_fixtures(kind: FeedKind, docs: Vec<String>) -> Self {
        Self {
            kind,
            mode: Mode::Fixture(docs),
        }
    }

    pub fn from_urls(kind: FeedKind, urls: Vec<String>, client: reqwest::Client) -> Self {
        Self {
            kind,
            mode: Mode::Http { urls, client },
        }
    }

    pub fn reddit(cfg: &RedditConfig, client: reqwest::Client) -> Self {
        let urls = cfg
            .subreddits
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| format!("https://www.reddit.com/r/{s}/.rss"))
            .collect();
        Self::from_urls(FeedKind::Reddit, urls, client)
    }

    pub fn techcrunch(cfg: &TechCrunchConfig, client: reqwest::Client) -> Self {
        Self::from_urls(FeedKind::TechCrunch, vec![cfg.feed_url.clone()], client)
    }

    pub fn nitter(cfg: &NitterConfig, client: reqwest::Client) -> Self {
        let base = cfg.instance.trim_end_matches('/');
        let urls = cfg
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .filter_map(|k| {
                let mut u = url::Url::parse(&format!("{base}/search/rss")).ok()?;
                u.query_pairs_mut().append_pair("f", "tweets").append_pair("q", k);
                Some(u.to_string())
            })
            .collect();
        Self::from_urls(FeedKind::Nitter, urls, client)
    }

    /// Parse every document; one bad document fails the batch only if all fail.
    fn collect_docs<'a>(&self, docs: impl Iterator<Item = (&'a str, Result<String>)>) -> Result<Vec<RawStory>> {
        let now = Utc::now();
        let mut out = Vec::new();
        let mut attempted = 0usize;
        let mut last_err = None;
        for (label, doc) in docs {
            attempted += 1;
            match doc.and_then(|d| parse_feed(&d)) {
                Ok(entries) => out.extend(entries_to_stories(self.kind, entries, now)),
                Err(e) => {
                    tracing::warn!(target: "ingest", provider = self.name(), feed = label, error = ?e, "feed skipped");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if out.is_empty() && attempted > 0 => Err(e),
            _ => Ok(out),
        }
    }
}

#[async_trait]
impl SourceProvider for FeedProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawStory>> {
        match &self.mode {
            Mode::Fixture(docs) => {
                self.collect_docs(docs.iter().map(|d| ("fixture", Ok(d.clone()))))
            }
            Mode::Http { urls, client } => {
                if urls.is_empty() {
                    return Err(anyhow!("{} has no feeds configured", self.name()));
                }
                let bodies = futures::future::join_all(urls.iter().map(|u| async move {
                    let body = async {
                        client
                            .get(u.as_str())
                            .send()
                            .await
                            .context("feed http get()")?
                            .error_for_status()
                            .context("feed http status")?
                            .text()
                            .await
                            .context("feed http .text()")
                    }
                    .await;
                    (u.as_str(), body)
                }))
                .await;
                self.collect_docs(bodies.into_iter())
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.kind {
            FeedKind::Reddit => "reddit",
            FeedKind::TechCrunch => "techcrunch",
            FeedKind::Nitter => "x",
        }
    }
}
