pub mod aggregator;
pub mod dedup;
pub mod providers;
pub mod scheduler;
pub mod scoring;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::IngestConfig;
use crate::error::StoreError;
use crate::ingest::dedup::IdentityCollision;
use crate::ingest::types::{ProviderReport, SourceProvider};
use crate::model::{ContextEntry, RawStory, Story};
use crate::source_weights::SourceWeights;
use crate::store::StoryStore;

const TEXT_MAX_CHARS: usize = 1500;
const TITLE_MAX_CHARS: usize = 200;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Completed ingest runs.");
        describe_counter!("ingest_raw_total", "Raw records returned by providers.");
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider failures and timeouts."
        );
        describe_counter!(
            "ingest_duplicates_total",
            "Records merged into another record with the same id."
        );
        describe_counter!(
            "ingest_identity_anomalies_total",
            "Same-id groups whose titles disagree across sources."
        );
        describe_counter!(
            "pipeline_stage_total",
            "Stage transitions by stage and outcome."
        );
        describe_histogram!("ingest_provider_ms", "Provider fetch time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when ingest last ran.");
        describe_gauge!("pipeline_workers", "Configured pipeline concurrency.");
        describe_gauge!("scoring_half_life_hours", "Recency half-life in hours.");
    });
}

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Tags; <br> and <p> become spaces so words don't fuse
    static RE_BREAKS: OnceCell<regex::Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    if let Some(re) = regex_cell(&RE_BREAKS, r"(?i)<\s*(br|/p|p)\s*/?>") {
        out = re.replace_all(&out, " ").to_string();
    }
    if let Some(re) = regex_cell(&RE_TAGS, r"(?is)</?[^>]+>") {
        out = re.replace_all(&out, "").to_string();
    }

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    // 5) Length cap
    truncate_chars(&out, TEXT_MAX_CHARS)
}

fn regex_cell<'a>(cell: &'a OnceCell<regex::Regex>, pat: &str) -> Option<&'a regex::Regex> {
    cell.get_or_try_init(|| regex::Regex::new(pat)).ok()
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect()
    } else {
        s.to_string()
    }
}

/// Normalize titles and context; drop records with no title or url.
/// Returns (kept, dropped).
pub fn prepare(raw: Vec<RawStory>) -> (Vec<RawStory>, usize) {
    let mut dropped = 0usize;
    let mut kept = Vec::with_capacity(raw.len());
    for mut r in raw {
        r.title = truncate_chars(&normalize_text(&r.title), TITLE_MAX_CHARS);
        r.url = r.url.trim().to_string();
        if r.title.is_empty() || r.url.is_empty() {
            dropped += 1;
            continue;
        }
        r.context = r.context.into_iter().filter_map(clean_context).collect();
        kept.push(r);
    }
    (kept, dropped)
}

fn clean_context(entry: ContextEntry) -> Option<ContextEntry> {
    match entry {
        ContextEntry::Comments { source, entries } => {
            let entries: Vec<_> = entries
                .into_iter()
                .filter_map(|mut c| {
                    c.text = normalize_text(&c.text);
                    (!c.text.is_empty()).then_some(c)
                })
                .collect();
            (!entries.is_empty()).then_some(ContextEntry::Comments { source, entries })
        }
        ContextEntry::TweetText { text } => {
            let text = normalize_text(&text);
            (!text.is_empty()).then_some(ContextEntry::TweetText { text })
        }
        ContextEntry::Summary { text } => {
            let text = normalize_text(&text);
            (!text.is_empty()).then_some(ContextEntry::Summary { text })
        }
        ContextEntry::Thread {
            subject,
            excerpt,
            replies,
        } => Some(ContextEntry::Thread {
            subject: normalize_text(&subject),
            excerpt: normalize_text(&excerpt),
            replies: replies
                .iter()
                .map(|r| normalize_text(r))
                .filter(|r| !r.is_empty())
                .collect(),
        }),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub adapter_timeout: Duration,
    pub per_provider_cap: usize,
}

impl From<&IngestConfig> for IngestOptions {
    fn from(c: &IngestConfig) -> Self {
        Self {
            adapter_timeout: Duration::from_secs(c.adapter_timeout_secs),
            per_provider_cap: c.top_n,
        }
    }
}

/// Summary of one ingest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub providers: Vec<ProviderReport>,
    pub raw: usize,
    pub dropped: usize,
    pub unique: usize,
    pub merged: usize,
    pub collisions: Vec<IdentityCollision>,
    pub inserted: usize,
    pub updated: usize,
}

/// Fetch, score and deduplicate without touching the store.
pub async fn run_once(
    providers: &[Arc<dyn SourceProvider>],
    weights: &SourceWeights,
    opts: IngestOptions,
) -> (Vec<Story>, IngestReport) {
    ensure_metrics_described();

    let agg = aggregator::aggregate(providers, opts.adapter_timeout, opts.per_provider_cap).await;
    let raw_count = agg.stories.len();
    let (prepared, dropped) = prepare(agg.stories);

    let now = chrono::Utc::now();
    let scored = scoring::score_all(prepared, weights, now);
    let (stories, dedup_report) = dedup::dedup(scored, weights);

    if dedup_report.merged > 0 {
        tracing::info!(target: "ingest", merged = dedup_report.merged, "duplicates merged");
    }

    counter!("ingest_raw_total").increment(raw_count as u64);
    counter!("ingest_duplicates_total").increment(dedup_report.merged as u64);

    let report = IngestReport {
        providers: agg.reports,
        raw: raw_count,
        dropped,
        unique: stories.len(),
        merged: dedup_report.merged,
        collisions: dedup_report.collisions,
        inserted: 0,
        updated: 0,
    };
    (stories, report)
}

/// Full ingest: fetch, score, deduplicate, then bulk upsert into the store.
pub async fn run_and_store(
    providers: &[Arc<dyn SourceProvider>],
    weights: &SourceWeights,
    opts: IngestOptions,
    store: &StoryStore,
) -> Result<IngestReport, StoreError> {
    let (stories, mut report) = run_once(providers, weights, opts).await;

    // Records seen on an earlier run compete with what is stored, ranked at
    // the instant the new batch was scored.
    let mut merged = Vec::with_capacity(stories.len());
    for incoming in stories {
        let Some(mut stored) = store.get_story(&incoming.id)? else {
            merged.push(incoming);
            continue;
        };
        scoring::rescore(&mut stored, weights, incoming.fetched_at);
        let (story, collision) = dedup::merge_with_stored(stored, incoming, weights);
        report.collisions.extend(collision);
        merged.push(story);
    }

    let outcome = store.upsert_stories(&merged)?;
    report.inserted = outcome.inserted;
    report.updated = outcome.updated;

    let now = chrono::Utc::now().timestamp().max(0) as u64;
    counter!("ingest_runs_total").increment(1);
    gauge!("ingest_last_run_ts").set(now as f64);

    tracing::info!(
        target: "ingest",
        raw = report.raw,
        unique = report.unique,
        inserted = report.inserted,
        updated = report.updated,
        failed_providers = report.providers.iter().filter(|p| !p.outcome.is_success()).count(),
        "ingest run complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Comment, SourceKind};
    use chrono::Utc;

    #[test]
    fn normalize_text_decodes_strips_and_collapses() {
        let s = "  Hello,&nbsp;&nbsp; <b>world</b>!  ";
        assert_eq!(normalize_text(s), "Hello, world!");
    }

    #[test]
    fn normalize_text_keeps_words_apart_across_breaks() {
        assert_eq!(normalize_text("one<br>two<p>three</p>"), "one two three");
    }

    #[test]
    fn normalize_text_ascii_quotes() {
        assert_eq!(normalize_text("\u{201C}hi\u{201D} it\u{2019}s"), "\"hi\" it's");
    }

    #[test]
    fn prepare_drops_blank_titles_and_cleans_context() {
        let raw = vec![
            RawStory {
                source: SourceKind::HackerNews,
                title: "  <i>  </i> ".into(),
                url: "https://example.com/1".into(),
                raw_score: None,
                created_at: Utc::now(),
                context: vec![],
            },
            RawStory {
                source: SourceKind::HackerNews,
                title: "Real &amp; title".into(),
                url: " https://example.com/2 ".into(),
                raw_score: Some(3.0),
                created_at: Utc::now(),
                context: vec![ContextEntry::Comments {
                    source: SourceKind::HackerNews,
                    entries: vec![Comment::new(None, "<p></p>"), Comment::new(None, "ok")],
                }],
            },
        ];
        let (kept, dropped) = prepare(raw);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "Real & title");
        assert_eq!(kept[0].url, "https://example.com/2");
        assert_eq!(crate::model::comment_count(&kept[0].context), 1);
    }
}
