//! Merge scored stories that share a canonical identity.
//!
//! Within a group the representative is the highest `weighted_score`; ties go
//! to the earliest `created_at`, then to the source earliest in the configured
//! priority order. The representative keeps its own primary fields and gains
//! the union of every member's context.

use std::cmp::Ordering;
use std::collections::HashMap;

use metrics::counter;
use serde::Serialize;

use crate::model::{merge_context, SourceKind, Story};
use crate::source_weights::SourceWeights;

/// Below this title similarity, same-id records from different sources are
/// reported as a likely identity collision.
pub const COLLISION_SIMILARITY: f64 = 0.5;

/// Two or more sources reported different-looking content under one id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityCollision {
    pub id: String,
    pub sources: Vec<SourceKind>,
    pub titles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupReport {
    pub input: usize,
    pub output: usize,
    /// Records folded into another record.
    pub merged: usize,
    pub collisions: Vec<IdentityCollision>,
}

/// Tie-break ordering: best first.
pub fn rank_order(a: &Story, b: &Story, weights: &SourceWeights) -> Ordering {
    b.weighted_score
        .total_cmp(&a.weighted_score)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| weights.priority_rank(a.source).cmp(&weights.priority_rank(b.source)))
}

/// Deduplicate by id. Output is sorted by `weighted_score` desc, then id.
pub fn dedup(stories: Vec<Story>, weights: &SourceWeights) -> (Vec<Story>, DedupReport) {
    let mut report = DedupReport {
        input: stories.len(),
        ..Default::default()
    };

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Story>> = Vec::new();
    for s in stories {
        match index.get(&s.id) {
            Some(&i) => groups[i].push(s),
            None => {
                index.insert(s.id.clone(), groups.len());
                groups.push(vec![s]);
            }
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for mut group in groups {
        if group.len() == 1 {
            out.extend(group);
            continue;
        }
        group.sort_by(|a, b| rank_order(a, b, weights));
        report.merged += group.len() - 1;

        if let Some(c) = detect_collision(&group) {
            warn_collision(&c);
            report.collisions.push(c);
        }

        let mut members = group.into_iter();
        let Some(mut rep) = members.next() else {
            continue;
        };
        for m in members {
            merge_context(&mut rep.context, &m.context);
        }
        out.push(rep);
    }

    out.sort_by(|a, b| {
        b.weighted_score
            .total_cmp(&a.weighted_score)
            .then_with(|| a.id.cmp(&b.id))
    });
    report.output = out.len();
    (out, report)
}

/// Fold a freshly scored record into the one already stored under the same
/// id. `stored` must already be rescored as of the current run. The better
/// ranked record keeps its primary fields, the stored stage is kept, and the
/// contexts are unioned.
pub fn merge_with_stored(
    stored: Story,
    incoming: Story,
    weights: &SourceWeights,
) -> (Story, Option<IdentityCollision>) {
    let stage = stored.stage;
    let fetched_at = incoming.fetched_at;
    // Equal rank keeps what is stored.
    let pair = if rank_order(&incoming, &stored, weights) == Ordering::Less {
        [incoming, stored]
    } else {
        [stored, incoming]
    };

    let collision = detect_collision(&pair);
    if let Some(c) = &collision {
        warn_collision(c);
    }

    let [mut rep, other] = pair;
    merge_context(&mut rep.context, &other.context);
    rep.stage = stage;
    rep.fetched_at = fetched_at;
    (rep, collision)
}

fn warn_collision(c: &IdentityCollision) {
    tracing::warn!(
        target: "ingest",
        story_id = %c.id,
        sources = ?c.sources,
        titles = ?c.titles,
        "identity collision: same id, different content"
    );
    counter!("ingest_identity_anomalies_total").increment(1);
}

/// `group` is sorted, so `group[0]` is the representative.
fn detect_collision(group: &[Story]) -> Option<IdentityCollision> {
    let rep = group.first()?;
    let mut sources: Vec<SourceKind> = group.iter().map(|s| s.source).collect();
    sources.sort();
    sources.dedup();
    if sources.len() < 2 {
        return None;
    }
    let rep_title = rep.title.to_lowercase();
    let dissimilar = group[1..].iter().any(|s| {
        strsim::normalized_levenshtein(&rep_title, &s.title.to_lowercase()) < COLLISION_SIMILARITY
    });
    if !dissimilar {
        return None;
    }
    Some(IdentityCollision {
        id: rep.id.clone(),
        sources,
        titles: group.iter().map(|s| s.title.clone()).collect(),
    })
}
