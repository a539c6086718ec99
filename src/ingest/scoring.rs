//! Scoring: raw popularity → comparable ranking value.
//!
//! `weighted = normalized × source_weight × recency`, where
//! - `normalized` comes from the source's [`ScoreScale`](crate::source_weights::ScoreScale),
//! - `recency = exp(-age_hours / half_life_hours)`, floored above zero.
//!
//! Pure: the same raw record at the same instant always scores the same.

use chrono::{DateTime, Utc};

use crate::identity::story_id;
use crate::model::{RawStory, Story};
use crate::pipeline::Stage;
use crate::source_weights::SourceWeights;

/// Decay factor for a story `age_hours` old. Never exactly zero.
pub fn recency_factor(age_hours: f64, half_life_hours: f64) -> f64 {
    let age = if age_hours.is_finite() {
        age_hours.max(0.0)
    } else {
        f64::MAX
    };
    (-age / half_life_hours).exp().max(f64::MIN_POSITIVE)
}

/// Hours between `created_at` and `now`, clamped at 0 for future timestamps.
pub fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - created_at).num_milliseconds() as f64 / 1_000.0;
    (secs / 3_600.0).max(0.0)
}

/// Score one raw record into a fresh `Story` at stage INGESTED.
pub fn score(raw: RawStory, weights: &SourceWeights, now: DateTime<Utc>) -> Story {
    let normalized = weights.scale_for(raw.source).normalize(raw.raw_score);
    let recency = recency_factor(age_hours(raw.created_at, now), weights.half_life_hours);
    let weighted = normalized * weights.weight_for(raw.source) * recency;

    Story {
        id: story_id(&raw.url),
        source: raw.source,
        title: raw.title,
        url: raw.url,
        raw_score: raw.raw_score,
        normalized_score: normalized,
        weighted_score: weighted,
        created_at: raw.created_at,
        fetched_at: now,
        context: raw.context,
        stage: Stage::Ingested,
    }
}

/// Recompute the scores of a stored story as of `now`.
pub fn rescore(story: &mut Story, weights: &SourceWeights, now: DateTime<Utc>) {
    let normalized = weights.scale_for(story.source).normalize(story.raw_score);
    let recency = recency_factor(age_hours(story.created_at, now), weights.half_life_hours);
    story.normalized_score = normalized;
    story.weighted_score = normalized * weights.weight_for(story.source) * recency;
}

pub fn score_all(raws: Vec<RawStory>, weights: &SourceWeights, now: DateTime<Utc>) -> Vec<Story> {
    raws.into_iter().map(|r| score(r, weights, now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceKind;
    use chrono::Duration;
    use rand::Rng;

    fn raw(source: SourceKind, score: Option<f64>, created_at: DateTime<Utc>) -> RawStory {
        RawStory {
            source,
            title: "t".into(),
            url: "https://example.com/a".into(),
            raw_score: score,
            created_at,
            context: vec![],
        }
    }

    #[test]
    fn recency_is_one_at_zero_age_and_half_at_half_life() {
        assert!((recency_factor(0.0, 6.0) - 1.0).abs() < 1e-12);
        assert!((recency_factor(6.0, 6.0) - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn recency_never_reaches_zero() {
        assert!(recency_factor(1e9, 6.0) > 0.0);
        assert!(recency_factor(f64::INFINITY, 6.0) > 0.0);
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let now = Utc::now();
        assert_eq!(age_hours(now + Duration::hours(3), now), 0.0);
    }

    #[test]
    fn weighted_strictly_decreases_with_age() {
        let w = SourceWeights::default_seed();
        let now = Utc::now();
        let mut rng = rand::rng();
        for _ in 0..200 {
            let pts = rng.random_range(1.0..5_000.0);
            let a = rng.random_range(0.0..200.0);
            let b = a + rng.random_range(0.1..48.0);
            let younger = score(
                raw(SourceKind::HackerNews, Some(pts), now - Duration::minutes((a * 60.0) as i64)),
                &w,
                now,
            );
            let older = score(
                raw(SourceKind::HackerNews, Some(pts), now - Duration::minutes((b * 60.0) as i64)),
                &w,
                now,
            );
            assert!(
                younger.weighted_score > older.weighted_score,
                "a={a} b={b} pts={pts}"
            );
        }
    }

    #[test]
    fn scoring_is_repeatable_at_fixed_instant() {
        let w = SourceWeights::default_seed();
        let now = Utc::now();
        let r = raw(SourceKind::Reddit, Some(12.0), now - Duration::hours(2));
        let a = score(r.clone(), &w, now);
        let b = score(r, &w, now);
        assert_eq!(a, b);
    }

    #[test]
    fn large_native_scale_does_not_dominate() {
        let w = SourceWeights::default_seed();
        let now = Utc::now();
        let hn = score(raw(SourceKind::HackerNews, Some(1e7), now), &w, now);
        assert!(hn.normalized_score <= 1.0);
        let reddit = score(raw(SourceKind::Reddit, Some(25.0), now), &w, now);
        assert!(reddit.normalized_score <= 1.0);
        assert!(hn.weighted_score <= 1.0 && reddit.weighted_score <= 1.0);
    }

    #[test]
    fn score_assigns_canonical_id_and_ingested_stage() {
        let w = SourceWeights::default_seed();
        let now = Utc::now();
        let mut r = raw(SourceKind::X, None, now);
        r.url = "http://www.example.com/a?utm_source=x".into();
        let s = score(r, &w, now);
        assert_eq!(s.id, story_id("https://example.com/a"));
        assert_eq!(s.stage, Stage::Ingested);
        assert_eq!(s.fetched_at, now);
    }
}
