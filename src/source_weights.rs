//! # Source Weights
//!
//! Per-source scoring policy: how a source's native popularity number maps
//! onto `[0, 1]`, how much the source is trusted, and where it sits in the
//! tie-break order used when duplicates score equally.
//!
//! - Loads from the `[scoring]` table of the app config (or defaults).
//! - Weights are clamped to `[0.0, 1.0]`.
//! - Unknown sources fall back to `default_weight` and a flat scale.
//! - Includes a built-in `default_seed()` for the shipped sources.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::model::SourceKind;

/// How a source's raw score maps onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreScale {
    /// `ln(1 + raw) / ln(1 + saturation)`, for unbounded vote counts.
    Log { saturation: f64 },
    /// `raw / max`, for signals that already have a ceiling.
    Bounded { max: f64 },
    /// Constant, for sources without a popularity signal.
    Flat { value: f64 },
}

impl ScoreScale {
    pub fn normalize(&self, raw: Option<f64>) -> f64 {
        let raw = raw.filter(|r| r.is_finite()).unwrap_or(0.0).max(0.0);
        let v = match *self {
            ScoreScale::Log { saturation } => {
                let denom = (1.0 + saturation.max(0.0)).ln();
                if denom <= 0.0 {
                    0.0
                } else {
                    (1.0 + raw).ln() / denom
                }
            }
            ScoreScale::Bounded { max } => {
                if max <= 0.0 {
                    0.0
                } else {
                    raw / max
                }
            }
            ScoreScale::Flat { value } => value,
        };
        clamp01(v)
    }
}

/// Scoring entry for one source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceScoring {
    pub weight: f64,
    pub scale: ScoreScale,
}

/// Scoring policy for all sources, loaded from config or defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceWeights {
    /// Recency half-life in hours.
    pub half_life_hours: f64,
    /// Weight for a source with no entry.
    pub default_weight: f64,
    /// Tie-break order, most preferred first. Unlisted sources sort last.
    pub priority: Vec<SourceKind>,
    /// Loaded entries are laid over the built-in seed, field by field.
    #[serde(deserialize_with = "merge_over_seed")]
    pub sources: BTreeMap<SourceKind, SourceScoring>,
}

/// A `[scoring.sources.<name>]` table; absent fields keep the seeded value.
#[derive(Deserialize)]
struct SourceScoringPatch {
    weight: Option<f64>,
    scale: Option<ScoreScale>,
}

fn merge_over_seed<'de, D>(d: D) -> Result<BTreeMap<SourceKind, SourceScoring>, D::Error>
where
    D: Deserializer<'de>,
{
    let patches = BTreeMap::<SourceKind, SourceScoringPatch>::deserialize(d)?;
    let mut sources = SourceWeights::default_seed().sources;
    for (kind, patch) in patches {
        let base = sources.get(&kind).copied().unwrap_or(SourceScoring {
            weight: 0.5,
            scale: ScoreScale::Flat { value: 0.5 },
        });
        sources.insert(
            kind,
            SourceScoring {
                weight: patch.weight.unwrap_or(base.weight),
                scale: patch.scale.unwrap_or(base.scale),
            },
        );
    }
    Ok(sources)
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self::default_seed()
    }
}

pub const DEFAULT_HALF_LIFE_HOURS: f64 = 6.0;

impl SourceWeights {
    pub fn weight_for(&self, source: SourceKind) -> f64 {
        clamp01(
            self.sources
                .get(&source)
                .map(|s| s.weight)
                .unwrap_or(self.default_weight),
        )
    }

    pub fn scale_for(&self, source: SourceKind) -> ScoreScale {
        self.sources
            .get(&source)
            .map(|s| s.scale)
            .unwrap_or(ScoreScale::Flat { value: 0.5 })
    }

    /// Position in the tie-break order; lower wins.
    pub fn priority_rank(&self, source: SourceKind) -> usize {
        self.priority
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.priority.len())
    }

    /// Replace values that would break scoring with defaults.
    pub fn sanitized(mut self) -> Self {
        if !(self.half_life_hours.is_finite() && self.half_life_hours > 0.0) {
            tracing::warn!(
                half_life_hours = self.half_life_hours,
                "invalid half-life; using default"
            );
            self.half_life_hours = DEFAULT_HALF_LIFE_HOURS;
        }
        if !self.default_weight.is_finite() {
            self.default_weight = 0.5;
        }
        self.default_weight = clamp01(self.default_weight);
        self
    }

    /// Built-in policy for the shipped sources.
    pub fn default_seed() -> Self {
        let mut sources = BTreeMap::new();
        for (k, weight, scale) in [
            (
                SourceKind::HackerNews,
                1.0,
                ScoreScale::Log { saturation: 1000.0 },
            ),
            (SourceKind::Reddit, 0.8, ScoreScale::Bounded { max: 25.0 }),
            (SourceKind::TechCrunch, 0.9, ScoreScale::Flat { value: 0.5 }),
            (SourceKind::X, 0.85, ScoreScale::Flat { value: 0.5 }),
            (
                SourceKind::FourChan,
                0.7,
                ScoreScale::Log { saturation: 500.0 },
            ),
        ] {
            sources.insert(k, SourceScoring { weight, scale });
        }

        Self {
            half_life_hours: DEFAULT_HALF_LIFE_HOURS,
            default_weight: 0.5,
            priority: vec![
                SourceKind::HackerNews,
                SourceKind::TechCrunch,
                SourceKind::X,
                SourceKind::Reddit,
                SourceKind::FourChan,
            ],
            sources,
        }
    }
}

/// Clamp to [0.0, 1.0]; NaN maps to 0.
fn clamp01(x: f64) -> f64 {
    if x.is_nan() || x < 0.0 {
        0.0
    } else if x > 1.0 {
        1.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SourceWeights {
        SourceWeights::default_seed()
    }

    #[test]
    fn seeded_weights() {
        let c = cfg();
        assert!((c.weight_for(SourceKind::HackerNews) - 1.0).abs() < 1e-9);
        assert!((c.weight_for(SourceKind::FourChan) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn missing_source_uses_default() {
        let mut c = cfg();
        c.sources.remove(&SourceKind::X);
        assert!((c.weight_for(SourceKind::X) - c.default_weight).abs() < 1e-9);
        assert_eq!(c.scale_for(SourceKind::X), ScoreScale::Flat { value: 0.5 });
    }

    #[test]
    fn weights_are_clamped() {
        let mut c = cfg();
        c.sources.insert(
            SourceKind::Reddit,
            SourceScoring {
                weight: 3.0,
                scale: ScoreScale::Bounded { max: 10.0 },
            },
        );
        assert!((c.weight_for(SourceKind::Reddit) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn log_scale_saturates() {
        let s = ScoreScale::Log { saturation: 1000.0 };
        assert_eq!(s.normalize(Some(0.0)), 0.0);
        assert!((s.normalize(Some(1000.0)) - 1.0).abs() < 1e-9);
        assert_eq!(s.normalize(Some(50_000.0)), 1.0);
        assert!(s.normalize(Some(10.0)) < s.normalize(Some(100.0)));
    }

    #[test]
    fn bounded_and_flat_scales() {
        assert!((ScoreScale::Bounded { max: 25.0 }.normalize(Some(5.0)) - 0.2).abs() < 1e-9);
        assert_eq!(ScoreScale::Bounded { max: 0.0 }.normalize(Some(5.0)), 0.0);
        assert_eq!(ScoreScale::Flat { value: 0.5 }.normalize(None), 0.5);
        assert_eq!(ScoreScale::Log { saturation: 10.0 }.normalize(Some(f64::NAN)), 0.0);
    }

    #[test]
    fn priority_rank_orders_known_sources_first() {
        let c = cfg();
        assert_eq!(c.priority_rank(SourceKind::HackerNews), 0);
        assert!(c.priority_rank(SourceKind::TechCrunch) < c.priority_rank(SourceKind::Reddit));
        let mut short = cfg();
        short.priority = vec![SourceKind::Reddit];
        assert_eq!(short.priority_rank(SourceKind::HackerNews), 1);
    }

    #[test]
    fn sanitize_repairs_half_life() {
        let mut c = cfg();
        c.half_life_hours = 0.0;
        assert_eq!(c.sanitized().half_life_hours, DEFAULT_HALF_LIFE_HOURS);
    }

    #[test]
    fn parses_from_toml_table() {
        let src = r#"
            half_life_hours = 12.0
            priority = ["reddit", "hackernews"]

            [sources.reddit]
            weight = 0.6
            scale = { kind = "bounded", max = 50.0 }
        "#;
        let c: SourceWeights = toml::from_str(src).unwrap();
        assert_eq!(c.half_life_hours, 12.0);
        assert_eq!(c.priority_rank(SourceKind::Reddit), 0);
        assert!((c.weight_for(SourceKind::Reddit) - 0.6).abs() < 1e-9);
        assert_eq!(c.scale_for(SourceKind::Reddit), ScoreScale::Bounded { max: 50.0 });
    }

    #[test]
    fn partial_source_table_keeps_the_other_seeds() {
        let src = r#"
            [sources.reddit]
            weight = 0.4
        "#;
        let c: SourceWeights = toml::from_str(src).unwrap();
        let seed = cfg();
        assert!((c.weight_for(SourceKind::Reddit) - 0.4).abs() < 1e-9);
        assert_eq!(c.scale_for(SourceKind::Reddit), seed.scale_for(SourceKind::Reddit));
        for k in [SourceKind::HackerNews, SourceKind::TechCrunch, SourceKind::X, SourceKind::FourChan] {
            assert_eq!(c.sources.get(&k), seed.sources.get(&k), "{k} lost its seed");
        }
    }
}
