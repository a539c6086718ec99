use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline stages in production order, plus the FAILED status.
///
/// Each producing stage is named after the state a story is in once that
/// stage's artifact exists (VOICED = narration audio exists, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingested,
    Scripted,
    Voiced,
    Timestamped,
    Captioned,
    Rendered,
    Published,
    Failed,
}

impl Stage {
    /// Stages that produce an artifact, in execution order.
    pub const PRODUCING: [Stage; 6] = [
        Stage::Scripted,
        Stage::Voiced,
        Stage::Timestamped,
        Stage::Captioned,
        Stage::Rendered,
        Stage::Published,
    ];

    /// Position in the total order; FAILED has none.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Stage::Ingested => Some(0),
            Stage::Scripted => Some(1),
            Stage::Voiced => Some(2),
            Stage::Timestamped => Some(3),
            Stage::Captioned => Some(4),
            Stage::Rendered => Some(5),
            Stage::Published => Some(6),
            Stage::Failed => None,
        }
    }

    pub fn from_ordinal(n: u8) -> Option<Stage> {
        match n {
            0 => Some(Stage::Ingested),
            1 => Some(Stage::Scripted),
            2 => Some(Stage::Voiced),
            3 => Some(Stage::Timestamped),
            4 => Some(Stage::Captioned),
            5 => Some(Stage::Rendered),
            6 => Some(Stage::Published),
            _ => None,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        self.ordinal().and_then(|n| Stage::from_ordinal(n + 1))
    }

    pub fn prev(&self) -> Option<Stage> {
        self.ordinal()
            .and_then(|n| n.checked_sub(1))
            .and_then(Stage::from_ordinal)
    }

    /// True if `self` comes at or after `other` in the order. FAILED is never
    /// at or after anything.
    pub fn reached(&self, other: Stage) -> bool {
        match (self.ordinal(), other.ordinal()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Valid `advance` targets.
    pub fn is_producing(&self) -> bool {
        Stage::PRODUCING.contains(self)
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Stage::Published)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingested => "ingested",
            Stage::Scripted => "scripted",
            Stage::Voiced => "voiced",
            Stage::Timestamped => "timestamped",
            Stage::Captioned => "captioned",
            Stage::Rendered => "rendered",
            Stage::Published => "published",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ingested" => Ok(Stage::Ingested),
            "scripted" => Ok(Stage::Scripted),
            "voiced" => Ok(Stage::Voiced),
            "timestamped" => Ok(Stage::Timestamped),
            "captioned" => Ok(Stage::Captioned),
            "rendered" => Ok(Stage::Rendered),
            "published" => Ok(Stage::Published),
            "failed" => Ok(Stage::Failed),
            other => Err(anyhow::anyhow!("unknown stage: {other}")),
        }
    }
}
