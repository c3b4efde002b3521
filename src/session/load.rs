//! Cognitive load heuristic
//!
//! Each component ratio is capped at 1 before weighting:
//!
//! ```text
//! load = min(1, 0.3·ctx/10 + 0.2·focus/7 + 0.3·pending/10 + 0.2·narrative/50)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context items at which the context component saturates
pub const CONTEXT_CAP: usize = 10;
/// Focus items at which the focus component saturates
pub const FOCUS_CAP: usize = 7;
/// Pending commitments at which the commitment component saturates
pub const PENDING_CAP: usize = 10;
/// Narrative events at which the narrative component saturates
pub const NARRATIVE_CAP: usize = 50;

// Weights in tenths so that saturated inputs sum to exactly 1.0.
const CONTEXT_WEIGHT: f64 = 3.0;
const FOCUS_WEIGHT: f64 = 2.0;
const PENDING_WEIGHT: f64 = 3.0;
const NARRATIVE_WEIGHT: f64 = 2.0;

/// Discrete load level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Level boundaries (lower bound of each level above `Low`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.6,
            critical: 0.8,
        }
    }
}

impl LoadThresholds {
    /// Map a score to its level
    pub fn level(&self, score: f64) -> LoadLevel {
        if score >= self.critical {
            LoadLevel::Critical
        } else if score >= self.high {
            LoadLevel::High
        } else if score >= self.medium {
            LoadLevel::Medium
        } else {
            LoadLevel::Low
        }
    }
}

/// Weighted contribution of each input to the score
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadComponents {
    pub context: f64,
    pub focus: f64,
    pub pending: f64,
    pub narrative: f64,
}

/// Cognitive load snapshot stored in the session document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveLoad {
    /// Score in [0, 1]
    pub score: f64,
    pub level: LoadLevel,
    pub components: LoadComponents,
    pub thresholds: LoadThresholds,
    pub calculated_at: Option<DateTime<Utc>>,
}

impl Default for CognitiveLoad {
    fn default() -> Self {
        Self {
            score: 0.0,
            level: LoadLevel::Low,
            components: LoadComponents::default(),
            thresholds: LoadThresholds::default(),
            calculated_at: None,
        }
    }
}

impl CognitiveLoad {
    /// Compute the load from raw counts
    pub fn compute(context: usize, focus: usize, pending: usize, narrative: usize) -> Self {
        let components = LoadComponents {
            context: CONTEXT_WEIGHT * ratio(context, CONTEXT_CAP) / 10.0,
            focus: FOCUS_WEIGHT * ratio(focus, FOCUS_CAP) / 10.0,
            pending: PENDING_WEIGHT * ratio(pending, PENDING_CAP) / 10.0,
            narrative: NARRATIVE_WEIGHT * ratio(narrative, NARRATIVE_CAP) / 10.0,
        };
        let weighted = CONTEXT_WEIGHT * ratio(context, CONTEXT_CAP)
            + FOCUS_WEIGHT * ratio(focus, FOCUS_CAP)
            + PENDING_WEIGHT * ratio(pending, PENDING_CAP)
            + NARRATIVE_WEIGHT * ratio(narrative, NARRATIVE_CAP);
        let score = (weighted / 10.0).clamp(0.0, 1.0);
        let thresholds = LoadThresholds::default();

        Self {
            score,
            level: thresholds.level(score),
            components,
            thresholds,
            calculated_at: Some(Utc::now()),
        }
    }
}

/// Pure level lookup with the default thresholds
pub fn load_level(score: f64) -> LoadLevel {
    LoadThresholds::default().level(score)
}

fn ratio(count: usize, cap: usize) -> f64 {
    (count as f64 / cap as f64).min(1.0)
}
