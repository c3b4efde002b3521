//! Pluggable insight classification
//!
//! `InsightClassifier` is the seam for swapping strategies (e.g. a learned
//! model). `KeywordClassifier` is the rule-based default: cue lists are
//! checked in precedence order decision → gotcha → pattern, and text that
//! matches no cue falls back to `Pattern` with low confidence.

use super::insight::InsightCategory;
use crate::error::{Error, Result};
use regex::Regex;

/// Output of a classifier
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: InsightCategory,
    pub confidence: f32,
    /// Cues that matched (empty for the default fallback)
    pub matched: Vec<String>,
}

/// Insight classification strategy
pub trait InsightClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Classification;

    /// Human-readable name for this strategy (used in logs)
    fn name(&self) -> &str;
}

const DECISION_CUES: &[&str] = &[
    "decided",
    "decision",
    "chose",
    "chosen",
    "opted",
    "went with",
    "going with",
    "settled on",
    "instead of",
    "trade-off",
    "tradeoff",
    "we will use",
];

const GOTCHA_CUES: &[&str] = &[
    "gotcha",
    "careful",
    "watch out",
    "pitfall",
    "caveat",
    "beware",
    "workaround",
    "footgun",
    "fails when",
    "breaks when",
    "doesn't work",
    "does not work",
    "must not",
    "never",
    "bug",
];

const PATTERN_CUES: &[&str] = &[
    "pattern",
    "convention",
    "always",
    "prefer",
    "idiom",
    "approach",
    "best practice",
    "consistently",
    "rule of thumb",
];

/// Confidence for text that matched no cue
pub const FALLBACK_CONFIDENCE: f32 = 0.4;
const BASE_CONFIDENCE: f32 = 0.6;
const PER_EXTRA_CUE: f32 = 0.1;
const MAX_CONFIDENCE: f32 = 0.9;

struct CueRule {
    category: InsightCategory,
    cues: Vec<(String, Regex)>,
}

/// Rule-based keyword classifier
pub struct KeywordClassifier {
    rules: Vec<CueRule>,
}

impl KeywordClassifier {
    /// Build from cue lists, checked in the order given
    pub fn new(rules: Vec<(InsightCategory, Vec<String>)>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|(category, cues)| {
                let cues = cues
                    .into_iter()
                    .map(|cue| {
                        let pattern = format!(r"(?i)\b{}\b", regex::escape(&cue));
                        Regex::new(&pattern)
                            .map(|re| (cue.clone(), re))
                            .map_err(|e| Error::Config(format!("invalid cue '{}': {}", cue, e)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CueRule { category, cues })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Built-in cue lists
    pub fn with_default_cues() -> Self {
        let owned = |cues: &[&str]| cues.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        // Built-in cues are plain words; escaping makes every pattern valid.
        Self::new(vec![
            (InsightCategory::Decision, owned(DECISION_CUES)),
            (InsightCategory::Gotcha, owned(GOTCHA_CUES)),
            (InsightCategory::Pattern, owned(PATTERN_CUES)),
        ])
        .unwrap_or(Self { rules: Vec::new() })
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::with_default_cues()
    }
}

impl InsightClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Classification {
        for rule in &self.rules {
            let matched: Vec<String> = rule
                .cues
                .iter()
                .filter(|(_, re)| re.is_match(text))
                .map(|(cue, _)| cue.clone())
                .collect();
            if !matched.is_empty() {
                let extra = (matched.len() - 1) as f32 * PER_EXTRA_CUE;
                return Classification {
                    category: rule.category,
                    confidence: (BASE_CONFIDENCE + extra).min(MAX_CONFIDENCE),
                    matched,
                };
            }
        }
        Classification {
            category: InsightCategory::Pattern,
            confidence: FALLBACK_CONFIDENCE,
            matched: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        "keyword"
    }
}
