//! Staged insight data types
//!
//! An `Insight` is a candidate piece of durable knowledge pulled out of a
//! session. It stays staged until an operator (or the unattended auto mode)
//! promotes it into a curated document or rejects it.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Insight category; decides the target document on promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    /// A choice that was made, with its reason
    Decision,
    /// A recurring approach or convention
    Pattern,
    /// A pitfall or surprising behavior
    Gotcha,
}

impl InsightCategory {
    pub fn all() -> &'static [InsightCategory] {
        &[Self::Decision, Self::Pattern, Self::Gotcha]
    }

    /// Directory name inside the staging area
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Gotcha => "gotcha",
        }
    }

    /// Heading used in curated documents
    pub fn title(self) -> &'static str {
        match self {
            Self::Decision => "Decision",
            Self::Pattern => "Pattern",
            Self::Gotcha => "Gotcha",
        }
    }
}

impl std::fmt::Display for InsightCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl std::str::FromStr for InsightCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "decision" => Ok(Self::Decision),
            "pattern" => Ok(Self::Pattern),
            "gotcha" => Ok(Self::Gotcha),
            other => Err(Error::InvalidInput(format!("unknown insight category: {}", other))),
        }
    }
}

/// Where a candidate was sampled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    #[default]
    Transcript,
    Narrative,
}

/// A staged insight record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub category: InsightCategory,
    /// Truncated candidate text
    pub content: String,
    /// Classifier confidence (0.0-1.0)
    pub confidence: f32,
    /// Session the insight was extracted from
    pub session_ref: String,
    pub timestamp: DateTime<Utc>,
    pub promoted: bool,
    #[serde(default)]
    pub source: InsightSource,
    /// Best similarity against existing knowledge at extraction time
    #[serde(default)]
    pub similarity: f32,
}

/// Terminal review outcome recorded in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionOutcome {
    Accepted,
    Edited,
    Rejected,
}

/// One row of the insight index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub category: InsightCategory,
    pub preview: String,
    pub confidence: f32,
    pub session_ref: String,
    pub timestamp: DateTime<Utc>,
    pub promoted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PromotionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl IndexEntry {
    pub fn from_insight(insight: &Insight) -> Self {
        Self {
            id: insight.id.clone(),
            category: insight.category,
            preview: crate::text::preview(&insight.content, 80),
            confidence: insight.confidence,
            session_ref: insight.session_ref.clone(),
            timestamp: insight.timestamp,
            promoted: insight.promoted,
            outcome: None,
            promoted_at: None,
            target: None,
        }
    }
}

/// Append-only index of every insight staged for a project
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InsightIndex {
    pub entries: Vec<IndexEntry>,
}

impl InsightIndex {
    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter().filter(|e| !e.promoted)
    }

    pub fn count_for_session(&self, session_id: &str) -> usize {
        self.entries.iter().filter(|e| e.session_ref == session_id).count()
    }
}

/// Builder for constructing `Insight` instances
pub struct InsightBuilder {
    category: InsightCategory,
    content: Option<String>,
    confidence: f32,
    session_ref: Option<String>,
    source: InsightSource,
    similarity: f32,
}

impl InsightBuilder {
    /// Create a new builder with the required category
    pub fn new(category: InsightCategory) -> Self {
        Self {
            category,
            content: None,
            confidence: 0.0,
            session_ref: None,
            source: InsightSource::Transcript,
            similarity: 0.0,
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the confidence score (clamped to 0.0-1.0)
    pub fn confidence(mut self, score: f32) -> Self {
        self.confidence = score.clamp(0.0, 1.0);
        self
    }

    pub fn session_ref(mut self, session_id: impl Into<String>) -> Self {
        self.session_ref = Some(session_id.into());
        self
    }

    pub fn source(mut self, source: InsightSource) -> Self {
        self.source = source;
        self
    }

    /// Set the similarity score (clamped to 0.0-1.0)
    pub fn similarity(mut self, score: f32) -> Self {
        self.similarity = score.clamp(0.0, 1.0);
        self
    }

    /// Build the insight, returning an error if content or session is missing
    pub fn build(self) -> Result<Insight> {
        let content = self
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::InvalidInput("insight content is required".to_string()))?;
        let session_ref = self
            .session_ref
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput("insight session reference is required".to_string()))?;

        Ok(Insight {
            id: format!("ins-{}", uuid::Uuid::new_v4().simple()),
            category: self.category,
            content,
            confidence: self.confidence,
            session_ref,
            timestamp: Utc::now(),
            promoted: false,
            source: self.source,
            similarity: self.similarity,
        })
    }
}
