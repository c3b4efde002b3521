//! Insight extraction
//!
//! Candidates are sampled from the transcript tail and the session narrative,
//! then pass through, in order: length and blocked-marker filters, truncation,
//! exact-duplicate check, knowledge novelty check, classification, and the
//! per-session cap. Survivors are staged; nothing here writes to a curated
//! document.

use super::classify::{InsightClassifier, KeywordClassifier};
use super::insight::{Insight, InsightBuilder, InsightSource};
use super::staging::InsightStaging;
use super::transcript;
use crate::config::InsightsConfig;
use crate::error::{Error, Result};
use crate::knowledge::Knowledge;
use crate::session::NarrativeEvent;
use crate::text::truncate_chars;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Narrative kinds that only record mechanics and never carry an insight
const MECHANICAL_KINDS: &[&str] = &["tool", "session", "compact"];

/// What to extract from
#[derive(Debug, Clone, Default)]
pub struct ExtractionInput {
    pub session_id: String,
    pub transcript: Option<PathBuf>,
    /// Narrative events, oldest first
    pub narrative: Vec<NarrativeEvent>,
}

/// Outcome counters for one extraction run
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub considered: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub known: usize,
    pub capped: usize,
    pub staged: Vec<Insight>,
}

impl std::fmt::Display for ExtractionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "considered {}, staged {}, filtered {}, duplicate {}, already known {}, over cap {}",
            self.considered,
            self.staged.len(),
            self.filtered,
            self.duplicates,
            self.known,
            self.capped
        )
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    source: InsightSource,
}

/// Extracts insight candidates and stages the novel ones
pub struct Extractor {
    config: InsightsConfig,
    knowledge: Knowledge,
    classifier: Arc<dyn InsightClassifier>,
}

impl Extractor {
    pub fn new(config: InsightsConfig, knowledge: Knowledge) -> Self {
        Self {
            config,
            knowledge,
            classifier: Arc::new(KeywordClassifier::default()),
        }
    }

    /// Replace the default keyword classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn InsightClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Length and marker filter plus truncation; `None` drops the candidate
    pub fn filter(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.chars().count() < self.config.min_length {
            return None;
        }
        if self.config.blocked_markers.iter().any(|m| text.contains(m.as_str())) {
            return None;
        }
        Some(truncate_chars(text, self.config.max_length))
    }

    /// Run extraction for one session and stage the survivors
    pub async fn extract(&self, staging: &InsightStaging, input: &ExtractionInput) -> Result<ExtractionReport> {
        if input.session_id.is_empty() {
            return Err(Error::InvalidInput("extraction requires a session id".to_string()));
        }

        let mut report = ExtractionReport::default();
        let already = staging.count_for_session(&input.session_id)?;
        let mut remaining = self.config.max_per_session.saturating_sub(already);

        let mut seen: HashSet<String> = staging
            .pending()?
            .into_iter()
            .map(|i| normalize(&i.content))
            .collect();

        for candidate in self.candidates(input) {
            report.considered += 1;

            let Some(content) = self.filter(&candidate.text) else {
                report.filtered += 1;
                continue;
            };
            if !seen.insert(normalize(&content)) {
                report.duplicates += 1;
                continue;
            }

            let similarity = self.knowledge.best_score(&content).await;
            if similarity >= self.config.novelty_threshold {
                report.known += 1;
                continue;
            }

            if remaining == 0 {
                report.capped += 1;
                continue;
            }

            let classification = self.classifier.classify(&content);
            let insight = InsightBuilder::new(classification.category)
                .content(content)
                .confidence(classification.confidence)
                .session_ref(&input.session_id)
                .source(candidate.source)
                .similarity(similarity)
                .build()?;
            staging.stage(&insight)?;
            remaining -= 1;
            report.staged.push(insight);
        }

        tracing::info!(
            session_id = %input.session_id,
            project = %staging.project(),
            classifier = self.classifier.name(),
            "Extraction finished: {}",
            report
        );
        Ok(report)
    }

    /// Transcript paragraphs then narrative descriptions, newest first
    fn candidates(&self, input: &ExtractionInput) -> Vec<Candidate> {
        let mut out = Vec::new();
        if let Some(path) = &input.transcript {
            match transcript::sample_paragraphs(path, self.config.sample_size) {
                Ok(paragraphs) => out.extend(paragraphs.into_iter().map(|text| Candidate {
                    text,
                    source: InsightSource::Transcript,
                })),
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Transcript unavailable"),
            }
        }
        out.extend(
            input
                .narrative
                .iter()
                .rev()
                .filter(|e| !MECHANICAL_KINDS.contains(&e.kind.as_str()))
                .take(self.config.sample_size)
                .map(|e| Candidate {
                    text: e.description.clone(),
                    source: InsightSource::Narrative,
                }),
        );
        out
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
