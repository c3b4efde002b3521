//! Insight pipeline
//!
//! Extraction turns session output into staged insight records; promotion is
//! the human-gated step that moves them into curated project documents.

mod classify;
mod extractor;
mod insight;
mod promote;
mod staging;
mod transcript;

pub use classify::{Classification, InsightClassifier, KeywordClassifier, FALLBACK_CONFIDENCE};
pub use extractor::{ExtractionInput, ExtractionReport, Extractor};
pub use insight::{
    IndexEntry, Insight, InsightBuilder, InsightCategory, InsightIndex, InsightSource,
    PromotionOutcome,
};
pub use promote::{AutoReport, Promoter, Promotion, PromotionSummary, ReviewAction, ReviewReport};
pub use staging::InsightStaging;
pub use transcript::sample_paragraphs;

/// Version of the on-disk insight layout
pub const LAYOUT_VERSION: u32 = 1;
