//! Human-gated insight promotion
//!
//! Accepted (or edited) insights are appended to a curated markdown document
//! chosen by category; rejected ones are only archived. The target document is
//! written before the staging entry is finalized, so a failed append leaves
//! the insight pending.

use super::insight::{Insight, InsightCategory, PromotionOutcome};
use super::staging::InsightStaging;
use crate::config::InsightTargets;
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Reviewer decision for one insight
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewAction {
    /// Append as-is, optionally to an overridden target
    Accept { target: Option<PathBuf> },
    /// Append replacement content, optionally to an overridden target
    Edit { content: String, target: Option<PathBuf> },
    /// Leave pending
    Skip,
    /// Archive without touching any document
    Reject,
}

/// Result of a terminal review action
#[derive(Debug, Clone)]
pub struct Promotion {
    pub insight: Insight,
    pub outcome: PromotionOutcome,
    /// Document appended to; `None` for rejections
    pub target: Option<PathBuf>,
}

/// Pending counts and previews
#[derive(Debug, Clone, Default)]
pub struct PromotionSummary {
    pub counts: BTreeMap<InsightCategory, usize>,
    pub pending: Vec<Insight>,
}

impl std::fmt::Display for PromotionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.pending.is_empty() {
            return write!(f, "No pending insights.");
        }
        let counts: Vec<String> = InsightCategory::all()
            .iter()
            .map(|c| format!("{}: {}", c, self.counts.get(c).copied().unwrap_or(0)))
            .collect();
        write!(f, "{} pending ({})", self.pending.len(), counts.join(", "))?;
        for insight in &self.pending {
            write!(
                f,
                "\n  {} [{}] {:.2}  {}",
                insight.id,
                insight.category,
                insight.confidence,
                crate::text::preview(&insight.content, 70)
            )?;
        }
        Ok(())
    }
}

/// Unattended promotion outcome
#[derive(Debug, Clone, Default)]
pub struct AutoReport {
    pub accepted: Vec<Promotion>,
    pub below_threshold: usize,
}

/// Interactive session outcome
#[derive(Debug, Clone, Default)]
pub struct ReviewReport {
    pub accepted: usize,
    pub edited: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// Promotes staged insights into curated project documents
pub struct Promoter {
    staging: InsightStaging,
    project_root: PathBuf,
    targets: InsightTargets,
}

impl Promoter {
    pub fn new(staging: InsightStaging, project_root: impl Into<PathBuf>, targets: InsightTargets) -> Self {
        Self {
            staging,
            project_root: project_root.into(),
            targets,
        }
    }

    pub fn staging(&self) -> &InsightStaging {
        &self.staging
    }

    /// Counts per category plus every pending record
    pub fn summary(&self) -> Result<PromotionSummary> {
        let pending = self.staging.pending()?;
        let mut counts = BTreeMap::new();
        for insight in &pending {
            *counts.entry(insight.category).or_insert(0) += 1;
        }
        Ok(PromotionSummary { counts, pending })
    }

    /// Default target document for a category
    pub fn suggested_target(&self, category: InsightCategory) -> PathBuf {
        let relative = match category {
            InsightCategory::Decision => &self.targets.decision,
            InsightCategory::Pattern => &self.targets.pattern,
            InsightCategory::Gotcha => &self.targets.gotcha,
        };
        self.resolve(relative)
    }

    /// Apply one review action; `None` for skips
    pub fn apply(&self, id: &str, action: ReviewAction) -> Result<Option<Promotion>> {
        match action {
            ReviewAction::Accept { target } => self.promote(id, None, target).map(Some),
            ReviewAction::Edit { content, target } => {
                if content.trim().is_empty() {
                    return Err(Error::InvalidInput("edited content is empty".to_string()));
                }
                self.promote(id, Some(content), target).map(Some)
            }
            ReviewAction::Skip => {
                // Surfaces unknown ids even when nothing changes
                self.staging.load(id)?;
                Ok(None)
            }
            ReviewAction::Reject => {
                let insight = self.staging.finalize(id, PromotionOutcome::Rejected, None, None)?;
                Ok(Some(Promotion {
                    insight,
                    outcome: PromotionOutcome::Rejected,
                    target: None,
                }))
            }
        }
    }

    /// Accept every pending insight whose stored confidence reaches `min_confidence`
    pub fn auto(&self, min_confidence: f32) -> Result<AutoReport> {
        let mut report = AutoReport::default();
        for insight in self.staging.pending()? {
            if insight.confidence >= min_confidence {
                report.accepted.push(self.promote(&insight.id, None, None)?);
            } else {
                report.below_threshold += 1;
            }
        }
        tracing::info!(
            project = %self.staging.project(),
            accepted = report.accepted.len(),
            below_threshold = report.below_threshold,
            "Auto promotion finished"
        );
        Ok(report)
    }

    /// Line-oriented review loop over every pending insight.
    ///
    /// Commands: `a` accept, `e` edit (next line is the replacement text),
    /// `t <path>` accept into another document, `s` skip, `r` reject,
    /// `q` quit. End of input also quits.
    pub fn review<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> Result<ReviewReport> {
        let mut report = ReviewReport::default();
        let pending = self.staging.pending()?;
        let total = pending.len();

        'insights: for (n, insight) in pending.into_iter().enumerate() {
            writeln!(
                output,
                "\n[{}/{}] {} ({}, confidence {:.2}, session {})\n{}\nsuggested target: {}",
                n + 1,
                total,
                insight.id,
                insight.category,
                insight.confidence,
                insight.session_ref,
                insight.content,
                self.suggested_target(insight.category).display()
            )?;

            loop {
                write!(output, "[a]ccept [e]dit [t]arget <path> [s]kip [r]eject [q]uit > ")?;
                output.flush()?;
                let Some(line) = read_line(&mut input)? else {
                    break 'insights;
                };
                let (command, arg) = match line.split_once(' ') {
                    Some((c, a)) => (c, a.trim()),
                    None => (line.as_str(), ""),
                };

                let action = match command {
                    "a" | "accept" => ReviewAction::Accept { target: None },
                    "e" | "edit" => {
                        write!(output, "new content > ")?;
                        output.flush()?;
                        let Some(content) = read_line(&mut input)? else {
                            break 'insights;
                        };
                        ReviewAction::Edit { content, target: None }
                    }
                    "t" | "target" if !arg.is_empty() => ReviewAction::Accept {
                        target: Some(PathBuf::from(arg)),
                    },
                    "s" | "skip" => ReviewAction::Skip,
                    "r" | "reject" => ReviewAction::Reject,
                    "q" | "quit" => break 'insights,
                    _ => {
                        writeln!(output, "unrecognized command: {}", line)?;
                        continue;
                    }
                };

                match self.apply(&insight.id, action) {
                    Ok(Some(promotion)) => {
                        match promotion.outcome {
                            PromotionOutcome::Accepted => report.accepted += 1,
                            PromotionOutcome::Edited => report.edited += 1,
                            PromotionOutcome::Rejected => report.rejected += 1,
                        }
                        match &promotion.target {
                            Some(target) => writeln!(output, "appended to {}", target.display())?,
                            None => writeln!(output, "rejected")?,
                        }
                    }
                    Ok(None) => report.skipped += 1,
                    Err(Error::InvalidInput(msg)) => {
                        writeln!(output, "{}", msg)?;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
                break;
            }
        }
        Ok(report)
    }

    fn promote(&self, id: &str, content: Option<String>, target: Option<PathBuf>) -> Result<Promotion> {
        let mut insight = self.staging.load(id)?;
        if insight.promoted {
            return Err(Error::InvalidInput(format!("insight {} was already reviewed", id)));
        }
        let outcome = if content.is_some() {
            PromotionOutcome::Edited
        } else {
            PromotionOutcome::Accepted
        };
        if let Some(content) = &content {
            insight.content = content.trim().to_string();
        }

        let target = match target {
            Some(t) => self.resolve(&t),
            None => self.suggested_target(insight.category),
        };
        append_entry(&target, &insight)?;

        let insight = self
            .staging
            .finalize(id, outcome, content.as_deref().map(str::trim), Some(&target))?;
        tracing::info!(id = %id, target = %target.display(), "Insight promoted");
        Ok(Promotion {
            insight,
            outcome,
            target: Some(target),
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

/// Append a promoted insight with an attribution header
fn append_entry(target: &Path, insight: &Insight) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let is_new = !target.exists();
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(target)?;
    if is_new {
        writeln!(file, "# {}s", insight.category.title())?;
    }
    write!(file, "{}", render_entry(insight))?;
    Ok(())
}

fn render_entry(insight: &Insight) -> String {
    format!(
        "\n## {}: {}\n\n> Promoted {} from session `{}` (confidence {:.2})\n\n{}\n",
        insight.category.title(),
        crate::text::preview(&insight.content, 60),
        Utc::now().format("%Y-%m-%d"),
        insight.session_ref,
        insight.confidence,
        insight.content.trim()
    )
}

fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::insight::InsightBuilder;

    struct Fixture {
        _dir: tempfile::TempDir,
        project: PathBuf,
        promoter: Promoter,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let staging = InsightStaging::new(&dir.path().join("store"), "project");
        let promoter = Promoter::new(staging, &project, InsightTargets::default());
        Fixture {
            _dir: dir,
            project,
            promoter,
        }
    }

    fn stage(promoter: &Promoter, category: InsightCategory, content: &str, confidence: f32) -> String {
        let insight = InsightBuilder::new(category)
            .content(content)
            .confidence(confidence)
            .session_ref("s1")
            .build()
            .unwrap();
        promoter.staging().stage(&insight).unwrap();
        insight.id
    }

    #[test]
    fn test_summary_counts_by_category() {
        let f = fixture();
        stage(&f.promoter, InsightCategory::Decision, "chose sqlite for local state", 0.7);
        stage(&f.promoter, InsightCategory::Gotcha, "careful with stale lock files", 0.6);
        stage(&f.promoter, InsightCategory::Gotcha, "never rename across filesystems", 0.6);

        let summary = f.promoter.summary().unwrap();
        assert_eq!(summary.pending.len(), 3);
        assert_eq!(summary.counts[&InsightCategory::Gotcha], 2);
        assert!(summary.to_string().starts_with("3 pending (decision: 1, pattern: 0, gotcha: 2)"));
    }

    #[test]
    fn test_accept_appends_and_archives() {
        let f = fixture();
        let id = stage(&f.promoter, InsightCategory::Decision, "We chose tokio for the runtime", 0.7);

        let promotion = f
            .promoter
            .apply(&id, ReviewAction::Accept { target: None })
            .unwrap()
            .unwrap();
        let target = f.project.join("docs/decisions.md");
        assert_eq!(promotion.target.as_deref(), Some(target.as_path()));

        let doc = std::fs::read_to_string(&target).unwrap();
        assert!(doc.starts_with("# Decisions\n"));
        assert!(doc.contains("## Decision: We chose tokio for the runtime"));
        assert!(doc.contains("from session `s1`"));

        let index = f.promoter.staging().index().unwrap();
        let entry = index.get(&id).unwrap();
        assert!(entry.promoted);
        assert_eq!(entry.outcome, Some(PromotionOutcome::Accepted));
        assert!(f.promoter.staging().pending().unwrap().is_empty());
    }

    #[test]
    fn test_reject_archives_without_touching_targets() {
        let f = fixture();
        let id = stage(&f.promoter, InsightCategory::Gotcha, "careful with stale lock files", 0.6);

        let promotion = f.promoter.apply(&id, ReviewAction::Reject).unwrap().unwrap();
        assert_eq!(promotion.outcome, PromotionOutcome::Rejected);
        assert!(!f.project.join("docs").exists());
        assert_eq!(
            f.promoter.staging().index().unwrap().get(&id).unwrap().outcome,
            Some(PromotionOutcome::Rejected)
        );
    }

    #[test]
    fn test_edit_with_target_override() {
        let f = fixture();
        let id = stage(&f.promoter, InsightCategory::Pattern, "prefer builders for optional fields", 0.6);

        let promotion = f
            .promoter
            .apply(
                &id,
                ReviewAction::Edit {
                    content: "Use builders when a type has many optional fields".to_string(),
                    target: Some(PathBuf::from("NOTES.md")),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(promotion.outcome, PromotionOutcome::Edited);
        let doc = std::fs::read_to_string(f.project.join("NOTES.md")).unwrap();
        assert!(doc.contains("Use builders when a type has many optional fields"));
        assert!(!doc.contains("prefer builders"));
        assert!(!f.project.join("docs/patterns.md").exists());
    }

    #[test]
    fn test_skip_and_unknown_ids() {
        let f = fixture();
        let id = stage(&f.promoter, InsightCategory::Pattern, "prefer builders for optional fields", 0.6);
        assert!(f.promoter.apply(&id, ReviewAction::Skip).unwrap().is_none());
        assert_eq!(f.promoter.staging().pending().unwrap().len(), 1);
        assert!(matches!(
            f.promoter.apply("ins-nope", ReviewAction::Reject),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_auto_respects_confidence() {
        let f = fixture();
        stage(&f.promoter, InsightCategory::Decision, "decided to pin the toolchain", 0.8);
        stage(&f.promoter, InsightCategory::Pattern, "the handlers return early", 0.4);

        let report = f.promoter.auto(0.75).unwrap();
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.below_threshold, 1);
        assert_eq!(f.promoter.staging().pending().unwrap().len(), 1);
        assert!(f.project.join("docs/decisions.md").exists());
    }

    #[test]
    fn test_interactive_review() {
        let f = fixture();
        stage(&f.promoter, InsightCategory::Decision, "chose sqlite for local state", 0.7);
        stage(&f.promoter, InsightCategory::Gotcha, "careful with stale lock files", 0.6);
        stage(&f.promoter, InsightCategory::Pattern, "the handlers return early", 0.4);

        let input = b"x\na\nr\ns\n" as &[u8];
        let mut output = Vec::new();
        let report = f.promoter.review(input, &mut output).unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.skipped, 1);
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("unrecognized command: x"));
        assert!(text.contains("[1/3]"));
        assert_eq!(f.promoter.staging().pending().unwrap().len(), 1);
    }

    #[test]
    fn test_interactive_edit_and_eof() {
        let f = fixture();
        stage(&f.promoter, InsightCategory::Decision, "chose sqlite for local state", 0.7);
        stage(&f.promoter, InsightCategory::Gotcha, "careful with stale lock files", 0.6);

        let input = b"e\nSQLite holds all local state\n" as &[u8];
        let report = f.promoter.review(input, Vec::new()).unwrap();
        assert_eq!(report.edited, 1);
        assert_eq!(report.skipped, 0);

        let doc = std::fs::read_to_string(f.project.join("docs/decisions.md")).unwrap();
        assert!(doc.contains("SQLite holds all local state"));
    }
}
