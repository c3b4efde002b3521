//! Cognitive dispatcher
//!
//! Maps each host event to one cognitive function:
//!
//! | event           | function  | effect                                          |
//! |-----------------|-----------|-------------------------------------------------|
//! | `session_start` | ORIENT    | init/resume session, sweep stale state, recall  |
//! | `user_prompt`   | PERCEIVE  | consume primer, record intent, recall           |
//! | `pre_action`    | ATTEND    | surface related knowledge at decision points    |
//! | `post_action`   | ENCODE    | narrative, counters, relations, load            |
//! | `permission`    | DECIDE    | risk-tier verdict, record decision              |
//! | `subagent_done` | INTEGRATE | summarize large results into shared context     |
//! | `pre_compact`   | HOLD      | write the recovery primer                       |
//! | `session_end`   | REFLECT   | summary, repo warnings, extraction, delete      |
//!
//! `dispatch` never fails: every error degrades to a neutral `continue`.

use super::cache::AttentionCache;
use super::envelope::{
    ActionEvent, ActionResultEvent, CompactEvent, EventKind, HookEnvelope, HookEvent,
    PermissionEvent, RiskTier, SessionEndEvent, SessionStartEvent, SubagentEvent, UserPromptEvent,
};
use super::git;
use super::response::{HookResponse, PermissionDecision};
use super::worker::BackgroundPool;
use crate::config::{CogmemConfig, DecidePolicy};
use crate::error::{Error, Result};
use crate::insights::{ExtractionInput, Extractor, InsightStaging};
use crate::knowledge::{render_hits, Knowledge, QueryHit, RelationKind};
use crate::primer::{Primer, PrimerStore};
use crate::session::{ContextItem, Decision, LoadLevel, SessionState, SessionStore};
use crate::text::{preview, truncate_chars};
use regex::Regex;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Longest intent stored from a prompt
const MAX_INTENT_CHARS: usize = 500;
/// Confidence bonus when a similar prior operation is known
const SIMILAR_BONUS: f64 = 0.15;

/// The eight cognitive functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Orient,
    Perceive,
    Attend,
    Encode,
    Decide,
    Integrate,
    Hold,
    Reflect,
}

impl Function {
    pub fn all() -> &'static [Function] {
        &[
            Self::Orient,
            Self::Perceive,
            Self::Attend,
            Self::Encode,
            Self::Decide,
            Self::Integrate,
            Self::Hold,
            Self::Reflect,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Orient => "orient",
            Self::Perceive => "perceive",
            Self::Attend => "attend",
            Self::Encode => "encode",
            Self::Decide => "decide",
            Self::Integrate => "integrate",
            Self::Hold => "hold",
            Self::Reflect => "reflect",
        }
    }

    /// Event shape the function consumes
    pub fn event_kind(self) -> EventKind {
        match self {
            Self::Orient => EventKind::SessionStart,
            Self::Perceive => EventKind::UserPrompt,
            Self::Attend => EventKind::PreAction,
            Self::Encode => EventKind::PostAction,
            Self::Decide => EventKind::Permission,
            Self::Integrate => EventKind::SubagentDone,
            Self::Hold => EventKind::PreCompact,
            Self::Reflect => EventKind::SessionEnd,
        }
    }

    pub fn for_event(kind: EventKind) -> Self {
        match kind {
            EventKind::SessionStart => Self::Orient,
            EventKind::UserPrompt => Self::Perceive,
            EventKind::PreAction => Self::Attend,
            EventKind::PostAction => Self::Encode,
            EventKind::Permission => Self::Decide,
            EventKind::SubagentDone => Self::Integrate,
            EventKind::PreCompact => Self::Hold,
            EventKind::SessionEnd => Self::Reflect,
        }
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Function {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|f| f.name() == lower)
            .ok_or_else(|| Error::InvalidInput(format!("unknown function: {}", s)))
    }
}

/// Per-invocation identity resolved from the envelope
#[derive(Debug, Clone)]
struct Ctx {
    session_id: String,
    cwd: PathBuf,
    project: String,
    transcript: Option<PathBuf>,
}

impl Ctx {
    fn from_envelope(envelope: &HookEnvelope) -> Self {
        Self {
            session_id: envelope.session_id.clone(),
            cwd: envelope.cwd.clone(),
            project: envelope.project_name(),
            transcript: envelope.transcript_path.clone(),
        }
    }

    /// Path relative to the working directory when possible
    fn relative(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(&self.cwd)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string())
    }

    fn absolute(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// Routes host events to the cognitive functions
pub struct Dispatcher {
    config: CogmemConfig,
    root: PathBuf,
    sessions: SessionStore,
    primers: PrimerStore,
    knowledge: Knowledge,
    cache: AttentionCache,
    pool: BackgroundPool,
    decision_keywords: Option<Regex>,
}

impl Dispatcher {
    /// Build a dispatcher with the configured knowledge backend
    pub fn new(config: CogmemConfig, root: impl Into<PathBuf>) -> Result<Self> {
        let knowledge = Knowledge::from_config(&config.knowledge)?;
        Self::with_knowledge(config, root, knowledge)
    }

    pub fn with_knowledge(config: CogmemConfig, root: impl Into<PathBuf>, knowledge: Knowledge) -> Result<Self> {
        let root = root.into();
        let decision_keywords = keyword_regex(&config.attend.decision_keywords)?;
        Ok(Self {
            sessions: SessionStore::new(&root, &config.store),
            primers: PrimerStore::new(&root, &config.primer),
            cache: AttentionCache::new(&root, config.attend.cache_ttl_minutes),
            pool: BackgroundPool::new(config.attend.max_background_tasks),
            knowledge,
            decision_keywords,
            root,
            config,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn primers(&self) -> &PrimerStore {
        &self.primers
    }

    pub fn knowledge(&self) -> &Knowledge {
        &self.knowledge
    }

    pub fn pool(&self) -> &BackgroundPool {
        &self.pool
    }

    /// Dispatch, write the response line to `out`, then wait for background
    /// work. The host sees the response before any background task is awaited.
    pub async fn respond<W: Write>(
        &self,
        envelope: &HookEnvelope,
        out: &mut W,
        drain_timeout: Duration,
    ) -> Result<HookResponse> {
        let response = self.dispatch(envelope).await;
        writeln!(out, "{}", response.to_json())?;
        out.flush()?;
        self.pool.drain_with_timeout(drain_timeout).await;
        Ok(response)
    }

    /// Run the function for the envelope's event. Never fails.
    pub async fn dispatch(&self, envelope: &HookEnvelope) -> HookResponse {
        let function = Function::for_event(envelope.event.kind());
        let ctx = Ctx::from_envelope(envelope);
        let started = Instant::now();

        let result = match &envelope.event {
            HookEvent::SessionStart(ev) => self.orient(&ctx, ev).await,
            HookEvent::UserPrompt(ev) => self.perceive(&ctx, ev).await,
            HookEvent::PreAction(ev) => self.attend(&ctx, ev).await,
            HookEvent::PostAction(ev) => self.encode(&ctx, ev).await,
            HookEvent::Permission(ev) => self.decide(&ctx, ev).await,
            HookEvent::SubagentDone(ev) => self.integrate(&ctx, ev).await,
            HookEvent::PreCompact(ev) => self.hold(&ctx, ev).await,
            HookEvent::SessionEnd(ev) => self.reflect(&ctx, ev).await,
        };

        match result {
            Ok(response) => {
                tracing::debug!(
                    function = %function,
                    session_id = %ctx.session_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Dispatched"
                );
                response
            }
            Err(e) if e.is_recoverable() => {
                tracing::debug!(function = %function, session_id = %ctx.session_id, error = %e, "Degraded to continue");
                HookResponse::continue_()
            }
            Err(e @ (Error::InvalidInput(_) | Error::Validation(_))) => {
                tracing::debug!(function = %function, session_id = %ctx.session_id, error = %e, "Rejected input");
                HookResponse::continue_()
            }
            Err(e) => {
                tracing::warn!(function = %function, session_id = %ctx.session_id, error = %e, "Function failed");
                HookResponse::continue_()
            }
        }
    }

    // =========================================================================
    // ORIENT
    // =========================================================================

    async fn orient(&self, ctx: &Ctx, ev: &SessionStartEvent) -> Result<HookResponse> {
        let source = ev.source.as_deref().unwrap_or("startup");
        let resumed = self.sessions.exists(&ctx.session_id);
        if !resumed {
            self.sessions.init(&ctx.session_id, &ctx.cwd, &ctx.project)?;
        }
        let verb = if resumed { "resumed" } else { "started" };
        self.sessions
            .add_narrative(&ctx.session_id, "session", &format!("Session {} ({})", verb, source))?;
        tracing::info!(session_id = %ctx.session_id, project = %ctx.project, source, resumed, "Session oriented");

        self.sweep();

        let mut parts = Vec::new();
        if resumed {
            let state = self.sessions.load(&ctx.session_id)?;
            if let Some(intent) = &state.working_memory.current_intent {
                parts.push(format!("[cogmem] Resuming session; last intent: {}", intent));
            }
        }
        match self.primers.peek(&ctx.project) {
            Ok(Some(primer)) => parts.push(format!(
                "[cogmem] A recovery primer from session {} is waiting and will be merged with the next prompt.",
                primer.session_id
            )),
            Ok(None) => {}
            Err(e) => tracing::debug!(project = %ctx.project, error = %e, "Primer unreadable"),
        }

        let hits = self.related(&format!("{} recent work", ctx.project)).await;
        parts.extend(render_hits(&format!("Recent context for {}", ctx.project), &hits));
        Ok(HookResponse::from_parts(parts))
    }

    /// Opportunistic cleanup of abandoned sessions and stale primers
    fn sweep(&self) {
        let max_age = Duration::from_secs(self.config.store.session_max_age_hours * 3600);
        match self.sessions.cleanup(max_age) {
            Ok(0) => {}
            Ok(n) => tracing::info!(removed = n, "Removed stale session files"),
            Err(e) => tracing::debug!(error = %e, "Session cleanup failed"),
        }
        match self.primers.cleanup() {
            Ok(0) => {}
            Ok(n) => tracing::info!(removed = n, "Removed stale primers"),
            Err(e) => tracing::debug!(error = %e, "Primer cleanup failed"),
        }
    }

    // =========================================================================
    // PERCEIVE
    // =========================================================================

    async fn perceive(&self, ctx: &Ctx, ev: &UserPromptEvent) -> Result<HookResponse> {
        self.ensure_session(ctx)?;
        let mut parts = Vec::new();

        // A claimed primer is gone from disk, so it must reach the host
        // whatever happens to the session writes below.
        let primer = match self.primers.take(&ctx.project) {
            Ok(primer) => primer,
            Err(e) => {
                tracing::warn!(project = %ctx.project, error = %e, "Failed to consume primer");
                None
            }
        };
        if let Some(primer) = &primer {
            parts.push(primer.render());
            tracing::info!(project = %ctx.project, from_session = %primer.session_id, "Primer consumed");
            let item = ContextItem::new("primer", primer.task_context.clone()).with_source(primer.session_id.clone());
            if let Err(e) = self.sessions.add_context(&ctx.session_id, item) {
                tracing::debug!(session_id = %ctx.session_id, error = %e, "Primer not added to context");
            }
        }

        match self.record_prompt(ctx, ev.prompt.trim(), &mut parts).await {
            Ok(()) => {}
            Err(e) if primer.is_some() => {
                tracing::debug!(session_id = %ctx.session_id, error = %e, "Prompt not recorded");
            }
            Err(e) => return Err(e),
        }
        Ok(HookResponse::from_parts(parts))
    }

    async fn record_prompt(&self, ctx: &Ctx, prompt: &str, parts: &mut Vec<String>) -> Result<()> {
        if prompt.is_empty() {
            return Ok(());
        }
        self.sessions
            .update_intent(&ctx.session_id, &truncate_chars(prompt, MAX_INTENT_CHARS))?;
        self.sessions
            .add_narrative(&ctx.session_id, "prompt", &preview(prompt, 160))?;

        let hits = self.related(prompt).await;
        parts.extend(render_hits("Related knowledge", &hits));

        let load = self.sessions.calculate_load(&ctx.session_id)?;
        if load.level >= LoadLevel::High {
            parts.push(format!(
                "[cogmem] Cognitive load is {} ({:.2}); consider closing pending items before starting new work.",
                load.level, load.score
            ));
        }
        Ok(())
    }

    // =========================================================================
    // ATTEND
    // =========================================================================

    async fn attend(&self, ctx: &Ctx, ev: &ActionEvent) -> Result<HookResponse> {
        let target = tool_target(&ev.tool_input);
        let Some(query) = self.attention_query(ctx, ev, target.as_deref()) else {
            return Ok(HookResponse::continue_());
        };

        if let Some(target) = &target {
            if let Err(e) = self.sessions.update_focus(&ctx.session_id, &ctx.relative(target)) {
                tracing::debug!(session_id = %ctx.session_id, error = %e, "Focus not updated");
            }
        }

        let hits = match self.cache.get(&ev.tool_name, &query) {
            Some(hits) => hits,
            None => match self.knowledge.query(&query, self.config.knowledge.query_limit).await {
                Ok(hits) => {
                    if let Err(e) = self.cache.put(&ev.tool_name, &query, &hits) {
                        tracing::debug!(error = %e, "Attention cache not written");
                    }
                    hits
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Attention lookup unavailable");
                    Vec::new()
                }
            },
        };

        self.annotate(ctx, ev, target.as_deref());

        let best = hits
            .iter()
            .filter(|h| h.score >= self.config.knowledge.min_score)
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(match best {
            Some(hit) => {
                let mut line = format!(
                    "[cogmem] Before {} {}: related \"{}\" ({:.2})",
                    ev.tool_name,
                    target.as_deref().map(|t| ctx.relative(t)).unwrap_or_default(),
                    hit.title,
                    hit.score
                );
                if !hit.snippet.is_empty() {
                    line.push_str(&format!(": {}", preview(&hit.snippet, 200)));
                }
                HookResponse::with_context(line)
            }
            None => HookResponse::continue_(),
        })
    }

    /// Query text when the action is a decision point, `None` otherwise
    fn attention_query(&self, ctx: &Ctx, ev: &ActionEvent, target: Option<&str>) -> Option<String> {
        let attend = &self.config.attend;
        if attend.edit_tools.iter().any(|t| t == &ev.tool_name) {
            return Some(
                target
                    .map(|t| ctx.relative(t))
                    .unwrap_or_else(|| ev.tool_name.clone()),
            );
        }
        if !attend.shell_tools.iter().any(|t| t == &ev.tool_name) {
            return None;
        }

        let keywords = self.decision_keywords.as_ref()?;
        let command = ev.tool_input.get("command").and_then(Value::as_str).unwrap_or("");
        if keywords.is_match(command) {
            return Some(command.to_string());
        }
        let intent = self
            .sessions
            .load(&ctx.session_id)
            .ok()
            .and_then(|s| s.working_memory.current_intent)?;
        keywords
            .is_match(&intent)
            .then(|| if command.is_empty() { intent } else { command.to_string() })
    }

    /// Record the upcoming action in the knowledge store, off the response path
    fn annotate(&self, ctx: &Ctx, ev: &ActionEvent, target: Option<&str>) {
        if !self.config.attend.annotate || self.knowledge.backend_name() == "none" {
            return;
        }
        let knowledge = self.knowledge.clone();
        let subject = target.map(|t| ctx.relative(t)).unwrap_or_else(|| describe_action(&ev.tool_name, &ev.tool_input));
        let title = format!("attention: {} {}", ev.tool_name, subject);
        let content = format!("Session {} in {} ran {} on {}", ctx.session_id, ctx.project, ev.tool_name, subject);
        let tags = vec!["attention".to_string(), ctx.project.clone()];
        self.pool.spawn("annotate", async move {
            knowledge.note(&title, &content, &tags).await.map(|_| ())
        });
    }

    // =========================================================================
    // ENCODE
    // =========================================================================

    async fn encode(&self, ctx: &Ctx, ev: &ActionResultEvent) -> Result<HookResponse> {
        self.ensure_session(ctx)?;
        let target = tool_target(&ev.tool_input);
        let is_edit = self.config.attend.edit_tools.iter().any(|t| t == &ev.tool_name);

        self.sessions
            .add_narrative(&ctx.session_id, "tool", &describe_action(&ev.tool_name, &ev.tool_input))?;

        let modified = if is_edit { target.as_deref().map(|t| ctx.relative(t)) } else { None };
        let count = self
            .sessions
            .record_operation(&ctx.session_id, &ev.tool_name, modified.as_deref())?;

        if let (Some(relative), Some(raw)) = (&modified, &target) {
            let path = ctx.absolute(raw);
            if self.config.encode.relate_curated && self.is_curated(relative) {
                self.link_curated(ctx, &path).await;
            }
            if self.config.encode.auto_ingest {
                self.auto_ingest(&path).await;
            }
        }

        let load = self.sessions.calculate_load(&ctx.session_id)?;
        let mut lines = vec![format!(
            "[cogmem] {} #{} | load {:.2} ({})",
            ev.tool_name, count, load.score, load.level
        )];
        if let Some(core) = modified.as_deref().and_then(|p| self.core_file(p)) {
            lines.push(format!(
                "[cogmem] Core file changed ({}): check build, CI and deployment impact.",
                core
            ));
        }
        Ok(HookResponse::with_context(lines.join("\n")))
    }

    fn is_curated(&self, relative: &str) -> bool {
        self.config.encode.curated_paths.iter().any(|p| {
            if p.ends_with('/') {
                relative.starts_with(p.as_str())
            } else {
                relative == p || relative.ends_with(&format!("/{}", p))
            }
        })
    }

    fn core_file(&self, relative: &str) -> Option<&str> {
        self.config
            .encode
            .core_files
            .iter()
            .find(|c| relative.contains(c.as_str()))
            .map(String::as_str)
    }

    /// `session -modifies-> document` edge for an edited curated document
    async fn link_curated(&self, ctx: &Ctx, path: &Path) {
        let doc = match self.knowledge.find_doc(path).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "Curated document lookup unavailable");
                return;
            }
        };
        let from = format!("session:{}", ctx.session_id);
        if let Err(e) = self.knowledge.relate(&from, &doc, RelationKind::Modifies, 1.0).await {
            tracing::debug!(error = %e, "Relation not recorded");
        }
    }

    async fn auto_ingest(&self, path: &Path) {
        let encode = &self.config.encode;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !encode.ingest_extensions.iter().any(|e| e == extension) {
            return;
        }
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => return,
        };
        if size > encode.ingest_max_bytes {
            tracing::debug!(path = %path.display(), size, "Skipping ingest of large file");
            return;
        }
        if let Err(e) = self.knowledge.ingest(path).await {
            tracing::debug!(path = %path.display(), error = %e, "Ingest unavailable");
        }
    }

    // =========================================================================
    // DECIDE
    // =========================================================================

    async fn decide(&self, ctx: &Ctx, ev: &PermissionEvent) -> Result<HookResponse> {
        let subject = describe_action(&ev.tool_name, &ev.tool_input);
        let (mut confidence, mut rationale) = match ev.risk_tier {
            RiskTier::Standard => (0.9, "standard-risk operation".to_string()),
            RiskTier::High => (0.7, "high-risk operation; proceed with care".to_string()),
            RiskTier::Critical => (0.5, "critical operation; verify intent before proceeding".to_string()),
        };

        if ev.risk_tier != RiskTier::Standard {
            let hits = self.related(&subject).await;
            let similar = hits
                .iter()
                .filter(|h| h.score >= self.config.decide.similar_threshold)
                .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
            if let Some(hit) = similar {
                confidence = f64::min(confidence + SIMILAR_BONUS, 1.0);
                rationale.push_str(&format!("; similar prior operation \"{}\" ({:.2})", hit.title, hit.score));
            }
        }

        let verdict = match (self.config.decide.policy, ev.risk_tier) {
            (DecidePolicy::AskCritical, RiskTier::Critical) => PermissionDecision::Ask,
            (DecidePolicy::DenyCritical, RiskTier::Critical) => PermissionDecision::Deny,
            _ => PermissionDecision::Allow,
        };
        let verb = match verdict {
            PermissionDecision::Allow => "allow",
            PermissionDecision::Ask => "ask",
            PermissionDecision::Deny => "deny",
        };

        // The verdict stands even if it cannot be recorded.
        let decision = Decision::new(format!("{} {}", verb, subject), rationale.clone(), confidence)
            .with_risk(ev.risk_tier.to_string());
        if let Err(e) = self
            .ensure_session(ctx)
            .and_then(|_| self.sessions.add_decision(&ctx.session_id, decision))
        {
            tracing::debug!(session_id = %ctx.session_id, error = %e, "Decision not recorded");
        }

        tracing::info!(session_id = %ctx.session_id, risk = %ev.risk_tier, verdict = verb, confidence, "Permission decided");
        Ok(HookResponse::with_context(format!(
            "[cogmem] {} {} ({} risk, confidence {:.2}): {}",
            verb, subject, ev.risk_tier, confidence, rationale
        ))
        .with_permission(verdict))
    }

    // =========================================================================
    // INTEGRATE
    // =========================================================================

    async fn integrate(&self, ctx: &Ctx, ev: &SubagentEvent) -> Result<HookResponse> {
        self.ensure_session(ctx)?;
        let name = ev.subagent.as_deref().unwrap_or("subagent");
        let result = ev.result_text().unwrap_or_default();
        let result = result.trim();

        let description = if result.is_empty() {
            format!("{} finished", name)
        } else {
            format!("{} finished: {}", name, preview(result, 120))
        };
        self.sessions.add_narrative(&ctx.session_id, "subagent", &description)?;

        let length = result.chars().count();
        if length <= self.config.integrate.summary_threshold {
            return Ok(HookResponse::continue_());
        }

        let summary = preview(result, self.config.integrate.summary_max_chars);
        self.sessions.add_context(
            &ctx.session_id,
            ContextItem::new("subagent", summary.clone()).with_source(name),
        )?;
        if self.config.integrate.persist_external {
            let tags = vec!["subagent".to_string(), ctx.project.clone()];
            if let Err(e) = self
                .knowledge
                .note(&format!("Subagent result: {}", name), &summary, &tags)
                .await
            {
                tracing::debug!(error = %e, "Subagent summary not persisted");
            }
        }
        Ok(HookResponse::with_context(format!(
            "[cogmem] Stored a summary of the {} result ({} chars) as shared context.",
            name, length
        )))
    }

    // =========================================================================
    // HOLD
    // =========================================================================

    async fn hold(&self, ctx: &Ctx, ev: &CompactEvent) -> Result<HookResponse> {
        let trigger = ev.trigger.as_deref().unwrap_or("auto");
        self.sessions
            .add_narrative(&ctx.session_id, "compact", &format!("Context compaction ({})", trigger))?;
        let state = self.sessions.load(&ctx.session_id)?;
        let primer = Primer::from_state(&state, self.config.primer.narrative_tail);
        let path = self.primers.save(&primer)?;
        tracing::info!(project = %primer.project, path = %path.display(), "Primer written");

        Ok(HookResponse::with_context(format!(
            "[cogmem] Primer saved for {}: {} files, {} pending items; it is restored on the next prompt.",
            primer.project,
            primer.files_modified.len(),
            primer.pending_items.len()
        )))
    }

    // =========================================================================
    // REFLECT
    // =========================================================================

    async fn reflect(&self, ctx: &Ctx, ev: &SessionEndEvent) -> Result<HookResponse> {
        let state = self.sessions.load(&ctx.session_id)?;
        let reason = ev.reason.as_deref().unwrap_or("exit");
        let activity = &state.activity;

        let mut parts = Vec::new();
        let mut headline = format!(
            "[cogmem] Session {} ended ({}): {} operations",
            ctx.session_id,
            reason,
            activity.total_operations()
        );
        if !activity.operation_counts.is_empty() {
            let counts: Vec<String> = activity
                .operation_counts
                .iter()
                .map(|(tool, n)| format!("{} x{}", tool, n))
                .collect();
            headline.push_str(&format!(" ({})", counts.join(", ")));
        }
        parts.push(headline);
        parts.extend(self.check_watched_repos(ctx).await);

        if self.config.reflect.persist_summary {
            let tags = vec!["session-summary".to_string(), ctx.project.clone()];
            let title = format!("Session summary: {}", ctx.project);
            if let Err(e) = self.knowledge.note(&title, &state.summary().to_string(), &tags).await {
                tracing::debug!(error = %e, "Session summary not persisted");
            }
        }
        self.maybe_rebuild_graph().await;

        if self.config.reflect.extract_insights {
            match self.extract_insights(ctx, &state).await {
                Ok(0) => {}
                Ok(n) => parts.push(format!(
                    "[cogmem] Staged {} insight(s) for review (cogmem promote review).",
                    n
                )),
                Err(e) => tracing::warn!(session_id = %ctx.session_id, error = %e, "Insight extraction failed"),
            }
        }

        self.sessions.delete(&ctx.session_id)?;
        tracing::info!(session_id = %ctx.session_id, project = %ctx.project, "Session closed");
        Ok(HookResponse::from_parts(parts))
    }

    async fn check_watched_repos(&self, ctx: &Ctx) -> Vec<String> {
        let timeout = Duration::from_millis(self.config.reflect.git_timeout_ms);
        let mut warnings = Vec::new();
        for repo in &self.config.reflect.watched_repos {
            let path = if repo.is_absolute() { repo.clone() } else { ctx.cwd.join(repo) };
            match git::uncommitted_changes(&path, timeout).await {
                Ok(changes) if !changes.is_empty() => {
                    let shown: Vec<&str> = changes.iter().take(5).map(String::as_str).collect();
                    let more = changes.len().saturating_sub(shown.len());
                    let mut line = format!(
                        "[cogmem] Uncommitted changes in {}: {}",
                        path.display(),
                        shown.join(", ")
                    );
                    if more > 0 {
                        line.push_str(&format!(" (+{} more)", more));
                    }
                    warnings.push(line);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(repo = %path.display(), error = %e, "Repository check skipped"),
            }
        }
        warnings
    }

    async fn maybe_rebuild_graph(&self) {
        let stats = match self.knowledge.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::debug!(error = %e, "Knowledge stats unavailable");
                return;
            }
        };
        if stats.entries() < self.config.reflect.graph_rebuild_threshold {
            return;
        }
        match self.knowledge.build_graph().await {
            Ok(report) => tracing::info!(
                created = report.edges_created,
                total = report.edges_total,
                "Knowledge graph rebuilt"
            ),
            Err(e) => tracing::debug!(error = %e, "Graph rebuild unavailable"),
        }
    }

    async fn extract_insights(&self, ctx: &Ctx, state: &SessionState) -> Result<usize> {
        let staging = InsightStaging::new(&self.root, &ctx.project).with_lock_timeout(
            Duration::from_millis(self.config.store.lock_timeout_ms),
            Duration::from_secs(self.config.store.stale_lock_secs),
        );
        let extractor = Extractor::new(self.config.insights.clone(), self.knowledge.clone());
        let input = ExtractionInput {
            session_id: ctx.session_id.clone(),
            transcript: ctx.transcript.clone(),
            narrative: state.working_memory.narrative.clone(),
        };
        Ok(extractor.extract(&staging, &input).await?.staged.len())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Create the session document when the host skipped session start
    fn ensure_session(&self, ctx: &Ctx) -> Result<()> {
        if !self.sessions.exists(&ctx.session_id) {
            self.sessions.init(&ctx.session_id, &ctx.cwd, &ctx.project)?;
            tracing::debug!(session_id = %ctx.session_id, "Created missing session");
        }
        Ok(())
    }

    /// Knowledge hits at or above the configured minimum score
    async fn related(&self, text: &str) -> Vec<QueryHit> {
        let min_score = self.config.knowledge.min_score;
        self.knowledge
            .query_or_empty(text, self.config.knowledge.query_limit)
            .await
            .into_iter()
            .filter(|h| h.score >= min_score)
            .collect()
    }
}

fn keyword_regex(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| regex::escape(k.trim()))
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("(?i)({})", alternatives.join("|")))
        .map(Some)
        .map_err(|e| Error::Config(format!("invalid decision keywords: {}", e)))
}

/// File path named by a tool input, if any
fn tool_target(input: &Value) -> Option<String> {
    ["file_path", "notebook_path", "path"]
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .filter(|p| !p.trim().is_empty())
        .map(str::to_string)
}

/// One-line description of a tool action
fn describe_action(tool: &str, input: &Value) -> String {
    if let Some(target) = tool_target(input) {
        return format!("{} {}", tool, target);
    }
    match input.get("command").and_then(Value::as_str) {
        Some(command) => format!("{}: {}", tool, preview(command, 80)),
        None => tool.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnowledgeBackend;
    use crate::insights::InsightStaging;
    use crate::knowledge::{KnowledgeStore, MemoryKnowledge};
    use crate::session::Priority;
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        dir: tempfile::TempDir,
        memory: MemoryKnowledge,
        dispatcher: Dispatcher,
    }

    fn harness_with(config: CogmemConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryKnowledge::new();
        let knowledge = Knowledge::new(Arc::new(memory.clone()), Duration::from_secs(2));
        let dispatcher = Dispatcher::with_knowledge(config, dir.path(), knowledge).unwrap();
        Harness { dir, memory, dispatcher }
    }

    fn harness() -> Harness {
        let mut config = CogmemConfig::default();
        config.attend.annotate = false;
        config.reflect.extract_insights = false;
        harness_with(config)
    }

    impl Harness {
        fn cwd(&self) -> PathBuf {
            self.dir.path().join("app")
        }

        async fn send(&self, event: Value) -> HookResponse {
            let mut value = json!({
                "session_id": "s1",
                "cwd": self.cwd(),
                "project": "app",
            });
            if let (Some(base), Some(extra)) = (value.as_object_mut(), event.as_object()) {
                for (k, v) in extra {
                    base.insert(k.clone(), v.clone());
                }
            }
            let envelope = HookEnvelope::from_value(value, None).unwrap();
            self.dispatcher.dispatch(&envelope).await
        }

        fn state(&self) -> SessionState {
            self.dispatcher.sessions().load("s1").unwrap()
        }
    }

    #[test]
    fn test_function_names() {
        for function in Function::all() {
            assert_eq!(function.name().parse::<Function>().unwrap(), *function);
            assert_eq!(Function::for_event(function.event_kind()), *function);
        }
        assert_eq!("ORIENT".parse::<Function>().unwrap(), Function::Orient);
        assert!("sleep".parse::<Function>().is_err());
    }

    #[tokio::test]
    async fn test_orient_creates_then_resumes() {
        let h = harness();
        let response = h.send(json!({"event": "session_start"})).await;
        assert!(response.continue_);
        let state = h.state();
        assert_eq!(state.metadata.project, "app");
        assert_eq!(state.working_memory.narrative.len(), 1);

        h.dispatcher.sessions().update_intent("s1", "wire up retries").unwrap();
        let response = h.send(json!({"event": "session_start", "source": "resume"})).await;
        let context = response.additional_context.unwrap();
        assert!(context.contains("last intent: wire up retries"));
        let state = h.state();
        assert_eq!(state.working_memory.narrative.len(), 2);
        assert_eq!(state.working_memory.current_intent.as_deref(), Some("wire up retries"));
    }

    #[tokio::test]
    async fn test_orient_recalls_project_context() {
        let h = harness();
        h.memory.note("app recent work", "app retries landed in uploader", &[]).await.unwrap();
        let response = h.send(json!({"event": "session_start"})).await;
        assert!(response.additional_context.unwrap().starts_with("Recent context for app:"));
    }

    #[tokio::test]
    async fn test_perceive_records_intent_and_creates_missing_session() {
        let h = harness();
        h.memory.note("uploader", "retry policy for the uploader", &[]).await.unwrap();

        let response = h
            .send(json!({"event": "user_prompt", "prompt": "add a retry policy to the uploader"}))
            .await;
        assert!(response.additional_context.unwrap().contains("Related knowledge:"));

        let state = h.state();
        assert_eq!(
            state.working_memory.current_intent.as_deref(),
            Some("add a retry policy to the uploader")
        );
        assert_eq!(state.working_memory.narrative[0].kind, "prompt");
    }

    #[tokio::test]
    async fn test_primer_is_read_once() {
        let h = harness();
        h.send(json!({"event": "session_start"})).await;
        h.send(json!({"event": "user_prompt", "prompt": "refactor the parser"})).await;
        h.dispatcher.sessions().add_commitment("s1", "ship parser", Priority::High).unwrap();

        let response = h.send(json!({"event": "pre_compact", "trigger": "auto"})).await;
        assert!(response.additional_context.unwrap().contains("Primer saved for app"));

        // The host may continue under a new session id after compaction
        let envelope = HookEnvelope::from_value(
            json!({"session_id": "s2", "cwd": h.cwd(), "project": "app",
                   "event": "user_prompt", "prompt": "continue"}),
            None,
        )
        .unwrap();
        let first = h.dispatcher.dispatch(&envelope).await;
        let context = first.additional_context.unwrap();
        assert!(context.contains("Recovered context from before compaction"));
        assert!(context.contains("ship parser"));

        let second = h.dispatcher.dispatch(&envelope).await;
        assert!(second
            .additional_context
            .map_or(true, |c| !c.contains("Recovered context")));

        let s2 = h.dispatcher.sessions().load("s2").unwrap();
        assert_eq!(s2.working_memory.active_context[0].kind, "primer");
    }

    #[tokio::test]
    async fn test_primer_delivered_while_session_locked() {
        let mut config = CogmemConfig::default();
        config.attend.annotate = false;
        config.reflect.extract_insights = false;
        config.store.lock_timeout_ms = 100;
        let h = harness_with(config);
        h.send(json!({"event": "session_start"})).await;
        h.send(json!({"event": "user_prompt", "prompt": "refactor the parser"})).await;
        h.dispatcher.sessions().add_commitment("s1", "ship parser", Priority::High).unwrap();
        h.send(json!({"event": "pre_compact", "trigger": "auto"})).await;

        h.dispatcher.sessions().init("s2", &h.cwd(), "app").unwrap();
        let lock = h.dispatcher.sessions().dir().join("s2.lock");
        std::fs::write(&lock, "").unwrap();

        let envelope = HookEnvelope::from_value(
            json!({"session_id": "s2", "cwd": h.cwd(), "project": "app",
                   "event": "user_prompt", "prompt": "continue"}),
            None,
        )
        .unwrap();
        let first = h.dispatcher.dispatch(&envelope).await;
        let context = first.additional_context.unwrap();
        assert!(context.contains("Recovered context from before compaction"));
        assert!(context.contains("ship parser"));
        assert!(h.dispatcher.primers().peek("app").unwrap().is_none());

        std::fs::remove_file(&lock).unwrap();
        let second = h.dispatcher.dispatch(&envelope).await;
        assert!(second
            .additional_context
            .map_or(true, |c| !c.contains("Recovered context")));
        let s2 = h.dispatcher.sessions().load("s2").unwrap();
        assert_eq!(s2.working_memory.current_intent.as_deref(), Some("continue"));
    }

    #[tokio::test]
    async fn test_prompt_without_primer_fails_on_locked_session() {
        let mut config = CogmemConfig::default();
        config.attend.annotate = false;
        config.store.lock_timeout_ms = 50;
        let h = harness_with(config);
        h.send(json!({"event": "session_start"})).await;
        std::fs::write(h.dispatcher.sessions().dir().join("s1.lock"), "").unwrap();

        let response = h.send(json!({"event": "user_prompt", "prompt": "continue"})).await;
        assert_eq!(response, HookResponse::continue_());
    }

    /// Store whose notes land well after the response would be written
    struct SlowNotes {
        noted: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl KnowledgeStore for SlowNotes {
        async fn query(&self, _text: &str, _limit: usize) -> Result<Vec<QueryHit>> {
            Ok(Vec::new())
        }

        async fn note(&self, _title: &str, _content: &str, _tags: &[String]) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.noted.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok("n1".to_string())
        }

        async fn ingest(&self, _path: &Path) -> Result<String> {
            Ok("d1".to_string())
        }

        async fn relate(&self, _from: &str, _to: &str, _kind: RelationKind, _strength: f32) -> Result<()> {
            Ok(())
        }

        async fn stats(&self) -> Result<crate::knowledge::KnowledgeStats> {
            Ok(Default::default())
        }

        async fn find_doc(&self, _path: &Path) -> Result<Option<String>> {
            Ok(None)
        }

        async fn build_graph(&self) -> Result<crate::knowledge::GraphReport> {
            Ok(Default::default())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Writer that remembers whether background work had finished at first write
    struct Recorder {
        noted: Arc<std::sync::atomic::AtomicBool>,
        noted_at_write: Option<bool>,
        bytes: Vec<u8>,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.noted_at_write.is_none() {
                self.noted_at_write = Some(self.noted.load(std::sync::atomic::Ordering::SeqCst));
            }
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_respond_writes_before_draining() {
        let dir = tempfile::tempdir().unwrap();
        let noted = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let knowledge = Knowledge::new(
            Arc::new(SlowNotes { noted: noted.clone() }),
            Duration::from_secs(2),
        );
        let mut config = CogmemConfig::default();
        config.reflect.extract_insights = false;
        let dispatcher = Dispatcher::with_knowledge(config, dir.path(), knowledge).unwrap();

        let envelope = HookEnvelope::from_value(
            json!({"session_id": "s1", "cwd": dir.path().join("app"), "project": "app",
                   "event": "pre_action", "tool_name": "Edit",
                   "tool_input": {"file_path": "src/lib.rs"}}),
            None,
        )
        .unwrap();
        let mut out = Recorder {
            noted: noted.clone(),
            noted_at_write: None,
            bytes: Vec::new(),
        };
        let response = dispatcher
            .respond(&envelope, &mut out, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(out.noted_at_write, Some(false));
        assert!(noted.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(dispatcher.pool().pending_count(), 0);
        let written: Value = serde_json::from_slice(&out.bytes).unwrap();
        assert_eq!(written["continue"], json!(true));
        assert_eq!(written, serde_json::from_str::<Value>(&response.to_json()).unwrap());
    }

    #[tokio::test]
    async fn test_attend_ignores_read_only_tools() {
        let h = harness();
        h.send(json!({"event": "session_start"})).await;
        let response = h
            .send(json!({"event": "pre_action", "tool_name": "Read", "tool_input": {"file_path": "src/auth.rs"}}))
            .await;
        assert_eq!(response, HookResponse::continue_());
        assert!(h.state().working_memory.attention_focus.is_empty());
    }

    #[tokio::test]
    async fn test_attend_surfaces_best_match_and_caches() {
        let h = harness();
        h.send(json!({"event": "session_start"})).await;
        h.memory.note("auth module", "src auth rs token refresh", &[]).await.unwrap();

        let event = json!({"event": "pre_action", "tool_name": "Edit", "tool_input": {"file_path": "src/auth.rs"}});
        let response = h.send(event.clone()).await;
        assert!(response.permission_decision.is_none());
        let context = response.additional_context.unwrap();
        assert!(context.contains("related \"auth module\""));
        assert_eq!(h.state().working_memory.attention_focus, vec!["src/auth.rs".to_string()]);

        let cache = AttentionCache::new(h.dir.path(), 30);
        assert!(cache.get("Edit", "src/auth.rs").is_some());

        // Served from cache even after the store changes
        h.memory.note("auth module v2", "src auth rs", &[]).await.unwrap();
        let again = h.send(event).await;
        assert!(again.additional_context.unwrap().contains("\"auth module\""));
    }

    #[tokio::test]
    async fn test_attend_shell_commands_need_keywords() {
        let h = harness();
        h.send(json!({"event": "session_start"})).await;
        let cache = AttentionCache::new(h.dir.path(), 30);

        h.send(json!({"event": "pre_action", "tool_name": "Bash", "tool_input": {"command": "ls -la"}}))
            .await;
        assert!(cache.is_empty());

        h.send(json!({"event": "pre_action", "tool_name": "Bash", "tool_input": {"command": "kubectl apply -f k8s/"}}))
            .await;
        assert!(cache.get("Bash", "kubectl apply -f k8s/").is_some());

        // The session intent can make any shell command a decision point
        h.dispatcher.sessions().update_intent("s1", "plan the database migration").unwrap();
        h.send(json!({"event": "pre_action", "tool_name": "Bash", "tool_input": {"command": "ls"}}))
            .await;
        assert!(cache.get("Bash", "ls").is_some());
    }

    #[tokio::test]
    async fn test_attend_annotates_in_background() {
        let mut config = CogmemConfig::default();
        config.reflect.extract_insights = false;
        let h = harness_with(config);
        h.send(json!({"event": "session_start"})).await;
        h.send(json!({"event": "pre_action", "tool_name": "Write", "tool_input": {"file_path": "src/new.rs"}}))
            .await;
        assert!(h.dispatcher.pool().drain_with_timeout(Duration::from_secs(2)).await);
        assert_eq!(h.memory.titles_tagged("attention").await, vec!["attention: Write src/new.rs".to_string()]);
    }

    #[tokio::test]
    async fn test_encode_counts_and_reports() {
        let h = harness();
        h.send(json!({"event": "session_start"})).await;

        let response = h
            .send(json!({"event": "post_action", "tool_name": "Edit",
                         "tool_input": {"file_path": "src/lib.rs"}, "tool_response": {"ok": true}}))
            .await;
        let context = response.additional_context.unwrap();
        assert!(context.starts_with("[cogmem] Edit #1 | load"));

        let response = h
            .send(json!({"event": "post_action", "tool_name": "Edit",
                         "tool_input": {"file_path": h.cwd().join("Cargo.toml")}, "tool_response": {}}))
            .await;
        let context = response.additional_context.unwrap();
        assert!(context.contains("Edit #2"));
        assert!(context.contains("Core file changed (Cargo.toml)"));

        h.send(json!({"event": "post_action", "tool_name": "Bash",
                      "tool_input": {"command": "cargo fmt"}, "tool_response": ""}))
            .await;

        let state = h.state();
        assert_eq!(state.activity.operation_counts["Edit"], 2);
        assert_eq!(state.activity.operation_counts["Bash"], 1);
        assert_eq!(state.activity.files_modified, vec!["src/lib.rs".to_string(), "Cargo.toml".to_string()]);
        let last = state.working_memory.narrative.last().unwrap();
        assert_eq!(last.kind, "tool");
        assert_eq!(last.description, "Bash: cargo fmt");
        assert!(state.cognitive_load.calculated_at.is_some());
    }

    #[tokio::test]
    async fn test_encode_relates_curated_documents() {
        let h = harness();
        let guide = h.cwd().join("docs/guide.md");
        std::fs::create_dir_all(guide.parent().unwrap()).unwrap();
        std::fs::write(&guide, "deployment guide").unwrap();
        h.memory.ingest(&guide).await.unwrap();

        h.send(json!({"event": "post_action", "tool_name": "Edit",
                      "tool_input": {"file_path": guide}, "tool_response": {}}))
            .await;
        assert_eq!(h.memory.edge_count(RelationKind::Modifies).await, 1);

        h.send(json!({"event": "post_action", "tool_name": "Edit",
                      "tool_input": {"file_path": "src/main.rs"}, "tool_response": {}}))
            .await;
        assert_eq!(h.memory.edge_count(RelationKind::Modifies).await, 1);
    }

    #[tokio::test]
    async fn test_encode_auto_ingest_is_gated() {
        let mut config = CogmemConfig::default();
        config.attend.annotate = false;
        config.encode.auto_ingest = true;
        config.encode.ingest_max_bytes = 64;
        let h = harness_with(config);
        std::fs::create_dir_all(h.cwd()).unwrap();
        std::fs::write(h.cwd().join("small.rs"), "fn main() {}").unwrap();
        std::fs::write(h.cwd().join("big.rs"), "x".repeat(200)).unwrap();
        std::fs::write(h.cwd().join("image.png"), "png").unwrap();

        for file in ["small.rs", "big.rs", "image.png"] {
            h.send(json!({"event": "post_action", "tool_name": "Write",
                          "tool_input": {"file_path": file}, "tool_response": {}}))
                .await;
        }
        let stats = h.memory.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
    }

    #[tokio::test]
    async fn test_decide_default_policy_allows() {
        let h = harness();
        let response = h
            .send(json!({"event": "permission", "tool_name": "Bash",
                         "tool_input": {"command": "rm -rf build"}, "risk_tier": "critical"}))
            .await;
        assert_eq!(response.permission_decision, Some(PermissionDecision::Allow));

        let state = h.state();
        let decision = &state.decisions[0];
        assert_eq!(decision.risk.as_deref(), Some("critical"));
        assert!((decision.confidence - 0.5).abs() < 1e-9);
        assert!(decision.description.starts_with("allow Bash: rm -rf build"));
    }

    #[tokio::test]
    async fn test_decide_similar_history_raises_confidence() {
        let h = harness();
        h.memory.note("", "bash kubectl apply deploy yaml", &[]).await.unwrap();
        h.send(json!({"event": "permission", "tool_name": "Bash",
                      "tool_input": {"command": "kubectl apply deploy.yaml"}, "risk_tier": "high"}))
            .await;
        h.send(json!({"event": "permission", "tool_name": "Bash",
                      "tool_input": {"command": "kubectl apply deploy.yaml"}}))
            .await;

        let state = h.state();
        assert!((state.decisions[0].confidence - 0.85).abs() < 1e-9);
        assert!(state.decisions[0].rationale.contains("similar prior operation"));
        // Standard tier never consults history
        assert!((state.decisions[1].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_decide_policies() {
        for (policy, expected) in [
            (DecidePolicy::AskCritical, PermissionDecision::Ask),
            (DecidePolicy::DenyCritical, PermissionDecision::Deny),
        ] {
            let mut config = CogmemConfig::default();
            config.decide.policy = policy;
            let h = harness_with(config);
            let critical = h
                .send(json!({"event": "permission", "tool_name": "Bash", "risk_tier": "critical"}))
                .await;
            assert_eq!(critical.permission_decision, Some(expected));
            let high = h
                .send(json!({"event": "permission", "tool_name": "Bash", "risk_tier": "high"}))
                .await;
            assert_eq!(high.permission_decision, Some(PermissionDecision::Allow));
        }
    }

    #[tokio::test]
    async fn test_integrate_summarizes_large_results() {
        let h = harness();
        h.send(json!({"event": "session_start"})).await;

        let small = h
            .send(json!({"event": "subagent_done", "subagent": "reviewer", "result": "looks good"}))
            .await;
        assert_eq!(small, HookResponse::continue_());
        assert!(h.state().working_memory.active_context.is_empty());

        let large = "The reviewer found several issues. ".repeat(30);
        let response = h
            .send(json!({"event": "subagent_done", "subagent": "reviewer", "result": large}))
            .await;
        assert!(response.additional_context.unwrap().contains("reviewer result"));

        let state = h.state();
        let item = &state.working_memory.active_context[0];
        assert_eq!(item.kind, "subagent");
        assert_eq!(item.source.as_deref(), Some("reviewer"));
        assert!(item.content.chars().count() <= 400);
        assert_eq!(h.memory.titles_tagged("subagent").await, vec!["Subagent result: reviewer".to_string()]);
        assert_eq!(state.working_memory.narrative.len(), 3);
    }

    #[tokio::test]
    async fn test_hold_without_session_degrades() {
        let h = harness();
        let response = h.send(json!({"event": "pre_compact"})).await;
        assert_eq!(response, HookResponse::continue_());
        assert!(h.dispatcher.primers().peek("app").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reflect_persists_and_deletes() {
        let mut config = CogmemConfig::default();
        config.attend.annotate = false;
        config.knowledge.backend = KnowledgeBackend::Memory;
        let h = harness_with(config);
        h.send(json!({"event": "session_start"})).await;
        h.send(json!({"event": "post_action", "tool_name": "Edit",
                      "tool_input": {"file_path": "src/lib.rs"}, "tool_response": {}}))
            .await;
        h.send(json!({"event": "subagent_done", "subagent": "planner",
                      "result": "We decided to keep the parser single-pass instead of adding a lexer"}))
            .await;

        let response = h.send(json!({"event": "session_end", "reason": "logout"})).await;
        let context = response.additional_context.unwrap();
        assert!(context.contains("Session s1 ended (logout): 1 operations (Edit x1)"));
        assert!(context.contains("Staged 1 insight(s)"));

        assert!(!h.dispatcher.sessions().exists("s1"));
        assert_eq!(
            h.memory.titles_tagged("session-summary").await,
            vec!["Session summary: app".to_string()]
        );

        let staging = InsightStaging::new(h.dir.path(), "app");
        let pending = staging.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].content.starts_with("planner finished"));
    }

    #[tokio::test]
    async fn test_reflect_warns_about_watched_repos() {
        if std::process::Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let mut config = CogmemConfig::default();
        config.attend.annotate = false;
        config.reflect.extract_insights = false;
        let h = harness_with(config);
        let repo = h.dir.path().join("infra");
        std::fs::create_dir_all(&repo).unwrap();
        let init = std::process::Command::new("git").arg("init").arg("-q").arg(&repo).status().unwrap();
        assert!(init.success());
        std::fs::write(repo.join("main.tf"), "resource {}").unwrap();

        let mut config = CogmemConfig::default();
        config.reflect.extract_insights = false;
        config.reflect.watched_repos = vec![repo.clone()];
        let dispatcher = Dispatcher::with_knowledge(config, h.dir.path(), Knowledge::unavailable()).unwrap();
        dispatcher.sessions().init("s9", &h.cwd(), "app").unwrap();

        let envelope = HookEnvelope::from_value(
            json!({"session_id": "s9", "cwd": h.cwd(), "event": "session_end"}),
            None,
        )
        .unwrap();
        let response = dispatcher.dispatch(&envelope).await;
        assert!(response.additional_context.unwrap().contains("Uncommitted changes"));
    }

    #[tokio::test]
    async fn test_failures_degrade_to_continue() {
        let h = harness();
        let envelope = HookEnvelope::from_value(
            json!({"session_id": "../escape", "cwd": "/w", "event": "user_prompt", "prompt": "hi"}),
            None,
        )
        .unwrap();
        assert_eq!(h.dispatcher.dispatch(&envelope).await, HookResponse::continue_());

        let response = h.send(json!({"event": "session_end"})).await;
        assert_eq!(response, HookResponse::continue_());
    }

    #[test]
    fn test_describe_action() {
        assert_eq!(describe_action("Edit", &json!({"file_path": "a.rs"})), "Edit a.rs");
        assert_eq!(describe_action("Bash", &json!({"command": "make  test"})), "Bash: make test");
        assert_eq!(describe_action("Task", &json!({})), "Task");
    }

    #[test]
    fn test_keyword_regex() {
        let re = keyword_regex(&["deploy".to_string(), "c++".to_string()]).unwrap().unwrap();
        assert!(re.is_match("DEPLOY now"));
        assert!(re.is_match("build c++ module"));
        assert!(keyword_regex(&[]).unwrap().is_none());
    }
}
