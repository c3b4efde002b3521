//! cogmem configuration management
//!
//! Every section has a `Default` and is `#[serde(default)]`, so a config file
//! only needs to name the values it overrides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the store root
pub const ROOT_ENV: &str = "COGMEM_HOME";

/// Main cogmem configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CogmemConfig {
    /// Session store configuration
    pub store: StoreConfig,

    /// Primer recovery configuration
    pub primer: PrimerConfig,

    /// External knowledge store configuration
    pub knowledge: KnowledgeConfig,

    /// Pre-action (ATTEND) configuration
    pub attend: AttendConfig,

    /// Post-action (ENCODE) configuration
    pub encode: EncodeConfig,

    /// Permission check (DECIDE) configuration
    pub decide: DecideConfig,

    /// Subagent completion (INTEGRATE) configuration
    pub integrate: IntegrateConfig,

    /// Session end (REFLECT) configuration
    pub reflect: ReflectConfig,

    /// Insight extraction and promotion configuration
    pub insights: InsightsConfig,
}

impl CogmemConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `<root>/config.toml` if it exists, defaults otherwise
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Store root: configured value, or `~/.cogmem`
    pub fn root(&self) -> PathBuf {
        self.store.root.clone().unwrap_or_else(default_root)
    }
}

/// Default store root (~/.cogmem)
pub fn default_root() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cogmem")
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root directory (None = ~/.cogmem)
    pub root: Option<PathBuf>,

    /// Bounded wait for the per-session lock, in milliseconds
    pub lock_timeout_ms: u64,

    /// A lock file older than this is considered abandoned, in seconds
    pub stale_lock_secs: u64,

    /// Maximum number of active context items kept per session
    pub max_context_items: usize,

    /// Sessions untouched for longer than this are swept by ORIENT, in hours
    pub session_max_age_hours: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            lock_timeout_ms: 5_000,
            stale_lock_secs: 30,
            max_context_items: 10,
            session_max_age_hours: 24,
        }
    }
}

/// Primer recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimerConfig {
    /// Primers older than this are discarded unread, in minutes
    pub ttl_minutes: u64,

    /// Number of narrative events carried in a primer
    pub narrative_tail: usize,
}

impl Default for PrimerConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 240,
            narrative_tail: 10,
        }
    }
}

/// Knowledge store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeBackend {
    /// No backend; every call reports unavailable
    #[default]
    None,

    /// JSON over HTTP
    Http,

    /// In-process store (offline runs and tests)
    Memory,
}

/// External knowledge store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Backend selection
    pub backend: KnowledgeBackend,

    /// Base URL for the HTTP backend
    pub url: Option<String>,

    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,

    /// Maximum number of results requested per query
    pub query_limit: usize,

    /// Results scoring below this are not surfaced to the host
    pub min_score: f32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            backend: KnowledgeBackend::None,
            url: None,
            timeout_ms: 2_000,
            query_limit: 3,
            min_score: 0.3,
        }
    }
}

/// Pre-action (ATTEND) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendConfig {
    /// Lifetime of cached lookups, in minutes
    pub cache_ttl_minutes: u64,

    /// Tools that modify files; always a decision point
    pub edit_tools: Vec<String>,

    /// Tools that run shell commands; a decision point on keyword match
    pub shell_tools: Vec<String>,

    /// Keywords marking a shell command as infra/architecture work
    pub decision_keywords: Vec<String>,

    /// Submit a background annotation after each decision point
    pub annotate: bool,

    /// Maximum concurrent background tasks
    pub max_background_tasks: usize,
}

impl Default for AttendConfig {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: 30,
            edit_tools: strings(&["Edit", "Write", "MultiEdit", "NotebookEdit"]),
            shell_tools: strings(&["Bash"]),
            decision_keywords: strings(&[
                "deploy",
                "migrat",
                "docker",
                "kubernetes",
                "kubectl",
                "terraform",
                "helm",
                "schema",
                "architecture",
                "infra",
                "database",
                "pipeline",
                "release",
                "systemctl",
                "nginx",
            ]),
            annotate: true,
            max_background_tasks: 4,
        }
    }
}

/// Post-action (ENCODE) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// Path fragments identifying curated documents
    pub curated_paths: Vec<String>,

    /// Create a "modifies" edge when a curated document is touched
    pub relate_curated: bool,

    /// Path fragments identifying core infrastructure files
    pub core_files: Vec<String>,

    /// Ingest touched files into the knowledge store
    pub auto_ingest: bool,

    /// Extensions eligible for auto-ingest
    pub ingest_extensions: Vec<String>,

    /// Files larger than this are never ingested, in bytes
    pub ingest_max_bytes: u64,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            curated_paths: strings(&["docs/", "CLAUDE.md", "ARCHITECTURE.md", "README.md"]),
            relate_curated: true,
            core_files: strings(&[
                "Cargo.toml",
                "package.json",
                "Dockerfile",
                "docker-compose",
                ".github/workflows/",
                "Makefile",
                "build.rs",
            ]),
            auto_ingest: false,
            ingest_extensions: strings(&["md", "rs", "toml", "py", "ts", "js", "go"]),
            ingest_max_bytes: 100_000,
        }
    }
}

/// Outcome policy for permission checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecidePolicy {
    /// Always allow; the rationale is informational
    #[default]
    Advisory,

    /// Ask the user for critical-tier operations
    AskCritical,

    /// Deny critical-tier operations
    DenyCritical,
}

/// Permission check (DECIDE) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecideConfig {
    /// Outcome policy
    pub policy: DecidePolicy,

    /// A prior operation scoring at least this raises confidence
    pub similar_threshold: f32,
}

impl Default for DecideConfig {
    fn default() -> Self {
        Self {
            policy: DecidePolicy::Advisory,
            similar_threshold: 0.7,
        }
    }
}

/// Subagent completion (INTEGRATE) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrateConfig {
    /// Results longer than this (chars) are summarized into shared context
    pub summary_threshold: usize,

    /// Maximum summary length, in chars
    pub summary_max_chars: usize,

    /// Also persist the summary as a knowledge note
    pub persist_external: bool,
}

impl Default for IntegrateConfig {
    fn default() -> Self {
        Self {
            summary_threshold: 500,
            summary_max_chars: 400,
            persist_external: true,
        }
    }
}

/// Session end (REFLECT) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectConfig {
    /// External repositories checked for uncommitted changes
    pub watched_repos: Vec<PathBuf>,

    /// Timeout for each `git status` probe, in milliseconds
    pub git_timeout_ms: u64,

    /// Persist a session summary note
    pub persist_summary: bool,

    /// Rebuild the relationship graph once this many notes exist (0 = never)
    pub graph_rebuild_threshold: u64,

    /// Run insight extraction before the session is deleted
    pub extract_insights: bool,
}

impl Default for ReflectConfig {
    fn default() -> Self {
        Self {
            watched_repos: Vec::new(),
            git_timeout_ms: 3_000,
            persist_summary: true,
            graph_rebuild_threshold: 50,
            extract_insights: true,
        }
    }
}

/// Curated documents receiving promoted insights, relative to the project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightTargets {
    pub decision: PathBuf,
    pub pattern: PathBuf,
    pub gotcha: PathBuf,
}

impl Default for InsightTargets {
    fn default() -> Self {
        Self {
            decision: PathBuf::from("docs/decisions.md"),
            pattern: PathBuf::from("docs/patterns.md"),
            gotcha: PathBuf::from("docs/gotchas.md"),
        }
    }
}

/// Insight extraction and promotion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    /// Candidates shorter than this (chars) are dropped
    pub min_length: usize,

    /// Candidates are truncated to this many chars
    pub max_length: usize,

    /// Similarity at or above this marks a candidate as already known
    pub novelty_threshold: f32,

    /// Maximum insights staged per session
    pub max_per_session: usize,

    /// Candidates containing any of these markers are dropped
    pub blocked_markers: Vec<String>,

    /// Number of transcript lines sampled from the tail
    pub sample_size: usize,

    /// Minimum stored confidence for unattended promotion
    pub auto_accept_confidence: f32,

    /// Target documents per category
    pub targets: InsightTargets,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            min_length: 20,
            max_length: 500,
            novelty_threshold: 0.85,
            max_per_session: 5,
            blocked_markers: strings(&["TODO", "FIXME", "XXX", "WIP", "HACK", "[cogmem]"]),
            sample_size: 40,
            auto_accept_confidence: 0.75,
            targets: InsightTargets::default(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
