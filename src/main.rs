//! cogmem - Session working memory for event-driven coding assistants
//!
//! The `hook` subcommand is what the host assistant runs on every event; the
//! other subcommands are for operators.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cogmem::{
    config::{CogmemConfig, ROOT_ENV},
    hooks::{Dispatcher, Function, HookEnvelope, HookResponse},
    insights::{ExtractionInput, Extractor, InsightStaging, Promoter, LAYOUT_VERSION},
    knowledge::Knowledge,
    session::SessionStore,
};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the log filter
const LOG_ENV: &str = "COGMEM_LOG";

/// Upper bound on waiting for background work before the hook process exits
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "cogmem")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Session working memory for event-driven coding assistants")]
struct Cli {
    /// Configuration file path (defaults to <root>/config.toml)
    #[arg(short, long, env = "COGMEM_CONFIG")]
    config: Option<PathBuf>,

    /// Store root directory
    #[arg(long, env = ROOT_ENV)]
    root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one host event read from stdin
    Hook {
        /// Cognitive function to run; inferred from the envelope when omitted
        function: Option<Function>,
    },

    /// Manage the insight staging area
    Insights {
        #[command(subcommand)]
        action: InsightsCommand,
    },

    /// Review staged insights
    Promote {
        #[command(subcommand)]
        action: PromoteCommand,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[derive(Subcommand)]
enum InsightsCommand {
    /// Create the staging layout for a project
    Init {
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Delete archived records older than the given age
    Cleanup {
        #[arg(short, long)]
        project: Option<String>,

        /// Maximum archive age in days
        #[arg(long, default_value = "30")]
        days: u64,
    },

    /// Extract insights from a transcript and/or a live session document
    Extract {
        /// Session the insights are attributed to
        #[arg(short, long)]
        session: String,

        #[arg(short, long)]
        project: Option<String>,

        /// Transcript (JSONL) to sample
        #[arg(short, long)]
        transcript: Option<PathBuf>,
    },

    /// Print the staging layout version
    Version,
}

#[derive(Subcommand)]
enum PromoteCommand {
    /// List pending insights
    List {
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Review pending insights interactively
    Review {
        #[arg(short, long)]
        project: Option<String>,

        /// Directory the target documents are relative to
        #[arg(long)]
        project_root: Option<PathBuf>,
    },

    /// Accept every pending insight above a confidence threshold
    Auto {
        #[arg(short, long)]
        project: Option<String>,

        #[arg(long)]
        project_root: Option<PathBuf>,

        /// Minimum confidence (defaults to insights.auto_accept_confidence)
        #[arg(long)]
        min_confidence: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the response envelope, so logs go to stderr
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
                .unwrap_or_else(|_| format!("cogmem={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (config, root) = match load_config(cli.config.as_deref(), cli.root.as_deref()) {
        Ok(loaded) => loaded,
        // A broken config must not break the host: hooks fall back to defaults
        Err(e) if matches!(cli.command, Commands::Hook { .. }) => {
            tracing::warn!(error = %e, "Using default configuration");
            let config = CogmemConfig::default();
            let root = cli.root.clone().unwrap_or_else(|| config.root());
            (config, root)
        }
        Err(e) => return Err(e),
    };

    match cli.command {
        Commands::Hook { function } => run_hook(config, root, function).await,
        Commands::Insights { action } => run_insights(config, root, action).await,
        Commands::Promote { action } => run_promote(config, root, action),
        Commands::Config { default } => show_config(if default { None } else { Some(&config) }),
    }
}

/// Config from `--config`, else `<root>/config.toml`; root from flag/env, then config
fn load_config(path: Option<&Path>, root: Option<&Path>) -> Result<(CogmemConfig, PathBuf)> {
    let config = match path {
        Some(path) => CogmemConfig::load(path)?,
        None => {
            let probe = root.map(Path::to_path_buf).unwrap_or_else(cogmem::config::default_root);
            CogmemConfig::load_or_default(&probe)?
        }
    };
    let root = root.map(Path::to_path_buf).unwrap_or_else(|| config.root());
    Ok((config, root))
}

async fn run_hook(config: CogmemConfig, root: PathBuf, function: Option<Function>) -> Result<()> {
    let mut raw = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
        tracing::warn!(error = %e, "Failed to read hook input");
        return print_continue();
    }
    let Some((dispatcher, envelope)) = prepare_event(config, root, function, &raw) else {
        return print_continue();
    };
    let mut stdout = std::io::stdout();
    dispatcher.respond(&envelope, &mut stdout, DRAIN_TIMEOUT).await?;
    Ok(())
}

fn print_continue() -> Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", HookResponse::continue_().to_json())?;
    stdout.flush()?;
    Ok(())
}

fn prepare_event(
    config: CogmemConfig,
    root: PathBuf,
    function: Option<Function>,
    raw: &str,
) -> Option<(Dispatcher, HookEnvelope)> {
    let envelope = match function {
        Some(function) => HookEnvelope::parse_as(raw, function.event_kind()),
        None => HookEnvelope::parse(raw),
    };
    let envelope = match envelope {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring malformed hook input");
            return None;
        }
    };

    let dispatcher = match Dispatcher::new(config.clone(), &root) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            tracing::warn!(error = %e, "Knowledge backend unavailable");
            match Dispatcher::with_knowledge(config, &root, Knowledge::unavailable()) {
                Ok(dispatcher) => dispatcher,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to build dispatcher");
                    return None;
                }
            }
        }
    };
    Some((dispatcher, envelope))
}

fn project_or_cwd(project: Option<String>) -> String {
    project
        .filter(|p| !p.trim().is_empty())
        .or_else(|| {
            std::env::current_dir()
                .ok()
                .and_then(|d| d.file_name().map(|n| n.to_string_lossy().to_string()))
        })
        .unwrap_or_else(|| "default".to_string())
}

fn staging_for(config: &CogmemConfig, root: &Path, project: Option<String>) -> InsightStaging {
    InsightStaging::new(root, &project_or_cwd(project)).with_lock_timeout(
        Duration::from_millis(config.store.lock_timeout_ms),
        Duration::from_secs(config.store.stale_lock_secs),
    )
}

async fn run_insights(config: CogmemConfig, root: PathBuf, action: InsightsCommand) -> Result<()> {
    match action {
        InsightsCommand::Init { project } => {
            let staging = staging_for(&config, &root, project);
            staging.init()?;
            println!("Initialized {}", staging.dir().display());
        }
        InsightsCommand::Cleanup { project, days } => {
            let staging = staging_for(&config, &root, project);
            let removed = staging.cleanup(Duration::from_secs(days * 86_400))?;
            println!("Removed {} archived record(s) from {}", removed, staging.dir().display());
        }
        InsightsCommand::Extract {
            session,
            project,
            transcript,
        } => {
            let staging = staging_for(&config, &root, project);
            let sessions = SessionStore::new(&root, &config.store);
            let narrative = if sessions.exists(&session) {
                sessions.load(&session)?.working_memory.narrative
            } else {
                Vec::new()
            };
            let knowledge = Knowledge::from_config(&config.knowledge).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Knowledge backend unavailable");
                Knowledge::unavailable()
            });
            let input = ExtractionInput {
                session_id: session,
                transcript,
                narrative,
            };
            let report = Extractor::new(config.insights.clone(), knowledge)
                .extract(&staging, &input)
                .await?;
            println!("{}", report);
            for insight in &report.staged {
                println!("  {} [{}] {:.2}", insight.id, insight.category, insight.confidence);
            }
        }
        InsightsCommand::Version => {
            println!("cogmem {} (insight layout v{})", env!("CARGO_PKG_VERSION"), LAYOUT_VERSION);
        }
    }
    Ok(())
}

fn run_promote(config: CogmemConfig, root: PathBuf, action: PromoteCommand) -> Result<()> {
    let promoter = |project: Option<String>, project_root: Option<PathBuf>| -> Result<Promoter> {
        let project_root = match project_root {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to resolve the project directory")?,
        };
        Ok(Promoter::new(
            staging_for(&config, &root, project),
            project_root,
            config.insights.targets.clone(),
        ))
    };

    match action {
        PromoteCommand::List { project } => {
            println!("{}", promoter(project, None)?.summary()?);
        }
        PromoteCommand::Review { project, project_root } => {
            let promoter = promoter(project, project_root)?;
            let stdin = std::io::stdin();
            let report = promoter.review(stdin.lock(), std::io::stdout())?;
            println!(
                "\nAccepted {}, edited {}, rejected {}, skipped {}",
                report.accepted, report.edited, report.rejected, report.skipped
            );
        }
        PromoteCommand::Auto {
            project,
            project_root,
            min_confidence,
        } => {
            let threshold = min_confidence.unwrap_or(config.insights.auto_accept_confidence);
            let report = promoter(project, project_root)?.auto(threshold)?;
            for promotion in &report.accepted {
                if let Some(target) = &promotion.target {
                    println!("{} -> {}", promotion.insight.id, target.display());
                }
            }
            println!(
                "Accepted {}, left {} below {:.2}",
                report.accepted.len(),
                report.below_threshold,
                threshold
            );
        }
    }
    Ok(())
}

fn show_config(config: Option<&CogmemConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
