use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use sessionwatch::agents::StatusDetector;
use sessionwatch::cache::LocatorCaches;
use sessionwatch::config;
use sessionwatch::data::AgentFormat;
use sessionwatch::watcher::{TieredWatcher, TieredWatcherConfig, WatcherManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "sessionwatch")]
#[command(about = "Infer AI coding-agent session status from files on disk")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the session status of a working directory
    Detect {
        /// Agent format (claude, codex, gemini, opencode, cursor, pi, amp); all when omitted
        #[arg(long, short)]
        agent: Option<AgentFormat>,

        /// Working directory (defaults to the current directory)
        path: Option<PathBuf>,
    },

    /// Watch a session directory and log every change
    Watch(WatchArgs),
}

#[derive(clap::Args, Debug)]
struct WatchArgs {
    /// Directory holding session files
    dir: PathBuf,

    /// Only files with this extension are sessions
    #[arg(long, default_value = ".jsonl")]
    ext: String,

    /// Adapter name the watcher is registered under
    #[arg(long, default_value = "claude")]
    adapter: String,

    /// How many directory levels below DIR to scan for sessions
    #[arg(long, default_value_t = 2)]
    depth: usize,

    /// Agent format used to re-classify the worktree on each event
    #[arg(long, short, default_value = "claude")]
    agent: AgentFormat,

    /// Working directory to re-classify (defaults to the current directory)
    #[arg(long)]
    worktree: Option<PathBuf>,
}

fn worktree_or_cwd(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => std::env::current_dir().context("Could not determine current directory"),
    }
}

fn print_detection(detector: &StatusDetector, format: AgentFormat, worktree: &Path) {
    let detection = detector.detect_status(format, worktree);
    let found = if detection.found { "found" } else { "no session" };
    println!(
        "{:<12} {:<8} {:<10} {}",
        format.label(),
        detection.status.label(),
        found,
        detection.status.description()
    );
}

async fn watch(
    detector: StatusDetector,
    settings: config::WatcherSettings,
    args: WatchArgs,
) -> Result<()> {
    let WatchArgs {
        dir,
        ext,
        adapter,
        depth,
        agent: format,
        worktree,
    } = args;
    let worktree = worktree_or_cwd(worktree)?;
    let (manager, mut events) = WatcherManager::new();

    let watcher_config = TieredWatcherConfig::new(ext)
        .with_root(&dir)
        .with_scan_depth(depth)
        .with_settings(settings);
    let (watcher, watcher_events) = TieredWatcher::new(watcher_config)?;
    let registered = watcher.register_from_root();
    manager.add_watcher(adapter.as_str(), watcher, watcher_events)?;

    let stats = manager.stats();
    tracing::info!(
        "watching {} ({} sessions, {} hot, {} dirs)",
        dir.display(),
        registered,
        stats.hot,
        stats.watched_dirs
    );

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let detection = detector.detect_status(format, &worktree);
                println!(
                    "{} {:?} {} -> {} {}",
                    Local::now().format("%H:%M:%S"),
                    event.event_type,
                    event.session_id,
                    format,
                    detection.status
                );
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    manager.close()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sessionwatch=info".parse()?),
        )
        .init();

    let config = config::load(args.config.as_deref())?;
    let caches = Arc::new(LocatorCaches::new(config.cache_settings()));
    let detector = StatusDetector::for_current_user(config.thresholds(), caches)?;

    match args.command {
        Command::Detect { agent, path } => {
            let worktree = worktree_or_cwd(path)?;
            match agent {
                Some(format) => print_detection(&detector, format, &worktree),
                None => {
                    for format in AgentFormat::all() {
                        print_detection(&detector, format, &worktree);
                    }
                }
            }
            Ok(())
        }
        Command::Watch(watch_args) => {
            watch(detector, config.watcher_settings(), watch_args).await
        }
    }
}
