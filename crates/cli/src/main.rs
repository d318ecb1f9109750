//! capivara-watcher - print file system changes under one or more paths

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use watcher::{WatchSession, WatcherConfig};

mod output;

use output::Printer;

/// Capivara - recursive file system watcher
#[derive(Parser)]
#[command(name = "capivara-watcher")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Paths to watch recursively
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Don't report entries that already exist at startup
    #[arg(long)]
    ignore_initial: bool,

    /// Use the polling backend with this interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll: Option<u64>,

    /// Ignore paths matching this gitignore-style pattern (repeatable)
    #[arg(long = "ignore", value_name = "GLOB")]
    ignore: Vec<String>,

    /// Also honour each root's .gitignore
    #[arg(long)]
    gitignore: bool,

    /// Load settings from a TOML file (flags take precedence)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Merge the optional config file with command line flags
    fn watcher_config(&self) -> Result<WatcherConfig> {
        let mut config = match &self.config {
            Some(path) => WatcherConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => WatcherConfig::default(),
        };

        if self.ignore_initial {
            config = config.with_ignore_initial(true);
        }
        if let Some(ms) = self.poll {
            config = config.with_poll_interval(Duration::from_millis(ms));
        }
        if self.gitignore {
            config = config.with_gitignore(true);
        }
        for pattern in &self.ignore {
            config = config.with_ignored(pattern.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.paths.is_empty() {
        eprintln!("{}", Cli::command().render_help());
        return ExitCode::FAILURE;
    }

    // Guard flushes the log file on exit
    let _guard = match init_tracing(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    match log_file {
        Some(path) => {
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            builder
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;
            Ok(Some(guard))
        }
        None => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;
            Ok(None)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.watcher_config()?;
    let session = WatchSession::new(&cli.paths, config).context("Failed to create watcher")?;
    let printer = Printer::detect(cli.json);

    let (_, mut events) = session.subscribe();
    let mut interrupted = interrupt_signal();

    if !cli.json {
        println!("Watching:");
        for root in session.roots() {
            println!("  {}", root.display());
        }
        println!("Press Ctrl+C to stop.");
    }

    tokio::select! {
        started = session.start() => {
            started?;
        }
        Ok(()) = interrupted.changed() => {
            return Ok(shutdown(&session).await);
        }
    }

    loop {
        tokio::select! {
            Ok(()) = interrupted.changed() => {
                return Ok(shutdown(&session).await);
            }
            event = events.recv() => match event {
                Some(event) => printer.print(&event),
                None => {
                    // The session gave up on its own: nothing could be watched
                    debug!("Event stream ended");
                    return Ok(ExitCode::FAILURE);
                }
            },
        }
    }
}

/// Flips to `true` on the first Ctrl+C
fn interrupt_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(true);
            }
            Err(e) => warn!("Cannot listen for Ctrl+C: {}", e),
        }
    });
    rx
}

async fn shutdown(session: &WatchSession) -> ExitCode {
    println!("Stopping watcher...");
    session.stop().await;
    ExitCode::SUCCESS
}
