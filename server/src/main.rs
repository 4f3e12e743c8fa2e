//! Git Blame LSP Server Entry Point
//!
//! Serves the Language Server Protocol over stdio. Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use gitblame_lsp::config::{BlameSettings, SharedSettings};
use gitblame_lsp::git::{ProcessRunner, SystemProcessRunner};
use gitblame_lsp::watcher::{NotifyWatchService, WatchService};
use gitblame_lsp::BlameBackend;
use parking_lot::RwLock;
use std::sync::Arc;
use tower_lsp::{LspService, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gitblame-lsp")]
#[command(about = "Language server providing per-line git blame")]
#[command(version)]
struct Args {
    /// Maximum number of git blame processes running at once
    #[arg(long, allow_hyphen_values = true)]
    parallel_blames: Option<i64>,

    /// Ignore whitespace changes when blaming (git blame -w)
    #[arg(long)]
    ignore_whitespace: bool,

    /// Git executable to run
    #[arg(long = "git", value_name = "PATH")]
    git_command: Option<String>,

    /// Serve over stdio (default, kept for compatibility)
    #[arg(long)]
    stdio: bool,
}

impl Args {
    fn settings(&self) -> BlameSettings {
        let mut settings = BlameSettings::default();
        if let Some(parallel_blames) = self.parallel_blames {
            settings.parallel_blames = parallel_blames;
        }
        if self.ignore_whitespace {
            settings.ignore_whitespace = true;
        }
        if let Some(git_command) = &self.git_command {
            settings.git_command = git_command.clone();
        }
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitblame_lsp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings: SharedSettings = Arc::new(RwLock::new(args.settings()));
    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemProcessRunner);
    let watcher: Arc<dyn WatchService> =
        Arc::new(NotifyWatchService::new().context("Failed to start file watcher")?);

    if args.stdio {
        tracing::info!("Starting git blame LSP server on stdio");
    } else {
        tracing::info!("Starting git blame LSP server (stdio is the only transport)");
    }

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) =
        LspService::new(move |client| BlameBackend::new(client, settings, runner, watcher));

    Server::new(stdin, stdout, socket).serve(service).await;
    Ok(())
}
