//! teamfeed: aggregator entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Init logger (TEAMFEED_LOG or "info"; RUST_LOG wins when set)
//!   3. Load .env.json
//!   4. Build highlight matcher + handlers + pipeline
//!   5. Spawn signal watcher (SIGINT/SIGTERM cancel the shutdown token)
//!   6. Supervisor: initialize + parallel connect
//!   7. Stream until a signal arrives, then shut the fleet down

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use teamfeed::config;
use teamfeed::error::AppError;
use teamfeed::handlers::{ConsoleHandler, NotificationHandler, SpeechHandler};
use teamfeed::highlight::HighlightMatcher;
use teamfeed::logger;
use teamfeed::pipeline::MessagePipeline;
use teamfeed::slack::SlackPlatform;
use teamfeed::supervisor::TeamSupervisor;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("TEAMFEED_LOG").unwrap_or_else(|_| "info".into());
    logger::init(&log_level)?;

    let config = config::load()?;
    info!(teams = config.teams.len(), "config loaded");

    let highlight = if config.highlight_keywords.is_empty() {
        None
    } else {
        Some(Arc::new(HighlightMatcher::new(&config.highlight_keywords)?))
    };

    let pipeline = Arc::new(MessagePipeline::new());
    pipeline.register_handler(Arc::new(ConsoleHandler::new(
        config.handlers.console.enabled,
        highlight,
    )))?;
    pipeline.register_handler(Arc::new(NotificationHandler::new(
        config.handlers.notification.enabled,
    )))?;
    pipeline.register_handler(Arc::new(SpeechHandler::new(
        config.handlers.speech.enabled,
        config.handlers.speech.command.clone(),
    )))?;
    info!(
        handlers = pipeline.handler_count(),
        enabled = pipeline.enabled_handler_count(),
        keywords = config.highlight_keywords.len(),
        "pipeline ready"
    );

    // Shared shutdown token: signals cancel it, every task watches it.
    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    let supervisor = TeamSupervisor::new(Arc::new(SlackPlatform::new()), shutdown.clone());
    supervisor.set_pipeline(pipeline);
    supervisor.initialize(config.teams)?;
    supervisor.connect_all().await?;

    info!(
        connected = supervisor.connected_count(),
        total = supervisor.total_count(),
        "streaming; ctrl-c to quit"
    );

    shutdown.cancelled().await;
    supervisor.shutdown().await;
    Ok(())
}

/// Cancel `token` on the first SIGINT or SIGTERM.
fn spawn_signal_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
                        _ = term.recv() => info!("terminate received, shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!("cannot install SIGTERM handler: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("interrupt received, shutting down");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, shutting down");
        }
        token.cancel();
    });
}
