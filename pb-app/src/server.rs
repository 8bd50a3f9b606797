//! primitive-bot server.
//!
//! Builds the queue, session registry, dispatcher and render worker around a
//! Telegram transport and runs them until a shutdown signal arrives.

use crate::config::BotConfig;
use crate::dispatcher::Dispatcher;
use crate::journal::{self, Journal};
use crate::queue::OperationQueue;
use crate::router::Router;
use crate::session::SessionRegistry;
use crate::worker::RenderWorker;
use anyhow::{Context, Result};
use pb_channels::{ChatTransport, TelegramAdapter};
use pb_render::{PrimitiveCli, Renderer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const INBOUND_BUFFER: usize = 256;

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BotConfig::load_with_path(config_path).await?;
    tracing::info!(
        config_path = %path.display(),
        input_dir = %cfg.storage.input_dir.display(),
        output_dir = %cfg.storage.output_dir.display(),
        journal = ?cfg.journal_path(),
        render_binary = %cfg.render.binary.display(),
        render_workers = ?cfg.render.workers,
        operations_per_user = cfg.limits.operations_per_user,
        session_timeout_seconds = cfg.sessions.timeout_seconds,
        "config ok"
    );
    Ok(())
}

/// Rebuild the queue from the journal and print what is still pending.
pub async fn replay(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = BotConfig::load(config_path).await?;
    let Some(path) = cfg.journal_path() else {
        println!("journal disabled; nothing to replay");
        return Ok(());
    };
    let queue = OperationQueue::new();
    let summary = journal::replay(path, &queue).await?;
    println!(
        "{}: {} enqueued, {} completed, {} skipped, {} pending",
        path.display(),
        summary.enqueued,
        summary.completed,
        summary.skipped,
        queue.len()
    );
    if queue.is_empty() {
        return Ok(());
    }
    for (index, op) in queue.snapshot().iter().enumerate() {
        println!(
            "{:>3}. user {} | {} | iterations={} shape={} alpha={} repeat={} size={} ext={} | {}",
            index + 1,
            op.owner,
            op.image_path.display(),
            op.config.iterations,
            op.config.shape.index(),
            op.config.alpha,
            op.config.repeat,
            op.config.output_size,
            op.config.extension,
            op.id,
        );
    }
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = BotConfig::load_with_path(config_path).await?;
    for dir in [&cfg.storage.input_dir, &cfg.storage.output_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;
    }

    let queue = Arc::new(OperationQueue::new());
    let journal = match cfg.journal_path() {
        Some(path) => {
            journal::replay(path, &queue).await?;
            let journal = Journal::open(path).await?;
            tracing::info!(path = %journal.path().display(), pending = queue.len(), "journal opened");
            Some(Arc::new(journal))
        }
        None => None,
    };

    let transport: Arc<dyn ChatTransport> =
        Arc::new(TelegramAdapter::new(&cfg.telegram.bot_token)?);
    let renderer = build_renderer(&cfg);

    let sessions = Arc::new(SessionRegistry::new(cfg.sessions.timeout()));
    sessions.spawn_reaper(cfg.sessions.reap_interval()).await;

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let shutdown = CancellationToken::new();

    let dispatcher = Arc::new(Dispatcher::new(
        transport.clone(),
        sessions.clone(),
        queue.clone(),
        Arc::new(Router::new()?),
        journal.clone(),
        cfg.limits,
        cfg.storage.input_dir.clone(),
    ));
    let dispatcher_handle = dispatcher.start(inbound_rx, shutdown.child_token());

    let worker = Arc::new(RenderWorker::new(
        transport.clone(),
        renderer,
        queue.clone(),
        journal,
        cfg.storage.output_dir.clone(),
    ));
    let worker_handle = worker.start(shutdown.child_token());

    transport.start(inbound_tx).await?;
    tracing::info!(
        config_path = %cfg_path.display(),
        transport = transport.transport_id(),
        pending_operations = queue.len(),
        "primitive-bot serving"
    );

    shutdown_signal(shutdown.clone()).await;

    sessions.shutdown().await;
    join("dispatcher", dispatcher_handle).await;
    join("render worker", worker_handle).await;
    tracing::info!(pending_operations = queue.len(), "shutdown completed");
    Ok(())
}

fn build_renderer(cfg: &BotConfig) -> Arc<dyn Renderer> {
    let mut cli = PrimitiveCli::new(&cfg.render.binary)
        .with_timeout(Duration::from_secs(cfg.render.timeout_seconds));
    if let Some(workers) = cfg.render.workers {
        cli = cli.with_workers(workers);
    }
    Arc::new(cli)
}

async fn join(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(Duration::from_secs(5), handle).await {
        Ok(Ok(())) => tracing::info!(task = name, "task stopped"),
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "task join failed during shutdown"),
        Err(_) => tracing::warn!(task = name, "timed out waiting for task shutdown"),
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
