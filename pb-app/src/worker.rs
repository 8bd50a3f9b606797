use crate::journal::Journal;
use crate::messages;
use crate::queue::{Operation, OperationQueue};
use anyhow::{Context, Result};
use chrono::Utc;
use pb_channels::{ChatId, ChatTransport};
use pb_render::Renderer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Single consumer of the operation queue.
///
/// The front operation stays queued while it renders. A failed operation is
/// reported to its owner and skipped; the worker keeps going.
pub struct RenderWorker {
    transport: Arc<dyn ChatTransport>,
    renderer: Arc<dyn Renderer>,
    queue: Arc<OperationQueue>,
    journal: Option<Arc<Journal>>,
    output_dir: PathBuf,
}

impl RenderWorker {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        renderer: Arc<dyn Renderer>,
        queue: Arc<OperationQueue>,
        journal: Option<Arc<Journal>>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            transport,
            renderer,
            queue,
            journal,
            output_dir,
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(shutdown).await })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(&self, shutdown: CancellationToken) {
        while let Some(op) = self.queue.next_pending(&shutdown).await {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = self.render_and_send(&op) => Some(result),
            };
            match outcome {
                Some(result) => self.complete(&op, result).await,
                None => {
                    tracing::info!(operation_id = %op.id, "render interrupted by shutdown; left queued");
                    break;
                }
            }
        }
        tracing::info!("render worker stopped");
    }

    async fn render_and_send(&self, op: &Operation) -> Result<PathBuf> {
        let output = output_path(&self.output_dir, op);
        let started = Instant::now();
        tracing::info!(
            operation_id = %op.id,
            user_id = %op.owner,
            input = %op.image_path.display(),
            output = %output.display(),
            "rendering"
        );
        self.renderer
            .render(&op.image_path, &output, &op.config)
            .await
            .context("render")?;
        tracing::info!(
            operation_id = %op.id,
            elapsed_seconds = started.elapsed().as_secs_f64(),
            "render finished"
        );
        self.transport
            .send_document(ChatId::from(op.owner), &output)
            .await
            .context("send result")?;
        Ok(output)
    }

    async fn complete(&self, op: &Operation, result: Result<PathBuf>) {
        let error = match &result {
            Ok(output) => {
                tracing::info!(
                    operation_id = %op.id,
                    user_id = %op.owner,
                    output = %output.display(),
                    "result sent"
                );
                None
            }
            Err(e) => {
                let text = format!("{e:#}");
                tracing::error!(operation_id = %op.id, user_id = %op.owner, error = %text, "operation failed");
                if let Err(e) = self
                    .transport
                    .send_message(ChatId::from(op.owner), messages::ERROR, None)
                    .await
                {
                    tracing::error!(%e, user_id = %op.owner, "failed to notify user");
                }
                Some(text)
            }
        };

        match self.queue.dequeue() {
            Some(front) if front.id == op.id => {}
            Some(front) => {
                tracing::warn!(expected = %op.id, found = %front.id, "queue front changed under the worker");
            }
            None => tracing::warn!(operation_id = %op.id, "queue emptied under the worker"),
        }

        let Some(journal) = &self.journal else {
            return;
        };
        let appended = match error {
            None => journal.record_finished(op.id).await,
            Some(text) => journal.record_failed(op.id, &text).await,
        };
        if let Err(e) = appended {
            tracing::error!(%e, operation_id = %op.id, "journal append failed");
        }
    }
}

fn output_path(dir: &Path, op: &Operation) -> PathBuf {
    dir.join(format!(
        "{}_{}.{}",
        op.owner,
        Utc::now().timestamp(),
        op.config.extension
    ))
}
