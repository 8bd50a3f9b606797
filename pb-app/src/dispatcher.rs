//! Inbound event dispatch: every photo, text message and button press from
//! the transport is handled on its own task.

use crate::config::LimitsConfig;
use crate::input::collect_integer;
use crate::journal::Journal;
use crate::menu::{Field, View};
use crate::messages;
use crate::queue::{Operation, OperationQueue};
use crate::router::{Action, Param, Router};
use crate::session::{Session, SessionRegistry, SessionState};
use anyhow::{Context, Result};
use pb_channels::{
    CallbackPress, ChatId, ChatTransport, InboundEvent, InboundMessage, PhotoSize,
};
use pb_render::RenderConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Smallest side, in pixels, a downloaded photo should have.
const MIN_PHOTO_SIDE: u32 = 256;

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn ChatTransport>,
    sessions: Arc<SessionRegistry>,
    queue: Arc<OperationQueue>,
    router: Arc<Router>,
    journal: Option<Arc<Journal>>,
    limits: LimitsConfig,
    input_dir: PathBuf,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        sessions: Arc<SessionRegistry>,
        queue: Arc<OperationQueue>,
        router: Arc<Router>,
        journal: Option<Arc<Journal>>,
        limits: LimitsConfig,
        input_dir: PathBuf,
    ) -> Self {
        Self {
            transport,
            sessions,
            queue,
            router,
            journal,
            limits,
            input_dir,
        }
    }

    pub fn start(
        self: Arc<Self>,
        inbound_rx: mpsc::Receiver<InboundEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(inbound_rx, shutdown).await })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<InboundEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("dispatcher received shutdown signal");
                    return;
                }
                event = inbound_rx.recv() => event,
            };
            let Some(event) = event else {
                tracing::info!("inbound channel closed");
                return;
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.handle_event(event).await });
        }
    }

    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Message(message) => {
                let chat_id = message.chat_id;
                if let Err(e) = self.handle_message(message).await {
                    self.report_error(chat_id, e).await;
                }
            }
            InboundEvent::Callback(press) => {
                if let Err(e) = self.handle_callback(&press).await {
                    self.report_error(press.chat_id, e).await;
                }
                if let Err(e) = self.transport.answer_callback(&press.callback_id).await {
                    tracing::warn!(%e, callback_id = %press.callback_id, "answer callback failed");
                }
            }
        }
    }

    async fn report_error(&self, chat_id: ChatId, e: anyhow::Error) {
        tracing::error!(chat_id = %chat_id, error = %format!("{e:#}"), "inbound event failed");
        if let Err(e) = self
            .transport
            .send_message(chat_id, messages::ERROR, None)
            .await
        {
            tracing::error!(chat_id = %chat_id, %e, "failed to deliver error message");
        }
    }

    async fn handle_message(&self, message: InboundMessage) -> Result<()> {
        if message.has_photo() {
            return self.handle_photo(message).await;
        }

        let capture = self
            .sessions
            .get(message.sender_id)
            .and_then(|s| s.input_handle().cloned());
        let message = match capture {
            Some(handle) => match handle.forward(message).await {
                Ok(()) => return Ok(()),
                Err(message) => message,
            },
            None => message,
        };

        if message.text().trim() == messages::STATUS_COMMAND {
            return self.send_status(&message).await;
        }
        self.transport
            .send_message(message.chat_id, messages::HELP, None)
            .await?;
        Ok(())
    }

    async fn send_status(&self, message: &InboundMessage) -> Result<()> {
        let operations = self.queue.operations_for_owner(message.sender_id);
        if operations.is_empty() {
            self.transport
                .send_message(message.chat_id, messages::STATUS_EMPTY, None)
                .await?;
            return Ok(());
        }
        for (position, op) in operations {
            self.transport
                .send_message(
                    message.chat_id,
                    &messages::status_report(position, &op.config),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(user_id = %message.sender_id))]
    async fn handle_photo(&self, message: InboundMessage) -> Result<()> {
        let user_id = message.sender_id;
        if let Some(previous) = self.sessions.remove(user_id) {
            if let Some(handle) = previous.input_handle() {
                if let Err(e) = handle.cancel() {
                    tracing::debug!(error = %e, "input capture of replaced session already gone");
                }
            }
            if let Err(e) = self
                .transport
                .delete_message(previous.chat_id(), previous.menu_message_id)
                .await
            {
                tracing::warn!(%e, "failed to delete previous menu");
            }
        }

        let photo = choose_photo(&message.photos)
            .ok_or_else(|| anyhow::anyhow!("no image files in message {}", message.message_id))?;
        let image_path = self.download_photo(photo).await?;

        let root = View::root();
        let menu_message_id = self
            .transport
            .send_message(message.chat_id, &root.text, Some(&root.keyboard))
            .await
            .context("send root menu")?;
        self.sessions.set(
            user_id,
            Session::new(
                user_id,
                menu_message_id,
                image_path,
                RenderConfig::default(),
                &self.limits,
            ),
        );
        tracing::debug!(menu_message_id = %menu_message_id, "session started");
        Ok(())
    }

    async fn download_photo(&self, photo: &PhotoSize) -> Result<PathBuf> {
        let path = self
            .input_dir
            .join(format!("{}.jpg", photo.file_unique_id));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }
        let bytes = self
            .transport
            .download_file(&photo.file_id)
            .await
            .context("download image")?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("save image {}", path.display()))?;
        Ok(path)
    }

    async fn handle_callback(&self, press: &CallbackPress) -> Result<()> {
        let session = self
            .sessions
            .get(press.sender_id)
            .filter(|s| s.menu_message_id == press.message_id);
        let Some(mut session) = session else {
            if let Err(e) = self
                .transport
                .delete_message(press.chat_id, press.message_id)
                .await
            {
                tracing::warn!(%e, message_id = %press.message_id, "failed to delete stale menu");
            }
            return Ok(());
        };

        if let Some(handle) = session.input_handle() {
            if let Err(e) = handle.cancel() {
                tracing::debug!(error = %e, "input capture already gone");
            }
            session.state = SessionState::InMenu;
            self.sessions.set(session.user_id, session.clone());
        }

        let Some(action) = self.router.resolve(&press.data) else {
            tracing::debug!(data = %press.data, "ignoring unknown callback data");
            return Ok(());
        };
        tracing::debug!(?action, user_id = %press.sender_id, "menu action");

        match action {
            Action::ShowRoot => self.show(&session, session.menu.root()).await,
            Action::ShowField(field) => self.show(&session, session.menu.field(field)).await,
            Action::Select(field, param) => self.select(session, field, &param).await,
            Action::CustomInput(field) => self.custom_input(session, field).await,
            Action::Create => self.create(session).await,
        }
    }

    async fn show(&self, session: &Session, view: &View) -> Result<()> {
        match self
            .transport
            .edit_message_text(
                session.chat_id(),
                session.menu_message_id,
                &view.text,
                Some(&view.keyboard),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_modified() => Ok(()),
            Err(e) => Err(anyhow::anyhow!("edit menu: {e}")),
        }
    }

    async fn select(&self, mut session: Session, field: Field, param: &Param) -> Result<()> {
        let Some(config) = field.apply(session.config, param, &self.limits) else {
            tracing::debug!(?field, ?param, "dropping out-of-range value");
            return Ok(());
        };
        session.set_config(config, &self.limits);
        self.sessions.set(session.user_id, session.clone());
        self.show(&session, session.menu.field(field)).await
    }

    async fn custom_input(&self, session: Session, field: Field) -> Result<()> {
        let Some((min, max)) = field.input_bounds(&self.limits) else {
            return Ok(());
        };
        let user_id = session.user_id;
        let value =
            collect_integer(self.transport.as_ref(), &self.sessions, session, min, max).await?;
        let Some(value) = value else {
            return Ok(());
        };
        let Some(session) = self.sessions.get(user_id) else {
            return Ok(());
        };
        self.select(session, field, &Param::Int(value)).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(user_id = %session.user_id))]
    async fn create(&self, session: Session) -> Result<()> {
        let user_id = session.user_id;
        let chat_id = session.chat_id();
        if self.queue.count_for_owner(user_id) >= self.limits.operations_per_user {
            self.transport
                .send_message(chat_id, messages::OPERATIONS_LIMIT, None)
                .await?;
            return Ok(());
        }

        let Some(session) = self.sessions.take_menu(user_id, session.menu_message_id) else {
            tracing::debug!("menu already submitted or replaced");
            return Ok(());
        };
        if let Err(e) = self
            .transport
            .delete_message(chat_id, session.menu_message_id)
            .await
        {
            tracing::warn!(%e, "failed to delete menu of submitted session");
        }

        let op = Operation::new(user_id, session.image_path.clone(), session.config);
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_enqueued(&op).await {
                tracing::error!(%e, operation_id = %op.id, "journal append failed");
            }
        }
        let position = self.queue.enqueue(op.clone());
        tracing::info!(
            operation_id = %op.id,
            position,
            image = %op.image_path.display(),
            iterations = op.config.iterations,
            shape = op.config.shape.index(),
            alpha = op.config.alpha,
            repeat = op.config.repeat,
            size = op.config.output_size,
            extension = %op.config.extension,
            "operation enqueued"
        );

        self.transport
            .send_message(chat_id, &messages::status_report(position, &op.config), None)
            .await?;
        Ok(())
    }
}

/// The smallest photo with both sides at least [`MIN_PHOTO_SIDE`], or the
/// largest one when none is big enough.
fn choose_photo(photos: &[PhotoSize]) -> Option<&PhotoSize> {
    let area = |p: &&PhotoSize| u64::from(p.width) * u64::from(p.height);
    photos
        .iter()
        .filter(|p| p.width >= MIN_PHOTO_SIDE && p.height >= MIN_PHOTO_SIDE)
        .min_by_key(area)
        .or_else(|| photos.iter().max_by_key(area))
}
