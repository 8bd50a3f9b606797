use crate::error::Result;
use crate::types::{ChatId, InboundEvent, Keyboard, MessageId};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Unique transport identifier, e.g. "telegram".
    fn transport_id(&self) -> &str;

    /// Start receiving updates. Push to tx for each inbound event.
    async fn start(&self, tx: mpsc::Sender<InboundEvent>) -> Result<()>;

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId>;

    /// Replace text and keyboard of an existing message. Editing with identical
    /// content returns `Ok(())` or `Err(TransportError::NotModified)`.
    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;

    async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<()>;

    /// Acknowledge a button press so the client stops its spinner.
    async fn answer_callback(&self, _callback_id: &str) -> Result<()> {
        Ok(())
    }
}
