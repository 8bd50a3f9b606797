//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use pb_channels::{
    ChatId, ChatTransport, InboundEvent, InboundMessage, Keyboard, MessageId, TransportError,
    UserId,
};
use pb_render::{RenderConfig, RenderError, Renderer};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send {
        chat: ChatId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Edit {
        chat: ChatId,
        message: MessageId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Delete {
        chat: ChatId,
        message: MessageId,
    },
    Download {
        file_id: String,
    },
    Document {
        chat: ChatId,
        path: PathBuf,
    },
    Answer {
        callback_id: String,
    },
}

/// Records every call and hands out increasing message ids.
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    next_message_id: AtomicI64,
    edits_not_modified: AtomicBool,
    fail_sends: AtomicBool,
    fail_deletes: AtomicBool,
    fail_documents: AtomicBool,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_message_id: AtomicI64::new(100),
            edits_not_modified: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_documents: AtomicBool::new(false),
        }
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_edits_not_modified(&self, on: bool) {
        self.edits_not_modified.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_documents(&self, on: bool) {
        self.fail_documents.store(on, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edit_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn documents(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Document { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn answered(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Answer { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn transport_id(&self) -> &str {
        "recording"
    }

    async fn start(&self, _tx: mpsc::Sender<InboundEvent>) -> pb_channels::Result<()> {
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> pb_channels::Result<MessageId> {
        self.record(Call::Send {
            chat: chat_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Http("connection reset".to_string()));
        }
        Ok(MessageId::new(
            self.next_message_id.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> pb_channels::Result<()> {
        self.record(Call::Edit {
            chat: chat_id,
            message: message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        if self.edits_not_modified.load(Ordering::SeqCst) {
            return Err(TransportError::NotModified);
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> pb_channels::Result<()> {
        self.record(Call::Delete {
            chat: chat_id,
            message: message_id,
        });
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                code: 400,
                description: "Bad Request: message can't be deleted".to_string(),
            });
        }
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> pb_channels::Result<Vec<u8>> {
        self.record(Call::Download {
            file_id: file_id.to_string(),
        });
        Ok(b"jpeg bytes".to_vec())
    }

    async fn send_document(&self, chat_id: ChatId, path: &Path) -> pb_channels::Result<()> {
        self.record(Call::Document {
            chat: chat_id,
            path: path.to_path_buf(),
        });
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                code: 413,
                description: "Request Entity Too Large".to_string(),
            });
        }
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> pb_channels::Result<()> {
        self.record(Call::Answer {
            callback_id: callback_id.to_string(),
        });
        Ok(())
    }
}

/// Renders by writing a placeholder file; failures are scripted per call.
#[derive(Default)]
pub struct ScriptedRenderer {
    failures: Mutex<VecDeque<Option<String>>>,
    rendered: Mutex<Vec<(PathBuf, PathBuf, RenderConfig)>>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for upcoming renders: `Some(stderr)` fails, `None`
    /// succeeds. Unscripted renders succeed.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Option<&'static str>>) {
        self.failures
            .lock()
            .unwrap()
            .extend(outcomes.into_iter().map(|o| o.map(str::to_string)));
    }

    pub fn rendered(&self) -> Vec<(PathBuf, PathBuf, RenderConfig)> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(
        &self,
        input: &Path,
        output: &Path,
        config: &RenderConfig,
    ) -> pb_render::Result<()> {
        self.rendered
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf(), *config));
        let failure = self.failures.lock().unwrap().pop_front().flatten();
        if let Some(stderr) = failure {
            return Err(RenderError::Failed { status: 1, stderr });
        }
        tokio::fs::write(output, b"rendered")
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))
    }
}

pub fn text_message(user: i64, message_id: i64, text: &str) -> InboundMessage {
    InboundMessage {
        message_id: MessageId::new(message_id),
        chat_id: ChatId::new(user),
        sender_id: UserId::new(user),
        sender_name: "Kir".to_string(),
        text: Some(text.to_string()),
        photos: Vec::new(),
        received_at: chrono::Utc::now(),
    }
}

/// Poll `cond` until it holds, yielding to other tasks in between.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
