use crate::error::{Result, TransportError};
use crate::traits::ChatTransport;
use crate::types::{
    CallbackPress, ChatId, InboundEvent, InboundMessage, Keyboard, MessageId, PhotoSize, UserId,
};
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

const TELEGRAM_TRANSPORT_ID: &str = "telegram";
const TELEGRAM_LONG_POLL_TIMEOUT_SECS: &str = "30";
const TELEGRAM_ALLOWED_UPDATES: &str = r#"["message","callback_query"]"#;
const TELEGRAM_NON_TRANSIENT_DELAY: Duration = Duration::from_secs(10);
const TELEGRAM_RETRY_BASE_MS: u64 = 250;
const TELEGRAM_RETRY_MAX_MS: u64 = 30_000;
const TELEGRAM_NOT_MODIFIED_MARKER: &str = "message is not modified";

#[derive(Clone)]
pub struct TelegramAdapter {
    http: reqwest::Client,
    bot_token: String,
}

impl TelegramAdapter {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
        })
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Url::parse(&format!(
            "https://api.telegram.org/bot{}/{}",
            self.bot_token, method
        ))
        .map_err(|e| TransportError::Http(e.to_string()))
    }

    fn file_url(&self, file_path: &str) -> Result<Url> {
        Url::parse(&format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot_token, file_path
        ))
        .map_err(|e| TransportError::Http(e.to_string()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = self.api_url(method)?;
        let response = self.http.post(url).json(body).send().await?;
        read_api_response(method, response).await
    }
}

#[async_trait::async_trait]
impl ChatTransport for TelegramAdapter {
    fn transport_id(&self) -> &str {
        TELEGRAM_TRANSPORT_ID
    }

    async fn start(&self, tx: mpsc::Sender<InboundEvent>) -> Result<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.run_poll_loop(tx).await {
                tracing::error!(%e, "telegram poll loop exited");
            }
        });
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = serde_json::to_value(keyboard)?;
        }
        let sent: TelegramSentMessage = self.call("sendMessage", &body).await?;
        Ok(MessageId::new(sent.message_id))
    }

    async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = serde_json::to_value(keyboard)?;
        }
        match self.call::<serde_json::Value>("editMessageText", &body).await {
            Ok(_) => Ok(()),
            Err(TransportError::NotModified) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        self.call::<serde_json::Value>("deleteMessage", &body)
            .await
            .map(|_| ())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({ "file_id": file_id });
        let file: TelegramFile = self.call("getFile", &body).await?;
        let Some(file_path) = file.file_path.filter(|p| !p.trim().is_empty()) else {
            return Err(TransportError::ResponseFormat(format!(
                "telegram getFile returned no file_path for file_id={file_id}"
            )));
        };

        let response = self.http.get(self.file_url(&file_path)?).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Api {
                code: i64::from(status.as_u16()),
                description: text,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        let url = self.api_url("sendDocument")?;
        let response = self.http.post(url).multipart(form).send().await?;
        read_api_response::<serde_json::Value>("sendDocument", response)
            .await
            .map(|_| ())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        let body = serde_json::json!({ "callback_query_id": callback_id });
        self.call::<serde_json::Value>("answerCallbackQuery", &body)
            .await
            .map(|_| ())
    }
}

impl TelegramAdapter {
    #[tracing::instrument(level = "info", skip_all)]
    async fn run_poll_loop(&self, tx: mpsc::Sender<InboundEvent>) -> Result<()> {
        let mut offset: i64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            let url = self.api_url("getUpdates")?;
            let response = match self
                .http
                .get(url)
                .query(&[
                    ("timeout", TELEGRAM_LONG_POLL_TIMEOUT_SECS),
                    ("offset", &offset.to_string()),
                    ("allowed_updates", TELEGRAM_ALLOWED_UPDATES),
                ])
                .send()
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(
                        %error,
                        attempt = consecutive_failures,
                        ?delay,
                        "telegram getUpdates request failed; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_else(|error| {
                    format!("<failed to read telegram error body: {error}>")
                });
                if is_transient_status(status) {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(
                        %status,
                        %body,
                        attempt = consecutive_failures,
                        ?delay,
                        "telegram getUpdates transient failure; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    consecutive_failures = 0;
                    tracing::error!(
                        %status,
                        %body,
                        ?TELEGRAM_NON_TRANSIENT_DELAY,
                        "telegram getUpdates non-transient failure; keeping poll loop alive"
                    );
                    tokio::time::sleep(TELEGRAM_NON_TRANSIENT_DELAY).await;
                }
                continue;
            }

            let parsed = match response.json::<TelegramGetUpdatesResponse>().await {
                Ok(parsed) => parsed,
                Err(error) => {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(
                        %error,
                        attempt = consecutive_failures,
                        ?delay,
                        "telegram getUpdates payload parse failed; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            consecutive_failures = 0;

            let mut updates = parsed.result;
            updates.sort_by_key(|update| update.update_id);
            for update in updates {
                // Advance offset before conversion to avoid poison-update replay loops.
                if update.update_id < offset {
                    continue;
                }
                offset = update.update_id.saturating_add(1);

                let Some(event) = build_inbound_event(&update) else {
                    tracing::debug!(update_id = update.update_id, "skipping unsupported update");
                    continue;
                };
                match &event {
                    InboundEvent::Message(message) => tracing::info!(
                        sender_id = %message.sender_id,
                        sender_name = %message.sender_name,
                        text = %message.text(),
                        photos = message.photos.len(),
                        "telegram message received"
                    ),
                    InboundEvent::Callback(press) => tracing::info!(
                        sender_id = %press.sender_id,
                        sender_name = %press.sender_name,
                        data = %press.data,
                        "telegram callback query received"
                    ),
                }
                tx.send(event)
                    .await
                    .map_err(|e| TransportError::Io(format!("telegram inbound queue closed: {e}")))?;
            }
        }
    }
}

async fn read_api_response<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    let envelope: TelegramEnvelope<T> = match serde_json::from_str(&text) {
        Ok(envelope) => envelope,
        Err(error) if status.is_success() => {
            return Err(TransportError::ResponseFormat(format!(
                "telegram {method} payload parse failed: {error}"
            )));
        }
        Err(_) => {
            return Err(TransportError::Api {
                code: i64::from(status.as_u16()),
                description: text,
            });
        }
    };
    envelope.into_result(method)
}

fn transient_retry_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.saturating_sub(1).min(10);
    Duration::from_millis((TELEGRAM_RETRY_BASE_MS * multiplier).min(TELEGRAM_RETRY_MAX_MS))
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn build_inbound_event(update: &TelegramUpdate) -> Option<InboundEvent> {
    if let Some(message) = update.message.as_ref() {
        return build_message_inbound(message).map(InboundEvent::Message);
    }
    if let Some(query) = update.callback_query.as_ref() {
        return build_callback_inbound(query).map(InboundEvent::Callback);
    }
    None
}

fn build_message_inbound(message: &TelegramMessage) -> Option<InboundMessage> {
    let chat = message.chat.as_ref()?;
    let from = message.from.as_ref()?;
    let text = message
        .text
        .as_deref()
        .or(message.caption.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned);

    Some(InboundMessage {
        message_id: MessageId::new(message.message_id),
        chat_id: ChatId::new(chat.id),
        sender_id: UserId::new(from.id),
        sender_name: from.first_name.clone().unwrap_or_default(),
        text,
        photos: message
            .photo
            .iter()
            .map(|photo| PhotoSize {
                file_id: photo.file_id.clone(),
                file_unique_id: photo.file_unique_id.clone(),
                width: photo.width,
                height: photo.height,
            })
            .collect(),
        received_at: Utc::now(),
    })
}

fn build_callback_inbound(query: &TelegramCallbackQuery) -> Option<CallbackPress> {
    let message = query.message.as_ref()?;
    let chat = message.chat.as_ref()?;
    Some(CallbackPress {
        callback_id: query.id.clone(),
        sender_id: UserId::new(query.from.id),
        sender_name: query.from.first_name.clone().unwrap_or_default(),
        chat_id: ChatId::new(chat.id),
        message_id: MessageId::new(message.message_id),
        data: query.data.clone().unwrap_or_default(),
        received_at: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct TelegramEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "Option::default")]
    result: Option<T>,
}

impl<T> TelegramEnvelope<T> {
    fn into_result(self, method: &str) -> Result<T> {
        if !self.ok {
            let description = self.description.unwrap_or_default();
            if description.contains(TELEGRAM_NOT_MODIFIED_MARKER) {
                return Err(TransportError::NotModified);
            }
            return Err(TransportError::Api {
                code: self.error_code.unwrap_or_default(),
                description,
            });
        }
        self.result.ok_or_else(|| {
            TransportError::ResponseFormat(format!("telegram {method} response has no result"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct TelegramGetUpdatesResponse {
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    chat: Option<TelegramChat>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<TelegramPhotoSize>,
}

#[derive(Debug, Deserialize)]
struct TelegramCallbackQuery {
    id: String,
    from: TelegramUser,
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramPhotoSize {
    file_id: String,
    file_unique_id: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramSentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        assert_eq!(transient_retry_delay(1).as_millis(), 250);
        assert_eq!(transient_retry_delay(2).as_millis(), 500);
        assert_eq!(transient_retry_delay(3).as_millis(), 1000);
        assert_eq!(transient_retry_delay(20).as_millis(), 30000);
    }

    #[test]
    fn photo_message_becomes_inbound_message_with_sizes() {
        let update: TelegramUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 7,
            "message": {
                "message_id": 11,
                "from": {"id": 295434263, "first_name": "Kir"},
                "chat": {"id": 295434263, "type": "private"},
                "photo": [
                    {"file_id": "small", "file_unique_id": "u1", "width": 90, "height": 67},
                    {"file_id": "large", "file_unique_id": "u2", "width": 320, "height": 240}
                ]
            }
        }))
        .expect("parse update");

        let Some(InboundEvent::Message(message)) = build_inbound_event(&update) else {
            panic!("expected message event");
        };
        assert_eq!(message.sender_id, UserId::new(295434263));
        assert_eq!(message.sender_name, "Kir");
        assert_eq!(message.text, None);
        assert_eq!(message.photos.len(), 2);
        assert_eq!(message.photos[1].file_id, "large");
    }

    #[test]
    fn callback_query_becomes_press_bound_to_menu_message() {
        let update: TelegramUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 42},
                "message": {"message_id": 99, "chat": {"id": 42, "type": "private"}},
                "data": "/settings/alpha/128"
            }
        }))
        .expect("parse update");

        let Some(InboundEvent::Callback(press)) = build_inbound_event(&update) else {
            panic!("expected callback event");
        };
        assert_eq!(press.callback_id, "cb-1");
        assert_eq!(press.message_id, MessageId::new(99));
        assert_eq!(press.data, "/settings/alpha/128");
    }

    #[test]
    fn updates_without_sender_or_message_are_skipped() {
        let update: TelegramUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 9,
            "message": {"message_id": 1, "chat": {"id": 5, "type": "channel"}, "text": "hi"}
        }))
        .expect("parse update");
        assert!(build_inbound_event(&update).is_none());
    }

    #[test]
    fn envelope_maps_not_modified_and_api_errors() {
        let not_modified: TelegramEnvelope<serde_json::Value> =
            serde_json::from_value(serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: message is not modified: specified new message content and reply markup are exactly the same"
            }))
            .expect("parse envelope");
        assert!(
            not_modified
                .into_result("editMessageText")
                .unwrap_err()
                .is_not_modified()
        );

        let forbidden: TelegramEnvelope<serde_json::Value> =
            serde_json::from_value(serde_json::json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            }))
            .expect("parse envelope");
        match forbidden.into_result("sendMessage") {
            Err(TransportError::Api { code, .. }) => assert_eq!(code, 403),
            other => panic!("unexpected result: {other:?}"),
        }

        let sent: TelegramEnvelope<TelegramSentMessage> =
            serde_json::from_value(serde_json::json!({
                "ok": true,
                "result": {"message_id": 17, "chat": {"id": 1}}
            }))
            .expect("parse envelope");
        assert_eq!(sent.into_result("sendMessage").expect("ok").message_id, 17);
    }
}
