//! Modal integer input: the next free-text messages of a user are diverted
//! from normal handling until a valid number arrives or the prompt is
//! abandoned.

use crate::menu::View;
use crate::messages;
use crate::session::{InputHandle, Session, SessionRegistry, SessionState};
use anyhow::Result;
use pb_channels::{ChatId, ChatTransport, MessageId, UserId};

/// Ask the user of `session` for an integer in `min..=max`.
///
/// Returns `Ok(None)` when the capture is cancelled: by the reaper, by the
/// user navigating away, or by the session being replaced or removed.
#[tracing::instrument(level = "info", skip_all, fields(user_id = %session.user_id, min = min, max = max))]
pub async fn collect_integer(
    transport: &dyn ChatTransport,
    registry: &SessionRegistry,
    mut session: Session,
    min: i64,
    max: i64,
) -> Result<Option<i64>> {
    if let Some(active) = session.input_handle() {
        if let Err(e) = active.cancel() {
            tracing::debug!(error = %e, "previous input capture already gone");
        }
    }

    let user_id = session.user_id;
    let chat_id = session.chat_id();
    let menu_message_id = session.menu_message_id;

    let (handle, mut rx) = InputHandle::channel();
    let capture = handle.id();
    session.state = SessionState::InInputDialog(handle);
    registry.set(user_id, session);

    let prompt = View::prompt(messages::input_prompt(min, max));
    if let Err(e) = show(transport, chat_id, menu_message_id, &prompt).await {
        release(registry, user_id, capture);
        return Err(e);
    }

    loop {
        let message = tokio::select! {
            biased;
            _ = rx.quit.recv() => None,
            message = rx.input.recv() => message,
        };
        let Some(message) = message else {
            tracing::debug!("input capture cancelled");
            return Ok(None);
        };

        if let Err(e) = transport
            .delete_message(message.chat_id, message.message_id)
            .await
        {
            tracing::warn!(%e, "failed to delete input message");
        }

        match parse_in_range(message.text(), min, max) {
            Some(value) => {
                release(registry, user_id, capture);
                return Ok(Some(value));
            }
            None => {
                tracing::debug!(input = message.text(), "rejected input value");
                let reprompt = View::prompt(messages::input_reprompt(min, max));
                if let Err(e) = show(transport, chat_id, menu_message_id, &reprompt).await {
                    release(registry, user_id, capture);
                    return Err(e);
                }
            }
        }
    }
}

fn release(registry: &SessionRegistry, user_id: UserId, capture: uuid::Uuid) {
    if !registry.release_input(user_id, capture) {
        tracing::debug!("session moved on before input completed");
    }
}

async fn show(
    transport: &dyn ChatTransport,
    chat_id: ChatId,
    message_id: MessageId,
    view: &View,
) -> Result<()> {
    match transport
        .edit_message_text(chat_id, message_id, &view.text, Some(&view.keyboard))
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_modified() => Ok(()),
        Err(e) => Err(anyhow::anyhow!("show input prompt: {e}")),
    }
}

fn parse_in_range(text: &str, min: i64, max: i64) -> Option<i64> {
    text.trim()
        .parse::<i64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}
