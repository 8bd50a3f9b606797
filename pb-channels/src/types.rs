use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ChatId);
id_newtype!(MessageId);

impl From<UserId> for ChatId {
    /// Private chats share their id with the user on the other side.
    fn from(value: UserId) -> Self {
        ChatId::new(value.get())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photos: Vec<PhotoSize>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn has_photo(&self) -> bool {
        !self.photos.is_empty()
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// A press on an inline keyboard button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPress {
    pub callback_id: String,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub data: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(InboundMessage),
    Callback(CallbackPress),
}

impl InboundEvent {
    pub fn sender_id(&self) -> UserId {
        match self {
            Self::Message(message) => message.sender_id,
            Self::Callback(press) => press.sender_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Inline keyboard attached to a message, serialized in Bot API shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    #[serde(rename = "inline_keyboard")]
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_serializes_as_inline_keyboard_markup() {
        let keyboard = Keyboard::new(vec![vec![Button::new("Start", "/create")]]);
        let value = serde_json::to_value(&keyboard).expect("serialize keyboard");
        assert_eq!(
            value,
            serde_json::json!({
                "inline_keyboard": [[{"text": "Start", "callback_data": "/create"}]]
            })
        );
    }

    #[test]
    fn ids_parse_and_convert() {
        let user: UserId = " 295434263 ".parse().expect("parse user id");
        assert_eq!(user.get(), 295434263);
        assert_eq!(ChatId::from(user), ChatId::new(295434263));
        assert!("abc".parse::<MessageId>().is_err());
    }
}
