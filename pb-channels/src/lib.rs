//! Chat transport adapters for primitive-bot.
//!
//! Adapters are pure I/O: they convert platform updates into `InboundEvent`s
//! and expose the handful of message operations the bot core needs.

mod error;
mod telegram;
mod traits;
mod types;

pub use error::{Result, TransportError};
pub use telegram::TelegramAdapter;
pub use traits::ChatTransport;
pub use types::{
    Button, CallbackPress, ChatId, InboundEvent, InboundMessage, Keyboard, MessageId, PhotoSize,
    UserId,
};
