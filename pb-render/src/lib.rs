//! Render engine boundary for primitive-bot.
//!
//! The image-to-shapes algorithm itself is an external program; this crate
//! only describes a rendering and knows how to ask for one.

mod engine;
mod error;
mod types;

pub use engine::{PrimitiveCli, Renderer};
pub use error::{RenderError, Result};
pub use types::{Extension, RenderConfig, Shape};
