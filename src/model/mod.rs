//! Conversation and message documents

pub mod conversation;
pub mod message;
pub mod paths;
pub mod text;

pub use conversation::*;
pub use message::*;
pub use text::{normalize_search_text, preview, PREVIEW_CHARS};
