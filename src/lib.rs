//! OpenAI-compatible chat-completions gateway in front of the Chandler
//! conversation API.
//!
//! Each `POST /v1/chat/completions` resolves a conversation to continue,
//! flattens the OpenAI message list into one prompt, sends a single upstream
//! chat turn and relays the reply either buffered or as SSE chunks.

pub mod api;
pub mod bridge;
pub mod config;
pub mod emitter;
pub mod error;
pub mod openai;
pub mod prompt;
pub mod resolver;
pub mod upstream;

pub use config::Config;
pub use error::{AppError, UpstreamError};
