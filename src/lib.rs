//! Terminal chat client for local OpenAI-compatible model servers.
//!
//! User turns are sent with the whole conversation to
//! `POST {base_url}/chat/completions` and the reply is streamed back into a
//! single trailing assistant turn.

pub mod app;
pub mod config;
pub mod handler;
pub mod input;
pub mod logging;
pub mod openai;
pub mod session;
pub mod sse;
pub mod transcript;
pub mod tui;
pub mod ui;

// Re-export main types for convenience
pub use app::App;
pub use config::Config;
pub use openai::OpenAIClient;
pub use session::{ChatSession, Phase, RequestId, StreamEvent};
pub use transcript::{ChatRole, ChatTurn, Transcript};
