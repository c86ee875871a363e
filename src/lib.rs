pub mod app;
pub mod config;
pub mod error;
pub mod executor;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod validation;

pub use error::{Result, SqlBotError};
pub use orchestrator::{AskFailure, AskOutcome, RetryPolicy, SqlBot};
