//! Wiring a `SqlBot` from configuration.

use crate::config::Config;
use crate::error::Result;
use crate::executor::SqliteExecutor;
use crate::llm::{ChatModel, LlmClient};
use crate::orchestrator::SqlBot;
use crate::prompts;
use crate::session::ChatSession;
use std::sync::Arc;
use tracing::info;

/// Open the database and create both model sessions.
pub fn build_bot(config: &Config) -> Result<SqlBot> {
    let executor = SqliteExecutor::open(&config.database_path, config.statement_policy)?;

    let sql_model = model_client(config, &config.sql_model.model)?;
    let answer_model = model_client(config, &config.answer_model.model)?;

    info!(
        "Using {} models: {} (SQL, temperature {}), {} (answer, temperature {})",
        config.provider,
        config.sql_model.model,
        config.sql_model.temperature,
        config.answer_model.model,
        config.answer_model.temperature
    );

    let sql_session = ChatSession::new("sql", sql_model, config.schema_prompt()?, config.sql_model.temperature)
        .with_history_limit(config.history_limit);
    let answer_session = ChatSession::new(
        "answer",
        answer_model,
        prompts::RESPONSE_PROMPT,
        config.answer_model.temperature,
    )
    .with_history_limit(config.history_limit);

    Ok(SqlBot::new(sql_session, answer_session, Arc::new(executor)).with_retry_policy(config.retry))
}

fn model_client(config: &Config, model: &str) -> Result<Arc<dyn ChatModel>> {
    let mut client = LlmClient::new(config.provider, config.api_key.clone(), model.to_string());
    if let Some(base_url) = &config.base_url {
        client = client.with_base_url(base_url.as_str());
    }
    if let Some(timeout) = config.request_timeout {
        client = client.with_timeout(timeout)?;
    }
    Ok(Arc::new(client))
}
