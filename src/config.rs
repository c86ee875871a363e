//! Runtime configuration, read from the environment (and `.env`).

use crate::error::{Result, SqlBotError};
use crate::executor::StatementPolicy;
use crate::llm::Provider;
use crate::orchestrator::RetryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Model and sampling temperature for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: Provider,
    pub api_key: String,
    pub base_url: Option<String>,
    /// Low temperature: the SQL has to be right, not creative.
    pub sql_model: ModelSettings,
    pub answer_model: ModelSettings,
    pub database_path: PathBuf,
    pub retry: RetryPolicy,
    /// Exchanges kept per session; `None` keeps the whole conversation.
    pub history_limit: Option<usize>,
    pub statement_policy: StatementPolicy,
    pub request_timeout: Option<Duration>,
    /// File replacing the built-in schema prompt.
    pub schema_prompt_path: Option<PathBuf>,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match var("SQLBOT_PROVIDER") {
            Some(p) => p.parse::<Provider>()?,
            None => Provider::Gemini,
        };

        let api_key = var(provider.api_key_var()).ok_or_else(|| {
            SqlBotError::Config(format!("{} is not set", provider.api_key_var()))
        })?;

        let (default_sql_model, default_answer_model) = match provider {
            Provider::Gemini => ("gemini-1.5-flash", "gemini-1.5-pro"),
            Provider::OpenAi => ("gpt-4o-mini", "gpt-4o"),
        };

        let sql_model = ModelSettings {
            model: var("SQLBOT_SQL_MODEL").unwrap_or_else(|| default_sql_model.to_string()),
            temperature: parse_var::<f32>(&var, "SQLBOT_SQL_TEMPERATURE")?.unwrap_or(0.3),
        };
        let answer_model = ModelSettings {
            model: var("SQLBOT_ANSWER_MODEL").unwrap_or_else(|| default_answer_model.to_string()),
            temperature: parse_var::<f32>(&var, "SQLBOT_ANSWER_TEMPERATURE")?.unwrap_or(1.0),
        };

        let defaults = RetryPolicy::default();
        let max_attempts = parse_var::<u32>(&var, "SQLBOT_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(SqlBotError::Config("SQLBOT_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        let backoff_unit = parse_var::<f64>(&var, "SQLBOT_BACKOFF_SECS")?
            .map(seconds("SQLBOT_BACKOFF_SECS"))
            .transpose()?
            .unwrap_or(defaults.backoff_unit);

        let allow_writes = parse_bool(&var, "SQLBOT_ALLOW_WRITES")?.unwrap_or(false);

        let request_timeout = parse_var::<f64>(&var, "SQLBOT_REQUEST_TIMEOUT_SECS")?
            .map(seconds("SQLBOT_REQUEST_TIMEOUT_SECS"))
            .transpose()?;

        Ok(Self {
            provider,
            api_key,
            base_url: var("SQLBOT_LLM_BASE_URL"),
            sql_model,
            answer_model,
            database_path: var("SQLBOT_DATABASE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("database.db")),
            retry: RetryPolicy { max_attempts, backoff_unit },
            history_limit: parse_var::<usize>(&var, "SQLBOT_HISTORY_LIMIT")?,
            statement_policy: if allow_writes {
                StatementPolicy::Unrestricted
            } else {
                StatementPolicy::ReadOnly
            },
            request_timeout,
            schema_prompt_path: var("SQLBOT_SCHEMA_PROMPT").map(PathBuf::from),
        })
    }

    /// The schema prompt for the SQL session: the configured file, or the built-in one.
    pub fn schema_prompt(&self) -> Result<String> {
        match &self.schema_prompt_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                SqlBotError::Config(format!("Failed to read schema prompt {}: {}", path.display(), e))
            }),
            None => Ok(crate::prompts::DB_SCHEMA_PROMPT.to_string()),
        }
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| SqlBotError::Config(format!("Invalid {} '{}': {}", key, raw, e)))
        })
        .transpose()
}

fn parse_bool(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    var(key)
        .map(|raw| match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SqlBotError::Config(format!("Invalid {} '{}': expected a boolean", key, raw))),
        })
        .transpose()
}

fn seconds(key: &'static str) -> impl Fn(f64) -> Result<Duration> {
    move |secs| {
        Duration::try_from_secs_f64(secs).map_err(|e| {
            SqlBotError::Config(format!("{} must be a non-negative number of seconds: {}", key, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("GEMINI_API_KEY", "secret")]).unwrap();
        assert_eq!(config.provider, Provider::Gemini);
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.sql_model, ModelSettings { model: "gemini-1.5-flash".to_string(), temperature: 0.3 });
        assert_eq!(config.answer_model, ModelSettings { model: "gemini-1.5-pro".to_string(), temperature: 1.0 });
        assert_eq!(config.database_path, PathBuf::from("database.db"));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.history_limit, None);
        assert_eq!(config.statement_policy, StatementPolicy::ReadOnly);
        assert_eq!(config.request_timeout, None);
        assert!(config.schema_prompt().unwrap().contains("Table: employees"));
    }

    #[test]
    fn test_missing_api_key() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));

        let err = config_from(&[("SQLBOT_PROVIDER", "openai"), ("GEMINI_API_KEY", "x")]).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SQLBOT_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SQLBOT_LLM_BASE_URL", "http://localhost:8000/v1"),
            ("SQLBOT_SQL_TEMPERATURE", "0"),
            ("SQLBOT_DATABASE", "/tmp/employees.db"),
            ("SQLBOT_MAX_ATTEMPTS", "2"),
            ("SQLBOT_BACKOFF_SECS", "0.5"),
            ("SQLBOT_HISTORY_LIMIT", "10"),
            ("SQLBOT_ALLOW_WRITES", "yes"),
            ("SQLBOT_REQUEST_TIMEOUT_SECS", "30"),
        ])
        .unwrap();

        assert_eq!(config.sql_model.model, "gpt-4o-mini");
        assert_eq!(config.sql_model.temperature, 0.0);
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8000/v1"));
        assert_eq!(config.database_path, PathBuf::from("/tmp/employees.db"));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.backoff_unit, Duration::from_millis(500));
        assert_eq!(config.history_limit, Some(10));
        assert_eq!(config.statement_policy, StatementPolicy::Unrestricted);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_values() {
        let base = ("GEMINI_API_KEY", "k");
        assert!(config_from(&[base, ("SQLBOT_MAX_ATTEMPTS", "0")]).is_err());
        assert!(config_from(&[base, ("SQLBOT_MAX_ATTEMPTS", "four")]).is_err());
        assert!(config_from(&[base, ("SQLBOT_BACKOFF_SECS", "-1")]).is_err());
        assert!(config_from(&[base, ("SQLBOT_BACKOFF_SECS", "NaN")]).is_err());
        assert!(config_from(&[base, ("SQLBOT_BACKOFF_SECS", "1e300")]).is_err());
        assert!(config_from(&[base, ("SQLBOT_REQUEST_TIMEOUT_SECS", "1e300")]).is_err());
        assert!(config_from(&[base, ("SQLBOT_ALLOW_WRITES", "maybe")]).is_err());
        assert!(config_from(&[base, ("SQLBOT_PROVIDER", "llama")]).is_err());
    }

    #[test]
    fn test_huge_history_limit_is_accepted() {
        let max = usize::MAX.to_string();
        let config = config_from(&[("GEMINI_API_KEY", "k"), ("SQLBOT_HISTORY_LIMIT", max.as_str())]).unwrap();
        assert_eq!(config.history_limit, Some(usize::MAX));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("GEMINI_API_KEY", "k"), ("SQLBOT_SQL_MODEL", "  ")]).unwrap();
        assert_eq!(config.sql_model.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_unreadable_schema_prompt() {
        let mut config = config_from(&[("GEMINI_API_KEY", "k")]).unwrap();
        config.schema_prompt_path = Some(PathBuf::from("/nonexistent/schema.txt"));
        assert!(matches!(config.schema_prompt(), Err(SqlBotError::Config(_))));
    }
}
