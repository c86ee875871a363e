use crate::error::{Result, SqlBotError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

/// One message in a session history.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into(), at: Utc::now() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into(), at: Utc::now() }
    }
}

/// Everything a text-generation backend needs for a single turn.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system_instruction: &'a str,
    pub temperature: f32,
    pub history: &'a [ChatTurn],
    pub message: &'a str,
}

/// A conversational text-generation backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send `request.message` after `request.history` and return the reply text.
    async fn generate(&self, request: ChatRequest<'_>) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAi,
}

impl Provider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Gemini => GEMINI_BASE_URL,
            Provider::OpenAi => OPENAI_BASE_URL,
        }
    }

    /// Environment variable holding the API key for this provider.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for Provider {
    type Err = SqlBotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            other => Err(SqlBotError::Config(format!(
                "Unknown LLM provider '{}' (expected 'gemini' or 'openai')",
                other
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gemini => write!(f, "gemini"),
            Provider::OpenAi => write!(f, "openai"),
        }
    }
}

/// HTTP client for a hosted chat model.
#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(provider: Provider, api_key: String, model: String) -> Self {
        Self {
            provider,
            api_key,
            base_url: provider.default_base_url().to_string(),
            model,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SqlBotError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self)
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut request = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);

        request = match self.provider {
            Provider::Gemini => request.header("x-goog-api-key", &self.api_key),
            Provider::OpenAi => request.header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = request
            .send()
            .await
            .map_err(|e| SqlBotError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SqlBotError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SqlBotError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(SqlBotError::Llm(format!("LLM API error: {}", describe(error))));
        }

        Ok(response_json)
    }

    async fn generate_gemini(&self, request: ChatRequest<'_>) -> Result<String> {
        let mut contents: Vec<serde_json::Value> = request
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Model => "model",
                };
                serde_json::json!({"role": role, "parts": [{"text": turn.text}]})
            })
            .collect();
        contents.push(serde_json::json!({"role": "user", "parts": [{"text": request.message}]}));

        let body = serde_json::json!({
            "system_instruction": {"parts": [{"text": request.system_instruction}]},
            "contents": contents,
            "generationConfig": {"temperature": request.temperature},
        });

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response_json = self.post_json(&url, &body).await?;
        gemini_reply_text(&response_json)
    }

    async fn generate_openai(&self, request: ChatRequest<'_>) -> Result<String> {
        let mut messages = vec![serde_json::json!({"role": "system", "content": request.system_instruction})];
        messages.extend(request.history.iter().map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "assistant",
            };
            serde_json::json!({"role": role, "content": turn.text})
        }));
        messages.push(serde_json::json!({"role": "user", "content": request.message}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response_json = self.post_json(&url, &body).await?;
        openai_reply_text(&response_json)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn generate(&self, request: ChatRequest<'_>) -> Result<String> {
        debug!(
            "Calling {} model {} ({} prior turns)",
            self.provider,
            self.model,
            request.history.len()
        );
        match self.provider {
            Provider::Gemini => self.generate_gemini(request).await,
            Provider::OpenAi => self.generate_openai(request).await,
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn describe(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "Could not serialize".to_string())
}

fn gemini_reply_text(response_json: &serde_json::Value) -> Result<String> {
    if let Some(reason) = response_json
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str())
    {
        return Err(SqlBotError::Llm(format!("Prompt was blocked: {}", reason)));
    }

    let candidate = response_json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| SqlBotError::Llm(format!("No candidates in LLM response. Response: {}", describe(response_json))))?;

    match candidate.get("finishReason").and_then(|r| r.as_str()) {
        Some("MAX_TOKENS") => warn!("LLM response was truncated due to length limit"),
        Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
            return Err(SqlBotError::Llm(format!("LLM response was filtered: {}", reason)));
        }
        _ => {}
    }

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(|t| t.as_str())).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(SqlBotError::Llm(format!("Empty content in LLM response. Full response: {}", describe(response_json))));
    }

    Ok(text)
}

fn openai_reply_text(response_json: &serde_json::Value) -> Result<String> {
    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| SqlBotError::Llm(format!("No choices array in LLM response. Response: {}", describe(response_json))))?;

    let choice = choices
        .first()
        .ok_or_else(|| SqlBotError::Llm(format!("Empty choices array in LLM response. Response: {}", describe(response_json))))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(SqlBotError::Llm("LLM response was filtered by content policy".to_string()));
        }
        _ => {}
    }

    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or("");

    if content.is_empty() {
        return Err(SqlBotError::Llm(format!("Empty content in LLM response. Full response: {}", describe(response_json))));
    }

    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert_eq!(" openai ".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert!(matches!("claude".parse::<Provider>(), Err(SqlBotError::Config(_))));
        assert_eq!(Provider::OpenAi.api_key_var(), "OPENAI_API_KEY");
    }

    #[test]
    fn test_gemini_reply_joins_parts() {
        let response = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"message\":"}, {"text": "\"hi\"}"}]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(gemini_reply_text(&response).unwrap(), "{\"message\":\"hi\"}");
    }

    #[test]
    fn test_gemini_blocked_prompt() {
        let response = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = gemini_reply_text(&response).unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn test_gemini_safety_stop_is_error() {
        let response = json!({"candidates": [{"finishReason": "SAFETY"}]});
        assert!(gemini_reply_text(&response).is_err());
    }

    #[test]
    fn test_openai_reply() {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "```json\n{}\n```"}, "finish_reason": "stop"}]
        });
        assert_eq!(openai_reply_text(&response).unwrap(), "```json\n{}\n```");

        let filtered = json!({"choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]});
        assert!(openai_reply_text(&filtered).unwrap_err().to_string().contains("content policy"));

        assert!(openai_reply_text(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = LlmClient::new(Provider::OpenAi, "key".to_string(), "gpt-4o".to_string())
            .with_base_url("http://localhost:11434/v1/");
        assert_eq!(client.base_url, "http://localhost:11434/v1");
        assert_eq!(client.model_name(), "gpt-4o");
    }
}
