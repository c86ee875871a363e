//! Model Sessions
//!
//! A session is a long-lived conversation with one model: a fixed system
//! instruction, a fixed temperature and an append-only history of turns that
//! is replayed on every request. The orchestrator owns two of them (SQL and
//! answer) and never mixes their histories.

use crate::error::Result;
use crate::llm::{ChatModel, ChatRequest, ChatTurn};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct ChatSession {
    name: String,
    model: Arc<dyn ChatModel>,
    system_instruction: String,
    temperature: f32,
    history: Vec<ChatTurn>,
    /// Maximum number of request/response exchanges kept; `None` keeps all.
    max_exchanges: Option<usize>,
}

impl ChatSession {
    pub fn new(
        name: impl Into<String>,
        model: Arc<dyn ChatModel>,
        system_instruction: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            system_instruction: system_instruction.into(),
            temperature,
            history: Vec::new(),
            max_exchanges: None,
        }
    }

    pub fn with_history_limit(mut self, max_exchanges: Option<usize>) -> Self {
        self.max_exchanges = max_exchanges;
        self.enforce_limit();
        self
    }

    /// Send one message and return the raw reply text.
    ///
    /// The exchange is recorded once the model replies, whatever the caller
    /// later makes of the reply. A failed call leaves the history untouched.
    pub async fn send(&mut self, message: &str) -> Result<String> {
        let started = Instant::now();
        let reply = self
            .model
            .generate(ChatRequest {
                system_instruction: &self.system_instruction,
                temperature: self.temperature,
                history: &self.history,
                message,
            })
            .await?;

        debug!(
            "{} session: reply from {} in {:.2}s",
            self.name,
            self.model.model_name(),
            started.elapsed().as_secs_f64()
        );

        self.history.push(ChatTurn::user(message));
        self.history.push(ChatTurn::model(reply.clone()));
        self.enforce_limit();

        Ok(reply)
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// When the most recent reply arrived.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|turn| turn.at)
    }

    pub fn reset(&mut self) {
        debug!("{} session: clearing {} turns", self.name, self.history.len());
        self.history.clear();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn enforce_limit(&mut self) {
        if let Some(max) = self.max_exchanges {
            let keep = max.saturating_mul(2);
            if self.history.len() > keep {
                let excess = self.history.len() - keep;
                self.history.drain(..excess);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SqlBotError;
    use crate::llm::Role;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Echoes the message and records how many prior turns each request carried.
    struct EchoModel {
        seen_history: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl EchoModel {
        fn new(fail: bool) -> Self {
            Self { seen_history: Mutex::new(Vec::new()), fail }
        }
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn generate(&self, request: ChatRequest<'_>) -> Result<String> {
            self.seen_history.lock().unwrap().push(request.history.len());
            assert_eq!(request.system_instruction, "be terse");
            if self.fail {
                return Err(SqlBotError::Llm("unavailable".to_string()));
            }
            Ok(format!("echo: {}", request.message))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_history_grows_and_is_replayed() {
        let model = Arc::new(EchoModel::new(false));
        let mut session = ChatSession::new("sql", model.clone(), "be terse", 0.3);

        assert_eq!(session.send("one").await.unwrap(), "echo: one");
        assert_eq!(session.send("two").await.unwrap(), "echo: two");

        assert_eq!(*model.seen_history.lock().unwrap(), vec![0, 2]);
        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text, "one");
        assert_eq!(history[3].role, Role::Model);
        assert_eq!(history[3].text, "echo: two");
    }

    #[tokio::test]
    async fn test_failed_call_leaves_history_untouched() {
        let mut session = ChatSession::new("answer", Arc::new(EchoModel::new(true)), "be terse", 1.0);
        assert!(session.send("hello").await.is_err());
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_limit_drops_oldest_exchanges() {
        let mut session = ChatSession::new("sql", Arc::new(EchoModel::new(false)), "be terse", 0.3)
            .with_history_limit(Some(2));

        for message in ["a", "b", "c"] {
            session.send(message).await.unwrap();
        }

        let texts: Vec<&str> = session.history().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "echo: b", "c", "echo: c"]);
    }

    #[tokio::test]
    async fn test_huge_history_limit_keeps_everything() {
        let mut session = ChatSession::new("sql", Arc::new(EchoModel::new(false)), "be terse", 0.3)
            .with_history_limit(Some(usize::MAX));

        for message in ["a", "b"] {
            session.send(message).await.unwrap();
        }

        assert_eq!(session.history().len(), 4);
    }

    #[tokio::test]
    async fn test_last_activity_follows_latest_turn() {
        let mut session = ChatSession::new("answer", Arc::new(EchoModel::new(false)), "be terse", 1.0);
        let before = Utc::now();
        session.send("a").await.unwrap();

        let last = session.last_activity().unwrap();
        assert!(last >= before);
        assert_eq!(Some(last), session.history().last().map(|t| t.at));
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let mut session = ChatSession::new("sql", Arc::new(EchoModel::new(false)), "be terse", 0.3);
        session.send("a").await.unwrap();
        assert!(session.last_activity().is_some());
        session.reset();
        assert!(session.history().is_empty());
        assert_eq!(session.last_activity(), None);
        assert_eq!(session.name(), "sql");
    }
}
