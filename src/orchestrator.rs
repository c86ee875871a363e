//! Two-Stage Orchestrator
//!
//! One orchestration pass: the SQL session turns the question into a SQL
//! directive, the executor runs it, and the answer session turns the rows
//! into a message. Any failure restarts the whole pass after a linear
//! backoff, up to the attempt ceiling.

use crate::error::{Result, SqlBotError};
use crate::executor::QueryExecutor;
use crate::extract::extract_json;
use crate::prompts;
use crate::session::ChatSession;
use crate::validation::{AnswerDirective, SqlDirective};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Prefix of the string returned to users when every attempt failed.
pub const FAILURE_PREFIX: &str = "Sorry, I encountered an error: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the n-th failed attempt is `backoff_unit * n`.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_unit: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) has failed. Saturates at `Duration::MAX`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit.checked_mul(attempt).unwrap_or(Duration::MAX)
    }
}

/// Step of an orchestration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GenerateSql,
    Execute,
    GenerateAnswer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::GenerateSql => write!(f, "SQL generation"),
            Stage::Execute => write!(f, "query execution"),
            Stage::GenerateAnswer => write!(f, "answer generation"),
        }
    }
}

/// A successfully answered question.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub message: String,
    pub sql: String,
    pub description: Option<String>,
    pub row_count: usize,
    pub attempts: u32,
    pub backoffs: Vec<Duration>,
}

/// A question that could not be answered within the attempt ceiling.
#[derive(Debug)]
pub struct AskFailure {
    pub error: SqlBotError,
    /// Stage of the last failed attempt; `None` if no attempt was made.
    pub stage: Option<Stage>,
    pub attempts: u32,
    pub backoffs: Vec<Duration>,
}

impl AskFailure {
    /// The flat string shown to the user in place of an answer.
    pub fn user_message(&self) -> String {
        format!("{}{}", FAILURE_PREFIX, self.error)
    }
}

struct PassOutput {
    directive: SqlDirective,
    row_count: usize,
    message: String,
}

struct Sessions {
    sql: ChatSession,
    answer: ChatSession,
}

/// Natural-language question answering over a SQL database.
///
/// Both sessions sit behind one lock that is held for a whole question, so
/// concurrent callers are answered one at a time and their turns never
/// interleave in a session history.
pub struct SqlBot {
    sessions: Mutex<Sessions>,
    executor: Arc<dyn QueryExecutor>,
    retry: RetryPolicy,
}

impl SqlBot {
    pub fn new(sql_session: ChatSession, answer_session: ChatSession, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            sessions: Mutex::new(Sessions {
                sql: sql_session,
                answer: answer_session,
            }),
            executor,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Answer a question, or return the failure string if every attempt failed.
    pub async fn ask(&self, question: &str) -> String {
        match self.ask_detailed(question).await {
            Ok(outcome) => outcome.message,
            Err(failure) => failure.user_message(),
        }
    }

    /// Blank questions fail without a model call. Any other question is sent
    /// to the models exactly as given.
    pub async fn ask_detailed(&self, question: &str) -> std::result::Result<AskOutcome, AskFailure> {
        if question.trim().is_empty() {
            return Err(AskFailure {
                error: SqlBotError::EmptyQuestion,
                stage: None,
                attempts: 0,
                backoffs: Vec::new(),
            });
        }

        let span = info_span!("ask", pass_id = %Uuid::new_v4());
        self.retry_passes(question).instrument(span).await
    }

    async fn retry_passes(&self, question: &str) -> std::result::Result<AskOutcome, AskFailure> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut sessions = self.sessions.lock().await;
        let started = Instant::now();
        let mut backoffs = Vec::new();
        let mut attempt = 1;

        loop {
            match self.run_pass(&mut sessions, question).await {
                Ok(pass) => {
                    info!("Total time taken: {:.2} seconds", started.elapsed().as_secs_f64());
                    return Ok(AskOutcome {
                        message: pass.message,
                        sql: pass.directive.sql_query,
                        description: pass.directive.description,
                        row_count: pass.row_count,
                        attempts: attempt,
                        backoffs,
                    });
                }
                Err((stage, e)) => {
                    warn!("Attempt {} failed during {}: {}", attempt, stage, e);
                    if attempt >= max_attempts || !e.is_recoverable() {
                        error!("All attempts failed.");
                        return Err(AskFailure {
                            error: e,
                            stage: Some(stage),
                            attempts: attempt,
                            backoffs,
                        });
                    }

                    let delay = self.retry.backoff(attempt);
                    info!("Retrying in {:.0}s...", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                    backoffs.push(delay);
                    attempt += 1;
                }
            }
        }
    }

    async fn run_pass(
        &self,
        sessions: &mut Sessions,
        question: &str,
    ) -> std::result::Result<PassOutput, (Stage, SqlBotError)> {
        let sql_started = Instant::now();
        let directive = generate_sql(&mut sessions.sql, question)
            .await
            .map_err(at(Stage::GenerateSql))?;
        info!(
            "Total time taken for SQL model: {:.2} seconds",
            sql_started.elapsed().as_secs_f64()
        );

        let result = self
            .executor
            .execute(&directive.sql_query)
            .map_err(at(Stage::Execute))?;
        let data = result.to_json_text().map_err(at(Stage::Execute))?;
        debug!("Query results: {}", data);

        let answer_started = Instant::now();
        let answer = generate_answer(&mut sessions.answer, question, &data)
            .await
            .map_err(at(Stage::GenerateAnswer))?;
        info!(
            "Total time taken for Response model: {:.2} seconds",
            answer_started.elapsed().as_secs_f64()
        );

        Ok(PassOutput {
            directive,
            row_count: result.row_count(),
            message: answer.message,
        })
    }

    /// Clear both session histories.
    pub async fn reset_history(&self) {
        let mut sessions = self.sessions.lock().await;
        sessions.sql.reset();
        sessions.answer.reset();
    }

    /// Number of turns held by the SQL and answer sessions.
    pub async fn history_len(&self) -> (usize, usize) {
        let sessions = self.sessions.lock().await;
        (sessions.sql.history().len(), sessions.answer.history().len())
    }

    /// Time of the latest model reply in either session.
    pub async fn last_activity(&self) -> Option<DateTime<Utc>> {
        let sessions = self.sessions.lock().await;
        sessions.sql.last_activity().max(sessions.answer.last_activity())
    }
}

fn at(stage: Stage) -> impl FnOnce(SqlBotError) -> (Stage, SqlBotError) {
    move |e| (stage, e)
}

async fn generate_sql(session: &mut ChatSession, question: &str) -> Result<SqlDirective> {
    debug!("SQL model: processing question: {}", question);
    let reply = session.send(&prompts::sql_turn(question)).await?;
    debug!("SQL model response:\n{}", reply);

    let directive = SqlDirective::from_value(extract_json(&reply)?)?;
    debug!("Extracted SQL query: {}", directive.sql_query);
    if let Some(description) = &directive.description {
        debug!("Query description: {}", description);
    }
    Ok(directive)
}

async fn generate_answer(session: &mut ChatSession, question: &str, data: &str) -> Result<AnswerDirective> {
    let reply = session.send(&prompts::answer_turn(question, data)).await?;
    info!("Response model output:\n{}", reply);
    AnswerDirective::from_value(extract_json(&reply)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        let delays: Vec<u64> = (1..policy.max_attempts).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 6]);
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_unit: Duration::from_secs(u64::MAX / 2 + 1),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(u64::MAX / 2 + 1));
        assert_eq!(policy.backoff(2), Duration::MAX);
    }

    #[test]
    fn test_failure_message_is_flat() {
        let failure = AskFailure {
            error: SqlBotError::Database("no such table: staff".to_string()),
            stage: Some(Stage::Execute),
            attempts: 4,
            backoffs: Vec::new(),
        };
        assert_eq!(
            failure.user_message(),
            "Sorry, I encountered an error: Database error: no such table: staff"
        );
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::GenerateSql.to_string(), "SQL generation");
        assert_eq!(Stage::GenerateAnswer.to_string(), "answer generation");
    }
}
