//! Query Executor
//!
//! Runs model-generated SQL against the SQLite store. Generated SQL is
//! untrusted, so by default only single read-only queries are let through:
//! sqlparser screens the text, and SQLite itself confirms the prepared
//! statement does not write.

use crate::error::{Result, SqlBotError};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Which statements the executor is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementPolicy {
    /// Single read-only query statements only.
    ReadOnly,
    /// Anything the engine accepts, executed as-is.
    Unrestricted,
}

impl Default for StatementPolicy {
    fn default() -> Self {
        StatementPolicy::ReadOnly
    }
}

/// Rows returned by one query, values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    /// Rows as a JSON array of arrays, the form handed to the answer model.
    pub fn to_json_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.rows)?)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub trait QueryExecutor: Send + Sync {
    fn execute(&self, sql: &str) -> Result<QueryResult>;
}

pub struct SqliteExecutor {
    conn: Mutex<Connection>,
    policy: StatementPolicy,
}

impl SqliteExecutor {
    /// Open an existing database file. The schema must already be in place;
    /// under `ReadOnly` the file is opened read-only as well.
    pub fn open(path: impl AsRef<Path>, policy: StatementPolicy) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SqlBotError::Database(format!(
                "Database file not found: {}",
                path.display()
            )));
        }

        let conn = match policy {
            StatementPolicy::ReadOnly => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
            StatementPolicy::Unrestricted => Connection::open(path),
        }
        .map_err(|e| SqlBotError::Database(format!("Failed to open database: {}", e)))?;

        info!("Opened database {} ({:?})", path.display(), policy);
        Ok(Self::from_connection(conn, policy))
    }

    pub fn from_connection(conn: Connection, policy: StatementPolicy) -> Self {
        Self {
            conn: Mutex::new(conn),
            policy,
        }
    }

    pub fn policy(&self) -> StatementPolicy {
        self.policy
    }
}

impl QueryExecutor for SqliteExecutor {
    fn execute(&self, sql: &str) -> Result<QueryResult> {
        // SQLite compiles only the first statement of a batch, so a batch is
        // refused outright under either policy.
        let statements = parse_statements(sql);
        if let Some(statements) = &statements {
            if statements.len() > 1 {
                return Err(SqlBotError::Database(format!(
                    "You can only execute one statement at a time (got {})",
                    statements.len()
                )));
            }
        }
        if self.policy == StatementPolicy::ReadOnly {
            screen_statement(statements.as_deref(), sql)?;
        }

        let conn = self
            .conn
            .lock()
            .map_err(|_| SqlBotError::Database("Connection mutex poisoned".to_string()))?;

        let mut stmt = conn.prepare(sql)?;
        if self.policy == StatementPolicy::ReadOnly && !stmt.readonly() {
            return Err(SqlBotError::QueryRejected(format!(
                "statement would modify the database: {}",
                sql
            )));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(to_json(row.get::<_, SqlValue>(i)?));
            }
            rows.push(values);
        }

        debug!("Query returned {} rows", rows.len());
        Ok(QueryResult { columns, rows })
    }
}

/// `None` when sqlparser cannot handle the text; the engine has the final say then.
fn parse_statements(sql: &str) -> Option<Vec<Statement>> {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => Some(statements),
        Err(e) => {
            debug!("sqlparser could not parse generated SQL ({}), deferring to engine check", e);
            None
        }
    }
}

/// Reject anything that is not exactly one query statement. Unparsed text is
/// left to SQLite's own read-only check.
fn screen_statement(statements: Option<&[Statement]>, sql: &str) -> Result<()> {
    let Some(statements) = statements else {
        return Ok(());
    };

    match statements {
        [Statement::Query(_)] => Ok(()),
        [_] => Err(SqlBotError::QueryRejected(format!(
            "only read-only queries are allowed, got: {}",
            leading_keyword(sql)
        ))),
        [] => Err(SqlBotError::QueryRejected("no SQL statement found".to_string())),
        many => Err(SqlBotError::QueryRejected(format!(
            "expected a single statement, got {}",
            many.len()
        ))),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

fn to_json(value: SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(n) => serde_json::Value::from(n),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        SqlValue::Text(s) => serde_json::Value::String(s),
        SqlValue::Blob(b) => serde_json::Value::String(format!("[BLOB {} bytes]", b.len())),
    }
}
