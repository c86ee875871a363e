//! Response Schema Validation
//!
//! Each model stage has a minimal contract: the reply must be a JSON object
//! with certain string fields. Validation checks that contract and converts
//! the object into the typed directive the orchestrator consumes.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Required/optional string fields a stage reply must carry.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

/// SQL-generation stage: `{ "sqlQuery": string, "description"?: string }`
pub const SQL_DIRECTIVE_SCHEMA: ResponseSchema = ResponseSchema {
    name: "sql directive",
    required: &["sqlQuery"],
    optional: &["description"],
};

/// Answer-generation stage: `{ "message": string }`
pub const ANSWER_DIRECTIVE_SCHEMA: ResponseSchema = ResponseSchema {
    name: "answer directive",
    required: &["message"],
    optional: &[],
};

/// The constraint a reply failed to meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    NotAnObject,
    MissingField(&'static str),
    NotAString(&'static str),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::NotAnObject => write!(f, "expected a JSON object"),
            Constraint::MissingField(field) => write!(f, "'{}' is a required property", field),
            Constraint::NotAString(field) => write!(f, "'{}' must be a string", field),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{schema}: {constraint} in {instance}")]
pub struct SchemaViolation {
    pub schema: &'static str,
    pub constraint: Constraint,
    pub instance: Value,
}

impl ResponseSchema {
    pub fn validate(&self, instance: &Value) -> Result<(), SchemaViolation> {
        let violation = |constraint| SchemaViolation {
            schema: self.name,
            constraint,
            instance: instance.clone(),
        };

        let object = instance
            .as_object()
            .ok_or_else(|| violation(Constraint::NotAnObject))?;

        for field in self.required {
            if !object.contains_key(*field) {
                return Err(violation(Constraint::MissingField(*field)));
            }
        }

        for field in self.required.iter().chain(self.optional) {
            if let Some(value) = object.get(*field) {
                if !value.is_string() {
                    return Err(violation(Constraint::NotAString(*field)));
                }
            }
        }

        Ok(())
    }
}

/// Output of the SQL-generation stage.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SqlDirective {
    #[serde(rename = "sqlQuery")]
    pub sql_query: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Output of the answer-generation stage.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AnswerDirective {
    pub message: String,
}

impl SqlDirective {
    pub fn from_value(value: Value) -> crate::error::Result<Self> {
        SQL_DIRECTIVE_SCHEMA.validate(&value)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl AnswerDirective {
    pub fn from_value(value: Value) -> crate::error::Result<Self> {
        ANSWER_DIRECTIVE_SCHEMA.validate(&value)?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SqlBotError;
    use serde_json::json;

    #[test]
    fn test_sql_directive_requires_sql_query() {
        let err = SQL_DIRECTIVE_SCHEMA
            .validate(&json!({"description": "no query here"}))
            .unwrap_err();
        assert_eq!(err.constraint, Constraint::MissingField("sqlQuery"));
        assert_eq!(err.instance, json!({"description": "no query here"}));
    }

    #[test]
    fn test_answer_directive_requires_message() {
        let err = ANSWER_DIRECTIVE_SCHEMA.validate(&json!({"text": "hi"})).unwrap_err();
        assert_eq!(err.constraint, Constraint::MissingField("message"));
        assert!(err.to_string().contains("'message' is a required property"));
    }

    #[test]
    fn test_field_types_are_checked() {
        let err = SQL_DIRECTIVE_SCHEMA
            .validate(&json!({"sqlQuery": 42}))
            .unwrap_err();
        assert_eq!(err.constraint, Constraint::NotAString("sqlQuery"));

        let err = SQL_DIRECTIVE_SCHEMA
            .validate(&json!({"sqlQuery": "SELECT 1", "description": ["list"]}))
            .unwrap_err();
        assert_eq!(err.constraint, Constraint::NotAString("description"));
    }

    #[test]
    fn test_non_object_rejected() {
        let err = ANSWER_DIRECTIVE_SCHEMA.validate(&json!(["message"])).unwrap_err();
        assert_eq!(err.constraint, Constraint::NotAnObject);
    }

    #[test]
    fn test_extra_fields_allowed() {
        let directive = SqlDirective::from_value(json!({
            "sqlQuery": "SELECT COUNT(*) FROM employees;",
            "confidence": 0.9
        }))
        .unwrap();
        assert_eq!(directive.sql_query, "SELECT COUNT(*) FROM employees;");
        assert_eq!(directive.description, None);
    }

    #[test]
    fn test_typed_conversion_surfaces_violation() {
        let err = AnswerDirective::from_value(json!({})).unwrap_err();
        assert!(matches!(err, SqlBotError::Validation(_)));

        let answer = AnswerDirective::from_value(json!({"message": "We have 5 employees."})).unwrap();
        assert_eq!(answer.message, "We have 5 employees.");
    }
}
