//! Structured-Response Extraction
//!
//! Models are told to answer with a bare JSON object, but replies regularly
//! arrive inside markdown fences or with stray whitespace. Extraction runs an
//! ordered list of strategies through a fallback combinator: the direct parse
//! may fail softly, after which exactly one of the remaining strategies applies
//! and its outcome is final.

use crate::error::{Result, SqlBotError};
use serde_json::Value;
use tracing::debug;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// A way of locating the JSON payload inside a model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The whole reply, untouched.
    Direct,
    /// Text between the first ```` ```json ```` fence and the next fence.
    TaggedFence,
    /// Text between the first two generic fences.
    GenericFence,
    /// The whole reply, trimmed.
    Trimmed,
}

impl Strategy {
    /// Precedence used for every model stage.
    pub const ORDER: [Strategy; 4] = [
        Strategy::Direct,
        Strategy::TaggedFence,
        Strategy::GenericFence,
        Strategy::Trimmed,
    ];

    /// Returns the candidate payload, or `None` when the strategy does not apply.
    pub fn locate(self, text: &str) -> Option<&str> {
        match self {
            Strategy::Direct => Some(text),
            Strategy::TaggedFence => fenced_after(text, JSON_FENCE),
            Strategy::GenericFence => fenced_after(text, FENCE),
            Strategy::Trimmed => Some(text.trim()),
        }
    }

    /// A failed parse under a terminal strategy ends extraction.
    fn is_terminal(self) -> bool {
        !matches!(self, Strategy::Direct)
    }
}

/// Text after the first `opening` marker up to the next fence (or the end of
/// the text when the block is never closed), trimmed.
fn fenced_after<'a>(text: &'a str, opening: &str) -> Option<&'a str> {
    let start = text.find(opening)? + opening.len();
    let rest = &text[start..];
    let end = rest.find(FENCE).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Parse a model reply into JSON using the standard strategy order.
pub fn extract_json(text: &str) -> Result<Value> {
    extract_with(text, &Strategy::ORDER)
}

/// Try `strategies` in order; the first successful parse wins.
pub fn extract_with(text: &str, strategies: &[Strategy]) -> Result<Value> {
    for &strategy in strategies {
        let Some(candidate) = strategy.locate(text) else {
            continue;
        };

        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => {
                debug!("Extracted JSON using {:?} strategy", strategy);
                return Ok(value);
            }
            Err(e) if strategy.is_terminal() => {
                debug!("Unparseable model reply:\n{}", text);
                return Err(SqlBotError::Extraction(format!("{} (strategy: {:?})", e, strategy)));
            }
            Err(e) => {
                debug!("{:?} parse failed ({}), trying next strategy", strategy, e);
            }
        }
    }

    debug!("Unparseable model reply:\n{}", text);
    Err(SqlBotError::Extraction("no strategy produced JSON".to_string()))
}
