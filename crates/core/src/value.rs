//! Desired and observed values.

use crate::compare::parse_duration;
use crate::error::ActionError;
use serde::{Deserialize, Serialize};

/// A configuration value as written in the desired document or read back
/// from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean flag
    Bool(bool),
    /// Whole number
    Integer(i64),
    /// Free text, addresses, durations
    Text(String),
    /// Several values
    List(Vec<String>),
}

impl Value {
    /// Render the value the way the host prints it: booleans as
    /// `True`/`False`, lists one element per line.
    pub fn render(&self) -> String {
        match self {
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Integer(n) => n.to_string(),
            Self::Text(s) => s.clone(),
            Self::List(items) => items.join("\n"),
        }
    }

    /// View the value as a list; a scalar is a list of one.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.clone(),
            other => vec![other.render()],
        }
    }

    /// Interpret the value as a boolean, accepting the textual forms the
    /// host may print.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Integer(0) => Some(false),
            Self::Integer(1) => Some(true),
            Self::Text(s) => parse_bool(s),
            Self::List(items) if items.len() == 1 => parse_bool(&items[0]),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
            other => f.write_str(&other.render()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "$true" | "1" => Some(true),
        "false" | "$false" | "0" => Some(false),
        _ => None,
    }
}

/// Presence of a resource attribute, used for both the desired and the
/// observed side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum State {
    /// Does not exist
    Absent,
    /// Exists with a value
    Present(Value),
}

impl State {
    /// Present with a value.
    pub fn present(value: impl Into<Value>) -> Self {
        Self::Present(value.into())
    }

    /// Whether this is [`State::Absent`].
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The value, if present.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Absent => None,
            Self::Present(value) => Some(value),
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Present(value) => write!(f, "'{}'", value),
        }
    }
}

/// How a desired value is compared with the observed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Single value; numbers compare numerically
    Scalar,
    /// Sequence where order matters
    OrderedList,
    /// Set where order and repetition do not matter
    UnorderedSet,
    /// True or false
    Boolean,
    /// Time span
    Duration,
}

impl ValueKind {
    /// Parse text printed by the host into a value of this kind.
    ///
    /// Lists accept one element per line or comma separated elements.
    pub fn parse_observed(self, text: &str) -> Result<Value, ActionError> {
        let text = text.trim();
        match self {
            Self::Scalar => Ok(Value::Text(text.to_string())),
            Self::OrderedList | Self::UnorderedSet => Ok(Value::List(
                text.split(|c| c == '\n' || c == ',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Self::Boolean => parse_bool(text)
                .map(Value::Bool)
                .ok_or_else(|| self.unparsable(text)),
            Self::Duration => match parse_duration(text) {
                Some(_) => Ok(Value::Text(text.to_string())),
                None => Err(self.unparsable(text)),
            },
        }
    }

    fn unparsable(self, text: &str) -> ActionError {
        ActionError::Unparsable {
            value: text.to_string(),
            kind: self,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Scalar => "scalar",
            Self::OrderedList => "ordered list",
            Self::UnorderedSet => "unordered set",
            Self::Boolean => "boolean",
            Self::Duration => "duration",
        };
        f.write_str(name)
    }
}
