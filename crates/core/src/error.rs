//! Error taxonomy.
//!
//! [`ValidationError`] and [`CycleError`] abort a run before anything
//! executes. [`ActionError`] is scoped to one action and its dependents.

use crate::id::ActionId;
use crate::value::ValueKind;
use converge_tools::ExecError;
use std::time::Duration;

/// Bad desired-configuration input or an inconsistent action set.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A required field was not supplied
    #[error("{resource}: missing required field '{field}'")]
    MissingField {
        /// Resource being declared
        resource: String,
        /// Field name
        field: String,
    },

    /// A numeric field is outside its documented range
    #[error("{resource}: '{field}' = {value} is outside {min}..={max}")]
    OutOfRange {
        /// Resource being declared
        resource: String,
        /// Field name
        field: String,
        /// Supplied value
        value: i64,
        /// Lowest accepted value
        min: i64,
        /// Highest accepted value
        max: i64,
    },

    /// A field has a malformed or unsupported value
    #[error("{resource}: invalid '{field}' value '{value}': {reason}")]
    InvalidValue {
        /// Resource being declared
        resource: String,
        /// Field name
        field: String,
        /// Supplied value
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// A field that no schema knows
    #[error("{resource}: unknown field '{field}'")]
    UnknownField {
        /// Resource being declared
        resource: String,
        /// Field name
        field: String,
    },

    /// A field spelled the way the older, unsupported schema spells it
    #[error("{resource}: '{field}' belongs to the unsupported legacy schema, use '{canonical}'")]
    LegacyField {
        /// Resource being declared
        resource: String,
        /// Legacy field name
        field: String,
        /// Canonical replacement
        canonical: String,
    },

    /// Two declarations of the same thing
    #[error("duplicate {what}: {name}")]
    Duplicate {
        /// Kind of thing duplicated
        what: String,
        /// Its name
        name: String,
    },

    /// An edge points at an action that was never declared
    #[error("action '{action}' references unknown action '{dependency}'")]
    UnknownDependency {
        /// Declaring action
        action: ActionId,
        /// Missing target
        dependency: ActionId,
    },

    /// The node's platform cannot host the service
    #[error("not supported on {0}")]
    UnsupportedPlatform(String),

    /// The document could not be read or decoded
    #[error("cannot read desired configuration: {0}")]
    Document(String),
}

/// Contradictory or mutual dependencies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("dependency cycle: {}", render_cycle(.cycle))]
pub struct CycleError {
    /// Actions forming the cycle, in edge order
    pub cycle: Vec<ActionId>,
}

fn render_cycle(cycle: &[ActionId]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(ActionId::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

/// Errors that abort planning.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    /// Bad input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Dependency cycle
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Runtime failure of an observation or apply step.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The executor could not carry out the command
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The command ran but exited unsuccessfully
    #[error("'{label}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        /// Command label
        label: String,
        /// Exit code
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// The observed value could not be interpreted
    #[error("cannot parse observed value '{value}' as {kind}")]
    Unparsable {
        /// Raw observed text
        value: String,
        /// Expected kind
        kind: ValueKind,
    },

    /// The engine's safety timeout expired
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The change cannot be made on a live resource
    #[error("{0}")]
    Refused(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_message() {
        let err = CycleError {
            cycle: vec![ActionId::new("a"), ActionId::new("b")],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_validation_message() {
        let err = ValidationError::OutOfRange {
            resource: "server".to_string(),
            field: "conflict_detection_attempts".to_string(),
            value: 6,
            min: 0,
            max: 5,
        };
        assert_eq!(
            err.to_string(),
            "server: 'conflict_detection_attempts' = 6 is outside 0..=5"
        );
    }
}
