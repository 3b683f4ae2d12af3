//! Converge core data models.
//!
//! This crate defines the values, comparison rules, actions, outcomes and
//! errors shared by the planner, the engine and the resource catalog.

#![warn(missing_docs)]

// Identities
mod id;

// Values and comparison
mod value;
mod compare;

// Actions and results
mod action;
mod outcome;
mod error;

// Re-exports
pub use id::{ActionId, ResourceId, RunId};
pub use value::{State, Value, ValueKind};
pub use compare::{parse_duration, ValueComparator};
pub use action::{
    run_command, ActionRole, Applicability, Capability, ExecContext, ExecResource,
    ResourceAction, RuntimePredicate,
};
pub use outcome::{ActionRecord, Outcome, Outcomes, RunReport, SkipCause, Summary};
pub use error::{ActionError, CycleError, PlanError, ValidationError};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
