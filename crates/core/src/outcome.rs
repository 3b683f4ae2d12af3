//! Per-action outcomes and the run report.

use crate::id::{ActionId, ResourceId, RunId};
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of one action in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Already satisfied, nothing applied
    Unchanged,
    /// Drift corrected (or refreshed on notification)
    Applied,
    /// Observation or apply failed
    Failed {
        /// Error message
        reason: String,
    },
    /// Not attempted
    Skipped {
        /// Why it was not attempted
        cause: SkipCause,
    },
}

impl Outcome {
    /// Failed outcome.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    /// Skipped because a prerequisite failed.
    pub fn blocked_by(action: ActionId) -> Self {
        Self::Skipped {
            cause: SkipCause::BlockedBy(action),
        }
    }

    /// Skipped because the run was cancelled.
    pub fn cancelled() -> Self {
        Self::Skipped {
            cause: SkipCause::Cancelled,
        }
    }

    /// Whether this is a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => f.write_str("unchanged"),
            Self::Applied => f.write_str("applied"),
            Self::Failed { reason } => write!(f, "failed ({})", reason),
            Self::Skipped { cause } => write!(f, "skipped ({})", cause),
        }
    }
}

/// Why an action was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "action", rename_all = "snake_case")]
pub enum SkipCause {
    /// A transitive prerequisite failed
    BlockedBy(ActionId),
    /// The run was cancelled before the action started
    Cancelled,
}

impl std::fmt::Display for SkipCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlockedBy(action) => write!(f, "blocked by '{}'", action),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// The outcome set of a run. Each action is recorded at most once.
#[derive(Debug, Clone, Default)]
pub struct Outcomes {
    entries: HashMap<ActionId, (Outcome, String)>,
}

impl Outcomes {
    /// Create an empty outcome set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome. Returns `false`, leaving the first entry in place,
    /// if the action already has one.
    pub fn record(&mut self, action: ActionId, outcome: Outcome, detail: impl Into<String>) -> bool {
        if self.entries.contains_key(&action) {
            return false;
        }
        self.entries.insert(action, (outcome, detail.into()));
        true
    }

    /// Outcome of an action, if recorded.
    pub fn get(&self, action: &ActionId) -> Option<&Outcome> {
        self.entries.get(action).map(|(outcome, _)| outcome)
    }

    /// Detail recorded with an action's outcome.
    pub fn detail(&self, action: &ActionId) -> Option<&str> {
        self.entries.get(action).map(|(_, detail)| detail.as_str())
    }

    /// Whether an action has an outcome.
    pub fn contains(&self, action: &ActionId) -> bool {
        self.entries.contains_key(action)
    }

    /// Number of recorded outcomes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One line of the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Action name
    pub action_id: ActionId,

    /// Resource the action belongs to
    pub resource: ResourceId,

    /// What happened
    pub outcome: Outcome,

    /// Human readable detail (observed vs desired, error text)
    pub detail: String,
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Already in the desired state
    pub unchanged: usize,
    /// Corrected
    pub applied: usize,
    /// Failed
    pub failed: usize,
    /// Not attempted
    pub skipped: usize,
}

impl Summary {
    /// Count outcomes.
    pub fn from_records(records: &[ActionRecord]) -> Self {
        records.iter().fold(Self::default(), |mut acc, record| {
            match record.outcome {
                Outcome::Unchanged => acc.unchanged += 1,
                Outcome::Applied => acc.applied += 1,
                Outcome::Failed { .. } => acc.failed += 1,
                Outcome::Skipped { .. } => acc.skipped += 1,
            }
            acc
        })
    }

    /// Total number of reported actions.
    pub fn total(&self) -> usize {
        self.unchanged + self.applied + self.failed + self.skipped
    }
}

/// Result of executing a plan. Serialisable and stable: records follow
/// plan order regardless of how actions were scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,

    /// When execution started
    pub started_at: Time,

    /// When execution finished
    pub completed_at: Time,

    /// Whether the run was cancelled part way
    pub cancelled: bool,

    /// Outcome counts
    pub summary: Summary,

    /// Per-action detail, in plan order
    pub records: Vec<ActionRecord>,
}

impl RunReport {
    /// Build a report, deriving the summary from the records.
    pub fn new(
        run_id: RunId,
        started_at: Time,
        completed_at: Time,
        cancelled: bool,
        records: Vec<ActionRecord>,
    ) -> Self {
        Self {
            run_id,
            started_at,
            completed_at,
            cancelled,
            summary: Summary::from_records(&records),
            records,
        }
    }

    /// A run succeeds iff nothing failed. Skipped actions alone do not fail it.
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }

    /// Look up the record of an action.
    pub fn record(&self, action: &str) -> Option<&ActionRecord> {
        self.records.iter().find(|r| r.action_id.as_str() == action)
    }

    /// Outcome of an action.
    pub fn outcome(&self, action: &str) -> Option<&Outcome> {
        self.record(action).map(|r| &r.outcome)
    }

    /// Records with the given outcome status.
    pub fn with_outcome<'a>(
        &'a self,
        predicate: impl Fn(&Outcome) -> bool + 'a,
    ) -> impl Iterator<Item = &'a ActionRecord> + 'a {
        self.records.iter().filter(move |r| predicate(&r.outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, outcome: Outcome) -> ActionRecord {
        ActionRecord {
            action_id: ActionId::new(id),
            resource: ResourceId::Server,
            outcome,
            detail: String::new(),
        }
    }

    #[test]
    fn test_outcomes_are_write_once() {
        let mut outcomes = Outcomes::new();
        assert!(outcomes.record("a".into(), Outcome::Applied, ""));
        assert!(!outcomes.record("a".into(), Outcome::failed("late"), ""));
        assert_eq!(outcomes.get(&"a".into()), Some(&Outcome::Applied));
    }

    #[test]
    fn test_report_summary_and_success() {
        let now = chrono::Utc::now();
        let report = RunReport::new(
            RunId::new(),
            now,
            now,
            false,
            vec![
                record("a", Outcome::Unchanged),
                record("b", Outcome::Applied),
                record("c", Outcome::blocked_by("x".into())),
            ],
        );

        assert_eq!(
            report.summary,
            Summary { unchanged: 1, applied: 1, failed: 0, skipped: 1 }
        );
        assert!(report.is_success());
        assert_eq!(report.outcome("b"), Some(&Outcome::Applied));
    }

    #[test]
    fn test_failed_report_is_not_success() {
        let now = chrono::Utc::now();
        let report = RunReport::new(
            RunId::new(),
            now,
            now,
            false,
            vec![record("a", Outcome::failed("exit 1"))],
        );
        assert!(!report.is_success());
    }

    #[test]
    fn test_report_serialization_shape() {
        let now = chrono::Utc::now();
        let report = RunReport::new(
            RunId::new(),
            now,
            now,
            false,
            vec![record("c", Outcome::blocked_by("add x".into()))],
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["skipped"], 1);
        assert_eq!(json["records"][0]["outcome"]["status"], "skipped");
        assert_eq!(json["records"][0]["outcome"]["cause"]["kind"], "blocked_by");
        assert_eq!(json["records"][0]["outcome"]["cause"]["action"], "add x");

        let back: RunReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
