//! Executor and state query abstractions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Exit code a probe script uses to report that the probed resource or
/// attribute does not exist, as opposed to existing with an empty value.
pub const ABSENT_EXIT_CODE: i32 = 2;

/// Errors raised while carrying out a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The backing program could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The command exceeded its time budget
    #[error("command '{label}' timed out after {timeout:?}")]
    Timeout {
        /// Label of the command
        label: String,
        /// Budget that was exceeded
        timeout: Duration,
    },

    /// A probe exited with a code other than success or absent
    #[error("probe '{label}' failed with exit code {exit_code}: {stderr}")]
    Probe {
        /// Label of the probe
        label: String,
        /// Exit code reported by the probe
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },
}

/// Carries out corrective and observational commands.
///
/// Implementations own their timeout policy and surface expiry as
/// [`ExecError::Timeout`]. A non-zero exit is not an error at this level;
/// callers decide what exit status means.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a command to completion.
    async fn run(&self, command: &Command) -> Result<CommandOutput>;
}

/// Reads the current value of a resource attribute.
#[async_trait]
pub trait StateQuery: Send + Sync {
    /// Query the live value. `Ok(None)` means the resource (or attribute)
    /// is absent, which is distinct from `Ok(Some(String::new()))`.
    async fn query(&self, probe: &Probe) -> Result<Option<String>>;
}

/// A command to carry out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Human readable label, safe to log
    pub label: String,

    /// Script text handed to the backend. May contain secrets.
    pub script: String,

    /// State changes the command is expected to produce
    #[serde(default)]
    pub effects: Vec<Effect>,

    /// Per-command timeout overriding the executor default
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl Command {
    /// Create a new command.
    pub fn new(label: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            script: script.into(),
            effects: Vec::new(),
            timeout: None,
        }
    }

    /// Declare an expected state change.
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Declare several expected state changes.
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// Set a timeout for this command.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Declared postcondition of a command.
///
/// Real backends ignore effects; the in-memory host applies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// The resource exists afterwards
    Create {
        /// Resource key
        resource: String,
    },

    /// The attribute holds `value` afterwards (rendered as the backend prints it)
    Set {
        /// Resource key
        resource: String,
        /// Attribute name
        attribute: String,
        /// Rendered value
        value: String,
    },

    /// The resource no longer exists
    Remove {
        /// Resource key
        resource: String,
    },
}

/// An observation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    /// Resource key
    pub resource: String,

    /// Attribute to read; `None` probes for existence only
    pub attribute: Option<String>,

    /// Script printing the value, exiting with [`ABSENT_EXIT_CODE`] when absent
    pub script: String,
}

impl Probe {
    /// Probe whether a resource exists.
    pub fn exists(resource: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: None,
            script: script.into(),
        }
    }

    /// Probe a single attribute of a resource.
    pub fn attribute(
        resource: impl Into<String>,
        attribute: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            attribute: Some(attribute.into()),
            script: script.into(),
        }
    }

    /// Label used when the probe is run as a command.
    pub fn label(&self) -> String {
        match &self.attribute {
            Some(attribute) => format!("probe {} {}", self.resource, attribute),
            None => format!("probe {}", self.resource),
        }
    }
}

/// Output from a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Execution duration
    pub duration: Duration,
}

impl CommandOutput {
    /// Whether the command exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
