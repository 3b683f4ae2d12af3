//! Built-in backends (PowerShell process, executor-backed state query).

use super::r#trait::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command as Process;
use tracing::debug;

/// Runs scripts through a PowerShell process.
pub struct PowerShellExecutor {
    program: String,
    default_timeout: Duration,
}

impl PowerShellExecutor {
    /// Create an executor using the platform's PowerShell binary.
    pub fn new() -> Self {
        let program = if cfg!(windows) { "powershell.exe" } else { "pwsh" };
        Self {
            program: program.to_string(),
            default_timeout: Duration::from_secs(300),
        }
    }

    /// Use a different PowerShell binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the timeout applied to commands without their own.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Default for PowerShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for PowerShellExecutor {
    async fn run(&self, command: &Command) -> Result<CommandOutput> {
        let start = Instant::now();
        let timeout = command.timeout.unwrap_or(self.default_timeout);

        debug!("Running '{}' via {}", command.label, self.program);

        let mut process = Process::new(&self.program);
        process
            .args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"])
            .arg(&command.script)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, process.output()).await {
            Ok(output) => output.map_err(|source| ExecError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ExecError::Timeout {
                    label: command.label.clone(),
                    timeout,
                })
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}

/// State query that runs probe scripts through an [`Executor`].
///
/// Exit code 0 yields the trimmed standard output, [`ABSENT_EXIT_CODE`]
/// yields absence, anything else is a probe failure.
pub struct ExecutorStateQuery {
    executor: Arc<dyn Executor>,
}

impl ExecutorStateQuery {
    /// Create a state query over an executor.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StateQuery for ExecutorStateQuery {
    async fn query(&self, probe: &Probe) -> Result<Option<String>> {
        let label = probe.label();
        let output = self
            .executor
            .run(&Command::new(label.clone(), probe.script.clone()))
            .await?;

        match output.exit_code {
            0 => Ok(Some(output.stdout.trim().to_string())),
            ABSENT_EXIT_CODE => Ok(None),
            exit_code => Err(ExecError::Probe {
                label,
                exit_code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedExecutor(CommandOutput);

    #[async_trait]
    impl Executor for FixedExecutor {
        async fn run(&self, _command: &Command) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
    }

    fn query_with(exit_code: i32, stdout: &str) -> ExecutorStateQuery {
        ExecutorStateQuery::new(Arc::new(FixedExecutor(CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: "boom".to_string(),
            duration: Duration::ZERO,
        })))
    }

    #[tokio::test]
    async fn test_query_present_value_is_trimmed() {
        let query = query_with(0, "LAN\r\n");
        let probe = Probe::attribute("scope[10.0.0.0]", "name", "...");
        assert_eq!(query.query(&probe).await.unwrap(), Some("LAN".to_string()));
    }

    #[tokio::test]
    async fn test_query_empty_value_is_not_absent() {
        let query = query_with(0, "");
        let probe = Probe::attribute("scope[10.0.0.0]", "description", "...");
        assert_eq!(query.query(&probe).await.unwrap(), Some(String::new()));
    }

    #[tokio::test]
    async fn test_query_absent_exit_code() {
        let query = query_with(ABSENT_EXIT_CODE, "");
        let probe = Probe::exists("scope[10.0.0.0]", "...");
        assert_eq!(query.query(&probe).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_other_exit_code_fails() {
        let query = query_with(1, "");
        let probe = Probe::exists("scope[10.0.0.0]", "...");
        let err = query.query(&probe).await.unwrap_err();
        assert!(matches!(err, ExecError::Probe { exit_code: 1, .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let executor = PowerShellExecutor::new().with_program("definitely-not-a-real-shell-binary");
        let err = executor.run(&Command::new("noop", "exit 0")).await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
