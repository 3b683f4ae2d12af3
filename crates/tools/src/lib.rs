//! Executor integration
//!
//! Injected capabilities through which every observation and corrective
//! command is carried out: a PowerShell backend for real hosts and an
//! in-memory host for simulations and tests.

#![warn(missing_docs)]

pub mod r#trait;
pub mod builtin;
pub mod memory;

pub use r#trait::{
    Command, CommandOutput, Effect, ExecError, Executor, Probe, Result, StateQuery,
    ABSENT_EXIT_CODE,
};
pub use builtin::{ExecutorStateQuery, PowerShellExecutor};
pub use memory::MemoryHost;
