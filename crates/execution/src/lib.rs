//! Execution layer - dependency planning, scheduling and convergence.

#![warn(missing_docs)]

pub mod dependency;
pub mod scheduler;
pub mod engine;

pub use dependency::{DependencyGraph, ExecutionPlan};
pub use scheduler::ResourceScheduler;
pub use engine::{ConvergenceEngine, EngineConfig, RunState};
