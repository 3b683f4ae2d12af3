//! The convergence engine - observes, compares and corrects.

use crate::dependency::{DependencyGraph, ExecutionPlan};
use crate::scheduler::ResourceScheduler;
use converge_core::{
    ActionError, ActionRecord, ExecContext, Outcome, Outcomes, PlanError, ResourceAction,
    RunId, RunReport,
};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the convergence engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Max actions running at once
    pub max_concurrent: NonZeroUsize,
    /// Safety timeout around each observe/apply step
    pub action_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: NonZeroUsize::MIN,
            action_timeout: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max concurrent actions.
    pub fn with_max_concurrent(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the per-step timeout.
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }
}

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Building the plan
    Planning,
    /// Running actions
    Executing,
    /// Report produced
    Completed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => f.write_str("planning"),
            Self::Executing => f.write_str("executing"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

/// The convergence engine.
///
/// Each run is a single pass over the plan:
/// ```text
/// Observe → Compare → (Apply | Refresh | nothing) → Record
/// ```
/// A failed action skips its transitive dependents; independent branches
/// keep running. `execute` never fails: every outcome ends up in the
/// [`RunReport`].
pub struct ConvergenceEngine {
    ctx: ExecContext,
    config: EngineConfig,
}

impl ConvergenceEngine {
    /// Create a new engine over the given host capabilities.
    pub fn new(ctx: ExecContext) -> Self {
        Self {
            ctx,
            config: EngineConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Order a set of actions. Validation and cycle errors abort the run
    /// before anything executes.
    pub fn plan(&self, actions: Vec<ResourceAction>) -> Result<ExecutionPlan, PlanError> {
        info!(state = %RunState::Planning, "Planning {} actions", actions.len());

        DependencyGraph::build(actions).inspect_err(|e| error!("Planning failed: {}", e))
    }

    /// Run a plan to completion.
    pub async fn execute(&self, plan: &ExecutionPlan) -> RunReport {
        self.execute_with_cancel(plan, CancellationToken::new()).await
    }

    /// Run a plan, stopping between actions once `cancel` fires. In-flight
    /// actions finish; everything not yet started is reported as cancelled.
    pub async fn execute_with_cancel(
        &self,
        plan: &ExecutionPlan,
        cancel: CancellationToken,
    ) -> RunReport {
        let run_id = RunId::new();
        let started_at = chrono::Utc::now();
        info!(state = %RunState::Executing, %run_id, "Executing {} actions", plan.len());

        let mut scheduler = ResourceScheduler::new(plan, self.config.max_concurrent);
        let mut outcomes = Outcomes::new();
        let mut excluded = vec![false; plan.len()];
        // lowest-position failed ancestor (or self) of each resolved action
        let mut roots: Vec<Option<usize>> = vec![None; plan.len()];
        let mut tasks: JoinSet<(usize, Outcome, String)> = JoinSet::new();
        let mut cancelled = false;

        loop {
            while !cancelled && scheduler.can_start() {
                let Some(position) = scheduler.next_ready() else {
                    break;
                };

                let action = plan.action(position);
                let root = plan
                    .predecessors(position)
                    .iter()
                    .filter_map(|&p| roots[p])
                    .min();

                if !action.applicability.at_run_time(&outcomes) {
                    debug!("Excluding '{}': not applicable", action.id);
                    excluded[position] = true;
                    roots[position] = root;
                    scheduler.resolve(position);
                    continue;
                }

                if let Some(root) = root {
                    let failed = &plan.action(root).id;
                    debug!("Skipping '{}': blocked by '{}'", action.id, failed);
                    outcomes.record(
                        action.id.clone(),
                        Outcome::blocked_by(failed.clone()),
                        format!("prerequisite '{}' failed", failed),
                    );
                    roots[position] = Some(root);
                    scheduler.resolve(position);
                    continue;
                }

                if cancel.is_cancelled() {
                    warn!("Run {} cancelled, not starting further actions", run_id);
                    cancelled = true;
                    break;
                }

                let notified = plan.notified_by(position).iter().any(|&source| {
                    outcomes.get(&plan.action(source).id) == Some(&Outcome::Applied)
                });

                debug!("Starting '{}'", action.id);
                let step = converge(
                    Arc::clone(action),
                    self.ctx.clone(),
                    self.config.action_timeout,
                    notified,
                );
                tasks.spawn(async move {
                    // a panicking capability fails its own action only
                    let (outcome, detail) = tokio::spawn(step).await.unwrap_or_else(|e| {
                        let reason = format!("action task aborted: {}", e);
                        (Outcome::failed(reason.clone()), reason)
                    });
                    (position, outcome, detail)
                });
                scheduler.task_started();
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let (position, outcome, detail) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    error!("Lost track of an action task: {}", e);
                    continue;
                }
            };

            if outcome.is_failed() {
                roots[position] = Some(position);
            }
            record(plan.action(position), outcome, detail, &mut outcomes);
            scheduler.task_completed(position);
        }

        let records: Vec<ActionRecord> = plan
            .actions()
            .enumerate()
            .filter(|(position, _)| !excluded[*position])
            .map(|(_, action)| {
                let (outcome, detail) = match outcomes.get(&action.id) {
                    Some(outcome) => (
                        outcome.clone(),
                        outcomes.detail(&action.id).unwrap_or_default().to_string(),
                    ),
                    None => (Outcome::cancelled(), "run cancelled before start".to_string()),
                };
                ActionRecord {
                    action_id: action.id.clone(),
                    resource: action.resource.clone(),
                    outcome,
                    detail,
                }
            })
            .collect();

        let report = RunReport::new(run_id, started_at, chrono::Utc::now(), cancelled, records);

        info!(
            state = %RunState::Completed,
            %run_id,
            "Run finished: {} unchanged, {} applied, {} failed, {} skipped",
            report.summary.unchanged,
            report.summary.applied,
            report.summary.failed,
            report.summary.skipped
        );

        report
    }
}

/// Record the outcome of a finished action. Dependents of a failure are
/// skipped as they become ready, naming the failed ancestor with the lowest
/// plan position, so the report does not depend on completion order.
fn record(action: &ResourceAction, outcome: Outcome, detail: String, outcomes: &mut Outcomes) {
    match &outcome {
        Outcome::Failed { reason } => error!("'{}' failed: {}", action.id, reason),
        Outcome::Applied => info!("'{}': applied ({})", action.id, detail),
        other => debug!("'{}': {}", action.id, other),
    }

    outcomes.record(action.id.clone(), outcome, detail);
}

/// Converge one action. Apply only runs on genuine drift; a satisfied
/// action that was notified is refreshed instead.
async fn converge(
    action: Arc<ResourceAction>,
    ctx: ExecContext,
    limit: Duration,
    notified: bool,
) -> (Outcome, String) {
    let observed = match bounded(limit, action.observe(&ctx)).await {
        Ok(state) => state,
        Err(e) => return (Outcome::failed(e.to_string()), format!("observe: {}", e)),
    };

    if action.satisfied_by(&observed) {
        if !notified {
            return (
                Outcome::Unchanged,
                format!("{} is {}", action.attribute, observed),
            );
        }

        return match bounded(limit, action.refresh(&ctx)).await {
            Ok(()) => (Outcome::Applied, "refreshed".to_string()),
            Err(e) => (Outcome::failed(e.to_string()), format!("refresh: {}", e)),
        };
    }

    match bounded(limit, action.apply(&ctx)).await {
        Ok(()) => (
            Outcome::Applied,
            format!("{}: {} -> {}", action.attribute, observed, action.desired),
        ),
        Err(e) => (Outcome::failed(e.to_string()), format!("apply: {}", e)),
    }
}

async fn bounded<T>(
    limit: Duration,
    step: impl Future<Output = Result<T, ActionError>>,
) -> Result<T, ActionError> {
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| ActionError::Timeout(limit))?
}
