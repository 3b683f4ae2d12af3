//! Resource actions: a desired-state predicate, an apply step and declared
//! dependencies.

use crate::compare::ValueComparator;
use crate::error::ActionError;
use crate::id::{ActionId, ResourceId};
use crate::outcome::Outcomes;
use crate::value::{State, Value, ValueKind};
use async_trait::async_trait;
use converge_tools::{Command, Executor, Probe, StateQuery};
use std::sync::Arc;

/// Capabilities handed to actions while a run executes.
#[derive(Clone)]
pub struct ExecContext {
    /// Carries out corrective commands
    pub executor: Arc<dyn Executor>,

    /// Reads live state
    pub query: Arc<dyn StateQuery>,
}

impl ExecContext {
    /// Create a context from separate capabilities.
    pub fn new(executor: Arc<dyn Executor>, query: Arc<dyn StateQuery>) -> Self {
        Self { executor, query }
    }

    /// Create a context from a host implementing both capabilities.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: Executor + StateQuery + 'static,
    {
        Self {
            executor: host.clone(),
            query: host,
        }
    }
}

/// How an action observes and corrects one attribute.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Read the current state.
    async fn observe(&self, ctx: &ExecContext) -> Result<State, ActionError>;

    /// Correct drift.
    async fn apply(&self, ctx: &ExecContext) -> Result<(), ActionError>;

    /// React to a notifying action having applied a change.
    async fn refresh(&self, _ctx: &ExecContext) -> Result<(), ActionError> {
        Ok(())
    }
}

/// The probe-then-command capability: observe by running a probe, correct
/// by running a command.
#[derive(Debug, Clone)]
pub struct ExecResource {
    probe: Probe,
    kind: ValueKind,
    command: Command,
    refresh: Option<Command>,
}

impl ExecResource {
    /// Create a probe/command pair. Existence probes observe
    /// `Present(true)` when the resource exists.
    pub fn new(probe: Probe, kind: ValueKind, command: Command) -> Self {
        Self {
            probe,
            kind,
            command,
            refresh: None,
        }
    }

    /// Command to run when notified.
    pub fn with_refresh(mut self, command: Command) -> Self {
        self.refresh = Some(command);
        self
    }
}

#[async_trait]
impl Capability for ExecResource {
    async fn observe(&self, ctx: &ExecContext) -> Result<State, ActionError> {
        let Some(text) = ctx.query.query(&self.probe).await? else {
            return Ok(State::Absent);
        };

        if self.probe.attribute.is_none() {
            return Ok(State::Present(Value::Bool(true)));
        }

        Ok(State::Present(self.kind.parse_observed(&text)?))
    }

    async fn apply(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        run_command(ctx, &self.command).await
    }

    async fn refresh(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        match &self.refresh {
            Some(command) => run_command(ctx, command).await,
            None => Ok(()),
        }
    }
}

/// Run a command, turning a non-zero exit into an [`ActionError`].
pub async fn run_command(ctx: &ExecContext, command: &Command) -> Result<(), ActionError> {
    let output = ctx.executor.run(command).await?;
    if output.success() {
        Ok(())
    } else {
        Err(ActionError::CommandFailed {
            label: command.label.clone(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// What part of a resource an action manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionRole {
    /// Brings the resource into existence; satisfied iff it exists
    Create,
    /// Converges one attribute of an existing resource
    Attribute,
    /// Keeps a service running; refreshed when notified
    Service,
}

/// Predicate over earlier outcomes, evaluated when the action is reached.
pub type RuntimePredicate = Arc<dyn Fn(&Outcomes) -> bool + Send + Sync>;

/// Whether an action takes part in a run.
#[derive(Clone, Default)]
pub enum Applicability {
    /// Always included
    #[default]
    Always,
    /// Decided from sibling desired attributes when the catalog is built
    Desired(bool),
    /// Decided by the engine from earlier outcomes
    Runtime(RuntimePredicate),
}

impl Applicability {
    /// Runtime predicate.
    pub fn runtime(predicate: impl Fn(&Outcomes) -> bool + Send + Sync + 'static) -> Self {
        Self::Runtime(Arc::new(predicate))
    }

    /// Whether the action belongs in the plan. Runtime predicates are
    /// deferred to the engine.
    pub fn at_plan_time(&self) -> bool {
        match self {
            Self::Always | Self::Runtime(_) => true,
            Self::Desired(applies) => *applies,
        }
    }

    /// Whether the action runs, given the outcomes recorded so far.
    pub fn at_run_time(&self, outcomes: &Outcomes) -> bool {
        match self {
            Self::Always => true,
            Self::Desired(applies) => *applies,
            Self::Runtime(predicate) => predicate(outcomes),
        }
    }
}

impl std::fmt::Debug for Applicability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Desired(applies) => f.debug_tuple("Desired").field(applies).finish(),
            Self::Runtime(_) => f.write_str("Runtime(..)"),
        }
    }
}

/// A named unit of work.
#[derive(Clone)]
pub struct ResourceAction {
    /// Unique name
    pub id: ActionId,

    /// Owning resource
    pub resource: ResourceId,

    /// Managed attribute (`ensure` for creation, `running` for services)
    pub attribute: String,

    /// Creation, attribute or service
    pub role: ActionRole,

    /// Desired state
    pub desired: State,

    /// Comparison kind
    pub kind: ValueKind,

    /// Actions that must run before this one
    pub requires: Vec<ActionId>,

    /// Actions this one must run before
    pub before: Vec<ActionId>,

    /// Actions this one runs before and refreshes when it applies a change
    pub notify: Vec<ActionId>,

    /// Inclusion predicate
    pub applicability: Applicability,

    capability: Arc<dyn Capability>,
}

impl ResourceAction {
    /// Create an attribute action.
    pub fn new(
        id: impl Into<ActionId>,
        resource: ResourceId,
        attribute: impl Into<String>,
        desired: State,
        kind: ValueKind,
        capability: Arc<dyn Capability>,
    ) -> Self {
        Self {
            id: id.into(),
            resource,
            attribute: attribute.into(),
            role: ActionRole::Attribute,
            desired,
            kind,
            requires: Vec::new(),
            before: Vec::new(),
            notify: Vec::new(),
            applicability: Applicability::Always,
            capability,
        }
    }

    /// Create a creation action: satisfied iff the resource exists,
    /// regardless of attribute drift.
    pub fn create(
        id: impl Into<ActionId>,
        resource: ResourceId,
        capability: Arc<dyn Capability>,
    ) -> Self {
        Self::new(id, resource, "ensure", State::present(true), ValueKind::Boolean, capability)
            .with_role(ActionRole::Create)
    }

    /// Create a service action: satisfied iff the service runs.
    pub fn service(
        id: impl Into<ActionId>,
        resource: ResourceId,
        capability: Arc<dyn Capability>,
    ) -> Self {
        Self::new(id, resource, "running", State::present(true), ValueKind::Boolean, capability)
            .with_role(ActionRole::Service)
    }

    /// Set the role.
    pub fn with_role(mut self, role: ActionRole) -> Self {
        self.role = role;
        self
    }

    /// Run after `action`.
    pub fn requires(mut self, action: impl Into<ActionId>) -> Self {
        self.requires.push(action.into());
        self
    }

    /// Run before `action`.
    pub fn before(mut self, action: impl Into<ActionId>) -> Self {
        self.before.push(action.into());
        self
    }

    /// Run before `action` and refresh it when this action applies.
    pub fn notify(mut self, action: impl Into<ActionId>) -> Self {
        self.notify.push(action.into());
        self
    }

    /// Set the inclusion predicate.
    pub fn with_applicability(mut self, applicability: Applicability) -> Self {
        self.applicability = applicability;
        self
    }

    /// Read the current state.
    pub async fn observe(&self, ctx: &ExecContext) -> Result<State, ActionError> {
        self.capability.observe(ctx).await
    }

    /// Whether an observed state already satisfies this action.
    pub fn satisfied_by(&self, observed: &State) -> bool {
        ValueComparator::satisfied(&self.desired, observed, self.kind)
    }

    /// Observe and compare.
    pub async fn is_satisfied(&self, ctx: &ExecContext) -> Result<bool, ActionError> {
        let observed = self.observe(ctx).await?;
        Ok(self.satisfied_by(&observed))
    }

    /// Correct drift.
    pub async fn apply(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        self.capability.apply(ctx).await
    }

    /// React to a notification.
    pub async fn refresh(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        self.capability.refresh(ctx).await
    }
}

impl std::fmt::Debug for ResourceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAction")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("attribute", &self.attribute)
            .field("role", &self.role)
            .field("desired", &self.desired)
            .field("kind", &self.kind)
            .field("requires", &self.requires)
            .field("before", &self.before)
            .field("notify", &self.notify)
            .field("applicability", &self.applicability)
            .finish_non_exhaustive()
    }
}
