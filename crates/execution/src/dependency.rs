//! Dependency resolution for actions.

use converge_core::{ActionId, CycleError, PlanError, ResourceAction, ValidationError};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Builds execution plans from declared `requires`, `before` and `notify`
/// edges.
pub struct DependencyGraph;

impl DependencyGraph {
    /// Normalise all edges into one directed edge set and order the actions
    /// topologically. Ties between independent actions keep declaration
    /// order.
    ///
    /// Actions whose applicability is false at plan time are dropped, along
    /// with edges pointing at them. Edges to undeclared actions are a
    /// validation error; any cycle (including an action that both requires
    /// and precedes another) rejects the whole plan.
    pub fn build(actions: Vec<ResourceAction>) -> Result<ExecutionPlan, PlanError> {
        let mut seen = HashSet::new();
        for action in &actions {
            if !seen.insert(action.id.clone()) {
                return Err(ValidationError::Duplicate {
                    what: "action".to_string(),
                    name: action.id.to_string(),
                }
                .into());
            }
        }

        let (kept, dropped): (Vec<_>, Vec<_>) = actions
            .into_iter()
            .partition(|a| a.applicability.at_plan_time());
        let excluded: HashSet<ActionId> = dropped.into_iter().map(|a| a.id).collect();

        let index: HashMap<ActionId, usize> = kept
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.clone(), i))
            .collect();

        let n = kept.len();
        let mut edges: HashSet<(usize, usize)> = HashSet::new();
        let mut notify: HashSet<(usize, usize)> = HashSet::new();

        let resolve = |from: &ActionId, to: &ActionId| -> Result<Option<usize>, PlanError> {
            if let Some(&i) = index.get(to) {
                Ok(Some(i))
            } else if excluded.contains(to) {
                debug!("Dropping edge {} -> {}: target not applicable", from, to);
                Ok(None)
            } else {
                Err(ValidationError::UnknownDependency {
                    action: from.clone(),
                    dependency: to.clone(),
                }
                .into())
            }
        };

        for (i, action) in kept.iter().enumerate() {
            for dep in &action.requires {
                if let Some(j) = resolve(&action.id, dep)? {
                    edges.insert((j, i));
                }
            }
            for succ in &action.before {
                if let Some(j) = resolve(&action.id, succ)? {
                    edges.insert((i, j));
                }
            }
            for target in &action.notify {
                if let Some(j) = resolve(&action.id, target)? {
                    edges.insert((i, j));
                    notify.insert((i, j));
                }
            }
        }

        let mut predecessors = vec![Vec::new(); n];
        let mut successors = vec![Vec::new(); n];
        for &(from, to) in &edges {
            if from == to {
                return Err(CycleError {
                    cycle: vec![kept[from].id.clone()],
                }
                .into());
            }
            successors[from].push(to);
            predecessors[to].push(from);
        }

        // Kahn's algorithm; the heap yields the lowest declaration index first.
        let mut indegree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &j in &successors[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        if order.len() < n {
            let cycle = find_cycle(&indegree, &predecessors)
                .into_iter()
                .map(|i| kept[i].id.clone())
                .collect();
            return Err(CycleError { cycle }.into());
        }

        // Re-index everything by plan position.
        let mut position = vec![0; n];
        for (pos, &i) in order.iter().enumerate() {
            position[i] = pos;
        }
        let remap = |list: &Vec<usize>| {
            let mut mapped: Vec<usize> = list.iter().map(|&i| position[i]).collect();
            mapped.sort_unstable();
            mapped
        };

        let mut notified_by = vec![Vec::new(); n];
        for &(from, to) in &notify {
            notified_by[position[to]].push(position[from]);
        }
        for list in &mut notified_by {
            list.sort_unstable();
        }

        let plan_predecessors = order.iter().map(|&i| remap(&predecessors[i])).collect();
        let plan_successors = order.iter().map(|&i| remap(&successors[i])).collect();

        let mut slots: Vec<Option<ResourceAction>> = kept.into_iter().map(Some).collect();
        let actions: Vec<Arc<ResourceAction>> = order
            .iter()
            .filter_map(|&i| slots[i].take().map(Arc::new))
            .collect();

        let index = actions
            .iter()
            .enumerate()
            .map(|(pos, a)| (a.id.clone(), pos))
            .collect();

        let mut excluded: Vec<ActionId> = excluded.into_iter().collect();
        excluded.sort();

        debug!("Planned {} actions ({} excluded)", actions.len(), excluded.len());

        Ok(ExecutionPlan {
            actions,
            index,
            predecessors: plan_predecessors,
            successors: plan_successors,
            notified_by,
            excluded,
        })
    }
}

/// Walk predecessors among the nodes Kahn's algorithm could not order.
/// Every such node has an unordered predecessor, so the walk must revisit a
/// node; the revisited stretch is a cycle.
fn find_cycle(indegree: &[usize], predecessors: &[Vec<usize>]) -> Vec<usize> {
    let Some(start) = indegree.iter().position(|&d| d > 0) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut on_path: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    loop {
        let Some(&prev) = predecessors[current].iter().find(|&&p| indegree[p] > 0) else {
            return path;
        };
        if let Some(&at) = on_path.get(&prev) {
            // path runs against the edges; reverse into edge order
            let mut cycle = path[at..].to_vec();
            cycle.reverse();
            return cycle;
        }
        on_path.insert(prev, path.len());
        path.push(prev);
        current = prev;
    }
}

/// An ordered sequence of actions satisfying every edge.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    actions: Vec<Arc<ResourceAction>>,
    index: HashMap<ActionId, usize>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    notified_by: Vec<Vec<usize>>,
    excluded: Vec<ActionId>,
}

impl ExecutionPlan {
    /// Number of planned actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is planned.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Action at a plan position.
    pub fn action(&self, position: usize) -> &Arc<ResourceAction> {
        &self.actions[position]
    }

    /// Actions in execution order.
    pub fn actions(&self) -> impl Iterator<Item = &Arc<ResourceAction>> {
        self.actions.iter()
    }

    /// Action ids in execution order.
    pub fn ids(&self) -> Vec<ActionId> {
        self.actions.iter().map(|a| a.id.clone()).collect()
    }

    /// Plan position of an action.
    pub fn position(&self, id: &ActionId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Direct predecessors (plan positions, ascending).
    pub fn predecessors(&self, position: usize) -> &[usize] {
        &self.predecessors[position]
    }

    /// Direct successors (plan positions, ascending).
    pub fn successors(&self, position: usize) -> &[usize] {
        &self.successors[position]
    }

    /// Positions of the actions that notify this one.
    pub fn notified_by(&self, position: usize) -> &[usize] {
        &self.notified_by[position]
    }

    /// Actions dropped at plan time because they were not applicable.
    pub fn excluded(&self) -> &[ActionId] {
        &self.excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use converge_core::{
        ActionError, Applicability, Capability, ExecContext, ResourceId, State, ValueKind,
    };

    struct Noop;

    #[async_trait]
    impl Capability for Noop {
        async fn observe(&self, _ctx: &ExecContext) -> Result<State, ActionError> {
            Ok(State::Absent)
        }

        async fn apply(&self, _ctx: &ExecContext) -> Result<(), ActionError> {
            Ok(())
        }
    }

    fn action(id: &str) -> ResourceAction {
        ResourceAction::new(
            id,
            ResourceId::Server,
            "attr",
            State::present(true),
            ValueKind::Boolean,
            Arc::new(Noop),
        )
    }

    fn order(plan: &ExecutionPlan) -> Vec<String> {
        plan.ids().iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_requires_orders_dependency_first() {
        let plan = DependencyGraph::build(vec![
            action("set scope name").requires("add scope"),
            action("add scope"),
        ])
        .unwrap();

        assert_eq!(order(&plan), vec!["add scope", "set scope name"]);
    }

    #[test]
    fn test_before_is_normalized_to_the_same_edge() {
        let plan = DependencyGraph::build(vec![
            action("authorise server"),
            action("add admin").before("authorise server"),
        ])
        .unwrap();

        assert_eq!(order(&plan), vec!["add admin", "authorise server"]);
        assert_eq!(plan.predecessors(1), &[0]);
    }

    #[test]
    fn test_independent_actions_keep_declaration_order() {
        let ids = ["c", "a", "b", "d"];
        let first = DependencyGraph::build(ids.iter().map(|id| action(id)).collect()).unwrap();
        let second = DependencyGraph::build(ids.iter().map(|id| action(id)).collect()).unwrap();

        assert_eq!(order(&first), vec!["c", "a", "b", "d"]);
        assert_eq!(order(&first), order(&second));
    }

    #[test]
    fn test_tie_break_after_dependencies() {
        let plan = DependencyGraph::build(vec![
            action("add y"),
            action("set x").requires("add x"),
            action("add x"),
            action("set y").requires("add y"),
        ])
        .unwrap();

        assert_eq!(order(&plan), vec!["add y", "add x", "set x", "set y"]);
    }

    #[test]
    fn test_every_requires_edge_is_respected() {
        let plan = DependencyGraph::build(vec![
            action("e").requires("d"),
            action("d").requires("b").requires("c"),
            action("c").requires("a"),
            action("b").requires("a"),
            action("a"),
        ])
        .unwrap();

        for a in plan.actions() {
            let pos = plan.position(&a.id).unwrap();
            for dep in &a.requires {
                assert!(plan.position(dep).unwrap() < pos, "{} before {}", dep, a.id);
            }
        }
    }

    #[test]
    fn test_direct_cycle_is_rejected() {
        let err = DependencyGraph::build(vec![
            action("a").requires("b"),
            action("b").requires("a"),
        ])
        .unwrap_err();

        let cycle = match err {
            PlanError::Cycle(cycle) => cycle,
            other => panic!("expected cycle error, got {other:?}"),
        };
        assert_eq!(cycle.cycle.len(), 2);
    }

    #[test]
    fn test_indirect_cycle_is_rejected() {
        let err = DependencyGraph::build(vec![
            action("free"),
            action("a").requires("c"),
            action("b").requires("a"),
            action("c").requires("b"),
        ])
        .unwrap_err();

        let cycle = match err {
            PlanError::Cycle(cycle) => cycle,
            other => panic!("expected cycle error, got {other:?}"),
        };
        let mut members: Vec<String> = cycle.cycle.iter().map(|id| id.to_string()).collect();
        members.sort();
        assert_eq!(members, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_contradictory_requires_and_before_is_a_cycle() {
        let err = DependencyGraph::build(vec![
            action("a").requires("b").before("b"),
            action("b"),
        ])
        .unwrap_err();

        assert!(matches!(err, PlanError::Cycle(_)));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = DependencyGraph::build(vec![action("a").requires("a")]).unwrap_err();
        assert!(matches!(err, PlanError::Cycle(c) if c.cycle == vec![ActionId::new("a")]));
    }

    #[test]
    fn test_unknown_dependency_is_validation_error() {
        let err = DependencyGraph::build(vec![action("a").requires("ghost")]).unwrap_err();
        assert!(matches!(
            err,
            PlanError::Validation(ValidationError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_action_is_validation_error() {
        let err = DependencyGraph::build(vec![action("a"), action("a")]).unwrap_err();
        assert!(matches!(
            err,
            PlanError::Validation(ValidationError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_inapplicable_actions_are_absent_from_plan() {
        let plan = DependencyGraph::build(vec![
            action("add failover"),
            action("set reserve_percent")
                .requires("add failover")
                .with_applicability(Applicability::Desired(false)),
            action("set loadbalance_percent").requires("add failover"),
            action("after").requires("set reserve_percent"),
        ])
        .unwrap();

        assert_eq!(
            order(&plan),
            vec!["add failover", "set loadbalance_percent", "after"]
        );
        assert_eq!(plan.excluded(), &[ActionId::new("set reserve_percent")]);
    }

    #[test]
    fn test_notify_orders_and_records_notifier() {
        let plan = DependencyGraph::build(vec![
            action("service"),
            action("setting").notify("service"),
        ])
        .unwrap();

        assert_eq!(order(&plan), vec!["setting", "service"]);
        assert_eq!(plan.notified_by(1), &[0]);
    }

    #[test]
    fn test_large_chain_plans_quickly() {
        let n = 20_000;
        let mut actions: Vec<ResourceAction> = (1..n)
            .map(|i| action(&format!("a{i}")).requires(format!("a{}", i - 1)))
            .collect();
        actions.push(action("a0"));

        let plan = DependencyGraph::build(actions).unwrap();
        assert_eq!(plan.len(), n);
        assert_eq!(plan.action(0).id, ActionId::new("a0"));
        assert_eq!(plan.action(n - 1).id, ActionId::new(format!("a{}", n - 1)));
    }
}
