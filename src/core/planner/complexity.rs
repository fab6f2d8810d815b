use super::types::{Plan, PlanTask};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const STEP_WEIGHT: f64 = 1.0;
const DEPTH_WEIGHT: f64 = 0.8;
const FANOUT_WEIGHT: f64 = 0.4;

/// Size, depth and branching cost of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ComplexityScore {
    pub step_count: usize,
    /// Tasks with no dependencies.
    pub fanout: usize,
    pub critical_path_depth: usize,
    pub lambda: f64,
    pub raw_complexity: f64,
    pub penalty: f64,
}

#[allow(clippy::cast_precision_loss)]
pub fn score_complexity(plan: &Plan, lambda: f64) -> ComplexityScore {
    if plan.tasks.is_empty() {
        return ComplexityScore::default();
    }

    let step_count = plan.tasks.len();
    let fanout = plan
        .tasks
        .iter()
        .filter(|task| task.depends_on.is_empty())
        .count();

    let mut walker = DepthWalker::new(plan);
    let critical_path_depth = plan
        .tasks
        .iter()
        .map(|task| walker.depth(&task.id))
        .max()
        .unwrap_or(0);

    let lambda = if lambda.is_finite() { lambda.max(0.0) } else { 0.0 };
    let raw_complexity = step_count as f64 * STEP_WEIGHT
        + critical_path_depth as f64 * DEPTH_WEIGHT
        + fanout as f64 * FANOUT_WEIGHT;

    ComplexityScore {
        step_count,
        fanout,
        critical_path_depth,
        lambda,
        raw_complexity,
        penalty: lambda * raw_complexity,
    }
}

/// Memoized longest-chain depth. A dependency that is still on the stack
/// (a cycle that slipped past validation) counts as depth 1.
struct DepthWalker<'a> {
    tasks: BTreeMap<&'a str, &'a PlanTask>,
    memo: BTreeMap<&'a str, usize>,
    on_stack: BTreeSet<&'a str>,
}

impl<'a> DepthWalker<'a> {
    fn new(plan: &'a Plan) -> Self {
        let mut tasks = BTreeMap::new();
        for task in &plan.tasks {
            tasks.entry(task.id.as_str()).or_insert(task);
        }
        Self {
            tasks,
            memo: BTreeMap::new(),
            on_stack: BTreeSet::new(),
        }
    }

    fn depth(&mut self, id: &'a str) -> usize {
        if id.trim().is_empty() {
            return 1;
        }
        if let Some(cached) = self.memo.get(id) {
            return *cached;
        }
        let Some(task) = self.tasks.get(id).copied() else {
            self.memo.insert(id, 1);
            return 1;
        };
        if task.depends_on.is_empty() || !self.on_stack.insert(id) {
            return 1;
        }

        let deepest = task
            .depends_on
            .iter()
            .map(|dep| self.depth(dep))
            .max()
            .unwrap_or(0);
        self.on_stack.remove(id);

        let out = deepest + 1;
        self.memo.insert(id, out);
        out
    }
}
