//! Topological metrics over a plan's dependency graph.
//!
//! Everything here is for observability. Nothing in the scheduler branches
//! on these numbers.

use super::types::Plan;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DagMetrics {
    pub task_count: usize,
    pub max_parallelism: usize,
    pub critical_path_length: usize,
    pub has_cycle: bool,
}

/// Downstream adjacency over unique, non-blank task ids. Edges to unknown ids
/// are dropped and repeated edges collapse.
struct Graph<'a> {
    ids: BTreeSet<&'a str>,
    downstream: BTreeMap<&'a str, Vec<&'a str>>,
    indegree: BTreeMap<&'a str, usize>,
}

impl<'a> Graph<'a> {
    fn build(plan: &'a Plan) -> Self {
        let ids = plan
            .tasks
            .iter()
            .filter(|task| !task.has_blank_id())
            .map(|task| task.id.as_str())
            .collect::<BTreeSet<_>>();

        let mut downstream: BTreeMap<&str, Vec<&str>> =
            ids.iter().map(|id| (*id, Vec::new())).collect();
        let mut indegree: BTreeMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();

        // Later duplicates of an id shadow earlier ones.
        let mut by_id = BTreeMap::new();
        for task in plan.tasks.iter().filter(|task| !task.has_blank_id()) {
            by_id.insert(task.id.as_str(), task);
        }

        for (id, task) in &by_id {
            let mut seen = BTreeSet::new();
            for dep in &task.depends_on {
                let dep = dep.as_str();
                if !ids.contains(dep) || !seen.insert(dep) {
                    continue;
                }
                if let Some(degree) = indegree.get_mut(id) {
                    *degree += 1;
                }
                if let Some(next) = downstream.get_mut(dep) {
                    next.push(*id);
                }
            }
        }

        Self {
            ids,
            downstream,
            indegree,
        }
    }
}

pub fn analyze(plan: &Plan) -> DagMetrics {
    let graph = Graph::build(plan);
    if graph.ids.is_empty() {
        return DagMetrics::default();
    }

    let mut indegree = graph.indegree.clone();
    let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
    let mut queue = VecDeque::new();
    for (id, degree) in &indegree {
        if *degree == 0 {
            queue.push_back(*id);
            depth.insert(*id, 1);
        }
    }

    let mut visited = 0usize;
    let mut max_parallelism = 0usize;
    let mut critical_path_length = 0usize;

    while !queue.is_empty() {
        let width = queue.len();
        max_parallelism = max_parallelism.max(width);

        for _ in 0..width {
            let Some(id) = queue.pop_front() else {
                break;
            };
            visited += 1;
            let current = depth.get(id).copied().unwrap_or(1);
            critical_path_length = critical_path_length.max(current);

            for next in graph.downstream.get(id).into_iter().flatten() {
                let entry = depth.entry(*next).or_insert(1);
                *entry = (*entry).max(current + 1);
                if let Some(degree) = indegree.get_mut(next) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }
    }

    DagMetrics {
        task_count: graph.ids.len(),
        max_parallelism,
        critical_path_length: critical_path_length.max(1),
        has_cycle: visited < graph.ids.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Visiting,
    Visited,
}

/// Returns one dependency cycle as a path of task ids, first id repeated at
/// the end, or `None` if the graph is acyclic.
pub fn find_cycle(plan: &Plan) -> Option<Vec<String>> {
    let graph = Graph::build(plan);
    let mut states = BTreeMap::new();
    let mut stack = Vec::new();

    for id in &graph.ids {
        if states.contains_key(id) {
            continue;
        }
        if let Some(path) = detect_cycle(*id, &graph.downstream, &mut states, &mut stack) {
            return Some(path.into_iter().map(str::to_string).collect());
        }
    }
    None
}

fn detect_cycle<'a>(
    id: &'a str,
    downstream: &BTreeMap<&'a str, Vec<&'a str>>,
    states: &mut BTreeMap<&'a str, NodeState>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    states.insert(id, NodeState::Visiting);
    stack.push(id);

    for next in downstream.get(id).into_iter().flatten() {
        match states.get(next) {
            Some(NodeState::Visiting) => {
                let index = stack.iter().position(|entry| entry == next)?;
                let mut cycle = stack[index..].to_vec();
                cycle.push(*next);
                return Some(cycle);
            }
            Some(NodeState::Visited) => {}
            None => {
                if let Some(cycle) = detect_cycle(*next, downstream, states, stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    states.insert(id, NodeState::Visited);
    None
}
