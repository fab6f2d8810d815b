use crate::core::planner::types::{TaskResult, TaskResults};
use crate::error::StateError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

pub type StateFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StateError>> + Send + 'a>>;

/// Replan bookkeeping carried across pauses and restarts, so a resumed run
/// keeps spending the budget it started with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplanState {
    pub replan_count: u32,
    pub unresolved_task_ids: Vec<String>,
}

/// Run-scoped execution state that must survive a process restart.
///
/// A run whose process died mid-execution is resumed by reloading the plan,
/// its task results and its replan state; pending work is
/// `plan - completed results`.
pub trait RunStateStore: Send + Sync {
    fn load_plan<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, Option<String>>;

    fn record_plan<'a>(
        &'a self,
        run_id: &'a str,
        plan_json: &'a str,
        valid: bool,
    ) -> StateFuture<'a, ()>;

    /// True when the stored plan was supplied by an operator.
    fn is_plan_override<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, bool>;

    fn clear_plan_override<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, ()>;

    fn load_task_results<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, TaskResults>;

    fn save_task_result<'a>(
        &'a self,
        run_id: &'a str,
        result: &'a TaskResult,
    ) -> StateFuture<'a, ()>;

    fn remove_task_results<'a>(
        &'a self,
        run_id: &'a str,
        task_ids: &'a [String],
    ) -> StateFuture<'a, ()>;

    fn mark_task_started<'a>(&'a self, run_id: &'a str, task_id: &'a str) -> StateFuture<'a, ()>;

    /// Defaults to zero rounds and nothing unresolved for unknown runs.
    fn load_replan_state<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, ReplanState>;

    fn record_replan_state<'a>(
        &'a self,
        run_id: &'a str,
        state: &'a ReplanState,
    ) -> StateFuture<'a, ()>;
}

#[derive(Debug, Clone, Default)]
struct RunRecord {
    plan_json: Option<String>,
    plan_valid: bool,
    plan_override: bool,
    task_results: TaskResults,
    replan: ReplanState,
    started: Vec<(String, DateTime<Utc>)>,
}

/// Process-local store. Keeps everything a durable store would, which makes
/// it usable for resume tests by sharing one instance across executors.
#[derive(Default)]
pub struct InMemoryRunStateStore {
    runs: Mutex<HashMap<String, RunRecord>>,
}

impl InMemoryRunStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<T>(&self, run_id: &str, f: impl FnOnce(&mut RunRecord) -> T) -> T {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        f(runs.entry(run_id.to_string()).or_default())
    }

    /// Out-of-band operator override; the next planning pass uses it verbatim.
    pub fn store_plan_override(&self, run_id: &str, plan_json: &str) {
        self.with_run(run_id, |run| {
            run.plan_json = Some(plan_json.to_string());
            run.plan_override = true;
        });
    }

    pub fn plan_valid(&self, run_id: &str) -> bool {
        self.with_run(run_id, |run| run.plan_valid)
    }

    /// Task ids passed to `mark_task_started`, in call order.
    pub fn started_tasks(&self, run_id: &str) -> Vec<String> {
        self.with_run(run_id, |run| {
            run.started.iter().map(|(task_id, _)| task_id.clone()).collect()
        })
    }
}

impl RunStateStore for InMemoryRunStateStore {
    fn load_plan<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.with_run(run_id, |run| run.plan_json.clone())) })
    }

    fn record_plan<'a>(
        &'a self,
        run_id: &'a str,
        plan_json: &'a str,
        valid: bool,
    ) -> StateFuture<'a, ()> {
        Box::pin(async move {
            self.with_run(run_id, |run| {
                run.plan_json = Some(plan_json.to_string());
                run.plan_valid = valid;
            });
            Ok(())
        })
    }

    fn is_plan_override<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, bool> {
        Box::pin(async move { Ok(self.with_run(run_id, |run| run.plan_override)) })
    }

    fn clear_plan_override<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, ()> {
        Box::pin(async move {
            self.with_run(run_id, |run| run.plan_override = false);
            Ok(())
        })
    }

    fn load_task_results<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, TaskResults> {
        Box::pin(async move { Ok(self.with_run(run_id, |run| run.task_results.clone())) })
    }

    fn save_task_result<'a>(
        &'a self,
        run_id: &'a str,
        result: &'a TaskResult,
    ) -> StateFuture<'a, ()> {
        Box::pin(async move {
            self.with_run(run_id, |run| {
                run.task_results
                    .insert(result.task_id.clone(), result.clone());
            });
            Ok(())
        })
    }

    fn remove_task_results<'a>(
        &'a self,
        run_id: &'a str,
        task_ids: &'a [String],
    ) -> StateFuture<'a, ()> {
        Box::pin(async move {
            self.with_run(run_id, |run| {
                for task_id in task_ids {
                    run.task_results.remove(task_id);
                }
            });
            Ok(())
        })
    }

    fn mark_task_started<'a>(&'a self, run_id: &'a str, task_id: &'a str) -> StateFuture<'a, ()> {
        Box::pin(async move {
            self.with_run(run_id, |run| run.started.push((task_id.to_string(), Utc::now())));
            Ok(())
        })
    }

    fn load_replan_state<'a>(&'a self, run_id: &'a str) -> StateFuture<'a, ReplanState> {
        Box::pin(async move { Ok(self.with_run(run_id, |run| run.replan.clone())) })
    }

    fn record_replan_state<'a>(
        &'a self,
        run_id: &'a str,
        state: &'a ReplanState,
    ) -> StateFuture<'a, ()> {
        Box::pin(async move {
            self.with_run(run_id, |run| run.replan = state.clone());
            Ok(())
        })
    }
}
