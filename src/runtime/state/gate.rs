use crate::error::StateError;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Cooperative cancellation check, polled before new work starts.
pub trait RunnableGate: Send + Sync {
    /// True unless the run is canceled, paused or past its TTL.
    fn is_runnable(&self, run_id: &str) -> bool;
}

/// Gate that never stops a run.
pub struct AlwaysRunnable;

impl RunnableGate for AlwaysRunnable {
    fn is_runnable(&self, _run_id: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Canceled,
}

#[derive(Debug, Clone)]
struct RunEntry {
    status: RunStatus,
    deadline: Option<DateTime<Utc>>,
}

/// Status + TTL registry backing [`RunnableGate`].
#[derive(Default)]
pub struct RunControl {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh run and returns its generated id.
    pub fn start_run(&self, ttl: Option<Duration>) -> String {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.register(&run_id, ttl);
        run_id
    }

    pub fn register(&self, run_id: &str, ttl: Option<Duration>) {
        let entry = RunEntry {
            status: RunStatus::Running,
            deadline: ttl.map(|ttl| Utc::now() + ttl),
        };
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.to_string(), entry);
    }

    pub fn status(&self, run_id: &str) -> Result<RunStatus, StateError> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .map(|entry| entry.status)
            .ok_or_else(|| StateError::RunNotFound(run_id.to_string()))
    }

    pub fn pause(&self, run_id: &str) -> Result<(), StateError> {
        self.set_status(run_id, RunStatus::Paused)
    }

    pub fn resume(&self, run_id: &str) -> Result<(), StateError> {
        self.set_status(run_id, RunStatus::Running)
    }

    pub fn cancel(&self, run_id: &str) -> Result<(), StateError> {
        self.set_status(run_id, RunStatus::Canceled)
    }

    fn set_status(&self, run_id: &str, status: RunStatus) -> Result<(), StateError> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| StateError::RunNotFound(run_id.to_string()))?;
        tracing::info!(run_id = %run_id, from = %entry.status, to = %status, "run.status");
        entry.status = status;
        Ok(())
    }
}

impl RunnableGate for RunControl {
    fn is_runnable(&self, run_id: &str) -> bool {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = runs.get(run_id) else {
            tracing::debug!(run_id = %run_id, "run not registered; treating as not runnable");
            return false;
        };
        entry.status == RunStatus::Running && entry.deadline.is_none_or(|deadline| Utc::now() < deadline)
    }
}
