use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for the planner.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; collaborator traits (models, tools,
/// stores) continue to use `anyhow::Result` for ad-hoc context chains.
///
/// Only run-level failures surface here. Structural problems with a plan or a
/// patch are recovered locally as reason strings and never become errors.
#[derive(Debug, Error)]
pub enum PlannerError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Run state ───────────────────────────────────────────────────────
    #[error("state: {0}")]
    State(#[from] StateError),

    // ── Plan documents ──────────────────────────────────────────────────
    #[error("plan: {0}")]
    Plan(#[from] PlanError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Run state errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StateError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("store operation {operation} failed: {message}")]
    Store { operation: String, message: String },
}

impl StateError {
    pub fn store(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Store {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

// ─── Plan document errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no JSON object found in model output")]
    NoJsonObject,

    #[error("malformed plan JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ─── Convenience alias ──────────────────────────────────────────────────────

pub type Result<T> = std::result::Result<T, PlannerError>;
