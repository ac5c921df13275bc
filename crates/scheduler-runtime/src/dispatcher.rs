//! Action dispatcher — the consumed "do the thing" contract of
//! `spec.md` §6. The core never implements ARM_SYSTEM/DISARM_SYSTEM
//! itself; it calls into whatever the host wires up here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scheduler_domain::ActionParams;

/// What the executor hands the dispatcher for one attempt.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub action_params: ActionParams,
    pub execution_time: DateTime<Utc>,
    pub ignore_overdue: bool,
}

#[derive(Clone, Debug)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: Option<String>,
}

/// Typed error taxonomy an action dispatcher reports, per the REDESIGN
/// FLAG in `spec.md` §9 ("prefer a typed error taxonomy... mapping
/// explicitly to {retryable, non-retryable, timeout}").
#[derive(thiserror::Error, Debug, Clone)]
pub enum ActionError {
    #[error("retryable: {0}")]
    Retryable(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("non-retryable: {0}")]
    NonRetryable(String),
}

#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn execute(&self, task_id: &str, request: ExecutionRequest) -> Result<ActionOutcome, ActionError>;
}

/// Fallback adapter for dispatchers that can only report a bare message
/// (e.g. a host wrapping an `anyhow::Error`). The substring rule mirrors
/// `spec.md` §4.5/§7's non-retryable detection (`not found`, `invalid`,
/// `unauthorized`) — the typed path above is primary; this exists only
/// at the boundary, per the same REDESIGN FLAG.
pub fn classify_by_message(message: &str) -> ActionError {
    let lower = message.to_lowercase();
    if lower.contains("not found") || lower.contains("invalid") || lower.contains("unauthorized") {
        ActionError::NonRetryable(message.to_string())
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ActionError::Timeout(message.to_string())
    } else {
        ActionError::Retryable(message.to_string())
    }
}

/// Reference dispatcher used by tests and by the bootstrap's default
/// wiring when no host dispatcher is supplied: always succeeds.
pub struct NoopActionDispatcher;

#[async_trait]
impl ActionDispatcher for NoopActionDispatcher {
    async fn execute(&self, _task_id: &str, _request: ExecutionRequest) -> Result<ActionOutcome, ActionError> {
        Ok(ActionOutcome { success: true, detail: None })
    }
}
