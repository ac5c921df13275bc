/// Shared error type used across the scheduler-core crates.
///
/// One variant per error kind enumerated in the scheduling spec: a bad
/// construction is `Validation`, an illegal lifecycle transition is
/// `StateRule`, and so on. Callers match on these to decide whether to
/// retry, surface, or swallow-and-log.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("state rule violation: {0}")]
    StateRule(String),

    #[error("repository: {0}")]
    Repository(String),

    #[error("action: {0}")]
    Action(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("non-retryable: {0}")]
    NonRetryable(String),

    #[error("executor not ready: {0}")]
    ExecutorNotReady(String),

    #[error("engine not ready: {0}")]
    EngineNotReady(String),

    #[error("config: {0}")]
    Config(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
