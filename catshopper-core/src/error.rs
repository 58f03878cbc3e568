//! Error types for catshopper-core

use thiserror::Error;

use crate::types::Stage;

/// Main error type for the catshopper-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Local store error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Backend unreachable or health check failed
    #[error("backend not connected: {0}")]
    Connection(String),

    /// Input rejected before any request was sent
    #[error("validation error: {0}")]
    Validation(String),

    /// Transport failure, non-2xx status or malformed response
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Stage invoked before its prerequisite completed
    #[error("episode {episode}: cannot run {stage} before {missing} is done")]
    DependencyNotMet {
        episode: usize,
        stage: Stage,
        missing: Stage,
    },

    /// Duplicate invocation of a running stage; `None` is the full pipeline
    #[error("episode {episode}: {} is already in progress", running_task(.stage))]
    AlreadyInProgress {
        episode: usize,
        stage: Option<Stage>,
    },

    /// Backend job reached the failed state
    #[error("job {job_id} failed")]
    JobFailed { job_id: String },

    /// Job did not reach a terminal state within the poll budget
    #[error("job {job_id} did not finish within {secs}s")]
    JobTimeout { job_id: String, secs: u64 },

    /// Polling was stopped by the owner
    #[error("job {0} was cancelled")]
    JobCancelled(String),

    /// Episode index outside the plan
    #[error("episode {0} not found in content plan")]
    EpisodeNotFound(usize),

    /// Content plan not found in the local store
    #[error("content plan not found: {0}")]
    PlanNotFound(String),

    /// Local persistence failed (quota, serialization)
    #[error("persistence error: {0}")]
    Persistence(String),
}

fn running_task(stage: &Option<Stage>) -> String {
    match stage {
        Some(stage) => stage.to_string(),
        None => "full pipeline".to_string(),
    }
}

/// Result type alias for catshopper-core
pub type Result<T> = std::result::Result<T, Error>;
