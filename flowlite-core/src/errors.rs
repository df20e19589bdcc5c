use crate::types::StateId;
use thiserror::Error;
use uuid::Uuid;

/// Closed error taxonomy for the engine.
///
/// Low-level persistence/connector failures are wrapped into these variants
/// at each layer boundary so callers see a stable vocabulary regardless of
/// the storage backend.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unknown state id in a registry lookup.
    #[error("state {0} is not registered")]
    StateNotFound(StateId),

    /// Flow-node instance absent from the store.
    #[error("flow node instance {0} not found")]
    FlowNodeNotFound(Uuid),

    /// Job descriptor absent from the store.
    #[error("job descriptor {0} not found")]
    JobNotFound(Uuid),

    /// Rejected synchronously before any state mutation (e.g. retrying an
    /// instance that is not in the Failed state).
    #[error("{0}")]
    Precondition(String),

    /// Connector/business-logic failure during dispatch or job execution.
    #[error("execution failure: {0}")]
    Execution(String),

    /// Scheduling/persistence failure in `schedule` — fatal to the call.
    #[error("scheduler failure: {0}")]
    Scheduler(String),

    /// Low-level store failure surfaced at a boundary that has no more
    /// specific mapping.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
