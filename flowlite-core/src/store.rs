use crate::events::RuntimeEvent;
use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence trait for all engine state.
///
/// The executor, retrier and scheduler operate exclusively through this
/// trait, enabling pluggable backends (MemoryStore here, a relational store
/// in production). The engine defines query intents, never SQL.
#[async_trait]
pub trait EngineStore: Send + Sync {
    // ── Flow node instances ──

    async fn save_flow_node(&self, instance: &FlowNodeInstance) -> Result<()>;
    async fn load_flow_node(&self, id: Uuid) -> Result<Option<FlowNodeInstance>>;

    /// Persist a state transition: `new_state` becomes current,
    /// `previous_state` is recorded as the state held before it.
    async fn set_flow_node_state(
        &self,
        id: Uuid,
        new_state: StateId,
        previous_state: StateId,
    ) -> Result<()>;

    async fn delete_flow_node(&self, id: Uuid) -> Result<()>;

    // ── Job descriptors + parameters + trigger ──

    async fn save_job(
        &self,
        descriptor: &JobDescriptor,
        parameters: &JobParameters,
        trigger: &Trigger,
    ) -> Result<()>;
    async fn load_job(&self, id: Uuid)
        -> Result<Option<(JobDescriptor, JobParameters, Trigger)>>;
    async fn delete_job(&self, id: Uuid) -> Result<()>;
    async fn list_job_names(&self) -> Result<Vec<String>>;

    // ── Failed jobs ──

    async fn upsert_failed_job(&self, failed: &FailedJob) -> Result<()>;
    async fn load_failed_job(&self, descriptor_id: Uuid) -> Result<Option<FailedJob>>;
    async fn delete_failed_job(&self, descriptor_id: Uuid) -> Result<()>;
    async fn list_failed_jobs(
        &self,
        start_index: usize,
        max_results: usize,
    ) -> Result<Vec<FailedJob>>;

    // ── Event log (append-only) ──

    /// Append an event and return its sequence number.
    async fn append_event(&self, event: &RuntimeEvent) -> Result<u64>;
    async fn read_events(&self, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>>;
}

/// Opaque handle for one open transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxnHandle(pub u64);

/// Transaction boundary collaborator.
///
/// Each scheduler firing, replay and retry call runs inside one transaction;
/// the boundary guarantees all-or-nothing visibility of state changes and
/// serializes concurrent mutation of a single instance. The engine itself
/// holds no per-instance lock.
#[async_trait]
pub trait TransactionService: Send + Sync {
    async fn begin(&self) -> Result<TxnHandle>;
    async fn commit(&self, txn: TxnHandle) -> Result<()>;
    async fn rollback(&self, txn: TxnHandle) -> Result<()>;
}
