use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ─── Scalar aliases ───────────────────────────────────────────

/// Small integer id addressing a flow-node state singleton.
pub type StateId = u32;

/// UTC wall-clock timestamp.
pub type Timestamp = DateTime<Utc>;

// ─── State id constants ───────────────────────────────────────

pub const COMPLETED_STATE_ID: StateId = 2;
pub const READY_STATE_ID: StateId = 4;
pub const EXECUTING_STATE_ID: StateId = 9;
pub const ABORTED_STATE_ID: StateId = 11;
pub const CANCELLED_STATE_ID: StateId = 14;
pub const FAILED_STATE_ID: StateId = 29;
pub const INITIALIZING_STATE_ID: StateId = 30;

// ─── Flow node instance ───────────────────────────────────────

/// A runtime occurrence of one activity/gateway/event node within a
/// process instance.
///
/// All mutable execution data lives here; state objects themselves are
/// stateless singletons addressed by `state_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowNodeInstance {
    pub id: Uuid,
    pub name: String,
    /// Current state.
    pub state_id: StateId,
    /// The last non-failed state this instance occupied. Never
    /// `FAILED_STATE_ID` — the executor preserves the pre-failure value
    /// when transitioning into Failed, and the retrier restores it.
    pub previous_state_id: StateId,
    pub parent_process_instance_id: Uuid,
    pub loop_counter: u32,
}

impl FlowNodeInstance {
    /// Create a fresh instance in the Initializing state.
    pub fn new(name: impl Into<String>, parent_process_instance_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            state_id: INITIALIZING_STATE_ID,
            previous_state_id: INITIALIZING_STATE_ID,
            parent_process_instance_id,
            loop_counter: 0,
        }
    }
}

// ─── Job model ────────────────────────────────────────────────

/// Key/value parameter bag supplied to a job handler. Values are arbitrary
/// serializable payloads.
pub type JobParameters = BTreeMap<String, serde_json::Value>;

/// Merge `overrides` over `base`: override keys win, base keys without an
/// override are kept.
pub fn merge_parameters(base: &JobParameters, overrides: &JobParameters) -> JobParameters {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Persisted identity + metadata of a schedulable unit of work.
/// Immutable once scheduled — build one with [`JobDescriptor::builder`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDescriptor {
    pub id: Uuid,
    /// Handler identifier resolved by the scheduler's job registry at
    /// fire time.
    pub job_handler: String,
    /// Human-readable, unique job name.
    pub job_name: String,
    pub description: String,
}

impl JobDescriptor {
    pub fn builder() -> JobDescriptorBuilder {
        JobDescriptorBuilder::default()
    }
}

/// Ergonomic constructor for [`JobDescriptor`]. The built value is
/// immutable; the builder is not shared state.
#[derive(Default)]
pub struct JobDescriptorBuilder {
    job_handler: String,
    job_name: String,
    description: String,
}

impl JobDescriptorBuilder {
    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.job_handler = handler.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn build(self) -> JobDescriptor {
        JobDescriptor {
            id: Uuid::now_v7(),
            job_handler: self.job_handler,
            job_name: self.job_name,
            description: self.description,
        }
    }
}

// ─── Triggers ─────────────────────────────────────────────────

/// When a scheduled job fires.
///
/// A fired one-shot is never fired again; a recurring trigger computes its
/// next fire time after each firing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Trigger {
    OneShot { fire_at: Timestamp },
    Recurring { every: std::time::Duration },
}

impl Trigger {
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Trigger::OneShot { .. })
    }
}

// ─── Failed jobs ──────────────────────────────────────────────

/// Persisted record of a job execution that threw, tracked for
/// operator-driven replay.
///
/// Identity includes `retry_number` and `last_update_date`: two snapshots
/// taken across a failed replay compare unequal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FailedJob {
    pub job_descriptor_id: Uuid,
    pub job_name: String,
    pub description: String,
    /// 0 on the initial failure; strictly increasing across failed
    /// replay attempts.
    pub retry_number: u32,
    pub last_update_date: Timestamp,
}
