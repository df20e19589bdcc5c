use crate::types::StateId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime events — the durable audit trail for scheduling and flow-node
/// execution. Failed work stays visible here (and in the failed-job table)
/// until explicitly resolved.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum RuntimeEvent {
    StateChanged {
        instance_id: Uuid,
        from: StateId,
        to: StateId,
    },
    JobScheduled {
        descriptor_id: Uuid,
        job_name: String,
    },
    JobFired {
        descriptor_id: Uuid,
    },
    JobFailed {
        descriptor_id: Uuid,
        retry_number: u32,
    },
    FailedJobReplayed {
        descriptor_id: Uuid,
        success: bool,
    },
    TriggerUnscheduled {
        descriptor_id: Uuid,
    },
    ConnectorsReset {
        instance_id: Uuid,
    },
    RetryRequested {
        instance_id: Uuid,
        restored_state_id: StateId,
    },
}
