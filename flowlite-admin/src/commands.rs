use flowlite_core::{
    EngineError, FailedJob, FlowNodeRetrier, JobDescriptor, JobParameters, Result,
    SchedulerService, Trigger,
};
use std::sync::Arc;
use uuid::Uuid;

/// Services the administrative commands operate against.
pub struct AdminContext {
    pub scheduler: Arc<SchedulerService>,
    pub retrier: Arc<FlowNodeRetrier>,
}

/// Schedule a new job: persists the descriptor + parameter bag and
/// activates its trigger. Returns the descriptor id for later
/// introspection/replay.
pub struct AddJobCommand {
    pub descriptor: JobDescriptor,
    pub parameters: JobParameters,
    pub trigger: Trigger,
}

impl AddJobCommand {
    pub async fn execute(self, ctx: &AdminContext) -> Result<Uuid> {
        let descriptor_id = self.descriptor.id;
        ctx.scheduler
            .schedule(self.descriptor, self.parameters, self.trigger)
            .await?;
        Ok(descriptor_id)
    }
}

/// Page through the failed-job records awaiting operator attention.
pub struct GetFailedJobsCommand {
    pub start_index: usize,
    pub max_results: usize,
}

impl GetFailedJobsCommand {
    pub async fn execute(self, ctx: &AdminContext) -> Result<Vec<FailedJob>> {
        if self.max_results == 0 {
            return Err(EngineError::Precondition(
                "maxResults must be greater than 0".to_string(),
            ));
        }
        ctx.scheduler
            .get_failed_jobs(self.start_index, self.max_results)
            .await
    }
}

/// Replay a failed job with parameter overrides merged over its stored
/// parameter bag.
pub struct ReplayFailedJobCommand {
    pub job_descriptor_id: Uuid,
    pub parameter_overrides: JobParameters,
}

impl ReplayFailedJobCommand {
    pub async fn execute(self, ctx: &AdminContext) -> Result<()> {
        tracing::info!(descriptor = %self.job_descriptor_id, "replaying failed job");
        ctx.scheduler
            .replay_failed_job(self.job_descriptor_id, self.parameter_overrides)
            .await
    }
}

/// Retry a flow-node instance that is parked in the Failed state.
pub struct RetryFlowNodeCommand {
    pub flow_node_instance_id: Uuid,
}

impl RetryFlowNodeCommand {
    pub async fn execute(self, ctx: &AdminContext) -> Result<()> {
        tracing::info!(instance = %self.flow_node_instance_id, "retrying flow node instance");
        ctx.retrier.retry(self.flow_node_instance_id).await
    }
}
