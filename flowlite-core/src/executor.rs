use crate::connector::ConnectorExecutor;
use crate::errors::{EngineError, Result};
use crate::events::RuntimeEvent;
use crate::states::{ExecOutcome, ExecutionContext, StateRegistry};
use crate::store::EngineStore;
use crate::types::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Upper bound on cascading transitions within one dispatch. The lifecycle
/// graph is a short chain; hitting this means a state cycle.
const MAX_CASCADE_HOPS: usize = 16;

/// Drives a flow-node instance through state transitions, invoking
/// connectors and updating persisted state through [`EngineStore`].
pub struct FlowNodeExecutor {
    store: Arc<dyn EngineStore>,
    states: Arc<StateRegistry>,
    ctx: ExecutionContext,
}

impl FlowNodeExecutor {
    pub fn new(
        store: Arc<dyn EngineStore>,
        states: Arc<StateRegistry>,
        connectors: Arc<dyn ConnectorExecutor>,
    ) -> Self {
        Self {
            store,
            states,
            ctx: ExecutionContext { connectors },
        }
    }

    /// Persist `state_id` as the instance's current state, preserving the
    /// prior current state as `previous_state_id`.
    ///
    /// Two cases keep the previous-state invariant intact:
    /// - transitioning INTO Failed records the (non-failed) current state;
    /// - transitioning OUT of Failed (a retry restore) keeps the stored
    ///   previous state rather than recording Failed itself.
    pub async fn set_state_by_state_id(
        &self,
        flow_node_instance_id: Uuid,
        state_id: StateId,
    ) -> Result<()> {
        self.states.get_state(state_id)?;

        let instance = self
            .store
            .load_flow_node(flow_node_instance_id)
            .await?
            .ok_or(EngineError::FlowNodeNotFound(flow_node_instance_id))?;

        let previous = if instance.state_id == FAILED_STATE_ID {
            instance.previous_state_id
        } else {
            instance.state_id
        };

        self.store
            .set_flow_node_state(flow_node_instance_id, state_id, previous)
            .await?;
        self.store
            .append_event(&RuntimeEvent::StateChanged {
                instance_id: flow_node_instance_id,
                from: instance.state_id,
                to: state_id,
            })
            .await?;
        tracing::debug!(
            instance = %flow_node_instance_id,
            from = instance.state_id,
            to = state_id,
            "flow node state changed"
        );
        Ok(())
    }

    /// Invoke the behavior of the instance's current state and follow the
    /// cascade (e.g. Ready → Executing → Completed within one dispatch),
    /// persisting each hop.
    ///
    /// Errors propagate to the caller, which decides whether to move the
    /// instance to Failed.
    pub async fn execute_flow_node(&self, instance: &FlowNodeInstance) -> Result<()> {
        let mut current_id = instance.state_id;
        let mut snapshot = instance.clone();

        for _ in 0..MAX_CASCADE_HOPS {
            let state = self.states.get_state(current_id)?;
            match state.execute(&self.ctx, &snapshot).await? {
                ExecOutcome::Transition(next_id) => {
                    self.set_state_by_state_id(instance.id, next_id).await?;
                    snapshot = self
                        .store
                        .load_flow_node(instance.id)
                        .await?
                        .ok_or(EngineError::FlowNodeNotFound(instance.id))?;
                    current_id = next_id;
                }
                ExecOutcome::Parked | ExecOutcome::Done => return Ok(()),
            }
        }
        Err(EngineError::Execution(format!(
            "flow node instance {} exceeded {MAX_CASCADE_HOPS} cascading transitions",
            instance.id
        )))
    }

    /// Move the instance to Failed. Used by scheduler-side callers after an
    /// unrecoverable [`execute_flow_node`] error; the pre-failure state is
    /// retained as `previous_state_id` for later retry.
    pub async fn set_failed(&self, flow_node_instance_id: Uuid) -> Result<()> {
        self.set_state_by_state_id(flow_node_instance_id, FAILED_STATE_ID)
            .await
    }
}

/// Registers flow-node instances for execution dispatch and hands them to
/// the executor. The retrier resubmits recovered instances through here.
pub struct ContainerRegistry {
    executor: Arc<FlowNodeExecutor>,
    registered: Mutex<BTreeSet<Uuid>>,
}

impl ContainerRegistry {
    pub fn new(executor: Arc<FlowNodeExecutor>) -> Self {
        Self {
            executor,
            registered: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn register(&self, flow_node_instance_id: Uuid) {
        self.registered.lock().unwrap().insert(flow_node_instance_id);
    }

    pub fn is_registered(&self, flow_node_instance_id: Uuid) -> bool {
        self.registered.lock().unwrap().contains(&flow_node_instance_id)
    }

    /// Register the instance and dispatch it. Registration is cleared once
    /// the dispatch returns, successful or not.
    pub async fn execute_flow_node(&self, instance: &FlowNodeInstance) -> Result<()> {
        self.register(instance.id);
        let outcome = self.executor.execute_flow_node(instance).await;
        self.registered.lock().unwrap().remove(&instance.id);
        outcome
    }
}
