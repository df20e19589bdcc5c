use crate::connector::ConnectorResetStrategy;
use crate::errors::{EngineError, Result};
use crate::events::RuntimeEvent;
use crate::executor::{ContainerRegistry, FlowNodeExecutor};
use crate::states::StateRegistry;
use crate::store::{EngineStore, TransactionService};
use std::sync::Arc;
use uuid::Uuid;

/// Recovery protocol for a flow-node instance currently in the Failed
/// state: reset its connectors, restore the pre-failure state, and resubmit
/// it for execution unless that state is terminal.
///
/// The whole call runs inside one transaction. Callers must not race two
/// retries on the same instance — serialization is the transaction layer's
/// responsibility, not this component's.
pub struct FlowNodeRetrier {
    store: Arc<dyn EngineStore>,
    states: Arc<StateRegistry>,
    executor: Arc<FlowNodeExecutor>,
    container_registry: Arc<ContainerRegistry>,
    connector_reset: Arc<dyn ConnectorResetStrategy>,
    txn: Arc<dyn TransactionService>,
}

impl FlowNodeRetrier {
    pub fn new(
        store: Arc<dyn EngineStore>,
        states: Arc<StateRegistry>,
        executor: Arc<FlowNodeExecutor>,
        container_registry: Arc<ContainerRegistry>,
        connector_reset: Arc<dyn ConnectorResetStrategy>,
        txn: Arc<dyn TransactionService>,
    ) -> Self {
        Self {
            store,
            states,
            executor,
            container_registry,
            connector_reset,
            txn,
        }
    }

    /// Retry a failed flow-node instance.
    ///
    /// Fails with `FlowNodeNotFound` if the instance is absent, `Execution`
    /// if the lookup itself errors, and `Precondition` (no state mutation)
    /// if the instance is not in the Failed state.
    pub async fn retry(&self, flow_node_instance_id: Uuid) -> Result<()> {
        let txn = self.txn.begin().await?;
        let outcome = self.retry_in_txn(flow_node_instance_id).await;
        match &outcome {
            Ok(()) => self.txn.commit(txn).await?,
            Err(_) => self.txn.rollback(txn).await?,
        }
        outcome
    }

    async fn retry_in_txn(&self, flow_node_instance_id: Uuid) -> Result<()> {
        let instance = match self.store.load_flow_node(flow_node_instance_id).await {
            Ok(Some(instance)) => instance,
            Ok(None) => return Err(EngineError::FlowNodeNotFound(flow_node_instance_id)),
            Err(e) => {
                return Err(EngineError::Execution(format!(
                    "unable to load flow node instance {flow_node_instance_id}: {e}"
                )))
            }
        };

        let current_state = self.states.get_state(instance.state_id)?;
        if !current_state.is_failure() {
            return Err(EngineError::Precondition(format!(
                "Unable to retry the flow node instance [name={}, id={}] because it is not \
                 in failed state. The current state for this flow node instance is '{}'",
                instance.name,
                instance.id,
                current_state.name()
            )));
        }

        self.connector_reset
            .reset_connectors_of(flow_node_instance_id)
            .await
            .map_err(|e| {
                EngineError::Execution(format!(
                    "unable to reset connectors of flow node instance {flow_node_instance_id}: {e}"
                ))
            })?;
        self.store
            .append_event(&RuntimeEvent::ConnectorsReset {
                instance_id: flow_node_instance_id,
            })
            .await?;

        let previous_state = self.states.get_state(instance.previous_state_id)?;

        // Restore the pre-failure state unconditionally. When that state is
        // terminal the instance stays parked there with no further dispatch
        // — the failure happened after the useful work completed.
        self.executor
            .set_state_by_state_id(flow_node_instance_id, instance.previous_state_id)
            .await?;
        self.store
            .append_event(&RuntimeEvent::RetryRequested {
                instance_id: flow_node_instance_id,
                restored_state_id: instance.previous_state_id,
            })
            .await?;
        tracing::info!(
            instance = %flow_node_instance_id,
            restored_state = instance.previous_state_id,
            "flow node instance restored to pre-failure state"
        );

        if !previous_state.is_terminal() {
            let restored = self
                .store
                .load_flow_node(flow_node_instance_id)
                .await?
                .ok_or(EngineError::FlowNodeNotFound(flow_node_instance_id))?;
            self.container_registry.execute_flow_node(&restored).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MemoryConnectorService;
    use crate::store_memory::{MemoryStore, NoopTransactionService};
    use crate::types::*;
    use std::sync::Arc;

    struct Fixture {
        store: Arc<MemoryStore>,
        connectors: Arc<MemoryConnectorService>,
        txn: Arc<NoopTransactionService>,
        retrier: FlowNodeRetrier,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let states = Arc::new(StateRegistry::new());
        let connectors = Arc::new(MemoryConnectorService::new());
        let txn = Arc::new(NoopTransactionService::new());
        let executor = Arc::new(FlowNodeExecutor::new(
            store.clone(),
            states.clone(),
            connectors.clone(),
        ));
        let container_registry = Arc::new(ContainerRegistry::new(executor.clone()));
        let retrier = FlowNodeRetrier::new(
            store.clone(),
            states,
            executor,
            container_registry,
            connectors.clone(),
            txn.clone(),
        );
        Fixture {
            store,
            connectors,
            txn,
            retrier,
        }
    }

    async fn failed_instance(f: &Fixture, previous: StateId) -> FlowNodeInstance {
        let mut instance = FlowNodeInstance::new("deliverParcel", Uuid::now_v7());
        instance.state_id = FAILED_STATE_ID;
        instance.previous_state_id = previous;
        f.store.save_flow_node(&instance).await.unwrap();
        instance
    }

    #[tokio::test]
    async fn retry_of_non_failed_instance_is_rejected_without_mutation() {
        let f = fixture();
        let mut instance = FlowNodeInstance::new("deliverParcel", Uuid::now_v7());
        instance.state_id = EXECUTING_STATE_ID;
        instance.previous_state_id = READY_STATE_ID;
        f.store.save_flow_node(&instance).await.unwrap();

        let err = f.retrier.retry(instance.id).await.unwrap_err();
        let message = err.to_string();
        assert_eq!(
            message,
            format!(
                "Unable to retry the flow node instance [name=deliverParcel, id={}] because \
                 it is not in failed state. The current state for this flow node instance \
                 is 'executing'",
                instance.id
            )
        );
        assert!(matches!(err, EngineError::Precondition(_)));

        let loaded = f.store.load_flow_node(instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.state_id, EXECUTING_STATE_ID);
        assert_eq!(loaded.previous_state_id, READY_STATE_ID);
        assert_eq!(f.connectors.reset_count(instance.id), 0);
        assert_eq!(f.txn.rollbacks(), 1);
    }

    #[tokio::test]
    async fn retry_of_missing_instance_reports_not_found() {
        let f = fixture();
        let missing = Uuid::now_v7();
        let err = f.retrier.retry(missing).await.unwrap_err();
        assert!(matches!(err, EngineError::FlowNodeNotFound(id) if id == missing));
    }

    /// Scenario: stateId = 29 (failed), previousStateId = 30 (initializing)
    /// → state restored to 30 and the instance re-dispatched once.
    #[tokio::test]
    async fn retry_restores_initializing_and_redispatches() {
        let f = fixture();
        let instance = failed_instance(&f, INITIALIZING_STATE_ID).await;
        f.connectors.attach(instance.id, "on-finish");

        f.retrier.retry(instance.id).await.unwrap();

        // Re-dispatch ran the full cascade from Initializing.
        let loaded = f.store.load_flow_node(instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.state_id, COMPLETED_STATE_ID);
        assert_eq!(f.connectors.reset_count(instance.id), 1);
        assert_eq!(f.txn.commits(), 1);

        // The restore itself went through 30 before the cascade.
        let events = f.store.read_events(0).await.unwrap();
        let restored = events.iter().any(|(_, event)| {
            matches!(
                event,
                RuntimeEvent::StateChanged { from, to, .. }
                    if *from == FAILED_STATE_ID && *to == INITIALIZING_STATE_ID
            )
        });
        assert!(restored);
    }

    /// Scenario: previousStateId maps to a terminal state → state is still
    /// restored but executeFlowNode is never invoked.
    #[tokio::test]
    async fn retry_with_terminal_previous_state_parks_without_dispatch() {
        let f = fixture();
        let instance = failed_instance(&f, COMPLETED_STATE_ID).await;

        f.retrier.retry(instance.id).await.unwrap();

        let loaded = f.store.load_flow_node(instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.state_id, COMPLETED_STATE_ID);
        assert_eq!(f.connectors.reset_count(instance.id), 1);

        // Exactly one state change: the restore. No dispatch followed.
        let events = f.store.read_events(0).await.unwrap();
        let state_changes: Vec<_> = events
            .iter()
            .filter(|(_, event)| matches!(event, RuntimeEvent::StateChanged { .. }))
            .collect();
        assert_eq!(state_changes.len(), 1);
    }

    #[tokio::test]
    async fn connector_reset_happens_before_state_restore() {
        let f = fixture();
        let instance = failed_instance(&f, COMPLETED_STATE_ID).await;

        f.retrier.retry(instance.id).await.unwrap();

        let events = f.store.read_events(0).await.unwrap();
        let reset_seq = events
            .iter()
            .find(|(_, event)| matches!(event, RuntimeEvent::ConnectorsReset { .. }))
            .map(|(seq, _)| *seq)
            .unwrap();
        let restore_seq = events
            .iter()
            .find(|(_, event)| matches!(event, RuntimeEvent::StateChanged { .. }))
            .map(|(seq, _)| *seq)
            .unwrap();
        assert!(reset_seq < restore_seq);
    }

    #[tokio::test]
    async fn retry_with_unknown_previous_state_fails_before_restore() {
        let f = fixture();
        let instance = failed_instance(&f, 888).await;

        let err = f.retrier.retry(instance.id).await.unwrap_err();
        assert!(matches!(err, EngineError::StateNotFound(888)));

        // Connectors were already reset (step 3 precedes state resolution
        // failure at step 4); the state itself is untouched.
        let loaded = f.store.load_flow_node(instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.state_id, FAILED_STATE_ID);
        assert_eq!(f.txn.rollbacks(), 1);
    }
}
