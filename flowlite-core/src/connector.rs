use crate::types::FlowNodeInstance;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Per-connector execution progress for one flow-node instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorActivationState {
    ToBeExecuted,
    Executed,
    Failed,
}

/// Pluggable business logic attached to a flow node's entry/exit events.
/// Invoked by the Executing state during dispatch.
#[async_trait]
pub trait ConnectorExecutor: Send + Sync {
    async fn execute_connectors_of(&self, instance: &FlowNodeInstance) -> Result<()>;
}

/// Clears partially-executed connector state for one instance. Idempotent:
/// safe to call when no connectors ran, or twice in a row.
#[async_trait]
pub trait ConnectorResetStrategy: Send + Sync {
    async fn reset_connectors_of(&self, flow_node_instance_id: Uuid) -> Result<()>;
}

#[derive(Default)]
struct ConnectorTable {
    /// instance id → ordered (connector name, activation state).
    activations: BTreeMap<Uuid, Vec<(String, ConnectorActivationState)>>,
    /// Instances whose next execution should fail (scripted failures).
    fail_on_execute: BTreeMap<Uuid, bool>,
    reset_counts: BTreeMap<Uuid, u32>,
}

/// In-memory connector service backing both seams. Tests attach connectors,
/// script failures, and observe reset ordering through it.
#[derive(Default)]
pub struct MemoryConnectorService {
    table: Mutex<ConnectorTable>,
}

impl MemoryConnectorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a named connector to an instance, in the ToBeExecuted state.
    pub fn attach(&self, instance_id: Uuid, name: impl Into<String>) {
        let mut table = self.table.lock().unwrap();
        table
            .activations
            .entry(instance_id)
            .or_default()
            .push((name.into(), ConnectorActivationState::ToBeExecuted));
    }

    /// Script the next `execute_connectors_of` call for this instance to
    /// fail (the flag clears once consumed).
    pub fn fail_next_execution(&self, instance_id: Uuid) {
        let mut table = self.table.lock().unwrap();
        table.fail_on_execute.insert(instance_id, true);
    }

    pub fn activation_states(&self, instance_id: Uuid) -> Vec<ConnectorActivationState> {
        let table = self.table.lock().unwrap();
        table
            .activations
            .get(&instance_id)
            .map(|connectors| connectors.iter().map(|(_, state)| *state).collect())
            .unwrap_or_default()
    }

    pub fn reset_count(&self, instance_id: Uuid) -> u32 {
        let table = self.table.lock().unwrap();
        table.reset_counts.get(&instance_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ConnectorExecutor for MemoryConnectorService {
    async fn execute_connectors_of(&self, instance: &FlowNodeInstance) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        if table.fail_on_execute.remove(&instance.id).unwrap_or(false) {
            if let Some(connectors) = table.activations.get_mut(&instance.id) {
                if let Some(first_pending) = connectors
                    .iter_mut()
                    .find(|(_, state)| *state == ConnectorActivationState::ToBeExecuted)
                {
                    first_pending.1 = ConnectorActivationState::Failed;
                }
            }
            bail!(
                "connector execution failed for flow node instance {}",
                instance.id
            );
        }
        if let Some(connectors) = table.activations.get_mut(&instance.id) {
            for (_, state) in connectors.iter_mut() {
                *state = ConnectorActivationState::Executed;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectorResetStrategy for MemoryConnectorService {
    async fn reset_connectors_of(&self, flow_node_instance_id: Uuid) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        *table.reset_counts.entry(flow_node_instance_id).or_insert(0) += 1;
        if let Some(connectors) = table.activations.get_mut(&flow_node_instance_id) {
            for (_, state) in connectors.iter_mut() {
                *state = ConnectorActivationState::ToBeExecuted;
            }
        }
        Ok(())
    }
}
