use crate::connector::ConnectorExecutor;
use crate::errors::{EngineError, Result};
use crate::types::*;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Collaborators a state may touch while executing. Passed explicitly into
/// every call — no ambient/thread-local context.
pub struct ExecutionContext {
    pub connectors: Arc<dyn ConnectorExecutor>,
}

/// Result of executing one state hop on a flow-node instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Cascade to the next state within the same dispatch.
    Transition(StateId),
    /// Wait for an external stimulus (timer, connector completion).
    Parked,
    /// Terminal state reached — nothing further to drive.
    Done,
}

/// One state in the flow-node lifecycle.
///
/// States are immutable, stateless singletons addressed by small integer
/// ids; all per-instance data lives on [`FlowNodeInstance`].
#[async_trait]
pub trait FlowNodeState: Send + Sync {
    fn id(&self) -> StateId;
    fn name(&self) -> &'static str;

    /// Terminal states have no outgoing transition.
    fn is_terminal(&self) -> bool;

    /// True only for the Failed state — the marker the retrier checks
    /// before attempting recovery.
    fn is_failure(&self) -> bool {
        false
    }

    /// Execution hook invoked by the executor while this state is current.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        instance: &FlowNodeInstance,
    ) -> Result<ExecOutcome>;
}

impl std::fmt::Debug for dyn FlowNodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowNodeState")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

// ─── State singletons ─────────────────────────────────────────

struct Initializing;

#[async_trait]
impl FlowNodeState for Initializing {
    fn id(&self) -> StateId {
        INITIALIZING_STATE_ID
    }
    fn name(&self) -> &'static str {
        "initializing"
    }
    fn is_terminal(&self) -> bool {
        false
    }
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _instance: &FlowNodeInstance,
    ) -> Result<ExecOutcome> {
        Ok(ExecOutcome::Transition(READY_STATE_ID))
    }
}

struct Ready;

#[async_trait]
impl FlowNodeState for Ready {
    fn id(&self) -> StateId {
        READY_STATE_ID
    }
    fn name(&self) -> &'static str {
        "ready"
    }
    fn is_terminal(&self) -> bool {
        false
    }
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _instance: &FlowNodeInstance,
    ) -> Result<ExecOutcome> {
        Ok(ExecOutcome::Transition(EXECUTING_STATE_ID))
    }
}

struct Executing;

#[async_trait]
impl FlowNodeState for Executing {
    fn id(&self) -> StateId {
        EXECUTING_STATE_ID
    }
    fn name(&self) -> &'static str {
        "executing"
    }
    fn is_terminal(&self) -> bool {
        false
    }
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        instance: &FlowNodeInstance,
    ) -> Result<ExecOutcome> {
        ctx.connectors
            .execute_connectors_of(instance)
            .await
            .map_err(|e| EngineError::Execution(e.to_string()))?;
        Ok(ExecOutcome::Transition(COMPLETED_STATE_ID))
    }
}

struct Completed;

#[async_trait]
impl FlowNodeState for Completed {
    fn id(&self) -> StateId {
        COMPLETED_STATE_ID
    }
    fn name(&self) -> &'static str {
        "completed"
    }
    fn is_terminal(&self) -> bool {
        true
    }
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _instance: &FlowNodeInstance,
    ) -> Result<ExecOutcome> {
        Ok(ExecOutcome::Done)
    }
}

struct Aborted;

#[async_trait]
impl FlowNodeState for Aborted {
    fn id(&self) -> StateId {
        ABORTED_STATE_ID
    }
    fn name(&self) -> &'static str {
        "aborted"
    }
    fn is_terminal(&self) -> bool {
        true
    }
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _instance: &FlowNodeInstance,
    ) -> Result<ExecOutcome> {
        Ok(ExecOutcome::Done)
    }
}

struct Cancelled;

#[async_trait]
impl FlowNodeState for Cancelled {
    fn id(&self) -> StateId {
        CANCELLED_STATE_ID
    }
    fn name(&self) -> &'static str {
        "cancelled"
    }
    fn is_terminal(&self) -> bool {
        true
    }
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _instance: &FlowNodeInstance,
    ) -> Result<ExecOutcome> {
        Ok(ExecOutcome::Done)
    }
}

struct Failed;

#[async_trait]
impl FlowNodeState for Failed {
    fn id(&self) -> StateId {
        FAILED_STATE_ID
    }
    fn name(&self) -> &'static str {
        "failed"
    }
    /// Not terminal in the transition sense: the retrier may move the
    /// instance back out of Failed.
    fn is_terminal(&self) -> bool {
        false
    }
    fn is_failure(&self) -> bool {
        true
    }
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _instance: &FlowNodeInstance,
    ) -> Result<ExecOutcome> {
        // A failed instance is parked until an operator retries it.
        Ok(ExecOutcome::Parked)
    }
}

// ─── Registry ─────────────────────────────────────────────────

/// Lookup table of state singletons keyed by state id.
pub struct StateRegistry {
    states: BTreeMap<StateId, Arc<dyn FlowNodeState>>,
}

impl Default for StateRegistry {
    fn default() -> Self {
        let singletons: Vec<Arc<dyn FlowNodeState>> = vec![
            Arc::new(Initializing),
            Arc::new(Ready),
            Arc::new(Executing),
            Arc::new(Completed),
            Arc::new(Aborted),
            Arc::new(Cancelled),
            Arc::new(Failed),
        ];
        let states = singletons.into_iter().map(|s| (s.id(), s)).collect();
        Self { states }
    }
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_state(&self, state_id: StateId) -> Result<Arc<dyn FlowNodeState>> {
        self.states
            .get(&state_id)
            .cloned()
            .ok_or(EngineError::StateNotFound(state_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MemoryConnectorService;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            connectors: Arc::new(MemoryConnectorService::new()),
        }
    }

    #[test]
    fn registry_resolves_all_lifecycle_states() {
        let registry = StateRegistry::new();
        for id in [
            INITIALIZING_STATE_ID,
            READY_STATE_ID,
            EXECUTING_STATE_ID,
            COMPLETED_STATE_ID,
            ABORTED_STATE_ID,
            CANCELLED_STATE_ID,
            FAILED_STATE_ID,
        ] {
            let state = registry.get_state(id).unwrap();
            assert_eq!(state.id(), id);
        }
    }

    #[test]
    fn unknown_state_id_is_rejected() {
        let registry = StateRegistry::new();
        let err = registry.get_state(9999).unwrap_err();
        assert!(matches!(err, EngineError::StateNotFound(9999)));
    }

    #[test]
    fn terminal_and_failure_flags() {
        let registry = StateRegistry::new();
        assert!(registry.get_state(COMPLETED_STATE_ID).unwrap().is_terminal());
        assert!(registry.get_state(ABORTED_STATE_ID).unwrap().is_terminal());
        assert!(registry.get_state(CANCELLED_STATE_ID).unwrap().is_terminal());

        let failed = registry.get_state(FAILED_STATE_ID).unwrap();
        assert!(failed.is_failure());
        assert!(!failed.is_terminal());

        let ready = registry.get_state(READY_STATE_ID).unwrap();
        assert!(!ready.is_terminal());
        assert!(!ready.is_failure());
    }

    #[tokio::test]
    async fn normal_path_cascades_toward_completed() {
        let registry = StateRegistry::new();
        let instance = FlowNodeInstance::new("step", Uuid::now_v7());
        let ctx = ctx();

        let hop = |state_id: StateId| registry.get_state(state_id).unwrap();

        assert_eq!(
            hop(INITIALIZING_STATE_ID).execute(&ctx, &instance).await.unwrap(),
            ExecOutcome::Transition(READY_STATE_ID)
        );
        assert_eq!(
            hop(READY_STATE_ID).execute(&ctx, &instance).await.unwrap(),
            ExecOutcome::Transition(EXECUTING_STATE_ID)
        );
        assert_eq!(
            hop(EXECUTING_STATE_ID).execute(&ctx, &instance).await.unwrap(),
            ExecOutcome::Transition(COMPLETED_STATE_ID)
        );
        assert_eq!(
            hop(COMPLETED_STATE_ID).execute(&ctx, &instance).await.unwrap(),
            ExecOutcome::Done
        );
    }

    #[tokio::test]
    async fn executing_surfaces_connector_failure() {
        let registry = StateRegistry::new();
        let connectors = Arc::new(MemoryConnectorService::new());
        let instance = FlowNodeInstance::new("step", Uuid::now_v7());
        connectors.attach(instance.id, "on-enter");
        connectors.fail_next_execution(instance.id);

        let ctx = ExecutionContext {
            connectors: connectors.clone(),
        };
        let err = registry
            .get_state(EXECUTING_STATE_ID)
            .unwrap()
            .execute(&ctx, &instance)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));
    }
}
