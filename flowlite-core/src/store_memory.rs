use crate::events::RuntimeEvent;
use crate::store::{EngineStore, TransactionService, TxnHandle};
use crate::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    flow_nodes: BTreeMap<Uuid, FlowNodeInstance>,
    jobs: BTreeMap<Uuid, (JobDescriptor, JobParameters, Trigger)>,
    failed_jobs: BTreeMap<Uuid, FailedJob>,
    events: Vec<(u64, RuntimeEvent)>,
    next_seq: u64,
}

/// In-memory reference backend. Single mutex over all tables — good enough
/// for tests and embedded use; production plugs a relational backend into
/// [`EngineStore`] instead.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn save_flow_node(&self, instance: &FlowNodeInstance) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.flow_nodes.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn load_flow_node(&self, id: Uuid) -> Result<Option<FlowNodeInstance>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.flow_nodes.get(&id).cloned())
    }

    async fn set_flow_node_state(
        &self,
        id: Uuid,
        new_state: StateId,
        previous_state: StateId,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let instance = inner
            .flow_nodes
            .get_mut(&id)
            .ok_or_else(|| anyhow!("flow node {id} not in store"))?;
        instance.state_id = new_state;
        instance.previous_state_id = previous_state;
        Ok(())
    }

    async fn delete_flow_node(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.flow_nodes.remove(&id);
        Ok(())
    }

    async fn save_job(
        &self,
        descriptor: &JobDescriptor,
        parameters: &JobParameters,
        trigger: &Trigger,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(
            descriptor.id,
            (descriptor.clone(), parameters.clone(), trigger.clone()),
        );
        Ok(())
    }

    async fn load_job(
        &self,
        id: Uuid,
    ) -> Result<Option<(JobDescriptor, JobParameters, Trigger)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.jobs.get(&id).cloned())
    }

    async fn delete_job(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.remove(&id);
        Ok(())
    }

    async fn list_job_names(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .map(|(descriptor, _, _)| descriptor.job_name.clone())
            .collect())
    }

    async fn upsert_failed_job(&self, failed: &FailedJob) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .failed_jobs
            .insert(failed.job_descriptor_id, failed.clone());
        Ok(())
    }

    async fn load_failed_job(&self, descriptor_id: Uuid) -> Result<Option<FailedJob>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.failed_jobs.get(&descriptor_id).cloned())
    }

    async fn delete_failed_job(&self, descriptor_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.failed_jobs.remove(&descriptor_id);
        Ok(())
    }

    async fn list_failed_jobs(
        &self,
        start_index: usize,
        max_results: usize,
    ) -> Result<Vec<FailedJob>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .failed_jobs
            .values()
            .skip(start_index)
            .take(max_results)
            .cloned()
            .collect())
    }

    async fn append_event(&self, event: &RuntimeEvent) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.events.push((seq, event.clone()));
        Ok(seq)
    }

    async fn read_events(&self, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|(seq, _)| *seq >= from_seq)
            .cloned()
            .collect())
    }
}

/// No-op transaction boundary for the memory backend. Counts begins,
/// commits and rollbacks so tests can assert the wrapping contract.
#[derive(Default)]
pub struct NoopTransactionService {
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl NoopTransactionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begins(&self) -> u64 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionService for NoopTransactionService {
    async fn begin(&self) -> Result<TxnHandle> {
        let id = self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(TxnHandle(id))
    }

    async fn commit(&self, _txn: TxnHandle) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _txn: TxnHandle) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn failed(name: &str) -> FailedJob {
        FailedJob {
            job_descriptor_id: Uuid::now_v7(),
            job_name: name.to_string(),
            description: String::new(),
            retry_number: 0,
            last_update_date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn flow_node_round_trip_and_state_update() {
        let store = MemoryStore::new();
        let instance = FlowNodeInstance::new("step1", Uuid::now_v7());
        store.save_flow_node(&instance).await.unwrap();

        store
            .set_flow_node_state(instance.id, READY_STATE_ID, INITIALIZING_STATE_ID)
            .await
            .unwrap();

        let loaded = store.load_flow_node(instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.state_id, READY_STATE_ID);
        assert_eq!(loaded.previous_state_id, INITIALIZING_STATE_ID);
    }

    #[tokio::test]
    async fn set_state_on_missing_instance_errors() {
        let store = MemoryStore::new();
        let err = store
            .set_flow_node_state(Uuid::now_v7(), READY_STATE_ID, INITIALIZING_STATE_ID)
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn failed_job_pagination() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.upsert_failed_job(&failed(&format!("job-{i}"))).await.unwrap();
        }

        let all = store.list_failed_jobs(0, 100).await.unwrap();
        assert_eq!(all.len(), 5);

        let page = store.list_failed_jobs(2, 2).await.unwrap();
        assert_eq!(page.len(), 2);

        let tail = store.list_failed_jobs(4, 100).await.unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[tokio::test]
    async fn event_log_sequences_monotonically() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        let first = store
            .append_event(&RuntimeEvent::JobFired { descriptor_id: id })
            .await
            .unwrap();
        let second = store
            .append_event(&RuntimeEvent::ConnectorsReset { instance_id: id })
            .await
            .unwrap();
        assert!(second > first);

        let events = store.read_events(second).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].1,
            RuntimeEvent::ConnectorsReset { instance_id: id }
        );
    }

    #[tokio::test]
    async fn txn_counters() {
        let txn = NoopTransactionService::new();
        let handle = txn.begin().await.unwrap();
        txn.commit(handle).await.unwrap();
        assert_eq!(txn.begins(), 1);
        assert_eq!(txn.commits(), 1);
        assert_eq!(txn.rollbacks(), 0);
    }
}
