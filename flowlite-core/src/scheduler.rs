use crate::errors::{EngineError, Result};
use crate::events::RuntimeEvent;
use crate::store::{EngineStore, TransactionService};
use crate::types::*;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A job implementation, resolved by handler identifier at fire time.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, parameters: &JobParameters) -> anyhow::Result<()>;
}

/// Handler-identifier → implementation lookup.
#[derive(Default)]
pub struct JobRegistry {
    handlers: Mutex<HashMap<String, Arc<dyn JobHandler>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn JobHandler>) {
        let mut handlers = self.handlers.lock().unwrap();
        handlers.insert(handler.name().to_string(), handler);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.lock().unwrap().get(name).cloned()
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Granularity of the recurring-trigger worker loop.
    pub tick: std::time::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: std::time::Duration::from_millis(25),
        }
    }
}

/// Completion signal for one descriptor's firings. `count` only ever
/// increases; waiters poll it across `notify` wakeups.
#[derive(Default)]
struct FireSignal {
    count: AtomicU32,
    notify: Notify,
}

/// Generic, named, persisted scheduling of asynchronous work units.
///
/// `schedule` and `replay_failed_job` are enqueue operations from the
/// caller's perspective; the work itself executes on tokio workers. Each
/// firing and each replay runs inside one transaction. A job execution
/// that throws is recorded as a [`FailedJob`] — never silently dropped —
/// and stays queryable until a replay succeeds.
pub struct SchedulerService {
    store: Arc<dyn EngineStore>,
    registry: Arc<JobRegistry>,
    txn: Arc<dyn TransactionService>,
    config: SchedulerConfig,
    /// Workers for triggers that have not finished firing.
    active: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    signals: Mutex<HashMap<Uuid, Arc<FireSignal>>>,
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn EngineStore>,
        registry: Arc<JobRegistry>,
        txn: Arc<dyn TransactionService>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            txn,
            config,
            active: Mutex::new(HashMap::new()),
            signals: Mutex::new(HashMap::new()),
        }
    }

    /// Persist and activate a descriptor + trigger pair. Non-blocking: the
    /// firing happens on a worker task.
    pub async fn schedule(
        self: &Arc<Self>,
        descriptor: JobDescriptor,
        parameters: JobParameters,
        trigger: Trigger,
    ) -> Result<()> {
        self.store
            .save_job(&descriptor, &parameters, &trigger)
            .await
            .map_err(|e| EngineError::Scheduler(format!("unable to persist job: {e}")))?;
        self.store
            .append_event(&RuntimeEvent::JobScheduled {
                descriptor_id: descriptor.id,
                job_name: descriptor.job_name.clone(),
            })
            .await
            .map_err(|e| EngineError::Scheduler(format!("unable to record schedule: {e}")))?;
        tracing::info!(job = %descriptor.job_name, descriptor = %descriptor.id, "job scheduled");

        let descriptor_id = descriptor.id;
        let service = Arc::clone(self);
        let handle = match trigger {
            Trigger::OneShot { fire_at } => tokio::spawn(async move {
                let delay = (fire_at - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(delay).await;
                service.fire_job(descriptor_id, true).await;
                service.active.lock().unwrap().remove(&descriptor_id);
            }),
            Trigger::Recurring { every } => {
                let every = chrono::Duration::from_std(every).map_err(|e| {
                    EngineError::Scheduler(format!("invalid recurrence interval: {e}"))
                })?;
                tokio::spawn(async move {
                    let mut next_fire = Utc::now() + every;
                    loop {
                        tokio::time::sleep(service.config.tick).await;
                        if Utc::now() >= next_fire {
                            service.fire_job(descriptor_id, false).await;
                            next_fire += every;
                        }
                    }
                })
            }
        };
        self.active.lock().unwrap().insert(descriptor_id, handle);
        Ok(())
    }

    /// Names of the jobs currently registered with the scheduler.
    pub async fn get_jobs(&self) -> Result<Vec<String>> {
        Ok(self.store.list_job_names().await?)
    }

    pub async fn get_failed_jobs(
        &self,
        start_index: usize,
        max_results: usize,
    ) -> Result<Vec<FailedJob>> {
        Ok(self.store.list_failed_jobs(start_index, max_results).await?)
    }

    /// Remove a trigger that has not fired yet. Returns `false` when there
    /// is nothing left to cancel — a dispatched one-shot is not cancellable.
    pub async fn unschedule(&self, job_descriptor_id: Uuid) -> Result<bool> {
        let handle = self.active.lock().unwrap().remove(&job_descriptor_id);
        match handle {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                self.store.delete_job(job_descriptor_id).await?;
                self.store
                    .append_event(&RuntimeEvent::TriggerUnscheduled {
                        descriptor_id: job_descriptor_id,
                    })
                    .await?;
                tracing::info!(descriptor = %job_descriptor_id, "trigger unscheduled");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Re-invoke a failed job's implementation with `parameter_overrides`
    /// merged over the stored parameters. Success removes the FailedJob
    /// record (and the descriptor, for one-shots); failure increments
    /// `retry_number` and refreshes `last_update_date`.
    ///
    /// The returned future completes when the replay has run — it is the
    /// synchronization point callers should await instead of polling.
    pub async fn replay_failed_job(
        &self,
        job_descriptor_id: Uuid,
        parameter_overrides: JobParameters,
    ) -> Result<()> {
        let txn = self.txn.begin().await?;
        let outcome = self.replay_in_txn(job_descriptor_id, parameter_overrides).await;
        match &outcome {
            // A handler failure still commits: the refreshed FailedJob
            // record must remain visible.
            Ok(()) | Err(EngineError::Execution(_)) => self.txn.commit(txn).await?,
            Err(_) => self.txn.rollback(txn).await?,
        }
        outcome
    }

    async fn replay_in_txn(
        &self,
        job_descriptor_id: Uuid,
        parameter_overrides: JobParameters,
    ) -> Result<()> {
        let (descriptor, parameters, trigger) = self
            .store
            .load_job(job_descriptor_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_descriptor_id))?;

        let merged = merge_parameters(&parameters, &parameter_overrides);
        let run = match self.registry.resolve(&descriptor.job_handler) {
            Some(handler) => handler.execute(&merged).await,
            None => Err(anyhow!(
                "no handler registered for '{}'",
                descriptor.job_handler
            )),
        };

        match run {
            Ok(()) => {
                self.store.delete_failed_job(job_descriptor_id).await?;
                self.store
                    .append_event(&RuntimeEvent::FailedJobReplayed {
                        descriptor_id: job_descriptor_id,
                        success: true,
                    })
                    .await?;
                if trigger.is_one_shot() {
                    self.store.delete_job(job_descriptor_id).await?;
                }
                tracing::info!(job = %descriptor.job_name, "failed job replayed successfully");
                Ok(())
            }
            Err(e) => {
                let retry_number = self.record_failed_job(&descriptor, true).await?;
                self.store
                    .append_event(&RuntimeEvent::FailedJobReplayed {
                        descriptor_id: job_descriptor_id,
                        success: false,
                    })
                    .await?;
                tracing::warn!(
                    job = %descriptor.job_name,
                    retry_number,
                    error = %e,
                    "failed job replay failed again"
                );
                Err(EngineError::Execution(format!(
                    "replay of job '{}' failed: {e}",
                    descriptor.job_name
                )))
            }
        }
    }

    /// Wait until the descriptor's trigger has fired at least `n` times
    /// (counting failed firings). Completion handle for tests and callers
    /// that need to observe asynchronous work without sleep-polling.
    pub async fn await_fires(&self, job_descriptor_id: Uuid, n: u32) {
        let signal = self.signal(job_descriptor_id);
        loop {
            let notified = signal.notify.notified();
            if signal.count.load(Ordering::Acquire) >= n {
                return;
            }
            notified.await;
        }
    }

    /// Abort all pending trigger workers.
    pub fn shutdown(&self) {
        let mut active = self.active.lock().unwrap();
        for (_, handle) in active.drain() {
            handle.abort();
        }
    }

    fn signal(&self, descriptor_id: Uuid) -> Arc<FireSignal> {
        let mut signals = self.signals.lock().unwrap();
        signals.entry(descriptor_id).or_default().clone()
    }

    async fn fire_job(&self, descriptor_id: Uuid, one_shot: bool) {
        if let Err(e) = self.fire_job_in_txn(descriptor_id, one_shot).await {
            tracing::warn!(
                descriptor = %descriptor_id,
                error = %e,
                "job firing could not be recorded"
            );
        }
        let signal = self.signal(descriptor_id);
        signal.count.fetch_add(1, Ordering::Release);
        signal.notify.notify_waiters();
    }

    async fn fire_job_in_txn(&self, descriptor_id: Uuid, one_shot: bool) -> Result<()> {
        let txn = self.txn.begin().await?;
        let Some((descriptor, parameters, _)) = self.store.load_job(descriptor_id).await? else {
            // Unscheduled between trigger and firing.
            self.txn.rollback(txn).await?;
            return Ok(());
        };

        let run = match self.registry.resolve(&descriptor.job_handler) {
            Some(handler) => handler.execute(&parameters).await,
            None => Err(anyhow!(
                "no handler registered for '{}'",
                descriptor.job_handler
            )),
        };

        match run {
            Ok(()) => {
                self.store
                    .append_event(&RuntimeEvent::JobFired {
                        descriptor_id: descriptor.id,
                    })
                    .await?;
                if one_shot {
                    self.store.delete_job(descriptor.id).await?;
                }
                tracing::info!(job = %descriptor.job_name, "job fired");
            }
            Err(e) => {
                tracing::warn!(job = %descriptor.job_name, error = %e, "job execution failed");
                // A failed one-shot keeps its descriptor: replay needs it.
                self.record_failed_job(&descriptor, false).await?;
            }
        }
        self.txn.commit(txn).await?;
        Ok(())
    }

    /// Create or refresh the FailedJob record. `bump` increments
    /// `retry_number` (replay path); a repeated fire failure only refreshes
    /// `last_update_date`. The date is kept strictly increasing.
    async fn record_failed_job(&self, descriptor: &JobDescriptor, bump: bool) -> Result<u32> {
        let existing = self.store.load_failed_job(descriptor.id).await?;
        let retry_number = match (&existing, bump) {
            (None, _) => 0,
            (Some(prev), true) => prev.retry_number + 1,
            (Some(prev), false) => prev.retry_number,
        };
        let mut now = Utc::now();
        if let Some(prev) = &existing {
            if now <= prev.last_update_date {
                now = prev.last_update_date + chrono::Duration::microseconds(1);
            }
        }
        let failed = FailedJob {
            job_descriptor_id: descriptor.id,
            job_name: descriptor.job_name.clone(),
            description: descriptor.description.clone(),
            retry_number,
            last_update_date: now,
        };
        self.store.upsert_failed_job(&failed).await?;
        self.store
            .append_event(&RuntimeEvent::JobFailed {
                descriptor_id: descriptor.id,
                retry_number,
            })
            .await?;
        Ok(retry_number)
    }
}
