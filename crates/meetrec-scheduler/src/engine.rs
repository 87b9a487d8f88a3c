//! Scheduler Engine: the main loop that pops due triggers and runs their jobs.
//! Uses tokio::interval for ticking; jobs run on a Semaphore-bounded worker pool
//! so a slow start/stop sequence never blocks delivery for other tasks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::store::TriggerStore;
use crate::triggers::{Trigger, TriggerRole};

/// A trigger that fired, as handed to the job handler.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredJob {
    pub trigger_id: String,
    pub role: TriggerRole,
    pub task_id: i64,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub fired_at: DateTime<Utc>,
}

impl FiredJob {
    fn from_trigger(trigger: &Trigger, now: DateTime<Utc>) -> Self {
        Self {
            trigger_id: trigger.id.clone(),
            role: trigger.role,
            task_id: trigger.task_id,
            scheduled_for: trigger.next_fire,
            fired_at: now,
        }
    }
}

/// Executes fired jobs. Implementations own their error handling;
/// the engine only contains panics.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: FiredJob);

    /// A trigger was removed by another process and will not fire again.
    fn trigger_dropped(&self, _trigger: &Trigger) {}
}

/// The scheduler engine: polls the trigger store and dispatches jobs.
pub struct SchedulerEngine {
    store: Arc<dyn TriggerStore>,
    handler: Arc<dyn JobHandler>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    /// Recurring triggers with a run still executing.
    in_flight: Arc<Mutex<HashSet<String>>>,
    tick_interval: std::time::Duration,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        handler: Arc<dyn JobHandler>,
        workers: usize,
        tick_interval: std::time::Duration,
    ) -> Self {
        let worker_count = workers.max(1);
        Self {
            store,
            handler,
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tick_interval,
        }
    }

    pub fn store(&self) -> &Arc<dyn TriggerStore> {
        &self.store
    }

    /// Pop everything due at `now` and spawn a job for each.
    /// Returns the spawned handles; callers normally ignore them.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        match self.store.sync() {
            Ok(dropped) => {
                for trigger in &dropped {
                    self.handler.trigger_dropped(trigger);
                }
            }
            Err(e) => tracing::warn!("⚠️ Trigger store sync failed: {e}"),
        }
        let due = self.store.take_due(now);
        let mut handles = Vec::with_capacity(due.len());

        for trigger in due {
            let coalesce = trigger.is_recurring();
            if coalesce && !self.claim(&trigger.id) {
                tracing::debug!("⏭️ Skipping '{}': previous run still executing", trigger.id);
                continue;
            }

            let job = FiredJob::from_trigger(&trigger, now);
            tracing::debug!("🔔 Trigger fired: '{}'", job.trigger_id);

            let workers = self.workers.clone();
            let handler = self.handler.clone();
            let in_flight = self.in_flight.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                let id = job.trigger_id.clone();
                let result = tokio::spawn(async move { handler.handle(job).await }).await;
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!("💥 Job '{id}' panicked; scheduler keeps running");
                    } else {
                        tracing::warn!("⚠️ Job '{id}' was cancelled");
                    }
                }
                if coalesce {
                    if let Ok(mut set) = in_flight.lock() {
                        set.remove(&id);
                    }
                }
            }));
        }

        handles
    }

    fn claim(&self, id: &str) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(id.to_string()),
            Err(_) => true,
        }
    }

    /// Run until `shutdown` flips to true (or its sender drops).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Scheduler started (tick every {}ms, {} workers, {} pending triggers)",
            self.tick_interval.as_millis(),
            self.worker_count,
            self.store.list().len()
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("🛑 Scheduler stopped");
    }
}
