//! Routes fired triggers to the supervisor and the crash monitor.

use std::sync::Arc;

use async_trait::async_trait;
use meetrec_scheduler::{FiredJob, JobHandler, SchedulerEngine, Trigger, TriggerRole};

use crate::context::RuntimeContext;
use crate::monitor::{CrashMonitor, MonitorStates};
use crate::supervisor::RecordingSupervisor;

pub struct JobRouter {
    supervisor: RecordingSupervisor,
    monitor: CrashMonitor,
    states: Arc<MonitorStates>,
}

impl JobRouter {
    pub fn new(ctx: &RuntimeContext) -> Self {
        Self {
            supervisor: ctx.supervisor(),
            monitor: ctx.monitor(),
            states: ctx.states.clone(),
        }
    }
}

#[async_trait]
impl JobHandler for JobRouter {
    async fn handle(&self, job: FiredJob) {
        if let Some(scheduled) = job.scheduled_for {
            let lag = (job.fired_at - scheduled).num_seconds();
            if lag > 60 {
                tracing::warn!("⏰ '{}' fired {lag}s late", job.trigger_id);
            }
        }

        match job.role {
            TriggerRole::Start => {
                let outcome = self.supervisor.start_recording_at(job.task_id, job.fired_at).await;
                tracing::info!("▶️ Start job for task {}: {outcome:?}", job.task_id);
            }
            TriggerRole::End => {
                let outcome = self.supervisor.end_recording_at(job.task_id, job.fired_at).await;
                tracing::info!("⏹️ End job for task {}: {outcome:?}", job.task_id);
            }
            TriggerRole::Monitor => {
                let verdict = self.monitor.tick_at(job.task_id, job.fired_at).await;
                tracing::debug!("💓 Monitor tick for task {}: {verdict:?}", job.task_id);
            }
        }
    }

    fn trigger_dropped(&self, trigger: &Trigger) {
        // no tick will come to evict it
        if trigger.role == TriggerRole::Monitor && self.states.evict(trigger.task_id) {
            tracing::info!("🛑 Monitor for task {} removed elsewhere, state dropped", trigger.task_id);
        }
    }
}

/// Scheduler engine wired to the runtime's trigger store and job router.
pub fn build_engine(ctx: &RuntimeContext) -> Arc<SchedulerEngine> {
    let cfg = &ctx.config.scheduler;
    Arc::new(SchedulerEngine::new(
        ctx.triggers.clone(),
        Arc::new(JobRouter::new(ctx)),
        cfg.workers,
        std::time::Duration::from_millis(cfg.tick_interval_ms.max(10)),
    ))
}
