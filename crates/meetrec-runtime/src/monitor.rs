//! Crash monitor: the recurring health check bound to a RECORDING task.
//!
//! Each failure class (recorder, meeting client) gets exactly one restart
//! attempt per task. A second recorder failure fails the task; a second
//! client failure only alerts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use meetrec_core::types::{Meeting, Task, TaskStatus};
use meetrec_recorder::action::{self, ActionResult};
use meetrec_scheduler::{TriggerRole, trigger_id};
use serde::Serialize;

use crate::context::RuntimeContext;
use crate::supervisor::recorder_start_sequence;

/// Ephemeral recovery bookkeeping for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorState {
    pub recorder_restart_attempted: bool,
    pub client_restart_attempted: bool,
    pub last_alert_time: Option<DateTime<Utc>>,
}

/// Monitor states keyed by task id. Never persisted.
#[derive(Default)]
pub struct MonitorStates {
    inner: Mutex<HashMap<i64, MonitorState>>,
}

impl MonitorStates {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, MonitorState>> {
        // state is plain data; a poisoned lock still holds a usable map
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, task_id: i64) -> Option<MonitorState> {
        self.lock().get(&task_id).cloned()
    }

    /// Mutate a task's state, creating it on first use.
    pub fn update<R>(&self, task_id: i64, f: impl FnOnce(&mut MonitorState) -> R) -> R {
        f(self.lock().entry(task_id).or_default())
    }

    /// Mutate only if the task already has state.
    pub fn update_existing<R>(&self, task_id: i64, f: impl FnOnce(&mut MonitorState) -> R) -> Option<R> {
        self.lock().get_mut(&task_id).map(f)
    }

    pub fn evict(&self, task_id: i64) -> bool {
        self.lock().remove(&task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<(i64, MonitorState)> {
        let mut all: Vec<_> = self.lock().iter().map(|(k, v)| (*k, v.clone())).collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }
}

/// What one monitor tick concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MonitorVerdict {
    /// Task no longer exists; monitor deregistered.
    Gone,
    /// Task left RECORDING; monitor deregistered.
    Finished(TaskStatus),
    /// The monitor trigger was removed while this tick was queued (task ending).
    Deregistered,
    Healthy,
    RecorderRecovered,
    ClientRecovered,
    /// Client is down and will not be retried (again).
    ClientDown,
    /// Recovery exhausted; task failed.
    Escalated,
    /// The task store could not be read; try next tick.
    Unavailable,
}

pub struct CrashMonitor {
    ctx: RuntimeContext,
}

impl CrashMonitor {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    pub async fn tick(&self, task_id: i64) -> MonitorVerdict {
        self.tick_at(task_id, Utc::now()).await
    }

    pub async fn tick_at(&self, task_id: i64, now: DateTime<Utc>) -> MonitorVerdict {
        let (task, meeting) = match self.ctx.db.get_task_with_meeting(task_id) {
            Ok(pair) => pair,
            Err(e) if e.is_not_found() => {
                tracing::info!("🛑 Task {task_id} no longer exists, monitor stopped");
                self.stop(task_id);
                return MonitorVerdict::Gone;
            }
            Err(e) => {
                tracing::warn!("⚠️ Monitor for task {task_id} could not read task: {e}");
                return MonitorVerdict::Unavailable;
            }
        };

        if task.status != TaskStatus::Recording {
            tracing::info!("🛑 Task {task_id} is {}, monitor stopped", task.status);
            self.stop(task_id);
            return MonitorVerdict::Finished(task.status);
        }
        if !self.ctx.triggers.exists(&trigger_id(task_id, TriggerRole::Monitor)) {
            tracing::debug!("Monitor for task {task_id} deregistered, tick dropped");
            self.ctx.states.evict(task_id);
            return MonitorVerdict::Deregistered;
        }
        self.ctx.states.update(task_id, |_| ());

        let recorder = &self.ctx.recorder;
        if !recorder.is_process_alive().await {
            return self
                .handle_recorder_crash(&task, &meeting, "recorder process is not running", now)
                .await;
        }

        if self.ctx.config.recorder.environment.captures() {
            let reason = match recorder.is_capturing().await {
                Ok(true) => None,
                Ok(false) => Some("recording output is not active".to_string()),
                Err(e) => Some(format!("recorder status unavailable: {e}")),
            };
            if let Some(reason) = reason {
                return self.handle_recorder_crash(&task, &meeting, &reason, now).await;
            }
        }

        let joiner = self.ctx.joiners.for_platform(meeting.platform);
        if !joiner.is_client_alive().await {
            return self.handle_client_crash(&task, &meeting, now).await;
        }

        tracing::debug!("💓 Task {task_id} healthy");
        MonitorVerdict::Healthy
    }

    /// Deregister the monitor trigger and drop its state.
    fn stop(&self, task_id: i64) {
        self.ctx.states.evict(task_id);
        let id = trigger_id(task_id, TriggerRole::Monitor);
        if let Err(e) = self.ctx.triggers.remove(&id) {
            tracing::warn!("⚠️ Could not remove trigger '{id}': {e}");
        }
    }

    pub async fn handle_recorder_crash(
        &self,
        task: &Task,
        meeting: &Meeting,
        reason: &str,
        now: DateTime<Utc>,
    ) -> MonitorVerdict {
        let attempted = self.ctx.states.update(task.id, |s| {
            std::mem::replace(&mut s.recorder_restart_attempted, true)
        });

        if attempted {
            tracing::error!("💥 Recorder failed again on task {}: {reason}", task.id);
            self.escalate(task, meeting, "Recorder failed again", reason, now)
                .await;
            return MonitorVerdict::Escalated;
        }

        tracing::warn!("⚠️ Recorder failure on task {}: {reason}, restarting once", task.id);
        match self.restart_recorder(meeting).await {
            Ok(()) => {
                tracing::info!("🔁 Recorder restarted for task {}", task.id);
                MonitorVerdict::RecorderRecovered
            }
            Err(failure) => {
                let detail = format!("{reason}; {failure}");
                self.escalate(task, meeting, "Recorder restart failed", &detail, now)
                    .await;
                MonitorVerdict::Escalated
            }
        }
    }

    async fn restart_recorder(&self, meeting: &Meeting) -> ActionResult<()> {
        let recorder = &self.ctx.recorder;
        let _ = action::run("Stop stale recorder", false, recorder.kill_process()).await;
        recorder_start_sequence(&self.ctx, meeting).await?;

        let platform = self.ctx.config.platform(meeting.platform);
        if let (Some(source), Some(window)) = (&platform.window_source, &platform.window_match) {
            let _ = action::run(
                "Retarget window capture",
                false,
                recorder.retarget_window(source, window),
            )
            .await;
        }
        Ok(())
    }

    async fn escalate(&self, task: &Task, meeting: &Meeting, title: &str, detail: &str, now: DateTime<Utc>) {
        match self.ctx.db.transition_status(task.id, TaskStatus::Failed, now) {
            Ok(true) => tracing::error!("❌ Task {} marked failed", task.id),
            Ok(false) => tracing::debug!("Task {} already final", task.id),
            Err(e) => tracing::error!("❌ Could not mark task {} failed: {e}", task.id),
        }
        self.ctx
            .alerts
            .send_alert_at(
                task.id,
                &format!("{title}: {}", meeting.name),
                &format!("Task {} has been marked failed. {detail}", task.id),
                true,
                now,
            )
            .await;
    }

    pub async fn handle_client_crash(&self, task: &Task, meeting: &Meeting, now: DateTime<Utc>) -> MonitorVerdict {
        let attempted = self.ctx.states.update(task.id, |s| {
            std::mem::replace(&mut s.client_restart_attempted, true)
        });
        let alerts = &self.ctx.alerts;

        if attempted {
            tracing::warn!("⚠️ {} client down again on task {}", meeting.platform, task.id);
            alerts
                .send_alert_at(
                    task.id,
                    &format!("Meeting client down: {}", meeting.name),
                    &format!(
                        "The {} client exited again; recording continues without it.",
                        meeting.platform
                    ),
                    false,
                    now,
                )
                .await;
            return MonitorVerdict::ClientDown;
        }

        let joiner = self.ctx.joiners.for_platform(meeting.platform);
        let _ = action::run("Close meeting client", false, joiner.kill_client()).await;
        let rejoin = action::run("Rejoin meeting", false, joiner.join_and_apply_layout(meeting)).await;

        // one alert per crash, carrying the rejoin outcome
        let (title, body, verdict) = match rejoin {
            Ok(()) => {
                tracing::info!("🔁 Rejoined meeting for task {}", task.id);
                (
                    format!("Meeting client rejoined: {}", meeting.name),
                    format!("The {} client exited and was rejoined.", meeting.platform),
                    MonitorVerdict::ClientRecovered,
                )
            }
            Err(failure) => (
                format!("Meeting rejoin failed: {}", meeting.name),
                format!(
                    "The {} client exited and could not rejoin: {failure}. Recording continues without it.",
                    meeting.platform
                ),
                MonitorVerdict::ClientDown,
            ),
        };
        alerts.send_alert_at(task.id, &title, &body, false, now).await;
        verdict
    }
}
