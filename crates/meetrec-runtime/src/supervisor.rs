//! Recording supervisor: the start and end actions fired for each task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use meetrec_core::types::{Meeting, Task, TaskStatus};
use meetrec_recorder::action::{self, ActionResult};
use meetrec_scheduler::{Trigger, TriggerRole, trigger_id};
use serde::Serialize;

use crate::context::RuntimeContext;

/// Result of a start trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StartOutcome {
    Started,
    /// Task was not UPCOMING; nothing done.
    Skipped(TaskStatus),
    /// Fired after the window closed; task failed.
    Missed,
    /// A critical step failed; task failed.
    Failed(String),
    NotFound,
}

/// Result of an end trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EndOutcome {
    Completed { save_path: Option<String> },
    /// Torn down, but the task had already reached this final status.
    AlreadyFinal(TaskStatus),
    /// Teardown failed; task failed.
    Failed(String),
    NotFound,
}

#[derive(Default)]
struct Teardown {
    save_path: Option<String>,
    capture_error: Option<String>,
    cleanup_errors: Vec<String>,
}

/// Launch, connect, select the platform scene and (in prod) start capture.
/// Every step is critical.
pub(crate) async fn recorder_start_sequence(ctx: &RuntimeContext, meeting: &Meeting) -> ActionResult<()> {
    let recorder = &ctx.recorder;
    let cfg = &ctx.config.recorder;

    action::run("Launch recorder", true, recorder.launch()).await?;
    action::run(
        "Connect to recorder",
        true,
        recorder.connect(cfg.connect_retries, Duration::from_secs(cfg.connect_timeout_secs)),
    )
    .await?;
    let scene = &ctx.config.platform(meeting.platform).scene_name;
    action::run("Select recording scene", true, recorder.setup_scene(scene)).await?;

    if cfg.environment.captures() {
        action::run("Start capture", true, recorder.start_capture()).await?;
    } else {
        tracing::info!("🧪 {:?} environment, capture not started", cfg.environment);
    }
    Ok(())
}

pub struct RecordingSupervisor {
    ctx: RuntimeContext,
}

impl RecordingSupervisor {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    pub async fn start_recording(&self, task_id: i64) -> StartOutcome {
        self.start_recording_at(task_id, Utc::now()).await
    }

    pub async fn start_recording_at(&self, task_id: i64, now: DateTime<Utc>) -> StartOutcome {
        let (task, meeting) = match self.ctx.db.get_task_with_meeting(task_id) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("❌ Cannot start task {task_id}: {e}");
                self.ctx
                    .alerts
                    .send_alert(task_id, &format!("Task {task_id} could not start"), &e.to_string(), true)
                    .await;
                return if e.is_not_found() {
                    StartOutcome::NotFound
                } else {
                    StartOutcome::Failed(e.to_string())
                };
            }
        };

        if task.status != TaskStatus::Upcoming {
            tracing::info!("⏭️ Task {task_id} is {}, start ignored", task.status);
            return StartOutcome::Skipped(task.status);
        }

        if now >= task.end_time {
            let detail = format!(
                "Start fired at {} but the window ended at {}.",
                now.to_rfc3339(),
                task.end_time.to_rfc3339()
            );
            tracing::warn!("⏰ Task {task_id} missed its window");
            self.fail_task(&task, &meeting, "Missed recording window", &detail, now)
                .await;
            return StartOutcome::Missed;
        }

        tracing::info!("🎬 Starting task {task_id} for '{}'", meeting.name);
        if let Err(failure) = recorder_start_sequence(&self.ctx, &meeting).await {
            self.fail_task(&task, &meeting, "Recording failed to start", &failure.to_string(), now)
                .await;
            return StartOutcome::Failed(failure.to_string());
        }

        // capture is live: mark it before the join can degrade
        match self.ctx.db.transition_status(task_id, TaskStatus::Recording, now) {
            Ok(true) => {}
            Ok(false) => {
                let status = self
                    .ctx
                    .db
                    .get_task(task_id)
                    .map(|t| t.status)
                    .unwrap_or(TaskStatus::Failed);
                tracing::warn!("⚠️ Task {task_id} became {status} while starting, stopping capture");
                self.abandon_start(&task, &meeting, status, now).await;
                return StartOutcome::Skipped(status);
            }
            Err(e) => {
                tracing::error!("❌ Could not mark task {task_id} recording: {e}");
                return if e.is_not_found() {
                    StartOutcome::NotFound
                } else {
                    StartOutcome::Failed(e.to_string())
                };
            }
        }

        let platform = self.ctx.config.platform(meeting.platform);
        let joiner = self.ctx.joiners.for_platform(meeting.platform);
        let critical = !platform.fallback_capture;
        if let Err(failure) = action::run("Join meeting", critical, joiner.join_and_apply_layout(&meeting)).await {
            if failure.critical {
                self.fail_task(&task, &meeting, "Could not join meeting", &failure.to_string(), now)
                    .await;
                return StartOutcome::Failed(failure.to_string());
            }
            self.ctx
                .alerts
                .send_alert_at(
                    task_id,
                    &format!("Meeting join degraded: {}", meeting.name),
                    &format!("{failure}. Recording continues with fallback capture."),
                    false,
                    now,
                )
                .await;
        }

        self.register_monitor(&task, &meeting, now).await;
        tracing::info!("⏺️ Task {task_id} recording until {}", task.end_time.to_rfc3339());
        StartOutcome::Started
    }

    /// The task went final while the recorder was coming up (an end trigger
    /// overlapped the start). Nothing else will stop this capture.
    async fn abandon_start(&self, task: &Task, meeting: &Meeting, status: TaskStatus, now: DateTime<Utc>) {
        let teardown = self.teardown(meeting).await;
        let mut detail = format!(
            "Task {} became {status} before recording began; the recorder was started late and has been stopped.",
            task.id
        );
        if let Some(path) = &teardown.save_path {
            detail.push_str(&format!(" Partial capture saved to {path}."));
        }
        if let Some(err) = &teardown.capture_error {
            detail.push_str(&format!(" Stopping capture failed: {err}."));
        }
        if !teardown.cleanup_errors.is_empty() {
            detail.push_str(&format!(" Cleanup failed: {}.", teardown.cleanup_errors.join("; ")));
        }
        self.ctx
            .alerts
            .send_alert_at(task.id, &format!("Late start rolled back: {}", meeting.name), &detail, true, now)
            .await;
    }

    async fn register_monitor(&self, task: &Task, meeting: &Meeting, now: DateTime<Utc>) {
        let every = self.ctx.config.scheduler.monitor_interval_secs.max(1);
        let trigger = Trigger::every(
            task.id,
            TriggerRole::Monitor,
            &format!("Monitor: {}", meeting.name),
            every,
            now,
        );
        if let Err(e) = self.ctx.triggers.add(trigger) {
            tracing::error!("❌ Monitor for task {} not registered: {e}", task.id);
            self.ctx
                .alerts
                .send_alert_at(
                    task.id,
                    &format!("Task unmonitored: {}", meeting.name),
                    &format!("Crash monitoring could not be enabled: {e}"),
                    false,
                    now,
                )
                .await;
        }
    }

    fn deregister_monitor(&self, task_id: i64) {
        let id = trigger_id(task_id, TriggerRole::Monitor);
        match self.ctx.triggers.remove(&id) {
            Ok(_) => tracing::debug!("Monitor '{id}' removed"),
            Err(e) => tracing::warn!("⚠️ Could not remove trigger '{id}': {e}"),
        }
        self.ctx.states.evict(task_id);
    }

    async fn fail_task(&self, task: &Task, meeting: &Meeting, title: &str, detail: &str, now: DateTime<Utc>) {
        match self.ctx.db.transition_status(task.id, TaskStatus::Failed, now) {
            Ok(true) => tracing::error!("❌ Task {} failed: {title}", task.id),
            Ok(false) => tracing::debug!("Task {} already final", task.id),
            Err(e) => tracing::error!("❌ Could not mark task {} failed: {e}", task.id),
        }
        self.ctx
            .alerts
            .send_alert_at(
                task.id,
                &format!("{title}: {}", meeting.name),
                &format!(
                    "Task {} ({} to {}) has been marked failed. {detail}",
                    task.id,
                    task.start_time.to_rfc3339(),
                    task.end_time.to_rfc3339()
                ),
                true,
                now,
            )
            .await;
    }

    pub async fn end_recording(&self, task_id: i64) -> EndOutcome {
        self.end_recording_at(task_id, Utc::now()).await
    }

    pub async fn end_recording_at(&self, task_id: i64, now: DateTime<Utc>) -> EndOutcome {
        // before anything is stopped, so no tick probes a half torn-down task
        self.deregister_monitor(task_id);

        let (task, meeting) = match self.ctx.db.get_task_with_meeting(task_id) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("❌ Cannot end task {task_id}: {e}");
                self.ctx
                    .alerts
                    .send_alert(task_id, &format!("Task {task_id} could not end"), &e.to_string(), true)
                    .await;
                return if e.is_not_found() {
                    EndOutcome::NotFound
                } else {
                    EndOutcome::Failed(e.to_string())
                };
            }
        };

        tracing::info!("🏁 Ending task {task_id} for '{}'", meeting.name);
        let mut teardown = self.teardown(&meeting).await;
        if let Some(path) = &teardown.save_path {
            if let Err(e) = self.ctx.db.set_save_path(task_id, path, now) {
                teardown.cleanup_errors.push(format!("Saving recording path: {e}"));
            }
        }

        let failure = match (&teardown.capture_error, teardown.cleanup_errors.is_empty()) {
            (Some(err), _) => Some(("Capture stop failed", err.clone())),
            (None, false) => Some((
                "Capture stopped, cleanup failed",
                teardown.cleanup_errors.join("; "),
            )),
            (None, true) => None,
        };

        if let Some((title, detail)) = failure {
            self.fail_task(&task, &meeting, title, &detail, now).await;
            return EndOutcome::Failed(detail);
        }

        match self.ctx.db.transition_status(task_id, TaskStatus::Completed, now) {
            Ok(true) => {
                tracing::info!(
                    "✅ Task {task_id} completed{}",
                    teardown
                        .save_path
                        .as_deref()
                        .map(|p| format!(": {p}"))
                        .unwrap_or_default()
                );
                EndOutcome::Completed {
                    save_path: teardown.save_path,
                }
            }
            Ok(false) => {
                let status = self
                    .ctx
                    .db
                    .get_task(task_id)
                    .map(|t| t.status)
                    .unwrap_or(task.status);
                tracing::info!("Task {task_id} already {status}, status left as is");
                EndOutcome::AlreadyFinal(status)
            }
            Err(e) => {
                tracing::error!("❌ Could not complete task {task_id}: {e}");
                EndOutcome::Failed(e.to_string())
            }
        }
    }

    /// Best-effort: every step runs even if an earlier one failed.
    async fn teardown(&self, meeting: &Meeting) -> Teardown {
        let mut td = Teardown::default();
        let recorder = &self.ctx.recorder;

        match action::run("Stop capture", true, recorder.stop_capture()).await {
            Ok(path) => td.save_path = path,
            Err(failure) => td.capture_error = Some(failure.to_string()),
        }
        recorder.disconnect().await;
        if let Err(failure) = action::run("Close recorder", true, recorder.kill_process()).await {
            td.cleanup_errors.push(failure.to_string());
        }

        let joiner = self.ctx.joiners.for_platform(meeting.platform);
        if let Err(failure) = action::run("Close meeting client", true, joiner.kill_client()).await {
            td.cleanup_errors.push(failure.to_string());
        }
        td
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, harness_with};
    use chrono::Duration as ChronoDuration;
    use meetrec_core::config::Environment;
    use meetrec_scheduler::NotifyPriority;
    use std::sync::atomic::Ordering;

    fn monitor_id(task_id: i64) -> String {
        trigger_id(task_id, TriggerRole::Monitor)
    }

    #[tokio::test]
    async fn test_start_happy_path() {
        let h = harness();
        let task = h.upcoming_task();

        let outcome = h.supervisor().start_recording(task.id).await;
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(h.db_status(task.id), TaskStatus::Recording);
        assert_eq!(
            h.recorder.calls(),
            vec!["launch", "connect", "setup_scene:Zoom_APP", "start_capture"]
        );
        assert_eq!(h.zoom.count("join"), 1);
        assert!(h.ctx.triggers.exists(&monitor_id(task.id)));
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dev_environment_skips_capture() {
        let h = harness_with(|c| c.recorder.environment = Environment::Dev);
        let task = h.upcoming_task();
        assert_eq!(h.supervisor().start_recording(task.id).await, StartOutcome::Started);
        assert_eq!(h.recorder.count("start_capture"), 0);
        assert_eq!(h.db_status(task.id), TaskStatus::Recording);
    }

    #[tokio::test]
    async fn test_recorder_failure_fails_task() {
        let h = harness();
        let task = h.upcoming_task();
        h.recorder.fail_launch.store(true, Ordering::SeqCst);

        let outcome = h.supervisor().start_recording(task.id).await;
        assert!(matches!(outcome, StartOutcome::Failed(ref msg) if msg.contains("Launch recorder")));
        assert_eq!(h.db_status(task.id), TaskStatus::Failed);
        assert_eq!(h.zoom.count("join"), 0);
        assert!(!h.ctx.triggers.exists(&monitor_id(task.id)));

        let sent = h.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].priority, NotifyPriority::Urgent);
    }

    #[tokio::test]
    async fn test_start_ignored_unless_upcoming() {
        let h = harness();
        let task = h.recording_task();
        let outcome = h.supervisor().start_recording(task.id).await;
        assert_eq!(outcome, StartOutcome::Skipped(TaskStatus::Recording));
        assert_eq!(h.recorder.count("launch"), 0);
    }

    #[tokio::test]
    async fn test_late_start_misses_window() {
        let h = harness();
        let task = h.upcoming_task();
        let late = task.end_time + ChronoDuration::minutes(1);

        assert_eq!(h.supervisor().start_recording_at(task.id, late).await, StartOutcome::Missed);
        assert_eq!(h.db_status(task.id), TaskStatus::Failed);
        assert_eq!(h.recorder.count("launch"), 0);
        assert!(h.sink.sent()[0].title.contains("Missed recording window"));
    }

    #[tokio::test]
    async fn test_start_missing_task() {
        let h = harness();
        assert_eq!(h.supervisor().start_recording(404).await, StartOutcome::NotFound);
        assert_eq!(h.sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_end_during_slow_start_stops_capture() {
        let h = harness();
        let task = h.upcoming_task();
        h.recorder.launch_delay_ms.store(300, Ordering::SeqCst);
        let sup = h.supervisor();

        let (start, end) = tokio::join!(sup.start_recording(task.id), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sup.end_recording(task.id).await
        });

        assert_eq!(start, StartOutcome::Skipped(TaskStatus::Completed));
        assert_eq!(end, EndOutcome::Completed { save_path: None });
        assert_eq!(h.db_status(task.id), TaskStatus::Completed);
        assert!(!h.recorder.alive.load(Ordering::SeqCst));
        assert!(!h.recorder.capturing.load(Ordering::SeqCst));
        assert_eq!(h.zoom.count("join"), 0);
        assert!(!h.ctx.triggers.exists(&monitor_id(task.id)));

        let sent = h.sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].title.starts_with("Late start rolled back"));
        assert!(sent[0].body.contains(crate::test_support::FAKE_SAVE_PATH));
    }

    #[tokio::test]
    async fn test_join_failure_is_critical_without_fallback() {
        let h = harness();
        let task = h.upcoming_task();
        h.zoom.fail_join.store(true, Ordering::SeqCst);

        let outcome = h.supervisor().start_recording(task.id).await;
        assert!(matches!(outcome, StartOutcome::Failed(_)));
        assert_eq!(h.db_status(task.id), TaskStatus::Failed);
        assert!(!h.ctx.triggers.exists(&monitor_id(task.id)));
    }

    #[tokio::test]
    async fn test_join_failure_degrades_with_fallback() {
        let h = harness_with(|c| c.platforms.zoom.fallback_capture = true);
        let task = h.upcoming_task();
        h.zoom.fail_join.store(true, Ordering::SeqCst);

        assert_eq!(h.supervisor().start_recording(task.id).await, StartOutcome::Started);
        assert_eq!(h.db_status(task.id), TaskStatus::Recording);
        assert!(h.ctx.triggers.exists(&monitor_id(task.id)));
        let sent = h.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].priority, NotifyPriority::High);
    }

    #[tokio::test]
    async fn test_end_completes_and_cleans_up() {
        let h = harness();
        let task = h.upcoming_task();
        let sup = h.supervisor();
        sup.start_recording(task.id).await;
        h.ctx.states.update(task.id, |s| s.client_restart_attempted = true);

        let outcome = sup.end_recording(task.id).await;
        assert_eq!(
            outcome,
            EndOutcome::Completed {
                save_path: Some("/recordings/meeting.mkv".into())
            }
        );
        let stored = h.ctx.db.get_task(task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.save_path.as_deref(), Some("/recordings/meeting.mkv"));
        assert!(!h.ctx.triggers.exists(&monitor_id(task.id)));
        assert!(h.ctx.states.get(task.id).is_none());
        assert!(!h.recorder.alive.load(Ordering::SeqCst));
        assert!(!h.zoom.alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_end_keeps_failed_status() {
        let h = harness();
        let task = h.recording_task();
        h.ctx
            .db
            .transition_status(task.id, TaskStatus::Failed, Utc::now())
            .unwrap();

        let outcome = h.supervisor().end_recording(task.id).await;
        assert_eq!(outcome, EndOutcome::AlreadyFinal(TaskStatus::Failed));
        assert_eq!(h.db_status(task.id), TaskStatus::Failed);
        // teardown still ran
        assert_eq!(h.recorder.count("stop_capture"), 1);
    }

    #[tokio::test]
    async fn test_end_distinguishes_stop_failure() {
        let h = harness();
        let task = h.recording_task();
        h.recorder.fail_stop.store(true, Ordering::SeqCst);

        assert!(matches!(h.supervisor().end_recording(task.id).await, EndOutcome::Failed(_)));
        assert_eq!(h.db_status(task.id), TaskStatus::Failed);
        let sent = h.sink.sent();
        assert!(sent[0].title.starts_with("Capture stop failed"));
        // later steps still ran
        assert_eq!(h.recorder.count("kill_process"), 1);
        assert_eq!(h.zoom.count("kill_client"), 1);
    }

    #[tokio::test]
    async fn test_end_distinguishes_cleanup_failure() {
        let h = harness();
        let task = h.recording_task();
        h.recorder.fail_kill.store(true, Ordering::SeqCst);

        assert!(matches!(h.supervisor().end_recording(task.id).await, EndOutcome::Failed(_)));
        assert_eq!(h.db_status(task.id), TaskStatus::Failed);
        let stored = h.ctx.db.get_task(task.id).unwrap();
        assert_eq!(stored.save_path.as_deref(), Some("/recordings/meeting.mkv"));
        assert!(h.sink.sent()[0].title.starts_with("Capture stopped, cleanup failed"));
    }

    #[tokio::test]
    async fn test_end_missing_task_still_drops_monitor() {
        let h = harness();
        h.ctx
            .triggers
            .add(Trigger::every(77, TriggerRole::Monitor, "monitor", 30, Utc::now()))
            .unwrap();
        assert_eq!(h.supervisor().end_recording(77).await, EndOutcome::NotFound);
        assert!(!h.ctx.triggers.exists(&monitor_id(77)));
    }
}
