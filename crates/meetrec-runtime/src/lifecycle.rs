//! Task lifecycle: creates tasks from a meeting's occurrences and keeps
//! their start/end triggers in step with them.

use chrono::{DateTime, Utc};
use meetrec_core::error::{MeetRecError, Result};
use meetrec_core::types::{Meeting, Task, TaskStatus, TaskView};
use meetrec_db::TaskQuery;
use meetrec_scheduler::{Trigger, TriggerInfo, TriggerRole, expand, trigger_id};

use crate::context::RuntimeContext;

pub struct TaskService {
    ctx: RuntimeContext,
}

impl TaskService {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    /// Persist one UPCOMING task per future occurrence of the meeting.
    pub fn create_tasks_for(&self, meeting: &Meeting, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let windows: Vec<_> = expand(&meeting.schedule(), now)
            .into_iter()
            .map(|o| (o.start, o.end))
            .collect();
        if windows.is_empty() {
            tracing::info!("🗓️ Meeting '{}' has no future occurrences", meeting.name);
            return Ok(Vec::new());
        }

        let tasks = self.ctx.db.insert_tasks(meeting.id, &windows, now)?;
        tracing::info!("🗓️ {} task(s) created for meeting '{}'", tasks.len(), meeting.name);
        Ok(tasks)
    }

    /// Upsert the start and end triggers of a task.
    pub fn schedule(&self, task: &Task, meeting_name: &str) -> Result<()> {
        let failed = |reason: String| MeetRecError::Scheduling {
            task_id: task.id,
            meeting_name: meeting_name.to_string(),
            reason,
        };

        self.ctx
            .triggers
            .add(Trigger::at(
                task.id,
                TriggerRole::Start,
                &format!("Start recording: {meeting_name}"),
                task.start_time,
            ))
            .map_err(failed)?;
        self.ctx
            .triggers
            .add(Trigger::at(
                task.id,
                TriggerRole::End,
                &format!("Stop recording: {meeting_name}"),
                task.end_time,
            ))
            .map_err(failed)?;

        tracing::debug!(
            "📅 Task {} scheduled {} → {}",
            task.id,
            task.start_time.to_rfc3339(),
            task.end_time.to_rfc3339()
        );
        Ok(())
    }

    pub fn schedule_all(&self, tasks: &[Task], meeting_name: &str) -> Result<()> {
        for task in tasks {
            self.schedule(task, meeting_name)?;
        }
        Ok(())
    }

    /// Remove the start and end triggers. Missing triggers are fine.
    pub fn unschedule(&self, task_id: i64) {
        self.remove_trigger(task_id, TriggerRole::Start);
        self.remove_trigger(task_id, TriggerRole::End);
    }

    /// Drop every trigger and all monitor state a task owns.
    pub fn forget(&self, task_id: i64) {
        self.unschedule(task_id);
        self.remove_trigger(task_id, TriggerRole::Monitor);
        self.ctx.states.evict(task_id);
    }

    fn remove_trigger(&self, task_id: i64, role: TriggerRole) {
        let id = trigger_id(task_id, role);
        match self.ctx.triggers.remove(&id) {
            Ok(true) => tracing::debug!("🗑️ Trigger '{id}' removed"),
            Ok(false) => tracing::debug!("Trigger '{id}' not registered, nothing to remove"),
            Err(e) => tracing::warn!("⚠️ Could not remove trigger '{id}': {e}"),
        }
    }

    /// Replace the meeting's UPCOMING tasks with a fresh expansion.
    /// Tasks that already started are never touched.
    pub fn reconcile_on_meeting_edit(&self, meeting: &Meeting, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let upcoming = self
            .ctx
            .db
            .tasks_for_meeting(meeting.id, Some(TaskStatus::Upcoming))?;

        let mut replaced = 0;
        for task in &upcoming {
            // conditional delete: a task that started meanwhile keeps its triggers
            if self.ctx.db.delete_upcoming_task(task.id)? {
                self.unschedule(task.id);
                replaced += 1;
            } else {
                tracing::info!("⏭️ Task {} started during the edit, kept", task.id);
            }
        }

        let fresh = self.create_tasks_for(meeting, now)?;
        self.schedule_all(&fresh, &meeting.name)?;
        tracing::info!(
            "🔄 Meeting '{}' rescheduled: {replaced} upcoming task(s) replaced by {}",
            meeting.name,
            fresh.len()
        );
        Ok(fresh)
    }

    pub fn delete_task(&self, task_id: i64) -> Result<()> {
        self.ctx.db.get_task(task_id)?;
        self.forget(task_id);
        self.ctx.db.delete_task(task_id)?;
        tracing::info!("🗑️ Task {task_id} deleted");
        Ok(())
    }

    /// Move an UPCOMING task's window and re-register its triggers.
    pub fn update_task(
        &self,
        task_id: i64,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<TaskView> {
        let (task, meeting) = self.ctx.db.get_task_with_meeting(task_id)?;
        if task.status != TaskStatus::Upcoming {
            return Err(MeetRecError::InvalidState(format!(
                "Task {task_id} is {} and can no longer be edited",
                task.status
            )));
        }

        let start = start_time.unwrap_or(task.start_time);
        let end = end_time.unwrap_or(task.end_time);
        if end <= start {
            return Err(MeetRecError::validation("end_time must be strictly after start_time"));
        }
        if start_time.is_some() && start <= now {
            return Err(MeetRecError::validation("start_time must be in the future"));
        }

        let updated = self.ctx.db.update_task_window(task_id, start, end, now)?;
        self.schedule(&updated, &meeting.name)?;
        tracing::info!("✏️ Task {task_id} moved to {} → {}", start.to_rfc3339(), end.to_rfc3339());
        self.ctx.db.get_task_view(task_id)
    }

    pub fn get_task(&self, task_id: i64) -> Result<TaskView> {
        self.ctx.db.get_task_view(task_id)
    }

    pub fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskView>> {
        self.ctx.db.list_tasks(query)
    }

    /// Live triggers, soonest first.
    pub fn jobs(&self) -> Vec<TriggerInfo> {
        self.ctx.triggers.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::harness;
    use chrono::Duration;
    use meetrec_scheduler::TriggerStore;

    fn start_id(id: i64) -> String {
        trigger_id(id, TriggerRole::Start)
    }

    fn end_id(id: i64) -> String {
        trigger_id(id, TriggerRole::End)
    }

    #[test]
    fn test_schedule_is_upsert() {
        let h = harness();
        let task = h.upcoming_task();
        let tasks = h.tasks();

        tasks.schedule(&task, "Weekly sync").unwrap();
        tasks.schedule(&task, "Weekly sync").unwrap();

        let jobs = tasks.jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.trigger_id == start_id(task.id)));
        assert!(jobs.iter().any(|j| j.trigger_id == end_id(task.id)));
        assert_eq!(h.store.get(&start_id(task.id)).unwrap().next_fire, Some(task.start_time));
    }

    #[test]
    fn test_schedule_failure_names_task_and_meeting() {
        let h = harness();
        let task = h.upcoming_task();
        h.store.fail_role(Some(TriggerRole::End));

        let err = h.tasks().schedule(&task, "Board meeting").unwrap_err();
        match err {
            MeetRecError::Scheduling { task_id, meeting_name, .. } => {
                assert_eq!(task_id, task.id);
                assert_eq!(meeting_name, "Board meeting");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unschedule_tolerates_missing() {
        let h = harness();
        let task = h.upcoming_task();
        let tasks = h.tasks();
        tasks.unschedule(task.id);
        tasks.schedule(&task, "x").unwrap();
        tasks.unschedule(task.id);
        tasks.unschedule(task.id);
        assert!(tasks.jobs().is_empty());
    }

    #[test]
    fn test_reconcile_replaces_only_upcoming() {
        let h = harness();
        let now = Utc::now();
        let tasks = h.tasks();

        // three future occurrences, every 7 days
        let meeting = h.recurring_meeting(now + Duration::hours(1), 7, 3);
        let created = tasks.create_tasks_for(&meeting, now).unwrap();
        assert_eq!(created.len(), 3);
        tasks.schedule_all(&created, &meeting.name).unwrap();

        // a fourth task of the same meeting already recording
        let live = h
            .ctx
            .db
            .insert_tasks(meeting.id, &[(now - Duration::minutes(5), now + Duration::minutes(55))], now)
            .unwrap()
            .remove(0);
        h.ctx.db.transition_status(live.id, TaskStatus::Recording, now).unwrap();
        h.ctx
            .triggers
            .add(Trigger::at(live.id, TriggerRole::End, "end", live.end_time))
            .unwrap();

        let mut draft = meeting.to_draft();
        draft.repeat_unit = Some(2);
        let meeting = h.ctx.db.update_meeting(meeting.id, &draft, now).unwrap();
        let fresh = tasks.reconcile_on_meeting_edit(&meeting, now).unwrap();

        for old in &created {
            assert!(h.ctx.db.get_task(old.id).unwrap_err().is_not_found());
            assert!(!h.store.exists(&start_id(old.id)));
            assert!(!h.store.exists(&end_id(old.id)));
        }
        assert!(fresh.len() > 3);
        for pair in fresh.windows(2) {
            assert_eq!(pair[1].start_time - pair[0].start_time, Duration::days(2));
        }
        for t in &fresh {
            assert!(h.store.exists(&start_id(t.id)));
            assert!(h.store.exists(&end_id(t.id)));
        }

        let untouched = h.ctx.db.get_task(live.id).unwrap();
        assert_eq!(untouched.status, TaskStatus::Recording);
        assert!(h.store.exists(&end_id(live.id)));
    }

    #[test]
    fn test_delete_task() {
        let h = harness();
        let task = h.upcoming_task();
        let tasks = h.tasks();
        tasks.schedule(&task, "x").unwrap();
        h.ctx.states.update(task.id, |_| ());

        tasks.delete_task(task.id).unwrap();
        assert!(tasks.jobs().is_empty());
        assert!(h.ctx.states.get(task.id).is_none());
        assert!(tasks.delete_task(task.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_task_window() {
        let h = harness();
        let task = h.upcoming_task();
        let tasks = h.tasks();
        let now = Utc::now();
        tasks.schedule(&task, "x").unwrap();

        let new_end = task.end_time + Duration::minutes(30);
        let view = tasks.update_task(task.id, None, Some(new_end), now).unwrap();
        assert_eq!(view.task.end_time, new_end);
        assert_eq!(h.store.get(&end_id(task.id)).unwrap().next_fire, Some(new_end));

        let err = tasks
            .update_task(task.id, Some(now - Duration::minutes(1)), None, now)
            .unwrap_err();
        assert!(matches!(err, MeetRecError::Validation(_)));
        let err = tasks
            .update_task(task.id, None, Some(task.start_time), now)
            .unwrap_err();
        assert!(matches!(err, MeetRecError::Validation(_)));
    }

    #[test]
    fn test_update_rejects_started_task() {
        let h = harness();
        let task = h.recording_task();
        let err = h
            .tasks()
            .update_task(task.id, None, Some(task.end_time + Duration::minutes(5)), Utc::now())
            .unwrap_err();
        assert!(matches!(err, MeetRecError::InvalidState(_)));
        assert_eq!(err.status_code(), 400);
    }
}
