//! Meeting service: CRUD that keeps tasks and triggers in step with
//! every meeting change.

use chrono::{DateTime, Utc};
use meetrec_core::error::Result;
use meetrec_core::types::{Meeting, MeetingDraft, MeetingPatch, TaskStatus, schedule_changed};
use meetrec_db::MeetingQuery;
use meetrec_scheduler::{Notification, NotifyPriority};

use crate::context::RuntimeContext;
use crate::lifecycle::TaskService;

pub struct MeetingService {
    ctx: RuntimeContext,
    tasks: TaskService,
}

impl MeetingService {
    pub fn new(ctx: RuntimeContext) -> Self {
        let tasks = TaskService::new(ctx.clone());
        Self { ctx, tasks }
    }

    /// Validate, persist, expand and schedule. All or nothing: a scheduling
    /// failure removes the meeting and whatever was registered for it.
    pub fn create(&self, draft: MeetingDraft, now: DateTime<Utc>) -> Result<Meeting> {
        let draft = draft.prepare(now, self.ctx.config.utc_offset())?;
        let meeting = self.ctx.db.create_meeting(&draft, now)?;

        let scheduled = self
            .tasks
            .create_tasks_for(&meeting, now)
            .and_then(|tasks| {
                let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
                self.tasks
                    .schedule_all(&tasks, &meeting.name)
                    .map(|_| tasks.len())
                    .map_err(|e| {
                        for id in &ids {
                            self.tasks.unschedule(*id);
                        }
                        e
                    })
            });

        match scheduled {
            Ok(count) => {
                tracing::info!("📌 Meeting {} '{}' created with {count} task(s)", meeting.id, meeting.name);
                Ok(meeting)
            }
            Err(e) => {
                tracing::error!("❌ Meeting '{}' not created: {e}", meeting.name);
                if let Err(cleanup) = self.ctx.db.delete_meeting(meeting.id) {
                    tracing::error!("❌ Rollback of meeting {} failed: {cleanup}", meeting.id);
                }
                Err(e)
            }
        }
    }

    /// Apply a partial update. A change to the window or repeat rule replaces
    /// the UPCOMING tasks; started tasks are left alone.
    pub async fn update(&self, id: i64, patch: &MeetingPatch, now: DateTime<Utc>) -> Result<Meeting> {
        let before = self.ctx.db.get_meeting(id)?.to_draft();
        let after = patch
            .apply_to(before.clone())
            .normalized(self.ctx.config.utc_offset());
        after.validate(now, after.start_time != before.start_time)?;

        let meeting = self.ctx.db.update_meeting(id, &after, now)?;

        if schedule_changed(&before, &after) {
            if let Err(e) = self.tasks.reconcile_on_meeting_edit(&meeting, now) {
                tracing::error!("❌ Rescheduling meeting {id} failed: {e}");
                self.ctx
                    .alerts
                    .router()
                    .notify(Notification::new(
                        &format!("Rescheduling failed: {}", meeting.name),
                        &format!("Meeting {id} was updated but its tasks could not be rescheduled: {e}"),
                        &format!("meeting-{id}"),
                        NotifyPriority::High,
                    ))
                    .await;
                return Err(e);
            }
        } else if before.name != after.name {
            // trigger display names carry the meeting name
            let upcoming = self.ctx.db.tasks_for_meeting(id, Some(TaskStatus::Upcoming))?;
            self.tasks.schedule_all(&upcoming, &meeting.name)?;
        }

        tracing::info!("✏️ Meeting {id} '{}' updated", meeting.name);
        Ok(meeting)
    }

    /// Delete a meeting with all its tasks and their triggers.
    /// Returns how many tasks went with it.
    pub fn delete(&self, id: i64) -> Result<usize> {
        self.ctx.db.get_meeting(id)?;
        let tasks = self.ctx.db.tasks_for_meeting(id, None)?;
        for task in &tasks {
            self.tasks.forget(task.id);
        }
        self.ctx.db.delete_meeting(id)?;
        tracing::info!("🗑️ Meeting {id} deleted with {} task(s)", tasks.len());
        Ok(tasks.len())
    }

    pub fn get(&self, id: i64) -> Result<Meeting> {
        self.ctx.db.get_meeting(id)
    }

    pub fn list(&self, query: &MeetingQuery, now: DateTime<Utc>) -> Result<Vec<Meeting>> {
        self.ctx.db.list_meetings(query, now)
    }
}
