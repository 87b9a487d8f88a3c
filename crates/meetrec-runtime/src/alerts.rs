//! Per-task alert decisions: cooldown filtering in front of the notify router.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use meetrec_scheduler::{Notification, NotifyPriority, NotifyRouter, cooldown_allows};

use crate::monitor::MonitorStates;

/// Decides whether a task alert is dispatched, then dispatches it.
///
/// Non-forced alerts share one cooldown window per task (tracked in the
/// task's [`MonitorState`](crate::monitor::MonitorState)); forced alerts
/// always go out.
pub struct TaskAlerts {
    router: Arc<NotifyRouter>,
    states: Arc<MonitorStates>,
    cooldown: Duration,
}

impl TaskAlerts {
    pub fn new(router: Arc<NotifyRouter>, states: Arc<MonitorStates>, cooldown_secs: i64) -> Self {
        Self {
            router,
            states,
            cooldown: Duration::seconds(cooldown_secs.max(0)),
        }
    }

    pub fn router(&self) -> &Arc<NotifyRouter> {
        &self.router
    }

    pub async fn send_alert(&self, task_id: i64, title: &str, body: &str, force: bool) -> bool {
        self.send_alert_at(task_id, title, body, force, Utc::now()).await
    }

    /// Returns whether the alert reached the router.
    pub async fn send_alert_at(
        &self,
        task_id: i64,
        title: &str,
        body: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let allowed = if force {
            // no state is created for tasks that are not being monitored
            self.states
                .update_existing(task_id, |s| s.last_alert_time = Some(now));
            true
        } else {
            self.states.update(task_id, |s| {
                let ok = cooldown_allows(s.last_alert_time, now, self.cooldown, false);
                if ok {
                    s.last_alert_time = Some(now);
                }
                ok
            })
        };

        if !allowed {
            tracing::debug!("🔕 Alert for task {task_id} suppressed by cooldown: {title}");
            return false;
        }

        let priority = if force {
            NotifyPriority::Urgent
        } else {
            NotifyPriority::High
        };
        self.router
            .notify(Notification::new(title, body, &format!("task-{task_id}"), priority))
            .await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CapturingSink;

    fn alerts() -> (TaskAlerts, Arc<CapturingSink>, Arc<MonitorStates>) {
        let sink = Arc::new(CapturingSink::default());
        let states = Arc::new(MonitorStates::new());
        let router = Arc::new(NotifyRouter::new(sink.clone()));
        (TaskAlerts::new(router, states.clone(), 300), sink, states)
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let (alerts, sink, _) = alerts();
        let t0 = Utc::now();
        assert!(alerts.send_alert_at(4, "Client down", "first", false, t0).await);
        assert!(!alerts.send_alert_at(4, "Client down", "second", false, t0 + Duration::seconds(120)).await);
        assert!(alerts.send_alert_at(4, "Client down", "third", false, t0 + Duration::seconds(301)).await);

        let bodies: Vec<String> = sink.sent().into_iter().map(|n| n.body).collect();
        assert_eq!(bodies, vec!["first", "third"]);
    }

    #[tokio::test]
    async fn test_forced_bypasses_cooldown() {
        let (alerts, sink, states) = alerts();
        let t0 = Utc::now();
        alerts.send_alert_at(5, "Client down", "soft", false, t0).await;
        assert!(alerts.send_alert_at(5, "Recorder failed", "hard", true, t0 + Duration::seconds(10)).await);
        assert_eq!(sink.sent().len(), 2);
        assert_eq!(sink.sent()[1].priority, NotifyPriority::Urgent);
        // forced alerts still restart the cooldown window
        assert_eq!(states.get(5).unwrap().last_alert_time, Some(t0 + Duration::seconds(10)));
    }

    #[tokio::test]
    async fn test_cooldown_is_per_task() {
        let (alerts, sink, _) = alerts();
        let t0 = Utc::now();
        assert!(alerts.send_alert_at(1, "a", "a", false, t0).await);
        assert!(alerts.send_alert_at(2, "b", "b", false, t0).await);
        assert_eq!(sink.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_forced_alert_creates_no_state() {
        let (alerts, _, states) = alerts();
        alerts.send_alert(9, "Task failed", "start refused", true).await;
        assert!(states.get(9).is_none());
    }
}
