//! Alert model: notifications, the sink abstraction, and the cooldown gate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const HISTORY_LIMIT: usize = 100;

/// A notification to send to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: NotifyPriority,
    /// Which task/event raised this.
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(title: &str, body: &str, source: &str, priority: NotifyPriority) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            priority,
            source: source.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl NotifyPriority {
    pub fn emoji(&self) -> &'static str {
        match self {
            NotifyPriority::Urgent => "🚨",
            NotifyPriority::High => "⚠️",
            NotifyPriority::Normal => "📢",
            NotifyPriority::Low => "ℹ️",
        }
    }
}

/// Alert transport.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), String>;
}

/// Cooldown gate: forced alerts always pass; otherwise at least `cooldown`
/// must have elapsed since the last dispatched alert.
pub fn cooldown_allows(
    last_sent: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    match last_sent {
        Some(last) => now - last >= cooldown,
        None => true,
    }
}

/// Routes notifications to the configured sink and keeps recent history.
/// Delivery failures are logged, never returned.
pub struct NotifyRouter {
    sink: Arc<dyn AlertSink>,
    history: Mutex<VecDeque<Notification>>,
}

impl NotifyRouter {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    pub async fn notify(&self, notification: Notification) {
        let line = format!(
            "{} [{}] {}: {}",
            notification.priority.emoji(),
            notification.source,
            notification.title,
            notification.body
        );
        match notification.priority {
            NotifyPriority::Urgent | NotifyPriority::High => tracing::error!("{line}"),
            _ => tracing::warn!("{line}"),
        }

        if let Err(e) = self.sink.send(&notification).await {
            tracing::warn!("⚠️ Alert delivery via {} failed: {e}", self.sink.name());
        }
        self.record(notification);
    }

    fn record(&self, notification: Notification) {
        if let Ok(mut history) = self.history.lock() {
            history.push_back(notification);
            // ring buffer
            while history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
        }
    }

    pub fn history(&self) -> Vec<Notification> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }
}
