//! Trigger definitions: the time-based callbacks bound to a recording task.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which action a trigger fires for its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerRole {
    Start,
    End,
    Monitor,
}

impl TriggerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerRole::Start => "start",
            TriggerRole::End => "end",
            TriggerRole::Monitor => "monitor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(TriggerRole::Start),
            "end" => Some(TriggerRole::End),
            "monitor" => Some(TriggerRole::Monitor),
            _ => None,
        }
    }
}

/// Deterministic id: at most one trigger per (task, role).
pub fn trigger_id(task_id: i64, role: TriggerRole) -> String {
    format!("task_{}_{}", role.as_str(), task_id)
}

/// When/how the trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FireSpec {
    /// Fire once at a specific time.
    At { at: DateTime<Utc> },
    /// Fire every N seconds.
    Every { every_secs: u64 },
}

/// A scheduled trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    /// Human-readable name, shown in introspection.
    pub name: String,
    pub role: TriggerRole,
    /// Payload: the task this trigger acts on.
    pub task_id: i64,
    pub fire: FireSpec,
    pub next_fire: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_fired: Option<DateTime<Utc>>,
    pub run_count: u32,
}

impl Trigger {
    /// One-shot trigger at `at`.
    pub fn at(task_id: i64, role: TriggerRole, name: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: trigger_id(task_id, role),
            name: name.to_string(),
            role,
            task_id,
            fire: FireSpec::At { at },
            next_fire: Some(at),
            created_at: Utc::now(),
            last_fired: None,
            run_count: 0,
        }
    }

    /// Recurring trigger; first fire one interval after `now`.
    pub fn every(task_id: i64, role: TriggerRole, name: &str, every_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: trigger_id(task_id, role),
            name: name.to_string(),
            role,
            task_id,
            fire: FireSpec::Every { every_secs },
            next_fire: Some(now + Duration::seconds(every_secs as i64)),
            created_at: now,
            last_fired: None,
            run_count: 0,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self.fire, FireSpec::Every { .. })
    }

    /// Never before the scheduled time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire.is_some_and(|next| now >= next)
    }

    /// Record a fire. Returns false when the trigger is spent.
    pub fn mark_fired(&mut self, now: DateTime<Utc>) -> bool {
        self.last_fired = Some(now);
        self.run_count += 1;
        match self.fire {
            FireSpec::At { .. } => {
                self.next_fire = None;
                false
            }
            FireSpec::Every { every_secs } => {
                self.next_fire = Some(now + Duration::seconds(every_secs as i64));
                true
            }
        }
    }

    pub fn info(&self) -> TriggerInfo {
        TriggerInfo {
            trigger_id: self.id.clone(),
            display_name: self.name.clone(),
            next_fire_time: self.next_fire,
        }
    }
}

/// Read-only view for scheduler introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub trigger_id: String,
    pub display_name: String,
    pub next_fire_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_deterministic() {
        assert_eq!(trigger_id(12, TriggerRole::Start), "task_start_12");
        assert_eq!(trigger_id(12, TriggerRole::End), "task_end_12");
        assert_eq!(trigger_id(12, TriggerRole::Monitor), "task_monitor_12");
    }

    #[test]
    fn test_one_shot_fires_once() {
        let now = Utc::now();
        let mut t = Trigger::at(1, TriggerRole::Start, "start", now + Duration::seconds(5));
        assert!(!t.is_due(now));
        assert!(t.is_due(now + Duration::seconds(5)));
        assert!(!t.mark_fired(now + Duration::seconds(5)));
        assert!(!t.is_due(now + Duration::hours(1)));
    }

    #[test]
    fn test_interval_reschedules() {
        let now = Utc::now();
        let mut t = Trigger::every(1, TriggerRole::Monitor, "monitor", 30, now);
        assert!(!t.is_due(now));
        let fire_at = now + Duration::seconds(30);
        assert!(t.is_due(fire_at));
        assert!(t.mark_fired(fire_at));
        assert_eq!(t.next_fire, Some(fire_at + Duration::seconds(30)));
        assert_eq!(t.run_count, 1);
    }
}
