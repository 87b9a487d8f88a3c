//! Occurrence expansion: turns a meeting's window and repeat rule into
//! the concrete recording windows that are still ahead of `now`.

use chrono::{DateTime, Duration, Utc};
use meetrec_core::types::MeetingSchedule;
use serde::{Deserialize, Serialize};

/// One concrete (start, end) window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Expand a schedule into its occurrences.
///
/// A non-recurring schedule yields its single window regardless of `now`.
/// A recurring one steps by `every_days` from `start_time` while the step is
/// `<= until`, keeping steps with `start >= now`. A non-positive step
/// evaluates the first window only.
pub fn expand(schedule: &MeetingSchedule, now: DateTime<Utc>) -> Vec<Occurrence> {
    let Some(rule) = schedule.repeat else {
        return vec![Occurrence {
            start: schedule.start_time,
            end: schedule.end_time,
        }];
    };

    let duration = schedule.duration();
    let mut occurrences = Vec::new();
    let mut cursor = schedule.start_time;

    while cursor <= rule.until {
        if cursor >= now {
            occurrences.push(Occurrence {
                start: cursor,
                end: cursor + duration,
            });
        }
        if rule.every_days <= 0 {
            tracing::warn!(
                "⚠️ Non-positive repeat interval ({} days), expanding a single step",
                rule.every_days
            );
            break;
        }
        cursor += Duration::days(rule.every_days);
    }

    occurrences
}
