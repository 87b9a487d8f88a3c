//! Filter / sort / paging parameters for list queries.

use chrono::{DateTime, Utc};
use meetrec_core::TaskStatus;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSort {
    #[default]
    StartTime,
    Status,
}

/// Task list query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub meeting_id: Option<i64>,
    /// Substring match on the owning meeting's name.
    #[serde(default)]
    pub meeting_name: Option<String>,
    #[serde(default)]
    pub start_time_ge: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time_le: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort: TaskSort,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize { DEFAULT_LIMIT }

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            status: None,
            meeting_id: None,
            meeting_name: None,
            start_time_ge: None,
            end_time_le: None,
            sort: TaskSort::default(),
            order: SortOrder::default(),
            skip: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingSort {
    StartTime,
    Name,
}

/// Meeting list query. Without `sort`, unfinished meetings come first
/// (ascending start), then finished ones (descending start).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_time_ge: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort: Option<MeetingSort>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for MeetingQuery {
    fn default() -> Self {
        Self {
            name: None,
            start_time_ge: None,
            sort: None,
            order: SortOrder::default(),
            skip: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

pub(crate) fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIMIT)
}

/// Escape LIKE wildcards so user input matches literally.
pub(crate) fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
