//! Domain types: meetings, the tasks expanded from them, and their rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MeetRecError, Result};

const MAX_NAME_LEN: usize = 100;
const MAX_URL_LEN: usize = 200;
const MAX_SHORT_FIELD_LEN: usize = 50;

/// Meeting platform. Each platform has its own joiner and recorder scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Zoom,
    Webex,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Zoom => "zoom",
            Platform::Webex => "webex",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = MeetRecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zoom" => Ok(Platform::Zoom),
            "webex" => Ok(Platform::Webex),
            other => Err(MeetRecError::validation(format!("Unknown platform: {other}"))),
        }
    }
}

/// Preferred on-screen layout once the meeting client has joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    // webex
    Grid,
    Stacked,
    SideBySide,
    // zoom
    Speaker,
    Gallery,
    MultipleSpeakers,
    Focus,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Grid => "grid",
            Layout::Stacked => "stacked",
            Layout::SideBySide => "side_by_side",
            Layout::Speaker => "speaker",
            Layout::Gallery => "gallery",
            Layout::MultipleSpeakers => "multiple_speakers",
            Layout::Focus => "focus",
        }
    }

    /// Label of the client's layout menu entry.
    pub fn menu_label(&self) -> &'static str {
        match self {
            Layout::Grid => "Grid",
            Layout::Stacked => "Stacked",
            Layout::SideBySide => "Side by side",
            Layout::Speaker => "Speaker",
            Layout::Gallery => "Gallery",
            Layout::MultipleSpeakers => "Multi-speaker",
            Layout::Focus => "Immersive",
        }
    }

    pub fn supported_by(&self, platform: Platform) -> bool {
        match platform {
            Platform::Webex => matches!(self, Layout::Grid | Layout::Stacked | Layout::SideBySide),
            Platform::Zoom => matches!(
                self,
                Layout::Speaker | Layout::Gallery | Layout::MultipleSpeakers | Layout::Focus
            ),
        }
    }

    pub fn default_for(platform: Platform) -> Self {
        match platform {
            Platform::Webex => Layout::Grid,
            Platform::Zoom => Layout::Gallery,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layout {
    type Err = MeetRecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "grid" => Ok(Layout::Grid),
            "stacked" => Ok(Layout::Stacked),
            "side_by_side" => Ok(Layout::SideBySide),
            "speaker" => Ok(Layout::Speaker),
            "gallery" => Ok(Layout::Gallery),
            "multiple_speakers" => Ok(Layout::MultipleSpeakers),
            "focus" => Ok(Layout::Focus),
            other => Err(MeetRecError::validation(format!("Unknown layout: {other}"))),
        }
    }
}

/// Task lifecycle status.
///
/// Advances only `Upcoming → Recording → {Completed, Failed}` (or straight
/// `Upcoming → Failed` when the start sequence breaks). Terminal states never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Upcoming,
    Recording,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Upcoming => "upcoming",
            TaskStatus::Recording => "recording",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// States from which a transition to `self` is legal.
    pub fn allowed_predecessors(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Upcoming => &[],
            TaskStatus::Recording => &[TaskStatus::Upcoming],
            TaskStatus::Completed | TaskStatus::Failed => {
                &[TaskStatus::Upcoming, TaskStatus::Recording]
            }
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = MeetRecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upcoming" => Ok(TaskStatus::Upcoming),
            "recording" => Ok(TaskStatus::Recording),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(MeetRecError::validation(format!("Unknown task status: {other}"))),
        }
    }
}

/// Recurrence rule: repeat every `every_days` days until `until` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatRule {
    pub every_days: i64,
    pub until: DateTime<Utc>,
}

/// The scheduling part of a meeting: all the occurrence expander needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingSchedule {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub repeat: Option<RepeatRule>,
}

impl MeetingSchedule {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}

/// A persisted meeting definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: i64,
    pub name: String,
    pub platform: Platform,
    pub meeting_url: Option<String>,
    pub room_id: Option<String>,
    pub password: Option<String>,
    pub layout: Layout,
    pub creator_name: String,
    pub creator_email: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub repeat: bool,
    /// Repeat period in days.
    pub repeat_unit: Option<i64>,
    pub repeat_end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    pub fn schedule(&self) -> MeetingSchedule {
        let repeat = match (self.repeat, self.repeat_unit, self.repeat_end_date) {
            (true, Some(every_days), Some(until)) => Some(RepeatRule { every_days, until }),
            _ => None,
        };
        MeetingSchedule {
            start_time: self.start_time,
            end_time: self.end_time,
            repeat,
        }
    }

    /// A meeting is finished once its last possible occurrence has ended.
    pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
        match (self.repeat, self.repeat_end_date) {
            (true, Some(until)) => until < now,
            _ => self.end_time < now,
        }
    }

    pub fn to_draft(&self) -> MeetingDraft {
        MeetingDraft {
            name: self.name.clone(),
            platform: self.platform,
            meeting_url: self.meeting_url.clone(),
            room_id: self.room_id.clone(),
            password: self.password.clone(),
            layout: self.layout,
            creator_name: self.creator_name.clone(),
            creator_email: self.creator_email.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            repeat: self.repeat,
            repeat_unit: self.repeat_unit,
            repeat_end_date: self.repeat_end_date,
        }
    }
}

/// Input for creating a meeting (and the shape a patch is validated against).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingDraft {
    pub name: String,
    pub platform: Platform,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub layout: Layout,
    pub creator_name: String,
    pub creator_email: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub repeat_unit: Option<i64>,
    #[serde(default)]
    pub repeat_end_date: Option<DateTime<Utc>>,
}

impl MeetingDraft {
    /// Normalize then validate a draft for creation: the start must lie in the future.
    pub fn prepare(self, now: DateTime<Utc>, offset: FixedOffset) -> Result<Self> {
        let draft = self.normalized(offset);
        draft.validate(now, true)?;
        Ok(draft)
    }

    /// Blank optional strings become `None`; `repeat_end_date` snaps to 23:59:59 local time.
    pub fn normalized(mut self, offset: FixedOffset) -> Self {
        self.meeting_url = non_blank(self.meeting_url);
        self.room_id = non_blank(self.room_id);
        self.password = non_blank(self.password);
        self.repeat_end_date = self.repeat_end_date.map(|d| end_of_local_day(d, offset));
        self
    }

    pub fn validate(&self, now: DateTime<Utc>, require_future_start: bool) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MeetRecError::validation("Meeting name must not be empty"));
        }
        check_len("meeting name", &self.name, MAX_NAME_LEN)?;
        check_len("creator name", &self.creator_name, MAX_NAME_LEN)?;
        check_len("creator email", &self.creator_email, MAX_NAME_LEN)?;
        if let Some(url) = &self.meeting_url {
            check_len("meeting url", url, MAX_URL_LEN)?;
        }
        if let Some(room_id) = &self.room_id {
            check_len("room id", room_id, MAX_SHORT_FIELD_LEN)?;
        }
        if let Some(password) = &self.password {
            check_len("password", password, MAX_SHORT_FIELD_LEN)?;
        }

        let has_url = self.meeting_url.is_some();
        let has_room = self.room_id.is_some() && self.password.is_some();
        if !has_url && !has_room {
            return Err(MeetRecError::validation(
                "Connection info missing: provide meeting_url, or room_id together with password",
            ));
        }

        if !self.layout.supported_by(self.platform) {
            return Err(MeetRecError::validation(format!(
                "Layout '{}' is not available on {}",
                self.layout, self.platform
            )));
        }

        if self.start_time >= self.end_time {
            return Err(MeetRecError::validation(
                "end_time must be strictly after start_time",
            ));
        }

        if require_future_start && self.start_time <= now {
            return Err(MeetRecError::validation("start_time must be in the future"));
        }

        if self.repeat {
            match self.repeat_unit {
                Some(unit) if unit > 0 => {}
                _ => {
                    return Err(MeetRecError::validation(
                        "repeat_unit must be a positive number of days when repeat is enabled",
                    ));
                }
            }
            match self.repeat_end_date {
                None => {
                    return Err(MeetRecError::validation(
                        "repeat_end_date is required when repeat is enabled",
                    ));
                }
                Some(until) if until <= self.start_time => {
                    return Err(MeetRecError::validation(
                        "repeat_end_date must be after start_time",
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Partial meeting update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub layout: Option<Layout>,
    #[serde(default)]
    pub creator_name: Option<String>,
    #[serde(default)]
    pub creator_email: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub repeat: Option<bool>,
    #[serde(default)]
    pub repeat_unit: Option<i64>,
    #[serde(default)]
    pub repeat_end_date: Option<DateTime<Utc>>,
}

impl MeetingPatch {
    /// Apply onto a draft. Returns the merged draft.
    pub fn apply_to(&self, mut draft: MeetingDraft) -> MeetingDraft {
        if let Some(v) = &self.name {
            draft.name = v.clone();
        }
        if let Some(v) = self.platform {
            draft.platform = v;
        }
        if let Some(v) = &self.meeting_url {
            draft.meeting_url = Some(v.clone());
        }
        if let Some(v) = &self.room_id {
            draft.room_id = Some(v.clone());
        }
        if let Some(v) = &self.password {
            draft.password = Some(v.clone());
        }
        if let Some(v) = self.layout {
            draft.layout = v;
        }
        if let Some(v) = &self.creator_name {
            draft.creator_name = v.clone();
        }
        if let Some(v) = &self.creator_email {
            draft.creator_email = v.clone();
        }
        if let Some(v) = self.start_time {
            draft.start_time = v;
        }
        if let Some(v) = self.end_time {
            draft.end_time = v;
        }
        if let Some(v) = self.repeat {
            draft.repeat = v;
        }
        if let Some(v) = self.repeat_unit {
            draft.repeat_unit = Some(v);
        }
        if let Some(v) = self.repeat_end_date {
            draft.repeat_end_date = Some(v);
        }
        draft
    }
}

/// True when any field that drives occurrence expansion differs.
pub fn schedule_changed(before: &MeetingDraft, after: &MeetingDraft) -> bool {
    before.start_time != after.start_time
        || before.end_time != after.end_time
        || before.repeat != after.repeat
        || before.repeat_unit != after.repeat_unit
        || before.repeat_end_date != after.repeat_end_date
}

/// One concrete recording window derived from a meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub meeting_id: i64,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub save_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Task joined with the owning meeting's display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub meeting_name: String,
    pub creator_name: String,
    pub creator_email: String,
}

/// Snap an instant to 23:59:59 of its local calendar day.
pub fn end_of_local_day(at: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = at.with_timezone(&offset).date_naive();
    local
        .and_hms_opt(23, 59, 59)
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(at)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(MeetRecError::validation(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn taipei() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn draft(now: DateTime<Utc>) -> MeetingDraft {
        MeetingDraft {
            name: "Weekly sync".into(),
            platform: Platform::Zoom,
            meeting_url: Some("https://zoom.us/j/123456789?pwd=abc".into()),
            room_id: None,
            password: None,
            layout: Layout::Gallery,
            creator_name: "Lin".into(),
            creator_email: "lin@example.com".into(),
            start_time: now + Duration::hours(1),
            end_time: now + Duration::hours(2),
            repeat: false,
            repeat_unit: None,
            repeat_end_date: None,
        }
    }

    #[test]
    fn test_valid_draft() {
        let now = Utc::now();
        assert!(draft(now).prepare(now, taipei()).is_ok());
    }

    #[test]
    fn test_requires_connection_info() {
        let now = Utc::now();
        let mut d = draft(now);
        d.meeting_url = Some("   ".into());
        d.room_id = Some("123".into());
        let err = d.prepare(now, taipei()).unwrap_err();
        assert!(matches!(err, MeetRecError::Validation(_)));
    }

    #[test]
    fn test_room_and_password_is_enough() {
        let now = Utc::now();
        let mut d = draft(now);
        d.meeting_url = None;
        d.room_id = Some("123 456 789".into());
        d.password = Some("secret".into());
        assert!(d.prepare(now, taipei()).is_ok());
    }

    #[test]
    fn test_end_must_follow_start() {
        let now = Utc::now();
        let mut d = draft(now);
        d.end_time = d.start_time;
        assert!(d.prepare(now, taipei()).is_err());
    }

    #[test]
    fn test_start_must_be_future() {
        let now = Utc::now();
        let mut d = draft(now);
        d.start_time = now - Duration::minutes(5);
        assert!(d.prepare(now, taipei()).is_err());
    }

    #[test]
    fn test_repeat_rejects_non_positive_unit() {
        let now = Utc::now();
        let mut d = draft(now);
        d.repeat = true;
        d.repeat_unit = Some(0);
        d.repeat_end_date = Some(now + Duration::days(30));
        assert!(d.clone().prepare(now, taipei()).is_err());
        d.repeat_unit = Some(-7);
        assert!(d.prepare(now, taipei()).is_err());
    }

    #[test]
    fn test_repeat_end_date_snaps_to_end_of_day() {
        let now = Utc::now();
        let mut d = draft(now);
        d.repeat = true;
        d.repeat_unit = Some(7);
        d.repeat_end_date = Some(now + Duration::days(30));
        let prepared = d.prepare(now, taipei()).unwrap();
        let local = prepared.repeat_end_date.unwrap().with_timezone(&taipei());
        assert_eq!((local.hour(), local.minute(), local.second()), (23, 59, 59));
    }

    #[test]
    fn test_layout_must_match_platform() {
        let now = Utc::now();
        let mut d = draft(now);
        d.layout = Layout::Stacked;
        assert!(d.prepare(now, taipei()).is_err());
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Upcoming.can_transition_to(TaskStatus::Recording));
        assert!(TaskStatus::Upcoming.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Recording.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Recording));
        assert!(!TaskStatus::Recording.can_transition_to(TaskStatus::Upcoming));
    }

    #[test]
    fn test_patch_detects_schedule_change() {
        let now = Utc::now();
        let before = draft(now);
        let patch = MeetingPatch {
            name: Some("Renamed".into()),
            ..Default::default()
        };
        assert!(!schedule_changed(&before, &patch.apply_to(before.clone())));

        let patch = MeetingPatch {
            end_time: Some(before.end_time + Duration::minutes(30)),
            ..Default::default()
        };
        assert!(schedule_changed(&before, &patch.apply_to(before.clone())));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Zoom".parse::<Platform>().unwrap(), Platform::Zoom);
        assert_eq!("side-by-side".parse::<Layout>().unwrap(), Layout::SideBySide);
        assert_eq!("FAILED".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert!("teams".parse::<Platform>().is_err());
    }
}
