//! Error taxonomy shared by every MeetRec crate.

/// MeetRec error type.
#[derive(Debug, thiserror::Error)]
pub enum MeetRecError {
    /// Referenced meeting or task does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Trigger registration failed for a task.
    #[error("Failed to schedule task {task_id} for meeting '{meeting_name}': {reason}")]
    Scheduling {
        task_id: i64,
        meeting_name: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not allowed in the entity's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Meeting joiner error: {0}")]
    Joiner(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl MeetRecError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn database(msg: impl std::fmt::Display) -> Self {
        Self::Database(msg.to_string())
    }

    pub fn recorder(msg: impl Into<String>) -> Self {
        Self::Recorder(msg.into())
    }

    /// HTTP-equivalent status class for callers that surface errors to users.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Scheduling { .. } | Self::Validation(_) | Self::InvalidState(_) => 400,
            _ => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, MeetRecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(MeetRecError::not_found("Task 1").status_code(), 404);
        assert_eq!(
            MeetRecError::Scheduling {
                task_id: 1,
                meeting_name: "standup".into(),
                reason: "store down".into(),
            }
            .status_code(),
            400
        );
        assert_eq!(MeetRecError::recorder("boom").status_code(), 500);
    }

    #[test]
    fn test_scheduling_message_names_task_and_meeting() {
        let err = MeetRecError::Scheduling {
            task_id: 7,
            meeting_name: "weekly sync".into(),
            reason: "disk full".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("task 7"));
        assert!(msg.contains("weekly sync"));
    }
}
