//! # MeetRec Core
//!
//! Shared building blocks for every MeetRec crate:
//! - [`config`]: TOML configuration with env overrides
//! - [`error`]: the single error taxonomy used across the workspace
//! - [`types`]: meetings, tasks and their validation rules

pub mod config;
pub mod error;
pub mod types;

pub use config::MeetRecConfig;
pub use error::{MeetRecError, Result};
pub use types::{
    Layout, Meeting, MeetingDraft, MeetingPatch, Platform, Task, TaskStatus, TaskView,
};
