//! # MeetRec Runtime
//!
//! Binds meetings to recording tasks and drives each task through its life.
//!
//! ```text
//! MeetingService ──▶ TaskService ──expand──▶ tasks ──▶ start/end triggers
//!
//! SchedulerEngine ──▶ JobRouter
//!   ├── start   ──▶ RecordingSupervisor::start_recording ──▶ monitor trigger
//!   ├── end     ──▶ RecordingSupervisor::end_recording
//!   └── monitor ──▶ CrashMonitor::tick ──▶ one-shot recovery / escalation
//! ```

pub mod alerts;
pub mod context;
pub mod jobs;
pub mod lifecycle;
pub mod meetings;
pub mod monitor;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use alerts::TaskAlerts;
pub use context::RuntimeContext;
pub use jobs::{JobRouter, build_engine};
pub use lifecycle::TaskService;
pub use meetings::MeetingService;
pub use monitor::{CrashMonitor, MonitorState, MonitorStates, MonitorVerdict};
pub use supervisor::{EndOutcome, RecordingSupervisor, StartOutcome};
