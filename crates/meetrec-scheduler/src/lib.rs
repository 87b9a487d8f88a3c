//! # MeetRec Scheduler
//!
//! Trigger store, job engine and alerting for recording tasks.
//!
//! ## Architecture
//! ```text
//! Meeting ──expand──▶ occurrences ──▶ tasks
//!
//! TriggerStore (SQLite)
//!   ├── task_start_{id}   : once at start_time
//!   ├── task_end_{id}     : once at end_time
//!   └── task_monitor_{id} : every N secs while recording
//!
//! SchedulerEngine (tokio interval)
//!   └── due triggers ──▶ worker pool (Semaphore) ──▶ JobHandler
//!
//! AlertSink
//!   ├── Email (SMTP via lettre)
//!   ├── Webhook (HTTP POST)
//!   └── Log
//! ```

pub mod dispatch;
pub mod engine;
pub mod expand;
pub mod notify;
pub mod persistence;
pub mod store;
pub mod triggers;

pub use dispatch::{EmailSink, FanoutSink, LogSink, WebhookSink, sink_from_config};
pub use engine::{FiredJob, JobHandler, SchedulerEngine};
pub use expand::{Occurrence, expand};
pub use notify::{AlertSink, Notification, NotifyPriority, NotifyRouter, cooldown_allows};
pub use persistence::TriggerDb;
pub use store::{SqliteTriggerStore, TriggerStore};
pub use triggers::{FireSpec, Trigger, TriggerInfo, TriggerRole, trigger_id};
