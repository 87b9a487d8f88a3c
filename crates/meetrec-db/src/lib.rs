//! # MeetRec DB
//!
//! SQLite repository for meetings and the recording tasks expanded from them.
//! Task status changes go through compare-and-set updates so concurrent
//! supervisors and monitors never overwrite a terminal status.

pub mod db;
pub mod query;

pub use db::MeetingDb;
pub use query::{MeetingQuery, MeetingSort, SortOrder, TaskQuery, TaskSort};
