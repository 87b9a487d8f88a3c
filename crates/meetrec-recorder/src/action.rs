//! Step outcomes for the start/stop/recovery sequences.
//!
//! Every external step runs through [`run`], which logs it and tags a failure
//! with whether the caller must abort (`critical`) or may degrade.

use std::fmt;
use std::future::Future;

use meetrec_core::error::MeetRecError;

/// A failed step and its classification.
#[derive(Debug)]
pub struct ActionFailure {
    pub action: String,
    pub critical: bool,
    pub error: MeetRecError,
}

impl ActionFailure {
    pub fn new(action: &str, critical: bool, error: MeetRecError) -> Self {
        Self {
            action: action.to_string(),
            critical,
            error,
        }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.action, self.error)
    }
}

impl std::error::Error for ActionFailure {}

pub type ActionResult<T> = std::result::Result<T, ActionFailure>;

/// Run one named step, logging start and outcome.
pub async fn run<T, F>(action: &str, critical: bool, fut: F) -> ActionResult<T>
where
    F: Future<Output = meetrec_core::Result<T>>,
{
    tracing::info!("▶️ {action}");
    match fut.await {
        Ok(value) => {
            tracing::info!("✅ {action}");
            Ok(value)
        }
        Err(error) => {
            if critical {
                tracing::error!("❌ {action} failed: {error}");
            } else {
                tracing::warn!("⚠️ {action} failed (non-critical): {error}");
            }
            Err(ActionFailure::new(action, critical, error))
        }
    }
}
