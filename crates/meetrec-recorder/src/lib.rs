//! # MeetRec Recorder
//!
//! External capabilities driven by the recording supervisor:
//! - [`recorder`]: the capture application (OBS over obs-websocket v5)
//! - [`joiner`]: one meeting-client driver per platform
//! - [`process`]: launch / liveness / kill by process name
//! - [`action`]: typed step outcomes (critical vs. degradable)

pub mod action;
pub mod joiner;
pub mod obs;
pub mod process;
pub mod recorder;

pub use action::{ActionFailure, ActionResult};
pub use joiner::{Joiners, MeetingJoiner, WebexJoiner, ZoomJoiner, webex_launch_args, zoom_launch_uri};
pub use obs::ObsClient;
pub use recorder::{ObsRecorder, Recorder};
