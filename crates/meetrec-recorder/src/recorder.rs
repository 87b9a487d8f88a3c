//! Recorder capability and its obs-websocket implementation.

use std::time::Duration;

use async_trait::async_trait;
use meetrec_core::config::RecorderConfig;
use meetrec_core::error::{MeetRecError, Result};
use serde_json::json;
use tokio::sync::Mutex;

use crate::obs::ObsClient;
use crate::process;

const KILL_GRACE: Duration = Duration::from_secs(5);
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// The capture application, driven as a black box.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn launch(&self) -> Result<()>;

    async fn connect(&self, retries: u32, timeout: Duration) -> Result<()>;

    async fn setup_scene(&self, scene: &str) -> Result<()>;

    /// No-op when output is already active.
    async fn start_capture(&self) -> Result<()>;

    /// No-op (returns `None`) when output is not active.
    async fn stop_capture(&self) -> Result<Option<String>>;

    async fn is_capturing(&self) -> Result<bool>;

    async fn is_process_alive(&self) -> bool;

    /// Not-running is not an error.
    async fn kill_process(&self) -> Result<()>;

    async fn disconnect(&self);

    /// Point a window-capture input at the window whose name contains `window_match`.
    async fn retarget_window(&self, _source: &str, _window_match: &str) -> Result<()> {
        Ok(())
    }
}

/// OBS controlled through obs-websocket v5.
pub struct ObsRecorder {
    config: RecorderConfig,
    client: Mutex<Option<ObsClient>>,
}

impl ObsRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    async fn open_session(&self, retries: u32, timeout: Duration) -> Result<ObsClient> {
        let url = self.config.websocket_url();
        let attempts = retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match ObsClient::connect(&url, &self.config.password, timeout).await {
                Ok(mut client) => {
                    match client.get_version().await {
                        Ok(v) => tracing::info!("🔌 Connected to recorder at {url} (OBS {v})"),
                        Err(e) => tracing::debug!("GetVersion failed: {e}"),
                    }
                    return Ok(client);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Recorder connect attempt {attempt}/{attempts} failed: {e}");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(RETRY_PAUSE).await;
                    }
                }
            }
        }

        Err(MeetRecError::recorder(format!(
            "Could not connect to {url} after {attempts} attempt(s): {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn not_connected() -> MeetRecError {
        MeetRecError::recorder("Recorder session not connected")
    }
}

#[async_trait]
impl Recorder for ObsRecorder {
    async fn launch(&self) -> Result<()> {
        if process::is_running(&self.config.process_name).await {
            tracing::info!("🎬 Recorder already running");
            return Ok(());
        }
        process::spawn_detached(&self.config.app_path, &[])?;
        process::wait_for(
            &self.config.process_name,
            Duration::from_secs(self.config.launch_grace_secs),
        )
        .await
        .map_err(|e| MeetRecError::recorder(format!("Recorder did not come up: {e}")))
    }

    async fn connect(&self, retries: u32, timeout: Duration) -> Result<()> {
        let session = self.open_session(retries, timeout).await?;
        if let Some(old) = self.client.lock().await.replace(session) {
            old.close().await;
        }
        Ok(())
    }

    async fn setup_scene(&self, scene: &str) -> Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(Self::not_connected)?;
        client.set_current_program_scene(scene).await?;
        tracing::info!("🎞️ Scene set to '{scene}'");
        Ok(())
    }

    async fn start_capture(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(Self::not_connected)?;
        if client.get_record_status().await? {
            tracing::info!("⏺️ Recording already active");
            return Ok(());
        }
        client.start_record().await?;
        tracing::info!("⏺️ Recording started");
        Ok(())
    }

    async fn stop_capture(&self) -> Result<Option<String>> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            // session lost (daemon restart): reattach if the recorder is still up
            if !self.is_process_alive().await {
                tracing::info!("⏹️ Recorder not running, nothing to stop");
                return Ok(None);
            }
            let session = self
                .open_session(
                    self.config.probe_retries,
                    Duration::from_secs(self.config.probe_timeout_secs),
                )
                .await?;
            *guard = Some(session);
        }
        let client = guard.as_mut().ok_or_else(Self::not_connected)?;
        if !client.get_record_status().await? {
            tracing::info!("⏹️ Recording not active, nothing to stop");
            return Ok(None);
        }
        let path = client.stop_record().await?;
        tracing::info!("⏹️ Recording stopped: {}", path.as_deref().unwrap_or("(no path)"));
        Ok(path)
    }

    async fn is_capturing(&self) -> Result<bool> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_mut() {
            match client.get_record_status().await {
                Ok(active) => return Ok(active),
                Err(e) => tracing::debug!("Recorder session stale, reconnecting: {e}"),
            }
        }

        let mut session = self
            .open_session(
                self.config.probe_retries,
                Duration::from_secs(self.config.probe_timeout_secs),
            )
            .await?;
        let active = session.get_record_status().await?;
        if let Some(old) = guard.replace(session) {
            old.close().await;
        }
        Ok(active)
    }

    async fn is_process_alive(&self) -> bool {
        process::is_running(&self.config.process_name).await
    }

    async fn kill_process(&self) -> Result<()> {
        self.disconnect().await;
        process::terminate(&self.config.process_name, KILL_GRACE).await
    }

    async fn disconnect(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
            tracing::info!("🔌 Disconnected from recorder");
        }
    }

    async fn retarget_window(&self, source: &str, window_match: &str) -> Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(Self::not_connected)?;
        let items = client.input_property_items(source, "window").await?;
        let (name, value) = items
            .into_iter()
            .find(|(name, _)| name.contains(window_match))
            .ok_or_else(|| {
                MeetRecError::recorder(format!("No window matching '{window_match}' for '{source}'"))
            })?;
        client
            .set_input_settings(source, json!({ "window": value }))
            .await?;
        tracing::info!("🪟 '{source}' now captures '{name}'");
        Ok(())
    }
}
