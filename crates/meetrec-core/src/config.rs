//! MeetRec configuration system.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MeetRecError, Result};
use crate::types::Platform;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetRecConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub meeting: MeetingConfig,
    #[serde(default)]
    pub alert: AlertConfig,
}

impl MeetRecConfig {
    /// Load config from the default path (~/.meetrec/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MeetRecError::Config(format!("Failed to read config: {e}")))?;
        let config = Self::from_toml(&content)?;
        tracing::debug!("📄 Loaded config from {}", path.display());
        Ok(config.with_env_overrides())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| MeetRecError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MeetRecError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the MeetRec home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".meetrec")
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(env) = std::env::var("MEETREC_ENV") {
            self.recorder.environment = Environment::parse(&env);
        }
        if let Ok(password) = std::env::var("MEETREC_SMTP_PASSWORD") {
            if let Some(email) = self.alert.email.as_mut() {
                email.password = password;
            }
        }
        self
    }

    /// Fixed offset used for calendar-day math and display.
    pub fn utc_offset(&self) -> FixedOffset {
        self.meeting.utc_offset()
    }

    pub fn platform(&self, platform: Platform) -> &PlatformConfig {
        match platform {
            Platform::Zoom => &self.platforms.zoom,
            Platform::Webex => &self.platforms.webex,
        }
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// SQLite locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_scheduler_db_path")]
    pub scheduler_path: String,
}

fn default_db_path() -> String { "~/.meetrec/meetrec.db".into() }
fn default_scheduler_db_path() -> String { "~/.meetrec/scheduler.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            scheduler_path: default_scheduler_db_path(),
        }
    }
}

/// Trigger engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Upper bound on concurrently running jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

fn default_tick_interval_ms() -> u64 { 1000 }
fn default_workers() -> usize { 20 }
fn default_monitor_interval_secs() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            workers: default_workers(),
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

/// Deployment environment. Only `Prod` actually starts capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Prod,
    #[default]
    Dev,
}

impl Environment {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Environment::Prod,
            _ => Environment::Dev,
        }
    }

    pub fn captures(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

/// Recording application (obs-websocket v5) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_obs_path")]
    pub app_path: String,
    #[serde(default = "default_obs_process")]
    pub process_name: String,
    #[serde(default = "default_obs_host")]
    pub host: String,
    #[serde(default = "default_obs_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Lighter probe used by the crash monitor.
    #[serde(default = "default_probe_retries")]
    pub probe_retries: u32,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Pause after launching before the first connection attempt.
    #[serde(default = "default_launch_grace_secs")]
    pub launch_grace_secs: u64,
}

fn default_obs_path() -> String { "obs64.exe".into() }
fn default_obs_process() -> String { "obs64.exe".into() }
fn default_obs_host() -> String { "127.0.0.1".into() }
fn default_obs_port() -> u16 { 4455 }
fn default_connect_retries() -> u32 { 5 }
fn default_connect_timeout_secs() -> u64 { 5 }
fn default_probe_retries() -> u32 { 2 }
fn default_probe_timeout_secs() -> u64 { 3 }
fn default_launch_grace_secs() -> u64 { 5 }

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            app_path: default_obs_path(),
            process_name: default_obs_process(),
            host: default_obs_host(),
            port: default_obs_port(),
            password: String::new(),
            connect_retries: default_connect_retries(),
            connect_timeout_secs: default_connect_timeout_secs(),
            probe_retries: default_probe_retries(),
            probe_timeout_secs: default_probe_timeout_secs(),
            launch_grace_secs: default_launch_grace_secs(),
        }
    }
}

impl RecorderConfig {
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Per-platform meeting client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Client executable (Webex) or opener (Zoom URI handler).
    #[serde(default)]
    pub app_path: String,
    pub process_name: String,
    pub scene_name: String,
    /// Optional external command that applies the layout; receives the layout label.
    #[serde(default)]
    pub layout_command: Option<String>,
    /// When true a failed join only degrades framing instead of failing the task.
    #[serde(default)]
    pub fallback_capture: bool,
    /// Recorder window-capture input to point at the client window after a restart.
    #[serde(default)]
    pub window_source: Option<String>,
    /// Substring identifying the client window among the capture candidates.
    #[serde(default)]
    pub window_match: Option<String>,
}

impl PlatformConfig {
    pub fn zoom() -> Self {
        Self {
            app_path: String::new(),
            process_name: "Zoom.exe".into(),
            scene_name: "Zoom_APP".into(),
            layout_command: None,
            fallback_capture: false,
            window_source: None,
            window_match: None,
        }
    }

    pub fn webex() -> Self {
        Self {
            app_path: "CiscoCollabHost.exe".into(),
            process_name: "CiscoCollabHost.exe".into(),
            scene_name: "Webex_APP".into(),
            layout_command: None,
            fallback_capture: false,
            window_source: Some("webex.exe".into()),
            window_match: Some("CiscoCollabHost.exe".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default = "PlatformConfig::zoom")]
    pub zoom: PlatformConfig,
    #[serde(default = "PlatformConfig::webex")]
    pub webex: PlatformConfig,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            zoom: PlatformConfig::zoom(),
            webex: PlatformConfig::webex(),
        }
    }
}

/// Meeting timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingConfig {
    /// Max wait for the meeting client to come up after joining.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

fn default_wait_timeout_secs() -> u64 { 300 }
fn default_utc_offset_hours() -> i32 { 8 }

impl Default for MeetingConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout_secs(),
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

impl MeetingConfig {
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours.clamp(-23, 23) * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

/// Alerting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Minimum spacing between non-forced alerts for one task.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
    #[serde(default)]
    pub email: Option<EmailAlertConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookAlertConfig>,
}

fn default_cooldown_secs() -> i64 { 300 }

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            email: None,
            webhook: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAlertConfig {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
}

fn default_smtp_port() -> u16 { 587 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAlertConfig {
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}
