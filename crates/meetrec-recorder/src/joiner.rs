//! Meeting joiners, one per platform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meetrec_core::config::{MeetRecConfig, PlatformConfig};
use meetrec_core::error::{MeetRecError, Result};
use meetrec_core::types::{Meeting, Platform};

use crate::{action, process};

const LAYOUT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);
const KILL_GRACE: Duration = Duration::from_secs(3);

/// Drives a third-party meeting client into a joined, laid-out state.
#[async_trait]
pub trait MeetingJoiner: Send + Sync {
    fn platform(&self) -> Platform;

    /// Join, wait for the client (bounded), then apply the layout.
    async fn join_and_apply_layout(&self, meeting: &Meeting) -> Result<()>;

    async fn is_client_alive(&self) -> bool;

    /// Not-running is not an error.
    async fn kill_client(&self) -> Result<()>;
}

/// Build the `zoommtg://` launch URI for a meeting.
///
/// Room id + password win; otherwise the conference number is the last path
/// segment of the meeting URL and the password its `pwd` query parameter.
pub fn zoom_launch_uri(meeting: &Meeting) -> Result<String> {
    let (confno, pwd) = match (&meeting.room_id, &meeting.password) {
        (Some(room), Some(pwd)) => (room.split_whitespace().collect::<String>(), Some(pwd.clone())),
        _ => {
            let raw = meeting
                .meeting_url
                .as_deref()
                .ok_or_else(|| MeetRecError::Joiner("Meeting has no URL or room id".into()))?;
            let parsed = url::Url::parse(raw)
                .map_err(|e| MeetRecError::Joiner(format!("Invalid meeting URL '{raw}': {e}")))?;
            let confno = parsed
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .unwrap_or_default()
                .to_string();
            let pwd = parsed
                .query_pairs()
                .find(|(k, _)| k == "pwd")
                .map(|(_, v)| v.into_owned());
            (confno, pwd)
        }
    };

    if confno.is_empty() {
        return Err(MeetRecError::Joiner("Could not derive a Zoom meeting number".into()));
    }

    let mut uri = url::Url::parse("zoommtg://zoom.us/join")
        .map_err(|e| MeetRecError::Joiner(e.to_string()))?;
    {
        let mut query = uri.query_pairs_mut();
        query.append_pair("confno", &confno);
        if let Some(pwd) = &pwd {
            query.append_pair("pwd", pwd);
        }
    }
    Ok(uri.to_string())
}

/// Launch arguments for the Webex client.
pub fn webex_launch_args(meeting: &Meeting) -> Result<Vec<String>> {
    if let Some(url) = &meeting.meeting_url {
        return Ok(vec![url.clone()]);
    }
    match (&meeting.room_id, &meeting.password) {
        (Some(room), Some(pwd)) => Ok(vec![room.split_whitespace().collect(), pwd.clone()]),
        _ => Err(MeetRecError::Joiner("Meeting has no URL or room id".into())),
    }
}

/// Shared client plumbing: bounded wait, layout hook, kill.
struct ClientControl {
    config: PlatformConfig,
    wait_timeout: Duration,
}

impl ClientControl {
    async fn wait_and_layout(&self, meeting: &Meeting) -> Result<()> {
        process::wait_for(&self.config.process_name, self.wait_timeout).await?;
        tracing::info!("🤝 '{}' joined via {}", meeting.name, self.config.process_name);

        // layout is cosmetic; the capture runs either way
        let _ = action::run("Apply meeting layout", false, self.apply_layout(meeting)).await;
        Ok(())
    }

    async fn apply_layout(&self, meeting: &Meeting) -> Result<()> {
        let Some(cmd) = &self.config.layout_command else {
            tracing::debug!("No layout hook configured, keeping client default");
            return Ok(());
        };

        let run = tokio::process::Command::new(cmd)
            .arg(meeting.layout.menu_label())
            .arg(meeting.platform.as_str())
            .output();
        let output = tokio::time::timeout(LAYOUT_HOOK_TIMEOUT, run)
            .await
            .map_err(|_| MeetRecError::Timeout(format!("Layout hook '{cmd}'")))??;

        if output.status.success() {
            tracing::info!("🖼️ Layout '{}' applied", meeting.layout.menu_label());
            Ok(())
        } else {
            Err(MeetRecError::Joiner(format!(
                "Layout hook exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn is_alive(&self) -> bool {
        process::is_running(&self.config.process_name).await
    }

    async fn kill(&self) -> Result<()> {
        process::terminate(&self.config.process_name, KILL_GRACE).await
    }
}

/// Zoom: opens the `zoommtg://` URI through the OS handler.
pub struct ZoomJoiner {
    control: ClientControl,
}

impl ZoomJoiner {
    pub fn new(config: PlatformConfig, wait_timeout: Duration) -> Self {
        Self {
            control: ClientControl { config, wait_timeout },
        }
    }
}

#[async_trait]
impl MeetingJoiner for ZoomJoiner {
    fn platform(&self) -> Platform {
        Platform::Zoom
    }

    async fn join_and_apply_layout(&self, meeting: &Meeting) -> Result<()> {
        let uri = zoom_launch_uri(meeting)?;
        tracing::info!("📞 Joining Zoom meeting '{}'", meeting.name);
        if self.control.config.app_path.is_empty() {
            process::open_uri(&uri)?;
        } else {
            process::spawn_detached(&self.control.config.app_path, &[format!("--url={uri}")])?;
        }
        self.control.wait_and_layout(meeting).await
    }

    async fn is_client_alive(&self) -> bool {
        self.control.is_alive().await
    }

    async fn kill_client(&self) -> Result<()> {
        self.control.kill().await
    }
}

/// Webex: launches the desktop client with the meeting link.
pub struct WebexJoiner {
    control: ClientControl,
}

impl WebexJoiner {
    pub fn new(config: PlatformConfig, wait_timeout: Duration) -> Self {
        Self {
            control: ClientControl { config, wait_timeout },
        }
    }
}

#[async_trait]
impl MeetingJoiner for WebexJoiner {
    fn platform(&self) -> Platform {
        Platform::Webex
    }

    async fn join_and_apply_layout(&self, meeting: &Meeting) -> Result<()> {
        let args = webex_launch_args(meeting)?;
        tracing::info!("📞 Joining Webex meeting '{}'", meeting.name);
        process::spawn_detached(&self.control.config.app_path, &args)?;
        self.control.wait_and_layout(meeting).await
    }

    async fn is_client_alive(&self) -> bool {
        self.control.is_alive().await
    }

    async fn kill_client(&self) -> Result<()> {
        self.control.kill().await
    }
}

/// Joiner lookup by platform.
#[derive(Clone)]
pub struct Joiners {
    zoom: Arc<dyn MeetingJoiner>,
    webex: Arc<dyn MeetingJoiner>,
}

impl Joiners {
    pub fn new(zoom: Arc<dyn MeetingJoiner>, webex: Arc<dyn MeetingJoiner>) -> Self {
        Self { zoom, webex }
    }

    pub fn from_config(config: &MeetRecConfig) -> Self {
        let wait = Duration::from_secs(config.meeting.wait_timeout_secs);
        Self::new(
            Arc::new(ZoomJoiner::new(config.platforms.zoom.clone(), wait)),
            Arc::new(WebexJoiner::new(config.platforms.webex.clone(), wait)),
        )
    }

    pub fn for_platform(&self, platform: Platform) -> Arc<dyn MeetingJoiner> {
        match platform {
            Platform::Zoom => self.zoom.clone(),
            Platform::Webex => self.webex.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meetrec_core::types::Layout;

    fn meeting(url: Option<&str>, room: Option<&str>, pwd: Option<&str>) -> Meeting {
        let now = Utc::now();
        Meeting {
            id: 1,
            name: "Weekly sync".into(),
            platform: Platform::Zoom,
            meeting_url: url.map(str::to_string),
            room_id: room.map(str::to_string),
            password: pwd.map(str::to_string),
            layout: Layout::Gallery,
            creator_name: "Ops".into(),
            creator_email: "ops@example.com".into(),
            start_time: now,
            end_time: now,
            repeat: false,
            repeat_unit: None,
            repeat_end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_zoom_uri_from_room_id() {
        let m = meeting(None, Some("812 3456 7890"), Some("abc123"));
        assert_eq!(
            zoom_launch_uri(&m).unwrap(),
            "zoommtg://zoom.us/join?confno=81234567890&pwd=abc123"
        );
    }

    #[test]
    fn test_zoom_uri_from_link() {
        let m = meeting(Some("https://us02web.zoom.us/j/81234567890?pwd=Xy9z"), None, None);
        assert_eq!(
            zoom_launch_uri(&m).unwrap(),
            "zoommtg://zoom.us/join?confno=81234567890&pwd=Xy9z"
        );

        let no_pwd = meeting(Some("https://zoom.us/j/555/"), None, None);
        assert_eq!(zoom_launch_uri(&no_pwd).unwrap(), "zoommtg://zoom.us/join?confno=555");
    }

    #[test]
    fn test_zoom_uri_needs_a_number() {
        assert!(zoom_launch_uri(&meeting(Some("https://zoom.us"), None, None)).is_err());
        assert!(zoom_launch_uri(&meeting(None, Some("123"), None)).is_err());
        assert!(zoom_launch_uri(&meeting(Some("not a url"), None, None)).is_err());
    }

    #[test]
    fn test_webex_args() {
        let m = meeting(Some("https://acme.webex.com/meet/ops"), None, None);
        assert_eq!(webex_launch_args(&m).unwrap(), vec!["https://acme.webex.com/meet/ops"]);
        let r = meeting(None, Some("2514 123 4567"), Some("pw"));
        assert_eq!(webex_launch_args(&r).unwrap(), vec!["25141234567", "pw"]);
        assert!(webex_launch_args(&meeting(None, None, None)).is_err());
    }

    #[test]
    fn test_joiners_by_platform() {
        let joiners = Joiners::from_config(&MeetRecConfig::default());
        assert_eq!(joiners.for_platform(Platform::Zoom).platform(), Platform::Zoom);
        assert_eq!(joiners.for_platform(Platform::Webex).platform(), Platform::Webex);
    }

    #[tokio::test]
    async fn test_missing_layout_hook_is_ok() {
        let control = ClientControl {
            config: PlatformConfig::zoom(),
            wait_timeout: Duration::from_secs(1),
        };
        let m = meeting(None, Some("1"), Some("2"));
        assert!(control.apply_layout(&m).await.is_ok());

        let broken = ClientControl {
            config: PlatformConfig {
                layout_command: Some("/nonexistent/layout-hook".into()),
                ..PlatformConfig::zoom()
            },
            wait_timeout: Duration::from_secs(1),
        };
        assert!(broken.apply_layout(&m).await.is_err());
    }
}
