//! Process control by executable name: launch, liveness, kill.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use meetrec_core::error::{MeetRecError, Result};
use tokio::process::{Child, Command};

/// Whether a live (non-zombie) process with this image name is running.
pub async fn is_running(name: &str) -> bool {
    let output = if cfg!(windows) {
        Command::new("tasklist")
            .args(["/FI", &format!("IMAGENAME eq {name}"), "/NH"])
            .output()
            .await
    } else {
        Command::new("ps").args(["-eo", "stat=,comm="]).output().await
    };

    match output {
        Ok(o) if cfg!(windows) => String::from_utf8_lossy(&o.stdout)
            .to_lowercase()
            .contains(&name.to_lowercase()),
        Ok(o) => listed_alive(&String::from_utf8_lossy(&o.stdout), name),
        Err(e) => {
            tracing::warn!("⚠️ Process lookup for '{name}' failed: {e}");
            false
        }
    }
}

/// Scan `ps -o stat=,comm=` output for a non-defunct process named `name`.
fn listed_alive(ps: &str, name: &str) -> bool {
    ps.lines().any(|line| {
        let Some((stat, comm)) = line.trim().split_once(char::is_whitespace) else {
            return false;
        };
        let comm = comm.trim();
        let base = comm.rsplit('/').next().unwrap_or(comm);
        !stat.starts_with('Z') && base == name
    })
}

/// Kill every process with this image name. A missing process is not an error.
pub async fn kill(name: &str, force: bool) -> Result<()> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("taskkill");
        c.args(["/IM", name, "/T"]);
        if force {
            c.arg("/F");
        }
        c
    } else {
        let mut c = Command::new("pkill");
        if force {
            c.arg("-9");
        }
        c.args(["-x", name]);
        c
    };

    let output = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await?;
    if output.status.success() {
        tracing::info!("🔪 Killed '{name}'{}", if force { " (forced)" } else { "" });
    } else {
        tracing::debug!("'{name}' not running, nothing to kill");
    }
    Ok(())
}

/// Ask politely, then force after `grace`.
pub async fn terminate(name: &str, grace: Duration) -> Result<()> {
    if !is_running(name).await {
        return Ok(());
    }
    kill(name, false).await?;

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_running(name).await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    kill(name, true).await
}

/// Launch an executable detached, with its own directory as working dir.
/// The child is reaped in the background so a crash never leaves a zombie.
pub fn spawn_detached(path: &str, args: &[String]) -> Result<()> {
    let exe = Path::new(path);
    let mut cmd = Command::new(exe);
    cmd.args(args).stdout(Stdio::null()).stderr(Stdio::null());
    if let Some(dir) = exe.parent().filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }

    let child = cmd
        .spawn()
        .map_err(|e| MeetRecError::Other(format!("Failed to launch '{path}': {e}")))?;
    tracing::info!("🚀 Launched '{path}' (PID {})", child.id().unwrap_or_default());
    reap(child, path.to_string());
    Ok(())
}

/// Hand a URI to the OS opener.
pub fn open_uri(uri: &str) -> Result<()> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", "", uri]);
        c
    } else if cfg!(target_os = "macos") {
        let mut c = Command::new("open");
        c.arg(uri);
        c
    } else {
        let mut c = Command::new("xdg-open");
        c.arg(uri);
        c
    };

    let child = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| MeetRecError::Other(format!("Failed to open URI: {e}")))?;
    reap(child, "URI opener".into());
    Ok(())
}

fn reap(mut child: Child, label: String) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => tracing::debug!("'{label}' exited: {status}"),
            Err(e) => tracing::warn!("⚠️ Waiting on '{label}' failed: {e}"),
        }
    });
}

/// Poll until the process appears or `timeout` elapses.
pub async fn wait_for(name: &str, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if is_running(name).await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(MeetRecError::Timeout(format!(
                "'{name}' did not start within {}s",
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_process_is_not_running() {
        assert!(!is_running("meetrec-no-such-proc").await);
    }

    #[tokio::test]
    async fn test_terminate_missing_process_is_ok() {
        assert!(terminate("meetrec-no-such-proc", Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let err = wait_for("meetrec-no-such-proc", Duration::from_millis(0))
            .await
            .unwrap_err();
        assert!(matches!(err, MeetRecError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_errs() {
        assert!(spawn_detached("/nonexistent/meetrec-bin", &[]).is_err());
    }

    #[test]
    fn test_defunct_entries_are_not_alive() {
        let ps = "Z    obs64\nS    /usr/bin/zoom\nSl   obs\nS    /Applications/Cisco Webex Meetings.app/Contents/MacOS/Webex Meetings\n";
        assert!(!listed_alive(ps, "obs64"));
        assert!(listed_alive(ps, "zoom"));
        assert!(listed_alive(ps, "obs"));
        assert!(listed_alive(ps, "Webex Meetings"));
        assert!(!listed_alive(ps, "webex"));
    }

    /// Copy `sleep` under a unique name so liveness checks only see our child.
    #[cfg(unix)]
    fn renamed_sleep(name: &str) -> String {
        let src = ["/bin/sleep", "/usr/bin/sleep"]
            .into_iter()
            .find(|p| Path::new(p).exists())
            .unwrap();
        let dir = std::env::temp_dir().join(format!("meetrec-proc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dst = dir.join(name);
        std::fs::copy(src, &dst).unwrap();
        dst.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_child_is_reaped() {
        let exe = renamed_sleep("mrexitzz");
        spawn_detached(&exe, &["0.2".into()]).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!is_running("mrexitzz").await);
        terminate("mrexitzz", Duration::from_millis(500)).await.unwrap();
        assert!(!is_running("mrexitzz").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminated_child_is_gone() {
        let exe = renamed_sleep("mrkillzz");
        spawn_detached(&exe, &["30".into()]).unwrap();
        wait_for("mrkillzz", Duration::from_secs(5)).await.unwrap();

        terminate("mrkillzz", Duration::from_secs(3)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!is_running("mrkillzz").await);
    }
}
