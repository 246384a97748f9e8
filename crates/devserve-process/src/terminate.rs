//! Graceful process termination with bounded escalation.

use devserve_common::{ServerError, ServerResult};
use std::time::Duration;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long to wait for exit after a forced kill before giving up.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Send a graceful termination signal (SIGTERM).
pub fn terminate_gracefully(pid: u32) -> ServerResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| {
            ServerError::invalid_state(pid.to_string(), "running process", e.to_string())
        })
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(ServerError::invalid_state(
            pid.to_string(),
            "unix host",
            "signal-based termination is only supported on Unix",
        ))
    }
}

/// Force-kill a process (SIGKILL).
pub fn force_kill(pid: u32) -> ServerResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGKILL).map_err(|e| {
            ServerError::invalid_state(pid.to_string(), "running process", e.to_string())
        })
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(ServerError::invalid_state(
            pid.to_string(),
            "unix host",
            "signal-based termination is only supported on Unix",
        ))
    }
}

/// Stop a child process: SIGTERM, wait up to `grace`, escalate to
/// SIGKILL, then a short bounded wait to reap.
///
/// Returns the exit status once the process has been reaped. If the
/// process survives even the forced kill (unreapable), returns
/// [`ServerError::StopTimeout`] rather than pretending it stopped.
pub async fn stop_with_grace(
    name: &str,
    child: &mut Child,
    grace: Duration,
) -> ServerResult<std::process::ExitStatus> {
    // The child may already have exited; reap without signalling.
    if let Ok(Some(status)) = child.try_wait() {
        debug!("Server '{}' already exited before stop ({})", name, status);
        return Ok(status);
    }

    let pid = child.id();
    if let Some(pid) = pid {
        terminate_gracefully(pid)?;
        debug!("Sent SIGTERM to '{}' (pid {})", name, pid);
    }

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => return Ok(status),
        Ok(Err(e)) => {
            return Err(ServerError::invalid_state(
                name,
                "reapable process",
                e.to_string(),
            ))
        }
        Err(_) => {
            warn!(
                "Server '{}' did not exit within {:?}, escalating to SIGKILL",
                name, grace
            );
        }
    }

    if let Some(pid) = child.id() {
        force_kill(pid)?;
    }

    match timeout(KILL_REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(e)) => Err(ServerError::invalid_state(
            name,
            "reapable process",
            e.to_string(),
        )),
        Err(_) => Err(ServerError::stop_timeout(name, pid)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::{spawn_server, SpawnSpec};
    use std::collections::HashMap;

    fn sh(script: &str) -> SpawnSpec {
        SpawnSpec {
            name: "test".to_string(),
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            working_directory: None,
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_graceful_stop() {
        let mut child = spawn_server(&sh("sleep 30")).unwrap();
        let status = stop_with_grace("test", &mut child, Duration::from_secs(2))
            .await
            .unwrap();
        // Killed by signal, so no exit code on Unix.
        assert!(!status.success());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_stop_escalates_on_sigterm_ignorer() {
        // `trap '' TERM` makes the shell ignore SIGTERM; SIGKILL must win.
        let mut child = spawn_server(&sh("trap '' TERM; sleep 30 & wait")).unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = stop_with_grace("test", &mut child, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_stop_already_exited() {
        let mut child = spawn_server(&sh("exit 0")).unwrap();
        // Let it exit first.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = stop_with_grace("test", &mut child, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(status.success());
    }
}
