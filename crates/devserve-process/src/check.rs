//! Process liveness checking.

use devserve_common::{ServerError, ServerResult};

/// Check whether a process with the given PID exists and is running.
///
/// Non-destructive: on Unix this sends signal 0, which delivers nothing
/// but reports whether the target exists. A process we lack permission
/// to signal still counts as alive.
pub fn process_exists(pid: u32) -> ServerResult<bool> {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => Ok(false),
            Err(nix::errno::Errno::EPERM) => Ok(true),
            Err(e) => Err(ServerError::invalid_state(
                pid.to_string(),
                "checkable process",
                format!("liveness check failed: {}", e),
            )),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(ServerError::invalid_state(
            pid.to_string(),
            "unix host",
            "PID liveness checks are only supported on Unix",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_current_process_exists() {
        assert!(process_exists(std::process::id()).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_nonexistent_process() {
        // PIDs this high are effectively never allocated on Linux defaults.
        assert!(!process_exists(9_999_999).unwrap());
    }
}
