//! Server lifecycle: start, stop, restart, with bounded restart-on-failure.
//!
//! All functions take exclusive ownership of the instance via `&mut`,
//! which is what makes the registry lock-free: the orchestration run
//! hands each instance to exactly one task at a time.

use crate::instance::ServerInstance;
use crate::logs::capture_child_output;
use crate::state::ServerState;
use devserve_common::{ServerError, ServerResult};
use devserve_health::{await_healthy, ProbeOutcome, WaitResult};
use devserve_process::{
    process_exists, run_pre_start, spawn_server, stop_with_grace, validate_command, SpawnSpec,
};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Lifecycle policy knobs shared by every instance in a run.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum automatic restart attempts per instance. Past the cap
    /// the instance is left `Failed` and surfaced to the caller;
    /// unbounded retry loops hide failures instead of reporting them.
    pub restart_cap: u32,
    /// How long a graceful stop waits before escalating to SIGKILL.
    pub stop_grace: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            restart_cap: 3,
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Start a server, applying its restart-on-failure policy.
///
/// A pre-start failure aborts immediately and leaves the instance
/// `Stopped` (the definition is broken, retrying cannot help). After a
/// spawn, reaching `Unhealthy` or `Failed` schedules another attempt
/// while `restart_on_failure` is set and the restart cap has headroom;
/// exhausting the cap settles the instance at `Failed`.
pub async fn start_server(
    instance: &mut ServerInstance,
    options: &LifecycleOptions,
) -> ServerResult<()> {
    loop {
        let err = match start_once(instance).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        instance.last_error = Some(err.clone());

        let retryable = matches!(
            err,
            ServerError::HealthTimeout { .. }
                | ServerError::UnexpectedExit { .. }
                | ServerError::SpawnFailed { .. }
        );
        if !retryable || !instance.definition().restart_on_failure {
            return Err(err);
        }
        if instance.restart_count >= options.restart_cap {
            warn!(
                "Server '{}' exhausted its restart budget ({} attempts), leaving it failed: {}",
                instance.name(),
                instance.restart_count,
                err
            );
            instance.transition_to(ServerState::Failed)?;
            // last_error keeps the underlying cause for status queries.
            return Err(ServerError::restart_limit(
                instance.name().clone(),
                instance.restart_count,
            ));
        }

        instance.restart_count += 1;
        info!(
            "Restarting server '{}' after failure (attempt {}/{}): {}",
            instance.name(),
            instance.restart_count,
            options.restart_cap,
            err
        );
        reap_leftover(instance, options).await;
    }
}

/// One start attempt: pre-start commands, spawn, startup delay, health
/// polling. Starting an already-`Running` instance is a no-op.
async fn start_once(instance: &mut ServerInstance) -> ServerResult<()> {
    if instance.state() == ServerState::Running {
        return Ok(());
    }

    let definition = instance.definition().clone();
    let name = definition.name.clone();

    // Pre-start failures leave the instance exactly where it was:
    // nothing has been spawned yet.
    run_pre_start(
        name.as_str(),
        &definition.pre_start,
        definition.working_directory.as_deref(),
        &definition.env,
    )
    .await?;

    let argv = definition.argv();
    validate_command(name.as_str(), &argv)?;

    instance.transition_to(ServerState::Starting)?;
    instance.health = ProbeOutcome::Unknown;

    let spec = SpawnSpec {
        name: name.to_string(),
        argv,
        working_directory: definition.working_directory.clone(),
        env: definition.env.clone(),
    };
    let mut child = match spawn_server(&spec) {
        Ok(child) => child,
        Err(err) => {
            instance.transition_to(ServerState::Failed)?;
            return Err(err);
        }
    };

    capture_child_output(name.as_str(), &mut child, &instance.logs);
    instance.pid = child.id();
    instance.started_at = Some(chrono::Utc::now());
    instance.child = Some(child);

    let delay = definition.startup_delay();
    if !delay.is_zero() {
        sleep(delay).await;
    }

    // Fast path for commands that exit immediately: no point burning
    // the whole probe budget on a corpse.
    if let Some(status) = try_reap(instance) {
        instance.transition_to(ServerState::Failed)?;
        instance.child = None;
        return Err(ServerError::unexpected_exit(name, status.code()));
    }

    let policy = definition
        .health_policy()
        .map_err(|e| ServerError::spawn_failed(name.clone(), e.to_string()))?;
    let pid = instance.pid;
    let result = await_healthy(name.as_str(), &policy, || {
        pid.map(|p| process_exists(p).unwrap_or(false))
            .unwrap_or(false)
    })
    .await;

    match result {
        WaitResult::Healthy { .. } => {
            instance.health = ProbeOutcome::Healthy;
            instance.transition_to(ServerState::Running)?;
            Ok(())
        }
        WaitResult::ProcessDied { .. } | WaitResult::Unhealthy { .. } => {
            instance.health = ProbeOutcome::Unhealthy;
            // Distinguish "alive but failing probes" from "exited".
            if let Some(status) = try_reap(instance) {
                instance.transition_to(ServerState::Failed)?;
                instance.child = None;
                Err(ServerError::unexpected_exit(name, status.code()))
            } else {
                instance.transition_to(ServerState::Unhealthy)?;
                Err(ServerError::health_timeout(name, policy.attempts()))
            }
        }
    }
}

/// Stop a server: SIGTERM, bounded grace, SIGKILL escalation, reap.
///
/// Stopping an already-`Stopped` instance is a no-op returning
/// `Stopped`, not an error. A `Failed` instance with no live process is
/// cleaned up to `Stopped`. Failure to reap surfaces `StopTimeout`.
pub async fn stop_server(
    instance: &mut ServerInstance,
    options: &LifecycleOptions,
) -> ServerResult<ServerState> {
    let name = instance.name().clone();

    match instance.state() {
        ServerState::Stopped => return Ok(ServerState::Stopped),
        ServerState::Failed if instance.child.is_none() => {
            instance.transition_to(ServerState::Stopped)?;
            instance.health = ProbeOutcome::Unknown;
            return Ok(ServerState::Stopped);
        }
        _ => {}
    }

    instance.transition_to(ServerState::Stopping)?;

    let mut child = match instance.child.take() {
        Some(child) => child,
        None => {
            // Nothing spawned (or already reaped); just settle the state.
            instance.pid = None;
            instance.health = ProbeOutcome::Unknown;
            instance.transition_to(ServerState::Stopped)?;
            return Ok(ServerState::Stopped);
        }
    };

    match stop_with_grace(name.as_str(), &mut child, options.stop_grace).await {
        Ok(status) => {
            info!("Server '{}' stopped ({})", name, status);
            instance.pid = None;
            instance.health = ProbeOutcome::Unknown;
            instance.transition_to(ServerState::Stopped)?;
            Ok(ServerState::Stopped)
        }
        Err(err) => {
            // The process is still out there; keep the handle so a
            // later stop can try again, and do not pretend we stopped.
            instance.child = Some(child);
            instance.last_error = Some(err.clone());
            instance.transition_to(ServerState::Failed)?;
            Err(err)
        }
    }
}

/// Restart as one logical operation: a stop that fails to reap fails
/// the restart rather than leaving two processes alive.
pub async fn restart_server(
    instance: &mut ServerInstance,
    options: &LifecycleOptions,
) -> ServerResult<()> {
    stop_server(instance, options).await?;
    instance.last_error = None;
    start_server(instance, options).await
}

/// Detect a process that exited while the instance was `Running`.
///
/// Non-blocking; used by status queries so a long-lived orchestrator
/// notices crashes without a monitor daemon.
pub fn refresh_liveness(instance: &mut ServerInstance) {
    if instance.state() != ServerState::Running {
        return;
    }
    if let Some(status) = try_reap(instance) {
        warn!(
            "Server '{}' exited unexpectedly ({})",
            instance.name(),
            status
        );
        instance.child = None;
        instance.pid = None;
        instance.health = ProbeOutcome::Unhealthy;
        instance.last_error = Some(ServerError::unexpected_exit(
            instance.name().clone(),
            status.code(),
        ));
        // Transition from Running is always valid here.
        let _ = instance.transition_to(ServerState::Failed);
    }
}

/// Non-blocking reap attempt; `Some(status)` if the process has exited.
fn try_reap(instance: &mut ServerInstance) -> Option<std::process::ExitStatus> {
    match instance.child.as_mut() {
        Some(child) => child.try_wait().ok().flatten(),
        None => None,
    }
}

/// Kill and reap whatever is left of a failed attempt before retrying.
async fn reap_leftover(instance: &mut ServerInstance, options: &LifecycleOptions) {
    if let Some(mut child) = instance.child.take() {
        if let Err(err) = stop_with_grace(instance.name().as_str(), &mut child, options.stop_grace).await
        {
            warn!(
                "Could not reap server '{}' before restart: {}",
                instance.name(),
                err
            );
        }
    }
    instance.pid = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerFile;
    use std::sync::Arc;

    fn instance_from(yaml: &str) -> ServerInstance {
        let file = ServerFile::load_from_string(yaml).unwrap();
        ServerInstance::new(Arc::new(file.servers.into_iter().next().unwrap()))
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let mut instance = instance_from(
            r#"
servers:
  - name: worker
    command: "exec sleep 30"
"#,
        );
        let options = LifecycleOptions::default();

        start_server(&mut instance, &options).await.unwrap();
        assert_eq!(instance.state(), ServerState::Running);
        assert!(instance.pid.is_some());

        let state = stop_server(&mut instance, &options).await.unwrap();
        assert_eq!(state, ServerState::Stopped);
        assert!(instance.pid.is_none());
    }

    #[tokio::test]
    async fn test_start_running_is_noop() {
        let mut instance = instance_from(
            r#"
servers:
  - name: worker
    command: "exec sleep 30"
"#,
        );
        let options = LifecycleOptions::default();

        start_server(&mut instance, &options).await.unwrap();
        let pid = instance.pid;
        start_server(&mut instance, &options).await.unwrap();
        assert_eq!(instance.pid, pid);

        stop_server(&mut instance, &options).await.unwrap();
    }

    #[tokio::test]
    async fn test_pre_start_failure_leaves_stopped() {
        let mut instance = instance_from(
            r#"
servers:
  - name: worker
    command: "exec sleep 30"
    pre_start: ["exit 9"]
"#,
        );
        let err = start_server(&mut instance, &LifecycleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::PreStartFailed { .. }));
        assert_eq!(instance.state(), ServerState::Stopped);
        assert!(instance.child.is_none());
    }

    #[tokio::test]
    async fn test_immediate_exit_is_failed_not_unhealthy() {
        let mut instance = instance_from(
            r#"
servers:
  - name: worker
    command: "exit 2"
    startup_delay: 100ms
"#,
        );
        let err = start_server(&mut instance, &LifecycleOptions::default())
            .await
            .unwrap_err();
        match err {
            ServerError::UnexpectedExit { exit_code, .. } => assert_eq!(exit_code, Some(2)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(instance.state(), ServerState::Failed);
    }

    #[tokio::test]
    async fn test_stop_stopped_is_noop() {
        let mut instance = instance_from(
            r#"
servers:
  - name: worker
    command: "exec sleep 30"
"#,
        );
        let state = stop_server(&mut instance, &LifecycleOptions::default())
            .await
            .unwrap();
        assert_eq!(state, ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_cap_bounds_attempts() {
        let mut instance = instance_from(
            r#"
servers:
  - name: flaky
    command: "exit 1"
    startup_delay: 50ms
    restart_on_failure: true
"#,
        );
        let options = LifecycleOptions {
            restart_cap: 2,
            ..Default::default()
        };
        start_server(&mut instance, &options).await.unwrap_err();
        assert_eq!(instance.state(), ServerState::Failed);
        assert_eq!(instance.restart_count, 2);
    }
}
