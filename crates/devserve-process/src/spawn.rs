//! Spawning server processes and running pre-start commands.

use devserve_common::{ServerError, ServerResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Everything needed to launch one server process.
///
/// `argv` must be non-empty; `argv[0]` is the executable. `env` is merged
/// over the inherited process environment, not a replacement for it.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub name: String,
    pub argv: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// Spawn the server's main command with stdout/stderr piped.
///
/// The returned [`Child`] is exclusively owned by the caller, which is
/// responsible for reaping it on stop or failure.
pub fn spawn_server(spec: &SpawnSpec) -> ServerResult<Child> {
    let program = spec
        .argv
        .first()
        .ok_or_else(|| ServerError::spawn_failed(spec.name.as_str(), "empty command"))?;

    let mut command = Command::new(program);
    command
        .args(&spec.argv[1..])
        .envs(&spec.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    if let Some(ref dir) = spec.working_directory {
        command.current_dir(dir);
    }

    let child = command
        .spawn()
        .map_err(|e| ServerError::spawn_failed(spec.name.as_str(), e.to_string()))?;

    info!(
        "Spawned server '{}' (pid {:?}): {}",
        spec.name,
        child.id(),
        spec.argv.join(" ")
    );

    Ok(child)
}

/// Run pre-start shell commands sequentially in the given directory.
///
/// Each command is run via `sh -c` and awaited to completion. The first
/// non-zero exit aborts with [`ServerError::PreStartFailed`]; remaining
/// commands are not run.
pub async fn run_pre_start(
    name: &str,
    commands: &[String],
    working_directory: Option<&Path>,
    env: &HashMap<String, String>,
) -> ServerResult<()> {
    for command_line in commands {
        debug!("Running pre-start command for '{}': {}", name, command_line);

        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line).envs(env);
        if let Some(dir) = working_directory {
            command.current_dir(dir);
        }

        let status = command
            .status()
            .await
            .map_err(|e| ServerError::spawn_failed(name, format!("pre-start: {}", e)))?;

        if !status.success() {
            return Err(ServerError::pre_start_failed(
                name,
                command_line.as_str(),
                status.code(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(argv: &[&str]) -> SpawnSpec {
        SpawnSpec {
            name: "test".to_string(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            working_directory: None,
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_spawn_and_reap() {
        let mut child = spawn_server(&spec(&["sh", "-c", "exit 0"])).unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = spawn_server(&spec(&["definitely-not-a-real-binary-48151"])).unwrap_err();
        assert!(matches!(err, ServerError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_spawn_empty_command() {
        let err = spawn_server(&spec(&[])).unwrap_err();
        assert!(matches!(err, ServerError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_pre_start_success_then_failure() {
        let env = HashMap::new();
        run_pre_start("test", &["true".to_string()], None, &env)
            .await
            .unwrap();

        let err = run_pre_start(
            "test",
            &["true".to_string(), "exit 3".to_string()],
            None,
            &env,
        )
        .await
        .unwrap_err();
        match err {
            ServerError::PreStartFailed {
                command, exit_code, ..
            } => {
                assert_eq!(command, "exit 3");
                assert_eq!(exit_code, Some(3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_env_is_merged() {
        let mut env = HashMap::new();
        env.insert("DEVSERVE_TEST_VAR".to_string(), "42".to_string());
        // PATH is inherited, so `sh` resolves even though env only has one entry.
        run_pre_start(
            "test",
            &["test \"$DEVSERVE_TEST_VAR\" = 42".to_string()],
            None,
            &env,
        )
        .await
        .unwrap();
    }
}
