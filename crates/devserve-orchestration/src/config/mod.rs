//! Typed configuration for one scope's server definitions.
//!
//! A scope is one repository session (or one repository inside a
//! workspace); its servers live in a single YAML document, by convention
//! `.devserve.yaml` at the worktree root. Loading normalizes every
//! accepted shorthand (string commands, bare-string health checks) into
//! one shape so nothing downstream branches on representation.

use anyhow::{Context, Result};
use devserve_common::{ConfigError, ConfigResult, ServerName};
use devserve_health::{
    HealthCheckKind, HealthCheckPolicy, DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_RETRIES,
    DEFAULT_PROBE_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod validation;

/// Top-level server file for one scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFile {
    pub servers: Vec<ServerDefinition>,
}

/// One declarative server definition, immutable for the duration of an
/// orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub name: ServerName,

    pub command: CommandSpec,

    /// Relative to the worktree root the orchestrator was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Informational / health-probe target; exclusivity is not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Merged over the inherited process environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub depends_on: Vec<ServerName>,

    /// Excluded from "start all" when false, unless explicitly named.
    #[serde(default = "default_true")]
    pub auto_start: bool,

    #[serde(default)]
    pub restart_on_failure: bool,

    /// Wait after spawn before the first health probe.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_serde"
    )]
    pub startup_delay: Option<Duration>,

    /// Shell commands run sequentially, in the working directory, before
    /// the main command is spawned.
    #[serde(default)]
    pub pre_start: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
}

/// A command as written in YAML: either one shell string or an argv.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Run via `sh -c`.
    Shell(String),
    /// Run directly, first element is the executable.
    Argv(Vec<String>),
}

/// A health check as written in YAML: bare-string shorthand or a
/// structured mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HealthCheckSpec {
    /// `"tcp"`, `"http"`, `"none"`, a URL, or a `host:port` target.
    Shorthand(String),
    Structured(HealthCheckOptions),
}

/// Structured health-check options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckOptions {
    #[serde(rename = "type")]
    pub kind: String,

    /// `host:port` for tcp, URL for http. Defaults from `port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub timeout: Duration,

    #[serde(default = "default_probe_retries")]
    pub retries: u32,

    #[serde(default = "default_probe_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl ServerDefinition {
    /// The spawn argv: a shell string becomes `sh -c <string>`.
    pub fn argv(&self) -> Vec<String> {
        match &self.command {
            CommandSpec::Shell(line) => {
                vec!["sh".to_string(), "-c".to_string(), line.clone()]
            }
            CommandSpec::Argv(argv) => argv.clone(),
        }
    }

    /// Startup delay, defaulting to zero.
    pub fn startup_delay(&self) -> Duration {
        self.startup_delay.unwrap_or(Duration::ZERO)
    }

    /// Resolve the health check into the normalized policy.
    ///
    /// A definition with no health check (or `"none"`) gets the
    /// liveness-only policy. Shorthand kinds without an explicit target
    /// derive one from `port`; missing both is a config error surfaced
    /// here (and by validation, before anything spawns).
    pub fn health_policy(&self) -> ConfigResult<HealthCheckPolicy> {
        let spec = match &self.health_check {
            None => return Ok(HealthCheckPolicy::liveness_only()),
            Some(spec) => spec,
        };

        let (kind_str, target, timeout, retries, interval) = match spec {
            HealthCheckSpec::Shorthand(s) => {
                let s = s.trim();
                if s.starts_with("http://") || s.starts_with("https://") {
                    (
                        "http".to_string(),
                        Some(s.to_string()),
                        DEFAULT_PROBE_TIMEOUT,
                        DEFAULT_PROBE_RETRIES,
                        DEFAULT_PROBE_INTERVAL,
                    )
                } else if s.contains(':') {
                    (
                        "tcp".to_string(),
                        Some(s.to_string()),
                        DEFAULT_PROBE_TIMEOUT,
                        DEFAULT_PROBE_RETRIES,
                        DEFAULT_PROBE_INTERVAL,
                    )
                } else {
                    (
                        s.to_lowercase(),
                        None,
                        DEFAULT_PROBE_TIMEOUT,
                        DEFAULT_PROBE_RETRIES,
                        DEFAULT_PROBE_INTERVAL,
                    )
                }
            }
            HealthCheckSpec::Structured(opts) => (
                opts.kind.to_lowercase(),
                opts.target.clone(),
                opts.timeout,
                opts.retries,
                opts.interval,
            ),
        };

        let kind = match kind_str.as_str() {
            "tcp" => HealthCheckKind::Tcp,
            "http" => HealthCheckKind::Http,
            "none" => {
                return Ok(HealthCheckPolicy {
                    kind: HealthCheckKind::None,
                    target: String::new(),
                    timeout,
                    retries,
                    interval,
                })
            }
            other => {
                return Err(ConfigError::invalid(format!(
                    "server '{}': unknown health check type '{}' (expected tcp, http, or none)",
                    self.name, other
                )))
            }
        };

        let target = match (target, self.port, kind) {
            (Some(t), _, _) => t,
            (None, Some(port), HealthCheckKind::Tcp) => format!("localhost:{}", port),
            (None, Some(port), HealthCheckKind::Http) => {
                format!("http://localhost:{}/", port)
            }
            (None, None, _) => {
                return Err(ConfigError::invalid(format!(
                    "server '{}': {} health check needs a target or a port",
                    self.name, kind
                )))
            }
            // None kind returned above.
            (None, Some(_), HealthCheckKind::None) => unreachable!(),
        };

        Ok(HealthCheckPolicy {
            kind,
            target,
            timeout,
            retries,
            interval,
        })
    }
}

impl ServerFile {
    /// Load and validate a server file from disk.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read server file: {}", path.as_ref().display()))?;
        Self::load_from_string(&content)
    }

    /// Load and validate a server file from a YAML string.
    pub fn load_from_string(content: &str) -> Result<Self> {
        let file: ServerFile =
            serde_yaml::from_str(content).context("Failed to parse YAML server file")?;
        validation::validate_definitions(&file.servers)?;
        Ok(file)
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

fn default_probe_retries() -> u32 {
    DEFAULT_PROBE_RETRIES
}

fn default_probe_interval() -> Duration {
    DEFAULT_PROBE_INTERVAL
}

// Human-readable duration (de)serialization: "250ms", "5s", "1m".
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", millis / 1000))
        } else {
            serializer.serialize_str(&format!("{}ms", millis))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        // "ms" must be checked before "s" since it also ends with 's'.
        if let Some(num) = s.strip_suffix("ms") {
            let millis: u64 = num
                .parse()
                .map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num) = s.strip_suffix('s') {
            let secs: u64 = num
                .parse()
                .map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num
                .parse()
                .map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(mins * 60))
        } else {
            Err(format!("Duration must end with 'ms', 's', or 'm': {}", s))
        }
    }
}

pub(crate) mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::duration_serde::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => super::duration_serde::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
