//! # devserve-health
//!
//! Health-check policies and probes for the devserve orchestrator.
//!
//! A probe is one bounded attempt (TCP connect, HTTP request, or a
//! liveness-only check). [`await_healthy`] runs the polling sequence a
//! lifecycle manager uses to gate dependents: up to `retries + 1` probes
//! spaced `interval` apart, each bounded by `timeout`. The total wait is
//! therefore bounded by `(retries + 1) * (timeout + interval)`, which is
//! the contract callers use to size their own timeouts.

pub mod http;
pub mod poll;
pub mod tcp;

pub use poll::{await_healthy, WaitResult};

use std::fmt;
use std::time::Duration;

/// Outcome of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe succeeded.
    Healthy,
    /// The probe failed (refused, timed out, or non-2xx).
    Unhealthy,
    /// No probe has run yet.
    Unknown,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Healthy => write!(f, "healthy"),
            ProbeOutcome::Unhealthy => write!(f, "unhealthy"),
            ProbeOutcome::Unknown => write!(f, "unknown"),
        }
    }
}

/// What kind of probe a policy performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheckKind {
    /// TCP connect to `host:port`.
    Tcp,
    /// HTTP request; any 2xx status is healthy.
    Http,
    /// No probe; healthy as long as the process is alive.
    None,
}

impl fmt::Display for HealthCheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckKind::Tcp => write!(f, "tcp"),
            HealthCheckKind::Http => write!(f, "http"),
            HealthCheckKind::None => write!(f, "none"),
        }
    }
}

/// Normalized health-check policy.
///
/// Config loading resolves every accepted representation (bare string
/// shorthand or structured mapping) into this one shape, so nothing
/// downstream branches on how the check was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckPolicy {
    pub kind: HealthCheckKind,
    /// `host:port` for TCP, a URL for HTTP, unused for `None`.
    pub target: String,
    /// Bound on each individual probe.
    pub timeout: Duration,
    /// Additional attempts after the first.
    pub retries: u32,
    /// Wait between attempts.
    pub interval: Duration,
}

impl HealthCheckPolicy {
    /// Liveness-only policy: healthy once the process is observed alive.
    pub fn liveness_only() -> Self {
        Self {
            kind: HealthCheckKind::None,
            target: String::new(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            retries: DEFAULT_PROBE_RETRIES,
            interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    /// Total number of probe attempts the polling loop will make.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Upper bound on the total polling duration.
    pub fn budget(&self) -> Duration {
        (self.timeout + self.interval) * self.attempts()
    }
}

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PROBE_RETRIES: u32 = 2;

/// Run a single probe for the given policy.
///
/// `process_alive` reports whether the server process is still running;
/// it is the whole check for [`HealthCheckKind::None`] and a
/// short-circuit for the others (a dead process can never become
/// healthy).
pub async fn probe(policy: &HealthCheckPolicy, process_alive: bool) -> ProbeOutcome {
    if !process_alive {
        return ProbeOutcome::Unhealthy;
    }

    match policy.kind {
        HealthCheckKind::None => ProbeOutcome::Healthy,
        HealthCheckKind::Tcp => tcp::check_tcp(&policy.target, policy.timeout).await,
        HealthCheckKind::Http => http::check_http(&policy.target, policy.timeout).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polling_budget_is_bounded() {
        let policy = HealthCheckPolicy {
            kind: HealthCheckKind::Tcp,
            target: "localhost:1".to_string(),
            timeout: Duration::from_millis(100),
            retries: 3,
            interval: Duration::from_millis(50),
        };
        assert_eq!(policy.attempts(), 4);
        assert_eq!(policy.budget(), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_liveness_only_probe() {
        let policy = HealthCheckPolicy::liveness_only();
        assert_eq!(probe(&policy, true).await, ProbeOutcome::Healthy);
        assert_eq!(probe(&policy, false).await, ProbeOutcome::Unhealthy);
    }
}
