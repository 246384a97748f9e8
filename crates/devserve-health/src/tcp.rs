//! TCP connect health probe.

use crate::ProbeOutcome;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Attempt a TCP connection to `target` (`host:port`).
///
/// A connection established within `probe_timeout` is healthy; refusal,
/// unreachable host, or timeout is unhealthy. The socket is dropped
/// immediately on success; the probe only cares that something accepted.
pub async fn check_tcp(target: &str, probe_timeout: Duration) -> ProbeOutcome {
    match timeout(probe_timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => {
            debug!("TCP probe succeeded: {}", target);
            ProbeOutcome::Healthy
        }
        Ok(Err(e)) => {
            debug!("TCP probe failed: {} - {}", target, e);
            ProbeOutcome::Unhealthy
        }
        Err(_) => {
            debug!("TCP probe timed out: {} ({:?})", target, probe_timeout);
            ProbeOutcome::Unhealthy
        }
    }
}
