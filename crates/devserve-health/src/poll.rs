//! Bounded health polling loop.

use crate::{probe, HealthCheckPolicy, ProbeOutcome};
use tokio::time::sleep;
use tracing::{debug, info};

/// Terminal result of one polling sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A probe succeeded after `attempts` attempts.
    Healthy { attempts: u32 },
    /// All `attempts` probes failed while the process stayed alive.
    Unhealthy { attempts: u32 },
    /// The process died before any probe succeeded.
    ProcessDied { attempts: u32 },
}

/// Poll until the server becomes healthy or the retry budget runs out.
///
/// Probes up to `retries + 1` times, sleeping `interval` between
/// attempts. The first healthy probe short-circuits. If `is_alive`
/// reports the process dead, the loop stops early; probing a corpse
/// cannot succeed and would only burn the caller's time budget.
///
/// The caller is expected to have already waited any configured
/// startup delay before invoking this.
pub async fn await_healthy<F>(name: &str, policy: &HealthCheckPolicy, is_alive: F) -> WaitResult
where
    F: Fn() -> bool,
{
    let total = policy.attempts();

    for attempt in 1..=total {
        let alive = is_alive();
        if !alive {
            debug!(
                "Server '{}' died during health polling (attempt {}/{})",
                name, attempt, total
            );
            return WaitResult::ProcessDied { attempts: attempt };
        }

        match probe(policy, alive).await {
            ProbeOutcome::Healthy => {
                info!(
                    "Server '{}' healthy after {} probe attempt(s)",
                    name, attempt
                );
                return WaitResult::Healthy { attempts: attempt };
            }
            outcome => {
                debug!(
                    "Probe {}/{} for '{}' returned {} ({} {})",
                    attempt, total, name, outcome, policy.kind, policy.target
                );
            }
        }

        if attempt < total {
            sleep(policy.interval).await;
        }
    }

    WaitResult::Unhealthy { attempts: total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HealthCheckKind;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    fn tcp_policy(target: String, retries: u32) -> HealthCheckPolicy {
        HealthCheckPolicy {
            kind: HealthCheckKind::Tcp,
            target,
            timeout: Duration::from_millis(200),
            retries,
            interval: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_first_healthy_short_circuits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // Keep accepting so every probe connects.
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let result = await_healthy("test", &tcp_policy(addr, 5), || true).await;
        assert_eq!(result, WaitResult::Healthy { attempts: 1 });
    }

    #[tokio::test]
    async fn test_exhausts_exactly_retries_plus_one() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let policy = tcp_policy(addr, 2);
        let started = Instant::now();
        let result = await_healthy("test", &policy, || true).await;
        assert_eq!(result, WaitResult::Unhealthy { attempts: 3 });
        // Bounded total duration, per the polling contract.
        assert!(started.elapsed() <= policy.budget() + Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_dead_process_stops_polling() {
        let result = await_healthy(
            "test",
            &tcp_policy("127.0.0.1:1".to_string(), 10),
            || false,
        )
        .await;
        assert_eq!(result, WaitResult::ProcessDied { attempts: 1 });
    }
}
