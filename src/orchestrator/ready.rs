use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::model::SupervisorConfig;
use crate::orchestrator::launcher::ProcessHandle;
use crate::orchestrator::probe;

/// Outcome of waiting for a launched service to open its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The process ended first.
    Exited(Option<i32>),
    TimedOut,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    pub host: String,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

impl ReadinessPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            host: "localhost".to_string(),
            poll_interval: config.poll_interval(),
            probe_timeout: config.probe_timeout(),
            timeout: config.readiness_timeout(),
        }
    }
}

/// Poll until the port opens, the process exits, or `policy.timeout` elapses.
///
/// Exit is checked before the port on every round.
pub async fn wait_until_ready(
    handle: &ProcessHandle,
    service: &str,
    port: u16,
    policy: &ReadinessPolicy,
) -> Readiness {
    let deadline = Instant::now() + policy.timeout;
    let mut polls = 0u32;

    loop {
        if let Some(exit) = handle.exit() {
            debug!(service, pid = handle.pid(), code = ?exit.code, "exited while waiting for port");
            return Readiness::Exited(exit.code);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Readiness::TimedOut;
        }

        polls += 1;
        if probe::is_open(&policy.host, port, policy.probe_timeout.min(remaining)).await {
            debug!(service, port, polls, "port is open");
            return Readiness::Ready;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(policy.poll_interval.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::launcher::{watch_child, ProcessObserver};
    use crate::platform::{self, test_commands};
    use std::process::Stdio;

    fn policy(timeout: Duration) -> ReadinessPolicy {
        ReadinessPolicy {
            host: "127.0.0.1".to_string(),
            poll_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(200),
            timeout,
        }
    }

    fn spawn(command: &str) -> ProcessHandle {
        let mut cmd = test_commands::shell(command);
        cmd.stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);
        platform::configure_process_group(&mut cmd);
        watch_child(cmd.spawn().unwrap(), "svc", ProcessObserver::noop(), Duration::ZERO).unwrap()
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn defaults_follow_supervisor_config() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_millis(500));
        assert_eq!(policy.timeout, Duration::from_secs(60));
        assert!(Readiness::Ready.is_ready());
        assert!(!Readiness::TimedOut.is_ready());
    }

    #[tokio::test]
    async fn ready_once_port_opens() {
        let handle = spawn(test_commands::sleep_long());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = wait_until_ready(&handle, "svc", port, &policy(Duration::from_secs(5))).await;
        assert_eq!(outcome, Readiness::Ready);
        handle.kill().await;
    }

    #[tokio::test]
    async fn times_out_when_port_never_opens() {
        let handle = spawn(test_commands::sleep_long());
        let started = Instant::now();

        let outcome =
            wait_until_ready(&handle, "svc", free_port(), &policy(Duration::from_millis(400))).await;
        assert_eq!(outcome, Readiness::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3));
        handle.kill().await;
    }

    #[tokio::test]
    async fn exit_wins_over_waiting() {
        let mut handle = spawn(test_commands::exit_failure());
        handle.wait().await;

        let outcome = wait_until_ready(&handle, "svc", free_port(), &policy(Duration::from_secs(5))).await;
        assert_eq!(outcome, Readiness::Exited(Some(3)));
    }
}
