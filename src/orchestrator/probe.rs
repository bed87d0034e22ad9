use std::time::Duration;
use tokio::net::TcpStream;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Is something accepting TCP connections on `host:port`?
///
/// Refusal, timeout, resolution failure and every other error read as `false`.
pub async fn is_open(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn open_port_is_detected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_open("127.0.0.1", port, DEFAULT_PROBE_TIMEOUT).await);
    }

    #[tokio::test]
    async fn closed_port_returns_false_within_bound() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let started = Instant::now();
        assert!(!is_open("127.0.0.1", port, Duration::from_millis(500)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unresolvable_host_is_closed() {
        assert!(!is_open("host.invalid", 80, Duration::from_millis(500)).await);
    }
}
