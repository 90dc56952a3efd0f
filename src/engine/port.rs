//! Free-port discovery for engines that take their listen port on the command line.
//!
//! A port counts as taken when a TCP connect to it on loopback succeeds. The answer
//! is advisory: another process may grab the port before the engine binds it.

use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Whether something is accepting connections on `port` locally.
pub async fn is_port_in_use(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// First port in `range` with no listener, or `None` when every port answers.
pub async fn find_free_port(range: RangeInclusive<u16>) -> Option<u16> {
    for port in range {
        if port == 0 {
            continue;
        }
        if !is_port_in_use(port).await {
            debug!(port, "found free port");
            return Some(port);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn bind_any() -> (TcpListener, u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_listening_port_is_in_use() {
        let (_listener, port) = bind_any().await;
        assert!(is_port_in_use(port).await);
    }

    #[tokio::test]
    async fn test_released_port_is_free() {
        let (listener, port) = bind_any().await;
        drop(listener);
        assert!(!is_port_in_use(port).await);
        assert_eq!(find_free_port(port..=port).await, Some(port));
    }

    #[tokio::test]
    async fn test_fully_occupied_range_returns_none() {
        let (_listener, port) = bind_any().await;
        assert_eq!(find_free_port(port..=port).await, None);
    }

    #[tokio::test]
    async fn test_skips_occupied_port() {
        let (_busy, busy_port) = bind_any().await;
        let next = busy_port.checked_add(1).unwrap();
        let result = find_free_port(busy_port..=next).await;
        // `next` may itself be taken by an unrelated process.
        assert_ne!(result, Some(busy_port));
    }
}
