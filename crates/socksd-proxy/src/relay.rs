//! Bidirectional relay between a client and its upstream.
//!
//! # Termination
//!
//! ```text
//! client --copy--> upstream   (task A) --+
//!                                        +--> done.cancel()  (first call wins)
//! upstream --copy--> client   (task B) --+
//!                                               |
//!                                               v
//!                            supervisor: abort A and B, drop all halves
//! ```
//!
//! Cancelling the token does not interrupt the copy that is still running.
//! The supervisor aborts it, which drops its stream halves and closes both
//! connections.

use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Direction of a single copy within a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// The copy whose source ended (or errored) first.
    pub first_closed: Direction,
}

/// Copy bytes between `client` and `upstream` until either direction ends.
///
/// Returns once both connections have been released. Copy errors are
/// swallowed; the end of either copy, for any reason, ends the relay.
pub async fn relay<C, U>(client: C, upstream: U) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let done = CancellationToken::new();
    let first_closed = Arc::new(OnceLock::new());

    let client_to_upstream = tokio::spawn({
        let done = done.clone();
        let first_closed = Arc::clone(&first_closed);
        async move {
            let _ = tokio::io::copy(&mut client_read, &mut upstream_write).await;
            let _ = first_closed.set(Direction::ClientToUpstream);
            done.cancel();
        }
    });

    let upstream_to_client = tokio::spawn({
        let done = done.clone();
        let first_closed = Arc::clone(&first_closed);
        async move {
            let _ = tokio::io::copy(&mut upstream_read, &mut client_write).await;
            let _ = first_closed.set(Direction::UpstreamToClient);
            done.cancel();
        }
    });

    done.cancelled().await;

    // Dropping the halves held by the still-running copy closes both streams.
    client_to_upstream.abort();
    upstream_to_client.abort();
    let _ = client_to_upstream.await;
    let _ = upstream_to_client.await;

    RelayOutcome {
        first_closed: first_closed
            .get()
            .copied()
            .unwrap_or(Direction::ClientToUpstream),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    const BOUND: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_relay_copies_both_directions() {
        let (mut client, client_side) = duplex(1024);
        let (upstream_side, mut server) = duplex(1024);
        let relay_task = tokio::spawn(relay(client_side, upstream_side));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client);
        let outcome = tokio::time::timeout(BOUND, relay_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.first_closed, Direction::ClientToUpstream);
    }

    #[tokio::test]
    async fn test_client_close_closes_upstream() {
        let (client, client_side) = duplex(1024);
        let (upstream_side, mut server) = duplex(1024);
        let relay_task = tokio::spawn(relay(client_side, upstream_side));

        drop(client);

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(BOUND, server.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "upstream should see EOF");
        tokio::time::timeout(BOUND, relay_task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_upstream_close_closes_client() {
        let (mut client, client_side) = duplex(1024);
        let (upstream_side, server) = duplex(1024);
        let relay_task = tokio::spawn(relay(client_side, upstream_side));

        drop(server);

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(BOUND, client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "client should see EOF");
        let outcome = tokio::time::timeout(BOUND, relay_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.first_closed, Direction::UpstreamToClient);
    }

    #[tokio::test]
    async fn test_relay_ends_with_data_in_flight() {
        // Small buffers so the client -> upstream copy blocks on a full pipe.
        let (mut client, client_side) = duplex(64);
        let (upstream_side, server) = duplex(64);
        let relay_task = tokio::spawn(relay(client_side, upstream_side));

        let writer = tokio::spawn(async move {
            let payload = vec![0xabu8; 1 << 20];
            // Fails once the relay tears the connection down.
            let _ = client.write_all(&payload).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(server);

        tokio::time::timeout(BOUND, relay_task).await.unwrap().unwrap();
        tokio::time::timeout(BOUND, writer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_relay_preserves_large_payload() {
        let (mut client, client_side) = duplex(256);
        let (upstream_side, mut server) = duplex(256);
        let relay_task = tokio::spawn(relay(client_side, upstream_side));

        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let reader = tokio::spawn(async move {
            let mut received = vec![0u8; expected.len()];
            server.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected);
            server
        });

        client.write_all(&payload).await.unwrap();
        let _server = tokio::time::timeout(BOUND, reader).await.unwrap().unwrap();

        drop(client);
        tokio::time::timeout(BOUND, relay_task).await.unwrap().unwrap();
    }
}
