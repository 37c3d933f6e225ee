//! Bidirectional byte relay.
//!
//! Both directions are copied concurrently. The session ends with whichever
//! direction terminates first (EOF or error); both write sides are then shut
//! down, which unblocks the peers of the direction still in flight. Data that
//! direction had not yet delivered is dropped.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copy direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => f.write_str("client->upstream"),
            Direction::UpstreamToClient => f.write_str("upstream->client"),
        }
    }
}

/// How a relay session ended.
#[derive(Debug)]
pub struct RelayOutcome {
    /// The direction whose termination ended the session.
    pub direction: Direction,
    /// Bytes that direction copied.
    pub bytes: u64,
    /// Set when the direction ended with an I/O error rather than EOF.
    pub error: Option<io::Error>,
}

impl RelayOutcome {
    fn new(direction: Direction, result: io::Result<u64>) -> Self {
        match result {
            Ok(bytes) => Self {
                direction,
                bytes,
                error: None,
            },
            Err(error) => Self {
                direction,
                bytes: 0,
                error: Some(error),
            },
        }
    }
}

/// Relay between a client and an upstream until either direction ends.
pub async fn relay<CR, CW, UR, UW>(
    mut client_rx: CR,
    mut client_tx: CW,
    mut upstream_rx: UR,
    mut upstream_tx: UW,
) -> RelayOutcome
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    UR: AsyncRead + Unpin,
    UW: AsyncWrite + Unpin,
{
    let outcome = tokio::select! {
        result = tokio::io::copy(&mut client_rx, &mut upstream_tx) => {
            RelayOutcome::new(Direction::ClientToUpstream, result)
        }
        result = tokio::io::copy(&mut upstream_rx, &mut client_tx) => {
            RelayOutcome::new(Direction::UpstreamToClient, result)
        }
    };

    let _ = upstream_tx.shutdown().await;
    let _ = client_tx.shutdown().await;

    outcome
}
