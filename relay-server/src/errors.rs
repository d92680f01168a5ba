//! Structured error kinds for the relay's own fallible paths (§7). The
//! codec's own decode failures live in `protocol::PacketError`; this is the
//! relay-level superset that also covers policy and liveness outcomes,
//! following the protocol crate's `thiserror` precedent.

use protocol::DisconnectReason;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A malformed datagram; log and continue serving other connections.
    #[error("malformed packet from {0}: {1}")]
    Malformed(std::net::SocketAddr, protocol::PacketError),

    /// A client violated the protocol in a way that warrants disconnecting
    /// it with a structured, client-renderable reason.
    #[error("protocol violation by {0}: {1}")]
    ProtocolViolation(std::net::SocketAddr, DisconnectReason),

    /// A configured mod/version policy was not satisfied.
    #[error("policy violation by {0}: {1}")]
    PolicyViolation(std::net::SocketAddr, DisconnectReason),

    /// The connection failed the liveness check (§4.2); disconnect silently.
    #[error("liveness failure for {0}")]
    LivenessFailure(std::net::SocketAddr),

    /// Sending a datagram failed; drop that one packet and keep serving.
    #[error("transient send error to {0}: {1}")]
    TransientSend(std::net::SocketAddr, std::io::Error),
}

impl RelayError {
    /// The reason, if any, that should be sent to the client before
    /// disconnecting it.
    pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
        match self {
            RelayError::ProtocolViolation(_, reason) | RelayError::PolicyViolation(_, reason) => {
                Some(reason)
            }
            _ => None,
        }
    }
}
