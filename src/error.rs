//! Client error taxonomy.
//!
//! Discovery stages never surface errors directly; they record failure steps
//! and let the engine move on. Everything that reaches a caller goes through
//! [`ClientError`].

use thiserror::Error;

/// Classification of a failed HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request exceeded its deadline.
    Timeout,
    /// The remote host actively refused the connection.
    Refused,
    /// Name resolution failed.
    Dns,
    /// Any other socket or protocol failure.
    Io,
    /// The server answered with a non-success status code.
    HttpStatus(u16),
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Refused => write!(f, "refused"),
            TransportErrorKind::Dns => write!(f, "dns"),
            TransportErrorKind::Io => write!(f, "io"),
            TransportErrorKind::HttpStatus(code) => write!(f, "http status {}", code),
        }
    }
}

/// Errors surfaced by the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A network exchange failed. No retries happen inside the client.
    #[error("transport error ({kind}) for {url}: {message}")]
    Transport {
        kind: TransportErrorKind,
        url: String,
        message: String,
    },

    /// The server answered with a payload the client could not parse.
    #[error("malformed server payload: {0}")]
    Parse(String),

    /// Every enabled discovery stage came up empty.
    #[error("no BetterClock server discovered on local network (port {port})")]
    NoServerDiscovered { port: u16 },

    /// The session was disconnected server-side; reconnect before reuse.
    #[error("client session is disconnected; call reconnect() first")]
    SessionClosed,

    /// A caller-supplied value failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Transport error kind, if this is a transport failure.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            ClientError::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
