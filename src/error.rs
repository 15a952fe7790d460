//! Typed error hierarchy for the coordination core.

/// Every error the core can surface, grouped the way the request/response
/// and peer-RPC handlers need to react to them.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A request was missing a required field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A uniqueness invariant was violated (user/channel already exists).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced user or channel does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A peer RPC did not respond within its deadline.
    #[error("peer RPC to {peer} timed out after {millis}ms")]
    Timeout { peer: String, millis: u64 },

    /// The reference service could not be reached.
    #[error("reference unavailable: {0}")]
    Unavailable(String),

    /// Anything else. Logged, never surfaced as a crash.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => CoreError::Timeout {
                peer: "unknown".into(),
                millis: 0,
            },
            _ => CoreError::Internal(e.to_string()),
        }
    }
}

impl From<rmp_serde::encode::Error> for CoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CoreError::Protocol(format!("encode: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for CoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CoreError::Protocol(format!("decode: {e}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(format!("json: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
