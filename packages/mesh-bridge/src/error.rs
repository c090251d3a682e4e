//! Error types for the mesh bridge.
//!
//! Configuration errors are fatal at startup. Transport errors are caught at
//! the send-queue or handler boundary and logged; they never take down the
//! relay. Authorization failures and rate-limit denials are ordinary outcomes
//! and do not appear here.

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the bridge.
#[derive(Error, Debug)]
pub enum Error {
    // ── Startup ──────────────────────────────────────────────────────────

    /// The configuration is missing a required value or holds an invalid one.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Mesh transport ───────────────────────────────────────────────────

    /// No radio gateway is attached to the mesh link.
    #[error("Mesh gateway is not connected")]
    MeshNotConnected,

    /// The gateway did not acknowledge a command in time.
    #[error("Mesh gateway did not acknowledge command {0}")]
    MeshTimeout(String),

    /// The gateway answered a command with an error.
    #[error("Mesh gateway rejected command: {0}")]
    MeshRejected(String),

    // ── Chat transport ───────────────────────────────────────────────────

    /// Discord answered a REST call with a non-success status.
    #[error("Discord API error ({status}): {message}")]
    Discord { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Discord gateway connection failed or violated the protocol.
    #[error("Discord gateway error: {0}")]
    Gateway(String),

    // ── Internal ─────────────────────────────────────────────────────────

    /// The send-queue worker has shut down.
    #[error("Send queue is closed")]
    QueueClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Gateway(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::Config("DISCORD_TOKEN is required".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: DISCORD_TOKEN is required"
        );

        let err = Error::Discord {
            status: 403,
            message: "Missing Access".to_string(),
        };
        assert_eq!(err.to_string(), "Discord API error (403): Missing Access");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
