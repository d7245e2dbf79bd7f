//! ROAP negotiation error types.
//!
//! Two kinds of failure flow through this crate and they must not be
//! confused:
//!
//! - **Peer-visible protocol errors** are [`ErrorKind`] values carried in
//!   ERROR messages. They are answers, not Rust errors, and never surface
//!   through [`RoapError`] unless they end a negotiation.
//! - **Local errors** ([`RoapError`]) are returned to the host: malformed
//!   input, misuse of the coordinator, or the terminal outcome of a
//!   negotiation the host was awaiting.

use thiserror::Error;

use crate::protocol::ErrorKind;

/// ROAP engine errors.
#[derive(Error, Debug)]
pub enum RoapError {
    /// `initiate_offer` called again before the first offer round trip
    /// completed.
    #[error("Negotiation already in progress")]
    NegotiationInProgress,

    /// Message is structurally invalid (missing SDP, unknown kind, ...).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The media transport failed to create or apply a description.
    #[error("Media transport error: {0}")]
    Transport(String),

    /// The peer ended the negotiation with a non-recoverable error.
    #[error("Remote peer reported {0}")]
    Remote(ErrorKind),

    /// Session was closed before the operation settled.
    #[error("Session closed")]
    SessionClosed,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ROAP operations
pub type Result<T> = std::result::Result<T, RoapError>;
