//! Media transport contract.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// Boxed future returned by [`MediaTransport`] operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Session description produced by the local media stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDescription {
    /// SDP text
    pub sdp: String,
}

impl LocalDescription {
    /// Wrap an SDP string.
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// The media stack a negotiation drives.
///
/// ICE gathering, codec selection and DTLS all happen behind these three
/// calls. The coordinator never has more than one of them outstanding.
pub trait MediaTransport: Send + Sync {
    /// Generate a local offer.
    fn create_local_offer(&self) -> TransportFuture<'_, LocalDescription>;

    /// Apply a remote offer and return the local answer.
    fn apply_remote_offer(&self, sdp: String) -> TransportFuture<'_, LocalDescription>;

    /// Apply a remote answer to the last local offer.
    fn apply_remote_answer(&self, sdp: String) -> TransportFuture<'_, ()>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str {
        "media"
    }
}
