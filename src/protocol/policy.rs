//! Retry and glare decisions.
//!
//! Side-effect-free predicates consulted by the state machine guards.
//! Sequence comparisons are always against the session's own counter.

use super::message::{ErrorKind, MessageType};

/// Default number of extra offer attempts after a retryable peer error.
pub const MAX_RETRIES: u32 = 2;

/// Whether a peer error invites us to create a new offer.
pub fn is_retryable(kind: ErrorKind) -> bool {
    match kind {
        ErrorKind::DoubleConflict
        | ErrorKind::InvalidState
        | ErrorKind::OutOfOrder
        | ErrorKind::Retry => true,
        ErrorKind::Conflict
        | ErrorKind::Failed
        | ErrorKind::Refused
        | ErrorKind::Timeout
        | ErrorKind::NoMatch => false,
    }
}

/// Whether an incoming ERROR should restart offer creation.
pub fn should_retry(
    kind: ErrorKind,
    incoming_seq: u64,
    session_seq: u64,
    retry_count: u32,
    max_retries: u32,
) -> bool {
    is_retryable(kind) && incoming_seq == session_seq && retry_count < max_retries
}

/// Pick the reply to a remote offer that collided with our own.
///
/// Identical tie-breakers mean both peers run the same policy and neither
/// can win, which is a deployment error rather than ordinary glare.
pub fn resolve_glare(local_tie_breaker: u32, remote_tie_breaker: Option<u32>) -> ErrorKind {
    if remote_tie_breaker == Some(local_tie_breaker) {
        ErrorKind::DoubleConflict
    } else {
        ErrorKind::Conflict
    }
}

/// What to do with a message whose sequence number is behind the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleDisposition {
    /// Drop without replying
    Drop,
    /// Reply with an ERROR of the given kind
    Reply(ErrorKind),
}

/// Decide how to reject a stale message.
///
/// ERRORs are never answered. ANSWER and OK get the same INVALID_STATE a
/// mismatched one would get from the state machine; offers get
/// OUT_OF_ORDER so the sender bumps its sequence and tries again.
pub fn classify_stale(message_type: MessageType) -> StaleDisposition {
    match message_type {
        MessageType::Error => StaleDisposition::Drop,
        MessageType::Answer | MessageType::Ok => StaleDisposition::Reply(ErrorKind::InvalidState),
        MessageType::Offer | MessageType::OfferRequest | MessageType::OfferResponse => {
            StaleDisposition::Reply(ErrorKind::OutOfOrder)
        },
    }
}
