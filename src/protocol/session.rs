//! Negotiation session record.
//!
//! Holds the ordering and bookkeeping state of one media session's
//! offer/answer negotiation. Mutated only by the state machine.

use std::fmt;

/// Negotiation state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NegotiationState {
    /// No negotiation in progress
    #[default]
    Idle,
    /// Waiting for the transport to produce a local offer
    CreatingLocalOffer,
    /// OFFER sent, waiting for the peer's ANSWER
    WaitingForAnswer,
    /// Applying the peer's ANSWER
    SettingRemoteAnswer,
    /// Applying the peer's OFFER
    SettingRemoteOffer,
    /// ANSWER sent, waiting for the peer's OK
    WaitingForOk,
    /// A local transport operation failed (terminal)
    BrowserError,
    /// The peer reported an unrecoverable error (terminal)
    RemoteError,
}

impl NegotiationState {
    /// Terminal states accept no further protocol progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BrowserError | Self::RemoteError)
    }

    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CreatingLocalOffer => "creatingLocalOffer",
            Self::WaitingForAnswer => "waitingForAnswer",
            Self::SettingRemoteAnswer => "settingRemoteAnswer",
            Self::SettingRemoteOffer => "settingRemoteOffer",
            Self::WaitingForOk => "waitingForOK",
            Self::BrowserError => "browserError",
            Self::RemoteError => "remoteError",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session negotiation bookkeeping
#[derive(Debug, Clone)]
pub struct NegotiationSession {
    /// Session ID (log correlation only)
    id: String,
    /// Authoritative sequence number
    sequence_number: u64,
    /// Local offer requested while busy
    pending_local_offer_requested: bool,
    /// Current local offer answers a remote OFFER_REQUEST
    servicing_remote_offer_request: bool,
    /// Retries consumed since the last accepted answer
    retry_count: u32,
}

impl NegotiationSession {
    /// Create a session starting at the given sequence number
    pub fn new(initial_sequence: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence_number: initial_sequence,
            pending_local_offer_requested: false,
            servicing_remote_offer_request: false,
            retry_count: 0,
        }
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current sequence number
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Retries consumed so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether a local offer is queued behind the current negotiation
    pub fn pending_local_offer_requested(&self) -> bool {
        self.pending_local_offer_requested
    }

    /// Whether the local offer being built answers a remote request
    pub fn servicing_remote_offer_request(&self) -> bool {
        self.servicing_remote_offer_request
    }

    /// Whether `seq` is behind the session
    pub fn is_stale(&self, seq: u64) -> bool {
        seq < self.sequence_number
    }

    /// Advance to the next sequence number. `None` once the counter is spent.
    pub(crate) fn bump_sequence(&mut self) -> Option<u64> {
        let next = self.sequence_number.checked_add(1)?;
        self.sequence_number = next;
        Some(next)
    }

    /// Adopt a peer's sequence number. Never moves backwards.
    pub(crate) fn adopt_sequence(&mut self, seq: u64) {
        self.sequence_number = self.sequence_number.max(seq);
    }

    pub(crate) fn set_pending_local_offer(&mut self, pending: bool) {
        self.pending_local_offer_requested = pending;
    }

    pub(crate) fn set_servicing_remote_offer_request(&mut self, servicing: bool) {
        self.servicing_remote_offer_request = servicing;
    }

    pub(crate) fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    pub(crate) fn reset_retries(&mut self) {
        self.retry_count = 0;
    }
}

impl Default for NegotiationSession {
    fn default() -> Self {
        Self::new(0)
    }
}
