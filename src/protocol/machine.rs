//! ROAP negotiation state machine.
//!
//! A pure `(state, event) -> (state, actions)` dispatcher. The machine
//! never performs I/O: it returns [`Action`]s for the coordinator to carry
//! out, and transport results come back as [`Event`]s. This keeps every
//! transition run-to-completion and testable without a runtime.

use std::ops::RangeInclusive;

use rand::Rng;

use super::message::{ErrorKind, MessageType, NegotiationMessage};
use super::policy::{self, StaleDisposition};
use super::session::{NegotiationSession, NegotiationState};
use crate::config::NegotiationConfig;
use crate::error::RoapError;

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Host asked for a new local offer
    LocalOfferRequested,
    /// Signaling delivered a peer message
    MessageReceived(NegotiationMessage),
    /// Transport produced a local offer
    LocalOfferCreated {
        /// Offer SDP
        sdp: String,
    },
    /// Transport failed to produce a local offer
    LocalOfferFailed {
        /// Failure description
        cause: String,
    },
    /// Transport applied the remote offer and produced an answer
    RemoteOfferApplied {
        /// Answer SDP
        sdp: String,
    },
    /// Transport rejected the remote offer
    RemoteOfferFailed {
        /// Failure description
        cause: String,
    },
    /// Transport applied the remote answer
    RemoteAnswerApplied,
    /// Transport rejected the remote answer
    RemoteAnswerFailed {
        /// Failure description
        cause: String,
    },
}

/// Work the coordinator must perform after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Emit a message to the peer
    Send(NegotiationMessage),
    /// Ask the transport for a local offer
    CreateLocalOffer,
    /// Hand a remote offer to the transport
    ApplyRemoteOffer(String),
    /// Hand a remote answer to the transport
    ApplyRemoteAnswer(String),
    /// Callers waiting for an unsent offer now wait for its answer
    PromoteCallers,
    /// Offer round trip completed; resolve callers waiting on it
    ResolveCallers,
    /// Negotiation failed; reject every waiting caller
    RejectCallers(Failure),
    /// Report terminal failure to the host
    NegotiationFailed(Failure),
}

/// Terminal failure cause, shared by every rejected caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Local media transport operation failed
    Browser(String),
    /// Peer reported an unrecoverable error
    Remote(ErrorKind),
}

impl From<Failure> for RoapError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Browser(cause) => RoapError::Transport(cause),
            Failure::Remote(kind) => RoapError::Remote(kind),
        }
    }
}

/// ROAP negotiation state machine
#[derive(Debug)]
pub struct NegotiationMachine {
    state: NegotiationState,
    session: NegotiationSession,
    tie_breaker: u32,
    max_retries: u32,
    retry_after: RangeInclusive<u64>,
    /// Offer round trips this side completed as offerer
    completed_local_offers: u64,
    failure: Option<Failure>,
}

impl NegotiationMachine {
    /// Create a machine in `Idle` from configuration
    pub fn new(config: &NegotiationConfig) -> Self {
        Self::with_session(config, NegotiationSession::new(config.initial_sequence))
    }

    /// Create a machine around an existing session record
    pub fn with_session(config: &NegotiationConfig, session: NegotiationSession) -> Self {
        Self {
            state: NegotiationState::Idle,
            session,
            tie_breaker: config.tie_breaker,
            max_retries: config.max_retries,
            retry_after: config.retry_after_min_ms..=config.retry_after_max_ms,
            completed_local_offers: 0,
            failure: None,
        }
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Session record
    pub fn session(&self) -> &NegotiationSession {
        &self.session
    }

    /// Local tie-breaker sent with our offers
    pub fn tie_breaker(&self) -> u32 {
        self.tie_breaker
    }

    /// Whether this side has completed at least one offer round trip.
    pub fn initialized_as_offerer(&self) -> bool {
        self.completed_local_offers > 0
    }

    /// Terminal failure, once reached
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Process one event to completion.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        let before = self.state;

        match event {
            Event::LocalOfferRequested => self.on_local_offer_requested(&mut actions),
            Event::MessageReceived(message) => self.on_message(message, &mut actions),
            Event::LocalOfferCreated { sdp } => self.on_local_offer_created(sdp, &mut actions),
            Event::RemoteOfferApplied { sdp } => self.on_remote_offer_applied(sdp, &mut actions),
            Event::RemoteAnswerApplied => self.on_remote_answer_applied(&mut actions),
            Event::LocalOfferFailed { cause } => {
                self.on_transport_failed(NegotiationState::CreatingLocalOffer, cause, &mut actions)
            },
            Event::RemoteOfferFailed { cause } => {
                self.on_transport_failed(NegotiationState::SettingRemoteOffer, cause, &mut actions)
            },
            Event::RemoteAnswerFailed { cause } => {
                self.on_transport_failed(NegotiationState::SettingRemoteAnswer, cause, &mut actions)
            },
        }

        if before != self.state {
            tracing::debug!(
                session = %self.session.id(),
                seq = self.session.sequence_number(),
                "{} -> {}",
                before,
                self.state
            );
        }

        actions
    }

    fn on_local_offer_requested(&mut self, actions: &mut Vec<Action>) {
        match self.state {
            NegotiationState::Idle => self.start_local_offer(actions),
            state if state.is_terminal() => {
                if let Some(failure) = self.failure.clone() {
                    actions.push(Action::RejectCallers(failure));
                }
            },
            _ => {
                tracing::debug!(
                    session = %self.session.id(),
                    state = %self.state,
                    "local offer queued behind current negotiation"
                );
                self.session.set_pending_local_offer(true);
            },
        }
    }

    fn on_message(&mut self, message: NegotiationMessage, actions: &mut Vec<Action>) {
        if self.session.is_stale(message.seq) {
            match policy::classify_stale(message.message_type) {
                StaleDisposition::Drop => {
                    tracing::debug!(
                        session = %self.session.id(),
                        "dropping stale {}",
                        message
                    );
                },
                StaleDisposition::Reply(kind) => {
                    tracing::warn!(
                        session = %self.session.id(),
                        current = self.session.sequence_number(),
                        "rejecting stale {}",
                        message
                    );
                    actions.push(Action::Send(NegotiationMessage::error(message.seq, kind)));
                },
            }
            return;
        }

        let seq = message.seq;
        let current = self.session.sequence_number();

        match (self.state, message.message_type) {
            (NegotiationState::Idle, MessageType::Offer | MessageType::OfferRequest)
                if seq == current =>
            {
                actions.push(Action::Send(NegotiationMessage::error(
                    seq,
                    ErrorKind::OutOfOrder,
                )));
            },
            (NegotiationState::Idle, MessageType::Offer) => {
                self.session.adopt_sequence(seq);
                self.state = NegotiationState::SettingRemoteOffer;
                actions.push(Action::ApplyRemoteOffer(message.sdp.unwrap_or_default()));
            },
            (NegotiationState::Idle, MessageType::OfferRequest) => {
                self.session.adopt_sequence(seq);
                self.session.set_servicing_remote_offer_request(true);
                self.state = NegotiationState::CreatingLocalOffer;
                actions.push(Action::CreateLocalOffer);
            },

            (
                NegotiationState::CreatingLocalOffer,
                MessageType::Offer | MessageType::OfferRequest,
            ) if !self.session.servicing_remote_offer_request() => {
                self.reply_glare(&message, actions);
            },
            (NegotiationState::WaitingForAnswer, MessageType::Offer | MessageType::OfferRequest) => {
                self.reply_glare(&message, actions);
            },

            (NegotiationState::WaitingForAnswer, MessageType::Answer) => {
                self.session.reset_retries();
                self.session.adopt_sequence(seq);
                self.state = NegotiationState::SettingRemoteAnswer;
                actions.push(Action::ApplyRemoteAnswer(message.sdp.unwrap_or_default()));
            },
            (NegotiationState::WaitingForAnswer, MessageType::Error) if seq == current => {
                let kind = message.error_type.unwrap_or(ErrorKind::Failed);
                if policy::should_retry(
                    kind,
                    seq,
                    current,
                    self.session.retry_count(),
                    self.max_retries,
                ) {
                    self.session.record_retry();
                    self.session.set_servicing_remote_offer_request(false);
                    let Some(next) = self.session.bump_sequence() else {
                        self.sequence_exhausted(actions);
                        return;
                    };
                    tracing::info!(
                        session = %self.session.id(),
                        retry = self.session.retry_count(),
                        seq = next,
                        retry_after = ?message.retry_after,
                        "peer replied {}, retrying offer",
                        kind
                    );
                    self.state = NegotiationState::CreatingLocalOffer;
                    actions.push(Action::CreateLocalOffer);
                } else {
                    self.fail(Failure::Remote(kind), actions);
                }
            },

            (NegotiationState::SettingRemoteOffer, MessageType::Offer) if seq == current => {
                tracing::debug!(session = %self.session.id(), "ignoring duplicate {}", message);
            },

            (NegotiationState::WaitingForOk, MessageType::Ok) => {
                self.session.adopt_sequence(seq);
                tracing::info!(
                    session = %self.session.id(),
                    seq = self.session.sequence_number(),
                    "remote offer negotiated"
                );
                self.enter_idle(actions);
            },
            (NegotiationState::WaitingForOk, MessageType::Error) if seq == current => {
                let kind = message.error_type.unwrap_or(ErrorKind::Failed);
                self.fail(Failure::Remote(kind), actions);
            },

            (_, MessageType::Error) => {
                tracing::debug!(
                    session = %self.session.id(),
                    state = %self.state,
                    "ignoring {}",
                    message
                );
            },
            (state, _) => {
                tracing::warn!(
                    session = %self.session.id(),
                    state = %state,
                    "unexpected {}",
                    message
                );
                actions.push(Action::Send(NegotiationMessage::error(
                    seq,
                    ErrorKind::InvalidState,
                )));
            },
        }
    }

    fn on_local_offer_created(&mut self, sdp: String, actions: &mut Vec<Action>) {
        if self.state != NegotiationState::CreatingLocalOffer {
            self.ignore_transport_result("local offer");
            return;
        }

        if self.session.pending_local_offer_requested() {
            // A newer request arrived while this offer was built; rebuild so
            // the offer reflects it.
            self.session.set_pending_local_offer(false);
            actions.push(Action::CreateLocalOffer);
            return;
        }

        let seq = self.session.sequence_number();
        let message = if self.session.servicing_remote_offer_request() {
            NegotiationMessage::offer_response(seq, sdp, self.tie_breaker)
        } else {
            NegotiationMessage::offer(seq, sdp, self.tie_breaker)
        };
        actions.push(Action::Send(message));
        actions.push(Action::PromoteCallers);
        self.state = NegotiationState::WaitingForAnswer;
    }

    fn on_remote_offer_applied(&mut self, sdp: String, actions: &mut Vec<Action>) {
        if self.state != NegotiationState::SettingRemoteOffer {
            self.ignore_transport_result("remote offer");
            return;
        }

        actions.push(Action::Send(NegotiationMessage::answer(
            self.session.sequence_number(),
            sdp,
        )));
        self.state = NegotiationState::WaitingForOk;
    }

    fn on_remote_answer_applied(&mut self, actions: &mut Vec<Action>) {
        if self.state != NegotiationState::SettingRemoteAnswer {
            self.ignore_transport_result("remote answer");
            return;
        }

        actions.push(Action::Send(NegotiationMessage::ok(self.session.sequence_number())));
        self.session.set_servicing_remote_offer_request(false);
        self.completed_local_offers += 1;
        tracing::info!(
            session = %self.session.id(),
            seq = self.session.sequence_number(),
            "local offer negotiated"
        );
        actions.push(Action::ResolveCallers);
        self.enter_idle(actions);
    }

    fn on_transport_failed(
        &mut self,
        expected: NegotiationState,
        cause: String,
        actions: &mut Vec<Action>,
    ) {
        if self.state != expected {
            self.ignore_transport_result("failed transport");
            return;
        }

        actions.push(Action::Send(NegotiationMessage::error(
            self.session.sequence_number(),
            ErrorKind::Failed,
        )));
        self.fail(Failure::Browser(cause), actions);
    }

    fn start_local_offer(&mut self, actions: &mut Vec<Action>) {
        self.session.set_pending_local_offer(false);
        if self.session.bump_sequence().is_none() {
            self.sequence_exhausted(actions);
            return;
        }
        self.state = NegotiationState::CreatingLocalOffer;
        actions.push(Action::CreateLocalOffer);
    }

    fn enter_idle(&mut self, actions: &mut Vec<Action>) {
        self.state = NegotiationState::Idle;
        if self.session.pending_local_offer_requested() {
            self.start_local_offer(actions);
        }
    }

    fn reply_glare(&mut self, message: &NegotiationMessage, actions: &mut Vec<Action>) {
        let kind = policy::resolve_glare(self.tie_breaker, message.tie_breaker);
        let mut reply = NegotiationMessage::error(message.seq, kind);
        if kind == ErrorKind::DoubleConflict {
            tracing::warn!(
                session = %self.session.id(),
                tie_breaker = self.tie_breaker,
                "peer uses our tie-breaker"
            );
            let hint = if self.retry_after.is_empty() {
                *self.retry_after.start()
            } else {
                rand::thread_rng().gen_range(self.retry_after.clone())
            };
            reply = reply.with_retry_after(hint);
        } else {
            tracing::debug!(session = %self.session.id(), "glare with {}", message);
        }
        actions.push(Action::Send(reply));
    }

    /// The peer drove the sequence to `u64::MAX`; no further offer can be numbered.
    fn sequence_exhausted(&mut self, actions: &mut Vec<Action>) {
        actions.push(Action::Send(NegotiationMessage::error(
            self.session.sequence_number(),
            ErrorKind::Failed,
        )));
        self.fail(
            Failure::Browser("sequence number exhausted".to_string()),
            actions,
        );
    }

    fn fail(&mut self, failure: Failure, actions: &mut Vec<Action>) {
        self.state = match failure {
            Failure::Browser(_) => NegotiationState::BrowserError,
            Failure::Remote(_) => NegotiationState::RemoteError,
        };
        tracing::warn!(
            session = %self.session.id(),
            seq = self.session.sequence_number(),
            "negotiation failed: {:?}",
            failure
        );
        actions.push(Action::RejectCallers(failure.clone()));
        actions.push(Action::NegotiationFailed(failure.clone()));
        self.failure = Some(failure);
    }

    fn ignore_transport_result(&self, what: &str) {
        tracing::warn!(
            session = %self.session.id(),
            state = %self.state,
            "ignoring {} result",
            what
        );
    }
}
