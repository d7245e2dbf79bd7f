//! # ROAP - Rendezvous Offer/Answer Protocol engine
//!
//! Negotiation core of a media-session SDK. Drives SDP offer/answer
//! exchange over any signaling channel, with sequence-number ordering,
//! glare detection and bounded retries, while a pluggable media transport
//! does the actual SDP/ICE work.
//!
//! ## Features
//!
//! - **Sequenced messages**: OFFER, OFFER_REQUEST, OFFER_RESPONSE, ANSWER, OK, ERROR
//! - **Glare resolution**: tie-breaker comparison, CONFLICT / DOUBLECONFLICT replies
//! - **Retry policy**: up to two extra offers after retryable peer errors
//! - **Coalesced offers**: concurrent `initiate_offer` calls share one round trip
//! - **Transport-agnostic**: any signaling channel, any [`MediaTransport`]
//!
//! ## Protocol Overview
//!
//! ```text
//! Peer A                                            Peer B
//!    |                                                 |
//!    |------------- OFFER {seq 1, tieBreaker} ------->|
//!    |<------------ ANSWER {seq 1} -------------------|
//!    |------------- OK {seq 1} ---------------------->|
//!    |                                                 |
//!    |<------------ OFFER {seq 2} --------------------|   (while A offers too)
//!    |------------- ERROR {seq 2, CONFLICT} --------->|
//! ```
//!
//! ### State Machine
//!
//! ```text
//!                 initiate_offer()                 local offer created
//!     [Idle] ───────────────────> [CreatingLocalOffer] ─────────────> [WaitingForAnswer]
//!       ^ │                              ^                                 │      │
//!       │ │ remote OFFER                 └──── retryable ERROR ────────────┘      │ ANSWER
//!       │ v                                                                       v
//!       │ [SettingRemoteOffer] ──> [WaitingForOk]          [SettingRemoteAnswer] ─┘
//!       │                               │                           │
//!       └──────────── OK ───────────────┘<───────── send OK ────────┘
//!
//!     transport failure ──> [BrowserError]      fatal peer ERROR ──> [RemoteError]
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use roap::{Config, CoordinatorEvent, LoopbackTransport, SessionCoordinator};
//!
//! let config = Config::from_env();
//! let (session, mut events) = SessionCoordinator::new(
//!     Arc::new(LoopbackTransport::new("local")),
//!     &config.negotiation,
//! );
//!
//! // Relay outbound messages to the peer
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             CoordinatorEvent::OutboundMessage(msg) => signaling.send(msg.to_json()?),
//!             CoordinatorEvent::NegotiationFailed(why) => break,
//!         }
//!     }
//! });
//!
//! // Feed inbound messages
//! session.message_received_json(&incoming)?;
//!
//! // Negotiate
//! session.initiate_offer().await?;
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Messages, retry/glare policy and the state machine
//! - [`coordinator`]: Async session driver and the media transport contract
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;

// Re-exports for convenience
pub use config::{Config, NegotiationConfig};
pub use coordinator::{
    CoordinatorEvent, EventReceiver, LocalDescription, LoopbackTransport, MediaTransport,
    SessionCoordinator, SessionSnapshot,
};
pub use error::{Result, RoapError};
pub use protocol::{
    ErrorKind, Failure, MessageType, NegotiationMachine, NegotiationMessage, NegotiationState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
