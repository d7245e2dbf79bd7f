//! ROAP negotiation protocol.
//!
//! Implements the Rendezvous Offer/Answer Protocol: sequenced SDP
//! offer/answer exchange with glare detection and bounded retries.
//!
//! # Protocol Overview
//!
//! Every message carries a sequence number. A new offer bumps the
//! sequence; the answer, OK and any ERROR for that exchange echo it.
//!
//! ## Message Flow
//!
//! ```text
//! Offerer                           Answerer
//!    |                                |
//!    |-------- OFFER (seq n) ------->|  Local offer with tie-breaker
//!    |                                |
//!    |<------- ANSWER (seq n) -------|  Remote offer applied
//!    |                                |
//!    |-------- OK (seq n) ---------->|  Answer applied
//!
//!    |<---- OFFER_REQUEST (seq m) ---|  Peer asks us to offer
//!    |---- OFFER_RESPONSE (seq m) -->|
//!    |<------- ANSWER (seq m) -------|
//!    |-------- OK (seq m) ---------->|
//! ```
//!
//! ## State Machine
//!
//! | State                 | Description                        | Exits to                                   |
//! |-----------------------|------------------------------------|--------------------------------------------|
//! | `Idle`                | Nothing in progress                | CreatingLocalOffer, SettingRemoteOffer     |
//! | `CreatingLocalOffer`  | Transport building our offer       | WaitingForAnswer, BrowserError             |
//! | `WaitingForAnswer`    | OFFER sent                         | SettingRemoteAnswer, CreatingLocalOffer (retry), RemoteError |
//! | `SettingRemoteAnswer` | Transport applying peer's answer   | Idle, BrowserError                         |
//! | `SettingRemoteOffer`  | Transport applying peer's offer    | WaitingForOk, BrowserError                 |
//! | `WaitingForOk`        | ANSWER sent                        | Idle, RemoteError                          |
//! | `BrowserError`        | Local transport failure            | (terminal)                                 |
//! | `RemoteError`         | Peer gave up                       | (terminal)                                 |
//!
//! Anything else is answered with INVALID_STATE and leaves the state
//! unchanged. ERROR messages are never answered.
//!
//! ## Error Codes
//!
//! | Code             | Retryable | Meaning                              |
//! |------------------|-----------|--------------------------------------|
//! | `DOUBLECONFLICT` | yes       | Glare with identical tie-breakers    |
//! | `CONFLICT`       | no        | Glare; the sender keeps its offer    |
//! | `FAILED`         | no        | Local media failure                  |
//! | `INVALID_STATE`  | yes       | Message not valid in receiver state  |
//! | `NOMATCH`        | no        | No compatible media                  |
//! | `OUT_OF_ORDER`   | yes       | Sequence number out of order         |
//! | `REFUSED`        | no        | Offer refused                        |
//! | `RETRY`          | yes       | Try again                            |
//! | `TIMEOUT`        | no        | Peer timed out                       |
//!
//! # Usage
//!
//! ```rust,ignore
//! use roap::config::NegotiationConfig;
//! use roap::protocol::{Event, NegotiationMachine};
//!
//! let mut machine = NegotiationMachine::new(&NegotiationConfig::default());
//! for action in machine.handle(Event::LocalOfferRequested) {
//!     // carry out the action, feed results back as events
//! }
//! ```

mod machine;
mod message;
pub mod policy;
mod session;

pub use machine::{Action, Event, Failure, NegotiationMachine};
pub use message::{ErrorKind, MessageType, NegotiationMessage};
pub use policy::MAX_RETRIES;
pub use session::{NegotiationSession, NegotiationState};
