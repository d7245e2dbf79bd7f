//! Protocol messages for ROAP negotiation.
//!
//! Defines the wire format for OFFER, OFFER_REQUEST, OFFER_RESPONSE,
//! ANSWER, OK and ERROR messages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoapError};

/// Message types in the ROAP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Unsolicited SDP offer
    Offer,
    /// Request for the receiver to send an offer
    OfferRequest,
    /// Offer sent in reply to an OFFER_REQUEST
    OfferResponse,
    /// SDP answer
    Answer,
    /// Confirms an answer was applied
    Ok,
    /// Protocol error
    Error,
}

impl MessageType {
    /// Wire name of the message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "OFFER",
            Self::OfferRequest => "OFFER_REQUEST",
            Self::OfferResponse => "OFFER_RESPONSE",
            Self::Answer => "ANSWER",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }

    /// Whether messages of this type must carry an SDP body.
    pub fn carries_sdp(&self) -> bool {
        matches!(self, Self::Offer | Self::OfferResponse | Self::Answer)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer-visible error codes carried in ERROR messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Glare where both peers use the same tie-breaker
    #[serde(rename = "DOUBLECONFLICT")]
    DoubleConflict,
    /// Glare; the receiver keeps its own offer
    Conflict,
    /// Local media failure
    Failed,
    /// Message not valid in the receiver's state
    InvalidState,
    /// No compatible media
    #[serde(rename = "NOMATCH")]
    NoMatch,
    /// Sequence number out of order
    OutOfOrder,
    /// Offer refused
    Refused,
    /// Try again
    Retry,
    /// Peer timed out
    Timeout,
}

impl ErrorKind {
    /// Wire name of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoubleConflict => "DOUBLECONFLICT",
            Self::Conflict => "CONFLICT",
            Self::Failed => "FAILED",
            Self::InvalidState => "INVALID_STATE",
            Self::NoMatch => "NOMATCH",
            Self::OutOfOrder => "OUT_OF_ORDER",
            Self::Refused => "REFUSED",
            Self::Retry => "RETRY",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sequenced negotiation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationMessage {
    /// Sequence number
    pub seq: u64,
    /// Message type
    pub message_type: MessageType,
    /// SDP body (OFFER, OFFER_RESPONSE, ANSWER)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    /// Glare tie-breaker (OFFER, OFFER_RESPONSE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_breaker: Option<u32>,
    /// Error code (ERROR only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    /// Backoff hint in milliseconds (some ERRORs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl NegotiationMessage {
    fn bare(seq: u64, message_type: MessageType) -> Self {
        Self {
            seq,
            message_type,
            sdp: None,
            tie_breaker: None,
            error_type: None,
            retry_after: None,
        }
    }

    /// Create an OFFER message
    pub fn offer(seq: u64, sdp: impl Into<String>, tie_breaker: u32) -> Self {
        Self {
            sdp: Some(sdp.into()),
            tie_breaker: Some(tie_breaker),
            ..Self::bare(seq, MessageType::Offer)
        }
    }

    /// Create an OFFER_REQUEST message
    pub fn offer_request(seq: u64) -> Self {
        Self::bare(seq, MessageType::OfferRequest)
    }

    /// Create an OFFER_RESPONSE message
    pub fn offer_response(seq: u64, sdp: impl Into<String>, tie_breaker: u32) -> Self {
        Self {
            sdp: Some(sdp.into()),
            tie_breaker: Some(tie_breaker),
            ..Self::bare(seq, MessageType::OfferResponse)
        }
    }

    /// Create an ANSWER message
    pub fn answer(seq: u64, sdp: impl Into<String>) -> Self {
        Self {
            sdp: Some(sdp.into()),
            ..Self::bare(seq, MessageType::Answer)
        }
    }

    /// Create an OK message
    pub fn ok(seq: u64) -> Self {
        Self::bare(seq, MessageType::Ok)
    }

    /// Create an ERROR message
    pub fn error(seq: u64, kind: ErrorKind) -> Self {
        Self {
            error_type: Some(kind),
            ..Self::bare(seq, MessageType::Error)
        }
    }

    /// Attach a backoff hint
    pub fn with_retry_after(mut self, millis: u64) -> Self {
        self.retry_after = Some(millis);
        self
    }

    /// Check the fields required by the message type are present.
    ///
    /// Unknown message types never get this far; they fail in
    /// [`from_json`](Self::from_json).
    pub fn validate(&self) -> Result<()> {
        if self.message_type.carries_sdp() && self.sdp.is_none() {
            return Err(RoapError::InvalidMessage(format!(
                "{} seq {} missing sdp",
                self.message_type, self.seq
            )));
        }
        if self.message_type == MessageType::Error && self.error_type.is_none() {
            return Err(RoapError::InvalidMessage(format!(
                "ERROR seq {} missing errorType",
                self.seq
            )));
        }
        Ok(())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize and validate from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(json)
            .map_err(|e| RoapError::InvalidMessage(format!("undecodable message: {e}")))?;
        message.validate()?;
        Ok(message)
    }
}

impl fmt::Display for NegotiationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{seq:{}", self.message_type, self.seq)?;
        if let Some(kind) = self.error_type {
            write!(f, ", {kind}")?;
        }
        if let Some(tie_breaker) = self.tie_breaker {
            write!(f, ", tieBreaker:{tie_breaker:#x}")?;
        }
        if let Some(retry_after) = self.retry_after {
            write!(f, ", retryAfter:{retry_after}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_message() {
        let msg = NegotiationMessage::offer(1, "v=0...offerA", 0xFFFF_FFFE);

        assert_eq!(msg.message_type, MessageType::Offer);
        assert_eq!(msg.sdp.as_deref(), Some("v=0...offerA"));
        assert_eq!(msg.tie_breaker, Some(0xFFFF_FFFE));
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_wire_field_names() {
        let msg = NegotiationMessage::error(4, ErrorKind::DoubleConflict).with_retry_after(250);
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["seq"], 4);
        assert_eq!(json["messageType"], "ERROR");
        assert_eq!(json["errorType"], "DOUBLECONFLICT");
        assert_eq!(json["retryAfter"], 250);
        assert!(json.get("sdp").is_none());
        assert!(json.get("tieBreaker").is_none());
    }

    #[test]
    fn test_error_kind_wire_names() {
        for kind in [
            ErrorKind::DoubleConflict,
            ErrorKind::Conflict,
            ErrorKind::Failed,
            ErrorKind::InvalidState,
            ErrorKind::NoMatch,
            ErrorKind::OutOfOrder,
            ErrorKind::Refused,
            ErrorKind::Retry,
            ErrorKind::Timeout,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_decode_offer_request() {
        let msg = NegotiationMessage::from_json(r#"{"seq":7,"messageType":"OFFER_REQUEST"}"#)
            .unwrap();
        assert_eq!(msg, NegotiationMessage::offer_request(7));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let err = NegotiationMessage::from_json(r#"{"seq":1,"messageType":"HELLO"}"#).unwrap_err();
        assert!(matches!(err, RoapError::InvalidMessage(_)));
    }

    #[test]
    fn test_answer_without_sdp_rejected() {
        let err = NegotiationMessage::from_json(r#"{"seq":1,"messageType":"ANSWER"}"#).unwrap_err();
        assert!(matches!(err, RoapError::InvalidMessage(_)));
    }

    #[test]
    fn test_error_without_kind_rejected() {
        let err = NegotiationMessage::from_json(r#"{"seq":1,"messageType":"ERROR"}"#).unwrap_err();
        assert!(matches!(err, RoapError::InvalidMessage(_)));
    }

    #[test]
    fn test_display() {
        let msg = NegotiationMessage::error(3, ErrorKind::OutOfOrder);
        assert_eq!(msg.to_string(), "ERROR{seq:3, OUT_OF_ORDER}");
        assert_eq!(NegotiationMessage::ok(1).to_string(), "OK{seq:1}");
    }
}
