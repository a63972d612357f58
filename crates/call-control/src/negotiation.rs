//! Media negotiation collaborator
//!
//! An [`SdpNegotiator`] accepts offers and answers and reports the outcome
//! later, from a thread the media subsystem owns, as a [`NegotiationEvent`]
//! delivered to [`Call::on_negotiation_event`](crate::Call::on_negotiation_event).

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Result;

/// What the media subsystem produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEventKind {
    /// A local offer was generated
    OfferGenerated,
    /// An answer to a processed offer was generated
    AnswerGenerated,
    /// A remote answer was applied
    AnswerProcessed,
}

/// Asynchronous negotiation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationEvent {
    pub kind: NegotiationEventKind,
    pub successful: bool,
    /// Generated SDP, if any
    pub sdp: Option<Bytes>,
    /// Failure description when `successful` is false
    pub error: Option<String>,
}

impl NegotiationEvent {
    pub fn success(kind: NegotiationEventKind, sdp: Option<Bytes>) -> Self {
        Self {
            kind,
            successful: true,
            sdp,
            error: None,
        }
    }

    pub fn failure(kind: NegotiationEventKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            successful: false,
            sdp: None,
            error: Some(error.into()),
        }
    }
}

/// Media negotiation port of a call's network connection.
///
/// Both methods only submit work; the result arrives as a
/// [`NegotiationEvent`]. An `Err` return means the submission itself failed.
#[async_trait]
pub trait SdpNegotiator: Send + Sync {
    async fn process_sdp_offer(&self, offer: Bytes) -> Result<()>;

    async fn process_sdp_answer(&self, answer: Bytes) -> Result<()>;
}
