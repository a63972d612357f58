//! Participant events
//!
//! Every connection change, active-speaker update and call lifecycle change is
//! delivered as a [`ParticipantEvent`] through the participant's
//! [`EventDispatcher`]. Consumers either register a [`ParticipantObserver`] or
//! take a broadcast receiver with [`Participant::subscribe`](crate::Participant::subscribe).

pub mod dispatcher;

pub use dispatcher::{DispatchHandle, EventDispatcher, EventSubscriber};

use async_trait::async_trait;

use crate::call::{CallState, HoldState, MuteState};
use crate::errors::{CallControlError, Result};
use crate::participant::ParticipantRef;
use crate::types::{Direction, JoinType, MediaObjectId};

/// Outcome of a join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinCause {
    Joined,
    Error,
}

/// Outcome of an unjoin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnjoinCause {
    SuccessUnjoin,
    FailUnjoin,
    /// There was no edge to remove
    NotJoined,
    /// The edge went away because one side disconnected
    Disconnect,
}

/// Completion of a join, seen from `source`
#[derive(Debug, Clone)]
pub struct JoinCompleteEvent {
    pub source: ParticipantRef,
    pub peer: ParticipantRef,
    pub join_type: JoinType,
    /// Direction from `source` towards `peer`
    pub direction: Direction,
    pub cause: JoinCause,
    pub error: Option<CallControlError>,
    /// True on the side that requested the join
    pub initiator: bool,
}

impl JoinCompleteEvent {
    pub fn is_successful(&self) -> bool {
        self.cause == JoinCause::Joined
    }

    /// The same completion seen from the other side
    pub fn mirrored(&self) -> Self {
        Self {
            source: self.peer.clone(),
            peer: self.source.clone(),
            join_type: self.join_type,
            direction: self.direction.inverse(),
            cause: self.cause,
            error: self.error.clone(),
            initiator: !self.initiator,
        }
    }
}

/// Completion of an unjoin, seen from `source`
#[derive(Debug, Clone)]
pub struct UnjoinCompleteEvent {
    pub source: ParticipantRef,
    pub peer: ParticipantRef,
    pub cause: UnjoinCause,
    pub error: Option<CallControlError>,
    pub initiator: bool,
}

impl UnjoinCompleteEvent {
    pub fn is_successful(&self) -> bool {
        matches!(self.cause, UnjoinCause::SuccessUnjoin | UnjoinCause::Disconnect)
    }
}

/// Participants currently contributing audio to a mixer
#[derive(Debug, Clone)]
pub struct ActiveSpeakerEvent {
    pub mixer: MediaObjectId,
    pub active_speakers: Vec<ParticipantRef>,
}

/// Renegotiation flavours reported in outcome events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenegotiationKind {
    Hold,
    Unhold,
    Mute,
    Unmute,
    /// Locally requested generic re-offer
    ReOffer,
    /// Peer-initiated re-offer
    RemoteReOffer,
}

/// Outcome of one renegotiation
#[derive(Debug, Clone)]
pub struct RenegotiationEvent {
    pub call: MediaObjectId,
    pub kind: RenegotiationKind,
    pub hold_state: HoldState,
    pub mute_state: MuteState,
    pub error: Option<CallControlError>,
}

/// Everything a participant reports
#[derive(Debug, Clone)]
pub enum ParticipantEvent {
    JoinComplete(JoinCompleteEvent),
    UnjoinComplete(UnjoinCompleteEvent),
    ActiveSpeaker(ActiveSpeakerEvent),
    /// The participant released its media and left every join
    MediaResourceDisconnected { participant: MediaObjectId },
    CallStateChanged {
        call: MediaObjectId,
        previous: CallState,
        current: CallState,
    },
    CallFailed {
        call: MediaObjectId,
        error: CallControlError,
    },
    Renegotiation(RenegotiationEvent),
}

impl ParticipantEvent {
    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            ParticipantEvent::JoinComplete(_) => "JoinComplete",
            ParticipantEvent::UnjoinComplete(_) => "UnjoinComplete",
            ParticipantEvent::ActiveSpeaker(_) => "ActiveSpeaker",
            ParticipantEvent::MediaResourceDisconnected { .. } => "MediaResourceDisconnected",
            ParticipantEvent::CallStateChanged { .. } => "CallStateChanged",
            ParticipantEvent::CallFailed { .. } => "CallFailed",
            ParticipantEvent::Renegotiation(_) => "Renegotiation",
        }
    }
}

/// Receives a participant's events in dispatch order
#[async_trait]
pub trait ParticipantObserver: Send + Sync {
    async fn on_event(&self, event: &ParticipantEvent) -> Result<()>;
}

/// Decides what happens when an observer fails.
///
/// Returning `false` stops delivery of this event to the remaining observers.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, error: &CallControlError, event: &ParticipantEvent) -> bool;
}
