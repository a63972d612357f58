//! Call and renegotiation state

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Signaling phase of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    Initial,
    Ringing,
    Answered,
    Failed,
    Disconnected,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Failed | CallState::Disconnected)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallState::Initial => "Initial",
            CallState::Ringing => "Ringing",
            CallState::Answered => "Answered",
            CallState::Failed => "Failed",
            CallState::Disconnected => "Disconnected",
        };
        write!(f, "{}", name)
    }
}

/// Hold axis; the `-ing` values mark a renegotiation in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HoldState {
    #[default]
    None,
    Holding,
    Held,
    UnHolding,
}

/// Mute axis; the `-ing` values mark a renegotiation in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MuteState {
    #[default]
    None,
    Muting,
    Muted,
    UnMuting,
}

/// Where the current renegotiation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenegotiationPhase {
    #[default]
    Idle,
    /// Our re-offer is out, waiting for the response
    OfferSent,
    /// The media subsystem is producing or applying an answer
    AwaitingAnswer,
    /// The outcome is being applied (ACK, final response, bridge changes)
    Applying,
}

/// Session state of a call, mutated only under the call's monitor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSessionState {
    pub hold: HoldState,
    pub mute: MuteState,
    pub phase: RenegotiationPhase,
    pub local_sdp: Option<Bytes>,
    pub remote_sdp: Option<Bytes>,
}

/// Stable axis value to go back to when a renegotiation does not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AxisRevert {
    Hold(HoldState),
    Mute(MuteState),
    Neither,
}

impl CallSessionState {
    /// Put the in-flight axis back to `previous` after a declined re-offer
    pub(crate) fn revert(&mut self, previous: AxisRevert) {
        match previous {
            AxisRevert::Hold(hold) => self.hold = hold,
            AxisRevert::Mute(mute) => self.mute = mute,
            AxisRevert::Neither => {}
        }
        self.phase = RenegotiationPhase::Idle;
    }

    /// Reset the in-flight axis after a failure that ends the renegotiation
    pub(crate) fn reset(&mut self, axis: AxisRevert) {
        match axis {
            AxisRevert::Hold(_) => self.hold = HoldState::None,
            AxisRevert::Mute(_) => self.mute = MuteState::None,
            AxisRevert::Neither => {}
        }
        self.phase = RenegotiationPhase::Idle;
    }
}
