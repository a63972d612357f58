//! Core identifiers and value types shared by every participant

use std::collections::HashMap;
use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an underlying media object.
///
/// A participant is identified by the id of the media object it wraps, so two
/// participant handles are equal exactly when they front the same media object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaObjectId(pub Uuid);

impl MediaObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MediaObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media flow direction of a join, seen from the joining participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Media flows from this participant to the peer
    Send,
    /// Media flows from the peer to this participant
    Recv,
    /// Both ways
    Duplex,
}

impl Direction {
    /// The same flow described from the peer's side.
    pub fn inverse(self) -> Self {
        match self {
            Direction::Send => Direction::Recv,
            Direction::Recv => Direction::Send,
            Direction::Duplex => Direction::Duplex,
        }
    }

    /// Whether an edge with this direction carries media in `wanted`.
    ///
    /// A duplex edge satisfies both one-way queries; a duplex query only
    /// matches duplex edges.
    pub fn covers(self, wanted: Direction) -> bool {
        self == wanted || (self == Direction::Duplex && wanted != Direction::Duplex)
    }
}

/// How a join is realised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    /// Media flows end to end between the endpoints
    Direct,
    /// Media is relayed through the media server
    Bridge,
}

/// Participant variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantKind {
    Call,
    Mixer,
    Adapter,
}

impl fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantKind::Call => write!(f, "Call"),
            ParticipantKind::Mixer => write!(f, "Mixer"),
            ParticipantKind::Adapter => write!(f, "Adapter"),
        }
    }
}

/// Address of a participant: a SIP URI for calls, a media server URI for mixers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub uri: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Endpoint {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// FSM name used when the application does not name one
pub const DEFAULT_APPLICATION_FSM: &str = "default";

/// Freeform attribute bag plus named application states
#[derive(Debug, Default)]
pub struct Attributes {
    values: DashMap<String, serde_json::Value>,
    application_states: DashMap<String, String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<serde_json::Value> {
        self.values.get(name).map(|v| v.value().clone())
    }

    pub fn set(&self, name: impl Into<String>, value: serde_json::Value) {
        self.values.insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<serde_json::Value> {
        self.values.remove(name).map(|(_, v)| v)
    }

    /// Snapshot of every attribute
    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn application_state(&self, fsm: &str) -> Option<String> {
        self.application_states.get(fsm).map(|s| s.value().clone())
    }

    pub fn set_application_state(&self, fsm: impl Into<String>, state: impl Into<String>) {
        self.application_states.insert(fsm.into(), state.into());
    }
}
