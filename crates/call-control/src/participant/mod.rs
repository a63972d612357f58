//! Participants and their join graph
//!
//! A participant is anything that can be joined: a [`Call`](crate::Call), a
//! [`Mixer`](crate::Mixer) or a [`ClampDtmfAdapter`](crate::ClampDtmfAdapter).
//! Each one owns a [`ParticipantGraph`] of its joins. Peers are referenced
//! through [`ParticipantRef`], a weak handle keyed by the peer's media object
//! id, so two joined participants never keep each other alive.
//!
//! Most capabilities are provided by the [`Participant`] trait's default
//! methods on top of the shared [`ParticipantCore`]; concrete participants
//! only supply identity, media and the few hooks where they differ.

pub mod active_input;
mod shared;
pub mod graph;

pub use self::active_input::ActiveInputIndex;
pub use self::shared::ParticipantCore;
pub use self::graph::{HoldChange, JoinEdge, ParticipantGraph, Reservation};

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::call::Call;
use crate::config::JoinOptions;
use crate::errors::{CallControlError, Result};
use crate::events::{
    DispatchHandle, EventSubscriber, ExceptionHandler, ParticipantEvent, ParticipantObserver,
};
use crate::join::{orchestrator, Joint, Unjoint};
use crate::media::{MediaResource, MediaService};
use crate::mixer::ClampDtmfAdapter;
use crate::types::{Attributes, Direction, Endpoint, JoinType, MediaObjectId, ParticipantKind};

/// Weak, id-keyed reference to a participant
#[derive(Clone)]
pub struct ParticipantRef {
    pub id: MediaObjectId,
    pub kind: ParticipantKind,
    handle: Weak<dyn Participant>,
}

impl ParticipantRef {
    pub fn new(id: MediaObjectId, kind: ParticipantKind, handle: Weak<dyn Participant>) -> Self {
        Self { id, kind, handle }
    }

    /// A reference whose participant is unknown; never upgrades
    pub fn detached(id: MediaObjectId, kind: ParticipantKind) -> Self {
        let handle: Weak<dyn Participant> = Weak::<ClampDtmfAdapter>::new();
        Self { id, kind, handle }
    }

    pub fn from_handle(participant: &Arc<dyn Participant>) -> Self {
        Self {
            id: participant.id(),
            kind: participant.kind(),
            handle: Arc::downgrade(participant),
        }
    }

    /// The participant, if it is still alive
    pub fn upgrade(&self) -> Option<Arc<dyn Participant>> {
        self.handle.upgrade()
    }
}

impl PartialEq for ParticipantRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ParticipantRef {}

impl fmt::Debug for ParticipantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

/// A joinable endpoint
#[async_trait]
pub trait Participant: Send + Sync + fmt::Debug {
    /// Identity; the id of the underlying media object
    fn id(&self) -> MediaObjectId;

    fn kind(&self) -> ParticipantKind;

    /// Shared participant state, `None` once the state's owner is gone
    fn core(&self) -> Option<Arc<ParticipantCore>>;

    /// Underlying media object, `None` once released
    fn media_object(&self) -> Option<Arc<dyn MediaResource>>;

    /// The participant that owns joins made through this one
    fn join_owner(&self) -> Option<Arc<dyn Participant>>;

    fn address(&self) -> Endpoint {
        self.core().map(|core| core.address().clone()).unwrap_or_default()
    }

    fn attributes(&self) -> Arc<Attributes> {
        self.core().map(|core| core.attributes()).unwrap_or_default()
    }

    fn application_state(&self, fsm: &str) -> Option<String> {
        self.attributes().application_state(fsm)
    }

    fn set_application_state(&self, fsm: &str, state: &str) {
        self.attributes().set_application_state(fsm, state);
    }

    fn participant_ref(&self) -> Option<ParticipantRef> {
        self.core().map(|core| core.participant_ref())
    }

    fn dispatch(&self, event: ParticipantEvent) -> DispatchHandle {
        match self.core() {
            Some(core) => core.dispatcher().dispatch(event),
            None => DispatchHandle::undelivered(),
        }
    }

    fn subscribe(&self) -> Result<EventSubscriber> {
        self.core()
            .map(|core| core.dispatcher().subscribe())
            .ok_or_else(|| CallControlError::illegal_state(format!("{} has no event dispatcher", self.id())))
    }

    fn add_observer(&self, observer: Arc<dyn ParticipantObserver>) {
        if let Some(core) = self.core() {
            core.dispatcher().add_observer(observer);
        }
    }

    fn remove_observer(&self, observer: &Arc<dyn ParticipantObserver>) {
        if let Some(core) = self.core() {
            core.dispatcher().remove_observer(observer);
        }
    }

    fn add_exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        if let Some(core) = self.core() {
            core.dispatcher().add_exception_handler(handler);
        }
    }

    /// Every participant currently joined to this one
    fn participants(&self) -> Vec<ParticipantRef> {
        self.core().map(|core| core.peers()).unwrap_or_default()
    }

    /// Joined participants whose edge carries media in `direction`
    fn participants_in(&self, direction: Direction) -> Vec<ParticipantRef> {
        self.core().map(|core| core.peers_in(direction)).unwrap_or_default()
    }

    fn edge_to(&self, peer: MediaObjectId) -> Option<JoinEdge> {
        self.core().and_then(|core| core.edge(peer))
    }

    /// Record a join; `false` when the peer was already present
    fn add_participant(&self, edge: JoinEdge) -> bool {
        let Some(core) = self.core() else {
            return false;
        };
        let added = core.add_edge(edge.clone());
        if added {
            self.on_edge_added(&edge);
        }
        added
    }

    /// Forget a join, returning the removed edge
    fn remove_participant(&self, peer: MediaObjectId) -> Option<JoinEdge> {
        let removed = self.core().and_then(|core| core.remove_edge(peer));
        if let Some(edge) = &removed {
            self.on_edge_removed(edge);
        }
        removed
    }

    /// Record `holder` as keeping the bridge to `peer` suspended
    fn add_bridge_holder(&self, peer: MediaObjectId, holder: MediaObjectId) -> Option<HoldChange> {
        self.core().and_then(|core| core.add_holder(peer, holder))
    }

    fn remove_bridge_holder(&self, peer: MediaObjectId, holder: MediaObjectId) -> Option<HoldChange> {
        self.core().and_then(|core| core.remove_holder(peer, holder))
    }

    /// Reserve a join to `peer` in this participant's graph
    fn reserve_peer(&self, peer: MediaObjectId) -> Reservation {
        self.core().map(|core| core.reserve(peer)).unwrap_or(Reservation::Closed)
    }

    fn release_peer(&self, peer: MediaObjectId) {
        if let Some(core) = self.core() {
            core.release_reservation(peer);
        }
    }

    /// Mark an unjoin from `peer` in flight, removing the edge when `remove` is set
    fn begin_unjoin(&self, peer: MediaObjectId, done: watch::Receiver<bool>, remove: bool) -> Option<JoinEdge> {
        let edge = self.core().and_then(|core| core.begin_unjoin(peer, done, remove));
        if let (true, Some(edge)) = (remove, &edge) {
            self.on_edge_removed(edge);
        }
        edge
    }

    fn finish_unjoin(&self, peer: MediaObjectId) {
        if let Some(core) = self.core() {
            core.finish_unjoin(peer);
        }
    }

    /// Whether a join to a call made with `options` goes through a clamp adapter
    fn clamps_dtmf(&self, _options: &JoinOptions) -> bool {
        false
    }

    async fn create_clamp_adapter(&self) -> Result<Option<Arc<ClampDtmfAdapter>>> {
        Ok(None)
    }

    fn as_call(&self) -> Option<Arc<Call>> {
        None
    }

    fn on_edge_added(&self, _edge: &JoinEdge) {}

    fn on_edge_removed(&self, _edge: &JoinEdge) {}

    /// Called once every edge is gone during a disconnect
    fn on_disconnected(&self) {}

    /// Signaling teardown run by [`disconnect`](Participant::disconnect) before media is released
    async fn terminate_signaling(&self) {}

    fn is_disconnected(&self) -> bool {
        self.core().map(|core| core.is_disconnected()).unwrap_or(true)
    }

    /// Media capabilities of this participant, created on first use
    async fn media_service(&self) -> Result<Arc<dyn MediaService>> {
        let core = self
            .core()
            .ok_or_else(|| CallControlError::illegal_state(format!("{} was released", self.id())))?;
        core.media_service().await
    }

    /// Join `other` asynchronously; see [`orchestrator::join`]
    async fn join(
        &self,
        other: Arc<dyn Participant>,
        join_type: JoinType,
        direction: Direction,
        options: JoinOptions,
    ) -> Result<Joint> {
        let this = self
            .join_owner()
            .ok_or_else(|| CallControlError::illegal_state(format!("{} was released", self.id())))?;
        orchestrator::join(this, other, join_type, direction, options).await
    }

    /// Remove the join to `other`; see [`orchestrator::unjoin`]
    async fn unjoin(&self, other: Arc<dyn Participant>, notify_peer: bool) -> Unjoint {
        match self.join_owner() {
            Some(this) => orchestrator::unjoin(this, other, notify_peer),
            None => orchestrator::not_joined(ParticipantRef::detached(self.id(), self.kind()), &other),
        }
    }

    /// Leave every join and release all media; idempotent
    async fn disconnect(&self) {
        if let Some(this) = self.join_owner() {
            orchestrator::disconnect(this).await;
        }
    }
}
