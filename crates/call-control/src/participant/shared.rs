use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::graph::{HoldChange, Reservation};
use super::{JoinEdge, Participant, ParticipantGraph, ParticipantRef};
use crate::config::CallControlContext;
use crate::errors::{CallControlError, Result};
use crate::events::EventDispatcher;
use crate::media::{MediaResource, MediaService};
use crate::types::{Attributes, Direction, Endpoint, MediaObjectId, ParticipantKind};

/// State shared by every participant kind.
///
/// Graph access goes through short critical sections; no lock here is held
/// across an `.await`.
pub struct ParticipantCore {
    id: MediaObjectId,
    kind: ParticipantKind,
    address: Endpoint,
    context: CallControlContext,
    attributes: Arc<Attributes>,
    dispatcher: EventDispatcher,
    graph: Mutex<ParticipantGraph>,
    media: RwLock<Option<Arc<dyn MediaResource>>>,
    media_service: tokio::sync::Mutex<Option<Arc<dyn MediaService>>>,
    disconnected: AtomicBool,
    handle: Weak<dyn Participant>,
}

impl std::fmt::Debug for ParticipantCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantCore")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("address", &self.address.uri)
            .field("edges", &self.graph.lock().len())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl ParticipantCore {
    pub fn new(
        kind: ParticipantKind,
        address: Endpoint,
        context: CallControlContext,
        dispatcher: EventDispatcher,
        media: Arc<dyn MediaResource>,
        handle: Weak<dyn Participant>,
    ) -> Self {
        Self {
            id: media.id(),
            kind,
            address,
            context,
            attributes: Arc::new(Attributes::new()),
            dispatcher,
            graph: Mutex::new(ParticipantGraph::new()),
            media: RwLock::new(Some(media)),
            media_service: tokio::sync::Mutex::new(None),
            disconnected: AtomicBool::new(false),
            handle,
        }
    }

    pub fn id(&self) -> MediaObjectId {
        self.id
    }

    pub fn kind(&self) -> ParticipantKind {
        self.kind
    }

    pub fn address(&self) -> &Endpoint {
        &self.address
    }

    pub fn context(&self) -> &CallControlContext {
        &self.context
    }

    pub fn attributes(&self) -> Arc<Attributes> {
        self.attributes.clone()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn participant_ref(&self) -> ParticipantRef {
        ParticipantRef::new(self.id, self.kind, self.handle.clone())
    }

    /// Strong handle to the owning participant
    pub fn handle(&self) -> Option<Arc<dyn Participant>> {
        self.handle.upgrade()
    }

    pub fn media(&self) -> Option<Arc<dyn MediaResource>> {
        self.media.read().clone()
    }

    pub(crate) fn take_media(&self) -> Option<Arc<dyn MediaResource>> {
        self.media.write().take()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Flip to disconnected; `false` when already disconnected
    pub(crate) fn mark_disconnected(&self) -> bool {
        !self.disconnected.swap(true, Ordering::AcqRel)
    }

    pub fn edge(&self, peer: MediaObjectId) -> Option<JoinEdge> {
        self.graph.lock().edge(peer).cloned()
    }

    pub fn edges(&self) -> Vec<JoinEdge> {
        self.graph.lock().edges().to_vec()
    }

    pub fn peers(&self) -> Vec<ParticipantRef> {
        self.graph.lock().peers()
    }

    pub fn peers_in(&self, direction: Direction) -> Vec<ParticipantRef> {
        self.graph.lock().peers_in(direction)
    }

    pub(crate) fn add_edge(&self, edge: JoinEdge) -> bool {
        let peer = edge.peer.id;
        let added = self.graph.lock().add(edge);
        if added {
            debug!("{} {} gained edge to {}", self.kind, self.id, peer);
        }
        added
    }

    pub(crate) fn remove_edge(&self, peer: MediaObjectId) -> Option<JoinEdge> {
        let removed = self.graph.lock().remove(peer);
        if removed.is_some() {
            debug!("{} {} dropped edge to {}", self.kind, self.id, peer);
        }
        removed
    }

    pub(crate) fn add_holder(&self, peer: MediaObjectId, holder: MediaObjectId) -> Option<HoldChange> {
        self.graph.lock().add_holder(peer, holder)
    }

    pub(crate) fn remove_holder(&self, peer: MediaObjectId, holder: MediaObjectId) -> Option<HoldChange> {
        self.graph.lock().remove_holder(peer, holder)
    }

    pub(crate) fn reserve(&self, peer: MediaObjectId) -> Reservation {
        self.graph.lock().reserve(peer)
    }

    pub(crate) fn release_reservation(&self, peer: MediaObjectId) {
        self.graph.lock().release_reservation(peer);
    }

    pub(crate) fn begin_unjoin(&self, peer: MediaObjectId, done: watch::Receiver<bool>, remove: bool) -> Option<JoinEdge> {
        let edge = self.graph.lock().begin_unjoin(peer, done, remove);
        if remove && edge.is_some() {
            debug!("{} {} dropped edge to {}", self.kind, self.id, peer);
        }
        edge
    }

    pub(crate) fn finish_unjoin(&self, peer: MediaObjectId) {
        self.graph.lock().finish_unjoin(peer);
    }

    pub(crate) fn drain_edges(&self) -> Vec<JoinEdge> {
        self.graph.lock().drain()
    }

    pub(crate) async fn take_media_service(&self) -> Option<Arc<dyn MediaService>> {
        self.media_service.lock().await.take()
    }

    /// Existing media service, or a new one joined duplex to this participant's media
    pub async fn media_service(&self) -> Result<Arc<dyn MediaService>> {
        let mut slot = self.media_service.lock().await;
        if let Some(service) = slot.as_ref() {
            return Ok(service.clone());
        }
        if self.is_disconnected() {
            return Err(CallControlError::illegal_state(format!("{} {} is disconnected", self.kind, self.id)));
        }
        let factory = self.context.media_services.clone().ok_or_else(|| {
            CallControlError::illegal_state(format!("No media service factory configured for {}", self.id))
        })?;
        let media = self
            .media()
            .ok_or_else(|| CallControlError::illegal_state(format!("{} {} was released", self.kind, self.id)))?;

        let service = factory.create(self.id).await?;
        let group = service.media_group();
        if let Err(e) = group.join(Direction::Duplex, &media).await {
            if let Err(release) = service.release().await {
                warn!("Failed to release media service of {}: {}", self.id, release);
            }
            return Err(e.into());
        }

        info!("Created media service for {} {}", self.kind, self.id);
        *slot = Some(service.clone());
        Ok(service)
    }
}
