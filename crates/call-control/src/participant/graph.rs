//! Per-participant join graph
//!
//! The graph only stores edges. Keeping the two sides of a join symmetric is
//! the orchestrator's job.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::watch;

use super::ParticipantRef;
use crate::mixer::ClampDtmfAdapter;
use crate::types::{Direction, JoinType, MediaObjectId};

/// One join, seen from the participant owning the graph
#[derive(Debug, Clone)]
pub struct JoinEdge {
    pub peer: ParticipantRef,
    pub join_type: JoinType,
    /// Direction from the owner towards `peer`
    pub direction: Direction,
    /// Clamp adapter the media actually flows through, if any
    pub real_joined: Option<Arc<ClampDtmfAdapter>>,
    /// Calls whose hold keeps the media of this bridge disconnected
    pub held_by: BTreeSet<MediaObjectId>,
}

impl JoinEdge {
    pub fn new(peer: ParticipantRef, join_type: JoinType, direction: Direction) -> Self {
        Self {
            peer,
            join_type,
            direction,
            real_joined: None,
            held_by: BTreeSet::new(),
        }
    }

    pub fn with_adapter(mut self, adapter: Option<Arc<ClampDtmfAdapter>>) -> Self {
        self.real_joined = adapter;
        self
    }

    /// Whether the media of this join is currently disconnected by a hold
    pub fn is_suspended(&self) -> bool {
        !self.held_by.is_empty()
    }

    /// The edge the peer holds for the same join
    pub fn mirrored(&self, owner: ParticipantRef) -> Self {
        Self {
            peer: owner,
            join_type: self.join_type,
            direction: self.direction.inverse(),
            real_joined: self.real_joined.clone(),
            held_by: self.held_by.clone(),
        }
    }
}

/// Effect of adding or removing a hold on a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldChange {
    /// The holder was already (or was never) recorded
    Unchanged,
    /// Recorded; other holders keep the media as it is
    Recorded,
    /// First holder added or last holder removed; the media has to follow
    Media,
}

/// Outcome of [`ParticipantGraph::reserve`]
#[derive(Debug, Clone)]
pub enum Reservation {
    Reserved,
    /// Already joined, or a join is in flight
    Busy,
    /// An unjoin is in flight; the receiver turns `true` once it is done
    Unjoining(watch::Receiver<bool>),
    /// The graph was drained by a disconnect
    Closed,
}

#[derive(Debug)]
enum Pending {
    Join,
    Unjoin(watch::Receiver<bool>),
}

/// Ordered edges, at most one per peer, plus in-flight joins and unjoins
#[derive(Debug, Default)]
pub struct ParticipantGraph {
    edges: Vec<JoinEdge>,
    pending: HashMap<MediaObjectId, Pending>,
    closed: bool,
}

impl ParticipantGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `edge`; `false` (and no change) when its peer is already present
    /// or the graph was drained
    pub fn add(&mut self, edge: JoinEdge) -> bool {
        if self.closed || self.contains(edge.peer.id) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn remove(&mut self, peer: MediaObjectId) -> Option<JoinEdge> {
        let index = self.edges.iter().position(|edge| edge.peer.id == peer)?;
        Some(self.edges.remove(index))
    }

    pub fn edge(&self, peer: MediaObjectId) -> Option<&JoinEdge> {
        self.edges.iter().find(|edge| edge.peer.id == peer)
    }

    pub fn contains(&self, peer: MediaObjectId) -> bool {
        self.edge(peer).is_some()
    }

    /// Record `holder` as holding the bridge to `peer`; `None` without an edge
    pub fn add_holder(&mut self, peer: MediaObjectId, holder: MediaObjectId) -> Option<HoldChange> {
        let edge = self.edges.iter_mut().find(|edge| edge.peer.id == peer)?;
        let first = edge.held_by.is_empty();
        Some(match (edge.held_by.insert(holder), first) {
            (false, _) => HoldChange::Unchanged,
            (true, true) => HoldChange::Media,
            (true, false) => HoldChange::Recorded,
        })
    }

    /// Drop `holder` from the bridge to `peer`; `None` without an edge
    pub fn remove_holder(&mut self, peer: MediaObjectId, holder: MediaObjectId) -> Option<HoldChange> {
        let edge = self.edges.iter_mut().find(|edge| edge.peer.id == peer)?;
        Some(match (edge.held_by.remove(&holder), edge.held_by.is_empty()) {
            (false, _) => HoldChange::Unchanged,
            (true, true) => HoldChange::Media,
            (true, false) => HoldChange::Recorded,
        })
    }

    pub fn edges(&self) -> &[JoinEdge] {
        &self.edges
    }

    pub fn peers(&self) -> Vec<ParticipantRef> {
        self.edges.iter().map(|edge| edge.peer.clone()).collect()
    }

    pub fn peers_in(&self, direction: Direction) -> Vec<ParticipantRef> {
        self.edges
            .iter()
            .filter(|edge| edge.direction.covers(direction))
            .map(|edge| edge.peer.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reserve a join to `peer`
    pub fn reserve(&mut self, peer: MediaObjectId) -> Reservation {
        if self.closed {
            return Reservation::Closed;
        }
        match self.pending.get(&peer) {
            Some(Pending::Unjoin(done)) => return Reservation::Unjoining(done.clone()),
            Some(Pending::Join) => return Reservation::Busy,
            None => {}
        }
        if self.contains(peer) {
            return Reservation::Busy;
        }
        self.pending.insert(peer, Pending::Join);
        Reservation::Reserved
    }

    /// Drop a join reservation; an unjoin in flight keeps its entry
    pub fn release_reservation(&mut self, peer: MediaObjectId) {
        if matches!(self.pending.get(&peer), Some(Pending::Join)) {
            self.pending.remove(&peer);
        }
    }

    /// Mark an unjoin from `peer` as in flight until `done` turns `true`,
    /// removing the edge to it when `remove` is set
    pub fn begin_unjoin(&mut self, peer: MediaObjectId, done: watch::Receiver<bool>, remove: bool) -> Option<JoinEdge> {
        let edge = if remove { self.remove(peer) } else { self.edge(peer).cloned() };
        if edge.is_some() && !self.closed {
            self.pending.insert(peer, Pending::Unjoin(done));
        }
        edge
    }

    pub fn finish_unjoin(&mut self, peer: MediaObjectId) {
        if matches!(self.pending.get(&peer), Some(Pending::Unjoin(_))) {
            self.pending.remove(&peer);
        }
    }

    pub fn is_pending(&self, peer: MediaObjectId) -> bool {
        self.pending.contains_key(&peer)
    }

    /// Remove and return every edge, dropping pending entries too. The graph
    /// accepts no edges afterwards.
    pub fn drain(&mut self) -> Vec<JoinEdge> {
        self.closed = true;
        self.pending.clear();
        std::mem::take(&mut self.edges)
    }
}
