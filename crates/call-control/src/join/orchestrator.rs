//! Join, unjoin and disconnect of participants
//!
//! Every operation keeps the same invariant: participant A has an edge to B
//! exactly when B has an edge back to A, with the same join type and the
//! inverse direction. Graph mutations happen in short critical sections on
//! each side; underlying media operations run between them, without locks.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{Joint, Unjoint};
use crate::config::JoinOptions;
use crate::errors::{CallControlError, Result};
use crate::events::{JoinCause, JoinCompleteEvent, ParticipantEvent, UnjoinCause, UnjoinCompleteEvent};
use crate::media::MediaResource;
use crate::mixer::ClampDtmfAdapter;
use crate::participant::{HoldChange, JoinEdge, Participant, ParticipantRef, Reservation};
use crate::types::{Direction, JoinType, MediaObjectId, ParticipantKind};

/// Join `this` to `other`.
///
/// Structural preconditions fail synchronously: a released `this` is
/// [`CallControlError::IllegalState`], an unconnectable `other` is
/// [`CallControlError::InvalidArgument`]. Joining a peer that is already
/// joined (or being joined) resolves immediately to a successful no-op; a
/// join issued while an unjoin of the same pair is in flight waits for it.
/// Failures of the underlying media join are only reported through the
/// returned [`Joint`] and the completion events.
pub async fn join(
    this: Arc<dyn Participant>,
    other: Arc<dyn Participant>,
    join_type: JoinType,
    direction: Direction,
    options: JoinOptions,
) -> Result<Joint> {
    let core = this.core().ok_or_else(|| released(this.as_ref()))?;
    let this_media = this.media_object().ok_or_else(|| released(this.as_ref()))?;

    // A join to an adapter is a join to its mixer.
    let other = other.join_owner().ok_or_else(|| not_connectable(other.as_ref()))?;
    if other.id() == this.id() {
        return Err(CallControlError::invalid_argument(format!(
            "{} {} cannot join itself",
            this.kind(),
            this.id()
        )));
    }
    let other_ref = other.participant_ref().ok_or_else(|| not_connectable(other.as_ref()))?;
    let this_ref = core.participant_ref();

    loop {
        match reserve_pair(&this, &other) {
            Reservation::Reserved => break,
            Reservation::Busy => {
                debug!("{} {} already joined to {}, nothing to do", this.kind(), this.id(), other.id());
                return Ok(Joint::completed(JoinCompleteEvent {
                    source: this_ref,
                    peer: other_ref,
                    join_type,
                    direction,
                    cause: JoinCause::Joined,
                    error: None,
                    initiator: true,
                }));
            }
            Reservation::Unjoining(mut done) => {
                debug!("Waiting for unjoin of {} and {} to finish", this.id(), other.id());
                // A closed channel means the unjoin is over as well.
                done.wait_for(|finished| *finished).await.ok();
            }
            Reservation::Closed if this.is_disconnected() => return Err(released(this.as_ref())),
            Reservation::Closed => return Err(not_connectable(other.as_ref())),
        }
    }

    let other_media = match other.media_object() {
        Some(media) if media.is_joinable() => media,
        _ => {
            release_pair(&this, &other);
            return Err(not_connectable(other.as_ref()));
        }
    };

    let clamp = clamping_side(&this, &other, &options);
    info!(
        "Joining {} {} to {} {} ({:?}, {:?}{})",
        this.kind(),
        this.id(),
        other.kind(),
        other.id(),
        join_type,
        direction,
        if clamp.is_some() { ", clamping DTMF" } else { "" }
    );

    let (abort_this, abort_other) = (this.clone(), other.clone());
    let request = JoinRequest {
        this,
        other,
        this_ref: this_ref.clone(),
        other_ref: other_ref.clone(),
        this_media,
        other_media,
        join_type,
        direction,
        clamp,
    };

    Ok(Joint::spawn(run_join(request), move |reason| {
        release_pair(&abort_this, &abort_other);
        JoinCompleteEvent {
            source: this_ref,
            peer: other_ref,
            join_type,
            direction,
            cause: JoinCause::Error,
            error: Some(CallControlError::internal(format!("Join aborted: {}", reason))),
            initiator: true,
        }
    }))
}

struct JoinRequest {
    this: Arc<dyn Participant>,
    other: Arc<dyn Participant>,
    this_ref: ParticipantRef,
    other_ref: ParticipantRef,
    this_media: Arc<dyn MediaResource>,
    other_media: Arc<dyn MediaResource>,
    join_type: JoinType,
    direction: Direction,
    clamp: Option<ClampSide>,
}

/// The mixer end of a call/mixer join that goes through a clamp adapter
struct ClampSide {
    mixer: Arc<dyn Participant>,
    mixer_is_this: bool,
}

fn clamping_side(this: &Arc<dyn Participant>, other: &Arc<dyn Participant>, options: &JoinOptions) -> Option<ClampSide> {
    let side = match (this.kind(), other.kind()) {
        (ParticipantKind::Mixer, ParticipantKind::Call) => ClampSide {
            mixer: this.clone(),
            mixer_is_this: true,
        },
        (ParticipantKind::Call, ParticipantKind::Mixer) => ClampSide {
            mixer: other.clone(),
            mixer_is_this: false,
        },
        _ => return None,
    };
    side.mixer.clamps_dtmf(options).then_some(side)
}

async fn run_join(request: JoinRequest) -> JoinCompleteEvent {
    let JoinRequest {
        this,
        other,
        this_ref,
        other_ref,
        this_media,
        other_media,
        join_type,
        direction,
        clamp,
    } = request;

    let adapter = match &clamp {
        Some(side) => connect_through_adapter(side, direction, &this_media, &other_media).await,
        None => None,
    };
    let connected = match &adapter {
        Some(_) => Ok(()),
        None => this_media
            .join(direction, &other_media)
            .await
            .map_err(CallControlError::from),
    };

    let outcome = match connected {
        Ok(()) => {
            let edge = JoinEdge::new(other_ref.clone(), join_type, direction).with_adapter(adapter);
            let mirror = edge.mirrored(this_ref.clone());
            match commit_edges(&this, &other, edge, mirror) {
                Commit::Joined => Ok(()),
                Commit::Refused(edge) => {
                    if let Err(e) = disconnect_media(this.id(), Some(this_media), Some(other_media), &edge).await {
                        warn!("Failed to undo join of {} and {}: {}", this.id(), other.id(), e);
                    }
                    Err(CallControlError::illegal_state("Participant disconnected while joining"))
                }
                Commit::Dropped => Err(CallControlError::illegal_state("Participant disconnected while joining")),
            }
        }
        Err(e) => Err(e),
    };

    let mut event = JoinCompleteEvent {
        source: this_ref.clone(),
        peer: other_ref.clone(),
        join_type,
        direction,
        cause: JoinCause::Joined,
        error: None,
        initiator: true,
    };

    match outcome {
        Ok(()) => info!("Joined {} {} to {} {}", this.kind(), this.id(), other.kind(), other.id()),
        Err(e) => {
            warn!("Join of {} {} to {} {} failed: {}", this.kind(), this.id(), other.kind(), other.id(), e);
            event.cause = JoinCause::Error;
            event.error = Some(e);
        }
    }
    release_pair(&this, &other);

    this.dispatch(ParticipantEvent::JoinComplete(event.clone()));
    other.dispatch(ParticipantEvent::JoinComplete(event.mirrored()));
    event
}

/// Reserve the join in both graphs, lower id first, so joins of the same
/// pair issued from either side contend on the same entry
fn reserve_pair(this: &Arc<dyn Participant>, other: &Arc<dyn Participant>) -> Reservation {
    let (first, second) = if this.id() < other.id() { (this, other) } else { (other, this) };
    match first.reserve_peer(second.id()) {
        Reservation::Reserved => {}
        refused => return refused,
    }
    match second.reserve_peer(first.id()) {
        Reservation::Reserved => Reservation::Reserved,
        refused => {
            first.release_peer(second.id());
            refused
        }
    }
}

fn release_pair(this: &Arc<dyn Participant>, other: &Arc<dyn Participant>) {
    this.release_peer(other.id());
    other.release_peer(this.id());
}

enum Commit {
    Joined,
    /// A graph refused the edge; the media join is still ours to undo
    Refused(JoinEdge),
    /// A disconnect took the edge and undid the media itself
    Dropped,
}

/// Record the join on both sides.
///
/// A drained graph refuses new edges, so a participant disconnected while
/// the media join ran never ends up with a live edge.
fn commit_edges(this: &Arc<dyn Participant>, other: &Arc<dyn Participant>, edge: JoinEdge, mirror: JoinEdge) -> Commit {
    if !this.add_participant(edge.clone()) {
        return Commit::Refused(edge);
    }
    if !other.add_participant(mirror) {
        return match this.remove_participant(other.id()) {
            Some(edge) => Commit::Refused(edge),
            None => Commit::Dropped,
        };
    }
    // `this` was drained between the two adds and never saw the mirror.
    if this.edge_to(other.id()).is_none() {
        other.remove_participant(this.id());
        return Commit::Dropped;
    }
    Commit::Joined
}

/// Create a clamp adapter and wire the call to it.
///
/// `None` means the caller should join directly; a half-created adapter is
/// released before returning.
async fn connect_through_adapter(
    side: &ClampSide,
    direction: Direction,
    this_media: &Arc<dyn MediaResource>,
    other_media: &Arc<dyn MediaResource>,
) -> Option<Arc<ClampDtmfAdapter>> {
    let adapter = match side.mixer.create_clamp_adapter().await {
        Ok(Some(adapter)) => adapter,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to create DTMF clamp adapter on {}, joining directly: {}", side.mixer.id(), e);
            return None;
        }
    };

    let adapter_media = adapter.media();
    let connected = if side.mixer_is_this {
        adapter_media.join(direction, other_media).await
    } else {
        this_media.join(direction, &adapter_media).await
    };

    match connected {
        Ok(()) => Some(adapter),
        Err(e) => {
            warn!("Failed to join through DTMF clamp adapter {}, joining directly: {}", adapter.id(), e);
            if let Err(e) = adapter.release().await {
                warn!("Failed to release DTMF clamp adapter {}: {}", adapter.id(), e);
            }
            None
        }
    }
}

/// Undo the media side of `edge`, owned by participant `owner`.
///
/// The adapter recorded on the edge, if any, is released whatever happens.
async fn disconnect_media(
    owner: MediaObjectId,
    owner_media: Option<Arc<dyn MediaResource>>,
    peer_media: Option<Arc<dyn MediaResource>>,
    edge: &JoinEdge,
) -> Result<()> {
    match &edge.real_joined {
        Some(adapter) => {
            let call_media = if adapter.owner_id() == owner { peer_media } else { owner_media };
            let result = match call_media {
                Some(call_media) if !edge.is_suspended() => adapter
                    .media()
                    .unjoin(&call_media)
                    .await
                    .map_err(CallControlError::from),
                _ => Ok(()),
            };
            if let Err(e) = adapter.release().await {
                warn!("Failed to release DTMF clamp adapter {}: {}", adapter.id(), e);
            }
            result
        }
        None => match (owner_media, peer_media) {
            (Some(a), Some(b)) if !edge.is_suspended() => a.unjoin(&b).await.map_err(CallControlError::from),
            _ => Ok(()),
        },
    }
}

/// Reconnect the media of a suspended `edge`
async fn reconnect_media(owner: MediaObjectId, owner_media: &Arc<dyn MediaResource>, peer_media: &Arc<dyn MediaResource>, edge: &JoinEdge) -> Result<()> {
    let result = match &edge.real_joined {
        Some(adapter) if adapter.owner_id() == owner => adapter.media().join(edge.direction, peer_media).await,
        Some(adapter) => owner_media.join(edge.direction, &adapter.media()).await,
        None => owner_media.join(edge.direction, peer_media).await,
    };
    result.map_err(CallControlError::from)
}

fn not_joined_event(source: ParticipantRef, other: &Arc<dyn Participant>) -> UnjoinCompleteEvent {
    UnjoinCompleteEvent {
        source,
        peer: ParticipantRef::from_handle(other),
        cause: UnjoinCause::NotJoined,
        error: None,
        initiator: true,
    }
}

/// Already-resolved unjoin for a peer `source` has no edge to
pub(crate) fn not_joined(source: ParticipantRef, other: &Arc<dyn Participant>) -> Unjoint {
    Unjoint::completed(not_joined_event(source, other))
}

/// Clears the in-flight marks of an unjoin and wakes joins waiting on it,
/// also when the unjoin task is aborted
struct InFlightUnjoin {
    this: Arc<dyn Participant>,
    other: Arc<dyn Participant>,
    done: watch::Sender<bool>,
}

impl Drop for InFlightUnjoin {
    fn drop(&mut self) {
        self.this.finish_unjoin(self.other.id());
        self.other.finish_unjoin(self.this.id());
        self.done.send_replace(true);
    }
}

/// Remove the join between `this` and `other`.
///
/// Without an edge the result is `NotJoined` and nothing else happens. With
/// `notify_peer` the underlying media is disconnected and `other` is told to
/// drop its own edge; the peer reports that through its own event. The edge
/// is gone afterwards even when the media disconnect failed. Until the
/// returned task completes, new joins of the pair wait for it.
pub fn unjoin(this: Arc<dyn Participant>, other: Arc<dyn Participant>, notify_peer: bool) -> Unjoint {
    let other = other.join_owner().unwrap_or(other);
    let this_ref = this
        .participant_ref()
        .unwrap_or_else(|| ParticipantRef::detached(this.id(), this.kind()));

    let (done, watcher) = watch::channel(false);
    let removed = if notify_peer {
        this.begin_unjoin(other.id(), watcher.clone(), true)
    } else {
        this.remove_participant(other.id())
    };
    let Some(edge) = removed else {
        debug!("{} {} is not joined to {}", this.kind(), this.id(), other.id());
        let event = not_joined_event(this_ref, &other);
        this.dispatch(ParticipantEvent::UnjoinComplete(event.clone()));
        return Unjoint::completed(event);
    };
    let other_ref = edge.peer.clone();
    let in_flight = notify_peer.then(|| {
        other.begin_unjoin(this.id(), watcher, false);
        InFlightUnjoin {
            this: this.clone(),
            other: other.clone(),
            done,
        }
    });

    let fallback_this = this_ref.clone();
    let fallback_other = other_ref.clone();
    Unjoint::spawn(
        async move {
            let _in_flight = in_flight;
            let mut event = UnjoinCompleteEvent {
                source: this_ref,
                peer: other_ref,
                cause: UnjoinCause::SuccessUnjoin,
                error: None,
                initiator: notify_peer,
            };

            if notify_peer {
                let result = disconnect_media(this.id(), this.media_object(), other.media_object(), &edge).await;
                if let Err(e) = result {
                    warn!("Unjoin of {} {} from {} failed: {}", this.kind(), this.id(), other.id(), e);
                    event.cause = UnjoinCause::FailUnjoin;
                    event.error = Some(e);
                }
                let peer_side = other.unjoin(this.clone(), false).await;
                peer_side.get().await;
            }

            info!("Unjoined {} {} from {} {}", this.kind(), this.id(), other.kind(), other.id());
            this.dispatch(ParticipantEvent::UnjoinComplete(event.clone()));
            event
        },
        move |reason| UnjoinCompleteEvent {
            source: fallback_this,
            peer: fallback_other,
            cause: UnjoinCause::FailUnjoin,
            error: Some(CallControlError::internal(format!("Unjoin aborted: {}", reason))),
            initiator: notify_peer,
        },
    )
}

/// Tear down every join of `this` and release its media.
///
/// Each peer drops its edge and observes a `Disconnect` event, as does
/// `this`. Release failures are logged and never stop the remaining steps.
/// A second call is a no-op.
pub async fn disconnect(this: Arc<dyn Participant>) {
    let Some(core) = this.core() else {
        return;
    };
    if !core.mark_disconnected() {
        debug!("{} {} already disconnected", this.kind(), this.id());
        return;
    }
    info!("Disconnecting {} {}", this.kind(), this.id());

    this.terminate_signaling().await;

    let this_ref = core.participant_ref();
    for edge in core.drain_edges() {
        this.on_edge_removed(&edge);
        let peer = edge.peer.upgrade();
        let peer_media = peer.as_ref().and_then(|peer| peer.media_object());

        if let Err(e) = disconnect_media(this.id(), this.media_object(), peer_media, &edge).await {
            warn!("Failed to disconnect media of {} from {}: {}", this.id(), edge.peer.id, e);
        }

        if let Some(peer) = &peer {
            peer.remove_participant(this.id());
            peer.dispatch(ParticipantEvent::UnjoinComplete(UnjoinCompleteEvent {
                source: edge.peer.clone(),
                peer: this_ref.clone(),
                cause: UnjoinCause::Disconnect,
                error: None,
                initiator: false,
            }));
        }
        this.dispatch(ParticipantEvent::UnjoinComplete(UnjoinCompleteEvent {
            source: this_ref.clone(),
            peer: edge.peer.clone(),
            cause: UnjoinCause::Disconnect,
            error: None,
            initiator: true,
        }));
    }
    this.on_disconnected();

    if let Some(service) = core.take_media_service().await {
        if let Err(e) = service.release().await {
            warn!("Failed to release media service of {}: {}", this.id(), e);
        }
    }
    if let Some(media) = core.take_media() {
        if let Err(e) = media.release().await {
            warn!("Failed to release media of {}: {}", this.id(), e);
        }
    }

    this.dispatch(ParticipantEvent::MediaResourceDisconnected { participant: this.id() });
}

/// Hold the bridge to `peer` on behalf of `this`, keeping both edges.
///
/// The media is disconnected by the first holder only; later holders are
/// just recorded. Returns `false` when `this` already held the bridge.
pub async fn suspend_bridge(this: &Arc<dyn Participant>, peer: MediaObjectId) -> Result<bool> {
    let (edge, other) = bridge(this, peer)?;
    let holder = this.id();
    let change = record_holder(this, &other, holder, true);
    match change {
        HoldChange::Unchanged => return Ok(false),
        HoldChange::Recorded => {
            debug!("Bridge {} <-> {} already suspended, {} recorded as holder", this.id(), peer, holder);
            return Ok(true);
        }
        HoldChange::Media => {}
    }

    if let Err(e) = disconnect_media_keep_adapter(this.id(), this.media_object(), other.media_object(), &edge).await {
        record_holder(this, &other, holder, false);
        return Err(e);
    }
    info!("Suspended bridge {} <-> {}", this.id(), peer);
    Ok(true)
}

/// Drop the hold of `this` on the bridge to `peer`.
///
/// The media is reconnected once no other call holds the bridge. Returns
/// `false` when `this` did not hold it.
pub async fn resume_bridge(this: &Arc<dyn Participant>, peer: MediaObjectId) -> Result<bool> {
    let (edge, other) = bridge(this, peer)?;
    let holder = this.id();
    match record_holder(this, &other, holder, false) {
        HoldChange::Unchanged => return Ok(false),
        HoldChange::Recorded => {
            debug!("Bridge {} <-> {} stays suspended for its other holders", this.id(), peer);
            return Ok(true);
        }
        HoldChange::Media => {}
    }

    let media = match (this.media_object(), other.media_object()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(CallControlError::illegal_state(format!("Bridge {} <-> {} lost its media", this.id(), peer))),
    };
    let result = match media {
        Ok((a, b)) => reconnect_media(this.id(), &a, &b, &edge).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        record_holder(this, &other, holder, true);
        return Err(e);
    }
    info!("Resumed bridge {} <-> {}", this.id(), peer);
    Ok(true)
}

/// Add or drop `holder` on both edges of a bridge.
///
/// The graph of the lower id decides, so holds from both ends of the same
/// bridge agree on who touches the media.
fn record_holder(this: &Arc<dyn Participant>, other: &Arc<dyn Participant>, holder: MediaObjectId, add: bool) -> HoldChange {
    let (first, second) = if this.id() < other.id() { (this, other) } else { (other, this) };
    let apply = |owner: &Arc<dyn Participant>, peer: MediaObjectId| {
        if add {
            owner.add_bridge_holder(peer, holder)
        } else {
            owner.remove_bridge_holder(peer, holder)
        }
    };
    let change = apply(first, second.id()).unwrap_or(HoldChange::Unchanged);
    if change != HoldChange::Unchanged {
        apply(second, first.id());
    }
    change
}

fn bridge(this: &Arc<dyn Participant>, peer: MediaObjectId) -> Result<(JoinEdge, Arc<dyn Participant>)> {
    let edge = this
        .edge_to(peer)
        .ok_or_else(|| CallControlError::invalid_argument(format!("{} is not joined to {}", this.id(), peer)))?;
    if edge.join_type != JoinType::Bridge {
        return Err(CallControlError::invalid_argument(format!(
            "Join {} <-> {} is not a bridge",
            this.id(),
            peer
        )));
    }
    let other = edge
        .peer
        .upgrade()
        .ok_or_else(|| CallControlError::illegal_state(format!("Peer {} is gone", peer)))?;
    Ok((edge, other))
}

async fn disconnect_media_keep_adapter(
    owner: MediaObjectId,
    owner_media: Option<Arc<dyn MediaResource>>,
    peer_media: Option<Arc<dyn MediaResource>>,
    edge: &JoinEdge,
) -> Result<()> {
    let pair = match &edge.real_joined {
        Some(adapter) if adapter.owner_id() == owner => peer_media.map(|call| (adapter.media(), call)),
        Some(adapter) => owner_media.map(|call| (adapter.media(), call)),
        None => owner_media.zip(peer_media),
    };
    match pair {
        Some((a, b)) => a.unjoin(&b).await.map_err(CallControlError::from),
        None => Ok(()),
    }
}

fn released(participant: &dyn Participant) -> CallControlError {
    CallControlError::illegal_state(format!("{} {} was released", participant.kind(), participant.id()))
}

fn not_connectable(participant: &dyn Participant) -> CallControlError {
    CallControlError::invalid_argument(format!("{} {} is not connectable", participant.kind(), participant.id()))
}
