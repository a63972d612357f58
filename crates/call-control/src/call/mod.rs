//! Call participant and its renegotiation state machine
//!
//! A [`Call`] is one signaling leg with a media connection. Once answered it
//! can renegotiate its media: hold, unhold, mute, unmute, a generic local
//! re-offer, and a re-offer received from the remote side.
//!
//! Only one renegotiation runs per call. Each operation holds the call's
//! monitor for its whole duration and moves the relevant axis to its `-ing`
//! sub-state before the offer goes out. Every step that depends on an
//! asynchronous collaborator (the signaling response, the media negotiation
//! result) arms a single-slot rendezvous first, triggers the collaborator,
//! then waits until the outcome arrives, the call leaves `Answered`, or the
//! renegotiation timeout elapses.
//!
//! Failure policy:
//! - a non-2xx response to our re-INVITE reverts the axis and the call survives
//! - any other failure resets the axis to `None` and fails the call
//!
//! ```rust,no_run
//! use rvoip_call_control::{Call, Direction, JoinOptions, JoinType, Participant};
//! use std::sync::Arc;
//!
//! async fn park(caller: Arc<Call>, callee: Arc<Call>) -> rvoip_call_control::Result<()> {
//!     let joint = caller
//!         .join(callee.clone(), JoinType::Bridge, Direction::Duplex, JoinOptions::default())
//!         .await?;
//!     joint.get().await;
//!
//!     // Suspends the bridge, then renegotiates the caller's media to send-only
//!     caller.hold(false).await?;
//!     caller.unhold().await
//! }
//! ```

mod renegotiation;
mod state;

pub use state::{CallSessionState, CallState, HoldState, MuteState, RenegotiationPhase};

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use self::renegotiation::{wait_for, Awaited, Outcome, RenegotiationSlot};
use self::state::AxisRevert;
use crate::config::CallControlContext;
use crate::errors::{CallControlError, Result};
use crate::events::{EventDispatcher, ParticipantEvent, RenegotiationEvent, RenegotiationKind};
use crate::join::orchestrator;
use crate::media::MediaResource;
use crate::negotiation::{NegotiationEvent, NegotiationEventKind, SdpNegotiator};
use crate::participant::{JoinEdge, Participant, ParticipantCore};
use crate::sdp::{self, MediaDirection};
use crate::signaling::{
    Reason, SignalRequest, SignalResponse, SignalingSession, HOLD_REQUEST, MUTE_REQUEST, SDP_CONTENT_TYPE,
    UNHOLD_REQUEST, UNMUTE_REQUEST,
};
use crate::types::{Endpoint, JoinType, MediaObjectId, ParticipantKind};

pub struct Call {
    core: Arc<ParticipantCore>,
    this: Weak<Call>,
    negotiator: Arc<dyn SdpNegotiator>,
    session: Arc<dyn SignalingSession>,
    state: watch::Sender<CallState>,
    session_state: Mutex<CallSessionState>,
    /// Serializes renegotiations
    monitor: tokio::sync::Mutex<()>,
    slot: RenegotiationSlot,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("core", &self.core)
            .field("state", &*self.state.borrow())
            .field("session_state", &*self.session_state.lock())
            .finish()
    }
}

impl Call {
    /// Create a call over the network connection `media`
    pub fn new(
        context: &CallControlContext,
        address: Endpoint,
        media: Arc<dyn MediaResource>,
        negotiator: Arc<dyn SdpNegotiator>,
        session: Arc<dyn SignalingSession>,
    ) -> Result<Arc<Self>> {
        let id = media.id();
        let dispatcher = EventDispatcher::new(id, context.config.event_channel_capacity)?;
        let (state, _) = watch::channel(CallState::Initial);

        let call = Arc::new_cyclic(|this: &Weak<Call>| {
            let handle: Weak<dyn Participant> = this.clone();
            Call {
                core: Arc::new(ParticipantCore::new(
                    ParticipantKind::Call,
                    address,
                    context.clone(),
                    dispatcher,
                    media,
                    handle,
                )),
                this: this.clone(),
                negotiator,
                session,
                state,
                session_state: Mutex::new(CallSessionState::default()),
                monitor: tokio::sync::Mutex::new(()),
                slot: RenegotiationSlot::default(),
            }
        });
        debug!("Created call {} to {}", id, call.core.address());
        Ok(call)
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Receiver that observes every signaling phase change
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    pub fn session_state(&self) -> CallSessionState {
        self.session_state.lock().clone()
    }

    pub fn hold_state(&self) -> HoldState {
        self.session_state.lock().hold
    }

    pub fn mute_state(&self) -> MuteState {
        self.session_state.lock().mute
    }

    pub fn local_sdp(&self) -> Option<Bytes> {
        self.session_state.lock().local_sdp.clone()
    }

    pub fn remote_sdp(&self) -> Option<Bytes> {
        self.session_state.lock().remote_sdp.clone()
    }

    /// Whether a renegotiation step is waiting for its outcome
    pub fn has_pending_renegotiation(&self) -> bool {
        self.slot.is_pending()
    }

    pub fn mark_ringing(&self) -> Result<()> {
        match self.state() {
            CallState::Initial => {
                self.set_state(CallState::Ringing);
                Ok(())
            }
            other => Err(CallControlError::illegal_state(format!(
                "Call {} cannot ring in state {}",
                self.core.id(),
                other
            ))),
        }
    }

    /// Record the initial offer/answer and enter `Answered`
    pub fn mark_answered(&self, local_sdp: Bytes, remote_sdp: Bytes) -> Result<()> {
        match self.state() {
            CallState::Initial | CallState::Ringing => {
                {
                    let mut session = self.session_state.lock();
                    session.local_sdp = Some(local_sdp);
                    session.remote_sdp = Some(remote_sdp);
                }
                self.set_state(CallState::Answered);
                info!("Call {} answered", self.core.id());
                Ok(())
            }
            other => Err(CallControlError::illegal_state(format!(
                "Call {} cannot be answered in state {}",
                self.core.id(),
                other
            ))),
        }
    }

    /// Put the call on hold.
    ///
    /// Bridges to other calls are suspended before the offer goes out. With
    /// `send` the remote offer is applied receive-only, otherwise send-only.
    /// Holding a held call does nothing.
    pub async fn hold(&self, send: bool) -> Result<()> {
        let _monitor = self.monitor.lock().await;
        self.ensure_answered()?;
        let (previous, remote) = {
            let mut session = self.session_state.lock();
            if session.hold == HoldState::Held {
                debug!("Call {} already held", self.core.id());
                return Ok(());
            }
            let remote = session.remote_sdp.clone().ok_or_else(|| self.missing_sdp("remote"))?;
            let previous = session.hold;
            session.hold = HoldState::Holding;
            (previous, remote)
        };
        info!("Holding call {}", self.core.id());

        let suspended = self.suspend_peer_bridges().await;
        let wanted = if send { MediaDirection::RecvOnly } else { MediaDirection::SendOnly };
        let result = self.hold_exchange(HOLD_REQUEST, remote, wanted, MediaDirection::SendOnly).await;
        self.finish(RenegotiationKind::Hold, AxisRevert::Hold(previous), &suspended, result, |session| {
            session.hold = HoldState::Held
        })
        .await
    }

    /// Take the call off hold, then resume its suspended bridges.
    ///
    /// Does nothing unless the call is held.
    pub async fn unhold(&self) -> Result<()> {
        let _monitor = self.monitor.lock().await;
        self.ensure_answered()?;
        let remote = {
            let mut session = self.session_state.lock();
            if session.hold != HoldState::Held {
                debug!("Call {} is not held", self.core.id());
                return Ok(());
            }
            let remote = session.remote_sdp.clone().ok_or_else(|| self.missing_sdp("remote"))?;
            session.hold = HoldState::UnHolding;
            remote
        };
        info!("Unholding call {}", self.core.id());

        let result = self
            .hold_exchange(UNHOLD_REQUEST, remote, MediaDirection::SendRecv, MediaDirection::SendRecv)
            .await;
        let outcome = self
            .finish(RenegotiationKind::Unhold, AxisRevert::Hold(HoldState::Held), &[], result, |session| {
                session.hold = HoldState::None
            })
            .await;
        if outcome.is_ok() {
            self.resume_peer_bridges().await;
        }
        outcome
    }

    /// Mute the call's outgoing media. Muting a muted call does nothing.
    pub async fn mute(&self) -> Result<()> {
        let _monitor = self.monitor.lock().await;
        self.ensure_answered()?;
        let (previous, local) = {
            let mut session = self.session_state.lock();
            if session.mute == MuteState::Muted {
                debug!("Call {} already muted", self.core.id());
                return Ok(());
            }
            let local = session.local_sdp.clone().ok_or_else(|| self.missing_sdp("local"))?;
            let previous = session.mute;
            session.mute = MuteState::Muting;
            (previous, local)
        };
        info!("Muting call {}", self.core.id());

        let offer = sdp::with_direction(&local, MediaDirection::SendOnly);
        let result = self.mute_exchange(MUTE_REQUEST, offer).await;
        self.finish(RenegotiationKind::Mute, AxisRevert::Mute(previous), &[], result, |session| {
            session.mute = MuteState::Muted
        })
        .await
    }

    /// Unmute the call. Does nothing unless the call is muted.
    pub async fn unmute(&self) -> Result<()> {
        let _monitor = self.monitor.lock().await;
        self.ensure_answered()?;
        let local = {
            let mut session = self.session_state.lock();
            if session.mute != MuteState::Muted {
                debug!("Call {} is not muted", self.core.id());
                return Ok(());
            }
            let local = session.local_sdp.clone().ok_or_else(|| self.missing_sdp("local"))?;
            session.mute = MuteState::UnMuting;
            local
        };
        info!("Unmuting call {}", self.core.id());

        let offer = sdp::with_direction(&local, MediaDirection::SendRecv);
        let result = self.mute_exchange(UNMUTE_REQUEST, offer).await;
        self.finish(RenegotiationKind::Unmute, AxisRevert::Mute(MuteState::Muted), &[], result, |session| {
            session.mute = MuteState::None
        })
        .await
    }

    /// Re-offer `offer`, or the current local description when `None`
    pub async fn renegotiate(&self, offer: Option<Bytes>) -> Result<()> {
        let _monitor = self.monitor.lock().await;
        self.ensure_answered()?;
        let offer = match offer.or_else(|| self.local_sdp()) {
            Some(offer) => offer,
            None => return Err(self.missing_sdp("local")),
        };
        info!("Re-offering media on call {}", self.core.id());

        let result = self.reoffer_exchange(offer).await;
        self.finish(RenegotiationKind::ReOffer, AxisRevert::Neither, &[], result, |_| {})
            .await
    }

    /// Handle a re-INVITE from the remote side.
    ///
    /// The offer is negotiated first. Before the final response goes out, a
    /// send-only offer suspends the bridge to the peer call and holds that
    /// peer; a send-receive offer resumes the bridge and unholds the peer.
    pub async fn handle_reinvite(&self, request: SignalRequest) -> Result<()> {
        let _monitor = self.monitor.lock().await;
        let Some(offer) = request.content.clone() else {
            warn!("Rejecting re-INVITE without an offer on call {}", self.core.id());
            self.session
                .send_response(&request, Reason::NotAcceptable.code(), None)
                .await?;
            return Err(CallControlError::negotiate("Re-INVITE carries no offer"));
        };
        if self.state() != CallState::Answered {
            self.session.send_response(&request, Reason::Error.code(), None).await?;
            return Err(CallControlError::illegal_state(format!(
                "Call {} cannot renegotiate in state {}",
                self.core.id(),
                self.state()
            )));
        }
        {
            let mut session = self.session_state.lock();
            session.remote_sdp = Some(offer.clone());
            session.phase = RenegotiationPhase::AwaitingAnswer;
        }
        info!("Call {} received a re-offer ({:?})", self.core.id(), sdp::direction(&offer));

        let result = self.remote_reoffer_exchange(&request, offer).await;
        self.finish(RenegotiationKind::RemoteReOffer, AxisRevert::Neither, &[], result, |_| {})
            .await
    }

    /// Deliver the response to a re-INVITE this call sent. Never blocks.
    pub fn handle_reinvite_response(&self, response: SignalResponse) {
        let status = response.status;
        if !self.slot.deliver(Outcome::Response(response)) {
            debug!("Call {} dropped unsolicited {} response", self.core.id(), status);
        }
    }

    /// Deliver a media negotiation result. Never blocks; callable from any thread.
    pub fn on_negotiation_event(&self, event: NegotiationEvent) {
        let kind = event.kind;
        if !self.slot.deliver(Outcome::Negotiation(event)) {
            debug!("Call {} dropped unsolicited {:?} negotiation event", self.core.id(), kind);
        }
    }

    /// Apply an SDP answer carried by an ACK
    pub async fn handle_ack(&self, ack: SignalRequest) -> Result<()> {
        let Some(answer) = ack.content else {
            return Ok(());
        };
        let _monitor = self.monitor.lock().await;
        self.ensure_answered()?;

        match self.process_answer(answer.clone()).await {
            Ok(_) => {
                self.session_state.lock().remote_sdp = Some(answer);
                Ok(())
            }
            Err(e) => {
                self.fail(e.clone()).await;
                Err(e)
            }
        }
    }

    /// End the call: BYE, then disconnect
    pub async fn hangup(&self) {
        info!("Hanging up call {}", self.core.id());
        self.disconnect().await;
    }

    /// The remote side ended the call
    pub async fn handle_bye(&self, request: SignalRequest) -> Result<()> {
        info!("Call {} ended by remote", self.core.id());
        self.set_state(CallState::Disconnected);
        let responded = self.session.send_response(&request, 200, None).await;
        self.disconnect().await;
        responded
    }

    /// Terminate the call after an unrecoverable error
    pub async fn fail(&self, cause: CallControlError) {
        let state = self.state();
        if state.is_terminal() {
            return;
        }
        error!("Call {} failed: {}", self.core.id(), cause);
        self.slot.clear();
        self.core.dispatcher().dispatch(ParticipantEvent::CallFailed {
            call: self.core.id(),
            error: cause,
        });
        if state == CallState::Answered {
            self.send_bye().await;
        }
        self.set_state(CallState::Failed);
        self.disconnect().await;
    }

    fn set_state(&self, next: CallState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Call {} {} -> {}", self.core.id(), previous, next);
            self.core.dispatcher().dispatch(ParticipantEvent::CallStateChanged {
                call: self.core.id(),
                previous,
                current: next,
            });
        }
    }

    fn set_phase(&self, phase: RenegotiationPhase) {
        self.session_state.lock().phase = phase;
    }

    fn ensure_answered(&self) -> Result<()> {
        match self.state() {
            CallState::Answered => Ok(()),
            other => Err(CallControlError::illegal_state(format!(
                "Call {} is {}, not answered",
                self.core.id(),
                other
            ))),
        }
    }

    fn missing_sdp(&self, which: &str) -> CallControlError {
        CallControlError::illegal_state(format!("Call {} has no {} SDP", self.core.id(), which))
    }

    fn renegotiation_timeout(&self) -> Duration {
        self.core.context().config.renegotiation_timeout()
    }

    fn participant(&self) -> Option<Arc<dyn Participant>> {
        self.this.upgrade().map(|call| call as Arc<dyn Participant>)
    }

    async fn wait(&self, armed: tokio::sync::oneshot::Receiver<Outcome>) -> Result<Outcome> {
        let outcome = wait_for(armed, self.state.subscribe(), self.renegotiation_timeout()).await;
        if outcome.is_err() {
            self.slot.clear();
        }
        outcome
    }

    /// Have the media subsystem answer `offer`
    async fn process_offer(&self, offer: Bytes) -> Result<NegotiationEvent> {
        let armed = self.slot.arm(Awaited::Negotiation(NegotiationEventKind::AnswerGenerated));
        if let Err(e) = self.negotiator.process_sdp_offer(offer).await {
            self.slot.clear();
            return Err(e);
        }
        self.negotiated(armed).await
    }

    /// Have the media subsystem apply `answer`
    async fn process_answer(&self, answer: Bytes) -> Result<NegotiationEvent> {
        let armed = self.slot.arm(Awaited::Negotiation(NegotiationEventKind::AnswerProcessed));
        if let Err(e) = self.negotiator.process_sdp_answer(answer).await {
            self.slot.clear();
            return Err(e);
        }
        self.negotiated(armed).await
    }

    async fn negotiated(&self, armed: tokio::sync::oneshot::Receiver<Outcome>) -> Result<NegotiationEvent> {
        match self.wait(armed).await? {
            Outcome::Negotiation(event) if event.successful => Ok(event),
            Outcome::Negotiation(event) => {
                let kind = event.kind;
                Err(CallControlError::negotiate(
                    event.error.unwrap_or_else(|| format!("{:?} failed", kind)),
                ))
            }
            Outcome::Response(_) => Err(CallControlError::internal("Expected a negotiation result")),
        }
    }

    /// Send a re-INVITE carrying `offer` and wait for a 2xx response
    async fn send_reinvite(&self, marker: Option<&str>, offer: Bytes) -> Result<SignalResponse> {
        let mut request = self.session.create_request("INVITE");
        if let Some(marker) = marker {
            request.set_attribute(marker, "true");
        }
        request
            .headers
            .insert("Content-Type".to_string(), SDP_CONTENT_TYPE.to_string());
        request.content = Some(offer);

        let armed = self.slot.arm(Awaited::Response(request.id));
        self.set_phase(RenegotiationPhase::OfferSent);
        if let Err(e) = self.session.send_request(request).await {
            self.slot.clear();
            return Err(e);
        }

        let response = match self.wait(armed).await? {
            Outcome::Response(response) => response,
            Outcome::Negotiation(_) => return Err(CallControlError::internal("Expected a signaling response")),
        };
        if !response.is_success() {
            return Err(CallControlError::Rejected {
                status: response.status,
            });
        }
        Ok(response)
    }

    async fn hold_exchange(
        &self,
        marker: &str,
        remote: Bytes,
        remote_direction: MediaDirection,
        local_direction: MediaDirection,
    ) -> Result<()> {
        self.set_phase(RenegotiationPhase::AwaitingAnswer);
        let negotiated = self
            .process_offer(sdp::with_direction(&remote, remote_direction))
            .await?;
        let local = match negotiated.sdp.or_else(|| self.local_sdp()) {
            Some(local) => local,
            None => return Err(self.missing_sdp("local")),
        };
        let offer = sdp::with_direction(&local, local_direction);

        let response = self.send_reinvite(Some(marker), offer.clone()).await?;
        self.set_phase(RenegotiationPhase::Applying);
        self.session.send_ack(&response, None).await?;
        self.session_state.lock().local_sdp = Some(offer);
        Ok(())
    }

    async fn mute_exchange(&self, marker: &str, offer: Bytes) -> Result<()> {
        let response = self.send_reinvite(Some(marker), offer.clone()).await?;
        let Some(remote) = response.content.clone() else {
            return Err(CallControlError::negotiate("Re-INVITE response carries no SDP"));
        };

        self.set_phase(RenegotiationPhase::AwaitingAnswer);
        let negotiated = self.process_offer(remote.clone()).await?;
        self.set_phase(RenegotiationPhase::Applying);
        self.session.send_ack(&response, negotiated.sdp.clone()).await?;

        let mut session = self.session_state.lock();
        session.local_sdp = Some(negotiated.sdp.unwrap_or(offer));
        session.remote_sdp = Some(remote);
        Ok(())
    }

    async fn reoffer_exchange(&self, offer: Bytes) -> Result<()> {
        let response = self.send_reinvite(None, offer.clone()).await?;
        let Some(answer) = response.content.clone() else {
            return Err(CallControlError::negotiate("Re-INVITE response carries no answer"));
        };

        self.set_phase(RenegotiationPhase::AwaitingAnswer);
        self.process_answer(answer.clone()).await?;
        self.set_phase(RenegotiationPhase::Applying);
        self.session.send_ack(&response, None).await?;

        let mut session = self.session_state.lock();
        session.local_sdp = Some(offer);
        session.remote_sdp = Some(answer);
        Ok(())
    }

    async fn remote_reoffer_exchange(&self, request: &SignalRequest, offer: Bytes) -> Result<()> {
        let negotiated = match self.process_offer(offer.clone()).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                if let Err(send) = self
                    .session
                    .send_response(request, Reason::NotAcceptable.code(), None)
                    .await
                {
                    warn!("Failed to reject re-INVITE on call {}: {}", self.core.id(), send);
                }
                return Err(e);
            }
        };

        self.set_phase(RenegotiationPhase::Applying);
        let offered = sdp::direction(&offer);
        self.follow_remote_hold(offered).await;

        let answer = match negotiated.sdp.or_else(|| self.local_sdp()) {
            Some(answer) => answer,
            None => return Err(self.missing_sdp("local")),
        };
        let answer = match offered {
            MediaDirection::SendOnly => sdp::with_direction(&answer, MediaDirection::RecvOnly),
            MediaDirection::Inactive => sdp::with_direction(&answer, MediaDirection::Inactive),
            _ => answer,
        };
        self.session.send_response(request, 200, Some(answer.clone())).await?;
        self.session_state.lock().local_sdp = Some(answer);
        Ok(())
    }

    /// Mirror a remote hold or resume onto the call this one is bridged to
    async fn follow_remote_hold(&self, offered: MediaDirection) {
        let hold = match offered {
            MediaDirection::SendOnly | MediaDirection::Inactive => true,
            MediaDirection::SendRecv => false,
            MediaDirection::RecvOnly => return,
        };
        let (Some(this), Some((edge, peer))) = (self.participant(), self.last_peer_call()) else {
            return;
        };

        if edge.join_type == JoinType::Bridge {
            let bridged = if hold {
                orchestrator::suspend_bridge(&this, edge.peer.id).await
            } else {
                orchestrator::resume_bridge(&this, edge.peer.id).await
            };
            if let Err(e) = bridged {
                warn!("Failed to update bridge {} <-> {}: {}", self.core.id(), edge.peer.id, e);
            }
        }

        // Spawned so a slow peer cannot cancel its own renegotiation midway.
        let peer_id = edge.peer.id;
        let task = tokio::spawn(async move {
            if hold {
                peer.hold(true).await
            } else {
                peer.unhold().await
            }
        });
        let timeout = self.core.context().config.peer_hold_timeout();
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => debug!("Peer call {} followed remote {}", peer_id, if hold { "hold" } else { "resume" }),
            Ok(Ok(Err(e))) => warn!("Peer call {} failed to follow remote hold: {}", peer_id, e),
            Ok(Err(e)) => warn!("Peer call {} hold task aborted: {}", peer_id, e),
            Err(_) => warn!("Peer call {} did not follow remote hold within {:?}", peer_id, timeout),
        }
    }

    /// The most recently joined call, with the edge to it
    fn last_peer_call(&self) -> Option<(JoinEdge, Arc<Call>)> {
        self.core
            .edges()
            .into_iter()
            .rev()
            .filter(|edge| edge.peer.kind == ParticipantKind::Call)
            .find_map(|edge| {
                let call = edge.peer.upgrade()?.as_call()?;
                Some((edge, call))
            })
    }

    async fn suspend_peer_bridges(&self) -> Vec<MediaObjectId> {
        let Some(this) = self.participant() else {
            return Vec::new();
        };
        let mut suspended = Vec::new();
        for edge in self.core.edges() {
            if edge.join_type != JoinType::Bridge || edge.peer.kind != ParticipantKind::Call {
                continue;
            }
            match orchestrator::suspend_bridge(&this, edge.peer.id).await {
                Ok(true) => suspended.push(edge.peer.id),
                Ok(false) => {}
                Err(e) => warn!("Failed to suspend bridge {} <-> {}: {}", self.core.id(), edge.peer.id, e),
            }
        }
        suspended
    }

    async fn resume_bridges(&self, peers: &[MediaObjectId]) {
        let Some(this) = self.participant() else {
            return;
        };
        for peer in peers {
            if let Err(e) = orchestrator::resume_bridge(&this, *peer).await {
                warn!("Failed to resume bridge {} <-> {}: {}", self.core.id(), peer, e);
            }
        }
    }

    /// Resume the bridges this call's own hold suspended
    async fn resume_peer_bridges(&self) {
        let id = self.core.id();
        let suspended: Vec<_> = self
            .core
            .edges()
            .into_iter()
            .filter(|edge| edge.join_type == JoinType::Bridge && edge.held_by.contains(&id))
            .map(|edge| edge.peer.id)
            .collect();
        self.resume_bridges(&suspended).await;
    }

    /// Settle the axis after a renegotiation and report the outcome
    async fn finish(
        &self,
        kind: RenegotiationKind,
        axis: AxisRevert,
        suspended: &[MediaObjectId],
        result: Result<()>,
        complete: impl FnOnce(&mut CallSessionState) + Send,
    ) -> Result<()> {
        let error = match result {
            Ok(()) => {
                {
                    let mut session = self.session_state.lock();
                    complete(&mut session);
                    session.phase = RenegotiationPhase::Idle;
                }
                info!("{:?} on call {} complete", kind, self.core.id());
                self.report(kind, None);
                return Ok(());
            }
            Err(error) => error,
        };

        if error.is_rejection() {
            self.session_state.lock().revert(axis);
            self.resume_bridges(suspended).await;
            warn!("{:?} on call {} declined: {}", kind, self.core.id(), error);
            self.report(kind, Some(error.clone()));
            return Err(error);
        }

        self.session_state.lock().reset(axis);
        self.slot.clear();
        self.report(kind, Some(error.clone()));
        if self.state() == CallState::Answered {
            self.fail(error.clone()).await;
        } else {
            warn!("{:?} on call {} abandoned: {}", kind, self.core.id(), error);
        }
        Err(error)
    }

    fn report(&self, kind: RenegotiationKind, error: Option<CallControlError>) {
        let (hold_state, mute_state) = {
            let session = self.session_state.lock();
            (session.hold, session.mute)
        };
        self.core.dispatcher().dispatch(ParticipantEvent::Renegotiation(RenegotiationEvent {
            call: self.core.id(),
            kind,
            hold_state,
            mute_state,
            error,
        }));
    }

    async fn send_bye(&self) {
        let request = self.session.create_request("BYE");
        if let Err(e) = self.session.send_request(request).await {
            warn!("Failed to send BYE on call {}: {}", self.core.id(), e);
        }
    }
}

#[async_trait]
impl Participant for Call {
    fn id(&self) -> MediaObjectId {
        self.core.id()
    }

    fn kind(&self) -> ParticipantKind {
        ParticipantKind::Call
    }

    fn core(&self) -> Option<Arc<ParticipantCore>> {
        Some(self.core.clone())
    }

    fn media_object(&self) -> Option<Arc<dyn MediaResource>> {
        self.core.media()
    }

    fn join_owner(&self) -> Option<Arc<dyn Participant>> {
        self.participant()
    }

    fn as_call(&self) -> Option<Arc<Call>> {
        self.this.upgrade()
    }

    async fn terminate_signaling(&self) {
        let state = self.state();
        if state == CallState::Answered {
            self.send_bye().await;
        }
        if !state.is_terminal() {
            self.set_state(CallState::Disconnected);
        }
        self.slot.clear();
    }
}
