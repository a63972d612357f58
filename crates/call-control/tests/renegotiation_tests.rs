// Hold, mute and re-offer tests for the call renegotiation state machine.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;

use common::*;
use rvoip_call_control::sdp::{self, MediaDirection};
use rvoip_call_control::signaling::{HOLD_REQUEST, MUTE_REQUEST, UNHOLD_REQUEST, UNMUTE_REQUEST};
use rvoip_call_control::{
    CallControlConfig, CallControlError, CallState, Direction, HoldState, JoinOptions, JoinType, MediaResource, MuteState,
    Participant, ParticipantEvent, RenegotiationKind, RenegotiationPhase, SignalRequest,
};

async fn bridge(a: &TestCall, b: &TestCall) {
    let completion = a
        .call
        .join(b.call.clone(), JoinType::Bridge, Direction::Duplex, JoinOptions::default())
        .await
        .unwrap()
        .get()
        .await;
    assert!(completion.is_successful());
}

#[tokio::test]
async fn call_lifecycle_publishes_state_changes() {
    let harness = Harness::new();
    let alice = harness.call("sip:alice@example.com");
    let mut events = alice.call.subscribe().unwrap();
    let mut watcher = alice.call.watch_state();

    alice.call.mark_ringing().unwrap();
    alice.call.mark_answered(sdp(LOCAL_SDP), sdp(REMOTE_SDP)).unwrap();
    assert_eq!(alice.call.state(), CallState::Answered);
    assert!(watcher.has_changed().unwrap());
    assert_eq!(*watcher.borrow_and_update(), CallState::Answered);

    let ParticipantEvent::CallStateChanged { previous, current, .. } =
        next_event(&mut events, |e| matches!(e, ParticipantEvent::CallStateChanged { .. })).await
    else {
        unreachable!()
    };
    assert_eq!((previous, current), (CallState::Initial, CallState::Ringing));

    assert!(matches!(alice.call.mark_ringing(), Err(CallControlError::IllegalState { .. })));
}

#[tokio::test]
async fn hold_requires_an_answered_call() {
    let harness = Harness::new();
    let alice = harness.call("sip:alice@example.com");

    let err = alice.call.hold(true).await.unwrap_err();
    assert!(matches!(err, CallControlError::IllegalState { .. }));
    assert_eq!(alice.call.hold_state(), HoldState::None);
    assert!(alice.session.requests().is_empty());
}

#[tokio::test]
async fn hold_sends_a_send_only_reinvite() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let mut events = alice.call.subscribe().unwrap();

    alice.call.hold(false).await.unwrap();

    assert_eq!(alice.call.hold_state(), HoldState::Held);
    assert_eq!(alice.call.session_state().phase, RenegotiationPhase::Idle);
    assert!(!alice.call.has_pending_renegotiation());

    let offers = alice.negotiator.offers();
    assert_eq!(offers.len(), 1);
    assert_eq!(sdp::direction(&offers[0]), MediaDirection::SendOnly);

    let invites = alice.session.requests_with_method("INVITE");
    assert_eq!(invites.len(), 1);
    assert!(invites[0].has_attribute(HOLD_REQUEST));
    assert_eq!(sdp::direction(invites[0].content.as_ref().unwrap()), MediaDirection::SendOnly);
    assert_eq!(alice.session.acks().len(), 1);
    assert_eq!(sdp::direction(&alice.call.local_sdp().unwrap()), MediaDirection::SendOnly);

    let ParticipantEvent::Renegotiation(outcome) =
        next_event(&mut events, |e| matches!(e, ParticipantEvent::Renegotiation(_))).await
    else {
        unreachable!()
    };
    assert_eq!(outcome.kind, RenegotiationKind::Hold);
    assert_eq!(outcome.hold_state, HoldState::Held);
    assert!(outcome.error.is_none());

    // Holding again changes nothing.
    alice.call.hold(false).await.unwrap();
    assert_eq!(alice.session.requests_with_method("INVITE").len(), 1);
}

#[tokio::test]
async fn hold_with_send_applies_the_remote_offer_receive_only() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");

    alice.call.hold(true).await.unwrap();

    let offers = alice.negotiator.offers();
    assert_eq!(sdp::direction(&offers[0]), MediaDirection::RecvOnly);
    assert_eq!(alice.call.hold_state(), HoldState::Held);
}

#[tokio::test]
async fn hold_and_unhold_restore_the_bridge() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let bob = harness.answered_call("sip:bob@example.com");
    bridge(&alice, &bob).await;
    assert!(harness.fabric.connected(alice.media.id(), bob.media.id()));

    alice.call.hold(false).await.unwrap();

    assert_eq!(alice.call.hold_state(), HoldState::Held);
    assert!(!harness.fabric.connected(alice.media.id(), bob.media.id()));
    let edge = alice.call.edge_to(bob.call.id()).expect("held bridge keeps its edge");
    assert!(edge.is_suspended());
    assert!(bob.call.edge_to(alice.call.id()).unwrap().is_suspended());

    alice.call.unhold().await.unwrap();

    assert_eq!(alice.call.hold_state(), HoldState::None);
    assert!(harness.fabric.connected(alice.media.id(), bob.media.id()));
    let edge = alice.call.edge_to(bob.call.id()).unwrap();
    assert!(!edge.is_suspended());
    assert_eq!(edge.join_type, JoinType::Bridge);
    assert_eq!(edge.direction, Direction::Duplex);
    assert!(!bob.call.edge_to(alice.call.id()).unwrap().is_suspended());

    let invites = alice.session.requests_with_method("INVITE");
    assert_eq!(invites.len(), 2);
    assert!(invites[1].has_attribute(UNHOLD_REQUEST));
    assert_eq!(sdp::direction(invites[1].content.as_ref().unwrap()), MediaDirection::SendRecv);
}

#[tokio::test]
async fn unhold_keeps_a_bridge_another_call_still_holds() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let bob = harness.answered_call("sip:bob@example.com");
    bridge(&alice, &bob).await;

    bob.call.hold(false).await.unwrap();
    alice.call.hold(false).await.unwrap();
    alice.call.unhold().await.unwrap();

    assert_eq!(alice.call.hold_state(), HoldState::None);
    assert_eq!(bob.call.hold_state(), HoldState::Held);
    assert!(!harness.fabric.connected(alice.media.id(), bob.media.id()));
    let edge = alice.call.edge_to(bob.call.id()).unwrap();
    assert_eq!(edge.held_by.iter().copied().collect::<Vec<_>>(), vec![bob.call.id()]);

    bob.call.unhold().await.unwrap();

    assert!(harness.fabric.connected(alice.media.id(), bob.media.id()));
    assert!(!alice.call.edge_to(bob.call.id()).unwrap().is_suspended());
    assert!(!bob.call.edge_to(alice.call.id()).unwrap().is_suspended());
}

#[tokio::test]
async fn unhold_without_hold_does_nothing() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");

    alice.call.unhold().await.unwrap();
    assert!(alice.session.requests().is_empty());
    assert_eq!(alice.call.hold_state(), HoldState::None);
}

#[tokio::test]
async fn rejected_hold_reverts_and_keeps_the_call() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let bob = harness.answered_call("sip:bob@example.com");
    bridge(&alice, &bob).await;
    alice.session.answer_reinvites_with(491);

    let err = alice.call.hold(false).await.unwrap_err();

    assert!(matches!(err, CallControlError::Rejected { status: 491 }));
    assert_eq!(alice.call.hold_state(), HoldState::None);
    assert_eq!(alice.call.state(), CallState::Answered);
    assert!(alice.session.acks().is_empty());
    assert!(harness.fabric.connected(alice.media.id(), bob.media.id()));
    assert!(!alice.call.edge_to(bob.call.id()).unwrap().is_suspended());
}

#[tokio::test]
async fn failed_negotiation_fails_the_call() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let bob = harness.answered_call("sip:bob@example.com");
    bridge(&alice, &bob).await;
    let mut events = alice.call.subscribe().unwrap();
    alice.negotiator.fail_negotiations();

    let err = alice.call.hold(false).await.unwrap_err();

    assert!(matches!(err, CallControlError::Negotiate { .. }));
    assert_eq!(alice.call.hold_state(), HoldState::None);
    assert_eq!(alice.call.state(), CallState::Failed);
    assert!(alice.call.is_disconnected());
    assert!(alice.media.is_released());
    assert_eq!(alice.session.requests_with_method("BYE").len(), 1);
    assert!(bob.call.participants().is_empty());

    let failed = next_event(&mut events, |e| matches!(e, ParticipantEvent::CallFailed { .. })).await;
    assert!(matches!(
        failed,
        ParticipantEvent::CallFailed { error: CallControlError::Negotiate { .. }, .. }
    ));
}

#[tokio::test]
async fn missing_response_times_out_and_fails_the_call() {
    let config = CallControlConfig::default().with_renegotiation_timeout(Duration::from_millis(100));
    let harness = Harness::with_config(config);
    let alice = harness.answered_call("sip:alice@example.com");
    alice.session.stay_silent();

    let err = alice.call.mute().await.unwrap_err();

    assert!(matches!(err, CallControlError::Timeout(_)));
    assert_eq!(alice.call.mute_state(), MuteState::None);
    assert_eq!(alice.call.state(), CallState::Failed);
    assert!(!alice.call.has_pending_renegotiation());
}

#[tokio::test]
async fn failed_ack_fails_the_call() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    alice.session.fail_acks();

    let err = alice.call.hold(true).await.unwrap_err();

    assert!(matches!(err, CallControlError::Signal { .. }));
    assert_eq!(alice.call.hold_state(), HoldState::None);
    assert_eq!(alice.call.state(), CallState::Failed);
}

#[tokio::test]
async fn leaving_answered_releases_a_waiting_renegotiation() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    alice.session.stay_silent();

    let call = alice.call.clone();
    let hold = tokio::spawn(async move { call.hold(false).await });

    let session = alice.session.clone();
    assert!(eventually(|| !session.requests_with_method("INVITE").is_empty()).await);
    assert!(alice.call.has_pending_renegotiation());

    alice.call.handle_bye(SignalRequest::new("BYE")).await.unwrap();

    let err = hold.await.unwrap().unwrap_err();
    assert!(matches!(err, CallControlError::Signal { .. }));
    assert_eq!(alice.call.state(), CallState::Disconnected);
    assert_eq!(alice.call.hold_state(), HoldState::None);
    assert_eq!(alice.session.responses()[0].1, 200);
}

#[tokio::test]
async fn mute_and_unmute_leave_bridges_alone() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let bob = harness.answered_call("sip:bob@example.com");
    bridge(&alice, &bob).await;

    alice.call.mute().await.unwrap();

    assert_eq!(alice.call.mute_state(), MuteState::Muted);
    assert_eq!(alice.call.hold_state(), HoldState::None);
    assert!(harness.fabric.connected(alice.media.id(), bob.media.id()));
    let invites = alice.session.requests_with_method("INVITE");
    assert!(invites[0].has_attribute(MUTE_REQUEST));
    assert_eq!(sdp::direction(invites[0].content.as_ref().unwrap()), MediaDirection::SendOnly);

    // The response SDP is negotiated and the generated SDP goes out in the ACK.
    assert_eq!(alice.negotiator.offers()[0], sdp(REMOTE_SDP));
    let acks = alice.session.acks();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].1, Some(sdp(LOCAL_SDP)));

    alice.call.unmute().await.unwrap();
    assert_eq!(alice.call.mute_state(), MuteState::None);
    let invites = alice.session.requests_with_method("INVITE");
    assert!(invites[1].has_attribute(UNMUTE_REQUEST));
    assert!(harness.fabric.connected(alice.media.id(), bob.media.id()));
}

#[tokio::test]
async fn hold_and_mute_are_independent_axes() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");

    alice.call.mute().await.unwrap();
    alice.call.hold(false).await.unwrap();

    let state = alice.call.session_state();
    assert_eq!(state.hold, HoldState::Held);
    assert_eq!(state.mute, MuteState::Muted);
}

#[tokio::test]
async fn concurrent_renegotiations_are_serialized() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");

    let (hold, mute) = tokio::join!(alice.call.hold(false), alice.call.mute());
    hold.unwrap();
    mute.unwrap();

    assert_eq!(alice.call.hold_state(), HoldState::Held);
    assert_eq!(alice.call.mute_state(), MuteState::Muted);
    assert_eq!(alice.session.requests_with_method("INVITE").len(), 2);
    assert_eq!(alice.session.acks().len(), 2);
}

#[tokio::test]
async fn local_reoffer_applies_the_answer() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let offer = sdp::with_direction(LOCAL_SDP.as_bytes(), MediaDirection::RecvOnly);

    alice.call.renegotiate(Some(offer.clone())).await.unwrap();

    let invites = alice.session.requests_with_method("INVITE");
    assert_eq!(invites[0].content, Some(offer.clone()));
    assert_eq!(alice.negotiator.answers(), vec![sdp(REMOTE_SDP)]);
    assert_eq!(alice.call.local_sdp(), Some(offer));
    assert_eq!(alice.call.remote_sdp(), Some(sdp(REMOTE_SDP)));
    assert_eq!(alice.session.acks().len(), 1);
}

#[tokio::test]
async fn remote_hold_follows_onto_the_bridged_call() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let bob = harness.answered_call("sip:bob@example.com");
    bridge(&alice, &bob).await;

    let held_offer = sdp::with_direction(REMOTE_SDP.as_bytes(), MediaDirection::SendOnly);
    let reinvite = SignalRequest::new("INVITE").with_content(held_offer.clone());
    alice.call.handle_reinvite(reinvite).await.unwrap();

    // Media stopped and the peer leg was held before the 200 OK went out.
    let responses = alice.session.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].1, 200);
    assert_eq!(sdp::direction(responses[0].2.as_ref().unwrap()), MediaDirection::RecvOnly);
    assert_eq!(alice.call.remote_sdp(), Some(held_offer));
    assert!(!harness.fabric.connected(alice.media.id(), bob.media.id()));
    assert!(alice.call.edge_to(bob.call.id()).unwrap().is_suspended());
    assert_eq!(bob.call.hold_state(), HoldState::Held);
    assert!(bob.session.requests_with_method("INVITE")[0].has_attribute(HOLD_REQUEST));

    let resumed_offer = sdp::with_direction(REMOTE_SDP.as_bytes(), MediaDirection::SendRecv);
    let reinvite = SignalRequest::new("INVITE").with_content(resumed_offer);
    alice.call.handle_reinvite(reinvite).await.unwrap();

    let responses = alice.session.responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(sdp::direction(responses[1].2.as_ref().unwrap()), MediaDirection::SendRecv);
    assert!(harness.fabric.connected(alice.media.id(), bob.media.id()));
    assert!(!alice.call.edge_to(bob.call.id()).unwrap().is_suspended());
    assert_eq!(bob.call.hold_state(), HoldState::None);
}

#[tokio::test]
async fn reinvite_without_offer_is_not_acceptable() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");

    let err = alice.call.handle_reinvite(SignalRequest::new("INVITE")).await.unwrap_err();

    assert!(matches!(err, CallControlError::Negotiate { .. }));
    assert_eq!(alice.session.responses()[0].1, 488);
    assert_eq!(alice.call.state(), CallState::Answered);
}

#[tokio::test]
async fn unacceptable_remote_offer_is_rejected_and_fails_the_call() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    alice.negotiator.fail_negotiations();

    let reinvite = SignalRequest::new("INVITE").with_content(sdp(REMOTE_SDP));
    let err = alice.call.handle_reinvite(reinvite).await.unwrap_err();

    assert!(matches!(err, CallControlError::Negotiate { .. }));
    assert_eq!(alice.session.responses()[0].1, 488);
    assert_eq!(alice.call.state(), CallState::Failed);
}

#[tokio::test]
async fn unsolicited_callbacks_are_dropped() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");

    alice.call.on_negotiation_event(rvoip_call_control::NegotiationEvent::success(
        rvoip_call_control::NegotiationEventKind::AnswerGenerated,
        None,
    ));
    alice
        .call
        .handle_reinvite_response(rvoip_call_control::SignalResponse::new(200, SignalRequest::new("INVITE")));

    assert_eq!(alice.call.state(), CallState::Answered);
    alice.call.hold(false).await.unwrap();
    assert_eq!(alice.call.hold_state(), HoldState::Held);
}

#[tokio::test]
async fn ack_with_answer_is_applied() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let answer = sdp::with_direction(REMOTE_SDP.as_bytes(), MediaDirection::RecvOnly);

    alice
        .call
        .handle_ack(SignalRequest::new("ACK").with_content(answer.clone()))
        .await
        .unwrap();

    assert_eq!(alice.negotiator.answers(), vec![answer.clone()]);
    assert_eq!(alice.call.remote_sdp(), Some(answer));
}

#[tokio::test]
async fn hangup_sends_bye_and_disconnects() {
    let harness = Harness::new();
    let alice = harness.answered_call("sip:alice@example.com");
    let bob = harness.answered_call("sip:bob@example.com");
    bridge(&alice, &bob).await;

    alice.call.hangup().await;

    assert_eq!(alice.call.state(), CallState::Disconnected);
    assert_eq!(alice.session.requests_with_method("BYE").len(), 1);
    assert!(alice.media.is_released());
    assert!(bob.call.participants().is_empty());
    assert_eq!(bob.call.state(), CallState::Answered);

    alice.call.hangup().await;
    assert_eq!(alice.session.requests_with_method("BYE").len(), 1);
}
