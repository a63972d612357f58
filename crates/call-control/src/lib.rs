//! # RVoIP Call Control
//!
//! Participant join orchestration and mid-call media renegotiation.
//!
//! This crate sits between the signaling stack and the media server. It models
//! joinable endpoints ("participants": calls, mixers and DTMF clamp adapters),
//! connects them into media paths, and renegotiates an answered call's media
//! for hold, mute and re-offers.
//!
//! ## Features
//!
//! - **Join graph**: every participant owns a graph of its joins; the
//!   orchestrator keeps both sides of a join symmetric
//! - **Asynchronous joins**: joins and unjoins run as spawned, awaitable,
//!   non-cancellable completion tasks
//! - **DTMF clamping**: call/mixer joins can be routed through a clamp adapter,
//!   falling back to a direct join when the adapter cannot be set up
//! - **Renegotiation**: hold, unhold, mute, unmute, local and remote re-offers,
//!   serialized per call
//! - **Active speakers**: mixer input reports translated into participants
//!
//! ## Architecture
//!
//! - `participant`: the [`Participant`] trait, join graph and active inputs
//! - `join`: join/unjoin/disconnect orchestration and completion tasks
//! - `mixer`: the [`Mixer`] participant and its [`ClampDtmfAdapter`]
//! - `call`: the [`Call`] participant and its renegotiation state machine
//! - `events`: participant events and ordered per-participant dispatch
//! - `media`, `negotiation`, `signaling`: collaborator interfaces
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rvoip_call_control::*;
//! use std::sync::Arc;
//!
//! async fn conference(
//!     mixer: Arc<Mixer>,
//!     caller: Arc<Call>,
//! ) -> rvoip_call_control::Result<()> {
//!     let joint = mixer
//!         .join(caller.clone(), JoinType::Bridge, Direction::Duplex, JoinOptions::default())
//!         .await?;
//!     let completion = joint.get().await;
//!     assert!(completion.is_successful());
//!
//!     mixer.unjoin(caller, true).await.get().await;
//!     Ok(())
//! }
//! ```

pub mod call;
pub mod config;
pub mod errors;
pub mod events;
pub mod join;
pub mod logging;
pub mod media;
pub mod mixer;
pub mod negotiation;
pub mod participant;
pub mod sdp;
pub mod signaling;
pub mod types;

// Re-export key types
pub use call::{Call, CallSessionState, CallState, HoldState, MuteState, RenegotiationPhase};
pub use config::{CallControlConfig, CallControlContext, JoinOptions, MixerConfig, PLAY_TONES_PROPERTY};
pub use errors::{CallControlError, MediaError, Result};
pub use events::{
    ActiveSpeakerEvent, DispatchHandle, EventDispatcher, EventSubscriber, ExceptionHandler, JoinCause,
    JoinCompleteEvent, ParticipantEvent, ParticipantObserver, RenegotiationEvent, RenegotiationKind, UnjoinCause,
    UnjoinCompleteEvent,
};
pub use join::{CompletionTask, Joint, Unjoint};
pub use logging::{init_logging, LoggingConfig};
pub use media::{
    AdapterKind, MediaResource, MediaResult, MediaService, MediaServiceFactory, MixerListener, MixerMediaEvent,
    MixerResource,
};
pub use mixer::{ClampDtmfAdapter, Mixer};
pub use negotiation::{NegotiationEvent, NegotiationEventKind, SdpNegotiator};
pub use participant::{
    ActiveInputIndex, HoldChange, JoinEdge, Participant, ParticipantGraph, ParticipantRef, Reservation,
};
pub use signaling::{Reason, SignalRequest, SignalResponse, SignalingSession};
pub use types::{Attributes, Direction, Endpoint, JoinType, MediaObjectId, ParticipantKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
