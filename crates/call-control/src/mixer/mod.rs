//! Conference mixer participant
//!
//! A [`Mixer`] fronts a [`MixerResource`]. Joins between a call and a mixer
//! with DTMF clamping enabled are wired through a [`ClampDtmfAdapter`], and
//! the mixer's active-input notifications are translated into
//! [`ActiveSpeakerEvent`]s naming the logical participants.

mod adapter;

pub use adapter::ClampDtmfAdapter;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{CallControlContext, JoinOptions, MixerConfig};
use crate::errors::{CallControlError, Result};
use crate::events::{ActiveSpeakerEvent, EventDispatcher, ParticipantEvent};
use crate::media::{AdapterKind, MediaResource, MixerListener, MixerMediaEvent, MixerResource};
use crate::participant::{ActiveInputIndex, JoinEdge, Participant, ParticipantCore};
use crate::types::{Endpoint, MediaObjectId, ParticipantKind};

pub struct Mixer {
    core: Arc<ParticipantCore>,
    this: Weak<Mixer>,
    resource: Arc<dyn MixerResource>,
    clamp_by_default: bool,
    active_inputs: ActiveInputIndex,
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("core", &self.core)
            .field("clamp_by_default", &self.clamp_by_default)
            .field("active_inputs", &self.active_inputs.len())
            .finish()
    }
}

/// Forwards mixer media events to the mixer without keeping it alive
struct ActiveInputListener {
    mixer: Weak<Mixer>,
}

impl MixerListener for ActiveInputListener {
    fn on_mixer_event(&self, event: MixerMediaEvent) {
        let Some(mixer) = self.mixer.upgrade() else {
            return;
        };
        match event {
            MixerMediaEvent::ActiveInputsChanged { active_inputs } => mixer.on_active_inputs_changed(&active_inputs),
            MixerMediaEvent::Other { name } => debug!("Mixer {} media event {}", mixer.core.id(), name),
        }
    }
}

impl Mixer {
    /// Create a mixer over `resource` and register for its active-input reports
    pub fn new(
        context: &CallControlContext,
        address: Endpoint,
        resource: Arc<dyn MixerResource>,
        config: MixerConfig,
    ) -> Result<Arc<Self>> {
        let id = resource.id();
        let dispatcher = EventDispatcher::new(id, context.config.event_channel_capacity)?;
        let clamp_by_default = config.clamps_dtmf(&context.config, &address);
        let media: Arc<dyn MediaResource> = resource.clone().as_media_resource();

        let mixer = Arc::new_cyclic(|this: &Weak<Mixer>| {
            let handle: Weak<dyn Participant> = this.clone();
            Mixer {
                core: Arc::new(ParticipantCore::new(
                    ParticipantKind::Mixer,
                    address,
                    context.clone(),
                    dispatcher,
                    media,
                    handle,
                )),
                this: this.clone(),
                resource,
                clamp_by_default,
                active_inputs: ActiveInputIndex::new(),
            }
        });
        mixer.resource.add_listener(Arc::new(ActiveInputListener {
            mixer: Arc::downgrade(&mixer),
        }));

        info!(
            "Created mixer {} at {} (DTMF clamp {})",
            id,
            mixer.core.address(),
            if clamp_by_default { "on" } else { "off" }
        );
        Ok(mixer)
    }

    pub(crate) fn core_handle(&self) -> Arc<ParticipantCore> {
        self.core.clone()
    }

    /// Whether joins to calls are clamped when the join options do not say otherwise
    pub fn clamps_by_default(&self) -> bool {
        self.clamp_by_default
    }

    pub fn active_inputs(&self) -> &ActiveInputIndex {
        &self.active_inputs
    }

    /// Translate raw active inputs into one [`ActiveSpeakerEvent`]
    pub fn on_active_inputs_changed(&self, inputs: &[MediaObjectId]) {
        let active_speakers = self.active_inputs.resolve(inputs);
        debug!(
            "Mixer {}: {} of {} active inputs are participants",
            self.core.id(),
            active_speakers.len(),
            inputs.len()
        );
        self.core.dispatcher().dispatch(ParticipantEvent::ActiveSpeaker(ActiveSpeakerEvent {
            mixer: self.core.id(),
            active_speakers,
        }));
    }

    fn input_handle(edge: &JoinEdge) -> MediaObjectId {
        edge.real_joined
            .as_ref()
            .map(|adapter| adapter.id())
            .unwrap_or(edge.peer.id)
    }
}

#[async_trait]
impl Participant for Mixer {
    fn id(&self) -> MediaObjectId {
        self.core.id()
    }

    fn kind(&self) -> ParticipantKind {
        ParticipantKind::Mixer
    }

    fn core(&self) -> Option<Arc<ParticipantCore>> {
        Some(self.core.clone())
    }

    fn media_object(&self) -> Option<Arc<dyn MediaResource>> {
        self.core.media()
    }

    fn join_owner(&self) -> Option<Arc<dyn Participant>> {
        self.this.upgrade().map(|mixer| mixer as Arc<dyn Participant>)
    }

    fn clamps_dtmf(&self, options: &JoinOptions) -> bool {
        options.play_tones.map(|play| !play).unwrap_or(self.clamp_by_default)
    }

    async fn create_clamp_adapter(&self) -> Result<Option<Arc<ClampDtmfAdapter>>> {
        if self.core.is_disconnected() {
            return Err(CallControlError::illegal_state(format!("Mixer {} is disconnected", self.core.id())));
        }
        let media = self.resource.create_adapter(AdapterKind::DtmfClamp).await?;
        debug!("Mixer {} created DTMF clamp adapter {}", self.core.id(), media.id());
        Ok(Some(Arc::new(ClampDtmfAdapter::new(self.this.clone(), self.core.id(), media))))
    }

    fn on_edge_added(&self, edge: &JoinEdge) {
        self.active_inputs.put(Self::input_handle(edge), edge.peer.clone());
    }

    fn on_edge_removed(&self, edge: &JoinEdge) {
        self.active_inputs.remove(Self::input_handle(edge));
    }

    fn on_disconnected(&self) {
        self.active_inputs.clear();
    }
}
