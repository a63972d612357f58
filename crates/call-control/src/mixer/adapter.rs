//! DTMF clamp adapter
//!
//! A pass-through participant that sits between a mixer and a call so the
//! call's DTMF tones never reach the mix. It forwards everything to its
//! mixer; only its identity and media object are its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::debug;

use super::Mixer;
use crate::config::JoinOptions;
use crate::errors::Result;
use crate::media::MediaResource;
use crate::participant::{JoinEdge, Participant, ParticipantCore};
use crate::types::{MediaObjectId, ParticipantKind};

pub struct ClampDtmfAdapter {
    owner: Weak<Mixer>,
    owner_id: MediaObjectId,
    media: Arc<dyn MediaResource>,
    released: AtomicBool,
}

impl std::fmt::Debug for ClampDtmfAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClampDtmfAdapter")
            .field("id", &self.media.id())
            .field("owner", &self.owner_id)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}

impl ClampDtmfAdapter {
    pub(crate) fn new(owner: Weak<Mixer>, owner_id: MediaObjectId, media: Arc<dyn MediaResource>) -> Self {
        Self {
            owner,
            owner_id,
            media,
            released: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> Option<Arc<Mixer>> {
        self.owner.upgrade()
    }

    pub fn owner_id(&self) -> MediaObjectId {
        self.owner_id
    }

    /// The adapter's own media object, the one wired into the media join
    pub fn media(&self) -> Arc<dyn MediaResource> {
        self.media.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release the adapter's media. Only the first call reaches the media object.
    pub async fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Releasing DTMF clamp adapter {} of mixer {}", self.media.id(), self.owner_id);
        self.media.release().await?;
        Ok(())
    }
}

#[async_trait]
impl Participant for ClampDtmfAdapter {
    fn id(&self) -> MediaObjectId {
        self.media.id()
    }

    fn kind(&self) -> ParticipantKind {
        ParticipantKind::Adapter
    }

    fn core(&self) -> Option<Arc<ParticipantCore>> {
        self.owner().map(|mixer| mixer.core_handle())
    }

    fn media_object(&self) -> Option<Arc<dyn MediaResource>> {
        if self.is_released() {
            None
        } else {
            Some(self.media.clone())
        }
    }

    fn join_owner(&self) -> Option<Arc<dyn Participant>> {
        self.owner().map(|mixer| mixer as Arc<dyn Participant>)
    }

    fn clamps_dtmf(&self, options: &JoinOptions) -> bool {
        self.owner().map(|mixer| mixer.clamps_dtmf(options)).unwrap_or(false)
    }

    fn on_edge_added(&self, edge: &JoinEdge) {
        if let Some(mixer) = self.owner() {
            mixer.on_edge_added(edge);
        }
    }

    fn on_edge_removed(&self, edge: &JoinEdge) {
        if let Some(mixer) = self.owner() {
            mixer.on_edge_removed(edge);
        }
    }
}
