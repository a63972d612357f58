//! Media handle to participant mapping for active-speaker reports

use std::collections::HashMap;

use parking_lot::RwLock;

use super::ParticipantRef;
use crate::types::MediaObjectId;

/// Maps the media object a mixer reports as an input to the logical participant.
///
/// When a join goes through a clamp adapter the mixer sees the adapter's media,
/// so the entry is keyed by the adapter id rather than the peer id.
#[derive(Debug, Default)]
pub struct ActiveInputIndex {
    entries: RwLock<HashMap<MediaObjectId, ParticipantRef>>,
}

impl ActiveInputIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, handle: MediaObjectId, participant: ParticipantRef) {
        self.entries.write().insert(handle, participant);
    }

    pub fn remove(&self, handle: MediaObjectId) -> Option<ParticipantRef> {
        self.entries.write().remove(&handle)
    }

    pub fn get(&self, handle: MediaObjectId) -> Option<ParticipantRef> {
        self.entries.read().get(&handle).cloned()
    }

    /// Translate raw active inputs, silently dropping unmapped handles
    pub fn resolve(&self, handles: &[MediaObjectId]) -> Vec<ParticipantRef> {
        let entries = self.entries.read();
        handles.iter().filter_map(|handle| entries.get(handle).cloned()).collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
