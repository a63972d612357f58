//! Media subsystem collaborator interfaces
//!
//! The call-control layer never touches RTP or mixing itself. It drives these
//! narrow traits, which a media server binding implements:
//!
//! - [`MediaResource`] - anything that can be connected to another media object
//!   (a network connection behind a call, a mixer, a mixer adapter)
//! - [`MixerResource`] - a mixing media resource that can create adapters and
//!   reports active inputs
//! - [`MediaService`] / [`MediaServiceFactory`] - prompt/collect/record
//!   capabilities attached to a participant

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{MediaError, Result};
use crate::types::{Direction, MediaObjectId};

/// Result of a collaborator media operation
pub type MediaResult<T> = std::result::Result<T, MediaError>;

/// An underlying connectable media object
#[async_trait]
pub trait MediaResource: Send + Sync + fmt::Debug {
    /// Stable identity of this media object
    fn id(&self) -> MediaObjectId;

    /// Whether this object can take part in a media join at all
    fn is_joinable(&self) -> bool {
        true
    }

    /// Connect this object to `peer` with the given direction
    async fn join(&self, direction: Direction, peer: &Arc<dyn MediaResource>) -> MediaResult<()>;

    /// Disconnect this object from `peer`
    async fn unjoin(&self, peer: &Arc<dyn MediaResource>) -> MediaResult<()>;

    /// Release the object and everything allocated for it
    async fn release(&self) -> MediaResult<()>;
}

/// Adapter flavours a mixer can create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Filters DTMF tones out of the mixed stream
    DtmfClamp,
}

/// Events raised by a mixer media resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerMediaEvent {
    /// The set of media objects currently contributing audio changed
    ActiveInputsChanged { active_inputs: Vec<MediaObjectId> },
    /// Any other media level notification, carried for logging only
    Other { name: String },
}

/// Receives mixer media events. May be called from any thread.
pub trait MixerListener: Send + Sync {
    fn on_mixer_event(&self, event: MixerMediaEvent);
}

/// A mixing media resource
#[async_trait]
pub trait MixerResource: MediaResource {
    /// Create an adapter in front of this mixer
    async fn create_adapter(&self, kind: AdapterKind) -> MediaResult<Arc<dyn MediaResource>>;

    /// Register a listener for mixer events
    fn add_listener(&self, listener: Arc<dyn MixerListener>);

    /// View this mixer as a plain media resource
    fn as_media_resource(self: Arc<Self>) -> Arc<dyn MediaResource>;
}

/// Media capabilities of a participant: play, collect, record
#[async_trait]
pub trait MediaService: Send + Sync {
    /// Media group that carries the service's media; joined to its participant
    fn media_group(&self) -> Arc<dyn MediaResource>;

    /// Render text or an audio URI to the participant
    async fn output(&self, content: &str) -> MediaResult<()>;

    /// Collect input matching a grammar; returns the recognised value
    async fn input(&self, grammar: &str) -> MediaResult<String>;

    /// Record the participant's media to a URI
    async fn record(&self, uri: &str) -> MediaResult<()>;

    /// Stop every running operation and release the media group
    async fn release(&self) -> MediaResult<()>;
}

impl fmt::Debug for dyn MediaService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaService").finish_non_exhaustive()
    }
}

/// Creates media services for participants
#[async_trait]
pub trait MediaServiceFactory: Send + Sync {
    async fn create(&self, participant: MediaObjectId) -> Result<Arc<dyn MediaService>>;
}
