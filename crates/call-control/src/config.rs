//! Call-control configuration
//!
//! [`CallControlConfig`] carries the runtime-wide settings; [`MixerConfig`]
//! and [`JoinOptions`] override DTMF tone handling per mixer and per join.
//!
//! ```rust
//! use rvoip_call_control::CallControlConfig;
//! use std::time::Duration;
//!
//! let config = CallControlConfig::new()
//!     .with_play_tones(false)
//!     .with_renegotiation_timeout(Duration::from_secs(5));
//!
//! assert!(!config.play_tones);
//! assert_eq!(config.renegotiation_timeout(), Duration::from_secs(5));
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CallControlError, Result};
use crate::media::MediaServiceFactory;
use crate::types::Endpoint;

/// Endpoint/option property that disables DTMF tone pass-through when `"false"`
pub const PLAY_TONES_PROPERTY: &str = "playTones";

/// Runtime-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallControlConfig {
    /// Pass DTMF tones through mixers. `false` clamps tones on every mixer.
    pub play_tones: bool,
    /// How long a renegotiation step waits for its asynchronous outcome
    pub renegotiation_timeout_ms: u64,
    /// How long an inbound re-offer waits for the peer leg's hold/unhold
    pub peer_hold_timeout_ms: u64,
    /// Capacity of each participant's broadcast event tap
    pub event_channel_capacity: usize,
}

impl Default for CallControlConfig {
    fn default() -> Self {
        Self {
            play_tones: true,
            renegotiation_timeout_ms: 32_000,
            peer_hold_timeout_ms: 32_000,
            event_channel_capacity: 256,
        }
    }
}

impl CallControlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_play_tones(mut self, play_tones: bool) -> Self {
        self.play_tones = play_tones;
        self
    }

    pub fn with_renegotiation_timeout(mut self, timeout: Duration) -> Self {
        self.renegotiation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_peer_hold_timeout(mut self, timeout: Duration) -> Self {
        self.peer_hold_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn renegotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.renegotiation_timeout_ms)
    }

    pub fn peer_hold_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_hold_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.renegotiation_timeout_ms == 0 {
            return Err(CallControlError::config("renegotiation_timeout_ms must be positive"));
        }
        if self.peer_hold_timeout_ms == 0 {
            return Err(CallControlError::config("peer_hold_timeout_ms must be positive"));
        }
        if self.event_channel_capacity == 0 {
            return Err(CallControlError::config("event_channel_capacity must be positive"));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| CallControlError::config(format!("Invalid call-control config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CallControlError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}

/// Per-mixer settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerConfig {
    /// Overrides [`CallControlConfig::play_tones`] for this mixer
    pub play_tones: Option<bool>,
}

impl MixerConfig {
    pub fn with_play_tones(mut self, play_tones: bool) -> Self {
        self.play_tones = Some(play_tones);
        self
    }

    /// Whether a mixer with this config at `address` clamps DTMF by default.
    ///
    /// Tones are clamped when any layer switched them off: the runtime config,
    /// the mixer config or a `playTones=false` endpoint property.
    pub fn clamps_dtmf(&self, runtime: &CallControlConfig, address: &Endpoint) -> bool {
        let endpoint_off = address
            .property(PLAY_TONES_PROPERTY)
            .map(|value| !value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let mixer_off = matches!(self.play_tones, Some(false));
        let mixer_on = matches!(self.play_tones, Some(true));
        endpoint_off || mixer_off || (!runtime.play_tones && !mixer_on)
    }
}

/// Per-join settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOptions {
    /// When set, decides DTMF clamping for this join alone
    pub play_tones: Option<bool>,
}

impl JoinOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_play_tones(mut self, play_tones: bool) -> Self {
        self.play_tones = Some(play_tones);
        self
    }
}

/// Shared execution context handed to every participant
#[derive(Clone)]
pub struct CallControlContext {
    pub config: Arc<CallControlConfig>,
    pub media_services: Option<Arc<dyn MediaServiceFactory>>,
}

impl CallControlContext {
    pub fn new(config: CallControlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            media_services: None,
        })
    }

    pub fn with_media_services(mut self, factory: Arc<dyn MediaServiceFactory>) -> Self {
        self.media_services = Some(factory);
        self
    }
}

impl std::fmt::Debug for CallControlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallControlContext")
            .field("config", &self.config)
            .field("media_services", &self.media_services.is_some())
            .finish()
    }
}
