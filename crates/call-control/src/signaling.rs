//! Signaling collaborator interface
//!
//! The transport (SIP parsing, transactions, dialogs) lives elsewhere. A call
//! only creates requests on its session, sends them, answers inbound requests
//! and acknowledges responses.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::errors::Result;

/// Request attribute marking a re-INVITE that puts the call on hold
pub const HOLD_REQUEST: &str = "hold-request";
/// Request attribute marking a re-INVITE that takes the call off hold
pub const UNHOLD_REQUEST: &str = "unhold-request";
/// Request attribute marking a re-INVITE that mutes the call
pub const MUTE_REQUEST: &str = "mute-request";
/// Request attribute marking a re-INVITE that unmutes the call
pub const UNMUTE_REQUEST: &str = "unmute-request";

/// Content type used for SDP bodies
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// A signaling request, inbound or outbound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRequest {
    /// Correlates a request with its eventual response
    pub id: Uuid,
    pub method: String,
    /// Local correlation bag; never sent on the wire
    pub attributes: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub content: Option<Bytes>,
}

impl SignalRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            attributes: HashMap::new(),
            headers: HashMap::new(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

/// A response to a request we sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalResponse {
    pub status: u16,
    /// The request this response answers, attributes included
    pub request: SignalRequest,
    pub content: Option<Bytes>,
}

impl SignalResponse {
    pub fn new(status: u16, request: SignalRequest) -> Self {
        Self {
            status,
            request,
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Reason used when an inbound request is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Busy,
    Decline,
    Forbidden,
    NotAcceptable,
    Error,
}

impl Reason {
    /// Status code sent for this reason
    pub fn code(self) -> u16 {
        match self {
            Reason::Busy => 486,
            Reason::Decline => 603,
            Reason::Forbidden => 403,
            Reason::NotAcceptable => 488,
            Reason::Error => 500,
        }
    }
}

/// Signaling session of one call leg
#[async_trait]
pub trait SignalingSession: Send + Sync {
    /// Build a new in-dialog request
    fn create_request(&self, method: &str) -> SignalRequest {
        SignalRequest::new(method)
    }

    /// Send a request; the response is delivered later through the call
    async fn send_request(&self, request: SignalRequest) -> Result<()>;

    /// Answer an inbound request
    async fn send_response(&self, request: &SignalRequest, status: u16, content: Option<Bytes>) -> Result<()>;

    /// Acknowledge a final response to a re-INVITE we sent
    async fn send_ack(&self, response: &SignalResponse, content: Option<Bytes>) -> Result<()>;
}
