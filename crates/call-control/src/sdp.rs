//! SDP direction attribute helpers
//!
//! Hold and mute only ever change the media direction of an offer that was
//! already negotiated, so this module reads and rewrites the
//! `a=sendrecv` / `a=sendonly` / `a=recvonly` / `a=inactive` attributes and
//! leaves every other line untouched.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Media direction attribute of an SDP description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn attribute(self) -> &'static str {
        match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        }
    }

    fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "sendrecv" => Some(MediaDirection::SendRecv),
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "inactive" => Some(MediaDirection::Inactive),
            _ => None,
        }
    }
}

fn lines(sdp: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(sdp)
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn direction_of_line(line: &str) -> Option<MediaDirection> {
    line.strip_prefix("a=").and_then(MediaDirection::from_attribute)
}

/// First direction attribute found in the description.
///
/// A description without any direction attribute is send-receive.
pub fn direction(sdp: &[u8]) -> MediaDirection {
    lines(sdp)
        .iter()
        .find_map(|line| direction_of_line(line))
        .unwrap_or(MediaDirection::SendRecv)
}

/// Rewrite every direction attribute of `sdp` to `wanted`.
///
/// When the description carries no direction attribute, one is appended to
/// every media section (or to the session when there is no `m=` line).
pub fn with_direction(sdp: &[u8], wanted: MediaDirection) -> Bytes {
    let original = lines(sdp);
    let attribute = format!("a={}", wanted.attribute());
    let has_direction = original.iter().any(|line| direction_of_line(line).is_some());

    let mut out: Vec<String> = Vec::with_capacity(original.len() + 2);
    if has_direction {
        for line in original {
            if direction_of_line(&line).is_some() {
                out.push(attribute.clone());
            } else {
                out.push(line);
            }
        }
    } else {
        let mut in_media = false;
        for line in original {
            if line.starts_with("m=") {
                if in_media {
                    out.push(attribute.clone());
                }
                in_media = true;
            }
            out.push(line);
        }
        out.push(attribute);
    }

    let mut text = out.join("\r\n");
    text.push_str("\r\n");
    Bytes::from(text)
}
