//! Signaling request body
//!
//! The browser posts its offer together with the identifier it will later
//! use in control commands. The answer goes back as a bare session
//! description.

use super::WebRTCError;
use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// `POST /` body: `{"process_id": "...", "offer": {"type": "offer", "sdp": "..."}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub process_id: String,
    pub offer: RTCSessionDescription,
}

impl NegotiationRequest {
    /// Parse a request body
    pub fn from_json(body: &[u8]) -> Result<Self, WebRTCError> {
        serde_json::from_slice(body).map_err(|e| WebRTCError::SdpError(format!("Failed to decode SDP: {}", e)))
    }

    /// Check the request can start a negotiation
    pub fn validate(&self) -> Result<(), WebRTCError> {
        if self.process_id.is_empty() {
            return Err(WebRTCError::InvalidRequest("process_id must not be empty".to_string()));
        }

        if self.offer.sdp_type != RTCSdpType::Offer {
            return Err(WebRTCError::InvalidRequest(format!(
                "expected an offer, got {}",
                self.offer.sdp_type
            )));
        }

        Ok(())
    }
}
