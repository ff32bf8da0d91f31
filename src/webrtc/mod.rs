//! WebRTC ingest
//!
//! This module provides the receiving side of a browser publish:
//! - Peer connection creation and non-trickle SDP answering
//! - Session lifecycle and keyframe requests
//! - Inbound track registry shared with the control path
//! - DataChannel control commands that start and stop recordings

pub mod data_channel;
pub mod media_track;
pub mod peer_connection;
pub mod session;
pub mod signaling;
pub mod track_registry;

pub use media_track::InboundTrack;
pub use session::SessionManager;
pub use signaling::NegotiationRequest;
pub use track_registry::TrackRegistry;

use std::error::Error;
use std::fmt;

/// WebRTC-related errors
#[derive(Debug)]
pub enum WebRTCError {
    /// Peer connection creation failed
    ConnectionFailed(String),
    /// Request body decoded but is not a usable offer
    InvalidRequest(String),
    /// SDP processing failed
    SdpError(String),
    /// Local candidate gathering did not finish in time
    GatheringTimeout,
    /// Malformed control command
    ControlError(String),
    /// Media track error
    MediaError(String),
    /// Session not found
    SessionNotFound(String),
}

impl fmt::Display for WebRTCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebRTCError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            WebRTCError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            WebRTCError::SdpError(msg) => write!(f, "SDP error: {}", msg),
            WebRTCError::GatheringTimeout => write!(f, "ICE candidate gathering timed out"),
            WebRTCError::ControlError(msg) => write!(f, "Control error: {}", msg),
            WebRTCError::MediaError(msg) => write!(f, "Media error: {}", msg),
            WebRTCError::SessionNotFound(id) => write!(f, "Session not found: {}", id),
        }
    }
}

impl Error for WebRTCError {}
