//! rtc-recorder - WebRTC ingest to WebM
//!
//! Negotiates receive-only peer connections with browsers, rebuilds VP8
//! frames from the inbound RTP stream and writes them to WebM files.

pub mod config;
pub mod container;
pub mod recording;
pub mod web;
pub mod webrtc;

// Re-exports
pub use crate::config::{Config, RecordingConfig, VideoCodec, WebRTCConfig};
pub use crate::container::{ContainerWriter, WebmFileWriter};
pub use crate::recording::{RecordingPipeline, RecordingSummary};
pub use crate::webrtc::{SessionManager, TrackRegistry};
