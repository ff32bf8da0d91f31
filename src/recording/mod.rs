//! Recording of inbound video tracks
//!
//! This module provides:
//! - RTP frame reassembly with a bounded reorder window
//! - Keyframe and frame-size detection
//! - The time-boxed track-to-file pipeline

pub mod keyframe;
pub mod pipeline;
pub mod reassembler;

pub use pipeline::{PacketSource, ReadError, RecordingPipeline, RecordingSummary, StopReason};

use crate::container::ContainerError;
use std::error::Error;
use std::fmt;

/// Recording-related errors
#[derive(Debug)]
pub enum RecordingError {
    /// Track codec cannot be muxed
    UnsupportedCodec(String),
    /// Output file failure
    Container(ContainerError),
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::UnsupportedCodec(codec) => write!(f, "Unsupported codec: {}", codec),
            RecordingError::Container(e) => write!(f, "Container error: {}", e),
        }
    }
}

impl Error for RecordingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RecordingError::Container(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ContainerError> for RecordingError {
    fn from(e: ContainerError) -> Self {
        RecordingError::Container(e)
    }
}
