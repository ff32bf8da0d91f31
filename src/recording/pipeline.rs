//! Track-to-file recording pipeline
//!
//! Reads RTP packets from a source, reassembles samples, waits for the first
//! keyframe to learn the frame size and then appends every sample to the
//! container with a monotonically increasing timestamp. The run ends when the
//! source reaches end of stream or the maximum duration elapses, whichever
//! comes first. The container is closed exactly once on every exit path.

use super::keyframe;
use super::reassembler::{FrameReassembler, Sample};
use super::RecordingError;
use crate::config::VideoCodec;
use crate::container::{ContainerError, ContainerWriter};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp::packet::Packet;

/// Transient read failures logged at warn level before dropping to debug
const LOUD_READ_ERRORS: u64 = 5;

/// Why `read_packet` produced no packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The track is gone; no further packets will arrive
    EndOfStream,
    /// A single read failed; the next one may succeed
    Transient(String),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::EndOfStream => write!(f, "end of stream"),
            ReadError::Transient(msg) => write!(f, "read failed: {}", msg),
        }
    }
}

/// Source of RTP packets for one track
#[async_trait]
pub trait PacketSource: Send + Sync {
    async fn read_packet(&self) -> Result<Packet, ReadError>;

    /// Negotiated mime type, e.g. `video/VP8`
    fn mime_type(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Deadline,
}

/// Outcome of a completed recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub stop_reason: StopReason,
    pub frames_written: u64,
    pub dropped_before_keyframe: u64,
    pub packets_dropped: u64,
    pub read_errors: u64,
    /// Timestamp of the last written frame
    pub output_timestamp: Duration,
}

impl RecordingSummary {
    fn new() -> Self {
        Self {
            stop_reason: StopReason::EndOfStream,
            frames_written: 0,
            dropped_before_keyframe: 0,
            packets_dropped: 0,
            read_errors: 0,
            output_timestamp: Duration::ZERO,
        }
    }
}

/// Records one track into one container
pub struct RecordingPipeline<S: PacketSource, C: ContainerWriter> {
    source: Arc<S>,
    container: C,
    max_duration: Duration,
    reorder_window: u16,
}

impl<S: PacketSource, C: ContainerWriter> RecordingPipeline<S, C> {
    pub fn new(source: Arc<S>, container: C, max_duration: Duration, reorder_window: u16) -> Self {
        Self {
            source,
            container,
            max_duration,
            reorder_window,
        }
    }

    /// Run to completion. The container is finalized before this returns.
    pub async fn run(mut self) -> Result<RecordingSummary, RecordingError> {
        let result = self.record().await;
        let closed = self.container.close();

        match (result, closed) {
            (Ok(summary), Ok(())) => {
                info!(
                    "Recording finished ({:?}): {} frames, {:?} recorded, {} packets dropped",
                    summary.stop_reason, summary.frames_written, summary.output_timestamp, summary.packets_dropped
                );
                Ok(summary)
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Failed to finalize recording after error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn record(&mut self) -> Result<RecordingSummary, RecordingError> {
        let mime = self.source.mime_type();
        let codec = VideoCodec::from_mime_type(&mime).ok_or(RecordingError::UnsupportedCodec(mime))?;
        let mut reassembler = match codec {
            VideoCodec::VP8 => FrameReassembler::new(self.reorder_window, Vp8Packet::default(), codec.clock_rate()),
        };

        let deadline = Instant::now() + self.max_duration;
        let mut summary = RecordingSummary::new();
        debug!("Recording {} for at most {:?}", codec.as_str(), self.max_duration);

        loop {
            if Instant::now() >= deadline {
                summary.stop_reason = StopReason::Deadline;
                break;
            }

            let packet = match timeout_at(deadline, self.source.read_packet()).await {
                Err(_) => {
                    summary.stop_reason = StopReason::Deadline;
                    break;
                }
                Ok(Err(ReadError::EndOfStream)) => {
                    summary.stop_reason = StopReason::EndOfStream;
                    break;
                }
                Ok(Err(ReadError::Transient(msg))) => {
                    summary.read_errors += 1;
                    if summary.read_errors <= LOUD_READ_ERRORS {
                        warn!("Track read failed: {}", msg);
                    } else {
                        debug!("Track read failed: {}", msg);
                    }
                    continue;
                }
                Ok(Ok(packet)) => packet,
            };

            reassembler.push(packet);
            while let Some(sample) = reassembler.pop() {
                self.write_sample(codec, sample, &mut summary)?;
            }
        }

        // Nothing more will arrive; release what the reorder window still holds
        reassembler.end_of_stream();
        while let Some(sample) = reassembler.pop() {
            self.write_sample(codec, sample, &mut summary)?;
        }

        let stats = reassembler.stats();
        debug!("Reassembled {} samples", stats.samples_emitted);
        summary.packets_dropped = stats.packets_dropped;
        Ok(summary)
    }

    fn write_sample(
        &mut self,
        codec: VideoCodec,
        sample: Sample,
        summary: &mut RecordingSummary,
    ) -> Result<(), ContainerError> {
        let info = keyframe::inspect(codec, &sample.data);

        if !self.container.is_open() {
            match info.dimensions {
                Some(dims) if info.is_keyframe => self.container.open(dims.width, dims.height)?,
                _ => {
                    summary.dropped_before_keyframe += 1;
                    return Ok(());
                }
            }
        }

        summary.output_timestamp += sample.duration;
        self.container.write_frame(
            info.is_keyframe,
            summary.output_timestamp.as_millis() as u64,
            &sample.data,
        )?;
        summary.frames_written += 1;
        Ok(())
    }
}
