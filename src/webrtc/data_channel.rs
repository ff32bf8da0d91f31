//! DataChannel control commands
//!
//! The browser drives recordings with plain text messages on any data
//! channel of its session:
//! - `<process_id>;start` records the track bound to `process_id`, then
//!   closes the session that carried the command
//! - `<process_id>;stop` closes the carrying session at once

use super::track_registry::TrackRegistry;
use super::WebRTCError;
use crate::config::{RecordingConfig, VideoCodec};
use crate::container::WebmFileWriter;
use crate::recording::{PacketSource, RecordingPipeline};
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
}

/// Parsed control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub session_id: String,
    pub action: ControlAction,
}

impl ControlCommand {
    /// Parse `<id>;start` or `<id>;stop`. Anything else is rejected.
    pub fn parse(data: &[u8]) -> Result<Self, WebRTCError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| WebRTCError::ControlError("Control message is not UTF-8".to_string()))?;

        let parts: Vec<&str> = text.split(';').collect();
        if parts.len() != 2 {
            return Err(WebRTCError::ControlError(format!("Malformed control message: {:?}", text)));
        }

        if parts[0].is_empty() {
            return Err(WebRTCError::ControlError("Control message has an empty id".to_string()));
        }

        let action = match parts[1] {
            "start" => ControlAction::Start,
            "stop" => ControlAction::Stop,
            other => {
                return Err(WebRTCError::ControlError(format!("Unknown control action: {:?}", other)));
            }
        };

        Ok(Self {
            session_id: parts[0].to_string(),
            action,
        })
    }
}

/// Closing side of the session that owns a data channel
#[async_trait]
pub trait SessionControl: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn close(&self) -> Result<(), WebRTCError>;
}

/// What a control message did
#[derive(Debug)]
pub enum ControlOutcome {
    /// Recording task spawned; the session closes when it finishes
    Recording(JoinHandle<()>),
    /// Session closed
    Stopped,
    /// Valid command with nothing to act on
    Ignored,
}

/// Handles control messages for one session
pub struct ControlChannel<T, S> {
    registry: TrackRegistry<T>,
    session: Arc<S>,
    recording: RecordingConfig,
}

impl<T: PacketSource + 'static, S: SessionControl> ControlChannel<T, S> {
    pub fn new(registry: TrackRegistry<T>, session: Arc<S>, recording: RecordingConfig) -> Self {
        Self {
            registry,
            session,
            recording,
        }
    }

    pub async fn handle_message(&self, data: &[u8]) -> Result<ControlOutcome, WebRTCError> {
        let command = ControlCommand::parse(data)?;
        info!("Session {} control: {:?} {}", self.session.id(), command.action, command.session_id);

        match command.action {
            ControlAction::Start => Ok(self.start(&command.session_id)),
            ControlAction::Stop => {
                self.session.close().await?;
                Ok(ControlOutcome::Stopped)
            }
        }
    }

    fn start(&self, process_id: &str) -> ControlOutcome {
        let Some(claim) = self.registry.claim(process_id) else {
            info!("No idle track bound to {}, ignoring start", process_id);
            return ControlOutcome::Ignored;
        };

        let track = claim.track().clone();
        let mime = track.mime_type();
        let Some(codec) = VideoCodec::from_mime_type(&mime) else {
            warn!("Track for {} uses {}, which cannot be recorded", process_id, mime);
            return ControlOutcome::Ignored;
        };

        let path = self.recording.output_path(process_id);
        let writer = WebmFileWriter::new(path, codec);
        let pipeline = RecordingPipeline::new(
            track,
            writer,
            self.recording.max_duration(),
            self.recording.reorder_window,
        );

        let session = self.session.clone();
        let process_id = process_id.to_string();
        let handle = tokio::spawn(async move {
            info!("Recording {} started", process_id);
            if let Err(e) = pipeline.run().await {
                error!("Recording {} failed: {}", process_id, e);
            }
            drop(claim);

            if let Err(e) = session.close().await {
                warn!("Failed to close session {} after recording: {}", session.id(), e);
            }
        });

        ControlOutcome::Recording(handle)
    }
}
