//! Inbound media tracks
//!
//! Wraps a remote track as a recording packet source and drives the
//! periodic keyframe requests sent back to the publisher.

use crate::recording::{PacketSource, ReadError};
use async_trait::async_trait;
use log::{debug, trace};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use webrtc::interceptor;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util;

/// What a session needs to know about a bound track
pub trait RemoteTrack: Send + Sync + 'static {
    fn ssrc(&self) -> u32;

    fn is_video(&self) -> bool;
}

/// Remote track received from the browser
pub struct InboundTrack {
    track: Arc<TrackRemote>,
}

impl InboundTrack {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self { track }
    }

    pub fn kind(&self) -> RTPCodecType {
        self.track.kind()
    }
}

impl RemoteTrack for InboundTrack {
    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    fn is_video(&self) -> bool {
        self.kind() == RTPCodecType::Video
    }
}

#[async_trait]
impl PacketSource for InboundTrack {
    async fn read_packet(&self) -> Result<Packet, ReadError> {
        match self.track.read_rtp().await {
            Ok((packet, _attributes)) => {
                trace!(
                    "RTP seq={} ts={} len={}",
                    packet.header.sequence_number,
                    packet.header.timestamp,
                    packet.payload.len()
                );
                Ok(packet)
            }
            Err(e) => Err(classify_read_error(&e)),
        }
    }

    fn mime_type(&self) -> String {
        self.track.codec().capability.mime_type
    }
}

/// Map a track read failure to end-of-stream or a transient error.
///
/// The receiver reports shutdown as a closed pipe, a dropped receiver or a
/// closed buffer, the last possibly wrapped by the interceptor chain.
pub fn classify_read_error(error: &webrtc::Error) -> ReadError {
    match error {
        webrtc::Error::ErrClosedPipe
        | webrtc::Error::ErrRTPReceiverNil
        | webrtc::Error::Util(util::Error::ErrBufferClosed)
        | webrtc::Error::Interceptor(interceptor::Error::Util(util::Error::ErrBufferClosed)) => {
            ReadError::EndOfStream
        }
        other => ReadError::Transient(other.to_string()),
    }
}

/// Periodic keyframe request task owned by a session
pub struct KeyframeRequester {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl KeyframeRequester {
    /// Call `send` every `period`, first after one full period.
    /// A failed send ends the task.
    pub fn spawn<F, Fut>(label: String, period: Duration, mut send: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = send().await {
                            debug!("Keyframe requests for {} stopped: {}", label, e);
                            break;
                        }
                        trace!("Keyframe requested for {}", label);
                    }
                }
            }
        });

        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for KeyframeRequester {
    fn drop(&mut self) {
        self.stop();
        self.handle.abort();
    }
}
