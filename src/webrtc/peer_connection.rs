//! WebRTC PeerConnection management
//!
//! Handles the creation of receive-only RTCPeerConnection instances and the
//! non-trickle offer/answer exchange.

use super::WebRTCError;
use crate::config::{IceServerConfig, VideoCodec, WebRTCConfig};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};

/// PeerConnection factory for ingest sessions
pub struct PeerConnectionManager {
    config: WebRTCConfig,
}

impl PeerConnectionManager {
    /// Create a new PeerConnection manager
    pub fn new(config: WebRTCConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebRTCConfig {
        &self.config
    }

    /// Create a new PeerConnection with the configured settings
    pub async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, WebRTCError> {
        // Only the recordable codec is offered back to the browser
        let mut media_engine = MediaEngine::default();
        self.register_video_codec(&mut media_engine)?;

        // Interceptors provide NACK and receiver reports
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: build_ice_servers(&self.config.ice_servers),
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(peer_connection))
    }

    /// Register the configured video codec in the media engine
    fn register_video_codec(&self, media_engine: &mut MediaEngine) -> Result<(), WebRTCError> {
        media_engine.register_codec(
            codec_parameters(self.config.video_codec, self.config.video_payload_type),
            RTPCodecType::Video,
        ).map_err(|e| WebRTCError::ConnectionFailed(format!(
            "Failed to register {}: {}",
            self.config.video_codec.as_str(),
            e
        )))
    }

    /// Apply a remote offer and return the complete local answer.
    ///
    /// Waits for candidate gathering to finish so the answer carries every
    /// local candidate, bounded by `timeout`.
    pub async fn answer_offer(
        peer_connection: &Arc<RTCPeerConnection>,
        offer: RTCSessionDescription,
        timeout: Duration,
    ) -> Result<RTCSessionDescription, WebRTCError> {
        peer_connection.set_remote_description(offer).await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set remote description: {}", e)))?;

        let answer = peer_connection.create_answer(None).await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = peer_connection.gathering_complete_promise().await;

        peer_connection.set_local_description(answer).await
            .map_err(|e| WebRTCError::SdpError(format!("Failed to set local description: {}", e)))?;

        tokio::time::timeout(timeout, gather_complete.recv())
            .await
            .map_err(|_| WebRTCError::GatheringTimeout)?;
        debug!("ICE gathering complete");

        peer_connection.local_description().await
            .ok_or_else(|| WebRTCError::SdpError("Local description missing after gathering".to_string()))
    }

    /// Ask the publisher for a fresh keyframe on `media_ssrc`
    pub async fn request_keyframe(
        peer_connection: &Arc<RTCPeerConnection>,
        media_ssrc: u32,
    ) -> Result<(), WebRTCError> {
        peer_connection
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await
            .map_err(|e| WebRTCError::MediaError(format!("Failed to send PLI: {}", e)))?;
        Ok(())
    }

    /// Close a peer connection
    pub async fn close(peer_connection: &Arc<RTCPeerConnection>) -> Result<(), WebRTCError> {
        peer_connection.close().await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to close connection: {}", e)))?;
        Ok(())
    }
}

fn codec_parameters(codec: VideoCodec, payload_type: u8) -> RTCRtpCodecParameters {
    let mime_type = match codec {
        VideoCodec::VP8 => MIME_TYPE_VP8,
    };

    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: mime_type.to_string(),
            clock_rate: codec.clock_rate(),
            channels: 0,
            sdp_fmtp_line: "".to_string(),
            rtcp_feedback: vec![],
        },
        payload_type,
        ..Default::default()
    }
}

fn build_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_parameters_use_configured_payload_type() {
        let params = codec_parameters(VideoCodec::VP8, 100);
        assert_eq!(params.payload_type, 100);
        assert_eq!(params.capability.mime_type, "video/VP8");
        assert_eq!(params.capability.clock_rate, 90000);
    }

    #[test]
    fn test_ice_servers_from_config() {
        let servers = build_ice_servers(&[IceServerConfig {
            urls: vec!["turn:turn.example.org:3478".to_string()],
            username: Some("user".to_string()),
            credential: None,
        }]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].username, "user");
        assert_eq!(servers[0].credential, "");
    }

    #[tokio::test]
    async fn test_create_peer_connection() {
        let manager = PeerConnectionManager::new(WebRTCConfig::default());
        let pc = manager.create_peer_connection().await.unwrap();
        PeerConnectionManager::close(&pc).await.unwrap();
    }
}
