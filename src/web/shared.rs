//! Shared state for rtc-recorder
//!
//! Handed to every HTTP handler.

use crate::config::Config;
use crate::webrtc::{InboundTrack, SessionManager, TrackRegistry};
use std::sync::Arc;

/// Shared state for the application
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: Arc<Config>,

    /// Signaling sessions keyed by process id
    pub session_manager: Arc<SessionManager>,

    /// Tracks bound by connected sessions
    pub registry: TrackRegistry<InboundTrack>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("bound_tracks", &self.registry.len())
            .finish()
    }
}

impl AppState {
    /// Build the state around a fresh session manager sharing `registry`
    pub fn new(config: Config, registry: TrackRegistry<InboundTrack>) -> Self {
        let session_manager = Arc::new(SessionManager::new(
            config.webrtc.clone(),
            config.recording.clone(),
            registry.clone(),
        ));

        Self {
            config: Arc::new(config),
            session_manager,
            registry,
        }
    }
}
