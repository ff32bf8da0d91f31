//! Configuration management for rtc-recorder

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Video codecs the recorder can mux
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    VP8,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "vp8",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "video/VP8",
        }
    }

    /// Matroska codec ID written into the track entry
    pub fn container_codec_id(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "V_VP8",
        }
    }

    pub fn clock_rate(&self) -> u32 {
        90_000
    }

    /// Resolve a negotiated mime type (case-insensitive)
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        if mime.eq_ignore_ascii_case("video/VP8") {
            Some(VideoCodec::VP8)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP signaling endpoint
    pub http: HttpConfig,

    /// WebRTC negotiation
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// Recording policy
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP bind address
    pub host: String,

    /// HTTP port for the signaling endpoint
    pub port: u16,
}

/// ICE server entry (STUN/TURN)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// WebRTC negotiation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// ICE servers handed to every peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    /// Upper bound on waiting for local candidate gathering
    #[serde(default = "default_gather_timeout_secs")]
    pub gather_timeout_secs: u64,

    /// Interval between PLI keyframe requests while connected
    #[serde(default = "default_keyframe_interval_secs")]
    pub keyframe_interval_secs: u64,

    /// Video codec accepted from the browser
    #[serde(default)]
    pub video_codec: VideoCodec,

    /// RTP payload type registered for the video codec
    #[serde(default = "default_video_payload_type")]
    pub video_payload_type: u8,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            gather_timeout_secs: default_gather_timeout_secs(),
            keyframe_interval_secs: default_keyframe_interval_secs(),
            video_codec: VideoCodec::VP8,
            video_payload_type: default_video_payload_type(),
        }
    }
}

impl WebRTCConfig {
    pub fn gather_timeout(&self) -> Duration {
        Duration::from_secs(self.gather_timeout_secs)
    }

    pub fn keyframe_interval(&self) -> Duration {
        Duration::from_secs(self.keyframe_interval_secs)
    }
}

/// Recording policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory receiving `<process_id>.webm` files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Hard cap on a single recording
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// Reorder window of the frame reassembler, in packets
    #[serde(default = "default_reorder_window")]
    pub reorder_window: u16,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_duration_secs: default_max_duration_secs(),
            reorder_window: default_reorder_window(),
        }
    }
}

impl RecordingConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Output path for a session. Path separators in the id are replaced so a
    /// client-supplied id can never escape `output_dir`.
    pub fn output_path(&self, process_id: &str) -> PathBuf {
        let name: String = process_id
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                c => c,
            })
            .collect();
        let name = if name.is_empty() || name == "." || name == ".." {
            format!("_{}", name)
        } else {
            name
        };
        self.output_dir.join(format!("{}.webm", name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            webrtc: WebRTCConfig::default(),
            recording: RecordingConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.http.port == 0 {
            return Err("HTTP port must be non-zero".into());
        }

        if self.webrtc.gather_timeout_secs == 0 {
            return Err("WebRTC gather timeout must be non-zero".into());
        }

        if self.webrtc.keyframe_interval_secs == 0 {
            return Err("WebRTC keyframe interval must be non-zero".into());
        }

        if !(96..=127).contains(&self.webrtc.video_payload_type) {
            return Err("WebRTC video payload type must be in the dynamic range 96-127".into());
        }

        for server in &self.webrtc.ice_servers {
            if server.urls.is_empty() {
                return Err("ICE server entries need at least one URL".into());
            }
        }

        if self.recording.max_duration_secs == 0 {
            return Err("Recording max duration must be non-zero".into());
        }

        if self.recording.reorder_window == 0 {
            return Err("Recording reorder window must be non-zero".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.recording.max_duration(), Duration::from_secs(10));
        assert_eq!(cfg.webrtc.keyframe_interval(), Duration::from_secs(3));
        assert_eq!(cfg.recording.reorder_window, 10);
    }

    #[test]
    fn validate_rejects_zero_duration() {
        let mut cfg = Config::default();
        cfg.recording.max_duration_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_static_payload_type() {
        let mut cfg = Config::default();
        cfg.webrtc.video_payload_type = 8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_section_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [http]
            host = "127.0.0.1"
            port = 9000

            [recording]
            max_duration_secs = 30

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.http.port, 9000);
        assert_eq!(cfg.recording.max_duration_secs, 30);
        assert_eq!(cfg.recording.reorder_window, 10);
        assert_eq!(cfg.webrtc.ice_servers, default_ice_servers());
    }

    #[test]
    fn output_path_stays_inside_output_dir() {
        let cfg = RecordingConfig {
            output_dir: PathBuf::from("/tmp/rec"),
            ..RecordingConfig::default()
        };
        assert_eq!(cfg.output_path("abc"), PathBuf::from("/tmp/rec/abc.webm"));
        assert_eq!(cfg.output_path("../x"), PathBuf::from("/tmp/rec/.._x.webm"));
        assert_eq!(cfg.output_path(".."), PathBuf::from("/tmp/rec/_...webm"));
    }

    #[test]
    fn codec_from_mime_is_case_insensitive() {
        assert_eq!(VideoCodec::from_mime_type("video/vp8"), Some(VideoCodec::VP8));
        assert_eq!(VideoCodec::from_mime_type("video/H264"), None);
    }
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}

fn default_gather_timeout_secs() -> u64 {
    10
}

fn default_keyframe_interval_secs() -> u64 {
    3
}

fn default_video_payload_type() -> u8 {
    96
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_duration_secs() -> u64 {
    10
}

fn default_reorder_window() -> u16 {
    10
}
