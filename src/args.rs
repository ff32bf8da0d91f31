use clap::Parser;
use std::path::PathBuf;

use rtc_recorder::config;

#[derive(Parser, Debug)]
#[command(name = "rtc-recorder")]
#[command(version)]
#[command(about = "Records browser WebRTC video sessions to WebM", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "recorder.toml")]
    pub config: PathBuf,

    /// HTTP bind address
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP port for signaling
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory receiving recordings
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum recording length in seconds
    #[arg(long)]
    pub max_duration: Option<u64>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the file configuration
    pub fn apply(&self, config: &mut config::Config) {
        if let Some(ref host) = self.host {
            config.http.host = host.clone();
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(ref dir) = self.output_dir {
            config.recording.output_dir = dir.clone();
        }
        if let Some(secs) = self.max_duration {
            config.recording.max_duration_secs = secs;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_file_values() {
        let args = Args::parse_from([
            "rtc-recorder",
            "--port",
            "9000",
            "--output-dir",
            "/tmp/rec",
            "--max-duration",
            "30",
            "-v",
        ]);
        let mut cfg = config::Config::default();
        args.apply(&mut cfg);

        assert_eq!(cfg.http.port, 9000);
        assert_eq!(cfg.http.host, "0.0.0.0");
        assert_eq!(cfg.recording.output_dir, PathBuf::from("/tmp/rec"));
        assert_eq!(cfg.recording.max_duration_secs, 30);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn test_missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::parse_from([
            "rtc-recorder",
            "--config",
            dir.path().join("absent.toml").to_str().unwrap(),
        ]);
        let cfg = args.load_config().unwrap();
        assert_eq!(cfg.http.port, 8080);
    }
}
