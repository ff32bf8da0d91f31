//! Container output
//!
//! This module provides the WebM writer used by recordings:
//! - EBML element encoding
//! - Single-track WebM muxing
//! - Lazily opened, idempotently closed output files

pub mod ebml;
pub mod webm;

use crate::config::VideoCodec;
use log::{debug, info, warn};
use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::PathBuf;
use webm::{VideoTrackSpec, WebmMuxer};

/// Container-related errors
#[derive(Debug)]
pub enum ContainerError {
    /// Filesystem failure while creating or writing the file
    Io(io::Error),
    /// Frame written before the header
    NotOpen,
    /// Header requested twice
    AlreadyOpen,
    /// Writer already finalized
    Closed,
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::Io(e) => write!(f, "Container I/O error: {}", e),
            ContainerError::NotOpen => write!(f, "Container header has not been written"),
            ContainerError::AlreadyOpen => write!(f, "Container header already written"),
            ContainerError::Closed => write!(f, "Container already closed"),
        }
    }
}

impl Error for ContainerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ContainerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ContainerError {
    fn from(e: io::Error) -> Self {
        ContainerError::Io(e)
    }
}

/// Sink for recorded frames.
///
/// The header is written once the frame size is known; `close` finalizes the
/// file and may be called any number of times.
pub trait ContainerWriter: Send {
    fn open(&mut self, width: u16, height: u16) -> Result<(), ContainerError>;

    fn is_open(&self) -> bool;

    fn write_frame(&mut self, keyframe: bool, timestamp_ms: u64, payload: &[u8]) -> Result<(), ContainerError>;

    fn close(&mut self) -> Result<(), ContainerError>;
}

enum WriterState {
    Uninitialized,
    Open {
        muxer: WebmMuxer<BufWriter<File>>,
        width: u16,
        height: u16,
    },
    Closed,
}

/// WebM file created on first `open`
pub struct WebmFileWriter {
    path: PathBuf,
    codec: VideoCodec,
    state: WriterState,
}

impl WebmFileWriter {
    pub fn new(path: impl Into<PathBuf>, codec: VideoCodec) -> Self {
        Self {
            path: path.into(),
            codec,
            state: WriterState::Uninitialized,
        }
    }

    /// Dimensions declared in the header, once open
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        match &self.state {
            WriterState::Open { width, height, .. } => Some((*width, *height)),
            _ => None,
        }
    }

    fn create(&self, width: u16, height: u16) -> io::Result<WebmMuxer<BufWriter<File>>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&self.path)?;
        let track = VideoTrackSpec {
            codec_id: self.codec.container_codec_id(),
            name: "Video".to_string(),
            width,
            height,
            uid: u64::from_le_bytes(uuid_prefix()),
        };
        WebmMuxer::new(BufWriter::new(file), &track, *uuid::Uuid::new_v4().as_bytes())
    }
}

fn uuid_prefix() -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..8]);
    out
}

impl ContainerWriter for WebmFileWriter {
    fn open(&mut self, width: u16, height: u16) -> Result<(), ContainerError> {
        match self.state {
            WriterState::Uninitialized => {}
            WriterState::Open { .. } => return Err(ContainerError::AlreadyOpen),
            WriterState::Closed => return Err(ContainerError::Closed),
        }

        match self.create(width, height) {
            Ok(muxer) => {
                info!("Recording to {} ({}x{}, {})", self.path.display(), width, height, self.codec.as_str());
                self.state = WriterState::Open { muxer, width, height };
                Ok(())
            }
            Err(e) => {
                // Leave nothing half-written behind
                let _ = fs::remove_file(&self.path);
                Err(e.into())
            }
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.state, WriterState::Open { .. })
    }

    fn write_frame(&mut self, keyframe: bool, timestamp_ms: u64, payload: &[u8]) -> Result<(), ContainerError> {
        match &mut self.state {
            WriterState::Open { muxer, .. } => Ok(muxer.write_frame(keyframe, timestamp_ms, payload)?),
            WriterState::Uninitialized => Err(ContainerError::NotOpen),
            WriterState::Closed => Err(ContainerError::Closed),
        }
    }

    fn close(&mut self) -> Result<(), ContainerError> {
        match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Open { muxer, .. } => {
                let frames = muxer.frames();
                muxer.finish()?;
                debug!("Finalized {} with {} frames", self.path.display(), frames);
                Ok(())
            }
            WriterState::Uninitialized => {
                debug!("Closing {} before any header was written", self.path.display());
                Ok(())
            }
            WriterState::Closed => Ok(()),
        }
    }
}

impl Drop for WebmFileWriter {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!("Failed to finalize {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("abc.webm");
        let mut writer = WebmFileWriter::new(&path, VideoCodec::VP8);

        assert!(!writer.is_open());
        writer.open(320, 240).unwrap();
        assert!(writer.is_open());
        assert_eq!(writer.dimensions(), Some((320, 240)));
        writer.write_frame(true, 0, &[0x10, 0x00, 0x00]).unwrap();
        writer.close().unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(&data[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
    }

    #[test]
    fn test_write_before_open_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WebmFileWriter::new(dir.path().join("x.webm"), VideoCodec::VP8);
        assert!(matches!(writer.write_frame(true, 0, &[0]), Err(ContainerError::NotOpen)));
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WebmFileWriter::new(dir.path().join("x.webm"), VideoCodec::VP8);
        writer.open(2, 2).unwrap();
        assert!(matches!(writer.open(2, 2), Err(ContainerError::AlreadyOpen)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WebmFileWriter::new(dir.path().join("x.webm"), VideoCodec::VP8);
        writer.open(2, 2).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(!writer.is_open());
        assert!(matches!(writer.write_frame(false, 1, &[0]), Err(ContainerError::Closed)));
    }

    #[test]
    fn test_close_without_open_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.webm");
        let mut writer = WebmFileWriter::new(&path, VideoCodec::VP8);
        writer.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_open_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.webm");
        fs::write(&path, vec![0xFFu8; 4096]).unwrap();

        let mut writer = WebmFileWriter::new(&path, VideoCodec::VP8);
        writer.open(2, 2).unwrap();
        writer.close().unwrap();

        let data = fs::read(&path).unwrap();
        assert!(data.len() < 4096);
        assert_eq!(data[0], 0x1A);
    }

    #[test]
    fn test_unwritable_path_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let mut writer = WebmFileWriter::new(blocker.join("out.webm"), VideoCodec::VP8);
        assert!(matches!(writer.open(2, 2), Err(ContainerError::Io(_))));
        assert!(!writer.is_open());
    }
}
