//! WebM muxer for a single video track
//!
//! Writes the file front to back and patches the few forward references
//! (segment size, duration, seek head) on `finish`. Clusters are buffered in
//! memory so every cluster carries a known size, and keyframe clusters are
//! indexed in Cues to keep the output seekable.

use super::ebml::{self, id};
use bytes::{BufMut, BytesMut};
use std::io::{self, Seek, SeekFrom, Write};

/// Bytes reserved after the Segment header for the seek head
const SEEK_HEAD_RESERVED: usize = 128;

/// Start a new cluster on a keyframe once the current one is this long
const CLUSTER_TARGET_MS: u64 = 1000;

const TRACK_NUMBER: u64 = 1;
const TRACK_TYPE_VIDEO: u64 = 1;
const TIMECODE_SCALE_NS: u64 = 1_000_000;
const APP_NAME: &str = concat!("rtc-recorder ", env!("CARGO_PKG_VERSION"));

/// Description of the single video track
#[derive(Debug, Clone)]
pub struct VideoTrackSpec {
    pub codec_id: &'static str,
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub uid: u64,
}

struct OpenCluster {
    timecode: u64,
    starts_with_keyframe: bool,
    blocks: BytesMut,
}

/// Streaming WebM writer
pub struct WebmMuxer<W: Write + Seek> {
    writer: W,
    segment_size_pos: u64,
    segment_data_start: u64,
    seek_head_pos: u64,
    duration_pos: u64,
    info_pos: u64,
    tracks_pos: u64,
    cluster: Option<OpenCluster>,
    /// (cue time, cluster position relative to the segment data)
    cues: Vec<(u64, u64)>,
    max_timestamp: u64,
    frames: u64,
}

impl<W: Write + Seek> WebmMuxer<W> {
    /// Write the EBML header, segment header, Info and Tracks.
    pub fn new(mut writer: W, track: &VideoTrackSpec, segment_uid: [u8; 16]) -> io::Result<Self> {
        let file_start = writer.stream_position()?;
        let mut buf = BytesMut::with_capacity(512);

        let mut ebml_header = BytesMut::new();
        ebml::put_uint(&mut ebml_header, id::EBML_VERSION, 1);
        ebml::put_uint(&mut ebml_header, id::EBML_READ_VERSION, 1);
        ebml::put_uint(&mut ebml_header, id::EBML_MAX_ID_LENGTH, 4);
        ebml::put_uint(&mut ebml_header, id::EBML_MAX_SIZE_LENGTH, 8);
        ebml::put_string(&mut ebml_header, id::DOC_TYPE, "webm");
        ebml::put_uint(&mut ebml_header, id::DOC_TYPE_VERSION, 4);
        ebml::put_uint(&mut ebml_header, id::DOC_TYPE_READ_VERSION, 2);
        ebml::put_master(&mut buf, id::EBML, &ebml_header);

        ebml::put_id(&mut buf, id::SEGMENT);
        let segment_size_pos = file_start + buf.len() as u64;
        buf.put_slice(&ebml::UNKNOWN_SIZE);
        let segment_data_start = file_start + buf.len() as u64;

        let seek_head_pos = segment_data_start;
        ebml::put_void(&mut buf, SEEK_HEAD_RESERVED);

        let info_pos = file_start + buf.len() as u64 - segment_data_start;
        let mut info = BytesMut::new();
        ebml::put_uint(&mut info, id::TIMECODE_SCALE, TIMECODE_SCALE_NS);
        ebml::put_binary(&mut info, id::SEGMENT_UID, &segment_uid);
        ebml::put_string(&mut info, id::MUXING_APP, APP_NAME);
        ebml::put_string(&mut info, id::WRITING_APP, APP_NAME);
        ebml::put_float(&mut info, id::DURATION, 0.0);
        ebml::put_master(&mut buf, id::INFO, &info);
        // Duration is the last element of Info; its 8-byte payload ends the buffer
        let duration_pos = file_start + buf.len() as u64 - 8;

        let tracks_pos = file_start + buf.len() as u64 - segment_data_start;
        let mut video = BytesMut::new();
        ebml::put_uint(&mut video, id::PIXEL_WIDTH, u64::from(track.width));
        ebml::put_uint(&mut video, id::PIXEL_HEIGHT, u64::from(track.height));
        let mut entry = BytesMut::new();
        ebml::put_uint(&mut entry, id::TRACK_NUMBER, TRACK_NUMBER);
        ebml::put_uint(&mut entry, id::TRACK_UID, track.uid.max(1));
        ebml::put_uint(&mut entry, id::TRACK_TYPE, TRACK_TYPE_VIDEO);
        ebml::put_uint(&mut entry, id::FLAG_LACING, 0);
        ebml::put_string(&mut entry, id::CODEC_ID, track.codec_id);
        ebml::put_string(&mut entry, id::NAME, &track.name);
        ebml::put_master(&mut entry, id::VIDEO, &video);
        let mut tracks = BytesMut::new();
        ebml::put_master(&mut tracks, id::TRACK_ENTRY, &entry);
        ebml::put_master(&mut buf, id::TRACKS, &tracks);

        writer.write_all(&buf)?;
        writer.flush()?;

        Ok(Self {
            writer,
            segment_size_pos,
            segment_data_start,
            seek_head_pos,
            duration_pos,
            info_pos,
            tracks_pos,
            cluster: None,
            cues: Vec::new(),
            max_timestamp: 0,
            frames: 0,
        })
    }

    /// Number of frames appended so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Append one frame as a SimpleBlock
    pub fn write_frame(&mut self, keyframe: bool, timestamp_ms: u64, payload: &[u8]) -> io::Result<()> {
        let needs_new_cluster = match &self.cluster {
            None => true,
            Some(cluster) => {
                let relative = timestamp_ms as i64 - cluster.timecode as i64;
                relative < i64::from(i16::MIN)
                    || relative > i64::from(i16::MAX)
                    || (keyframe && relative >= CLUSTER_TARGET_MS as i64)
            }
        };

        if needs_new_cluster {
            self.flush_cluster()?;
            self.cluster = Some(OpenCluster {
                timecode: timestamp_ms,
                starts_with_keyframe: keyframe,
                blocks: BytesMut::new(),
            });
        }

        if let Some(cluster) = self.cluster.as_mut() {
            let relative = (timestamp_ms as i64 - cluster.timecode as i64) as i16;
            ebml::put_header(&mut cluster.blocks, id::SIMPLE_BLOCK, 4 + payload.len() as u64);
            // track number as a 1-byte vint
            cluster.blocks.put_u8(0x80 | TRACK_NUMBER as u8);
            cluster.blocks.put_i16(relative);
            cluster.blocks.put_u8(if keyframe { 0x80 } else { 0x00 });
            cluster.blocks.put_slice(payload);
        }

        self.max_timestamp = self.max_timestamp.max(timestamp_ms);
        self.frames += 1;
        Ok(())
    }

    fn flush_cluster(&mut self) -> io::Result<()> {
        let Some(cluster) = self.cluster.take() else {
            return Ok(());
        };

        let position = self.writer.stream_position()? - self.segment_data_start;
        if cluster.starts_with_keyframe {
            self.cues.push((cluster.timecode, position));
        }

        let mut timecode = BytesMut::new();
        ebml::put_uint(&mut timecode, id::TIMECODE, cluster.timecode);

        let mut head = BytesMut::new();
        ebml::put_header(&mut head, id::CLUSTER, (timecode.len() + cluster.blocks.len()) as u64);
        self.writer.write_all(&head)?;
        self.writer.write_all(&timecode)?;
        self.writer.write_all(&cluster.blocks)?;
        Ok(())
    }

    /// Flush the last cluster, write Cues and patch the forward references.
    /// Returns the underlying writer positioned at the end of the file.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_cluster()?;

        let mut cues_pos = None;
        if !self.cues.is_empty() {
            cues_pos = Some(self.writer.stream_position()? - self.segment_data_start);
            let mut cues = BytesMut::new();
            for (time, position) in &self.cues {
                let mut positions = BytesMut::new();
                ebml::put_uint(&mut positions, id::CUE_TRACK, TRACK_NUMBER);
                ebml::put_uint(&mut positions, id::CUE_CLUSTER_POSITION, *position);
                let mut point = BytesMut::new();
                ebml::put_uint(&mut point, id::CUE_TIME, *time);
                ebml::put_master(&mut point, id::CUE_TRACK_POSITIONS, &positions);
                ebml::put_master(&mut cues, id::CUE_POINT, &point);
            }
            let mut element = BytesMut::new();
            ebml::put_master(&mut element, id::CUES, &cues);
            self.writer.write_all(&element)?;
        }

        let end = self.writer.stream_position()?;

        self.writer.seek(SeekFrom::Start(self.segment_size_pos))?;
        self.writer.write_all(&ebml::size8(end - self.segment_data_start))?;

        self.writer.seek(SeekFrom::Start(self.duration_pos))?;
        self.writer.write_all(&(self.max_timestamp as f64).to_be_bytes())?;

        let mut seeks = vec![(id::INFO, self.info_pos), (id::TRACKS, self.tracks_pos)];
        if let Some(pos) = cues_pos {
            seeks.push((id::CUES, pos));
        }
        let seek_head = build_seek_head(&seeks);
        self.writer.seek(SeekFrom::Start(self.seek_head_pos))?;
        self.writer.write_all(&seek_head)?;

        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// SeekHead padded with a Void to exactly `SEEK_HEAD_RESERVED` bytes
fn build_seek_head(entries: &[(u32, u64)]) -> BytesMut {
    let mut body = BytesMut::new();
    for (element, position) in entries {
        let mut seek = BytesMut::new();
        let element_len = ebml::id_len(*element);
        ebml::put_binary(&mut seek, id::SEEK_ID, &element.to_be_bytes()[4 - element_len..]);
        ebml::put_uint(&mut seek, id::SEEK_POSITION, *position);
        ebml::put_master(&mut body, id::SEEK, &seek);
    }

    let mut out = BytesMut::with_capacity(SEEK_HEAD_RESERVED);
    ebml::put_master(&mut out, id::SEEK_HEAD, &body);
    let pad = SEEK_HEAD_RESERVED - out.len();
    ebml::put_void(&mut out, pad);
    out
}
