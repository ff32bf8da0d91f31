//! Minimal EBML element encoding
//!
//! Just enough of RFC 8794 to write a Matroska/WebM file front to back:
//! element IDs, variable-length sizes and the handful of value types used
//! by the muxer.

use bytes::{BufMut, BytesMut};

pub mod id {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;
    pub const VOID: u32 = 0xEC;

    pub const SEGMENT: u32 = 0x1853_8067;

    pub const SEEK_HEAD: u32 = 0x114D_9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const SEEK_ID: u32 = 0x53AB;
    pub const SEEK_POSITION: u32 = 0x53AC;

    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const SEGMENT_UID: u32 = 0x73A4;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;
    pub const DURATION: u32 = 0x4489;

    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const CODEC_ID: u32 = 0x86;
    pub const NAME: u32 = 0x536E;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;

    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;

    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
}

/// 8-byte "unknown" size marker
pub const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Largest value a 8-byte size can hold (all-ones is reserved)
pub const MAX_SIZE: u64 = (1 << 56) - 2;

/// Encoded length of an element ID (the marker bits are part of the ID)
pub fn id_len(id: u32) -> usize {
    match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

pub fn put_id(buf: &mut BytesMut, id: u32) {
    let len = id_len(id);
    buf.put_slice(&id.to_be_bytes()[4 - len..]);
}

/// Shortest vint length able to hold `size`
pub fn size_len(size: u64) -> usize {
    (1..=8)
        .find(|&n| size < (1u64 << (7 * n)) - 1)
        .unwrap_or(8)
}

pub fn put_size(buf: &mut BytesMut, size: u64) {
    put_size_with_len(buf, size, size_len(size));
}

/// Size vint of an exact width (used for fields patched in place)
pub fn put_size_with_len(buf: &mut BytesMut, size: u64, len: usize) {
    let marked = size | (1u64 << (7 * len));
    buf.put_slice(&marked.to_be_bytes()[8 - len..]);
}

/// Fixed 8-byte size field, as patched into the Segment header
pub fn size8(size: u64) -> [u8; 8] {
    let mut buf = BytesMut::with_capacity(8);
    put_size_with_len(&mut buf, size.min(MAX_SIZE), 8);
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf);
    out
}

fn header(buf: &mut BytesMut, id: u32, size: u64) {
    put_id(buf, id);
    put_size(buf, size);
}

pub fn put_uint(buf: &mut BytesMut, id: u32, value: u64) {
    let len = ((64 - value.leading_zeros() as usize) + 7) / 8;
    let len = len.max(1);
    header(buf, id, len as u64);
    buf.put_slice(&value.to_be_bytes()[8 - len..]);
}

pub fn put_float(buf: &mut BytesMut, id: u32, value: f64) {
    header(buf, id, 8);
    buf.put_f64(value);
}

pub fn put_string(buf: &mut BytesMut, id: u32, value: &str) {
    put_binary(buf, id, value.as_bytes());
}

pub fn put_binary(buf: &mut BytesMut, id: u32, value: &[u8]) {
    header(buf, id, value.len() as u64);
    buf.put_slice(value);
}

/// Master element with an already-encoded body
pub fn put_master(buf: &mut BytesMut, id: u32, body: &[u8]) {
    put_binary(buf, id, body);
}

/// Header of an element whose body is written separately
pub fn put_header(buf: &mut BytesMut, id: u32, size: u64) {
    header(buf, id, size);
}

/// Void element occupying exactly `total` bytes (0 or at least 2)
pub fn put_void(buf: &mut BytesMut, total: usize) {
    match total {
        0 => {}
        1 => debug_assert!(false, "a Void element needs at least 2 bytes"),
        _ if total - 2 < 127 => {
            header(buf, id::VOID, (total - 2) as u64);
            buf.put_bytes(0, total - 2);
        }
        _ => {
            put_id(buf, id::VOID);
            put_size_with_len(buf, (total - 9) as u64, 8);
            buf.put_bytes(0, total - 9);
        }
    }
}
