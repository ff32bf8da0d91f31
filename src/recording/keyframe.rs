//! Keyframe detection and frame-size extraction
//!
//! Only the frame header is looked at; the bitstream is never decoded.

use crate::config::VideoCodec;

/// Offset of the 4-byte size field inside a VP8 keyframe
/// (3-byte frame tag followed by the 3-byte start code).
const VP8_SIZE_OFFSET: usize = 6;

/// Mask of the 14-bit width/height values (upper 2 bits are scaling)
const VP8_DIMENSION_MASK: u32 = 0x3FFF;

/// Pixel dimensions carried by a keyframe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDimensions {
    pub width: u16,
    pub height: u16,
}

/// Result of inspecting one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub is_keyframe: bool,
    /// Present for keyframes only
    pub dimensions: Option<FrameDimensions>,
}

impl FrameInfo {
    const DELTA: FrameInfo = FrameInfo {
        is_keyframe: false,
        dimensions: None,
    };
}

/// Inspect a reassembled sample.
///
/// Payloads too short to carry a size field are reported as delta frames.
pub fn inspect(codec: VideoCodec, payload: &[u8]) -> FrameInfo {
    match codec {
        VideoCodec::VP8 => inspect_vp8(payload),
    }
}

fn inspect_vp8(payload: &[u8]) -> FrameInfo {
    let Some(&tag) = payload.first() else {
        return FrameInfo::DELTA;
    };

    // P bit of the frame tag: 0 = key frame
    if tag & 0x01 != 0 {
        return FrameInfo::DELTA;
    }

    let Some(field) = payload.get(VP8_SIZE_OFFSET..VP8_SIZE_OFFSET + 4) else {
        return FrameInfo::DELTA;
    };

    let raw = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
    FrameInfo {
        is_keyframe: true,
        dimensions: Some(decode_dimensions(raw)),
    }
}

/// Split the little-endian size word into width (high half) and height (low half)
pub fn decode_dimensions(raw: u32) -> FrameDimensions {
    FrameDimensions {
        width: ((raw >> 16) & VP8_DIMENSION_MASK) as u16,
        height: (raw & VP8_DIMENSION_MASK) as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyframe_with_size(size: [u8; 4]) -> Vec<u8> {
        let mut data = vec![0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a];
        data.extend_from_slice(&size);
        data.extend_from_slice(&[0xAA; 8]);
        data
    }

    #[test]
    fn test_decode_dimensions_matches_bit_layout() {
        let fields: [[u8; 4]; 5] = [
            [0x00, 0x00, 0x01, 0x00],
            [0x80, 0x02, 0xe0, 0x01],
            [0xff, 0xff, 0xff, 0xff],
            [0x38, 0x04, 0x80, 0x07],
            [0x01, 0xc0, 0x02, 0x40],
        ];
        for b in fields {
            let raw = b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16 | (b[3] as u32) << 24;
            let dims = decode_dimensions(raw);
            assert_eq!(dims.width as u32, (raw >> 16) & 0x3FFF);
            assert_eq!(dims.height as u32, raw & 0x3FFF);
        }
    }

    #[test]
    fn test_keyframe_dimensions() {
        // 1920 = 0x0780, 1080 = 0x0438
        let info = inspect(VideoCodec::VP8, &keyframe_with_size([0x38, 0x04, 0x80, 0x07]));
        assert!(info.is_keyframe);
        assert_eq!(info.dimensions, Some(FrameDimensions { width: 1920, height: 1080 }));
    }

    #[test]
    fn test_scaling_bits_are_masked() {
        let info = inspect(VideoCodec::VP8, &keyframe_with_size([0x80, 0xc2, 0xe0, 0x41]));
        assert_eq!(info.dimensions, Some(FrameDimensions { width: 480, height: 640 }));
    }

    #[test]
    fn test_width_one_height_zero() {
        let info = inspect(VideoCodec::VP8, &keyframe_with_size([0x00, 0x00, 0x01, 0x00]));
        assert_eq!(info.dimensions, Some(FrameDimensions { width: 1, height: 0 }));
    }

    #[test]
    fn test_interframe_has_no_dimensions() {
        let mut data = keyframe_with_size([0x38, 0x04, 0x80, 0x07]);
        data[0] |= 0x01;
        assert_eq!(inspect(VideoCodec::VP8, &data), FrameInfo::DELTA);
    }

    #[test]
    fn test_short_payloads_never_panic() {
        for len in 0..10 {
            let data = vec![0u8; len];
            assert!(!inspect(VideoCodec::VP8, &data).is_keyframe, "len {}", len);
        }
        assert!(inspect(VideoCodec::VP8, &[0u8; 10]).is_keyframe);
    }
}
