use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use rtc_recorder::container::webm::{VideoTrackSpec, WebmMuxer};
use rtc_recorder::recording::reassembler::FrameReassembler;
use std::io::Cursor;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;

/// One second of 30 fps VP8, four packets per frame, with every other pair swapped
fn shuffled_stream() -> Vec<Packet> {
    let mut packets: Vec<Packet> = (0..120u16)
        .map(|seq| {
            let frame = u32::from(seq / 4);
            let mut payload = vec![if seq % 4 == 0 { 0x10 } else { 0x00 }];
            payload.extend(std::iter::repeat(0xAB).take(1100));
            Packet {
                header: Header {
                    version: 2,
                    sequence_number: seq,
                    timestamp: frame * 3000,
                    payload_type: 96,
                    ..Default::default()
                },
                payload: Bytes::from(payload),
            }
        })
        .collect();
    for pair in packets.chunks_mut(2).step_by(2) {
        pair.swap(0, 1);
    }
    packets
}

fn bench_reassembly(c: &mut Criterion) {
    let packets = shuffled_stream();

    c.bench_function("reassemble_1s_vp8", |b| {
        b.iter(|| {
            let mut reassembler = FrameReassembler::new(10, Vp8Packet::default(), 90_000);
            let mut frames = 0;
            for packet in packets.iter().cloned() {
                reassembler.push(packet);
                while reassembler.pop().is_some() {
                    frames += 1;
                }
            }
            frames
        })
    });
}

fn bench_muxing(c: &mut Criterion) {
    let track = VideoTrackSpec {
        codec_id: "V_VP8",
        name: "video".to_string(),
        width: 1280,
        height: 720,
        uid: 1,
    };
    let frame = vec![0xCDu8; 4400];

    c.bench_function("mux_1s_vp8", |b| {
        b.iter(|| {
            let mut muxer = WebmMuxer::new(Cursor::new(Vec::new()), &track, [7; 16]).expect("muxer");
            for n in 0..30u64 {
                muxer.write_frame(n % 30 == 0, n * 33, &frame).expect("frame");
            }
            muxer.finish().expect("finish").into_inner().len()
        })
    });
}

criterion_group!(benches, bench_reassembly, bench_muxing);
criterion_main!(benches);
