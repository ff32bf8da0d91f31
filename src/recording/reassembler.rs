//! RTP frame reassembly
//!
//! Buffers RTP packets for a single track, reorders them by extended
//! sequence number and emits complete media samples. A sample is complete
//! when a contiguous run of packets sharing one RTP timestamp starts with a
//! partition head and the first packet of the following timestamp has
//! arrived (its timestamp also gives the sample duration).
//!
//! Packets never wait longer than the reorder window behind a hole: once the
//! buffer holds packets `window` sequence numbers past a hole, the incomplete
//! head is given up and counted as dropped. The first sample is held back
//! until the buffer spans the window, so packets overtaken at the start of
//! the stream are not mistaken for late ones.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::time::Duration;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Depacketizer;

/// Extended sequence numbers start here so wraparound below the first
/// packet never underflows.
const SEQ_ORIGIN: u64 = 1 << 32;

/// A reassembled media sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Depacketized codec payload
    pub data: Bytes,
    /// Time until the next sample, from the RTP clock
    pub duration: Duration,
    /// RTP timestamp shared by the sample's packets
    pub rtp_timestamp: u32,
}

/// Reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblerStats {
    pub samples_emitted: u64,
    pub packets_dropped: u64,
}

enum Scan {
    /// Run `[start, end)` is a whole sample; `end` holds the next timestamp
    Complete { end: u64 },
    /// Contiguous up to the newest packet, the sample may still grow
    Waiting,
    /// Sequence number `at` is missing inside or right after the run
    Gap { at: u64 },
    /// Head packet does not start a partition
    NotHead,
}

/// Reorders RTP packets and assembles them into samples
pub struct FrameReassembler<D: Depacketizer> {
    depacketizer: D,
    clock_rate: u32,
    window: u64,
    buffer: BTreeMap<u64, Packet>,
    /// Highest extended sequence number seen so far
    highest: Option<u64>,
    /// First sequence number not yet emitted or dropped
    next: Option<u64>,
    /// No more packets will be pushed
    ended: bool,
    stats: ReassemblerStats,
}

impl<D: Depacketizer> FrameReassembler<D> {
    /// Create a reassembler.
    ///
    /// * `window` - sequence numbers tolerated past a hole before the head is dropped
    /// * `clock_rate` - RTP clock of the codec (90 kHz for video)
    pub fn new(window: u16, depacketizer: D, clock_rate: u32) -> Self {
        Self {
            depacketizer,
            clock_rate: clock_rate.max(1),
            window: u64::from(window.max(1)),
            buffer: BTreeMap::new(),
            highest: None,
            next: None,
            ended: false,
            stats: ReassemblerStats::default(),
        }
    }

    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }

    /// Buffer a packet. Late and duplicate packets are discarded.
    pub fn push(&mut self, packet: Packet) {
        let seq = self.extend_sequence(packet.header.sequence_number);

        if let Some(next) = self.next {
            if seq < next {
                self.stats.packets_dropped += 1;
                return;
            }
        }

        self.buffer.insert(seq, packet);
    }

    /// Mark the stream finished. Holes can no longer fill, so later pops
    /// skip them at once instead of waiting for the window.
    pub fn end_of_stream(&mut self) {
        self.ended = true;
    }

    /// Pop the next complete sample, if any.
    ///
    /// Call repeatedly after every `push` until it returns `None`.
    pub fn pop(&mut self) -> Option<Sample> {
        loop {
            let first = *self.buffer.keys().next()?;
            let last = *self.buffer.keys().next_back()?;

            let start = match self.next {
                Some(next) => next,
                None => {
                    // Packets before `first` may still be in flight
                    if !self.ended && last - first < self.window {
                        return None;
                    }
                    self.next = Some(first);
                    first
                }
            };

            let hole = if first != start {
                start
            } else {
                // Padding carries no media and never starts a sample
                if self.buffer[&first].payload.is_empty() {
                    self.buffer.remove(&first);
                    self.next = Some(first + 1);
                    continue;
                }

                match self.scan(first) {
                    Scan::Complete { end } => {
                        if let Some(sample) = self.emit(first, end) {
                            return Some(sample);
                        }
                        continue;
                    }
                    Scan::Waiting => return None,
                    Scan::NotHead => {
                        self.drop_head_run(first);
                        continue;
                    }
                    Scan::Gap { at } => at,
                }
            };

            if !self.ended && last - hole < self.window {
                return None;
            }

            if first != start {
                // Everything between `start` and `first` is lost
                self.count_dropped(first - start);
                self.next = Some(first);
            } else {
                self.drop_head_run(first);
            }
        }
    }

    fn extend_sequence(&mut self, seq: u16) -> u64 {
        match self.highest {
            None => {
                let extended = SEQ_ORIGIN + u64::from(seq);
                self.highest = Some(extended);
                extended
            }
            Some(highest) => {
                let delta = seq.wrapping_sub(highest as u16) as i16;
                let extended = (highest as i64 + i64::from(delta)) as u64;
                if extended > highest {
                    self.highest = Some(extended);
                }
                extended
            }
        }
    }

    fn scan(&self, start: u64) -> Scan {
        let head = &self.buffer[&start];
        if !self.depacketizer.is_partition_head(&head.payload) {
            return Scan::NotHead;
        }

        let timestamp = head.header.timestamp;
        let last = self.buffer.keys().next_back().copied().unwrap_or(start);
        let mut seq = start + 1;
        loop {
            match self.buffer.get(&seq) {
                None if seq > last => return Scan::Waiting,
                None => return Scan::Gap { at: seq },
                Some(packet) if packet.header.timestamp != timestamp => {
                    return Scan::Complete { end: seq };
                }
                Some(_) => seq += 1,
            }
        }
    }

    fn emit(&mut self, start: u64, end: u64) -> Option<Sample> {
        let next_timestamp = self.buffer.get(&end)?.header.timestamp;
        let mut data = BytesMut::new();
        let mut timestamp = 0;
        let mut corrupt = false;

        for seq in start..end {
            let Some(packet) = self.buffer.remove(&seq) else {
                continue;
            };
            timestamp = packet.header.timestamp;
            if packet.payload.is_empty() {
                continue;
            }
            match self.depacketizer.depacketize(&packet.payload) {
                Ok(payload) => data.extend_from_slice(&payload),
                Err(_) => corrupt = true,
            }
        }
        self.next = Some(end);

        if corrupt || data.is_empty() {
            self.count_dropped(end - start);
            return None;
        }

        self.stats.samples_emitted += 1;
        Some(Sample {
            data: data.freeze(),
            duration: rtp_delta(timestamp, next_timestamp, self.clock_rate),
            rtp_timestamp: timestamp,
        })
    }

    fn drop_head_run(&mut self, first: u64) {
        let Some(head) = self.buffer.remove(&first) else {
            return;
        };
        let timestamp = head.header.timestamp;
        let mut seq = first + 1;
        while self
            .buffer
            .get(&seq)
            .is_some_and(|packet| packet.header.timestamp == timestamp)
        {
            self.buffer.remove(&seq);
            seq += 1;
        }
        self.count_dropped(seq - first);
        self.next = Some(seq);
    }

    fn count_dropped(&mut self, packets: u64) {
        self.stats.packets_dropped += packets;
    }
}

/// Duration between two RTP timestamps; a backwards step counts as zero
fn rtp_delta(from: u32, to: u32, clock_rate: u32) -> Duration {
    let ticks = to.wrapping_sub(from);
    if ticks > i32::MAX as u32 {
        return Duration::ZERO;
    }
    Duration::from_nanos(u64::from(ticks) * 1_000_000_000 / u64::from(clock_rate))
}
