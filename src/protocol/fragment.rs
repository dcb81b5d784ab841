use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::warn;

use super::frame::{Frame, FrameCodec, FRAME_HEADER_LEN};

/// Smallest MTU the packetizer supports (header plus a useful payload slice)
pub const MIN_MTU: usize = 16;

/// Upper bound on buffered reassembly state; protects against unterminated
/// fragment chains and runaway input. Sized for a 64 KiB logical packet
/// fragmented at the smallest MTU, headers included.
const MAX_REASSEMBLY_BYTES: usize = 128 * 1024;

/// Splits a logical packet into MTU-sized frames
///
/// Fragment 0 carries the head of the packet payload (the class-specific
/// packet header bytes land there naturally); `fragment_seq` counts up and
/// wraps, and only the final frame clears `more_fragments`.
pub fn fragment_packet(packet_class: u8, payload: &[u8], mtu: usize) -> Vec<Frame> {
    let mtu = mtu.max(MIN_MTU);
    let chunk = mtu - FRAME_HEADER_LEN;

    if payload.len() <= chunk {
        return vec![Frame {
            packet_class,
            fragment_seq: 0,
            more_fragments: false,
            payload: payload.to_vec(),
        }];
    }

    let mut frames = Vec::with_capacity(payload.len() / chunk + 1);
    let mut seq: u8 = 0;
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + chunk).min(payload.len());
        frames.push(Frame {
            packet_class,
            fragment_seq: seq,
            more_fragments: end < payload.len(),
            payload: payload[offset..end].to_vec(),
        });
        seq = seq.wrapping_add(1);
        offset = end;
    }
    frames
}

/// In-progress fragment chain
struct Chain {
    packet_class: u8,
    next_seq: u8,
    payload: Vec<u8>,
}

/// Reassembles a byte stream from one transport into logical packets
///
/// Feeds arbitrary byte chunks through the frame codec and concatenates
/// fragment chains. Chains that skip a sequence number or change class are
/// discarded; a fragment with sequence 0 always opens a fresh chain, so a
/// receiver that missed the tail of a previous packet resynchronizes on the
/// next packet boundary.
pub struct Reassembler {
    buf: BytesMut,
    codec: FrameCodec,
    chain: Option<Chain>,
    complete: VecDeque<Frame>,
}

impl Reassembler {
    /// Creates an empty reassembler
    pub fn new() -> Self {
        Reassembler {
            buf: BytesMut::new(),
            codec: FrameCodec::new(),
            chain: None,
            complete: VecDeque::new(),
        }
    }

    /// Appends received bytes and scans for complete frames
    pub fn process_received(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_REASSEMBLY_BYTES {
            warn!(
                buffered = self.buf.len(),
                "reassembly buffer overflow, dropping stream state"
            );
            self.buf.clear();
            self.chain = None;
            return;
        }

        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(frame)) => self.accept(frame),
                Ok(None) => break,
                Err(err) => {
                    // The codec only scans forward, so this is unreachable in
                    // practice; drop the buffer if it ever happens.
                    warn!(%err, "frame decode failed, resetting stream");
                    self.buf.clear();
                    break;
                }
            }
        }
    }

    /// Folds one frame into the current chain, queueing completed packets
    fn accept(&mut self, frame: Frame) {
        let fits_chain = self
            .chain
            .as_ref()
            .map(|c| c.packet_class == frame.packet_class && c.next_seq == frame.fragment_seq)
            .unwrap_or(false);

        if !fits_chain {
            if self.chain.take().is_some() {
                warn!(
                    packet_class = frame.packet_class,
                    fragment_seq = frame.fragment_seq,
                    "discarding broken fragment chain"
                );
            }
            if frame.fragment_seq != 0 {
                // Mid-chain fragment with no head, skip it
                return;
            }
            self.chain = Some(Chain {
                packet_class: frame.packet_class,
                next_seq: 0,
                payload: Vec::new(),
            });
        }

        let chain = self.chain.as_mut().unwrap();
        chain.payload.extend_from_slice(&frame.payload);
        chain.next_seq = frame.fragment_seq.wrapping_add(1);

        if !frame.more_fragments {
            let chain = self.chain.take().unwrap();
            self.complete.push_back(Frame {
                packet_class: chain.packet_class,
                fragment_seq: 0,
                more_fragments: false,
                payload: chain.payload,
            });
        }
    }

    /// Pops the next fully reassembled logical packet, presented as a frame
    pub fn next_complete_frame(&mut self) -> Option<Frame> {
        self.complete.pop_front()
    }

    /// Pops the next logical packet as `(packet_class, payload)`
    pub fn next_complete_packet(&mut self) -> Option<(u8, Vec<u8>)> {
        self.complete
            .pop_front()
            .map(|frame| (frame.packet_class, frame.payload))
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::PacketClass;

    fn feed(reassembler: &mut Reassembler, frames: &[Frame]) {
        for frame in frames {
            reassembler.process_received(&frame.to_bytes());
        }
    }

    #[test]
    fn test_single_fragment_packet() {
        let frames = fragment_packet(PacketClass::MasterToSlave as u8, b"hello", 127);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].more_fragments);

        let mut reassembler = Reassembler::new();
        feed(&mut reassembler, &frames);
        let (class, payload) = reassembler.next_complete_packet().unwrap();
        assert_eq!(class, PacketClass::MasterToSlave as u8);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_fragmentation_round_trip() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        for mtu in [16, 23, 64, 127] {
            let frames = fragment_packet(PacketClass::SlaveToMaster as u8, &payload, mtu);
            assert!(frames.len() > 1, "mtu {mtu} must fragment");
            assert!(frames.iter().all(|f| f.payload.len() <= mtu - FRAME_HEADER_LEN));
            assert!(frames.last().map(|f| !f.more_fragments).unwrap());

            let mut reassembler = Reassembler::new();
            feed(&mut reassembler, &frames);
            let (_, got) = reassembler.next_complete_packet().unwrap();
            assert_eq!(got, payload, "mtu {mtu} round trip");
        }
    }

    #[test]
    fn test_long_chain_wraps_sequence() {
        // More than 256 fragments forces the sequence counter to wrap
        let payload = vec![0x5A; 9 * 300];
        let frames = fragment_packet(PacketClass::SlaveToBackend as u8, &payload, 16);
        assert!(frames.len() > 256);

        let mut reassembler = Reassembler::new();
        feed(&mut reassembler, &frames);
        let (_, got) = reassembler.next_complete_packet().unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn test_max_body_single_delivery() {
        // 64 KiB body, all frames handed over in one buffer
        let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 253) as u8).collect();
        let frames = fragment_packet(PacketClass::SlaveToBackend as u8, &payload, 127);
        let stream: Vec<u8> = frames.iter().flat_map(|f| f.to_bytes()).collect();

        let mut reassembler = Reassembler::new();
        reassembler.process_received(&stream);
        let (_, got) = reassembler.next_complete_packet().unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn test_chunked_delivery() {
        let payload = vec![0xA5; 400];
        let frames = fragment_packet(PacketClass::BackendToMaster as u8, &payload, 127);
        let stream: Vec<u8> = frames.iter().flat_map(|f| f.to_bytes()).collect();

        // Deliver the stream three bytes at a time
        let mut reassembler = Reassembler::new();
        for chunk in stream.chunks(3) {
            reassembler.process_received(chunk);
        }
        let (_, got) = reassembler.next_complete_packet().unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn test_missing_fragment_discards_chain() {
        let payload = vec![0x11; 400];
        let mut frames = fragment_packet(PacketClass::MasterToSlave as u8, &payload, 127);
        frames.remove(1);

        let mut reassembler = Reassembler::new();
        feed(&mut reassembler, &frames);
        assert!(reassembler.next_complete_packet().is_none());

        // The next well-formed packet still gets through
        let fresh = fragment_packet(PacketClass::MasterToSlave as u8, b"ok", 127);
        feed(&mut reassembler, &fresh);
        let (_, got) = reassembler.next_complete_packet().unwrap();
        assert_eq!(got, b"ok");
    }

    #[test]
    fn test_stream_starting_mid_packet() {
        let payload = vec![0x22; 400];
        let frames = fragment_packet(PacketClass::SlaveToMaster as u8, &payload, 127);

        // Receiver comes up after fragment 0 was transmitted
        let mut reassembler = Reassembler::new();
        feed(&mut reassembler, &frames[1..]);
        assert!(reassembler.next_complete_packet().is_none());

        let fresh = fragment_packet(PacketClass::SlaveToMaster as u8, b"resync", 127);
        feed(&mut reassembler, &fresh);
        let (_, got) = reassembler.next_complete_packet().unwrap();
        assert_eq!(got, b"resync");
    }

    #[test]
    fn test_multiple_packets_in_one_buffer() {
        let a = fragment_packet(PacketClass::BackendToMaster as u8, b"first", 127);
        let b = fragment_packet(PacketClass::BackendToMaster as u8, b"second", 127);
        let mut stream = a[0].to_bytes();
        stream.extend_from_slice(&b[0].to_bytes());

        let mut reassembler = Reassembler::new();
        reassembler.process_received(&stream);
        assert_eq!(reassembler.next_complete_packet().unwrap().1, b"first");
        assert_eq!(reassembler.next_complete_packet().unwrap().1, b"second");
        assert!(reassembler.next_complete_packet().is_none());
    }
}
