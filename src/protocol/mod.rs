//! Wire protocol implementation
//!
//! This module defines the frame codec shared by both transports, the
//! fragmentation/reassembly layer, and the message codecs for every packet
//! class, tied together by [`ProtocolProcessor`].

pub mod fragment;
pub mod frame;
pub mod message;

pub use self::fragment::{fragment_packet, Reassembler};
pub use self::frame::{Frame, FrameCodec, PacketClass};
pub use self::message::{
    BackendMessage, BackendResponse, BackendToMasterId, MasterToBackendId, MasterToSlaveId,
    SlaveCommand, SlaveMessage, SlaveToMasterId, SyncSlot,
};

use bytes::BufMut;

use crate::core::{Error, Result, FRAME_LEN_MAX};
use self::frame::{FRAME_HEADER_LEN, FRAME_MAGIC_1, FRAME_MAGIC_2};

/// Stream-to-message pipeline for one transport direction
///
/// Owns the reassembly state for an inbound byte stream and packs outbound
/// messages into MTU-sized frames. Parsing helpers are stateless and shared
/// by both loops.
pub struct ProtocolProcessor {
    reassembler: Reassembler,
    mtu: usize,
}

impl ProtocolProcessor {
    /// Creates a processor with the default radio MTU
    pub fn new() -> Self {
        Self::with_mtu(FRAME_LEN_MAX)
    }

    /// Creates a processor with a custom MTU (header included)
    pub fn with_mtu(mtu: usize) -> Self {
        ProtocolProcessor {
            reassembler: Reassembler::new(),
            mtu,
        }
    }

    /// Appends received bytes and scans for frames
    pub fn process_received(&mut self, data: &[u8]) {
        self.reassembler.process_received(data);
    }

    /// Pops the next fully reassembled logical packet as a frame
    pub fn next_complete_frame(&mut self) -> Option<Frame> {
        self.reassembler.next_complete_frame()
    }

    /// Pops the next logical packet as `(packet_class, payload)`
    pub fn next_complete_packet(&mut self) -> Option<(u8, Vec<u8>)> {
        self.reassembler.next_complete_packet()
    }

    /// Parses a BACKEND→MASTER packet payload: `message_id ∥ body`
    pub fn parse_backend_to_master(payload: &[u8]) -> Result<BackendMessage> {
        if payload.is_empty() {
            return Err(Error::PayloadLenMismatch {
                expected: 1,
                actual: 0,
            });
        }
        BackendMessage::decode(payload[0], &payload[1..])
    }

    /// Parses a SLAVE→MASTER packet payload:
    /// `source_device_id u32 LE ∥ message_id ∥ body`
    pub fn parse_slave_to_master(payload: &[u8]) -> Result<(u32, SlaveMessage)> {
        if payload.len() < 5 {
            return Err(Error::PayloadLenMismatch {
                expected: 5,
                actual: payload.len(),
            });
        }
        let source = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let message = SlaveMessage::decode(payload[4], &payload[5..])?;
        Ok((source, message))
    }

    /// Packs a MASTER→SLAVE command into serialized frames
    ///
    /// The packet payload is `destination_device_id u32 LE ∥ message_id ∥
    /// body`; destination `0xFFFFFFFF` broadcasts.
    pub fn pack_master_to_slave(&self, destination_id: u32, command: &SlaveCommand) -> Vec<Vec<u8>> {
        let mut payload = Vec::new();
        payload.put_u32_le(destination_id);
        payload.put_u8(command.message_id());
        command.encode_body(&mut payload);

        fragment_packet(PacketClass::MasterToSlave as u8, &payload, self.mtu)
            .iter()
            .map(Frame::to_bytes)
            .collect()
    }

    /// Packs a MASTER→BACKEND response into serialized frames
    pub fn pack_master_to_backend(&self, response: &BackendResponse) -> Vec<Vec<u8>> {
        let mut payload = Vec::new();
        payload.put_u8(response.message_id());
        response.encode_body(&mut payload);

        fragment_packet(PacketClass::MasterToBackend as u8, &payload, self.mtu)
            .iter()
            .map(Frame::to_bytes)
            .collect()
    }

    /// Packs a BACKEND→MASTER request (backend side, used by tests and tools)
    pub fn pack_backend_to_master(&self, message: &BackendMessage) -> Vec<Vec<u8>> {
        let mut payload = Vec::new();
        payload.put_u8(message.message_id());
        message.encode_body(&mut payload);

        fragment_packet(PacketClass::BackendToMaster as u8, &payload, self.mtu)
            .iter()
            .map(Frame::to_bytes)
            .collect()
    }

    /// Packs a SLAVE→MASTER message (slave side, used by tests and tools)
    pub fn pack_slave_to_master(&self, source_id: u32, message: &SlaveMessage) -> Vec<Vec<u8>> {
        let mut payload = Vec::new();
        payload.put_u32_le(source_id);
        payload.put_u8(message.message_id());
        message.encode_body(&mut payload);

        fragment_packet(PacketClass::SlaveToMaster as u8, &payload, self.mtu)
            .iter()
            .map(Frame::to_bytes)
            .collect()
    }

    /// Returns true when the buffer holds a SLAVE→BACKEND frame header
    ///
    /// The radio loop forwards such buffers to the backend verbatim, without
    /// reassembly, so measurement data never pays the decode cost on the
    /// master.
    pub fn contains_slave_to_backend_frame(data: &[u8]) -> bool {
        let mut pos = 0;
        while pos + FRAME_HEADER_LEN <= data.len() {
            if data[pos] == FRAME_MAGIC_1 && data[pos + 1] == FRAME_MAGIC_2 {
                if data[pos + 2] == PacketClass::SlaveToBackend as u8 {
                    return true;
                }
                pos += 2;
            } else {
                pos += 1;
            }
        }
        false
    }
}

impl Default for ProtocolProcessor {
    fn default() -> Self {
        Self::new()
    }
}
