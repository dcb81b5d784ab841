use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, Result};

/// First frame delimiter byte
pub const FRAME_MAGIC_1: u8 = 0xAB;

/// Second frame delimiter byte
pub const FRAME_MAGIC_2: u8 = 0xCD;

/// Fixed frame header length: two delimiters, class, sequence, more-flag,
/// little-endian payload length
pub const FRAME_HEADER_LEN: usize = 7;

/// Datagram class carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketClass {
    /// Backend request to the master
    BackendToMaster = 0x00,
    /// Master response to the backend
    MasterToBackend = 0x01,
    /// Master command to one or all slaves
    MasterToSlave = 0x02,
    /// Slave message to the master
    SlaveToMaster = 0x03,
    /// Slave measurement data, opaque to the master
    SlaveToBackend = 0x04,
}

impl PacketClass {
    /// Decodes a wire class byte
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(PacketClass::BackendToMaster),
            0x01 => Some(PacketClass::MasterToBackend),
            0x02 => Some(PacketClass::MasterToSlave),
            0x03 => Some(PacketClass::SlaveToMaster),
            0x04 => Some(PacketClass::SlaveToBackend),
            _ => None,
        }
    }
}

/// Datalink unit shared by the radio and the UDP transport
///
/// A logical packet larger than the MTU is carried by several frames with
/// increasing `fragment_seq`; every frame but the last sets `more_fragments`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packet class byte (kept raw so unknown classes survive transit)
    pub packet_class: u8,
    /// Fragment sequence number within the logical packet
    pub fragment_seq: u8,
    /// Whether another fragment of the same packet follows
    pub more_fragments: bool,
    /// Frame payload
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a single-fragment frame
    pub fn new(packet_class: PacketClass, payload: Vec<u8>) -> Self {
        Frame {
            packet_class: packet_class as u8,
            fragment_seq: 0,
            more_fragments: false,
            payload,
        }
    }

    /// Serializes the frame, header first
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u8(FRAME_MAGIC_1);
        buf.put_u8(FRAME_MAGIC_2);
        buf.put_u8(self.packet_class);
        buf.put_u8(self.fragment_seq);
        buf.put_u8(u8::from(self.more_fragments));
        buf.put_u16_le(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserializes one frame from the start of `data`
    ///
    /// Requires the delimiters to match and the full payload to be present.
    pub fn parse(data: &[u8]) -> Result<Frame> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(Error::FrameShort {
                needed: FRAME_HEADER_LEN,
                available: data.len(),
            });
        }
        if data[0] != FRAME_MAGIC_1 || data[1] != FRAME_MAGIC_2 {
            return Err(Error::FrameMagic(data[0], data[1]));
        }

        let payload_len = usize::from(u16::from_le_bytes([data[5], data[6]]));
        if data.len() < FRAME_HEADER_LEN + payload_len {
            return Err(Error::FrameShort {
                needed: FRAME_HEADER_LEN + payload_len,
                available: data.len(),
            });
        }

        Ok(Frame {
            packet_class: data[2],
            fragment_seq: data[3],
            more_fragments: data[4] != 0,
            payload: data[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len].to_vec(),
        })
    }
}

/// Incremental frame codec for a byte stream arriving in arbitrary chunks
///
/// The decoder scans forward to the next delimiter pair, so it makes
/// progress even when the stream starts mid-packet or carries line noise
/// between frames.
#[derive(Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        // Drop everything in front of the next delimiter pair.
        loop {
            match src.iter().position(|&b| b == FRAME_MAGIC_1) {
                None => {
                    src.clear();
                    return Ok(None);
                }
                Some(pos) => {
                    src.advance(pos);
                    if src.len() < 2 {
                        // Lone leading delimiter, wait for the next byte
                        return Ok(None);
                    }
                    if src[1] == FRAME_MAGIC_2 {
                        break;
                    }
                    // False start, resume the scan past it
                    src.advance(1);
                }
            }
        }

        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let payload_len = usize::from(u16::from_le_bytes([src[5], src[6]]));
        if src.len() < FRAME_HEADER_LEN + payload_len {
            return Ok(None);
        }

        let frame = Frame {
            packet_class: src[2],
            fragment_seq: src[3],
            more_fragments: src[4] != 0,
            payload: src[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len].to_vec(),
        };
        src.advance(FRAME_HEADER_LEN + payload_len);
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(FRAME_HEADER_LEN + item.payload.len());
        dst.put_u8(FRAME_MAGIC_1);
        dst.put_u8(FRAME_MAGIC_2);
        dst.put_u8(item.packet_class);
        dst.put_u8(item.fragment_seq);
        dst.put_u8(u8::from(item.more_fragments));
        dst.put_u16_le(item.payload.len() as u16);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
