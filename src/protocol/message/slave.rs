//! Radio-facing messages: Master→Slave commands and Slave→Master replies.

use bytes::BufMut;

use super::{MasterToSlaveId, Reader, SlaveToMasterId};
use crate::core::{Error, FirmwareVersion, Result};
use crate::protocol::frame::PacketClass;

/// One slot assignment inside the unified Sync broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSlot {
    /// Slave device id
    pub device_id: u32,
    /// Zero-based slot index in config order
    pub time_slot: u8,
    /// Tests the slave runs in its slot (mode-dependent)
    pub test_count: u16,
}

/// A command from the master to one slave or to the broadcast address
///
/// Only `Sync`, `PingRequest` and `ShortIdAssign` are emitted; the remaining
/// variants decode for interop with older firmware but their functions have
/// been folded into the Sync broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveCommand {
    /// Unified TDMA broadcast: time base, mode, interval and slot schedule
    Sync {
        mode: u8,
        interval_ms: u8,
        current_time_us: u64,
        start_time_us: u64,
        slots: Vec<SyncSlot>,
    },
    /// One probe of a ping session
    PingRequest { sequence: u16, timestamp_ms: u32 },
    /// Offers a short id during enrollment
    ShortIdAssign { short_id: u8 },
    /// Legacy time push
    SetTime { timestamp_us: u64 },
    /// Legacy per-slave conduction schedule
    ConductionConfig {
        time_slot: u8,
        interval_ms: u8,
        total_num: u16,
        start_num: u16,
        num: u16,
    },
    /// Legacy per-slave resistance schedule
    ResistanceConfig {
        time_slot: u8,
        interval_ms: u8,
        total_num: u16,
        start_num: u16,
        num: u16,
    },
    /// Legacy clip configuration
    ClipConfig {
        interval_ms: u8,
        mode: u8,
        clip_pin: u16,
    },
    /// Legacy per-slave reset
    Reset { lock_status: u8, clip_led: u16 },
    /// Legacy start/stop control
    SlaveControl {
        mode: u8,
        enable: u8,
        start_time_us: u64,
    },
}

impl SlaveCommand {
    /// Wire message ID of this command
    pub fn message_id(&self) -> u8 {
        match self {
            SlaveCommand::Sync { .. } => MasterToSlaveId::Sync as u8,
            SlaveCommand::PingRequest { .. } => MasterToSlaveId::PingRequest as u8,
            SlaveCommand::ShortIdAssign { .. } => MasterToSlaveId::ShortIdAssign as u8,
            SlaveCommand::SetTime { .. } => MasterToSlaveId::SetTime as u8,
            SlaveCommand::ConductionConfig { .. } => MasterToSlaveId::ConductionConfig as u8,
            SlaveCommand::ResistanceConfig { .. } => MasterToSlaveId::ResistanceConfig as u8,
            SlaveCommand::ClipConfig { .. } => MasterToSlaveId::ClipConfig as u8,
            SlaveCommand::Reset { .. } => MasterToSlaveId::Reset as u8,
            SlaveCommand::SlaveControl { .. } => MasterToSlaveId::SlaveControl as u8,
        }
    }

    /// Serializes the command body (without addressing or the ID byte)
    pub fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            SlaveCommand::Sync {
                mode,
                interval_ms,
                current_time_us,
                start_time_us,
                slots,
            } => {
                buf.put_u8(*mode);
                buf.put_u8(*interval_ms);
                buf.put_u64_le(*current_time_us);
                buf.put_u64_le(*start_time_us);
                buf.put_u8(slots.len() as u8);
                for slot in slots {
                    buf.put_u32_le(slot.device_id);
                    buf.put_u8(slot.time_slot);
                    buf.put_u16_le(slot.test_count);
                }
            }
            SlaveCommand::PingRequest {
                sequence,
                timestamp_ms,
            } => {
                buf.put_u16_le(*sequence);
                buf.put_u32_le(*timestamp_ms);
            }
            SlaveCommand::ShortIdAssign { short_id } => buf.put_u8(*short_id),
            SlaveCommand::SetTime { timestamp_us } => buf.put_u64_le(*timestamp_us),
            SlaveCommand::ConductionConfig {
                time_slot,
                interval_ms,
                total_num,
                start_num,
                num,
            }
            | SlaveCommand::ResistanceConfig {
                time_slot,
                interval_ms,
                total_num,
                start_num,
                num,
            } => {
                buf.put_u8(*time_slot);
                buf.put_u8(*interval_ms);
                buf.put_u16_le(*total_num);
                buf.put_u16_le(*start_num);
                buf.put_u16_le(*num);
            }
            SlaveCommand::ClipConfig {
                interval_ms,
                mode,
                clip_pin,
            } => {
                buf.put_u8(*interval_ms);
                buf.put_u8(*mode);
                buf.put_u16_le(*clip_pin);
            }
            SlaveCommand::Reset {
                lock_status,
                clip_led,
            } => {
                buf.put_u8(*lock_status);
                buf.put_u16_le(*clip_led);
            }
            SlaveCommand::SlaveControl {
                mode,
                enable,
                start_time_us,
            } => {
                buf.put_u8(*mode);
                buf.put_u8(*enable);
                buf.put_u64_le(*start_time_us);
            }
        }
    }

    /// Decodes a command body for the given message ID
    pub fn decode(message_id: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        match message_id {
            id if id == MasterToSlaveId::Sync as u8 => {
                let mode = r.u8()?;
                let interval_ms = r.u8()?;
                let current_time_us = r.u64()?;
                let start_time_us = r.u64()?;
                let n = r.u8()?;
                let mut slots = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    slots.push(SyncSlot {
                        device_id: r.u32()?,
                        time_slot: r.u8()?,
                        test_count: r.u16()?,
                    });
                }
                Ok(SlaveCommand::Sync {
                    mode,
                    interval_ms,
                    current_time_us,
                    start_time_us,
                    slots,
                })
            }
            id if id == MasterToSlaveId::PingRequest as u8 => Ok(SlaveCommand::PingRequest {
                sequence: r.u16()?,
                timestamp_ms: r.u32()?,
            }),
            id if id == MasterToSlaveId::ShortIdAssign as u8 => {
                Ok(SlaveCommand::ShortIdAssign { short_id: r.u8()? })
            }
            id if id == MasterToSlaveId::SetTime as u8 => Ok(SlaveCommand::SetTime {
                timestamp_us: r.u64()?,
            }),
            id if id == MasterToSlaveId::ConductionConfig as u8 => {
                Ok(SlaveCommand::ConductionConfig {
                    time_slot: r.u8()?,
                    interval_ms: r.u8()?,
                    total_num: r.u16()?,
                    start_num: r.u16()?,
                    num: r.u16()?,
                })
            }
            id if id == MasterToSlaveId::ResistanceConfig as u8 => {
                Ok(SlaveCommand::ResistanceConfig {
                    time_slot: r.u8()?,
                    interval_ms: r.u8()?,
                    total_num: r.u16()?,
                    start_num: r.u16()?,
                    num: r.u16()?,
                })
            }
            id if id == MasterToSlaveId::ClipConfig as u8 => Ok(SlaveCommand::ClipConfig {
                interval_ms: r.u8()?,
                mode: r.u8()?,
                clip_pin: r.u16()?,
            }),
            id if id == MasterToSlaveId::Reset as u8 => Ok(SlaveCommand::Reset {
                lock_status: r.u8()?,
                clip_led: r.u16()?,
            }),
            id if id == MasterToSlaveId::SlaveControl as u8 => Ok(SlaveCommand::SlaveControl {
                mode: r.u8()?,
                enable: r.u8()?,
                start_time_us: r.u64()?,
            }),
            _ => Err(Error::UnknownMessageId {
                packet_class: PacketClass::MasterToSlave as u8,
                message_id,
            }),
        }
    }
}

/// A message from a slave to the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveMessage {
    /// Unsolicited self-introduction on joining the network
    Announce {
        device_id: u32,
        version: FirmwareVersion,
    },
    /// Acknowledges (or rejects) a short-id offer
    ShortIdConfirm { status: u8, short_id: u8 },
    /// Reply to one ping probe
    PingResponse { sequence: u16, timestamp_ms: u32 },
    /// Reply to a reset
    ResetResponse {
        status: u8,
        lock_status: u8,
        clip_led: u16,
    },
    /// Acknowledges the conduction schedule
    ConductionConfigResponse {
        status: u8,
        time_slot: u8,
        interval_ms: u8,
        total_num: u16,
        start_num: u16,
        num: u16,
    },
    /// Acknowledges the resistance schedule
    ResistanceConfigResponse {
        status: u8,
        time_slot: u8,
        interval_ms: u8,
        total_num: u16,
        start_num: u16,
        num: u16,
    },
    /// Acknowledges the clip configuration
    ClipConfigResponse {
        status: u8,
        interval_ms: u8,
        mode: u8,
        clip_pin: u16,
    },
    /// Legacy time-push acknowledgement
    SetTimeResponse { status: u8, timestamp_us: u64 },
    /// Legacy control acknowledgement
    SlaveControlResponse { status: u8 },
}

impl SlaveMessage {
    /// Wire message ID of this message
    pub fn message_id(&self) -> u8 {
        match self {
            SlaveMessage::Announce { .. } => SlaveToMasterId::Announce as u8,
            SlaveMessage::ShortIdConfirm { .. } => SlaveToMasterId::ShortIdConfirm as u8,
            SlaveMessage::PingResponse { .. } => SlaveToMasterId::PingResponse as u8,
            SlaveMessage::ResetResponse { .. } => SlaveToMasterId::ResetResponse as u8,
            SlaveMessage::ConductionConfigResponse { .. } => {
                SlaveToMasterId::ConductionConfigResponse as u8
            }
            SlaveMessage::ResistanceConfigResponse { .. } => {
                SlaveToMasterId::ResistanceConfigResponse as u8
            }
            SlaveMessage::ClipConfigResponse { .. } => SlaveToMasterId::ClipConfigResponse as u8,
            SlaveMessage::SetTimeResponse { .. } => SlaveToMasterId::SetTimeResponse as u8,
            SlaveMessage::SlaveControlResponse { .. } => {
                SlaveToMasterId::SlaveControlResponse as u8
            }
        }
    }

    /// Serializes the message body (without addressing or the ID byte)
    pub fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            SlaveMessage::Announce { device_id, version } => {
                buf.put_u32_le(*device_id);
                buf.put_u8(version.major);
                buf.put_u8(version.minor);
                buf.put_u16_le(version.patch);
            }
            SlaveMessage::ShortIdConfirm { status, short_id } => {
                buf.put_u8(*status);
                buf.put_u8(*short_id);
            }
            SlaveMessage::PingResponse {
                sequence,
                timestamp_ms,
            } => {
                buf.put_u16_le(*sequence);
                buf.put_u32_le(*timestamp_ms);
            }
            SlaveMessage::ResetResponse {
                status,
                lock_status,
                clip_led,
            } => {
                buf.put_u8(*status);
                buf.put_u8(*lock_status);
                buf.put_u16_le(*clip_led);
            }
            SlaveMessage::ConductionConfigResponse {
                status,
                time_slot,
                interval_ms,
                total_num,
                start_num,
                num,
            }
            | SlaveMessage::ResistanceConfigResponse {
                status,
                time_slot,
                interval_ms,
                total_num,
                start_num,
                num,
            } => {
                buf.put_u8(*status);
                buf.put_u8(*time_slot);
                buf.put_u8(*interval_ms);
                buf.put_u16_le(*total_num);
                buf.put_u16_le(*start_num);
                buf.put_u16_le(*num);
            }
            SlaveMessage::ClipConfigResponse {
                status,
                interval_ms,
                mode,
                clip_pin,
            } => {
                buf.put_u8(*status);
                buf.put_u8(*interval_ms);
                buf.put_u8(*mode);
                buf.put_u16_le(*clip_pin);
            }
            SlaveMessage::SetTimeResponse {
                status,
                timestamp_us,
            } => {
                buf.put_u8(*status);
                buf.put_u64_le(*timestamp_us);
            }
            SlaveMessage::SlaveControlResponse { status } => buf.put_u8(*status),
        }
    }

    /// Decodes a message body for the given message ID
    pub fn decode(message_id: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        match message_id {
            id if id == SlaveToMasterId::Announce as u8 => Ok(SlaveMessage::Announce {
                device_id: r.u32()?,
                version: FirmwareVersion {
                    major: r.u8()?,
                    minor: r.u8()?,
                    patch: r.u16()?,
                },
            }),
            id if id == SlaveToMasterId::ShortIdConfirm as u8 => {
                Ok(SlaveMessage::ShortIdConfirm {
                    status: r.u8()?,
                    short_id: r.u8()?,
                })
            }
            id if id == SlaveToMasterId::PingResponse as u8 => Ok(SlaveMessage::PingResponse {
                sequence: r.u16()?,
                timestamp_ms: r.u32()?,
            }),
            id if id == SlaveToMasterId::ResetResponse as u8 => Ok(SlaveMessage::ResetResponse {
                status: r.u8()?,
                lock_status: r.u8()?,
                clip_led: r.u16()?,
            }),
            id if id == SlaveToMasterId::ConductionConfigResponse as u8 => {
                Ok(SlaveMessage::ConductionConfigResponse {
                    status: r.u8()?,
                    time_slot: r.u8()?,
                    interval_ms: r.u8()?,
                    total_num: r.u16()?,
                    start_num: r.u16()?,
                    num: r.u16()?,
                })
            }
            id if id == SlaveToMasterId::ResistanceConfigResponse as u8 => {
                Ok(SlaveMessage::ResistanceConfigResponse {
                    status: r.u8()?,
                    time_slot: r.u8()?,
                    interval_ms: r.u8()?,
                    total_num: r.u16()?,
                    start_num: r.u16()?,
                    num: r.u16()?,
                })
            }
            id if id == SlaveToMasterId::ClipConfigResponse as u8 => {
                Ok(SlaveMessage::ClipConfigResponse {
                    status: r.u8()?,
                    interval_ms: r.u8()?,
                    mode: r.u8()?,
                    clip_pin: r.u16()?,
                })
            }
            id if id == SlaveToMasterId::SetTimeResponse as u8 => {
                Ok(SlaveMessage::SetTimeResponse {
                    status: r.u8()?,
                    timestamp_us: r.u64()?,
                })
            }
            id if id == SlaveToMasterId::SlaveControlResponse as u8 => {
                Ok(SlaveMessage::SlaveControlResponse { status: r.u8()? })
            }
            _ => Err(Error::UnknownMessageId {
                packet_class: PacketClass::SlaveToMaster as u8,
                message_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_layout() {
        let cmd = SlaveCommand::Sync {
            mode: 0,
            interval_ms: 10,
            current_time_us: 0x0102_0304_0506_0708,
            start_time_us: 0x0102_0304_0506_0708 + 100_000,
            slots: vec![
                SyncSlot {
                    device_id: 0xA,
                    time_slot: 0,
                    test_count: 4,
                },
                SyncSlot {
                    device_id: 0xB,
                    time_slot: 1,
                    test_count: 6,
                },
            ],
        };
        let mut body = Vec::new();
        cmd.encode_body(&mut body);
        // mode, interval, current u64, start u64, n, 2 * (id u32, slot u8, count u16)
        assert_eq!(body.len(), 1 + 1 + 8 + 8 + 1 + 2 * 7);
        assert_eq!(body[0], 0);
        assert_eq!(body[1], 10);
        assert_eq!(body[2..10], [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(body[18], 2);

        assert_eq!(SlaveCommand::decode(cmd.message_id(), &body).unwrap(), cmd);
    }

    #[test]
    fn test_announce_layout() {
        let msg = SlaveMessage::Announce {
            device_id: 0x1122_3344,
            version: FirmwareVersion::new(1, 0, 0),
        };
        let mut body = Vec::new();
        msg.encode_body(&mut body);
        assert_eq!(body, vec![0x44, 0x33, 0x22, 0x11, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(SlaveMessage::decode(msg.message_id(), &body).unwrap(), msg);
    }

    #[test]
    fn test_ping_request_layout() {
        let cmd = SlaveCommand::PingRequest {
            sequence: 2,
            timestamp_ms: 0x0000_1234,
        };
        let mut body = Vec::new();
        cmd.encode_body(&mut body);
        assert_eq!(body, vec![0x02, 0x00, 0x34, 0x12, 0x00, 0x00]);
        assert_eq!(SlaveCommand::decode(cmd.message_id(), &body).unwrap(), cmd);
    }

    #[test]
    fn test_command_round_trips() {
        let commands = vec![
            SlaveCommand::ShortIdAssign { short_id: 1 },
            SlaveCommand::SetTime {
                timestamp_us: u64::MAX,
            },
            SlaveCommand::ConductionConfig {
                time_slot: 1,
                interval_ms: 10,
                total_num: 30,
                start_num: 10,
                num: 20,
            },
            SlaveCommand::ResistanceConfig {
                time_slot: 2,
                interval_ms: 10,
                total_num: 8,
                start_num: 0,
                num: 8,
            },
            SlaveCommand::ClipConfig {
                interval_ms: 10,
                mode: 1,
                clip_pin: 0x00FF,
            },
            SlaveCommand::Reset {
                lock_status: 0,
                clip_led: 0,
            },
            SlaveCommand::SlaveControl {
                mode: 0,
                enable: 1,
                start_time_us: 42,
            },
        ];
        for cmd in commands {
            let mut body = Vec::new();
            cmd.encode_body(&mut body);
            assert_eq!(SlaveCommand::decode(cmd.message_id(), &body).unwrap(), cmd);
        }
    }

    #[test]
    fn test_slave_message_round_trips() {
        let messages = vec![
            SlaveMessage::ShortIdConfirm {
                status: 0,
                short_id: 1,
            },
            SlaveMessage::PingResponse {
                sequence: 1,
                timestamp_ms: 99,
            },
            SlaveMessage::ResetResponse {
                status: 0,
                lock_status: 1,
                clip_led: 0xABCD,
            },
            SlaveMessage::ConductionConfigResponse {
                status: 0,
                time_slot: 0,
                interval_ms: 10,
                total_num: 10,
                start_num: 0,
                num: 10,
            },
            SlaveMessage::ClipConfigResponse {
                status: 2,
                interval_ms: 10,
                mode: 1,
                clip_pin: 3,
            },
            SlaveMessage::SetTimeResponse {
                status: 0,
                timestamp_us: 1,
            },
            SlaveMessage::SlaveControlResponse { status: 0 },
        ];
        for msg in messages {
            let mut body = Vec::new();
            msg.encode_body(&mut body);
            assert_eq!(SlaveMessage::decode(msg.message_id(), &body).unwrap(), msg);
        }
    }

    #[test]
    fn test_truncated_sync_rejected() {
        let cmd = SlaveCommand::Sync {
            mode: 0,
            interval_ms: 10,
            current_time_us: 0,
            start_time_us: 0,
            slots: vec![SyncSlot {
                device_id: 1,
                time_slot: 0,
                test_count: 1,
            }],
        };
        let mut body = Vec::new();
        cmd.encode_body(&mut body);
        body.truncate(body.len() - 1);
        assert!(matches!(
            SlaveCommand::decode(cmd.message_id(), &body),
            Err(Error::PayloadLenMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_slave_message_id() {
        let err = SlaveMessage::decode(0x40, &[]).unwrap_err();
        assert!(matches!(err, Error::UnknownMessageId { message_id: 0x40, .. }));
    }
}
