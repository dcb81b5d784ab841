//! Backend-facing messages: Backend→Master requests and Master→Backend
//! responses.
//!
//! Bodies are fixed-layout, little-endian, and untagged; the message ID in
//! the packet header selects the layout.

use bytes::BufMut;

use super::{BackendToMasterId, MasterToBackendId, Reader};
use crate::core::{DeviceSummary, Error, FirmwareVersion, ResetEntry, Result, SlaveConfigEntry};
use crate::protocol::frame::PacketClass;

/// A request from the backend to the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Announces the slave population and per-slave test configuration
    SlaveConfig { slaves: Vec<SlaveConfigEntry> },
    /// Selects the detection mode
    ModeConfig { mode: u8 },
    /// Requests a reset of the named slaves
    Reset { slaves: Vec<ResetEntry> },
    /// Starts, stops or resets collection
    Control { running_status: u8 },
    /// Starts a ping session against one slave
    PingControl {
        mode: u8,
        count: u16,
        interval_ms: u16,
        destination_id: u32,
    },
    /// Overrides the acquisition interval
    IntervalConfig { interval_ms: u8 },
    /// Asks for the device list
    DeviceListRequest { reserve: u8 },
    /// Wipes the device registry
    ClearDeviceList,
}

impl BackendMessage {
    /// Wire message ID of this request
    pub fn message_id(&self) -> u8 {
        match self {
            BackendMessage::SlaveConfig { .. } => BackendToMasterId::SlaveConfig as u8,
            BackendMessage::ModeConfig { .. } => BackendToMasterId::ModeConfig as u8,
            BackendMessage::Reset { .. } => BackendToMasterId::Reset as u8,
            BackendMessage::Control { .. } => BackendToMasterId::Control as u8,
            BackendMessage::PingControl { .. } => BackendToMasterId::PingControl as u8,
            BackendMessage::IntervalConfig { .. } => BackendToMasterId::IntervalConfig as u8,
            BackendMessage::DeviceListRequest { .. } => BackendToMasterId::DeviceListRequest as u8,
            BackendMessage::ClearDeviceList => BackendToMasterId::ClearDeviceList as u8,
        }
    }

    /// Decodes a request body for the given message ID
    pub fn decode(message_id: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        match message_id {
            id if id == BackendToMasterId::SlaveConfig as u8 => {
                let n = r.u8()?;
                let mut slaves = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    slaves.push(SlaveConfigEntry {
                        id: r.u32()?,
                        conduction_num: r.u8()?,
                        resistance_num: r.u8()?,
                        clip_mode: r.u8()?,
                        clip_status: r.u16()?,
                    });
                }
                Ok(BackendMessage::SlaveConfig { slaves })
            }
            id if id == BackendToMasterId::ModeConfig as u8 => {
                Ok(BackendMessage::ModeConfig { mode: r.u8()? })
            }
            id if id == BackendToMasterId::Reset as u8 => {
                let n = r.u8()?;
                let mut slaves = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    slaves.push(ResetEntry {
                        id: r.u32()?,
                        lock: r.u8()?,
                        clip_status: r.u16()?,
                    });
                }
                Ok(BackendMessage::Reset { slaves })
            }
            id if id == BackendToMasterId::Control as u8 => Ok(BackendMessage::Control {
                running_status: r.u8()?,
            }),
            id if id == BackendToMasterId::PingControl as u8 => Ok(BackendMessage::PingControl {
                mode: r.u8()?,
                count: r.u16()?,
                interval_ms: r.u16()?,
                destination_id: r.u32()?,
            }),
            id if id == BackendToMasterId::IntervalConfig as u8 => {
                Ok(BackendMessage::IntervalConfig { interval_ms: r.u8()? })
            }
            id if id == BackendToMasterId::DeviceListRequest as u8 => {
                Ok(BackendMessage::DeviceListRequest { reserve: r.u8()? })
            }
            id if id == BackendToMasterId::ClearDeviceList as u8 => {
                Ok(BackendMessage::ClearDeviceList)
            }
            _ => Err(Error::UnknownMessageId {
                packet_class: PacketClass::BackendToMaster as u8,
                message_id,
            }),
        }
    }

    /// Serializes the request body (without the message ID byte)
    pub fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            BackendMessage::SlaveConfig { slaves } => {
                buf.put_u8(slaves.len() as u8);
                for s in slaves {
                    buf.put_u32_le(s.id);
                    buf.put_u8(s.conduction_num);
                    buf.put_u8(s.resistance_num);
                    buf.put_u8(s.clip_mode);
                    buf.put_u16_le(s.clip_status);
                }
            }
            BackendMessage::ModeConfig { mode } => buf.put_u8(*mode),
            BackendMessage::Reset { slaves } => {
                buf.put_u8(slaves.len() as u8);
                for s in slaves {
                    buf.put_u32_le(s.id);
                    buf.put_u8(s.lock);
                    buf.put_u16_le(s.clip_status);
                }
            }
            BackendMessage::Control { running_status } => buf.put_u8(*running_status),
            BackendMessage::PingControl {
                mode,
                count,
                interval_ms,
                destination_id,
            } => {
                buf.put_u8(*mode);
                buf.put_u16_le(*count);
                buf.put_u16_le(*interval_ms);
                buf.put_u32_le(*destination_id);
            }
            BackendMessage::IntervalConfig { interval_ms } => buf.put_u8(*interval_ms),
            BackendMessage::DeviceListRequest { reserve } => buf.put_u8(*reserve),
            BackendMessage::ClearDeviceList => {}
        }
    }
}

/// A response from the master to the backend
///
/// Field orders follow the on-wire layouts of the deployed protocol; note
/// that `Ping` and `DeviceList` carry no status byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendResponse {
    /// Echo of a SlaveConfig request
    SlaveConfig {
        status: u8,
        slaves: Vec<SlaveConfigEntry>,
    },
    /// Outcome of a ModeConfig fan-out
    ModeConfig { status: u8, mode: u8 },
    /// Outcome of a Reset fan-out
    Reset { status: u8, slaves: Vec<ResetEntry> },
    /// Echo of a Control request
    Control { status: u8, running_status: u8 },
    /// Outcome of a completed ping session
    Ping {
        mode: u8,
        total: u16,
        succeeded: u16,
        destination_id: u32,
    },
    /// Echo of an IntervalConfig request
    IntervalConfig { status: u8, interval_ms: u8 },
    /// Registry snapshot, offline devices included
    DeviceList { devices: Vec<DeviceSummary> },
}

impl BackendResponse {
    /// Wire message ID of this response
    pub fn message_id(&self) -> u8 {
        match self {
            BackendResponse::SlaveConfig { .. } => MasterToBackendId::SlaveConfigResponse as u8,
            BackendResponse::ModeConfig { .. } => MasterToBackendId::ModeConfigResponse as u8,
            BackendResponse::Reset { .. } => MasterToBackendId::ResetResponse as u8,
            BackendResponse::Control { .. } => MasterToBackendId::ControlResponse as u8,
            BackendResponse::Ping { .. } => MasterToBackendId::PingResponse as u8,
            BackendResponse::IntervalConfig { .. } => {
                MasterToBackendId::IntervalConfigResponse as u8
            }
            BackendResponse::DeviceList { .. } => MasterToBackendId::DeviceListResponse as u8,
        }
    }

    /// Serializes the response body (without the message ID byte)
    pub fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            BackendResponse::SlaveConfig { status, slaves } => {
                buf.put_u8(*status);
                buf.put_u8(slaves.len() as u8);
                for s in slaves {
                    buf.put_u32_le(s.id);
                    buf.put_u8(s.conduction_num);
                    buf.put_u8(s.resistance_num);
                    buf.put_u8(s.clip_mode);
                    buf.put_u16_le(s.clip_status);
                }
            }
            BackendResponse::ModeConfig { status, mode } => {
                buf.put_u8(*status);
                buf.put_u8(*mode);
            }
            BackendResponse::Reset { status, slaves } => {
                buf.put_u8(*status);
                buf.put_u8(slaves.len() as u8);
                for s in slaves {
                    buf.put_u32_le(s.id);
                    buf.put_u8(s.lock);
                    buf.put_u16_le(s.clip_status);
                }
            }
            BackendResponse::Control {
                status,
                running_status,
            } => {
                buf.put_u8(*status);
                buf.put_u8(*running_status);
            }
            BackendResponse::Ping {
                mode,
                total,
                succeeded,
                destination_id,
            } => {
                buf.put_u8(*mode);
                buf.put_u16_le(*total);
                buf.put_u16_le(*succeeded);
                buf.put_u32_le(*destination_id);
            }
            BackendResponse::IntervalConfig {
                status,
                interval_ms,
            } => {
                buf.put_u8(*status);
                buf.put_u8(*interval_ms);
            }
            BackendResponse::DeviceList { devices } => {
                buf.put_u8(devices.len() as u8);
                for d in devices {
                    buf.put_u32_le(d.device_id);
                    buf.put_u8(d.short_id);
                    buf.put_u8(u8::from(d.online));
                    buf.put_u8(d.version.major);
                    buf.put_u8(d.version.minor);
                    buf.put_u16_le(d.version.patch);
                }
            }
        }
    }

    /// Decodes a response body for the given message ID
    pub fn decode(message_id: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        match message_id {
            id if id == MasterToBackendId::SlaveConfigResponse as u8 => {
                let status = r.u8()?;
                let n = r.u8()?;
                let mut slaves = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    slaves.push(SlaveConfigEntry {
                        id: r.u32()?,
                        conduction_num: r.u8()?,
                        resistance_num: r.u8()?,
                        clip_mode: r.u8()?,
                        clip_status: r.u16()?,
                    });
                }
                Ok(BackendResponse::SlaveConfig { status, slaves })
            }
            id if id == MasterToBackendId::ModeConfigResponse as u8 => {
                Ok(BackendResponse::ModeConfig {
                    status: r.u8()?,
                    mode: r.u8()?,
                })
            }
            id if id == MasterToBackendId::ResetResponse as u8 => {
                let status = r.u8()?;
                let n = r.u8()?;
                let mut slaves = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    slaves.push(ResetEntry {
                        id: r.u32()?,
                        lock: r.u8()?,
                        clip_status: r.u16()?,
                    });
                }
                Ok(BackendResponse::Reset { status, slaves })
            }
            id if id == MasterToBackendId::ControlResponse as u8 => {
                Ok(BackendResponse::Control {
                    status: r.u8()?,
                    running_status: r.u8()?,
                })
            }
            id if id == MasterToBackendId::PingResponse as u8 => Ok(BackendResponse::Ping {
                mode: r.u8()?,
                total: r.u16()?,
                succeeded: r.u16()?,
                destination_id: r.u32()?,
            }),
            id if id == MasterToBackendId::IntervalConfigResponse as u8 => {
                Ok(BackendResponse::IntervalConfig {
                    status: r.u8()?,
                    interval_ms: r.u8()?,
                })
            }
            id if id == MasterToBackendId::DeviceListResponse as u8 => {
                let n = r.u8()?;
                let mut devices = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    devices.push(DeviceSummary {
                        device_id: r.u32()?,
                        short_id: r.u8()?,
                        online: r.u8()? != 0,
                        version: FirmwareVersion {
                            major: r.u8()?,
                            minor: r.u8()?,
                            patch: r.u16()?,
                        },
                    });
                }
                Ok(BackendResponse::DeviceList { devices })
            }
            _ => Err(Error::UnknownMessageId {
                packet_class: PacketClass::MasterToBackend as u8,
                message_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_request(msg: BackendMessage) {
        let mut body = Vec::new();
        msg.encode_body(&mut body);
        let decoded = BackendMessage::decode(msg.message_id(), &body).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_slave_config_layout() {
        let msg = BackendMessage::SlaveConfig {
            slaves: vec![SlaveConfigEntry {
                id: 0x1122_3344,
                conduction_num: 4,
                resistance_num: 6,
                clip_mode: 2,
                clip_status: 0x0A0B,
            }],
        };
        let mut body = Vec::new();
        msg.encode_body(&mut body);
        // n, id LE, conduction, resistance, clip_mode, clip_status LE
        assert_eq!(
            body,
            vec![0x01, 0x44, 0x33, 0x22, 0x11, 0x04, 0x06, 0x02, 0x0B, 0x0A]
        );
        round_trip_request(msg);
    }

    #[test]
    fn test_ping_control_layout() {
        let msg = BackendMessage::PingControl {
            mode: 0,
            count: 3,
            interval_ms: 100,
            destination_id: 0xDEAD_BEEF,
        };
        let mut body = Vec::new();
        msg.encode_body(&mut body);
        assert_eq!(body, vec![0x00, 0x03, 0x00, 0x64, 0x00, 0xEF, 0xBE, 0xAD, 0xDE]);
        round_trip_request(msg);
    }

    #[test]
    fn test_reset_layout() {
        let msg = BackendMessage::Reset {
            slaves: vec![ResetEntry {
                id: 0xA,
                lock: 1,
                clip_status: 0,
            }],
        };
        let mut body = Vec::new();
        msg.encode_body(&mut body);
        assert_eq!(body, vec![0x01, 0x0A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00]);
        round_trip_request(msg);
    }

    #[test]
    fn test_truncated_body_rejected() {
        // Reset announcing two slaves but carrying bytes for one
        let body = vec![0x02, 0x0A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00];
        let err = BackendMessage::decode(BackendToMasterId::Reset as u8, &body).unwrap_err();
        assert!(matches!(err, Error::PayloadLenMismatch { .. }));
    }

    #[test]
    fn test_unknown_request_id() {
        let err = BackendMessage::decode(0x7F, &[]).unwrap_err();
        assert!(matches!(err, Error::UnknownMessageId { message_id: 0x7F, .. }));
    }

    #[test]
    fn test_clear_device_list_empty_body() {
        round_trip_request(BackendMessage::ClearDeviceList);
    }

    #[test]
    fn test_ping_response_has_no_status_byte() {
        let rsp = BackendResponse::Ping {
            mode: 1,
            total: 5,
            succeeded: 4,
            destination_id: 0xC,
        };
        let mut body = Vec::new();
        rsp.encode_body(&mut body);
        assert_eq!(body, vec![0x01, 0x05, 0x00, 0x04, 0x00, 0x0C, 0x00, 0x00, 0x00]);
        assert_eq!(BackendResponse::decode(rsp.message_id(), &body).unwrap(), rsp);
    }

    #[test]
    fn test_device_list_response_layout() {
        let rsp = BackendResponse::DeviceList {
            devices: vec![DeviceSummary {
                device_id: 0x0102_0304,
                short_id: 7,
                online: true,
                version: FirmwareVersion::new(1, 2, 0x0304),
            }],
        };
        let mut body = Vec::new();
        rsp.encode_body(&mut body);
        assert_eq!(
            body,
            vec![0x01, 0x04, 0x03, 0x02, 0x01, 0x07, 0x01, 0x01, 0x02, 0x04, 0x03]
        );
        assert_eq!(BackendResponse::decode(rsp.message_id(), &body).unwrap(), rsp);
    }

    #[test]
    fn test_response_round_trips() {
        let responses = vec![
            BackendResponse::SlaveConfig {
                status: 0,
                slaves: vec![SlaveConfigEntry {
                    id: 1,
                    conduction_num: 2,
                    resistance_num: 3,
                    clip_mode: 4,
                    clip_status: 5,
                }],
            },
            BackendResponse::ModeConfig { status: 1, mode: 2 },
            BackendResponse::Reset {
                status: 0,
                slaves: vec![ResetEntry {
                    id: 9,
                    lock: 1,
                    clip_status: 0xFFFF,
                }],
            },
            BackendResponse::Control {
                status: 0,
                running_status: 1,
            },
            BackendResponse::IntervalConfig {
                status: 0,
                interval_ms: 20,
            },
        ];
        for rsp in responses {
            let mut body = Vec::new();
            rsp.encode_body(&mut body);
            assert_eq!(BackendResponse::decode(rsp.message_id(), &body).unwrap(), rsp);
        }
    }
}
