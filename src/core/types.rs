use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Firmware version reported by a slave in its Announce message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Patch version
    pub patch: u16,
}

impl FirmwareVersion {
    /// Creates a new firmware version
    pub fn new(major: u8, minor: u8, patch: u16) -> Self {
        FirmwareVersion { major, minor, patch }
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Electrical detection mode selected by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DetectionMode {
    /// Conduction testing
    Conduction = 0,
    /// Resistance testing
    Resistance = 1,
    /// Clip (pin) testing
    Clip = 2,
}

impl DetectionMode {
    /// Decodes a wire mode byte; unknown values are reported as `None`
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(DetectionMode::Conduction),
            1 => Some(DetectionMode::Resistance),
            2 => Some(DetectionMode::Clip),
            _ => None,
        }
    }
}

/// System running status driven by the backend Control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SystemStatus {
    /// All collection stopped
    Stop = 0,
    /// Periodic collection running
    Run = 1,
    /// Devices being reset
    Reset = 2,
}

impl SystemStatus {
    /// Decodes a wire status byte
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(SystemStatus::Stop),
            1 => Some(SystemStatus::Run),
            2 => Some(SystemStatus::Reset),
            _ => None,
        }
    }
}

/// State of the data-collection cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionCycle {
    /// No collection in progress
    Idle,
    /// Slaves are pushing measurement data
    Collecting,
}

/// Per-slave test configuration announced by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveConfigEntry {
    /// Slave device id
    pub id: u32,
    /// Number of conduction test points
    pub conduction_num: u8,
    /// Number of resistance test points
    pub resistance_num: u8,
    /// Clip mode (doubles as the clip test count in the sync schedule)
    pub clip_mode: u8,
    /// Clip pin status bitmap
    pub clip_status: u16,
}

/// Per-slave entry of a backend Reset request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetEntry {
    /// Slave device id
    pub id: u32,
    /// Lock status to apply
    pub lock: u8,
    /// Clip status bitmap to apply
    pub clip_status: u16,
}

/// Snapshot of one registry record for the device-list response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Full 32-bit device id
    pub device_id: u32,
    /// Assigned short id, 0 when unassigned
    pub short_id: u8,
    /// Whether the device is currently online
    pub online: bool,
    /// Reported firmware version
    pub version: FirmwareVersion,
}

/// Configuration for the master coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Local address to bind the backend UDP socket to
    pub bind_addr: SocketAddr,
    /// Backend address datagrams are sent to
    pub backend_addr: SocketAddr,
    /// MTU for both transports, header included
    pub mtu: usize,
    /// Default acquisition interval in milliseconds
    pub default_interval_ms: u8,
    /// Default retry budget for confirmed slave commands
    pub max_retries: u8,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            backend_addr: format!("{}:{}", super::DEFAULT_BACKEND_IP, super::DEFAULT_BACKEND_PORT)
                .parse()
                .unwrap(),
            mtu: super::FRAME_LEN_MAX,
            default_interval_ms: super::DEFAULT_INTERVAL_MS,
            max_retries: super::DEFAULT_MAX_RETRIES,
        }
    }
}
