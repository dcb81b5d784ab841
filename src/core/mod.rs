//! Core types and constants for the WHTS master coordinator
//!
//! This module contains the fundamental building blocks used throughout the
//! library, plus the protocol and scheduling constants that are part of the
//! system contract.

pub mod error;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    CollectionCycle,
    DetectionMode,
    DeviceSummary,
    FirmwareVersion,
    MasterConfig,
    ResetEntry,
    SlaveConfigEntry,
    SystemStatus,
};

/// Maximum physical frame length on the radio, header included
pub const FRAME_LEN_MAX: usize = 127;

/// UDP receive buffer size
pub const UDP_BUFFER_SIZE: usize = 512;

/// Default acquisition interval (ms)
pub const DEFAULT_INTERVAL_MS: u8 = 10;

/// Delay between sync broadcast and slot-0 start (ms)
pub const TDMA_STARTUP_DELAY_MS: u32 = 100;

/// Safety margin appended to each TDMA cycle (ms)
pub const TDMA_EXTRA_DELAY_MS: u32 = 500;

/// Lower bound on the TDMA cycle (ms)
pub const TDMA_MIN_CYCLE_MS: u32 = 500;

/// Default retry budget for confirmed slave commands
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// Base retry timeout, doubled per attempt (ms)
pub const BASE_RETRY_TIMEOUT_MS: u32 = 100;

/// Upper bound on the per-attempt retry timeout (ms)
pub const MAX_RETRY_TIMEOUT_MS: u32 = 1000;

/// Wall-clock budget for a backend fan-out request (ms)
pub const BACKEND_RESPONSE_TIMEOUT_MS: u32 = 5000;

/// Device records older than this are removed (ms)
pub const DEVICE_TIMEOUT_MS: u32 = 90_000;

/// How often expired devices are swept (ms)
pub const DEVICE_CLEANUP_INTERVAL_MS: u32 = 60_000;

/// First allocatable short id
pub const SHORT_ID_START: u8 = 1;

/// Last allocatable short id
pub const SHORT_ID_MAX: u8 = 254;

/// Announces accepted before enrollment is refused
pub const ANNOUNCE_COUNT_LIMIT: u8 = 3;

/// Consecutive radio failures that trip transmission suppression
pub const MAX_CONSECUTIVE_UWB_FAILURES: u32 = 10;

/// Quiet period after which the radio failure counter decays (ms)
pub const UWB_FAILURE_RESET_INTERVAL_MS: u32 = 30_000;

/// How often the radio health check runs (ms)
pub const UWB_HEALTH_CHECK_INTERVAL_MS: u32 = 60_000;

/// Watchdog on one correlation pass (ms)
pub const MAX_BACKEND_PROCESS_TIME_MS: u32 = 5000;

/// Entries examined per correlation pass
pub const MAX_BACKEND_PROCESS_ITERATIONS: usize = 10;

/// Tick loop period (ms)
pub const TICK_PERIOD_MS: u64 = 1;

/// Heartbeat indicator toggle period (ms)
pub const HEARTBEAT_PERIOD_MS: u64 = 500;

/// Destination id addressing every slave at once
pub const BROADCAST_SLAVE_ID: u32 = 0xFFFF_FFFF;

/// Default backend IP address
pub const DEFAULT_BACKEND_IP: &str = "192.168.0.3";

/// Default backend port
pub const DEFAULT_BACKEND_PORT: u16 = 8080;

/// Response status byte for success
pub const RESPONSE_STATUS_SUCCESS: u8 = 0;

/// Response status byte for failure
pub const RESPONSE_STATUS_ERROR: u8 = 1;
