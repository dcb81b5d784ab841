//! WHTS master coordinator.
//!
//! This library implements the in-node orchestration engine of a wireless
//! harness-testing master: the framed/fragmented wire protocol shared by the
//! UDP backend link and the UWB radio, the device registry with its short-ID
//! allocator, the TDMA sync broadcaster, the request/response correlation
//! engine for backend fan-out operations, the per-destination retry engine,
//! the ping-session scheduler, and the three cooperating loops that drive
//! them.
#![allow(async_fn_in_trait)] // We control the usage of the radio trait

pub mod core;

pub mod coordinator;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod time;

// Re-export commonly used items
pub use crate::core::{Error, Result};

pub use crate::core::types::MasterConfig;
pub use crate::coordinator::MasterServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
