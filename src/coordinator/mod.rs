//! Coordination engine
//!
//! Everything above the wire: the shared state tables, the handler dispatch
//! for both inbound directions, the backend-response correlation engine, the
//! retry engine, ping sessions, the TDMA sync broadcaster, and the
//! [`MasterServer`] that wires them to the transports with three loops.

pub mod correlation;
pub mod handlers;
pub mod ping;
pub mod retry;
pub mod server;
pub mod slave_handlers;
pub mod state;
pub mod tdma;

pub use self::server::{Indicator, MasterServer};
pub use self::state::{CoordinatorState, PendingBackendResponse, PendingCommand, PingSession};

use crate::protocol::{BackendResponse, SlaveCommand};

/// Capability surface handlers receive instead of the whole server
///
/// Gives dispatch code the clock and the shared state tables and nothing
/// else; outbound traffic is requested through [`Directive`]s so no handler
/// ever blocks on a transport or holds a lock across a send.
pub trait CoordinatorOps {
    /// Millisecond monotonic timestamp
    fn now_ms(&self) -> u32;
    /// Microsecond monotonic timestamp
    fn now_us(&self) -> u64;
    /// Shared coordinator state
    fn state(&self) -> &CoordinatorState;
}

/// Outbound work a handler asks the calling loop to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Send a response to the backend
    Respond(BackendResponse),
    /// Send a command that needs confirmation, with retry tracking
    Command {
        target_id: u32,
        command: SlaveCommand,
        max_retries: u8,
    },
    /// Send a fire-and-forget command
    CommandOnce {
        target_id: u32,
        command: SlaveCommand,
    },
}
