//! Shared coordinator state
//!
//! The three loops share these tables. Each table sits behind its own mutex;
//! critical sections only mutate memory — sends always happen after the
//! guard is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::core::{BACKEND_RESPONSE_TIMEOUT_MS, RESPONSE_STATUS_SUCCESS};
use crate::protocol::{BackendMessage, SlaveToMasterId};
use crate::registry::DeviceRegistry;

/// One outbound command awaiting its slave's confirmation
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Destination device
    pub target_id: u32,
    /// Message ID of the command, for reply matching
    pub message_id: u8,
    /// Cached serialized frames, resent verbatim on retry
    pub frames: Vec<Vec<u8>>,
    /// When the last attempt was transmitted (ms)
    pub sent_at: u32,
    /// Retries performed so far
    pub retries_done: u8,
    /// Retry budget
    pub max_retries: u8,
}

/// One backend request fanned out to several slaves
#[derive(Debug, Clone)]
pub struct PendingBackendResponse {
    /// The request, kept for echo fields in the synthesized response
    pub request: BackendMessage,
    /// Slaves that have not answered yet
    pub pending_slaves: HashSet<u32>,
    /// Status byte reported by each slave that answered
    pub slave_statuses: HashMap<u32, u8>,
    /// Registration time (ms)
    pub started_at: u32,
    /// Wall-clock budget (ms)
    pub timeout_ms: u32,
}

impl PendingBackendResponse {
    /// Creates a fan-out entry for the given targets
    pub fn new(request: BackendMessage, targets: Vec<u32>, now_ms: u32) -> Self {
        PendingBackendResponse {
            request,
            pending_slaves: targets.into_iter().collect(),
            slave_statuses: HashMap::new(),
            started_at: now_ms,
            timeout_ms: BACKEND_RESPONSE_TIMEOUT_MS,
        }
    }

    /// All targeted slaves have answered
    pub fn is_complete(&self) -> bool {
        self.pending_slaves.is_empty()
    }

    /// The wall-clock budget has run out
    pub fn is_timed_out(&self, now_ms: u32) -> bool {
        now_ms.wrapping_sub(self.started_at) > self.timeout_ms
    }

    /// Records one slave's answer
    pub fn mark_response(&mut self, slave_id: u32, status: u8) {
        self.pending_slaves.remove(&slave_id);
        self.slave_statuses.insert(slave_id, status);
    }

    /// 0 iff every answering slave reported success
    pub fn overall_status(&self) -> u8 {
        if self
            .slave_statuses
            .values()
            .all(|&s| s == RESPONSE_STATUS_SUCCESS)
        {
            RESPONSE_STATUS_SUCCESS
        } else {
            crate::core::RESPONSE_STATUS_ERROR
        }
    }
}

/// One active ping session
#[derive(Debug, Clone)]
pub struct PingSession {
    /// Slave being probed
    pub target_id: u32,
    /// Ping mode echoed back to the backend
    pub mode: u8,
    /// Probes to send in total
    pub total: u16,
    /// Probes sent so far
    pub sent: u16,
    /// Replies received so far
    pub succeeded: u16,
    /// Gap between probes (ms)
    pub interval_ms: u16,
    /// When the last probe went out (ms)
    pub last_sent_at: u32,
}

/// State shared by the RadioRx, BackendRx and Tick loops
pub struct CoordinatorState {
    /// Device registry; mutated from Tick (aging) and RadioRx (enrollment)
    pub registry: Mutex<DeviceRegistry>,
    /// Commands awaiting confirmation; retry engine vs. reply removal
    pub pending_commands: Mutex<Vec<PendingCommand>>,
    /// Fan-out requests; correlation engine vs. reply marking
    pub pending_backend_responses: Mutex<Vec<PendingBackendResponse>>,
    /// Active ping sessions; Tick progression vs. reply accounting
    pub ping_sessions: Mutex<Vec<PingSession>>,
    /// Set once collection starts; gates the sync broadcast
    pub sync_enabled: AtomicBool,
    /// When the last sync broadcast went out (ms)
    pub last_sync_ms: AtomicU32,
    /// Reentrancy guard for the correlation engine
    pub(crate) correlation_busy: AtomicBool,
    /// Start of the correlation pass in flight, 0 when none (ms)
    pub(crate) correlation_started_ms: AtomicU32,
}

impl CoordinatorState {
    /// Creates empty state with a fresh registry
    pub fn new() -> Self {
        CoordinatorState {
            registry: Mutex::new(DeviceRegistry::new()),
            pending_commands: Mutex::new(Vec::new()),
            pending_backend_responses: Mutex::new(Vec::new()),
            ping_sessions: Mutex::new(Vec::new()),
            sync_enabled: AtomicBool::new(false),
            last_sync_ms: AtomicU32::new(0),
            correlation_busy: AtomicBool::new(false),
            correlation_started_ms: AtomicU32::new(0),
        }
    }

    /// Locks the registry
    pub fn registry(&self) -> MutexGuard<'_, DeviceRegistry> {
        self.registry.lock().unwrap()
    }

    /// Registers a command for retry tracking
    pub fn add_pending_command(&self, command: PendingCommand) {
        self.pending_commands.lock().unwrap().push(command);
    }

    /// Removes the first pending command matching `(target, message_id)`
    ///
    /// Called when the matching slave reply arrives, so the retry engine
    /// stops resending.
    pub fn remove_pending_command(&self, target_id: u32, message_id: u8) {
        let mut commands = self.pending_commands.lock().unwrap();
        if let Some(pos) = commands
            .iter()
            .position(|c| c.target_id == target_id && c.message_id == message_id)
        {
            debug!(
                target_id = format_args!("{target_id:#010x}"),
                message_id, "pending command confirmed"
            );
            commands.remove(pos);
        }
    }

    /// Drops every pending command (Control STOP)
    pub fn clear_pending_commands(&self) {
        let mut commands = self.pending_commands.lock().unwrap();
        if !commands.is_empty() {
            debug!(count = commands.len(), "clearing pending commands");
            commands.clear();
        }
    }

    /// Registers a backend fan-out awaiting slave replies
    pub fn add_pending_backend_response(&self, entry: PendingBackendResponse) {
        self.pending_backend_responses.lock().unwrap().push(entry);
    }

    /// Routes one slave reply into the oldest matching fan-out entry
    ///
    /// A ModeConfig request accepts the three per-mode config responses; a
    /// Reset request accepts reset responses. Anything else is ignored.
    pub fn mark_fanout_response(&self, slave_id: u32, reply_message_id: u8, status: u8) {
        let mut entries = self.pending_backend_responses.lock().unwrap();
        for entry in entries.iter_mut() {
            let matches = match &entry.request {
                BackendMessage::ModeConfig { .. } => {
                    reply_message_id == SlaveToMasterId::ConductionConfigResponse as u8
                        || reply_message_id == SlaveToMasterId::ResistanceConfigResponse as u8
                        || reply_message_id == SlaveToMasterId::ClipConfigResponse as u8
                }
                BackendMessage::Reset { .. } => {
                    reply_message_id == SlaveToMasterId::ResetResponse as u8
                }
                _ => false,
            };
            if matches && entry.pending_slaves.contains(&slave_id) {
                entry.mark_response(slave_id, status);
                debug!(
                    slave_id = format_args!("{slave_id:#010x}"),
                    status,
                    remaining = entry.pending_slaves.len(),
                    "fan-out reply recorded"
                );
                return;
            }
        }
        debug!(
            slave_id = format_args!("{slave_id:#010x}"),
            reply_message_id, "reply matched no fan-out entry"
        );
    }

    /// Registers a new ping session
    pub fn add_ping_session(&self, session: PingSession) {
        self.ping_sessions.lock().unwrap().push(session);
    }

    /// Credits a ping reply to the oldest session targeting the slave
    pub fn note_ping_success(&self, target_id: u32) {
        let mut sessions = self.ping_sessions.lock().unwrap();
        match sessions.iter_mut().find(|s| s.target_id == target_id) {
            Some(session) => session.succeeded = session.succeeded.saturating_add(1),
            None => warn!(
                target_id = format_args!("{target_id:#010x}"),
                "ping reply without a session"
            ),
        }
    }

    /// Marks initial time sync done, enabling the sync broadcast
    pub fn enable_sync(&self) {
        self.sync_enabled.store(true, Ordering::Relaxed);
    }
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self::new()
    }
}
