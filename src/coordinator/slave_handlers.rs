//! Slave→Master message handling
//!
//! Slave traffic never generates a response back to the slave; it advances
//! enrollment, refreshes presence, credits ping sessions and feeds the
//! fan-out correlation engine. The one outbound command this dispatch can
//! request is the `ShortIdAssign` offer during enrollment.

use tracing::{debug, info, warn};

use super::{CoordinatorOps, Directive};
use crate::core::{Error, DEFAULT_MAX_RETRIES, RESPONSE_STATUS_SUCCESS};
use crate::protocol::{MasterToSlaveId, SlaveCommand, SlaveMessage};

/// Applies one slave message to coordinator state
pub fn execute(
    slave_id: u32,
    message: &SlaveMessage,
    ops: &dyn CoordinatorOps,
) -> Vec<Directive> {
    match message {
        SlaveMessage::Announce { device_id, version } => {
            let now = ops.now_ms();
            let mut registry = ops.state().registry();
            registry.record_announce(*device_id, *version, now);

            if !registry.should_assign_short_id(*device_id) {
                return Vec::new();
            }
            match registry.assign_short_id(*device_id, now) {
                Ok(short_id) => {
                    info!(
                        device_id = format_args!("{device_id:#010x}"),
                        short_id, "offering short id"
                    );
                    vec![Directive::Command {
                        target_id: *device_id,
                        command: SlaveCommand::ShortIdAssign { short_id },
                        max_retries: DEFAULT_MAX_RETRIES,
                    }]
                }
                Err(Error::PoolExhausted) => {
                    warn!(
                        device_id = format_args!("{device_id:#010x}"),
                        "short-id pool exhausted, enrollment deferred"
                    );
                    Vec::new()
                }
                Err(err) => {
                    warn!(device_id = format_args!("{device_id:#010x}"), %err, "enrollment refused");
                    Vec::new()
                }
            }
        }

        SlaveMessage::ShortIdConfirm { status, short_id } => {
            if *status == RESPONSE_STATUS_SUCCESS {
                ops.state()
                    .registry()
                    .confirm_short_id(slave_id, *short_id, ops.now_ms());
            } else {
                warn!(
                    slave_id = format_args!("{slave_id:#010x}"),
                    short_id, status, "slave rejected short id"
                );
            }
            ops.state()
                .remove_pending_command(slave_id, MasterToSlaveId::ShortIdAssign as u8);
            Vec::new()
        }

        SlaveMessage::PingResponse { sequence, .. } => {
            let state = ops.state();
            state.registry().touch(slave_id, ops.now_ms());
            state.note_ping_success(slave_id);
            state.remove_pending_command(slave_id, MasterToSlaveId::PingRequest as u8);
            debug!(
                slave_id = format_args!("{slave_id:#010x}"),
                sequence, "ping reply"
            );
            Vec::new()
        }

        SlaveMessage::ResetResponse { status, .. } => {
            let state = ops.state();
            {
                let mut registry = state.registry();
                registry.touch(slave_id, ops.now_ms());
                registry.clear_reset_flag(slave_id);
            }
            state.mark_fanout_response(slave_id, message.message_id(), *status);
            state.remove_pending_command(slave_id, MasterToSlaveId::Reset as u8);
            Vec::new()
        }

        SlaveMessage::ConductionConfigResponse { status, .. } => {
            config_response(slave_id, message, *status, MasterToSlaveId::ConductionConfig, ops)
        }
        SlaveMessage::ResistanceConfigResponse { status, .. } => {
            config_response(slave_id, message, *status, MasterToSlaveId::ResistanceConfig, ops)
        }
        SlaveMessage::ClipConfigResponse { status, .. } => {
            config_response(slave_id, message, *status, MasterToSlaveId::ClipConfig, ops)
        }

        // Legacy acknowledgements: only presence is interesting
        SlaveMessage::SetTimeResponse { .. } => {
            let state = ops.state();
            state.registry().touch(slave_id, ops.now_ms());
            state.remove_pending_command(slave_id, MasterToSlaveId::SetTime as u8);
            Vec::new()
        }
        SlaveMessage::SlaveControlResponse { .. } => {
            let state = ops.state();
            state.registry().touch(slave_id, ops.now_ms());
            state.remove_pending_command(slave_id, MasterToSlaveId::SlaveControl as u8);
            Vec::new()
        }
    }
}

/// Shared tail of the three per-mode config acknowledgements
fn config_response(
    slave_id: u32,
    message: &SlaveMessage,
    status: u8,
    pending_kind: MasterToSlaveId,
    ops: &dyn CoordinatorOps,
) -> Vec<Directive> {
    let state = ops.state();
    state.registry().touch(slave_id, ops.now_ms());
    state.mark_fanout_response(slave_id, message.message_id(), status);
    state.remove_pending_command(slave_id, pending_kind as u8);
    Vec::new()
}
