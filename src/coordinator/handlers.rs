//! Backend→Master message handling
//!
//! Dispatch is an exhaustive match over [`BackendMessage`]. Every message
//! goes through two phases:
//!
//! 1. [`process`] produces a synchronous response iff the request can be
//!    answered locally, without waiting on any slave.
//! 2. [`execute`] mutates coordinator state and returns [`Directive`]s for
//!    the outbound work; requests needing slave confirmation register a
//!    fan-out entry here and answer later through the correlation engine.

use tracing::{info, warn};

use super::state::{PendingBackendResponse, PingSession};
use super::{CoordinatorOps, Directive};
use crate::core::{DetectionMode, SystemStatus, RESPONSE_STATUS_SUCCESS};
use crate::protocol::{BackendMessage, BackendResponse};

/// Phase 1: produce a locally computable response, if any
pub fn process(message: &BackendMessage, ops: &dyn CoordinatorOps) -> Option<BackendResponse> {
    match message {
        BackendMessage::SlaveConfig { slaves } => Some(BackendResponse::SlaveConfig {
            status: RESPONSE_STATUS_SUCCESS,
            slaves: slaves.clone(),
        }),
        BackendMessage::Control { running_status } => Some(BackendResponse::Control {
            status: RESPONSE_STATUS_SUCCESS,
            running_status: *running_status,
        }),
        BackendMessage::IntervalConfig { interval_ms } => Some(BackendResponse::IntervalConfig {
            status: RESPONSE_STATUS_SUCCESS,
            interval_ms: *interval_ms,
        }),
        BackendMessage::DeviceListRequest { .. } => {
            let registry = ops.state().registry();
            Some(BackendResponse::DeviceList {
                devices: registry.device_summaries(),
            })
        }
        // Fan-out requests and fire-and-forget requests answer elsewhere
        BackendMessage::ModeConfig { .. }
        | BackendMessage::Reset { .. }
        | BackendMessage::PingControl { .. }
        | BackendMessage::ClearDeviceList => None,
    }
}

/// Phase 2: apply the request to coordinator state
pub fn execute(message: &BackendMessage, ops: &dyn CoordinatorOps) -> Vec<Directive> {
    match message {
        BackendMessage::SlaveConfig { slaves } => {
            let mut registry = ops.state().registry();
            // Reconfiguration replaces the population and its slot order
            registry.clear_slave_configs();
            for entry in slaves {
                registry.set_slave_config(*entry);
            }
            info!(slaves = slaves.len(), "slave configuration stored");
            Vec::new()
        }

        BackendMessage::ModeConfig { mode } => {
            match DetectionMode::from_wire(*mode) {
                Some(m) => ops.state().registry().set_mode(m),
                None => {
                    warn!(mode, "unknown detection mode requested");
                    return vec![Directive::Respond(BackendResponse::ModeConfig {
                        status: crate::core::RESPONSE_STATUS_ERROR,
                        mode: *mode,
                    })];
                }
            }

            let targets: Vec<u32> = {
                let registry = ops.state().registry();
                registry
                    .connected_slaves_in_config_order()
                    .into_iter()
                    .filter(|id| registry.has_slave_config(*id))
                    .collect()
            };
            if targets.is_empty() {
                // Nothing to wait for, acknowledge directly
                return vec![Directive::Respond(BackendResponse::ModeConfig {
                    status: RESPONSE_STATUS_SUCCESS,
                    mode: *mode,
                })];
            }
            ops.state()
                .add_pending_backend_response(PendingBackendResponse::new(
                    message.clone(),
                    targets,
                    ops.now_ms(),
                ));
            Vec::new()
        }

        BackendMessage::Reset { slaves } => {
            let mut targets = Vec::new();
            {
                let mut registry = ops.state().registry();
                for slave in slaves {
                    if registry.is_connected(slave.id) {
                        registry.mark_for_reset(slave.id);
                        targets.push(slave.id);
                    } else {
                        warn!(
                            slave_id = format_args!("{:#010x}", slave.id),
                            "reset target not connected, skipping"
                        );
                    }
                }
            }

            if targets.is_empty() {
                warn!("reset requested but no targeted slave is connected");
                return vec![Directive::Respond(BackendResponse::Reset {
                    status: RESPONSE_STATUS_SUCCESS,
                    slaves: slaves.clone(),
                })];
            }

            info!(targets = targets.len(), "reset fan-out registered");
            ops.state()
                .add_pending_backend_response(PendingBackendResponse::new(
                    message.clone(),
                    targets,
                    ops.now_ms(),
                ));
            Vec::new()
        }

        BackendMessage::Control { running_status } => {
            execute_control(*running_status, ops);
            Vec::new()
        }

        BackendMessage::PingControl {
            mode,
            count,
            interval_ms,
            destination_id,
        } => {
            ops.state().add_ping_session(PingSession {
                target_id: *destination_id,
                mode: *mode,
                total: *count,
                sent: 0,
                succeeded: 0,
                interval_ms: *interval_ms,
                last_sent_at: ops.now_ms(),
            });
            info!(
                target_id = format_args!("{destination_id:#010x}"),
                count, interval_ms, "ping session registered"
            );
            Vec::new()
        }

        BackendMessage::IntervalConfig { interval_ms } => {
            ops.state().registry().set_configured_interval(*interval_ms);
            Vec::new()
        }

        BackendMessage::DeviceListRequest { .. } => Vec::new(),

        BackendMessage::ClearDeviceList => {
            ops.state().registry().clear_all_devices();
            Vec::new()
        }
    }
}

/// Applies a Control request's running status
fn execute_control(running_status: u8, ops: &dyn CoordinatorOps) {
    let status = match SystemStatus::from_wire(running_status) {
        Some(s) => s,
        None => {
            warn!(running_status, "unknown running status");
            return;
        }
    };
    ops.state().registry().set_system_status(status);

    match status {
        SystemStatus::Stop => {
            // STOP invalidates every queued retry
            ops.state().clear_pending_commands();
            ops.state().registry().reset_collection();
            info!("collection stopped");
        }
        SystemStatus::Run => {
            let active = ops.state().registry().start_collection();
            // The sync broadcast carries time, mode and slots from here on
            ops.state().enable_sync();
            info!(active, "collection started, sync broadcast enabled");
        }
        SystemStatus::Reset => {
            let mut registry = ops.state().registry();
            for slave_id in registry.connected_slaves() {
                if registry.has_slave_config(slave_id) {
                    registry.mark_for_reset(slave_id);
                }
            }
            registry.reset_collection();
            info!("all configured slaves flagged for reset");
        }
    }
}
