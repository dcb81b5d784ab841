//! TDMA sync broadcaster
//!
//! While the system runs, the master periodically broadcasts one unified
//! Sync message carrying the time base, the detection mode, the acquisition
//! interval and the per-slave slot schedule. Individual SetTime / config /
//! control commands are history; the broadcast replaces them all.

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use super::state::CoordinatorState;
use crate::core::{
    DetectionMode, SystemStatus, TDMA_EXTRA_DELAY_MS, TDMA_MIN_CYCLE_MS, TDMA_STARTUP_DELAY_MS,
};
use crate::protocol::{SlaveCommand, SyncSlot};
use crate::registry::DeviceRegistry;

/// Derives the broadcast period from the fleet's conduction load
///
/// `total_time_slots = Σ conduction_num · interval`, and the cycle is
/// `startup + total_time_slots · interval + extra` — the interval enters
/// squared. That reproduces the deployed firmware's arithmetic and is part
/// of the wire-visible timing contract, even though a single factor of the
/// interval was almost certainly intended.
pub fn tdma_cycle_ms(total_conduction_num: u32, interval_ms: u32) -> u32 {
    let total_time_slots = total_conduction_num.saturating_mul(interval_ms);
    let cycle = TDMA_STARTUP_DELAY_MS
        .saturating_add(total_time_slots.saturating_mul(interval_ms))
        .saturating_add(TDMA_EXTRA_DELAY_MS);
    cycle.max(TDMA_MIN_CYCLE_MS)
}

/// Builds the unified Sync broadcast from current registry state
///
/// Slots are dense, zero-based, and follow the backend's configuration
/// order restricted to connected slaves. The per-slave test count depends on
/// the mode; clip mode reuses `clip_mode` as the count.
pub fn build_sync(registry: &DeviceRegistry, now_us: u64) -> SlaveCommand {
    let mode = registry.mode();
    let mut slots = Vec::new();
    let mut time_slot: u8 = 0;

    for slave_id in registry.connected_slaves_in_config_order() {
        let config = match registry.slave_config(slave_id) {
            Some(config) => config,
            None => {
                warn!(
                    slave_id = format_args!("{slave_id:#010x}"),
                    "connected but unconfigured, skipping slot"
                );
                continue;
            }
        };
        let test_count = match mode {
            DetectionMode::Conduction => u16::from(config.conduction_num),
            DetectionMode::Resistance => u16::from(config.resistance_num),
            DetectionMode::Clip => u16::from(config.clip_mode),
        };
        slots.push(SyncSlot {
            device_id: slave_id,
            time_slot,
            test_count,
        });
        time_slot = time_slot.wrapping_add(1);
    }

    SlaveCommand::Sync {
        mode: mode as u8,
        interval_ms: registry.effective_interval_ms(),
        current_time_us: now_us,
        start_time_us: now_us + u64::from(TDMA_STARTUP_DELAY_MS) * 1000,
        slots,
    }
}

/// Returns the Sync to broadcast now, if one is due
///
/// Due means: the system is running, the initial sync has been enabled, and
/// a full TDMA cycle has elapsed since the last broadcast. Updates the
/// last-broadcast timestamp when it fires.
pub fn next_sync(state: &CoordinatorState, now_ms: u32, now_us: u64) -> Option<SlaveCommand> {
    if !state.sync_enabled.load(Ordering::Relaxed) {
        return None;
    }

    let registry = state.registry();
    if registry.system_status() != SystemStatus::Run {
        return None;
    }

    let interval = u32::from(registry.effective_interval_ms());
    let cycle = tdma_cycle_ms(registry.total_conduction_num(), interval);
    let last = state.last_sync_ms.load(Ordering::Relaxed);
    if now_ms.wrapping_sub(last) < cycle {
        return None;
    }

    let sync = build_sync(&registry, now_us);
    state.last_sync_ms.store(now_ms, Ordering::Relaxed);
    debug!(cycle_ms = cycle, "sync broadcast due");
    Some(sync)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SlaveConfigEntry;
    use crate::protocol::SlaveCommand;

    fn configured_registry() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.set_slave_config(SlaveConfigEntry {
            id: 0xA,
            conduction_num: 4,
            resistance_num: 7,
            clip_mode: 2,
            clip_status: 0,
        });
        registry.set_slave_config(SlaveConfigEntry {
            id: 0xB,
            conduction_num: 6,
            resistance_num: 9,
            clip_mode: 3,
            clip_status: 0,
        });
        registry
    }

    #[test]
    fn test_cycle_formula() {
        // 100 + (10 * 10) * 10 + 500
        assert_eq!(tdma_cycle_ms(10, 10), 1600);
        // Small loads clamp to the minimum cycle
        assert_eq!(tdma_cycle_ms(0, 10), 600);
        assert_eq!(tdma_cycle_ms(0, 0), TDMA_MIN_CYCLE_MS);
    }

    #[test]
    fn test_sync_slots_follow_config_order() {
        let registry = configured_registry();
        let sync = build_sync(&registry, 5_000_000);
        match sync {
            SlaveCommand::Sync {
                mode,
                interval_ms,
                current_time_us,
                start_time_us,
                slots,
            } => {
                assert_eq!(mode, 0);
                assert_eq!(interval_ms, 10);
                assert_eq!(current_time_us, 5_000_000);
                assert_eq!(start_time_us, 5_100_000);
                assert_eq!(
                    slots,
                    vec![
                        SyncSlot {
                            device_id: 0xA,
                            time_slot: 0,
                            test_count: 4
                        },
                        SyncSlot {
                            device_id: 0xB,
                            time_slot: 1,
                            test_count: 6
                        },
                    ]
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_test_count_follows_mode() {
        let mut registry = configured_registry();
        registry.set_mode(DetectionMode::Resistance);
        match build_sync(&registry, 0) {
            SlaveCommand::Sync { slots, .. } => {
                assert_eq!(slots[0].test_count, 7);
                assert_eq!(slots[1].test_count, 9);
            }
            _ => unreachable!(),
        }

        registry.set_mode(DetectionMode::Clip);
        match build_sync(&registry, 0) {
            SlaveCommand::Sync { slots, .. } => {
                // clip_mode doubles as the count in clip mode
                assert_eq!(slots[0].test_count, 2);
                assert_eq!(slots[1].test_count, 3);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_disconnected_slave_loses_slot() {
        let mut registry = configured_registry();
        registry.record_announce(0xB, crate::core::FirmwareVersion::new(1, 0, 0), 0);
        registry.remove_device(0xB);
        match build_sync(&registry, 0) {
            SlaveCommand::Sync { slots, .. } => {
                assert_eq!(slots.len(), 1);
                assert_eq!(slots[0].device_id, 0xA);
                assert_eq!(slots[0].time_slot, 0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_next_sync_gating() {
        let state = CoordinatorState::new();
        {
            let mut registry = state.registry();
            *registry = configured_registry();
        }

        // Not running, not enabled: nothing
        assert!(next_sync(&state, 10_000, 0).is_none());

        state.enable_sync();
        assert!(next_sync(&state, 10_000, 0).is_none());

        state.registry().set_system_status(SystemStatus::Run);
        assert!(next_sync(&state, 10_000, 0).is_some());

        // Σ conduction = 10, interval 10 → cycle 1600 ms
        assert!(next_sync(&state, 11_599, 0).is_none());
        assert!(next_sync(&state, 11_600, 0).is_some());
    }
}
