//! Device registry and short-ID allocator
//!
//! Tracks every slave the master has heard from: presence, firmware version,
//! enrollment progress, per-slave test configuration and reset flags, plus
//! the coordinator-wide mode/status/interval settings the backend drives.
//!
//! Short IDs are compact 8-bit aliases for 32-bit device IDs, allocated from
//! a pool of `[SHORT_ID_START..=SHORT_ID_MAX]`; a removed device returns its
//! alias to the pool.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::core::{
    CollectionCycle, DetectionMode, DeviceSummary, Error, FirmwareVersion, Result,
    SlaveConfigEntry, SystemStatus, ANNOUNCE_COUNT_LIMIT, DEFAULT_INTERVAL_MS, SHORT_ID_MAX,
    SHORT_ID_START,
};

/// Everything the master knows about one slave, keyed by its 32-bit id
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Full device id
    pub device_id: u32,
    /// Assigned short id, if enrollment got that far
    pub short_id: Option<u8>,
    /// Whether the device is considered online
    pub online: bool,
    /// Firmware version from the last Announce
    pub version: FirmwareVersion,
    /// When the first Announce arrived (ms)
    pub join_request_time: u32,
    /// How many Announces this device has sent
    pub join_request_count: u8,
    /// Last time any message arrived from this device (ms)
    pub last_seen_time: u32,
    /// Battery level, 0..=100
    pub battery_level: u8,
    /// Reset requested by the backend, pending delivery
    pub reset_pending: bool,
}

/// Registry of known devices and fleet-wide settings
pub struct DeviceRegistry {
    devices: HashMap<u32, DeviceRecord>,
    /// Connection state; populated by backend configuration and by completed
    /// enrollment, cleared on removal
    connected: HashMap<u32, bool>,
    available_short_ids: BTreeSet<u8>,
    configs: HashMap<u32, SlaveConfigEntry>,
    /// Order in which the backend announced slaves; drives TDMA slots
    config_order: Vec<u32>,
    mode: DetectionMode,
    system_status: SystemStatus,
    /// 0 means unset, fall back to the default
    configured_interval_ms: u8,
    collection_active: bool,
    cycle: CollectionCycle,
}

impl DeviceRegistry {
    /// Creates an empty registry with a full short-id pool
    pub fn new() -> Self {
        DeviceRegistry {
            devices: HashMap::new(),
            connected: HashMap::new(),
            available_short_ids: (SHORT_ID_START..=SHORT_ID_MAX).collect(),
            configs: HashMap::new(),
            config_order: Vec::new(),
            mode: DetectionMode::Conduction,
            system_status: SystemStatus::Stop,
            configured_interval_ms: 0,
            collection_active: false,
            cycle: CollectionCycle::Idle,
        }
    }

    // ---- presence & enrollment -------------------------------------------

    /// Records an Announce: creates the record on first contact, otherwise
    /// bumps the announce counter and refreshes the version
    pub fn record_announce(&mut self, device_id: u32, version: FirmwareVersion, now_ms: u32) {
        match self.devices.get_mut(&device_id) {
            None => {
                info!(device_id = format_args!("{device_id:#010x}"), %version, "new device announced");
                self.devices.insert(
                    device_id,
                    DeviceRecord {
                        device_id,
                        short_id: None,
                        online: true,
                        version,
                        join_request_time: now_ms,
                        join_request_count: 1,
                        last_seen_time: now_ms,
                        battery_level: 0,
                        reset_pending: false,
                    },
                );
            }
            Some(record) => {
                record.join_request_count = record.join_request_count.saturating_add(1);
                record.last_seen_time = now_ms;
                record.version = version;
                debug!(
                    device_id = format_args!("{device_id:#010x}"),
                    announces = record.join_request_count,
                    "repeat announce"
                );
            }
        }
    }

    /// Whether an Announce from this device should trigger a short-id offer
    pub fn should_assign_short_id(&self, device_id: u32) -> bool {
        self.devices
            .get(&device_id)
            .map(|r| r.short_id.is_none() && r.join_request_count <= ANNOUNCE_COUNT_LIMIT)
            .unwrap_or(false)
    }

    /// Allocates a short id for the device
    ///
    /// Idempotent for a device that already holds one. Fails with
    /// `PoolExhausted` when no ids remain and with `EnrollmentRefused` once
    /// the device has announced more than `ANNOUNCE_COUNT_LIMIT` times.
    pub fn assign_short_id(&mut self, device_id: u32, now_ms: u32) -> Result<u8> {
        let record = self
            .devices
            .get_mut(&device_id)
            .ok_or(Error::EnrollmentRefused {
                device_id,
                announce_count: 0,
            })?;

        if let Some(short_id) = record.short_id {
            return Ok(short_id);
        }
        if record.join_request_count > ANNOUNCE_COUNT_LIMIT {
            return Err(Error::EnrollmentRefused {
                device_id,
                announce_count: record.join_request_count,
            });
        }
        let short_id = *self
            .available_short_ids
            .iter()
            .next()
            .ok_or(Error::PoolExhausted)?;
        self.available_short_ids.remove(&short_id);
        record.short_id = Some(short_id);
        record.last_seen_time = now_ms;
        info!(
            device_id = format_args!("{device_id:#010x}"),
            short_id, "assigned short id"
        );
        Ok(short_id)
    }

    /// Finalizes enrollment after the slave confirmed its short id
    pub fn confirm_short_id(&mut self, device_id: u32, short_id: u8, now_ms: u32) {
        if let Some(record) = self.devices.get_mut(&device_id) {
            if record.short_id != Some(short_id) {
                // The slave echoes what it accepted; trust the wire
                if let Some(previous) = record.short_id {
                    self.available_short_ids.insert(previous);
                }
                self.available_short_ids.remove(&short_id);
                record.short_id = Some(short_id);
            }
            record.online = true;
            record.last_seen_time = now_ms;
            self.connected.insert(device_id, true);
            info!(
                device_id = format_args!("{device_id:#010x}"),
                short_id, "device joined the network"
            );
        }
    }

    /// Refreshes the last-seen time of a device
    pub fn touch(&mut self, device_id: u32, now_ms: u32) {
        if let Some(record) = self.devices.get_mut(&device_id) {
            record.last_seen_time = now_ms;
            record.online = true;
        }
    }

    /// Stores the battery level a device reported
    pub fn update_battery_level(&mut self, device_id: u32, battery_level: u8) {
        if let Some(record) = self.devices.get_mut(&device_id) {
            record.battery_level = battery_level.min(100);
        }
    }

    /// Removes one device, releasing its short id
    pub fn remove_device(&mut self, device_id: u32) {
        if let Some(record) = self.devices.remove(&device_id) {
            if let Some(short_id) = record.short_id {
                self.available_short_ids.insert(short_id);
            }
            self.connected.remove(&device_id);
            info!(device_id = format_args!("{device_id:#010x}"), "device removed");
        }
    }

    /// Removes devices not heard from within `timeout_ms`, returning their ids
    pub fn cleanup_expired(&mut self, timeout_ms: u32, now_ms: u32) -> Vec<u32> {
        let expired: Vec<u32> = self
            .devices
            .values()
            .filter(|r| now_ms.wrapping_sub(r.last_seen_time) > timeout_ms)
            .map(|r| r.device_id)
            .collect();
        for device_id in &expired {
            warn!(
                device_id = format_args!("{device_id:#010x}"),
                timeout_ms, "device expired"
            );
            self.remove_device(*device_id);
        }
        expired
    }

    /// Wipes all device state; configs and the short-id pool reset with it
    pub fn clear_all_devices(&mut self) {
        self.devices.clear();
        self.connected.clear();
        self.available_short_ids = (SHORT_ID_START..=SHORT_ID_MAX).collect();
        self.configs.clear();
        self.config_order.clear();
        info!("device registry cleared");
    }

    /// Looks up one record
    pub fn device(&self, device_id: u32) -> Option<&DeviceRecord> {
        self.devices.get(&device_id)
    }

    /// Snapshot of every known device, offline included
    pub fn device_summaries(&self) -> Vec<DeviceSummary> {
        let mut summaries: Vec<DeviceSummary> = self
            .devices
            .values()
            .map(|r| DeviceSummary {
                device_id: r.device_id,
                short_id: r.short_id.unwrap_or(0),
                online: r.online,
                version: r.version,
            })
            .collect();
        summaries.sort_by_key(|s| s.device_id);
        summaries
    }

    /// Ids currently in the short-id pool (test and diagnostics hook)
    pub fn available_short_ids(&self) -> &BTreeSet<u8> {
        &self.available_short_ids
    }

    // ---- connection & configuration --------------------------------------

    /// Marks a device connected without touching enrollment state
    pub fn mark_connected(&mut self, device_id: u32) {
        self.connected.insert(device_id, true);
    }

    /// Whether the device is currently connected
    pub fn is_connected(&self, device_id: u32) -> bool {
        self.connected.get(&device_id).copied().unwrap_or(false)
    }

    /// All connected device ids, unordered
    pub fn connected_slaves(&self) -> Vec<u32> {
        self.connected
            .iter()
            .filter(|(_, &up)| up)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Connected devices in the order the backend configured them
    ///
    /// This order assigns TDMA slots; it is prefix-stable as devices come
    /// and go without reconfiguration.
    pub fn connected_slaves_in_config_order(&self) -> Vec<u32> {
        self.config_order
            .iter()
            .copied()
            .filter(|id| self.is_connected(*id))
            .collect()
    }

    /// Stores a per-slave configuration, appending to the config order on
    /// first sight and marking the slave connected
    pub fn set_slave_config(&mut self, config: SlaveConfigEntry) {
        if !self.config_order.contains(&config.id) {
            self.config_order.push(config.id);
        }
        self.configs.insert(config.id, config);
        self.mark_connected(config.id);
    }

    /// Looks up a per-slave configuration
    pub fn slave_config(&self, device_id: u32) -> Option<&SlaveConfigEntry> {
        self.configs.get(&device_id)
    }

    /// Whether a configuration exists for the device
    pub fn has_slave_config(&self, device_id: u32) -> bool {
        self.configs.contains_key(&device_id)
    }

    /// Drops all per-slave configurations and their order
    pub fn clear_slave_configs(&mut self) {
        self.configs.clear();
        self.config_order.clear();
    }

    // ---- reset flags ------------------------------------------------------

    /// Flags a device for reset on the next opportunity
    pub fn mark_for_reset(&mut self, device_id: u32) {
        if let Some(record) = self.devices.get_mut(&device_id) {
            record.reset_pending = true;
        }
    }

    /// Clears the reset flag once the device acknowledged
    pub fn clear_reset_flag(&mut self, device_id: u32) {
        if let Some(record) = self.devices.get_mut(&device_id) {
            record.reset_pending = false;
        }
    }

    /// Whether the device still has a reset pending
    pub fn is_marked_for_reset(&self, device_id: u32) -> bool {
        self.devices
            .get(&device_id)
            .map(|r| r.reset_pending)
            .unwrap_or(false)
    }

    /// Clears every reset flag
    pub fn clear_all_reset_flags(&mut self) {
        for record in self.devices.values_mut() {
            record.reset_pending = false;
        }
    }

    // ---- mode, status, interval, collection -------------------------------

    /// Sets the detection mode
    pub fn set_mode(&mut self, mode: DetectionMode) {
        self.mode = mode;
    }

    /// Current detection mode
    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    /// Sets the system running status
    pub fn set_system_status(&mut self, status: SystemStatus) {
        self.system_status = status;
    }

    /// Current system running status
    pub fn system_status(&self) -> SystemStatus {
        self.system_status
    }

    /// Overrides the acquisition interval (0 restores the default)
    pub fn set_configured_interval(&mut self, interval_ms: u8) {
        self.configured_interval_ms = interval_ms;
    }

    /// Interval to use: the configured one, or the compiled default
    pub fn effective_interval_ms(&self) -> u8 {
        if self.configured_interval_ms > 0 {
            self.configured_interval_ms
        } else {
            DEFAULT_INTERVAL_MS
        }
    }

    /// Starts a collection cycle if at least one configured slave is
    /// connected; returns whether collection is now active
    pub fn start_collection(&mut self) -> bool {
        let has_ready_slave = self
            .configs
            .keys()
            .any(|id| self.connected.get(id).copied().unwrap_or(false));
        self.collection_active = has_ready_slave;
        self.cycle = if has_ready_slave {
            CollectionCycle::Collecting
        } else {
            CollectionCycle::Idle
        };
        debug!(active = self.collection_active, "collection start requested");
        self.collection_active
    }

    /// Stops any collection cycle
    pub fn reset_collection(&mut self) {
        self.collection_active = false;
        self.cycle = CollectionCycle::Idle;
    }

    /// Whether a collection cycle is active
    pub fn is_collection_active(&self) -> bool {
        self.collection_active
    }

    /// Current collection cycle state
    pub fn cycle_state(&self) -> CollectionCycle {
        self.cycle
    }

    /// Sum of conduction test points over connected configured slaves
    pub fn total_conduction_num(&self) -> u32 {
        self.connected_slaves_in_config_order()
            .iter()
            .filter_map(|id| self.configs.get(id))
            .map(|c| u32::from(c.conduction_num))
            .sum()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV_A: u32 = 0x1122_3344;
    const DEV_B: u32 = 0x5566_7788;
    const V1: FirmwareVersion = FirmwareVersion {
        major: 1,
        minor: 0,
        patch: 0,
    };

    fn pool_is_consistent(registry: &DeviceRegistry) {
        let assigned: BTreeSet<u8> = registry
            .devices
            .values()
            .filter_map(|r| r.short_id)
            .collect();
        let pool = registry.available_short_ids();
        assert!(assigned.is_disjoint(pool), "assigned ids leaked into pool");
        assert_eq!(
            assigned.len() + pool.len(),
            usize::from(SHORT_ID_MAX - SHORT_ID_START) + 1,
            "ids lost or duplicated"
        );
    }

    #[test]
    fn test_assign_pops_smallest_available() {
        let mut registry = DeviceRegistry::new();
        registry.record_announce(DEV_A, V1, 0);
        registry.record_announce(DEV_B, V1, 0);

        assert_eq!(registry.assign_short_id(DEV_A, 0).unwrap(), 1);
        assert_eq!(registry.assign_short_id(DEV_B, 0).unwrap(), 2);
        // Idempotent for an already-assigned device
        assert_eq!(registry.assign_short_id(DEV_A, 0).unwrap(), 1);
        pool_is_consistent(&registry);
    }

    #[test]
    fn test_removal_returns_id_to_pool() {
        let mut registry = DeviceRegistry::new();
        registry.record_announce(DEV_A, V1, 0);
        registry.record_announce(DEV_B, V1, 0);
        registry.assign_short_id(DEV_A, 0).unwrap();
        registry.assign_short_id(DEV_B, 0).unwrap();

        registry.remove_device(DEV_A);
        pool_is_consistent(&registry);
        assert!(registry.available_short_ids().contains(&1));

        // The freed id is reused first
        registry.record_announce(0x9999_9999, V1, 0);
        assert_eq!(registry.assign_short_id(0x9999_9999, 0).unwrap(), 1);
    }

    #[test]
    fn test_announce_limit_refuses_enrollment() {
        let mut registry = DeviceRegistry::new();
        for _ in 0..=ANNOUNCE_COUNT_LIMIT {
            registry.record_announce(DEV_A, V1, 0);
        }
        assert!(!registry.should_assign_short_id(DEV_A));
        assert!(matches!(
            registry.assign_short_id(DEV_A, 0),
            Err(Error::EnrollmentRefused { .. })
        ));
        pool_is_consistent(&registry);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut registry = DeviceRegistry::new();
        for i in 0..usize::from(SHORT_ID_MAX) {
            let id = 0x1000 + i as u32;
            registry.record_announce(id, V1, 0);
            registry.assign_short_id(id, 0).unwrap();
        }
        registry.record_announce(0xFFFF, V1, 0);
        assert!(matches!(
            registry.assign_short_id(0xFFFF, 0),
            Err(Error::PoolExhausted)
        ));
        pool_is_consistent(&registry);
    }

    #[test]
    fn test_expiry_cleanup() {
        let mut registry = DeviceRegistry::new();
        registry.record_announce(DEV_A, V1, 0);
        registry.assign_short_id(DEV_A, 0).unwrap();
        registry.confirm_short_id(DEV_A, 1, 0);

        // Still fresh at the timeout boundary
        assert!(registry.cleanup_expired(90_000, 90_000).is_empty());

        let removed = registry.cleanup_expired(90_000, 90_001);
        assert_eq!(removed, vec![DEV_A]);
        assert!(registry.device(DEV_A).is_none());
        assert!(!registry.is_connected(DEV_A));
        assert!(registry.available_short_ids().contains(&1));
        pool_is_consistent(&registry);
    }

    #[test]
    fn test_config_order_is_prefix_stable() {
        let mut registry = DeviceRegistry::new();
        for id in [10, 20, 30] {
            registry.set_slave_config(SlaveConfigEntry {
                id,
                conduction_num: 1,
                resistance_num: 1,
                clip_mode: 0,
                clip_status: 0,
            });
        }
        assert_eq!(registry.connected_slaves_in_config_order(), vec![10, 20, 30]);

        // A disconnecting slave drops out without disturbing the others
        registry.connected.insert(20, false);
        assert_eq!(registry.connected_slaves_in_config_order(), vec![10, 30]);

        // Reconfiguring an existing slave does not move it
        registry.set_slave_config(SlaveConfigEntry {
            id: 10,
            conduction_num: 9,
            resistance_num: 1,
            clip_mode: 0,
            clip_status: 0,
        });
        registry.connected.insert(20, true);
        assert_eq!(registry.connected_slaves_in_config_order(), vec![10, 20, 30]);
    }

    #[test]
    fn test_collection_requires_configured_connected_slave() {
        let mut registry = DeviceRegistry::new();
        assert!(!registry.start_collection());
        assert_eq!(registry.cycle_state(), CollectionCycle::Idle);

        registry.set_slave_config(SlaveConfigEntry {
            id: DEV_A,
            conduction_num: 4,
            resistance_num: 0,
            clip_mode: 0,
            clip_status: 0,
        });
        assert!(registry.start_collection());
        assert_eq!(registry.cycle_state(), CollectionCycle::Collecting);

        registry.reset_collection();
        assert!(!registry.is_collection_active());
    }

    #[test]
    fn test_total_conduction_counts_connected_only() {
        let mut registry = DeviceRegistry::new();
        registry.set_slave_config(SlaveConfigEntry {
            id: DEV_A,
            conduction_num: 4,
            resistance_num: 0,
            clip_mode: 0,
            clip_status: 0,
        });
        registry.set_slave_config(SlaveConfigEntry {
            id: DEV_B,
            conduction_num: 6,
            resistance_num: 0,
            clip_mode: 0,
            clip_status: 0,
        });
        assert_eq!(registry.total_conduction_num(), 10);

        registry.connected.insert(DEV_B, false);
        assert_eq!(registry.total_conduction_num(), 4);
    }

    #[test]
    fn test_clear_all_devices_resets_pool_and_configs() {
        let mut registry = DeviceRegistry::new();
        registry.record_announce(DEV_A, V1, 0);
        registry.assign_short_id(DEV_A, 0).unwrap();
        registry.set_slave_config(SlaveConfigEntry {
            id: DEV_A,
            conduction_num: 1,
            resistance_num: 0,
            clip_mode: 0,
            clip_status: 0,
        });

        registry.clear_all_devices();
        assert!(registry.device(DEV_A).is_none());
        assert!(registry.connected_slaves().is_empty());
        assert!(!registry.has_slave_config(DEV_A));
        assert_eq!(
            registry.available_short_ids().len(),
            usize::from(SHORT_ID_MAX - SHORT_ID_START) + 1
        );
    }

    #[test]
    fn test_reset_flags() {
        let mut registry = DeviceRegistry::new();
        registry.record_announce(DEV_A, V1, 0);
        registry.mark_for_reset(DEV_A);
        assert!(registry.is_marked_for_reset(DEV_A));
        registry.clear_reset_flag(DEV_A);
        assert!(!registry.is_marked_for_reset(DEV_A));
    }

    #[test]
    fn test_battery_level_clamped() {
        let mut registry = DeviceRegistry::new();
        registry.record_announce(DEV_A, V1, 0);
        registry.update_battery_level(DEV_A, 250);
        assert_eq!(registry.device(DEV_A).unwrap().battery_level, 100);
    }
}
