//! The master server: three loops around the shared state
//!
//! - **RadioRx** drains the radio, forwards SLAVE→BACKEND buffers verbatim
//!   and dispatches reassembled SLAVE→MASTER messages.
//! - **BackendRx** drains the UDP socket and dispatches BACKEND→MASTER
//!   requests, ignoring every other class to avoid loopback.
//! - **Tick** runs every millisecond and drives, in order: command retries,
//!   ping sessions, backend-response correlation, the TDMA sync broadcast,
//!   device-presence aging and the radio health check.
//!
//! A fourth lightweight loop toggles a status indicator as a heartbeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info, warn};

use super::state::{CoordinatorState, PendingCommand};
use super::{correlation, handlers, ping, retry, slave_handlers, tdma};
use super::{CoordinatorOps, Directive};
use crate::core::{
    MasterConfig, Result, BROADCAST_SLAVE_ID, DEVICE_CLEANUP_INTERVAL_MS, DEVICE_TIMEOUT_MS,
    HEARTBEAT_PERIOD_MS, TICK_PERIOD_MS, UWB_HEALTH_CHECK_INTERVAL_MS,
};
use crate::network::{BackendLink, RadioGuard, RadioLink};
use crate::protocol::{
    BackendResponse, PacketClass, ProtocolProcessor, SlaveCommand,
};
use crate::time::{Clock, MonotonicClock};

/// Status indicator toggled by the heartbeat loop
pub trait Indicator: Send + Sync {
    /// Flips the indicator state
    fn toggle(&self);
}

/// Master coordinator bridging the backend and the slave fleet
pub struct MasterServer<R: RadioLink> {
    state: CoordinatorState,
    clock: Arc<dyn Clock>,
    config: MasterConfig,
    backend: BackendLink,
    radio: RadioGuard<R>,
    packer: ProtocolProcessor,
    indicator: Option<Arc<dyn Indicator>>,
}

impl<R: RadioLink> MasterServer<R> {
    /// Creates a server on the real monotonic clock
    pub async fn new(config: MasterConfig, radio: R) -> Result<Self> {
        Self::with_clock(config, radio, Arc::new(MonotonicClock::new())).await
    }

    /// Creates a server on an explicit clock (tests use a manual one)
    pub async fn with_clock(
        config: MasterConfig,
        radio: R,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let backend = BackendLink::bind(config.bind_addr, config.backend_addr).await?;
        Ok(MasterServer {
            state: CoordinatorState::new(),
            clock: clock.clone(),
            packer: ProtocolProcessor::with_mtu(config.mtu),
            config,
            backend,
            radio: RadioGuard::new(radio, clock),
            indicator: None,
        })
    }

    /// Attaches a status indicator for the heartbeat loop
    pub fn with_indicator(mut self, indicator: Arc<dyn Indicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    /// Local address of the backend socket
    pub fn backend_local_addr(&self) -> Result<std::net::SocketAddr> {
        self.backend.local_addr()
    }

    /// Runs all loops; does not return in normal operation
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("master server starting");
        tokio::join!(
            self.radio_rx_loop(),
            self.backend_rx_loop(),
            self.tick_loop(),
            self.heartbeat_loop(),
        );
        Ok(())
    }

    // ---- loops ------------------------------------------------------------

    /// Drains the radio and dispatches slave traffic
    async fn radio_rx_loop(&self) {
        debug!("radio rx loop started");
        let mut processor = ProtocolProcessor::with_mtu(self.config.mtu);
        loop {
            match self.radio.recv(Duration::from_millis(10)).await {
                Ok(None) => {}
                Ok(Some(buf)) => {
                    if ProtocolProcessor::contains_slave_to_backend_frame(&buf) {
                        // Measurement data: raw passthrough, no reassembly
                        if let Err(err) = self.backend.send(&buf).await {
                            warn!(%err, "slave data passthrough failed");
                        }
                        continue;
                    }
                    processor.process_received(&buf);
                    while let Some((class, payload)) = processor.next_complete_packet() {
                        self.handle_radio_packet(class, &payload).await;
                    }
                }
                Err(err) => {
                    warn!(%err, "radio receive failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Drains the UDP socket and dispatches backend traffic
    async fn backend_rx_loop(&self) {
        debug!("backend rx loop started");
        let mut processor = ProtocolProcessor::with_mtu(self.config.mtu);
        loop {
            match self.backend.recv(Duration::from_millis(10)).await {
                Ok(None) => {}
                Ok(Some((_src, buf))) => {
                    processor.process_received(&buf);
                    while let Some((class, payload)) = processor.next_complete_packet() {
                        if class == PacketClass::BackendToMaster as u8 {
                            self.handle_backend_packet(&payload).await;
                        } else {
                            // Forwarded slave data echoing back, or stray
                            // traffic; processing it would loop
                            debug!(class, "ignoring non-backend frame on udp");
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "udp receive failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Periodic engine driver
    async fn tick_loop(&self) {
        debug!("tick loop started");
        let mut tick = interval(Duration::from_millis(TICK_PERIOD_MS));
        let mut last_cleanup = self.clock.now_ms();
        let mut last_health = self.clock.now_ms();

        loop {
            tick.tick().await;
            let now = self.clock.now_ms();

            // 1. command retries
            let pass = retry::collect_due(&self.state, now);
            for (target_id, frames) in pass.resends {
                debug!(
                    target_id = format_args!("{target_id:#010x}"),
                    "retransmitting command"
                );
                if let Err(err) = self.send_frames_to_slave(&frames).await {
                    warn!(%err, "command retransmit failed");
                }
            }

            // 2. ping sessions
            for action in ping::advance_sessions(&self.state, now) {
                match action {
                    ping::PingAction::Probe { target_id, command } => {
                        if let Err(err) = self.send_command_to_slave(target_id, &command).await {
                            warn!(%err, "ping probe failed");
                        }
                    }
                    ping::PingAction::Finished(response) => {
                        self.send_response_to_backend(&response).await;
                    }
                }
            }

            // 3. backend-response correlation
            for response in correlation::process_pending_responses(&self.state, now) {
                self.send_response_to_backend(&response).await;
            }

            // 4. TDMA sync broadcast
            if let Some(sync) = tdma::next_sync(&self.state, now, self.clock.now_us()) {
                if let Err(err) = self.send_command_to_slave(BROADCAST_SLAVE_ID, &sync).await {
                    warn!(%err, "sync broadcast failed");
                }
            }

            // 5. presence aging
            if now.wrapping_sub(last_cleanup) >= DEVICE_CLEANUP_INTERVAL_MS {
                let removed = self
                    .state
                    .registry()
                    .cleanup_expired(DEVICE_TIMEOUT_MS, now);
                if !removed.is_empty() {
                    info!(count = removed.len(), "expired devices removed");
                }
                last_cleanup = now;
            }

            // 6. radio health
            if now.wrapping_sub(last_health) >= UWB_HEALTH_CHECK_INTERVAL_MS {
                self.radio.health_check();
                last_health = now;
            }
        }
    }

    /// Toggles the status indicator while the server lives
    async fn heartbeat_loop(&self) {
        let indicator = match &self.indicator {
            Some(indicator) => indicator.clone(),
            None => return,
        };
        let mut beat = interval(Duration::from_millis(HEARTBEAT_PERIOD_MS));
        loop {
            beat.tick().await;
            indicator.toggle();
        }
    }

    // ---- dispatch ---------------------------------------------------------

    /// Handles one reassembled packet that arrived over the radio
    async fn handle_radio_packet(&self, class: u8, payload: &[u8]) {
        match PacketClass::from_wire(class) {
            Some(PacketClass::SlaveToMaster) => {
                match ProtocolProcessor::parse_slave_to_master(payload) {
                    Ok((source_id, message)) => {
                        debug!(
                            source_id = format_args!("{source_id:#010x}"),
                            message_id = message.message_id(),
                            "slave message"
                        );
                        let directives = slave_handlers::execute(source_id, &message, self);
                        self.apply_directives(directives).await;
                    }
                    Err(err) => warn!(%err, "dropping malformed slave packet"),
                }
            }
            Some(PacketClass::SlaveToBackend) => {
                // Normally taken care of by the raw passthrough before
                // reassembly; nothing to do here
                debug!("slave data frame reached the reassembler");
            }
            _ => warn!(class, "unsupported packet class from radio"),
        }
    }

    /// Handles one reassembled BACKEND→MASTER packet
    async fn handle_backend_packet(&self, payload: &[u8]) {
        let message = match ProtocolProcessor::parse_backend_to_master(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dropping malformed backend packet");
                return;
            }
        };
        info!(message_id = message.message_id(), "backend request");

        let response = handlers::process(&message, self);
        let directives = handlers::execute(&message, self);
        if let Some(response) = response {
            self.send_response_to_backend(&response).await;
        }
        self.apply_directives(directives).await;
    }

    /// Performs the outbound work a handler requested
    async fn apply_directives(&self, directives: Vec<Directive>) {
        for directive in directives {
            match directive {
                Directive::Respond(response) => {
                    self.send_response_to_backend(&response).await;
                }
                Directive::Command {
                    target_id,
                    command,
                    max_retries,
                } => {
                    self.send_command_with_retry(target_id, &command, max_retries)
                        .await;
                }
                Directive::CommandOnce { target_id, command } => {
                    if let Err(err) = self.send_command_to_slave(target_id, &command).await {
                        warn!(%err, "command send failed");
                    }
                }
            }
        }
    }

    // ---- send paths -------------------------------------------------------

    /// Sends a response to the backend, aborting on the first failed fragment
    async fn send_response_to_backend(&self, response: &BackendResponse) {
        let frames = self.packer.pack_master_to_backend(response);
        debug!(
            message_id = response.message_id(),
            fragments = frames.len(),
            "sending backend response"
        );
        for frame in &frames {
            if let Err(err) = self.backend.send(frame).await {
                warn!(%err, "backend send failed, dropping remaining fragments");
                return;
            }
        }
    }

    /// Sends a command without retry tracking
    async fn send_command_to_slave(&self, target_id: u32, command: &SlaveCommand) -> Result<()> {
        let frames = self.packer.pack_master_to_slave(target_id, command);
        self.send_frames_to_slave(&frames).await
    }

    /// Sends a command and registers it for retries until confirmed
    async fn send_command_with_retry(
        &self,
        target_id: u32,
        command: &SlaveCommand,
        max_retries: u8,
    ) {
        let frames = self.packer.pack_master_to_slave(target_id, command);
        self.state.add_pending_command(PendingCommand {
            target_id,
            message_id: command.message_id(),
            frames: frames.clone(),
            sent_at: self.clock.now_ms(),
            retries_done: 0,
            max_retries,
        });
        if let Err(err) = self.send_frames_to_slave(&frames).await {
            // The entry is registered; the retry engine takes it from here
            warn!(%err, "initial command transmit failed");
        }
    }

    /// Transmits serialized frames in order, aborting on the first failure
    async fn send_frames_to_slave(&self, frames: &[Vec<u8>]) -> Result<()> {
        for frame in frames {
            self.radio.send(frame).await?;
        }
        Ok(())
    }
}

impl<R: RadioLink> CoordinatorOps for MasterServer<R> {
    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    fn state(&self) -> &CoordinatorState {
        &self.state
    }
}
