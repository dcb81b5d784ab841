//! Runs a master node against an in-process radio and prints what happens.
//!
//! A real deployment provides a `RadioLink` backed by the UWB driver; here a
//! channel-backed radio plays the air, one scripted slave enrolls, and the
//! coordinator's traffic is visible through the tracing output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use whts_master::core::FirmwareVersion;
use whts_master::coordinator::Indicator;
use whts_master::network::ChannelRadio;
use whts_master::protocol::{ProtocolProcessor, SlaveMessage};
use whts_master::{MasterConfig, MasterServer};

/// Stands in for the status GPIO
struct StatusLed(AtomicBool);

impl Indicator for StatusLed {
    fn toggle(&self) {
        self.0.fetch_xor(true, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> whts_master::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whts_master=debug".into()),
        )
        .init();

    let (radio, mut peer) = ChannelRadio::pair();
    let config = MasterConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        backend_addr: "127.0.0.1:8080".parse().unwrap(),
        ..MasterConfig::default()
    };

    let led = Arc::new(StatusLed(AtomicBool::new(false)));
    let server = Arc::new(
        MasterServer::new(config, radio)
            .await?
            .with_indicator(led),
    );
    println!("backend socket bound at {}", server.backend_local_addr()?);
    tokio::spawn(server.run());

    // One slave announces itself and confirms whatever id it is offered
    let packer = ProtocolProcessor::new();
    let device_id = 0x1122_3344;
    for frame in packer.pack_slave_to_master(
        device_id,
        &SlaveMessage::Announce {
            device_id,
            version: FirmwareVersion::new(1, 0, 0),
        },
    ) {
        peer.to_master.send(frame).expect("radio closed");
    }

    if let Some(buf) = peer.from_master.recv().await {
        let mut processor = ProtocolProcessor::new();
        processor.process_received(&buf);
        if let Some((_, payload)) = processor.next_complete_packet() {
            let short_id = payload[5];
            println!("master offered short id {short_id}");
            for frame in packer.pack_slave_to_master(
                device_id,
                &SlaveMessage::ShortIdConfirm {
                    status: 0,
                    short_id,
                },
            ) {
                peer.to_master.send(frame).expect("radio closed");
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("slave {device_id:#010x} enrolled; ctrl-c to exit");
    tokio::signal::ctrl_c().await?;
    Ok(())
}
