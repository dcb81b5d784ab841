use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::{
    Error, Result, FRAME_LEN_MAX, MAX_CONSECUTIVE_UWB_FAILURES, UWB_FAILURE_RESET_INTERVAL_MS,
};
use crate::time::Clock;

/// UWB radio driver surface
///
/// The physical driver offers a blocking send and a timed receive of frames
/// up to [`FRAME_LEN_MAX`] bytes; implementations adapt that to async.
pub trait RadioLink: Send + Sync {
    /// Transmits one physical frame
    async fn send(&self, data: &[u8]) -> Result<()>;
    /// Receives one physical frame, or `None` on timeout
    async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// Failure-suppressing wrapper around a radio
///
/// Counts consecutive send failures; once the count reaches
/// `MAX_CONSECUTIVE_UWB_FAILURES`, sends fail fast with `RadioSuppressed`
/// until `UWB_FAILURE_RESET_INTERVAL_MS` of quiet has passed. A successful
/// send clears the count.
pub struct RadioGuard<R: RadioLink> {
    inner: R,
    clock: Arc<dyn Clock>,
    consecutive_failures: AtomicU32,
    last_failure_ms: AtomicU32,
}

impl<R: RadioLink> RadioGuard<R> {
    /// Wraps a radio with the suppression policy
    pub fn new(inner: R, clock: Arc<dyn Clock>) -> Self {
        RadioGuard {
            inner,
            clock,
            consecutive_failures: AtomicU32::new(0),
            last_failure_ms: AtomicU32::new(0),
        }
    }

    /// Sends one frame, applying the suppression policy
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let now = self.clock.now_ms();

        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures > 0 {
            let last = self.last_failure_ms.load(Ordering::Relaxed);
            if now.wrapping_sub(last) > UWB_FAILURE_RESET_INTERVAL_MS {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            } else if failures >= MAX_CONSECUTIVE_UWB_FAILURES {
                warn!(failures, "radio transmission suppressed");
                return Err(Error::RadioSuppressed {
                    consecutive_failures: failures,
                });
            }
        }

        match self.inner.send(data).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                self.last_failure_ms.store(now, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Receives one frame from the underlying radio
    pub async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.inner.recv(timeout).await
    }

    /// Whether sends are currently suppressed
    pub fn is_suppressed(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= MAX_CONSECUTIVE_UWB_FAILURES
    }

    /// Periodic health check hook driven by the tick loop
    pub fn health_check(&self) {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures > 0 {
            warn!(failures, "radio health check: send failures pending");
        } else {
            info!("radio health check ok");
        }
    }
}

/// In-process radio backed by channels, for tests and demos
///
/// `ChannelRadio::pair` returns the radio and a [`RadioPeer`] representing
/// the far side of the air: frames the master transmits arrive on the peer,
/// and frames injected through the peer arrive at the master.
pub struct ChannelRadio {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Far side of a [`ChannelRadio`]
pub struct RadioPeer {
    /// Frames transmitted by the master
    pub from_master: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Injects frames as if slaves had transmitted them
    pub to_master: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelRadio {
    /// Creates a connected radio / peer pair
    pub fn pair() -> (Self, RadioPeer) {
        let (master_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, master_rx) = mpsc::unbounded_channel();
        (
            ChannelRadio {
                tx: master_tx,
                rx: Mutex::new(master_rx),
            },
            RadioPeer {
                from_master: peer_rx,
                to_master: peer_tx,
            },
        )
    }
}

impl RadioLink for ChannelRadio {
    async fn send(&self, data: &[u8]) -> Result<()> {
        if data.len() > FRAME_LEN_MAX {
            return Err(Error::send(format!(
                "radio frame of {} bytes exceeds {FRAME_LEN_MAX}",
                data.len()
            )));
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| Error::send("radio peer gone"))
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => Ok(None),
            Ok(Some(data)) => Ok(Some(data)),
        }
    }
}
