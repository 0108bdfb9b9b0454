//! Read watchdog
//!
//! The reader arms the watchdog right before each blocking read and
//! disarms it when a frame completes. If the line stays quiet for the
//! configured period while armed, the watchdog sends one NAK carrying the id
//! of the frame being read (0 between frames) so the device retransmits,
//! then stays silent until it is armed again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gps_protocol::Packet;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Idle,
    /// `generation` changes on every arm so a re-arm restarts the timer
    Armed { id: u8, generation: u64 },
}

/// Handle the reader uses to arm and disarm the watchdog
#[derive(Debug)]
pub struct Watchdog {
    tx: watch::Sender<WatchState>,
    generation: AtomicU64,
}

impl Watchdog {
    /// Create the handle and the receiver for [`run_watchdog_task`]
    pub fn new() -> (Self, WatchdogReceiver) {
        let (tx, rx) = watch::channel(WatchState::Idle);
        (
            Self {
                tx,
                generation: AtomicU64::new(0),
            },
            WatchdogReceiver(rx),
        )
    }

    /// Start (or restart) the quiet period for frame `id`
    pub fn arm(&self, id: u8) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.tx.send_replace(WatchState::Armed { id, generation });
    }

    pub fn disarm(&self) {
        self.tx.send_if_modified(|state| {
            let changed = *state != WatchState::Idle;
            *state = WatchState::Idle;
            changed
        });
    }
}

/// Receiving end owned by the watchdog task
#[derive(Debug)]
pub struct WatchdogReceiver(watch::Receiver<WatchState>);

/// Run the watchdog until shutdown or until the handle is dropped
pub async fn run_watchdog_task(
    receiver: WatchdogReceiver,
    transport: Arc<Transport>,
    quiet: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rx = receiver.0;
    debug!("Watchdog started, quiet period {:?}", quiet);

    loop {
        let state = *rx.borrow_and_update();
        match state {
            WatchState::Idle => {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            WatchState::Armed { id, .. } => {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(quiet) => {
                        warn!("No data for {:?} while reading frame 0x{:02X}, sending NAK", quiet, id);
                        if let Err(e) = transport.send(&Packet::nak(id)).await {
                            info!("Watchdog could not send NAK: {}", e);
                            break;
                        }
                        // Stay quiet until the reader arms or disarms again
                        tokio::select! {
                            changed = rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                            _ = shutdown.changed() => break,
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    debug!("Watchdog stopped");
}
