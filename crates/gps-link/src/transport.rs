//! Write side of a session
//!
//! Every frame leaving the host goes through [`Transport`]: caller requests,
//! the reader's ACK/NAK replies, watchdog NAKs and retries. One async lock
//! guards the writer so frames never interleave on the wire.
//!
//! Acknowledged sends register a waiter keyed by packet id in the ACK table
//! before writing; the reader resolves it when the matching ACK or NAK
//! arrives.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use gps_protocol::Packet;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};

use crate::error::LinkError;
use crate::events::GpsEvent;

/// Boxed write half of the byte stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared, serialized writer plus the ACK table
pub struct Transport {
    writer: AsyncMutex<Option<BoxedWriter>>,
    acks: Mutex<HashMap<u8, oneshot::Sender<bool>>>,
    ack_gate: AsyncMutex<()>,
    events: broadcast::Sender<GpsEvent>,
    ack_timeout: Duration,
    max_attempts: u32,
}

impl Transport {
    pub fn new(
        writer: BoxedWriter,
        events: broadcast::Sender<GpsEvent>,
        ack_timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            writer: AsyncMutex::new(Some(writer)),
            acks: Mutex::new(HashMap::new()),
            ack_gate: AsyncMutex::new(()),
            events,
            ack_timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Write one packet without waiting for an answer
    pub async fn send(&self, packet: &Packet) -> Result<(), LinkError> {
        let frame = packet.encode()?;
        {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(LinkError::Closed)?;
            writer.write_all(&frame).await?;
            writer.flush().await?;
        }
        trace!("Sent packet 0x{:02X}: {:02X?}", packet.id, frame);
        let _ = self.events.send(GpsEvent::FrameOut { data: frame });
        Ok(())
    }

    /// Write a packet and wait for the device to acknowledge it
    ///
    /// A NAK or a missing answer resends the packet, up to the configured
    /// number of attempts. Running out of attempts is `Ok(false)`, not an
    /// error.
    pub async fn send_acknowledged(&self, packet: &Packet) -> Result<bool, LinkError> {
        let _gate = self.ack_gate.lock().await;

        for attempt in 1..=self.max_attempts {
            let (tx, rx) = oneshot::channel();
            self.lock_acks().insert(packet.id, tx);

            if let Err(e) = self.send(packet).await {
                self.lock_acks().remove(&packet.id);
                return Err(e);
            }

            match tokio::time::timeout(self.ack_timeout, rx).await {
                Ok(Ok(true)) => return Ok(true),
                Ok(Ok(false)) => {
                    warn!(
                        "Packet 0x{:02X} rejected (attempt {}/{})",
                        packet.id, attempt, self.max_attempts
                    );
                }
                Ok(Err(_)) => return Err(LinkError::Closed),
                Err(_) => {
                    self.lock_acks().remove(&packet.id);
                    warn!(
                        "No answer to packet 0x{:02X} (attempt {}/{})",
                        packet.id, attempt, self.max_attempts
                    );
                }
            }
        }

        warn!(
            "Giving up on packet 0x{:02X} after {} attempts",
            packet.id, self.max_attempts
        );
        Ok(false)
    }

    /// Route an ACK (`accepted`) or NAK for `id` to its waiter
    pub fn resolve_handshake(&self, id: u8, accepted: bool) -> bool {
        match self.lock_acks().remove(&id) {
            Some(tx) => tx.send(accepted).is_ok(),
            None => {
                debug!(
                    "Unsolicited {} for packet 0x{:02X}",
                    if accepted { "ACK" } else { "NAK" },
                    id
                );
                false
            }
        }
    }

    /// Drop the writer and fail every pending acknowledged send
    pub async fn close(&self) {
        self.lock_acks().clear();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down writer: {}", e);
            }
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }

    fn lock_acks(&self) -> std::sync::MutexGuard<'_, HashMap<u8, oneshot::Sender<bool>>> {
        self.acks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
