//! Virtual receiver actor task
//!
//! Owns a [`VirtualReceiver`] and one end of a byte stream. The select!
//! loop:
//! - decodes host frames, answers them through the receiver and NAKs
//!   damaged ones
//! - sends PVT periodically while the host has PVT data switched on
//! - handles [`ReceiverCommand`]s from tests

use std::io;
use std::time::Duration;

use gps_protocol::{DecodeEvent, FrameDecoder, Packet};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::VirtualReceiver;

/// Default period between streamed PVT reports
pub const PVT_INTERVAL: Duration = Duration::from_secs(1);

/// Commands that can be sent to a virtual receiver task
#[derive(Debug)]
pub enum ReceiverCommand {
    /// Write raw bytes as if the device produced them
    InjectBytes(Vec<u8>),
    /// Send a packet unprompted
    SendPacket(Packet),
    /// Return a copy of the receiver's current state
    Snapshot(oneshot::Sender<VirtualReceiver>),
    /// Stop the task
    Shutdown,
}

/// Run the virtual receiver until the stream closes or shutdown
///
/// Returns the receiver so callers can inspect its final state.
pub async fn run_virtual_receiver_task<S>(
    mut stream: S,
    mut receiver: VirtualReceiver,
    mut cmd_rx: mpsc::Receiver<ReceiverCommand>,
    pvt_interval: Duration,
) -> io::Result<VirtualReceiver>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];
    let mut pvt_timer = interval(pvt_interval);
    pvt_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Starting virtual receiver {}", receiver.product());

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                let n = match result {
                    Ok(0) => {
                        debug!("Virtual receiver stream closed");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Virtual receiver stream error: {}", e);
                        return Err(e);
                    }
                };
                receiver.record_bytes(n);

                for event in decoder.push_bytes(&buf[..n]) {
                    match event {
                        DecodeEvent::Packet(packet) => {
                            for frame in receiver.handle_packet(&packet) {
                                stream.write_all(&frame).await?;
                            }
                        }
                        DecodeEvent::Corrupt { id, reason } => {
                            warn!("Virtual receiver got a damaged frame 0x{:02X}: {}", id, reason);
                            stream.write_all(&encode(&Packet::nak(id))?).await?;
                        }
                    }
                }
                stream.flush().await?;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReceiverCommand::InjectBytes(bytes)) => {
                        stream.write_all(&bytes).await?;
                        stream.flush().await?;
                    }
                    Some(ReceiverCommand::SendPacket(packet)) => {
                        stream.write_all(&encode(&packet)?).await?;
                        stream.flush().await?;
                    }
                    Some(ReceiverCommand::Snapshot(reply)) => {
                        let _ = reply.send(receiver.clone());
                    }
                    Some(ReceiverCommand::Shutdown) => {
                        info!("Shutdown requested for virtual receiver");
                        break;
                    }
                    None => {
                        debug!("Command channel closed for virtual receiver");
                        break;
                    }
                }
            }

            _ = pvt_timer.tick(), if receiver.is_pvt_streaming() => {
                if let Some(packet) = receiver.pvt_packet() {
                    stream.write_all(&encode(&packet)?).await?;
                    stream.flush().await?;
                }
            }
        }
    }

    info!("Virtual receiver task ended");
    Ok(receiver)
}

fn encode(packet: &Packet) -> io::Result<Vec<u8>> {
    packet
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Handle to a spawned virtual receiver
#[derive(Debug)]
pub struct VirtualReceiverHandle {
    tx: mpsc::Sender<ReceiverCommand>,
    task: JoinHandle<io::Result<VirtualReceiver>>,
}

impl VirtualReceiverHandle {
    /// Current receiver state; `None` once the task has ended
    pub async fn snapshot(&self) -> Option<VirtualReceiver> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(ReceiverCommand::Snapshot(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn inject_bytes(&self, bytes: Vec<u8>) -> bool {
        self.tx.send(ReceiverCommand::InjectBytes(bytes)).await.is_ok()
    }

    pub async fn send_packet(&self, packet: Packet) -> bool {
        self.tx.send(ReceiverCommand::SendPacket(packet)).await.is_ok()
    }

    /// Stop the task and return the receiver's final state
    pub async fn shutdown(self) -> io::Result<VirtualReceiver> {
        let _ = self.tx.send(ReceiverCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

/// Spawn a receiver on one end of an in-memory duplex stream
///
/// Returns the host end of the stream and a handle to the receiver.
pub fn spawn_virtual_receiver(receiver: VirtualReceiver) -> (DuplexStream, VirtualReceiverHandle) {
    spawn_virtual_receiver_with_interval(receiver, PVT_INTERVAL)
}

pub fn spawn_virtual_receiver_with_interval(
    receiver: VirtualReceiver,
    pvt_interval: Duration,
) -> (DuplexStream, VirtualReceiverHandle) {
    let (host, device) = tokio::io::duplex(64 * 1024);
    let (tx, rx) = mpsc::channel(32);
    let task = tokio::spawn(run_virtual_receiver_task(device, receiver, rx, pvt_interval));
    (host, VirtualReceiverHandle { tx, task })
}
