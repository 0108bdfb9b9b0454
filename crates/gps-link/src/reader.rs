//! Reader task
//!
//! Owns the read half of the stream. Every complete frame is answered
//! before it is handled: a NAK for a corrupt frame, an ACK for any packet
//! other than an ACK/NAK. ACK/NAK packets resolve pending acknowledged
//! sends. The watchdog is armed before every read, with the id of the frame
//! in progress or 0 between frames, and disarmed as each frame completes.

use std::sync::Arc;

use gps_protocol::packet::PID_ACK;
use gps_protocol::{DecodeEvent, FrameDecoder, Packet};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::dispatch::Dispatcher;
use crate::events::GpsEvent;
use crate::session::Shared;
use crate::watchdog::Watchdog;

const READ_BUFFER_LEN: usize = 1024;

/// Read and dispatch until the stream ends or the session closes
pub(crate) async fn run_reader_task<R>(
    mut reader: R,
    shared: Arc<Shared>,
    watchdog: Watchdog,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut dispatcher = Dispatcher::new(shared.clone());
    let mut buf = [0u8; READ_BUFFER_LEN];
    debug!("Reader started");

    let disconnect = loop {
        watchdog.arm(decoder.current_id().unwrap_or(0));
        let screen_deadline = dispatcher.screen_deadline();

        tokio::select! {
            _ = shutdown.changed() => break None,
            _ = sleep_until(screen_deadline.unwrap_or_else(Instant::now)), if screen_deadline.is_some() => {
                dispatcher.on_screen_stalled().await;
            }
            result = reader.read(&mut buf) => {
                let n = match result {
                    Ok(0) => break Some("stream closed".to_string()),
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Read error: {}", e);
                        break Some(format!("read error: {}", e));
                    }
                };
                trace!("Read {} bytes: {:02X?}", n, &buf[..n]);

                for &byte in &buf[..n] {
                    let Some(event) = decoder.push_byte(byte) else {
                        continue;
                    };
                    watchdog.disarm();
                    shared.publish(GpsEvent::FrameIn {
                        data: decoder.raw_frame().to_vec(),
                    });
                    handle_frame(&shared, &mut dispatcher, event).await;
                }
            }
        }
    };

    watchdog.disarm();
    if let Some(reason) = disconnect {
        if !shared.is_closed() {
            info!("Device disconnected: {}", reason);
            shared.publish(GpsEvent::Disconnected { reason });
        }
        shared.close().await;
    }
    debug!("Reader stopped");
}

async fn handle_frame(shared: &Shared, dispatcher: &mut Dispatcher, event: DecodeEvent) {
    match event {
        DecodeEvent::Corrupt { id, reason } => {
            warn!("Corrupt frame 0x{:02X}: {}", id, reason);
            dispatcher.on_corrupt(id);
            reply(shared, Packet::nak(id)).await;
        }
        DecodeEvent::Packet(packet) => {
            if packet.is_handshake() {
                match packet.handshake_target() {
                    Some(target) => {
                        shared.transport.resolve_handshake(target, packet.id == PID_ACK);
                    }
                    None => debug!("Handshake 0x{:02X} without target", packet.id),
                }
                return;
            }
            debug!(
                "Received packet 0x{:02X} ({} bytes)",
                packet.id,
                packet.payload.len()
            );
            reply(shared, Packet::ack(packet.id)).await;
            dispatcher.dispatch(packet).await;
        }
    }
}

async fn reply(shared: &Shared, packet: Packet) {
    if let Err(e) = shared.transport.send(&packet).await {
        debug!("Could not send handshake 0x{:02X}: {}", packet.id, e);
    }
}
