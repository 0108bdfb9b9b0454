//! Routes incoming packets to the slot waiting for them
//!
//! The dispatcher lives in the reader task and owns all per-transfer state:
//! the bulk assembler, the screenshot buffer and the file buffer. It never
//! waits on the device; the only thing it writes is the one screenshot
//! re-request after a corrupted transfer.
//!
//! A corrupt frame during a screenshot sets a settle deadline. Image data
//! pushes it out; if it passes first (the lost frame was the last one) the
//! reader calls [`Dispatcher::on_screen_stalled`] and the transfer is
//! retried or delivered as if it had completed.

use std::sync::Arc;

use gps_protocol::packet::{PID_PRODUCT_DATA, PID_PROTOCOL_ARRAY};
use gps_protocol::records::file::{decode_file_not_found, decode_unit_id};
use gps_protocol::records::time::decode_d600;
use gps_protocol::records::{
    DisplayAssembler, DisplayPacket, DisplayProgress, FileAssembler, FileChunk, FileHeader,
    FlashInfo, Position, ProductData, PvtFormat, UnlockResponse,
};
use gps_protocol::{Capabilities, Command, Packet, PacketKind};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::assembler::{AssemblerEvent, BlockKind, BulkAssembler, RecordFormats};
use crate::events::{GpsEvent, Operation, PositionFix};
use crate::session::Shared;

#[derive(Debug, Default)]
struct ScreenTransfer {
    active: bool,
    /// Slot generation the transfer belongs to
    generation: u64,
    corrupt: bool,
    retries_left: u32,
    settle_deadline: Option<Instant>,
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    bulk: BulkAssembler,
    formats_settled: bool,
    display: DisplayAssembler,
    screen: ScreenTransfer,
    file: FileAssembler,
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>) -> Self {
        let progress_interval = shared.config.progress_interval;
        Self {
            shared,
            bulk: BulkAssembler::new(RecordFormats::default(), progress_interval),
            formats_settled: false,
            display: DisplayAssembler::new(),
            screen: ScreenTransfer::default(),
            file: FileAssembler::new(),
        }
    }

    /// A frame failed to decode
    pub fn on_corrupt(&mut self, id: u8) {
        if self.screen.active {
            debug!("Corrupt frame 0x{:02X} during screenshot", id);
            self.screen.corrupt = true;
            self.settle_screen();
        }
    }

    /// When the reader should give up waiting for more screenshot data
    pub fn screen_deadline(&self) -> Option<Instant> {
        self.screen.settle_deadline.filter(|_| self.screen.active)
    }

    /// No display data arrived before the settle deadline
    pub async fn on_screen_stalled(&mut self) {
        self.screen.settle_deadline = None;
        if !self.screen.active {
            return;
        }
        warn!("Screenshot stalled after a corrupt frame");
        self.on_screen_complete().await;
    }

    fn settle_screen(&mut self) {
        self.screen.settle_deadline = Some(Instant::now() + self.shared.config.screenshot_settle());
    }

    /// Handle one valid, already acknowledged packet
    pub async fn dispatch(&mut self, packet: Packet) {
        match packet.id {
            PID_PRODUCT_DATA => match ProductData::decode(&packet.payload) {
                Ok(product) => {
                    self.shared.slots.product.deliver(product);
                }
                Err(e) => warn!("Bad product data: {}", e),
            },
            PID_PROTOCOL_ARRAY => match Capabilities::from_protocol_array(&packet.payload) {
                Ok(caps) => {
                    self.shared.slots.capabilities.deliver(caps);
                }
                Err(e) => warn!("Bad protocol array: {}", e),
            },
            id => match self.shared.link().classify(id) {
                Some(kind) => self.dispatch_kind(kind, &packet.payload).await,
                None => debug!("Unhandled packet 0x{:02X} ({} bytes)", id, packet.payload.len()),
            },
        }
    }

    async fn dispatch_kind(&mut self, kind: PacketKind, payload: &[u8]) {
        let slots = &self.shared.slots;
        match kind {
            kind if BulkAssembler::handles(kind) => self.on_bulk(kind, payload),
            PacketKind::PvtData => {
                let format = self
                    .shared
                    .capabilities
                    .get()
                    .and_then(Capabilities::pvt_format)
                    .unwrap_or(PvtFormat::D800);
                match format.decode(payload) {
                    Ok(pvt) => {
                        self.shared.publish(GpsEvent::Position(PositionFix::from(&pvt)));
                        if slots.pvt.is_waiting() {
                            slots.pvt.deliver(pvt);
                        }
                    }
                    Err(e) => warn!("Bad PVT record: {}", e),
                }
            }
            PacketKind::UnitId => match decode_unit_id(payload) {
                Ok(serial) => {
                    info!("Unit id {}", serial);
                    slots.serial.deliver(serial);
                }
                Err(e) => warn!("Bad unit id: {}", e),
            },
            PacketKind::DisplayData => self.on_display(payload).await,
            PacketKind::FileHeader => match FileHeader::decode(payload) {
                Ok(header) => {
                    debug!("Receiving file {:?}, {} bytes", header.name, header.size);
                    if let Some(content) = self.file.begin(header) {
                        slots.file.deliver(Some(content));
                    }
                }
                Err(e) => warn!("Bad file header: {}", e),
            },
            PacketKind::FileData => match FileChunk::decode(payload) {
                Ok(chunk) => {
                    if !self.file.is_active() {
                        debug!("File data without header, ignoring");
                    } else if let Some(content) = self.file.push(&chunk) {
                        debug!("File complete, {} bytes", content.len());
                        slots.file.deliver(Some(content));
                    }
                }
                Err(e) => warn!("Bad file data: {}", e),
            },
            PacketKind::FileNotFound => {
                warn!("Device has no file {:?}", decode_file_not_found(payload));
                self.file.reset();
                slots.file.deliver(None);
            }
            PacketKind::CapacityData => match FlashInfo::decode(payload) {
                Ok(info) => {
                    slots.flash.deliver(info);
                }
                Err(e) => warn!("Bad flash info: {}", e),
            },
            PacketKind::DateTimeData => match decode_d600(payload) {
                Ok(time) => {
                    slots.date_time.deliver(time);
                }
                Err(e) => warn!("Bad date/time record: {}", e),
            },
            PacketKind::PositionData => match Position::decode_d700(payload) {
                Ok(position) => {
                    slots.position.deliver(position);
                }
                Err(e) => warn!("Bad position record: {}", e),
            },
            PacketKind::UnlockResponse => match UnlockResponse::decode(payload) {
                Ok(response) => info!(
                    "Unlock {} {}",
                    if response.accepted { "accepted" } else { "rejected" },
                    response.code.as_deref().unwrap_or("")
                ),
                Err(e) => warn!("Bad unlock response: {}", e),
            },
            other => debug!("Ignoring host-side packet {:?} from device", other),
        }
    }

    fn on_bulk(&mut self, kind: PacketKind, payload: &[u8]) {
        if !self.formats_settled {
            if let Some(caps) = self.shared.capabilities.get() {
                self.bulk.set_formats(RecordFormats::from_capabilities(caps));
                self.formats_settled = true;
            }
        }

        let slots = &self.shared.slots;
        for event in self.bulk.push(kind, payload) {
            match event {
                AssemblerEvent::Started { total } => {
                    if let Some(operation) = self.pending_download() {
                        self.shared.publish(GpsEvent::OperationProgress {
                            operation,
                            done: 0,
                            total,
                        });
                    }
                }
                AssemblerEvent::Progress { kind, done, total } => {
                    self.shared.publish(GpsEvent::OperationProgress {
                        operation: download_operation(kind),
                        done,
                        total,
                    });
                }
                AssemblerEvent::Waypoints(waypoints) => {
                    info!("Received {} waypoints", waypoints.len());
                    slots.waypoints.deliver(waypoints);
                }
                AssemblerEvent::Routes(routes) => {
                    info!("Received {} routes", routes.len());
                    slots.routes.deliver(routes);
                }
                AssemblerEvent::Tracks(tracks) => {
                    info!("Received {} tracks", tracks.len());
                    slots.tracks.deliver(tracks);
                }
                AssemblerEvent::Empty => {
                    info!("Received an empty transfer");
                    if slots.waypoints.is_waiting() {
                        slots.waypoints.deliver(Vec::new());
                    }
                    if slots.routes.is_waiting() {
                        slots.routes.deliver(Vec::new());
                    }
                    if slots.tracks.is_waiting() {
                        slots.tracks.deliver(Vec::new());
                    }
                }
            }
        }
    }

    /// Download a caller is waiting for, if any
    fn pending_download(&self) -> Option<Operation> {
        let slots = &self.shared.slots;
        if slots.waypoints.is_waiting() {
            Some(Operation::GetWaypoints)
        } else if slots.routes.is_waiting() {
            Some(Operation::GetRoutes)
        } else if slots.tracks.is_waiting() {
            Some(Operation::GetTracks)
        } else {
            None
        }
    }

    async fn on_display(&mut self, payload: &[u8]) {
        let packet = match DisplayPacket::decode(payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Bad display data: {}", e);
                self.on_corrupt(0);
                return;
            }
        };

        let generation = self.shared.slots.screenshot.generation();
        if matches!(packet, DisplayPacket::Header(_))
            && (!self.screen.active || self.screen.generation != generation)
        {
            self.display.reset();
            self.screen = ScreenTransfer {
                active: true,
                generation,
                corrupt: false,
                retries_left: self.shared.config.screenshot_retries,
                settle_deadline: None,
            };
        } else if self.screen.settle_deadline.is_some() {
            self.settle_screen();
        }

        match self.display.push(&packet) {
            Ok(DisplayProgress::Pending) => {}
            Ok(DisplayProgress::Complete) => self.on_screen_complete().await,
            Err(e) => {
                warn!("Rejected display data: {}", e);
                self.on_corrupt(0);
            }
        }
    }

    async fn on_screen_complete(&mut self) {
        self.screen.settle_deadline = None;
        if self.screen.corrupt && self.screen.retries_left > 0 {
            self.screen.retries_left -= 1;
            self.screen.corrupt = false;
            warn!("Screenshot had corrupt frames, requesting it again");
            self.display.begin_overlay();
            if let Some(request) = self.shared.command_packet(Command::TransferScreenBitmap) {
                if let Err(e) = self.shared.transport.send(&request).await {
                    warn!("Could not request screenshot again: {}", e);
                }
            }
            return;
        }

        if self.screen.corrupt {
            warn!("Screenshot still has corrupt frames, delivering it as is");
        }
        self.screen.active = false;
        if let Some(bitmap) = self.display.take() {
            info!("Screenshot {}x{} received", bitmap.width, bitmap.height);
            self.shared.slots.screenshot.deliver(bitmap);
        }
    }
}

fn download_operation(kind: BlockKind) -> Operation {
    match kind {
        BlockKind::Waypoints => Operation::GetWaypoints,
        BlockKind::Routes => Operation::GetRoutes,
        BlockKind::Tracks => Operation::GetTracks,
    }
}
