//! Device session
//!
//! [`GpsSession`] owns one open device. Opening it splits the byte stream,
//! starts the reader and watchdog tasks, asks for product data and settles
//! the capability set. Every request afterwards follows the same shape:
//! check the capability, acquire the result slot, write the request and
//! wait for the reader to deliver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gps_protocol::packet::PID_PRODUCT_REQUEST;
use gps_protocol::records::{
    Bitmap, FileRequest, FlashInfo, Position, ProductData, Pvt, Route, RouteLink, Track, Waypoint,
};
use gps_protocol::{
    Capabilities, Command, CommandProtocol, LegacyDatabase, LinkProtocol, Packet, PacketKind,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::LinkError;
use crate::events::{GpsEvent, Operation};
use crate::reader::run_reader_task;
use crate::slot::ResultSlot;
use crate::transport::Transport;
use crate::watchdog::{run_watchdog_task, Watchdog};

/// One result slot per resource
pub(crate) struct Slots {
    pub product: ResultSlot<ProductData>,
    pub capabilities: ResultSlot<Capabilities>,
    pub waypoints: ResultSlot<Vec<Waypoint>>,
    pub routes: ResultSlot<Vec<Route>>,
    pub tracks: ResultSlot<Vec<Track>>,
    pub pvt: ResultSlot<Pvt>,
    pub screenshot: ResultSlot<Bitmap>,
    pub serial: ResultSlot<u32>,
    /// `None` when the device reports the file missing
    pub file: ResultSlot<Option<Vec<u8>>>,
    pub flash: ResultSlot<FlashInfo>,
    pub date_time: ResultSlot<DateTime<Utc>>,
    pub position: ResultSlot<Position>,
}

impl Slots {
    fn new() -> Self {
        Self {
            product: ResultSlot::new("product"),
            capabilities: ResultSlot::new("capabilities"),
            waypoints: ResultSlot::new("waypoints"),
            routes: ResultSlot::new("routes"),
            tracks: ResultSlot::new("tracks"),
            pvt: ResultSlot::new("PVT"),
            screenshot: ResultSlot::new("screenshot"),
            serial: ResultSlot::new("serial number"),
            file: ResultSlot::new("file"),
            flash: ResultSlot::new("flash info"),
            date_time: ResultSlot::new("date/time"),
            position: ResultSlot::new("position"),
        }
    }

    fn close_all(&self) {
        self.product.close();
        self.capabilities.close();
        self.waypoints.close();
        self.routes.close();
        self.tracks.close();
        self.pvt.close();
        self.screenshot.close();
        self.serial.close();
        self.file.close();
        self.flash.close();
        self.date_time.close();
        self.position.close();
    }
}

/// State shared by the session handle and its tasks
pub(crate) struct Shared {
    pub config: SessionConfig,
    pub transport: Arc<Transport>,
    pub slots: Slots,
    pub capabilities: OnceLock<Capabilities>,
    pub events: broadcast::Sender<GpsEvent>,
    pub pvt_streaming: AtomicBool,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    /// Link generation; L001 until capabilities are settled
    pub fn link(&self) -> LinkProtocol {
        self.capabilities
            .get()
            .map(Capabilities::link_protocol)
            .unwrap_or(LinkProtocol::L001)
    }

    pub fn command_protocol(&self) -> CommandProtocol {
        self.capabilities
            .get()
            .map(Capabilities::command_protocol)
            .unwrap_or(CommandProtocol::A010)
    }

    /// Command packet for `command`, if both generations allow it
    pub fn command_packet(&self, command: Command) -> Option<Packet> {
        let pid = self.link().pid(PacketKind::CommandData)?;
        let code = self.command_protocol().code(command)?;
        Some(Packet::new(pid, code.to_le_bytes().to_vec()))
    }

    pub fn publish(&self, event: GpsEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the tasks, wake every waiter and drop the writer
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing session");
        self.shutdown.send_replace(true);
        self.slots.close_all();
        self.transport.close().await;
    }
}

/// An open connection to one receiver
pub struct GpsSession {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    product: ProductData,
    capabilities: Capabilities,
}

impl GpsSession {
    /// Open a session over any byte stream and identify the device
    pub async fn open<S>(io: S, config: SessionConfig) -> Result<Self, LinkError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let transport = Arc::new(Transport::new(
            Box::new(write_half),
            events.clone(),
            config.ack_timeout(),
            config.max_send_attempts,
        ));
        let (shutdown, _) = watch::channel(false);
        let quiet = config.watchdog_quiet();
        let shared = Arc::new(Shared {
            config,
            transport: transport.clone(),
            slots: Slots::new(),
            capabilities: OnceLock::new(),
            events,
            pvt_streaming: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown,
        });

        let (watchdog, watchdog_rx) = Watchdog::new();
        let tasks = vec![
            tokio::spawn(run_reader_task(
                read_half,
                shared.clone(),
                watchdog,
                shared.shutdown.subscribe(),
            )),
            tokio::spawn(run_watchdog_task(
                watchdog_rx,
                transport,
                quiet,
                shared.shutdown.subscribe(),
            )),
        ];

        shared.publish(GpsEvent::OperationStarted {
            operation: Operation::Open,
            total: None,
        });
        let identified = identify(&shared).await;
        shared.publish(GpsEvent::OperationEnded {
            operation: Operation::Open,
            success: identified.is_ok(),
        });

        match identified {
            Ok((product, capabilities)) => {
                let _ = shared.capabilities.set(capabilities.clone());
                Ok(Self {
                    shared,
                    tasks: Mutex::new(tasks),
                    product,
                    capabilities,
                })
            }
            Err(e) => {
                shared.close().await;
                for task in tasks {
                    let _ = task.await;
                }
                Err(e)
            }
        }
    }

    /// Open a serial port and identify the device on it
    pub async fn open_serial(
        port_name: &str,
        baud_rate: u32,
        config: SessionConfig,
    ) -> Result<Self, LinkError> {
        info!("Opening {} at {} baud", port_name, baud_rate);
        let stream = tokio_serial::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open_native_async()?;
        Self::open(stream, config).await
    }

    pub fn product(&self) -> &ProductData {
        &self.product
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Receive session events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<GpsEvent> {
        self.shared.events.subscribe()
    }

    /// Close the session; later calls are no-ops
    pub async fn close(&self) {
        self.shared.close().await;
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                debug!("Session task ended abnormally: {}", e);
            }
        }
    }

    /// Download all waypoints; empty on timeout
    pub async fn get_waypoints(&self, timeout: Duration) -> Result<Vec<Waypoint>, LinkError> {
        let op = Operation::GetWaypoints;
        self.ensure_open()?;
        self.require(op, self.capabilities.supports_waypoint_transfer(), "A100")?;
        self.require(op, self.capabilities.waypoint_format().is_some(), "waypoint format")?;
        let request = self.command(op, Command::TransferWaypoints)?;
        let result = self
            .fetch(op, &self.shared.slots.waypoints, &request, timeout)
            .await?;
        Ok(result.unwrap_or_default())
    }

    /// Download all routes; empty on timeout
    pub async fn get_routes(&self, timeout: Duration) -> Result<Vec<Route>, LinkError> {
        let op = Operation::GetRoutes;
        self.ensure_open()?;
        self.require(op, self.capabilities.supports_route_transfer(), "A200")?;
        self.require(op, self.capabilities.route_header_format().is_some(), "route header format")?;
        self.require(op, self.capabilities.waypoint_format().is_some(), "waypoint format")?;
        let request = self.command(op, Command::TransferRoutes)?;
        let result = self
            .fetch(op, &self.shared.slots.routes, &request, timeout)
            .await?;
        Ok(result.unwrap_or_default())
    }

    /// Download all tracks; empty on timeout
    pub async fn get_tracks(&self, timeout: Duration) -> Result<Vec<Track>, LinkError> {
        let op = Operation::GetTracks;
        self.ensure_open()?;
        self.require(op, self.capabilities.supports_track_transfer(), "A300")?;
        self.require(op, self.capabilities.trackpoint_format().is_some(), "trackpoint format")?;
        self.require_pid(op, PacketKind::TrackData)?;
        let request = self.command(op, Command::TransferTracks)?;
        let result = self
            .fetch(op, &self.shared.slots.tracks, &request, timeout)
            .await?;
        Ok(result.unwrap_or_default())
    }

    /// Replace the device's waypoints; false when the device stopped acknowledging
    pub async fn set_waypoints(&self, waypoints: &[Waypoint]) -> Result<bool, LinkError> {
        let op = Operation::SetWaypoints;
        self.ensure_open()?;
        self.require(op, self.capabilities.supports_waypoint_transfer(), "A100")?;
        let format = self
            .capabilities
            .waypoint_format()
            .ok_or_else(|| LinkError::unsupported(op, "waypoint format"))?;
        let pid = self.require_pid(op, PacketKind::WaypointData)?;
        let code = self.command_code(op, Command::TransferWaypoints)?;

        let records = waypoints
            .iter()
            .map(|w| Packet::new(pid, format.encode(w)))
            .collect();
        let packets = self.block(op, records, code)?;
        self.upload(op, packets).await
    }

    /// Replace the device's routes
    ///
    /// Devices that take route links get one default link between each
    /// pair of consecutive route points.
    pub async fn set_routes(&self, routes: &[Route]) -> Result<bool, LinkError> {
        let op = Operation::SetRoutes;
        self.ensure_open()?;
        let caps = &self.capabilities;
        self.require(op, caps.supports_route_transfer(), "A200")?;
        let header_format = caps
            .route_header_format()
            .ok_or_else(|| LinkError::unsupported(op, "route header format"))?;
        let waypoint_format = caps
            .waypoint_format()
            .ok_or_else(|| LinkError::unsupported(op, "waypoint format"))?;
        let header_pid = self.require_pid(op, PacketKind::RouteHeader)?;
        let point_pid = self.require_pid(op, PacketKind::RouteWaypoint)?;
        let code = self.command_code(op, Command::TransferRoutes)?;

        let links = match (caps.supports_route_links(), caps.route_link_format()) {
            (true, Some(format)) => self
                .shared
                .link()
                .pid(PacketKind::RouteLink)
                .map(|pid| Packet::new(pid, format.encode(&RouteLink::default()))),
            _ => None,
        };

        let mut records = Vec::new();
        for route in routes {
            records.push(Packet::new(header_pid, header_format.encode(&route.header)));
            for (i, waypoint) in route.waypoints.iter().enumerate() {
                if i > 0 {
                    if let Some(link) = &links {
                        records.push(link.clone());
                    }
                }
                records.push(Packet::new(point_pid, waypoint_format.encode(waypoint)));
            }
        }
        let packets = self.block(op, records, code)?;
        self.upload(op, packets).await
    }

    /// Replace the device's tracks
    ///
    /// Without track headers the tracks are sent as one point list with
    /// the first point of each track starting a new segment.
    pub async fn set_tracks(&self, tracks: &[Track]) -> Result<bool, LinkError> {
        let op = Operation::SetTracks;
        self.ensure_open()?;
        let caps = &self.capabilities;
        self.require(op, caps.supports_track_transfer(), "A300")?;
        let point_format = caps
            .trackpoint_format()
            .ok_or_else(|| LinkError::unsupported(op, "trackpoint format"))?;
        let point_pid = self.require_pid(op, PacketKind::TrackData)?;
        let code = self.command_code(op, Command::TransferTracks)?;

        let headers = if caps.supports_track_headers() {
            let format = caps
                .track_header_format()
                .ok_or_else(|| LinkError::unsupported(op, "track header format"))?;
            Some((format, self.require_pid(op, PacketKind::TrackHeader)?))
        } else {
            None
        };

        let mut records = Vec::new();
        for track in tracks {
            if let Some((format, pid)) = headers {
                records.push(Packet::new(pid, format.encode(&track.header)));
            }
            for (i, point) in track.points.iter().enumerate() {
                if headers.is_none() && i == 0 && !point.new_segment {
                    let mut first = point.clone();
                    first.new_segment = true;
                    records.push(Packet::new(point_pid, point_format.encode(&first)));
                } else {
                    records.push(Packet::new(point_pid, point_format.encode(point)));
                }
            }
        }
        let packets = self.block(op, records, code)?;
        self.upload(op, packets).await
    }

    /// One position/velocity/time report
    ///
    /// Starts PVT data for the request and stops it again afterwards unless
    /// a stream is already running.
    pub async fn get_pvt(&self, timeout: Duration) -> Result<Option<Pvt>, LinkError> {
        let op = Operation::GetPvt;
        self.ensure_open()?;
        self.require(op, self.capabilities.supports_pvt(), "A800")?;
        self.require(op, self.capabilities.pvt_format().is_some(), "PVT format")?;
        self.require_pid(op, PacketKind::PvtData)?;
        let start = self.command(op, Command::StartPvtData)?;
        let stop = self.command(op, Command::StopPvtData)?;

        let streaming = self.shared.pvt_streaming.load(Ordering::SeqCst);
        let transport: &Transport = &self.shared.transport;
        let start = &start;

        self.started(op, None);
        let result = self
            .shared
            .slots
            .pvt
            .exchange(timeout, move || async move {
                if streaming {
                    Ok(())
                } else {
                    transport.send(start).await
                }
            })
            .await;
        if !streaming && result.is_ok() {
            if let Err(e) = transport.send(&stop).await {
                debug!("Could not stop PVT data: {}", e);
            }
        }
        self.ended(op, matches!(result, Ok(Some(_))));
        result
    }

    /// Ask the device to report PVT continuously
    ///
    /// Reports arrive as [`GpsEvent::Position`].
    pub async fn start_pvt_stream(&self) -> Result<(), LinkError> {
        let op = Operation::PvtStream;
        self.ensure_open()?;
        self.require(op, self.capabilities.supports_pvt(), "A800")?;
        self.require_pid(op, PacketKind::PvtData)?;
        let start = self.command(op, Command::StartPvtData)?;
        if self.shared.pvt_streaming.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.started(op, None);
        if let Err(e) = self.shared.transport.send(&start).await {
            self.shared.pvt_streaming.store(false, Ordering::SeqCst);
            self.ended(op, false);
            return Err(e);
        }
        info!("PVT stream started");
        Ok(())
    }

    pub async fn stop_pvt_stream(&self) -> Result<(), LinkError> {
        let op = Operation::PvtStream;
        self.ensure_open()?;
        self.require(op, self.capabilities.supports_pvt(), "A800")?;
        let stop = self.command(op, Command::StopPvtData)?;
        if !self.shared.pvt_streaming.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.shared.transport.send(&stop).await;
        self.ended(op, result.is_ok());
        info!("PVT stream stopped");
        result
    }

    /// Capture the device screen
    pub async fn get_screenshot(&self, timeout: Duration) -> Result<Option<Bitmap>, LinkError> {
        let op = Operation::Screenshot;
        self.ensure_open()?;
        self.require_pid(op, PacketKind::DisplayData)?;
        let request = self.command(op, Command::TransferScreenBitmap)?;
        self.fetch(op, &self.shared.slots.screenshot, &request, timeout)
            .await
    }

    /// The device's unit id
    pub async fn get_serial_number(&self, timeout: Duration) -> Result<Option<u32>, LinkError> {
        let op = Operation::SerialNumber;
        self.ensure_open()?;
        self.require_pid(op, PacketKind::UnitId)?;
        let request = self.command(op, Command::TransferUnitId)?;
        self.fetch(op, &self.shared.slots.serial, &request, timeout)
            .await
    }

    /// Read one file from the device; `None` when it is missing or the
    /// transfer timed out
    pub async fn get_file(&self, name: &str, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let op = Operation::File;
        self.ensure_open()?;
        let pid = self.require_pid(op, PacketKind::FileRequest)?;
        self.require_pid(op, PacketKind::FileData)?;
        let request = Packet::new(pid, FileRequest::named(name).encode());
        debug!("Requesting file {:?}", name);
        let result = self
            .fetch(op, &self.shared.slots.file, &request, timeout)
            .await?;
        Ok(result.flatten())
    }

    /// Flash memory usage
    pub async fn get_flash_info(&self, timeout: Duration) -> Result<Option<FlashInfo>, LinkError> {
        let op = Operation::FlashInfo;
        self.ensure_open()?;
        self.require_pid(op, PacketKind::CapacityData)?;
        let request = self.command(op, Command::TransferMemory)?;
        self.fetch(op, &self.shared.slots.flash, &request, timeout)
            .await
    }

    /// The device clock
    pub async fn get_date_time(&self, timeout: Duration) -> Result<Option<DateTime<Utc>>, LinkError> {
        let op = Operation::DateTime;
        self.ensure_open()?;
        self.require_pid(op, PacketKind::DateTimeData)?;
        let request = self.command(op, Command::TransferTime)?;
        self.fetch(op, &self.shared.slots.date_time, &request, timeout)
            .await
    }

    /// The device's last known position
    pub async fn get_position(&self, timeout: Duration) -> Result<Option<Position>, LinkError> {
        let op = Operation::Position;
        self.ensure_open()?;
        self.require_pid(op, PacketKind::PositionData)?;
        let request = self.command(op, Command::TransferPosition)?;
        self.fetch(op, &self.shared.slots.position, &request, timeout)
            .await
    }

    fn ensure_open(&self) -> Result<(), LinkError> {
        if self.shared.is_closed() {
            Err(LinkError::Closed)
        } else {
            Ok(())
        }
    }

    fn require(&self, op: Operation, supported: bool, capability: &str) -> Result<(), LinkError> {
        if supported {
            Ok(())
        } else {
            Err(LinkError::unsupported(op, capability))
        }
    }

    fn require_pid(&self, op: Operation, kind: PacketKind) -> Result<u8, LinkError> {
        let link = self.shared.link();
        link.pid(kind)
            .ok_or_else(|| LinkError::unsupported(op, format!("{:?} on {}", kind, link.token())))
    }

    fn command(&self, op: Operation, command: Command) -> Result<Packet, LinkError> {
        self.shared.command_packet(command).ok_or_else(|| {
            LinkError::unsupported(
                op,
                format!("{:?} on {}", command, self.shared.command_protocol().token()),
            )
        })
    }

    fn command_code(&self, op: Operation, command: Command) -> Result<u16, LinkError> {
        let protocol = self.shared.command_protocol();
        protocol
            .code(command)
            .ok_or_else(|| LinkError::unsupported(op, format!("{:?} on {}", command, protocol.token())))
    }

    /// Wrap data packets in a records count and a transfer-complete packet
    fn block(&self, op: Operation, records: Vec<Packet>, code: u16) -> Result<Vec<Packet>, LinkError> {
        let records_pid = self.require_pid(op, PacketKind::Records)?;
        let complete_pid = self.require_pid(op, PacketKind::XferComplete)?;
        let count = u16::try_from(records.len()).map_err(|_| {
            LinkError::from(gps_protocol::ParseError::InvalidValue {
                field: "record count",
                value: records.len().to_string(),
            })
        })?;

        let mut packets = Vec::with_capacity(records.len() + 2);
        packets.push(Packet::new(records_pid, count.to_le_bytes().to_vec()));
        packets.extend(records);
        packets.push(Packet::new(complete_pid, code.to_le_bytes().to_vec()));
        Ok(packets)
    }

    /// Send a block packet by packet, stopping at the first unacknowledged one
    async fn upload(&self, op: Operation, packets: Vec<Packet>) -> Result<bool, LinkError> {
        let total = packets.len() as u32;
        let interval = self.shared.config.progress_interval.max(1);
        self.started(op, Some(total));

        let mut result = Ok(true);
        for (i, packet) in packets.iter().enumerate() {
            match self.shared.transport.send_acknowledged(packet).await {
                Ok(true) => {
                    let done = i as u32 + 1;
                    if done % interval == 0 || done == total {
                        self.shared.publish(GpsEvent::OperationProgress {
                            operation: op,
                            done,
                            total,
                        });
                    }
                }
                Ok(false) => {
                    warn!("{} stopped at packet {}/{}", op, i + 1, total);
                    result = Ok(false);
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.ended(op, matches!(result, Ok(true)));
        result
    }

    /// Correlated request on one slot, with start/end events
    async fn fetch<T>(
        &self,
        op: Operation,
        slot: &ResultSlot<T>,
        request: &Packet,
        timeout: Duration,
    ) -> Result<Option<T>, LinkError> {
        let transport: &Transport = &self.shared.transport;
        self.started(op, None);
        let result = slot
            .exchange(timeout, move || transport.send(request))
            .await;
        self.ended(op, matches!(result, Ok(Some(_))));
        result
    }

    fn started(&self, operation: Operation, total: Option<u32>) {
        debug!("{} started", operation);
        self.shared
            .publish(GpsEvent::OperationStarted { operation, total });
    }

    fn ended(&self, operation: Operation, success: bool) {
        debug!("{} ended (success: {})", operation, success);
        self.shared
            .publish(GpsEvent::OperationEnded { operation, success });
    }
}

impl Drop for GpsSession {
    fn drop(&mut self) {
        if !self.shared.is_closed() {
            self.shared.shutdown.send_replace(true);
            self.shared.slots.close_all();
        }
    }
}

/// Ask for product data and settle the capability set
async fn identify(shared: &Shared) -> Result<(ProductData, Capabilities), LinkError> {
    // Register for the protocol array first; it can follow product data
    // before the product waiter returns
    let capabilities = shared.slots.capabilities.acquire().await;

    let transport: &Transport = &shared.transport;
    let request = Packet::empty(PID_PRODUCT_REQUEST);
    let request = &request;
    let product = shared
        .slots
        .product
        .exchange(shared.config.product_timeout(), move || transport.send(request))
        .await?
        .ok_or(LinkError::NoProduct)?;
    info!("Connected to {}", product);

    let capabilities = match capabilities.wait(shared.config.capability_timeout()).await {
        Some(caps) => {
            info!("Device capabilities: {}", caps);
            caps
        }
        None => match LegacyDatabase::lookup(product.product_id, product.software_version) {
            Some(caps) => {
                warn!(
                    "No protocol array, using stored capabilities for product {}: {}",
                    product.product_id, caps
                );
                caps
            }
            None => {
                warn!(
                    "No protocol array and product {} version {} is unknown",
                    product.product_id, product.software_version
                );
                Capabilities::new()
            }
        },
    };
    Ok((product, capabilities))
}
