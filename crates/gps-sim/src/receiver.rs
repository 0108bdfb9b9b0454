//! Virtual receiver
//!
//! A simulated GPS receiver answering host packets the way a device does.
//! It is synchronous: [`VirtualReceiver::handle_packet`] takes one decoded
//! host packet and returns the frames to write back. The async task in
//! [`crate::task`] moves bytes between a stream and this state machine.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use gps_protocol::packet::{PID_ACK, PID_NAK, PID_PRODUCT_DATA, PID_PRODUCT_REQUEST, PID_PROTOCOL_ARRAY};
use gps_protocol::records::display::{encode_screen, pack_pixels};
use gps_protocol::records::file::{encode_file_chunks, encode_file_not_found, encode_unit_id};
use gps_protocol::records::time::encode_d600;
use gps_protocol::records::{
    DisplayHeader, FileHeader, FileRequest, FlashInfo, Position, ProductData, Pvt, Rgb, Route,
    RouteHeader, RouteLink, Track, TrackHeader, Waypoint,
};
use gps_protocol::{
    Capabilities, Command, CommandProtocol, LegacyDatabase, LinkProtocol, Packet, PacketKind,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A screen the receiver can send as a screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenImage {
    pub header: DisplayHeader,
    /// Sent as palette packets when the depth is indexed
    pub palette: Vec<Rgb>,
    /// Packed scan lines, `header.image_len()` bytes
    pub scan: Vec<u8>,
    pub lines_per_packet: u32,
}

impl ScreenImage {
    /// Build from palette indices in scan order, one byte per pixel
    pub fn from_indices(header: DisplayHeader, indices: &[u8]) -> Self {
        let line_len = header.line_len() as usize;
        let width = header.width.max(1) as usize;
        let mut scan = Vec::with_capacity(header.image_len() as usize);
        for row in indices.chunks(width).take(header.height as usize) {
            let mut line = pack_pixels(header.bits_per_pixel, row);
            line.resize(line_len, 0);
            scan.extend(line);
        }
        scan.resize(header.image_len() as usize, 0);
        Self {
            header,
            palette: Vec::new(),
            scan,
            lines_per_packet: 8,
        }
    }
}

/// Configuration for creating a virtual receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualReceiverConfig {
    pub product_id: u16,
    /// Software version times 100
    pub software_version: i16,
    pub description: String,
    /// Advertised capability tokens; `None` sends no protocol array and the
    /// receiver behaves like the stored entry for its product id
    pub capabilities: Option<Vec<String>>,
    pub serial_number: u32,
    pub waypoints: Vec<Waypoint>,
    pub routes: Vec<Route>,
    pub tracks: Vec<Track>,
    pub pvt: Pvt,
    pub screen: Option<ScreenImage>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub flash: FlashInfo,
    pub date_time: DateTime<Utc>,
    pub position: Position,
    /// Never answer anything
    pub mute: bool,
    /// Screenshot transfers that get one image frame damaged
    pub corrupt_screenshots: u32,
    /// Damage the last image frame instead of the first
    pub corrupt_last_image: bool,
    /// Upload packets to reject with a NAK before accepting them
    pub nak_uploads: u32,
}

impl Default for VirtualReceiverConfig {
    fn default() -> Self {
        Self {
            product_id: 484,
            software_version: 310,
            description: "Virtual Receiver Software Version 3.10".to_string(),
            capabilities: Some(
                [
                    "L1", "A10", "A100", "D108", "A201", "D202", "D108", "D210", "A301", "D310",
                    "D301", "A500", "D501", "A600", "D600", "A700", "D700", "A800", "D800",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ),
            serial_number: 3_405_691_582,
            waypoints: Vec::new(),
            routes: Vec::new(),
            tracks: Vec::new(),
            pvt: Pvt::default(),
            screen: None,
            files: BTreeMap::new(),
            flash: FlashInfo {
                region: 10,
                total_bytes: 24 * 1024 * 1024,
                free_bytes: 20 * 1024 * 1024,
            },
            date_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().unwrap_or_default(),
            position: Position::default(),
            mute: false,
            corrupt_screenshots: 0,
            corrupt_last_image: false,
            nak_uploads: 0,
        }
    }
}

/// Upload being received
#[derive(Debug, Clone, Default)]
struct Upload {
    expected: u16,
    packets: Vec<(PacketKind, Vec<u8>)>,
}

/// A simulated receiver
#[derive(Debug, Clone)]
pub struct VirtualReceiver {
    product: ProductData,
    advertised: Option<Capabilities>,
    capabilities: Capabilities,
    link: LinkProtocol,
    commands: CommandProtocol,
    serial_number: u32,
    waypoints: Vec<Waypoint>,
    routes: Vec<Route>,
    tracks: Vec<Track>,
    pvt: Pvt,
    screen: Option<ScreenImage>,
    files: BTreeMap<String, Vec<u8>>,
    flash: FlashInfo,
    date_time: DateTime<Utc>,
    position: Position,
    mute: bool,
    corrupt_screenshots: u32,
    corrupt_last_image: bool,
    nak_uploads: u32,
    upload: Option<Upload>,
    pvt_streaming: bool,
    received: Vec<Packet>,
    bytes_received: usize,
    route_links_received: usize,
    acks_received: usize,
    naks_received: usize,
}

impl VirtualReceiver {
    /// Create a receiver with default settings
    pub fn new() -> Self {
        Self::from_config(VirtualReceiverConfig::default())
    }

    /// Create a receiver from configuration
    ///
    /// Unparseable capability tokens are skipped with a warning.
    pub fn from_config(config: VirtualReceiverConfig) -> Self {
        let product = ProductData::new(config.product_id, config.software_version, config.description);
        let advertised = config.capabilities.map(|tokens| {
            tokens
                .iter()
                .filter_map(|t| match t.parse() {
                    Ok(token) => Some(token),
                    Err(e) => {
                        warn!("Skipping capability {:?}: {}", t, e);
                        None
                    }
                })
                .collect::<Capabilities>()
        });
        let capabilities = advertised.clone().unwrap_or_else(|| {
            LegacyDatabase::lookup(product.product_id, product.software_version).unwrap_or_default()
        });

        Self {
            link: capabilities.link_protocol(),
            commands: capabilities.command_protocol(),
            product,
            advertised,
            capabilities,
            serial_number: config.serial_number,
            waypoints: config.waypoints,
            routes: config.routes,
            tracks: config.tracks,
            pvt: config.pvt,
            screen: config.screen,
            files: config.files,
            flash: config.flash,
            date_time: config.date_time,
            position: config.position,
            mute: config.mute,
            corrupt_screenshots: config.corrupt_screenshots,
            corrupt_last_image: config.corrupt_last_image,
            nak_uploads: config.nak_uploads,
            upload: None,
            pvt_streaming: false,
            received: Vec::new(),
            bytes_received: 0,
            route_links_received: 0,
            acks_received: 0,
            naks_received: 0,
        }
    }

    pub fn product(&self) -> &ProductData {
        &self.product
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn link_protocol(&self) -> LinkProtocol {
        self.link
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn pvt(&self) -> &Pvt {
        &self.pvt
    }

    pub fn set_pvt(&mut self, pvt: Pvt) {
        self.pvt = pvt;
    }

    pub fn is_pvt_streaming(&self) -> bool {
        self.pvt_streaming
    }

    /// Every non-handshake packet received from the host, in order
    pub fn received(&self) -> &[Packet] {
        &self.received
    }

    /// Raw bytes received from the host
    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    /// Count raw bytes as they arrive, before decoding
    pub fn record_bytes(&mut self, n: usize) {
        self.bytes_received += n;
    }

    /// Route link records seen in uploads
    pub fn route_links_received(&self) -> usize {
        self.route_links_received
    }

    pub fn acks_received(&self) -> usize {
        self.acks_received
    }

    pub fn naks_received(&self) -> usize {
        self.naks_received
    }

    /// Commands received from the host, in order
    pub fn commands_received(&self) -> Vec<Command> {
        let Some(pid) = self.link.pid(PacketKind::CommandData) else {
            return Vec::new();
        };
        self.received
            .iter()
            .filter(|p| p.id == pid)
            .filter_map(|p| self.decode_command(&p.payload))
            .collect()
    }

    /// PVT packet for the current state, if the receiver reports PVT
    pub fn pvt_packet(&self) -> Option<Packet> {
        let pid = self.link.pid(PacketKind::PvtData)?;
        let format = self.capabilities.pvt_format()?;
        Some(Packet::new(pid, format.encode(&self.pvt)))
    }

    /// Handle one decoded host packet and return the encoded frames to send
    pub fn handle_packet(&mut self, packet: &Packet) -> Vec<Vec<u8>> {
        if self.mute {
            return Vec::new();
        }
        match packet.id {
            PID_ACK => {
                self.acks_received += 1;
                return Vec::new();
            }
            PID_NAK => {
                self.naks_received += 1;
                debug!("Host rejected packet {:?}", packet.handshake_target());
                return Vec::new();
            }
            _ => {}
        }
        self.received.push(packet.clone());

        let kind = self.link.classify(packet.id);
        if self.upload.is_some() && self.nak_uploads > 0 && kind != Some(PacketKind::CommandData) {
            self.nak_uploads -= 1;
            debug!("Rejecting upload packet 0x{:02X}", packet.id);
            return wire(&Packet::nak(packet.id)).into_iter().collect();
        }

        let mut out: Vec<Vec<u8>> = wire(&Packet::ack(packet.id)).into_iter().collect();
        if packet.id == PID_PRODUCT_REQUEST {
            out.extend(wire(&Packet::new(PID_PRODUCT_DATA, self.product.encode())));
            if let Some(caps) = &self.advertised {
                out.extend(wire(&Packet::new(PID_PROTOCOL_ARRAY, caps.encode_protocol_array())));
            }
            return out;
        }

        let replies = match kind {
            Some(PacketKind::CommandData) => match self.decode_command(&packet.payload) {
                Some(command) => self.handle_command(command),
                None => {
                    warn!("Unknown command {:02X?}", packet.payload);
                    Vec::new()
                }
            },
            Some(PacketKind::FileRequest) => self.handle_file_request(&packet.payload),
            Some(PacketKind::Records) => {
                let expected = match packet.payload.as_slice() {
                    [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
                    _ => 0,
                };
                debug!("Host uploading {} records", expected);
                self.upload = Some(Upload {
                    expected,
                    packets: Vec::new(),
                });
                Vec::new()
            }
            Some(PacketKind::XferComplete) => {
                self.finish_upload(&packet.payload);
                Vec::new()
            }
            Some(kind) => {
                match self.upload.as_mut() {
                    Some(upload) => upload.packets.push((kind, packet.payload.clone())),
                    None => debug!("{:?} outside an upload, ignoring", kind),
                }
                Vec::new()
            }
            None => {
                debug!("Unhandled packet 0x{:02X}", packet.id);
                Vec::new()
            }
        };
        out.extend(replies);
        out
    }

    fn decode_command(&self, payload: &[u8]) -> Option<Command> {
        match payload {
            [lo, hi, ..] => self.commands.command(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }

    fn frame(&self, kind: PacketKind, payload: Vec<u8>) -> Option<Vec<u8>> {
        self.link.pid(kind).and_then(|pid| wire(&Packet::new(pid, payload)))
    }

    fn handle_command(&mut self, command: Command) -> Vec<Vec<u8>> {
        debug!("Command {:?}", command);
        match command {
            Command::TransferWaypoints => self.send_waypoints(),
            Command::TransferRoutes => self.send_routes(),
            Command::TransferTracks => self.send_tracks(),
            Command::StartPvtData => {
                self.pvt_streaming = true;
                self.pvt_packet().as_ref().and_then(wire).into_iter().collect()
            }
            Command::StopPvtData => {
                self.pvt_streaming = false;
                Vec::new()
            }
            Command::TransferScreenBitmap => self.send_screen(),
            Command::TransferUnitId => self
                .frame(PacketKind::UnitId, encode_unit_id(self.serial_number))
                .into_iter()
                .collect(),
            Command::TransferMemory => self
                .frame(PacketKind::CapacityData, self.flash.encode())
                .into_iter()
                .collect(),
            Command::TransferTime => self
                .frame(PacketKind::DateTimeData, encode_d600(&self.date_time))
                .into_iter()
                .collect(),
            Command::TransferPosition => self
                .frame(PacketKind::PositionData, self.position.encode_d700())
                .into_iter()
                .collect(),
            Command::AbortTransfer => {
                if self.upload.take().is_some() {
                    info!("Upload aborted by host");
                }
                Vec::new()
            }
            Command::TurnOffPower => {
                info!("Power off requested");
                Vec::new()
            }
        }
    }

    /// Wrap data frames in records and transfer-complete frames
    fn block(&self, command: Command, data: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let count = u16::try_from(data.len()).unwrap_or(u16::MAX);
        let code = self.commands.code(command).unwrap_or(0);
        let mut out = Vec::with_capacity(data.len() + 2);
        out.extend(self.frame(PacketKind::Records, count.to_le_bytes().to_vec()));
        out.extend(data);
        out.extend(self.frame(PacketKind::XferComplete, code.to_le_bytes().to_vec()));
        out
    }

    fn send_waypoints(&self) -> Vec<Vec<u8>> {
        let Some(format) = self.capabilities.waypoint_format() else {
            return Vec::new();
        };
        let data = self
            .waypoints
            .iter()
            .filter_map(|w| self.frame(PacketKind::WaypointData, format.encode(w)))
            .collect();
        self.block(Command::TransferWaypoints, data)
    }

    fn send_routes(&self) -> Vec<Vec<u8>> {
        let (Some(header_format), Some(waypoint_format)) = (
            self.capabilities.route_header_format(),
            self.capabilities.waypoint_format(),
        ) else {
            return Vec::new();
        };
        let link_format = self
            .capabilities
            .route_link_format()
            .filter(|_| self.capabilities.supports_route_links());

        let mut data = Vec::new();
        for route in &self.routes {
            data.extend(self.frame(PacketKind::RouteHeader, header_format.encode(&route.header)));
            for (i, waypoint) in route.waypoints.iter().enumerate() {
                if i > 0 {
                    if let Some(format) = link_format {
                        data.extend(self.frame(PacketKind::RouteLink, format.encode(&RouteLink::default())));
                    }
                }
                data.extend(self.frame(PacketKind::RouteWaypoint, waypoint_format.encode(waypoint)));
            }
        }
        self.block(Command::TransferRoutes, data)
    }

    fn send_tracks(&self) -> Vec<Vec<u8>> {
        let Some(point_format) = self.capabilities.trackpoint_format() else {
            return Vec::new();
        };
        let header_format = self
            .capabilities
            .track_header_format()
            .filter(|_| self.capabilities.supports_track_headers());

        let mut data = Vec::new();
        for track in &self.tracks {
            if let Some(format) = header_format {
                data.extend(self.frame(PacketKind::TrackHeader, format.encode(&track.header)));
            }
            for point in &track.points {
                data.extend(self.frame(PacketKind::TrackData, point_format.encode(point)));
            }
        }
        self.block(Command::TransferTracks, data)
    }

    fn send_screen(&mut self) -> Vec<Vec<u8>> {
        let Some(screen) = &self.screen else {
            debug!("No screen configured");
            return Vec::new();
        };
        let payloads = encode_screen(&screen.header, &screen.palette, &screen.scan, screen.lines_per_packet);
        let mut frames: Vec<Vec<u8>> = payloads
            .into_iter()
            .filter_map(|p| self.frame(PacketKind::DisplayData, p))
            .collect();

        if self.corrupt_screenshots > 0 && frames.len() > 1 {
            self.corrupt_screenshots -= 1;
            // Damage the checksum of one image frame
            let target = if self.corrupt_last_image {
                frames.len() - 1
            } else {
                1 + screen.header.palette_len() as usize
            };
            if let Some(frame) = frames.get_mut(target) {
                let at = frame.len().saturating_sub(3);
                frame[at] ^= 0xFF;
                debug!("Damaged screen frame {}", target);
            }
        }
        frames
    }

    fn handle_file_request(&self, payload: &[u8]) -> Vec<Vec<u8>> {
        let request = match FileRequest::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Bad file request: {}", e);
                return Vec::new();
            }
        };
        let Some(content) = self.files.get(&request.name) else {
            return self
                .frame(PacketKind::FileNotFound, encode_file_not_found(&request.name))
                .into_iter()
                .collect();
        };
        let header = FileHeader {
            size: content.len() as u32,
            name: request.name.clone(),
        };
        let mut out: Vec<Vec<u8>> = self.frame(PacketKind::FileHeader, header.encode()).into_iter().collect();
        out.extend(
            encode_file_chunks(content)
                .into_iter()
                .filter_map(|chunk| self.frame(PacketKind::FileData, chunk)),
        );
        out
    }

    fn finish_upload(&mut self, payload: &[u8]) {
        let Some(upload) = self.upload.take() else {
            debug!("Transfer complete without an upload");
            return;
        };
        if upload.packets.len() != usize::from(upload.expected) {
            warn!(
                "Upload announced {} records, received {}",
                upload.expected,
                upload.packets.len()
            );
        }
        match self.decode_command(payload) {
            Some(Command::TransferWaypoints) => {
                let Some(format) = self.capabilities.waypoint_format() else {
                    return;
                };
                self.waypoints = upload
                    .packets
                    .iter()
                    .filter(|(kind, _)| *kind == PacketKind::WaypointData)
                    .filter_map(|(_, data)| format.decode(data).ok())
                    .collect();
                info!("Stored {} uploaded waypoints", self.waypoints.len());
            }
            Some(Command::TransferRoutes) => {
                let (Some(header_format), Some(waypoint_format)) = (
                    self.capabilities.route_header_format(),
                    self.capabilities.waypoint_format(),
                ) else {
                    return;
                };
                let mut routes: Vec<Route> = Vec::new();
                for (kind, data) in &upload.packets {
                    match kind {
                        PacketKind::RouteHeader => {
                            if let Ok(header) = header_format.decode(data) {
                                routes.push(Route::new(header));
                            }
                        }
                        PacketKind::RouteWaypoint => {
                            if routes.is_empty() {
                                routes.push(Route::new(RouteHeader::default()));
                            }
                            if let (Some(route), Ok(waypoint)) = (routes.last_mut(), waypoint_format.decode(data)) {
                                route.waypoints.push(waypoint);
                            }
                        }
                        PacketKind::RouteLink => self.route_links_received += 1,
                        _ => {}
                    }
                }
                info!("Stored {} uploaded routes", routes.len());
                self.routes = routes;
            }
            Some(Command::TransferTracks) => {
                let Some(point_format) = self.capabilities.trackpoint_format() else {
                    return;
                };
                let header_format = self.capabilities.track_header_format();
                let mut tracks: Vec<Track> = Vec::new();
                for (kind, data) in &upload.packets {
                    match kind {
                        PacketKind::TrackHeader => {
                            if let Some(Ok(header)) = header_format.map(|f| f.decode(data)) {
                                tracks.push(Track::new(header));
                            }
                        }
                        PacketKind::TrackData => {
                            let Ok(point) = point_format.decode(data) else {
                                continue;
                            };
                            let headerless = header_format.is_none() || !self.capabilities.supports_track_headers();
                            if tracks.is_empty() || (headerless && point.new_segment) {
                                tracks.push(Track::new(TrackHeader::default()));
                            }
                            if let Some(track) = tracks.last_mut() {
                                track.points.push(point);
                            }
                        }
                        _ => {}
                    }
                }
                info!("Stored {} uploaded tracks", tracks.len());
                self.tracks = tracks;
            }
            other => debug!("Upload finished with {:?}, discarding", other),
        }
    }
}

impl Default for VirtualReceiver {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode an outgoing packet; one that cannot be framed is logged and dropped
fn wire(packet: &Packet) -> Option<Vec<u8>> {
    match packet.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Dropping packet: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gps_protocol::{DecodeEvent, FrameDecoder};

    fn decode(frames: &[Vec<u8>]) -> Vec<DecodeEvent> {
        let mut decoder = FrameDecoder::new();
        frames.iter().flat_map(|f| decoder.push_bytes(f)).collect()
    }

    fn packets(frames: &[Vec<u8>]) -> Vec<Packet> {
        decode(frames)
            .into_iter()
            .filter_map(|e| match e {
                DecodeEvent::Packet(p) => Some(p),
                DecodeEvent::Corrupt { .. } => None,
            })
            .collect()
    }

    fn command(rx: &VirtualReceiver, command: Command) -> Packet {
        let pid = rx.link.pid(PacketKind::CommandData).unwrap();
        let code = rx.commands.code(command).unwrap();
        Packet::new(pid, code.to_le_bytes().to_vec())
    }

    #[test]
    fn test_product_request_answers_with_product_and_protocol_array() {
        let mut rx = VirtualReceiver::new();
        let out = packets(&rx.handle_packet(&Packet::empty(PID_PRODUCT_REQUEST)));
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Packet::ack(PID_PRODUCT_REQUEST));
        assert_eq!(out[1].id, PID_PRODUCT_DATA);
        assert_eq!(ProductData::decode(&out[1].payload).unwrap().product_id, 484);
        assert_eq!(out[2].id, PID_PROTOCOL_ARRAY);
        let caps = Capabilities::from_protocol_array(&out[2].payload).unwrap();
        assert!(caps.supports("D108"));
    }

    #[test]
    fn test_legacy_receiver_sends_no_protocol_array() {
        let mut rx = VirtualReceiver::from_config(VirtualReceiverConfig {
            product_id: 29,
            software_version: 450,
            capabilities: None,
            ..Default::default()
        });
        let out = packets(&rx.handle_packet(&Packet::empty(PID_PRODUCT_REQUEST)));
        assert_eq!(out.len(), 2);
        assert!(rx.capabilities().supports("D102"));
    }

    #[test]
    fn test_waypoint_download_block() {
        let mut rx = VirtualReceiver::from_config(VirtualReceiverConfig {
            waypoints: vec![Waypoint::new("A", 1.0, 2.0), Waypoint::new("B", 3.0, 4.0)],
            ..Default::default()
        });
        let cmd = command(&rx, Command::TransferWaypoints);
        let out = packets(&rx.handle_packet(&cmd));
        let ids: Vec<u8> = out.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![PID_ACK, 27, 35, 35, 12]);
        assert_eq!(out[1].payload, vec![2, 0]);
        assert_eq!(out[4].payload, vec![7, 0]);
    }

    #[test]
    fn test_route_download_includes_links() {
        let mut route = Route::new(RouteHeader {
            identification: Some("R".into()),
            ..Default::default()
        });
        route.waypoints = vec![Waypoint::new("A", 0.0, 0.0), Waypoint::new("B", 1.0, 1.0)];
        let mut rx = VirtualReceiver::from_config(VirtualReceiverConfig {
            routes: vec![route],
            ..Default::default()
        });
        let cmd = command(&rx, Command::TransferRoutes);
        let ids: Vec<u8> = packets(&rx.handle_packet(&cmd)).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![PID_ACK, 27, 29, 30, 98, 30, 12]);
    }

    #[test]
    fn test_upload_replaces_waypoints() {
        let mut rx = VirtualReceiver::new();
        let format = rx.capabilities().waypoint_format().unwrap();
        rx.handle_packet(&Packet::new(27, vec![1, 0]));
        rx.handle_packet(&Packet::new(35, format.encode(&Waypoint::new("NEW", 5.0, 6.0))));
        rx.handle_packet(&Packet::new(12, vec![7, 0]));
        assert_eq!(rx.waypoints().len(), 1);
        assert_eq!(rx.waypoints()[0].identification, "NEW");
    }

    #[test]
    fn test_nak_uploads() {
        let mut rx = VirtualReceiver::from_config(VirtualReceiverConfig {
            nak_uploads: 1,
            ..Default::default()
        });
        let first = packets(&rx.handle_packet(&Packet::new(27, vec![0, 0])));
        assert_eq!(first, vec![Packet::ack(27)]);
        let rejected = packets(&rx.handle_packet(&Packet::new(12, vec![7, 0])));
        assert_eq!(rejected, vec![Packet::nak(12)]);
        let accepted = packets(&rx.handle_packet(&Packet::new(12, vec![7, 0])));
        assert_eq!(accepted, vec![Packet::ack(12)]);
    }

    #[test]
    fn test_corrupted_screenshot_frame() {
        let header = DisplayHeader {
            bits_per_pixel: 1,
            width: 16,
            height: 16,
            ..Default::default()
        };
        let mut screen = ScreenImage::from_indices(header, &[1u8; 256]);
        screen.lines_per_packet = 4;
        let mut rx = VirtualReceiver::from_config(VirtualReceiverConfig {
            screen: Some(screen),
            corrupt_screenshots: 1,
            ..Default::default()
        });
        let cmd = command(&rx, Command::TransferScreenBitmap);

        let first = decode(&rx.handle_packet(&cmd));
        let corrupt = first
            .iter()
            .filter(|e| matches!(e, DecodeEvent::Corrupt { .. }))
            .count();
        assert_eq!(corrupt, 1);

        let second = decode(&rx.handle_packet(&cmd));
        assert!(second.iter().all(|e| matches!(e, DecodeEvent::Packet(_))));
        assert_eq!(rx.commands_received(), vec![Command::TransferScreenBitmap; 2]);
    }

    #[test]
    fn test_corrupted_last_screenshot_frame() {
        let header = DisplayHeader {
            bits_per_pixel: 1,
            width: 16,
            height: 16,
            ..Default::default()
        };
        let mut screen = ScreenImage::from_indices(header, &[1u8; 256]);
        screen.lines_per_packet = 4;
        let mut rx = VirtualReceiver::from_config(VirtualReceiverConfig {
            screen: Some(screen),
            corrupt_screenshots: 1,
            corrupt_last_image: true,
            ..Default::default()
        });
        let cmd = command(&rx, Command::TransferScreenBitmap);

        let events = decode(&rx.handle_packet(&cmd));
        // ACK, header and four image frames
        assert_eq!(events.len(), 6);
        assert!(events[..5].iter().all(|e| matches!(e, DecodeEvent::Packet(_))));
        assert!(matches!(events[5], DecodeEvent::Corrupt { .. }));
    }

    #[test]
    fn test_missing_file() {
        let mut rx = VirtualReceiver::new();
        let out = packets(&rx.handle_packet(&Packet::new(89, FileRequest::named("nope").encode())));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].id, 92);
    }

    #[test]
    fn test_mute_receiver_answers_nothing() {
        let mut rx = VirtualReceiver::from_config(VirtualReceiverConfig {
            mute: true,
            ..Default::default()
        });
        assert!(rx.handle_packet(&Packet::empty(PID_PRODUCT_REQUEST)).is_empty());
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: VirtualReceiverConfig =
            serde_json::from_str(r#"{"product_id": 77, "capabilities": null}"#).unwrap();
        assert_eq!(config.product_id, 77);
        assert!(config.capabilities.is_none());
        assert_eq!(config.serial_number, 3_405_691_582);
    }
}
