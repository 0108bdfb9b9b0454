//! Bulk transfer assembly
//!
//! A download arrives as one block:
//!
//! ```text
//! Records(N)  header point point ... header point ...  XferComplete
//! ```
//!
//! Headers open a new route or track, points append to the open one and
//! waypoint packets stand alone. Nothing is handed out until the block
//! closes. A block without any recognizable data yields [`AssemblerEvent::Empty`]
//! because the kind of records the device meant cannot be known.

use gps_protocol::records::{
    Route, RouteHeader, RouteHeaderFormat, Track, TrackHeader, TrackHeaderFormat,
    TrackPointFormat, Waypoint, WaypointFormat,
};
use gps_protocol::{Capabilities, PacketKind, ParseError};
use tracing::{debug, info, trace, warn};

/// Record formats negotiated for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFormats {
    pub waypoint: Option<WaypointFormat>,
    pub route_header: Option<RouteHeaderFormat>,
    pub track_header: Option<TrackHeaderFormat>,
    pub trackpoint: Option<TrackPointFormat>,
}

impl RecordFormats {
    pub fn from_capabilities(caps: &Capabilities) -> Self {
        Self {
            waypoint: caps.waypoint_format(),
            route_header: caps.route_header_format(),
            track_header: caps.track_header_format(),
            trackpoint: caps.trackpoint_format(),
        }
    }
}

/// What a block turned out to contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Waypoints,
    Routes,
    Tracks,
}

/// Output of the assembler
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerEvent {
    /// A block announced `total` packets
    Started { total: u32 },
    /// `done` packets of the block processed
    Progress {
        kind: BlockKind,
        done: u32,
        total: u32,
    },
    Waypoints(Vec<Waypoint>),
    Routes(Vec<Route>),
    Tracks(Vec<Track>),
    /// The block closed without any recognizable records
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Collecting { total: u32, received: u32 },
}

/// State machine grouping bulk transfer packets into collections
#[derive(Debug)]
pub struct BulkAssembler {
    formats: RecordFormats,
    progress_interval: u32,
    state: State,
    kind: Option<BlockKind>,
    waypoints: Vec<Waypoint>,
    routes: Vec<Route>,
    tracks: Vec<Track>,
    open_route: Option<Route>,
    open_track: Option<Track>,
}

impl BulkAssembler {
    pub fn new(formats: RecordFormats, progress_interval: u32) -> Self {
        Self {
            formats,
            progress_interval: progress_interval.max(1),
            state: State::Idle,
            kind: None,
            waypoints: Vec::new(),
            routes: Vec::new(),
            tracks: Vec::new(),
            open_route: None,
            open_track: None,
        }
    }

    pub fn set_formats(&mut self, formats: RecordFormats) {
        self.formats = formats;
    }

    /// Whether a block is open
    pub fn is_collecting(&self) -> bool {
        matches!(self.state, State::Collecting { .. })
    }

    /// Whether this packet kind belongs to bulk transfers
    pub fn handles(kind: PacketKind) -> bool {
        matches!(
            kind,
            PacketKind::Records
                | PacketKind::XferComplete
                | PacketKind::WaypointData
                | PacketKind::RouteHeader
                | PacketKind::RouteWaypoint
                | PacketKind::RouteLink
                | PacketKind::TrackHeader
                | PacketKind::TrackData
        )
    }

    /// Feed one packet
    pub fn push(&mut self, kind: PacketKind, payload: &[u8]) -> Vec<AssemblerEvent> {
        let mut events = Vec::new();

        match kind {
            PacketKind::Records => {
                if self.is_collecting() {
                    warn!("Records packet inside an open block, starting over");
                }
                let total = u32::from(read_count(payload));
                self.clear();
                self.state = State::Collecting { total, received: 0 };
                info!("Receiving {} records", total);
                events.push(AssemblerEvent::Started { total });
                return events;
            }
            PacketKind::XferComplete => {
                if self.is_collecting() {
                    events.push(self.finish());
                } else {
                    debug!("Transfer complete outside a block, ignoring");
                }
                return events;
            }
            _ => {}
        }

        let State::Collecting { total, received } = self.state else {
            debug!("{:?} packet outside a block, ignoring", kind);
            return events;
        };

        if let Err(e) = self.accept(kind, payload) {
            warn!("Dropping malformed {:?} record: {}", kind, e);
        }

        let received = received + 1;
        self.state = State::Collecting { total, received };
        if received % self.progress_interval == 0 {
            if let Some(kind) = self.kind {
                events.push(AssemblerEvent::Progress {
                    kind,
                    done: received,
                    total,
                });
            }
        }
        events
    }

    fn accept(&mut self, kind: PacketKind, payload: &[u8]) -> Result<(), ParseError> {
        match kind {
            PacketKind::WaypointData => {
                let Some(format) = self.formats.waypoint else {
                    return Err(unsupported("waypoint"));
                };
                self.kind = Some(BlockKind::Waypoints);
                self.waypoints.push(format.decode(payload)?);
            }
            PacketKind::RouteHeader => {
                let Some(format) = self.formats.route_header else {
                    return Err(unsupported("route header"));
                };
                let header = format.decode(payload)?;
                self.kind = Some(BlockKind::Routes);
                if let Some(route) = self.open_route.take() {
                    self.routes.push(route);
                }
                self.open_route = Some(Route::new(header));
            }
            PacketKind::RouteWaypoint => {
                let Some(format) = self.formats.waypoint else {
                    return Err(unsupported("waypoint"));
                };
                let waypoint = format.decode(payload)?;
                self.kind = Some(BlockKind::Routes);
                self.open_route
                    .get_or_insert_with(|| Route::new(RouteHeader::default()))
                    .waypoints
                    .push(waypoint);
            }
            PacketKind::RouteLink => {
                // Accepted but not applied
                trace!("Skipping route link record");
            }
            PacketKind::TrackHeader => {
                let Some(format) = self.formats.track_header else {
                    return Err(unsupported("track header"));
                };
                let header = format.decode(payload)?;
                self.kind = Some(BlockKind::Tracks);
                if let Some(track) = self.open_track.take() {
                    self.tracks.push(track);
                }
                self.open_track = Some(Track::new(header));
            }
            PacketKind::TrackData => {
                let Some(format) = self.formats.trackpoint else {
                    return Err(unsupported("trackpoint"));
                };
                let point = format.decode(payload)?;
                self.kind = Some(BlockKind::Tracks);
                self.open_track
                    .get_or_insert_with(|| {
                        debug!("Trackpoint without header, opening unnamed track");
                        Track::new(TrackHeader::default())
                    })
                    .points
                    .push(point);
            }
            other => debug!("{:?} is not a bulk record", other),
        }
        Ok(())
    }

    fn finish(&mut self) -> AssemblerEvent {
        if let Some(route) = self.open_route.take() {
            self.routes.push(route);
        }
        if let Some(track) = self.open_track.take() {
            self.tracks.push(track);
        }
        let event = match self.kind {
            Some(BlockKind::Waypoints) => AssemblerEvent::Waypoints(std::mem::take(&mut self.waypoints)),
            Some(BlockKind::Routes) => AssemblerEvent::Routes(std::mem::take(&mut self.routes)),
            Some(BlockKind::Tracks) => AssemblerEvent::Tracks(std::mem::take(&mut self.tracks)),
            None => AssemblerEvent::Empty,
        };
        if let State::Collecting { total, received } = self.state {
            if received != total {
                debug!("Block announced {} records, received {}", total, received);
            }
        }
        self.clear();
        event
    }

    fn clear(&mut self) {
        self.state = State::Idle;
        self.kind = None;
        self.waypoints.clear();
        self.routes.clear();
        self.tracks.clear();
        self.open_route = None;
        self.open_track = None;
    }
}

fn read_count(payload: &[u8]) -> u16 {
    match payload {
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        [lo] => u16::from(*lo),
        [] => 0,
    }
}

fn unsupported(what: &str) -> ParseError {
    ParseError::InvalidValue {
        field: "record format",
        value: format!("no negotiated {} format", what),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gps_protocol::records::TrackPoint;
    use proptest::prelude::*;

    fn formats() -> RecordFormats {
        RecordFormats {
            waypoint: Some(WaypointFormat::D108),
            route_header: Some(RouteHeaderFormat::D202),
            track_header: Some(TrackHeaderFormat::D310),
            trackpoint: Some(TrackPointFormat::D301),
        }
    }

    fn header(name: &str) -> Vec<u8> {
        TrackHeaderFormat::D310.encode(&TrackHeader::named(name))
    }

    fn point(lat: f64) -> Vec<u8> {
        TrackPointFormat::D301.encode(&TrackPoint::new(lat, 10.0))
    }

    #[test]
    fn test_two_tracks_delivered_on_complete() {
        let mut asm = BulkAssembler::new(formats(), 10);
        assert_eq!(
            asm.push(PacketKind::Records, &[3, 0]),
            vec![AssemblerEvent::Started { total: 3 }]
        );
        assert!(asm.push(PacketKind::TrackHeader, &header("A")).is_empty());
        assert!(asm.push(PacketKind::TrackData, &point(1.0)).is_empty());
        assert!(asm.push(PacketKind::TrackData, &point(2.0)).is_empty());
        assert!(asm.push(PacketKind::TrackHeader, &header("B")).is_empty());
        assert!(asm.push(PacketKind::TrackData, &point(3.0)).is_empty());
        assert!(asm.is_collecting());

        let events = asm.push(PacketKind::XferComplete, &[6, 0]);
        let [AssemblerEvent::Tracks(tracks)] = events.as_slice() else {
            panic!("expected tracks, got {:?}", events);
        };
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].header.identification, "A");
        assert_eq!(tracks[0].points.len(), 2);
        assert_eq!(tracks[1].points.len(), 1);
        assert!(!asm.is_collecting());
    }

    #[test]
    fn test_trackpoint_without_header_synthesizes_track() {
        let mut asm = BulkAssembler::new(formats(), 10);
        asm.push(PacketKind::Records, &[2, 0]);
        asm.push(PacketKind::TrackData, &point(1.0));
        asm.push(PacketKind::TrackData, &point(2.0));
        let events = asm.push(PacketKind::XferComplete, &[]);
        assert!(matches!(
            events.as_slice(),
            [AssemblerEvent::Tracks(t)] if t.len() == 1 && t[0].points.len() == 2
        ));
    }

    #[test]
    fn test_routes_skip_links() {
        let mut asm = BulkAssembler::new(formats(), 10);
        let hdr = RouteHeaderFormat::D202.encode(&RouteHeader {
            identification: Some("R1".into()),
            ..Default::default()
        });
        let wpt = |name: &str| WaypointFormat::D108.encode(&Waypoint::new(name, 1.0, 2.0));
        asm.push(PacketKind::Records, &[4, 0]);
        asm.push(PacketKind::RouteHeader, &hdr);
        asm.push(PacketKind::RouteWaypoint, &wpt("A"));
        asm.push(PacketKind::RouteLink, &[0u8; 21]);
        asm.push(PacketKind::RouteWaypoint, &wpt("B"));
        let events = asm.push(PacketKind::XferComplete, &[]);
        let [AssemblerEvent::Routes(routes)] = events.as_slice() else {
            panic!("expected routes, got {:?}", events);
        };
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name(), "R1");
        let names: Vec<_> = routes[0].waypoints.iter().map(|w| w.identification.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_empty_block() {
        let mut asm = BulkAssembler::new(formats(), 10);
        asm.push(PacketKind::Records, &[0, 0]);
        assert_eq!(asm.push(PacketKind::XferComplete, &[]), vec![AssemblerEvent::Empty]);
    }

    #[test]
    fn test_packets_outside_block_are_ignored() {
        let mut asm = BulkAssembler::new(formats(), 10);
        assert!(asm.push(PacketKind::TrackData, &point(1.0)).is_empty());
        assert!(asm.push(PacketKind::XferComplete, &[]).is_empty());
        asm.push(PacketKind::Records, &[1, 0]);
        let events = asm.push(PacketKind::XferComplete, &[]);
        assert_eq!(events, vec![AssemblerEvent::Empty]);
    }

    #[test]
    fn test_progress_every_interval() {
        let mut asm = BulkAssembler::new(formats(), 10);
        asm.push(PacketKind::Records, &[25, 0]);
        let mut progress = Vec::new();
        for i in 0..25 {
            let payload = WaypointFormat::D108.encode(&Waypoint::new(format!("W{}", i), 0.0, 0.0));
            progress.extend(asm.push(PacketKind::WaypointData, &payload));
        }
        assert_eq!(
            progress,
            vec![
                AssemblerEvent::Progress { kind: BlockKind::Waypoints, done: 10, total: 25 },
                AssemblerEvent::Progress { kind: BlockKind::Waypoints, done: 20, total: 25 },
            ]
        );
        let events = asm.push(PacketKind::XferComplete, &[]);
        assert!(matches!(events.as_slice(), [AssemblerEvent::Waypoints(w)] if w.len() == 25));
    }

    #[test]
    fn test_malformed_record_is_dropped() {
        let mut asm = BulkAssembler::new(formats(), 10);
        asm.push(PacketKind::Records, &[2, 0]);
        asm.push(PacketKind::WaypointData, &[1, 2, 3]);
        asm.push(
            PacketKind::WaypointData,
            &WaypointFormat::D108.encode(&Waypoint::new("OK", 0.0, 0.0)),
        );
        let events = asm.push(PacketKind::XferComplete, &[]);
        assert!(matches!(events.as_slice(), [AssemblerEvent::Waypoints(w)] if w.len() == 1));
    }

    #[test]
    fn test_read_count() {
        assert_eq!(read_count(&[0x2C, 0x01]), 300);
        assert_eq!(read_count(&[5]), 5);
        assert_eq!(read_count(&[]), 0);
    }

    fn only_progress(events: &[AssemblerEvent]) -> bool {
        events
            .iter()
            .all(|e| matches!(e, AssemblerEvent::Progress { .. }))
    }

    proptest! {
        #[test]
        fn prop_tracks_grouped_as_sent(
            sizes in proptest::collection::vec(0usize..6, 1..8),
            interval in 1u32..5,
        ) {
            let mut asm = BulkAssembler::new(formats(), interval);
            let total: usize = sizes.iter().map(|n| n + 1).sum();
            asm.push(PacketKind::Records, &(total as u16).to_le_bytes());

            let mut progress = 0;
            for (i, &n) in sizes.iter().enumerate() {
                let events = asm.push(PacketKind::TrackHeader, &header(&format!("T{}", i)));
                prop_assert!(only_progress(&events));
                progress += events.len();
                for k in 0..n {
                    let events = asm.push(PacketKind::TrackData, &point(k as f64));
                    prop_assert!(only_progress(&events));
                    progress += events.len();
                }
            }
            prop_assert_eq!(progress, total / interval as usize);

            let events = asm.push(PacketKind::XferComplete, &[]);
            let [AssemblerEvent::Tracks(tracks)] = events.as_slice() else {
                return Err(TestCaseError::fail(format!("expected tracks, got {:?}", events)));
            };
            let names: Vec<_> = tracks.iter().map(|t| t.header.identification.clone()).collect();
            let expected: Vec<_> = (0..sizes.len()).map(|i| format!("T{}", i)).collect();
            prop_assert_eq!(names, expected);
            let lengths: Vec<usize> = tracks.iter().map(|t| t.points.len()).collect();
            prop_assert_eq!(lengths, sizes);
            prop_assert!(!asm.is_collecting());
        }
    }
}
