//! Track records
//!
//! ```text
//! D300: lat:i32 lon:i32 time:u32 new_trk:u8
//! D301: lat:i32 lon:i32 time:u32 alt:f32 dpth:f32 new_trk:u8
//! D310: dspl:u8 color:u8 ident\0
//! D311: index:u16
//! ```

use chrono::{DateTime, Utc};

use crate::datatypes::{RecordReader, RecordWriter};
use crate::error::ParseError;

const D310_IDENT_MAX: usize = 51;
const D300_LEN: usize = 13;
const D301_LEN: usize = 21;

/// Color index meaning "device default"
pub const DEFAULT_TRACK_COLOR: u8 = 0xFF;

/// A recorded position
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub time: Option<DateTime<Utc>>,
    pub altitude: Option<f32>,
    pub depth: Option<f32>,
    /// First point of a new track segment
    pub new_segment: bool,
}

impl TrackPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackHeader {
    pub identification: String,
    /// Shown on the map (D310)
    pub display: Option<bool>,
    pub color: Option<u8>,
    /// Track index (D311)
    pub index: Option<u16>,
}

impl TrackHeader {
    pub fn named(identification: impl Into<String>) -> Self {
        Self {
            identification: identification.into(),
            ..Default::default()
        }
    }
}

/// A track with its points in recording order
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
    pub header: TrackHeader,
    pub points: Vec<TrackPoint>,
}

impl Track {
    pub fn new(header: TrackHeader) -> Self {
        Self {
            header,
            points: Vec::new(),
        }
    }
}

/// Track header wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackHeaderFormat {
    D310,
    D311,
}

impl TrackHeaderFormat {
    pub const PRIORITY: [TrackHeaderFormat; 2] = [TrackHeaderFormat::D311, TrackHeaderFormat::D310];

    pub fn number(&self) -> u16 {
        match self {
            TrackHeaderFormat::D310 => 310,
            TrackHeaderFormat::D311 => 311,
        }
    }

    pub fn encode(&self, header: &TrackHeader) -> Vec<u8> {
        let mut w = RecordWriter::new();
        match self {
            TrackHeaderFormat::D310 => {
                w.bool(header.display.unwrap_or(true))
                    .u8(header.color.unwrap_or(DEFAULT_TRACK_COLOR))
                    .zstring(&header.identification, D310_IDENT_MAX);
            }
            TrackHeaderFormat::D311 => {
                w.u16(header.index.unwrap_or(0));
            }
        }
        w.finish()
    }

    pub fn decode(&self, data: &[u8]) -> Result<TrackHeader, ParseError> {
        let mut r = RecordReader::new(data);
        match self {
            TrackHeaderFormat::D310 => {
                r.require(2)?;
                let display = Some(r.bool()?);
                let color = Some(r.u8()?);
                Ok(TrackHeader {
                    identification: r.zstring(D310_IDENT_MAX),
                    display,
                    color,
                    index: None,
                })
            }
            TrackHeaderFormat::D311 => {
                let index = r.u16()?;
                Ok(TrackHeader {
                    identification: format!("Track {}", index),
                    index: Some(index),
                    ..Default::default()
                })
            }
        }
    }
}

/// Trackpoint wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackPointFormat {
    D300,
    D301,
}

impl TrackPointFormat {
    pub const PRIORITY: [TrackPointFormat; 2] = [TrackPointFormat::D301, TrackPointFormat::D300];

    pub fn number(&self) -> u16 {
        match self {
            TrackPointFormat::D300 => 300,
            TrackPointFormat::D301 => 301,
        }
    }

    pub fn encode(&self, point: &TrackPoint) -> Vec<u8> {
        let mut w = RecordWriter::with_capacity(D301_LEN);
        w.semicircles(point.latitude)
            .semicircles(point.longitude)
            .time(point.time);
        if *self == TrackPointFormat::D301 {
            w.optional_f32(point.altitude).optional_f32(point.depth);
        }
        w.bool(point.new_segment);
        w.finish()
    }

    pub fn decode(&self, data: &[u8]) -> Result<TrackPoint, ParseError> {
        let mut r = RecordReader::new(data);
        r.require(match self {
            TrackPointFormat::D300 => D300_LEN,
            TrackPointFormat::D301 => D301_LEN,
        })?;
        let latitude = r.semicircles()?;
        let longitude = r.semicircles()?;
        let time = r.time()?;
        let (altitude, depth) = match self {
            TrackPointFormat::D300 => (None, None),
            TrackPointFormat::D301 => (r.optional_f32()?, r.optional_f32()?),
        };
        Ok(TrackPoint {
            latitude,
            longitude,
            time,
            altitude,
            depth,
            new_segment: r.bool()?,
        })
    }
}
