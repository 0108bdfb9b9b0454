//! Session event stream
//!
//! Everything observers care about (operation progress, raw traffic,
//! position fixes, disconnects) is published on one broadcast channel.
//! Slow subscribers lag and lose events; the session never waits for them.

use std::fmt;

use chrono::{DateTime, Utc};
use gps_protocol::records::{FixType, Pvt};

/// Operations a session performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Open,
    GetWaypoints,
    GetRoutes,
    GetTracks,
    SetWaypoints,
    SetRoutes,
    SetTracks,
    GetPvt,
    PvtStream,
    Screenshot,
    SerialNumber,
    File,
    FlashInfo,
    DateTime,
    Position,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Open => "open",
            Operation::GetWaypoints => "get waypoints",
            Operation::GetRoutes => "get routes",
            Operation::GetTracks => "get tracks",
            Operation::SetWaypoints => "set waypoints",
            Operation::SetRoutes => "set routes",
            Operation::SetTracks => "set tracks",
            Operation::GetPvt => "get PVT",
            Operation::PvtStream => "PVT stream",
            Operation::Screenshot => "screenshot",
            Operation::SerialNumber => "serial number",
            Operation::File => "file transfer",
            Operation::FlashInfo => "flash info",
            Operation::DateTime => "date/time",
            Operation::Position => "position",
        };
        f.write_str(name)
    }
}

/// A position fix as consumers display it
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// Meters above mean sea level
    pub altitude: f32,
    /// Degrees clockwise from true north
    pub heading: f64,
    /// Meters per second
    pub speed: f64,
    /// Estimated position error in meters
    pub epe: f32,
    pub fix: FixType,
    pub time: Option<DateTime<Utc>>,
}

impl From<&Pvt> for PositionFix {
    fn from(pvt: &Pvt) -> Self {
        Self {
            latitude: pvt.latitude,
            longitude: pvt.longitude,
            altitude: pvt.altitude_msl(),
            heading: pvt.heading(),
            speed: pvt.speed(),
            epe: pvt.epe,
            fix: pvt.fix,
            time: pvt.time(),
        }
    }
}

/// Events published by a session
#[derive(Debug, Clone)]
pub enum GpsEvent {
    /// An operation started; `total` is the expected packet count when known
    OperationStarted {
        operation: Operation,
        total: Option<u32>,
    },

    /// Packets processed so far in a bulk transfer
    OperationProgress {
        operation: Operation,
        done: u32,
        total: u32,
    },

    /// An operation finished
    OperationEnded { operation: Operation, success: bool },

    /// Raw frame received from the device
    FrameIn { data: Vec<u8> },

    /// Raw frame written to the device
    FrameOut { data: Vec<u8> },

    /// Position report decoded from PVT data
    Position(PositionFix),

    /// The byte stream ended or failed
    Disconnected { reason: String },
}
