//! Position, velocity and time records (D800, D802)
//!
//! # D800 layout (64 bytes)
//! ```text
//! alt:f32 epe:f32 eph:f32 epv:f32 fix:i16 tow:f64 lat:f64 lon:f64
//! east:f32 north:f32 up:f32 msl_hght:f32 leap_scnds:i16 wn_days:u32
//! ```
//! Latitude and longitude are radians. D802 starts with the same 64 bytes;
//! anything after them is ignored.

use chrono::{DateTime, Utc};

use crate::datatypes::{pvt_time_to_utc, RecordReader, RecordWriter};
use crate::error::ParseError;

const D800_LEN: usize = 64;

/// Quality of a position fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FixType {
    /// Receiver failed integrity check
    Unusable,
    /// No fix yet
    #[default]
    Invalid,
    TwoD,
    ThreeD,
    TwoDDifferential,
    ThreeDDifferential,
    Unknown(i16),
}

impl FixType {
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0 => FixType::Unusable,
            1 => FixType::Invalid,
            2 => FixType::TwoD,
            3 => FixType::ThreeD,
            4 => FixType::TwoDDifferential,
            5 => FixType::ThreeDDifferential,
            other => FixType::Unknown(other),
        }
    }

    pub fn to_raw(&self) -> i16 {
        match self {
            FixType::Unusable => 0,
            FixType::Invalid => 1,
            FixType::TwoD => 2,
            FixType::ThreeD => 3,
            FixType::TwoDDifferential => 4,
            FixType::ThreeDDifferential => 5,
            FixType::Unknown(raw) => *raw,
        }
    }

    /// Whether the record carries a usable position
    pub fn has_position(&self) -> bool {
        matches!(
            self,
            FixType::TwoD
                | FixType::ThreeD
                | FixType::TwoDDifferential
                | FixType::ThreeDDifferential
        )
    }
}

/// One position/velocity/time report
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pvt {
    /// Altitude above the WGS84 ellipsoid in meters
    pub altitude: f32,
    /// Estimated position error, meters (2 sigma)
    pub epe: f32,
    /// Horizontal position error, meters
    pub eph: f32,
    /// Vertical position error, meters
    pub epv: f32,
    pub fix: FixType,
    /// Seconds since the start of the GPS week
    pub time_of_week: f64,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Velocity east, m/s
    pub east: f32,
    /// Velocity north, m/s
    pub north: f32,
    /// Velocity up, m/s
    pub up: f32,
    /// Height of the WGS84 ellipsoid above mean sea level, meters
    pub msl_height: f32,
    /// Difference between GPS and UTC, seconds
    pub leap_seconds: i16,
    /// Days from 1989-12-31 to the start of the current week
    pub week_number_days: u32,
}

impl Pvt {
    /// UTC time of the report
    pub fn time(&self) -> Option<DateTime<Utc>> {
        pvt_time_to_utc(self.week_number_days, self.time_of_week, self.leap_seconds)
    }

    /// Altitude above mean sea level in meters
    pub fn altitude_msl(&self) -> f32 {
        self.altitude + self.msl_height
    }

    /// Horizontal speed in m/s
    pub fn speed(&self) -> f64 {
        f64::from(self.east).hypot(f64::from(self.north))
    }

    /// Course over ground in degrees clockwise from true north, `[0, 360)`
    pub fn heading(&self) -> f64 {
        let degrees = f64::from(self.east)
            .atan2(f64::from(self.north))
            .to_degrees();
        if degrees < 0.0 {
            degrees + 360.0
        } else {
            degrees
        }
    }
}

/// PVT wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PvtFormat {
    D800,
    D802,
}

impl PvtFormat {
    pub const PRIORITY: [PvtFormat; 2] = [PvtFormat::D802, PvtFormat::D800];

    pub fn number(&self) -> u16 {
        match self {
            PvtFormat::D800 => 800,
            PvtFormat::D802 => 802,
        }
    }

    pub fn encode(&self, pvt: &Pvt) -> Vec<u8> {
        RecordWriter::with_capacity(D800_LEN)
            .f32(pvt.altitude)
            .f32(pvt.epe)
            .f32(pvt.eph)
            .f32(pvt.epv)
            .i16(pvt.fix.to_raw())
            .f64(pvt.time_of_week)
            .radians(pvt.latitude)
            .radians(pvt.longitude)
            .f32(pvt.east)
            .f32(pvt.north)
            .f32(pvt.up)
            .f32(pvt.msl_height)
            .i16(pvt.leap_seconds)
            .u32(pvt.week_number_days)
            .finish()
    }

    pub fn decode(&self, data: &[u8]) -> Result<Pvt, ParseError> {
        let mut r = RecordReader::new(data);
        r.require(D800_LEN)?;
        Ok(Pvt {
            altitude: r.f32()?,
            epe: r.f32()?,
            eph: r.f32()?,
            epv: r.f32()?,
            fix: FixType::from_raw(r.i16()?),
            time_of_week: r.f64()?,
            latitude: r.radians()?,
            longitude: r.radians()?,
            east: r.f32()?,
            north: r.f32()?,
            up: r.f32()?,
            msl_height: r.f32()?,
            leap_seconds: r.i16()?,
            week_number_days: r.u32()?,
        })
    }
}
