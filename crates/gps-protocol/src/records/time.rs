//! Date/time (D600) and position (D700) records
//!
//! ```text
//! D600: month:u8 day:u8 year:u16 hour:u16 minute:u8 second:u8
//! D700: lat:f64 lon:f64   (radians)
//! ```

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use crate::datatypes::{RecordReader, RecordWriter};
use crate::error::ParseError;

/// Decode a D600 date/time record
pub fn decode_d600(data: &[u8]) -> Result<DateTime<Utc>, ParseError> {
    let mut r = RecordReader::new(data);
    r.require(8)?;
    let month = r.u8()?;
    let day = r.u8()?;
    let year = r.u16()?;
    let hour = r.u16()?;
    let minute = r.u8()?;
    let second = r.u8()?;
    NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
        .and_then(|d| d.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second)))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ParseError::InvalidValue {
            field: "date_time",
            value: format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })
}

pub fn encode_d600(time: &DateTime<Utc>) -> Vec<u8> {
    RecordWriter::with_capacity(8)
        .u8(time.month() as u8)
        .u8(time.day() as u8)
        .u16(time.year().clamp(0, i32::from(u16::MAX)) as u16)
        .u16(time.hour() as u16)
        .u8(time.minute() as u8)
        .u8(time.second() as u8)
        .finish()
}

/// A bare position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn decode_d700(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = RecordReader::new(data);
        r.require(16)?;
        Ok(Self {
            latitude: r.radians()?,
            longitude: r.radians()?,
        })
    }

    pub fn encode_d700(&self) -> Vec<u8> {
        RecordWriter::with_capacity(16)
            .radians(self.latitude)
            .radians(self.longitude)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_d600_roundtrip() {
        let t = Utc.with_ymd_and_hms(2009, 11, 30, 23, 5, 59).unwrap();
        let data = encode_d600(&t);
        assert_eq!(data, vec![11, 30, 0xD9, 0x07, 23, 0, 5, 59]);
        assert_eq!(decode_d600(&data).unwrap(), t);
    }

    #[test]
    fn test_d600_rejects_impossible_date() {
        let data = [2, 30, 0xD9, 0x07, 0, 0, 0, 0];
        assert!(matches!(
            decode_d600(&data),
            Err(ParseError::InvalidValue { field: "date_time", .. })
        ));
    }

    #[test]
    fn test_d700_roundtrip() {
        let p = Position {
            latitude: -12.5,
            longitude: 130.75,
        };
        let back = Position::decode_d700(&p.encode_d700()).unwrap();
        assert!((back.latitude - p.latitude).abs() < 1e-12);
        assert!((back.longitude - p.longitude).abs() < 1e-12);
    }
}
