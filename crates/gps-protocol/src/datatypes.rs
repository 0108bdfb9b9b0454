//! Binary data types used inside packet payloads
//!
//! All multi-byte values are little-endian. Angles travel either as
//! semicircles (`2^31` semicircles = 180°) in a signed 32-bit integer or as
//! radians in an IEEE double. Times are seconds since 1990-01-01T00:00:00Z.
//!
//! [`RecordReader`] and [`RecordWriter`] wrap the primitive conversions with
//! a cursor so the record codecs read like the wire layout they implement.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::ParseError;

/// Semicircles per degree numerator (`2^31`)
const SEMICIRCLE_SCALE: f64 = 2_147_483_648.0;

/// Seconds between the Unix epoch and 1990-01-01T00:00:00Z
pub const DEVICE_EPOCH_OFFSET_SECS: i64 = 631_065_600;

/// Raw device time meaning "no time recorded"
pub const UNKNOWN_TIME: u32 = 0xFFFF_FFFF;

/// Float value used by the device for "not available"
pub const UNKNOWN_FLOAT: f32 = 1.0e25;

/// Convert a semicircle angle to degrees
pub fn semicircles_to_degrees(semicircles: i32) -> f64 {
    f64::from(semicircles) * 180.0 / SEMICIRCLE_SCALE
}

/// Convert degrees to a semicircle angle
///
/// The result is truncated toward zero and wrapped to 32 bits, so 180° and
/// -180° share the pattern `0x8000_0000`.
pub fn degrees_to_semicircles(degrees: f64) -> i32 {
    (degrees * SEMICIRCLE_SCALE / 180.0) as i64 as i32
}

/// Convert radians to degrees
pub fn radians_to_degrees(radians: f64) -> f64 {
    radians.to_degrees()
}

/// Convert degrees to radians
pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees.to_radians()
}

/// The device epoch, 1990-01-01T00:00:00Z
pub fn device_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(DEVICE_EPOCH_OFFSET_SECS, 0).unwrap_or_default()
}

/// Decode a device time; [`UNKNOWN_TIME`] yields `None`
pub fn device_time_to_utc(raw: u32) -> Option<DateTime<Utc>> {
    if raw == UNKNOWN_TIME {
        return None;
    }
    Utc.timestamp_opt(i64::from(raw) + DEVICE_EPOCH_OFFSET_SECS, 0)
        .single()
}

/// Decode a device time held in a signed field; negative values yield `None`
pub fn signed_device_time_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    if raw < 0 || raw >= i64::from(UNKNOWN_TIME) {
        return None;
    }
    Utc.timestamp_opt(raw + DEVICE_EPOCH_OFFSET_SECS, 0).single()
}

/// Encode a time as device seconds; `None` and pre-epoch times become [`UNKNOWN_TIME`]
pub fn utc_to_device_time(time: Option<DateTime<Utc>>) -> u32 {
    time.map(|t| t.timestamp() - DEVICE_EPOCH_OFFSET_SECS)
        .filter(|secs| (0..i64::from(UNKNOWN_TIME)).contains(secs))
        .map(|secs| secs as u32)
        .unwrap_or(UNKNOWN_TIME)
}

/// Time of a PVT record: days since 1989-12-31 plus time of week, minus leap seconds
pub fn pvt_time_to_utc(wn_days: u32, tow: f64, leap_seconds: i16) -> Option<DateTime<Utc>> {
    let base = Utc.with_ymd_and_hms(1989, 12, 31, 0, 0, 0).single()?;
    let millis = (tow * 1000.0).round() as i64 - i64::from(leap_seconds) * 1000;
    base.checked_add_signed(Duration::days(i64::from(wn_days)))?
        .checked_add_signed(Duration::milliseconds(millis))
}

/// Map an optional float through the "not available" sentinel
pub fn float_or_unknown(value: f32) -> Option<f32> {
    if value >= UNKNOWN_FLOAT * 0.99 {
        None
    } else {
        Some(value)
    }
}

/// Decode a fixed-width, space-padded string
///
/// Stops at the first zero byte, trims trailing spaces.
pub fn decode_fixed_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    latin1_to_string(&data[..end]).trim_end().to_string()
}

/// Decode a zero-terminated string of at most `max_len` bytes
///
/// Returns the string and the number of bytes consumed (including the
/// terminator when one was found within the limit).
pub fn decode_zstring(data: &[u8], max_len: usize) -> (String, usize) {
    let limit = data.len().min(max_len);
    match data[..limit].iter().position(|&b| b == 0) {
        Some(end) => (latin1_to_string(&data[..end]), end + 1),
        None => (latin1_to_string(&data[..limit]), limit),
    }
}

/// Encode a string into exactly `width` bytes, padding with spaces
pub fn encode_fixed_string(value: &str, width: usize) -> Vec<u8> {
    let mut out = string_to_latin1(value);
    out.truncate(width);
    out.resize(width, b' ');
    out
}

/// Encode a zero-terminated string, truncated so that it fits `max_len` bytes with the terminator
pub fn encode_zstring(value: &str, max_len: usize) -> Vec<u8> {
    let mut out = string_to_latin1(value);
    out.truncate(max_len.saturating_sub(1));
    out.push(0);
    out
}

fn latin1_to_string(data: &[u8]) -> String {
    data.iter().map(|&b| char::from(b)).collect()
}

fn string_to_latin1(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Cursor over a record payload
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Fail unless the payload holds at least `needed` bytes in total
    pub fn require(&self, needed: usize) -> Result<(), ParseError> {
        if self.data.len() < needed {
            return Err(ParseError::TooShort {
                needed,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Current offset into the payload
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Unread bytes
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Take the next `len` raw bytes
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ParseError::TooShort {
                needed: end,
                actual: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, ParseError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, ParseError> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn i16(&mut self) -> Result<i16, ParseError> {
        Ok(LittleEndian::read_i16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, ParseError> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn i32(&mut self) -> Result<i32, ParseError> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    pub fn f32(&mut self) -> Result<f32, ParseError> {
        Ok(LittleEndian::read_f32(self.bytes(4)?))
    }

    pub fn f64(&mut self) -> Result<f64, ParseError> {
        Ok(LittleEndian::read_f64(self.bytes(8)?))
    }

    /// Semicircle angle as degrees
    pub fn semicircles(&mut self) -> Result<f64, ParseError> {
        Ok(semicircles_to_degrees(self.i32()?))
    }

    /// Radian angle (f64) as degrees
    pub fn radians(&mut self) -> Result<f64, ParseError> {
        Ok(radians_to_degrees(self.f64()?))
    }

    /// Device time
    pub fn time(&mut self) -> Result<Option<DateTime<Utc>>, ParseError> {
        Ok(device_time_to_utc(self.u32()?))
    }

    /// Optional float using the "not available" sentinel
    pub fn optional_f32(&mut self) -> Result<Option<f32>, ParseError> {
        Ok(float_or_unknown(self.f32()?))
    }

    /// Fixed-width space-padded string
    pub fn fixed_string(&mut self, width: usize) -> Result<String, ParseError> {
        Ok(decode_fixed_string(self.bytes(width)?))
    }

    /// Zero-terminated string; a missing tail reads as empty
    pub fn zstring(&mut self, max_len: usize) -> String {
        let (value, consumed) = decode_zstring(self.rest(), max_len);
        self.pos += consumed;
        value
    }
}

/// Builder for a record payload
#[derive(Debug, Clone, Default)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.u8(u8::from(value))
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        let mut raw = [0u8; 2];
        LittleEndian::write_u16(&mut raw, value);
        self.bytes(&raw)
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        let mut raw = [0u8; 2];
        LittleEndian::write_i16(&mut raw, value);
        self.bytes(&raw)
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        let mut raw = [0u8; 4];
        LittleEndian::write_u32(&mut raw, value);
        self.bytes(&raw)
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        let mut raw = [0u8; 4];
        LittleEndian::write_i32(&mut raw, value);
        self.bytes(&raw)
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        let mut raw = [0u8; 4];
        LittleEndian::write_f32(&mut raw, value);
        self.bytes(&raw)
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        let mut raw = [0u8; 8];
        LittleEndian::write_f64(&mut raw, value);
        self.bytes(&raw)
    }

    pub fn semicircles(&mut self, degrees: f64) -> &mut Self {
        self.i32(degrees_to_semicircles(degrees))
    }

    pub fn radians(&mut self, degrees: f64) -> &mut Self {
        self.f64(degrees_to_radians(degrees))
    }

    pub fn time(&mut self, time: Option<DateTime<Utc>>) -> &mut Self {
        self.u32(utc_to_device_time(time))
    }

    pub fn optional_f32(&mut self, value: Option<f32>) -> &mut Self {
        self.f32(value.unwrap_or(UNKNOWN_FLOAT))
    }

    pub fn fixed_string(&mut self, value: &str, width: usize) -> &mut Self {
        let encoded = encode_fixed_string(value, width);
        self.bytes(&encoded)
    }

    pub fn zstring(&mut self, value: &str, max_len: usize) -> &mut Self {
        let encoded = encode_zstring(value, max_len);
        self.bytes(&encoded)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_semicircle_reference_points() {
        assert_eq!(degrees_to_semicircles(0.0), 0);
        assert_eq!(degrees_to_semicircles(90.0), 1 << 30);
        assert_eq!(degrees_to_semicircles(-90.0), -(1 << 30));
        assert_eq!(degrees_to_semicircles(180.0), i32::MIN);
        assert_eq!(degrees_to_semicircles(-180.0), i32::MIN);
        assert_eq!(semicircles_to_degrees(i32::MIN), -180.0);
        assert_eq!(semicircles_to_degrees(1 << 30), 90.0);
    }

    #[test]
    fn test_semicircle_roundtrip_representative_values() {
        for raw in [0, 1, -1, 12_345, -98_765, 1 << 29, i32::MAX, i32::MIN + 1] {
            assert_eq!(degrees_to_semicircles(semicircles_to_degrees(raw)), raw);
        }
    }

    #[test]
    fn test_device_epoch() {
        let epoch = device_time_to_utc(0).unwrap();
        assert_eq!(epoch.to_rfc3339(), "1990-01-01T00:00:00+00:00");
        assert_eq!(epoch, device_epoch());
        assert_eq!(device_time_to_utc(UNKNOWN_TIME), None);
        assert_eq!(signed_device_time_to_utc(-1), None);
    }

    #[test]
    fn test_device_time_encode() {
        let t = device_time_to_utc(86_400).unwrap();
        assert_eq!(utc_to_device_time(Some(t)), 86_400);
        assert_eq!(utc_to_device_time(None), UNKNOWN_TIME);
        let before_epoch = Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(utc_to_device_time(Some(before_epoch)), UNKNOWN_TIME);
    }

    #[test]
    fn test_pvt_time() {
        // 1990-01-07 is day 7 after 1989-12-31; one hour into it, no leap seconds
        let t = pvt_time_to_utc(7, 3600.0, 0).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(1990, 1, 7, 1, 0, 0).unwrap());

        let t = pvt_time_to_utc(7, 3600.0, 10).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(1990, 1, 7, 0, 59, 50).unwrap());
    }

    #[test]
    fn test_signed_integers_from_bit_patterns() {
        let mut r = RecordReader::new(&[0xFF, 0xFF, 0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(r.i16().unwrap(), -1);
        assert_eq!(r.i32().unwrap(), -2);
        let mut r = RecordReader::new(&[0x00, 0x80]);
        assert_eq!(r.i16().unwrap(), i16::MIN);
    }

    #[test]
    fn test_fixed_strings() {
        assert_eq!(encode_fixed_string("ABC", 6), b"ABC   ".to_vec());
        assert_eq!(encode_fixed_string("TOOLONGNAME", 6), b"TOOLON".to_vec());
        assert_eq!(decode_fixed_string(b"ABC   "), "ABC");
        assert_eq!(decode_fixed_string(b"AB\0XYZ"), "AB");
    }

    #[test]
    fn test_zero_terminated_strings() {
        assert_eq!(decode_zstring(b"HOME\0REST", 51), ("HOME".to_string(), 5));
        // No terminator within the limit: stop at the limit
        assert_eq!(decode_zstring(b"ABCDEFGH", 4), ("ABCD".to_string(), 4));
        assert_eq!(encode_zstring("HOME", 51), b"HOME\0".to_vec());
        assert_eq!(encode_zstring("ABCDEFGH", 4), b"ABC\0".to_vec());
    }

    #[test]
    fn test_latin1_strings() {
        let encoded = encode_zstring("Zürich", 51);
        assert_eq!(encoded[1], 0xFC);
        assert_eq!(decode_zstring(&encoded, 51).0, "Zürich");
        assert_eq!(encode_fixed_string("日本", 2), b"??".to_vec());
    }

    #[test]
    fn test_reader_reports_short_data() {
        let mut r = RecordReader::new(&[1, 2, 3]);
        assert_eq!(
            r.u32(),
            Err(ParseError::TooShort {
                needed: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_unknown_float() {
        assert_eq!(float_or_unknown(UNKNOWN_FLOAT), None);
        assert_eq!(float_or_unknown(123.5), Some(123.5));
    }

    proptest! {
        #[test]
        fn prop_semicircle_roundtrip(raw in any::<i32>()) {
            prop_assert_eq!(degrees_to_semicircles(semicircles_to_degrees(raw)), raw);
        }

        #[test]
        fn prop_writer_reader_agree(a in any::<u16>(), b in any::<i32>(), c in any::<f64>()) {
            let mut w = RecordWriter::new();
            w.u16(a).i32(b).f64(c);
            let data = w.finish();
            let mut r = RecordReader::new(&data);
            prop_assert_eq!(r.u16().unwrap(), a);
            prop_assert_eq!(r.i32().unwrap(), b);
            prop_assert_eq!(r.f64().unwrap().to_bits(), c.to_bits());
        }
    }
}
