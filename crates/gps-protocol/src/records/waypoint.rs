//! Waypoint records (D100, D101, D102, D103, D107, D108, D109)
//!
//! The older formats are fixed-size with space-padded identifiers and
//! comments; D108 and D109 carry a fixed block followed by a run of
//! zero-terminated strings.
//!
//! # D100 layout
//! ```text
//! ident[6] lat:i32 lon:i32 unused:u32 cmnt[40]
//! ```
//! D101/D102/D103/D107 append symbol, display and proximity fields.
//!
//! # D108 layout
//! ```text
//! class:u8 color:u8 dspl:u8 attr:u8 smbl:u16 subclass[18] lat:i32 lon:i32
//! alt:f32 dpth:f32 dist:f32 state[2] cc[2]
//! ident\0 cmnt\0 facility\0 city\0 addr\0 cross_road\0
//! ```
//! D109 prefixes a data-type byte, packs color and display into one byte and
//! adds an estimated-time-en-route `u32` before the strings. The strings
//! are shortened from the end so an encoded record never exceeds one
//! packet.

use crate::datatypes::{RecordReader, RecordWriter};
use crate::error::ParseError;
use crate::packet::MAX_PAYLOAD;
use tracing::warn;

const D100_IDENT_LEN: usize = 6;
const D100_COMMENT_LEN: usize = 40;
const D108_IDENT_MAX: usize = 51;
const D108_COMMENT_MAX: usize = 51;
const D108_FACILITY_MAX: usize = 31;
const D108_CITY_MAX: usize = 25;
const D108_ADDRESS_MAX: usize = 51;
const D108_CROSS_ROAD_MAX: usize = 51;

const D108_ATTR: u8 = 0x60;
const D109_ATTR: u8 = 0x70;
const D109_DTYP: u8 = 0x01;
const D108_DEFAULT_COLOR: u8 = 0xFF;
const D109_DEFAULT_COLOR: u8 = 0x1F;
const UNKNOWN_ETE: u32 = 0xFFFF_FFFF;

/// Subclass bytes of a user waypoint
pub const USER_SUBCLASS: [u8; 18] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF,
];

/// A waypoint in its logical form
///
/// Which optional fields survive a transfer depends on the wire format the
/// device negotiated.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Waypoint {
    /// Identifier (name)
    pub identification: String,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: Option<f32>,
    /// Depth in meters
    pub depth: Option<f32>,
    /// Proximity distance in meters
    pub proximity_distance: Option<f32>,
    pub comment: Option<String>,
    pub symbol: Option<u16>,
    /// Waypoint class (user, airport, ...)
    pub class: Option<u8>,
    pub color: Option<u8>,
    /// Display attribute (symbol + name, symbol only, symbol + comment)
    pub display: Option<u8>,
    pub subclass: Option<Vec<u8>>,
    pub facility: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub cross_road: Option<String>,
    pub state: Option<String>,
    pub country_code: Option<String>,
    /// Estimated time en route in seconds (D109)
    pub estimated_time_enroute: Option<u32>,
}

impl Waypoint {
    /// Create a waypoint with only identifier and position
    pub fn new(identification: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            identification: identification.into(),
            latitude,
            longitude,
            ..Default::default()
        }
    }
}

/// Waypoint wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaypointFormat {
    D100,
    D101,
    D102,
    D103,
    D107,
    D108,
    D109,
}

impl WaypointFormat {
    /// Selection order, most capable first
    pub const PRIORITY: [WaypointFormat; 7] = [
        WaypointFormat::D109,
        WaypointFormat::D108,
        WaypointFormat::D107,
        WaypointFormat::D103,
        WaypointFormat::D102,
        WaypointFormat::D101,
        WaypointFormat::D100,
    ];

    /// Capability number of this format
    pub fn number(&self) -> u16 {
        match self {
            WaypointFormat::D100 => 100,
            WaypointFormat::D101 => 101,
            WaypointFormat::D102 => 102,
            WaypointFormat::D103 => 103,
            WaypointFormat::D107 => 107,
            WaypointFormat::D108 => 108,
            WaypointFormat::D109 => 109,
        }
    }

    /// Encode a waypoint
    pub fn encode(&self, wpt: &Waypoint) -> Vec<u8> {
        match self {
            WaypointFormat::D108 | WaypointFormat::D109 => encode_d108_family(*self, wpt),
            _ => encode_fixed_family(*self, wpt),
        }
    }

    /// Decode a waypoint
    pub fn decode(&self, data: &[u8]) -> Result<Waypoint, ParseError> {
        match self {
            WaypointFormat::D108 | WaypointFormat::D109 => decode_d108_family(*self, data),
            _ => decode_fixed_family(*self, data),
        }
    }
}

fn none_if_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Proximity distance in the fixed formats, where 0 means "none"
fn proximity_or_none(value: f32) -> Option<f32> {
    (value != 0.0).then_some(value)
}

fn encode_fixed_family(format: WaypointFormat, wpt: &Waypoint) -> Vec<u8> {
    let mut w = RecordWriter::with_capacity(65);
    w.fixed_string(&wpt.identification, D100_IDENT_LEN)
        .semicircles(wpt.latitude)
        .semicircles(wpt.longitude)
        .u32(0)
        .fixed_string(wpt.comment.as_deref().unwrap_or(""), D100_COMMENT_LEN);

    let symbol = wpt.symbol.unwrap_or(0);
    let narrow_symbol = u8::try_from(symbol).unwrap_or_else(|_| {
        warn!("Symbol {} does not fit {:?}, sending 0", symbol, format);
        0
    });
    let proximity = wpt.proximity_distance.unwrap_or(0.0);
    match format {
        WaypointFormat::D101 => {
            w.f32(proximity).u8(narrow_symbol);
        }
        WaypointFormat::D102 => {
            w.f32(proximity).u16(symbol);
        }
        WaypointFormat::D103 => {
            w.u8(narrow_symbol).u8(wpt.display.unwrap_or(0));
        }
        WaypointFormat::D107 => {
            w.u8(narrow_symbol)
                .u8(wpt.display.unwrap_or(0))
                .f32(proximity)
                .u8(wpt.color.unwrap_or(0));
        }
        _ => {}
    }
    w.finish()
}

fn decode_fixed_family(format: WaypointFormat, data: &[u8]) -> Result<Waypoint, ParseError> {
    let needed = match format {
        WaypointFormat::D101 => 63,
        WaypointFormat::D102 => 64,
        WaypointFormat::D103 => 60,
        WaypointFormat::D107 => 65,
        _ => 58,
    };
    let mut r = RecordReader::new(data);
    r.require(needed)?;

    let identification = r.fixed_string(D100_IDENT_LEN)?;
    let latitude = r.semicircles()?;
    let longitude = r.semicircles()?;
    let _unused = r.u32()?;
    let comment = none_if_empty(r.fixed_string(D100_COMMENT_LEN)?);

    let mut wpt = Waypoint {
        identification,
        latitude,
        longitude,
        comment,
        ..Default::default()
    };

    match format {
        WaypointFormat::D101 => {
            wpt.proximity_distance = proximity_or_none(r.f32()?);
            wpt.symbol = Some(u16::from(r.u8()?));
        }
        WaypointFormat::D102 => {
            wpt.proximity_distance = proximity_or_none(r.f32()?);
            wpt.symbol = Some(r.u16()?);
        }
        WaypointFormat::D103 => {
            wpt.symbol = Some(u16::from(r.u8()?));
            wpt.display = Some(r.u8()?);
        }
        WaypointFormat::D107 => {
            wpt.symbol = Some(u16::from(r.u8()?));
            wpt.display = Some(r.u8()?);
            wpt.proximity_distance = proximity_or_none(r.f32()?);
            wpt.color = Some(r.u8()?);
        }
        _ => {}
    }
    Ok(wpt)
}

fn encode_d108_family(format: WaypointFormat, wpt: &Waypoint) -> Vec<u8> {
    let mut w = RecordWriter::with_capacity(128);
    let display = wpt.display.unwrap_or(0);

    if format == WaypointFormat::D109 {
        let color = wpt.color.unwrap_or(D109_DEFAULT_COLOR) & 0x1F;
        w.u8(D109_DTYP)
            .u8(wpt.class.unwrap_or(0))
            .u8(color | ((display & 0x03) << 5))
            .u8(D109_ATTR);
    } else {
        w.u8(wpt.class.unwrap_or(0))
            .u8(wpt.color.unwrap_or(D108_DEFAULT_COLOR))
            .u8(display)
            .u8(D108_ATTR);
    }

    let mut subclass = wpt.subclass.clone().unwrap_or_else(|| USER_SUBCLASS.to_vec());
    subclass.resize(USER_SUBCLASS.len(), 0xFF);

    w.u16(wpt.symbol.unwrap_or(0))
        .bytes(&subclass)
        .semicircles(wpt.latitude)
        .semicircles(wpt.longitude)
        .optional_f32(wpt.altitude)
        .optional_f32(wpt.depth)
        .optional_f32(wpt.proximity_distance)
        .fixed_string(wpt.state.as_deref().unwrap_or(""), 2)
        .fixed_string(wpt.country_code.as_deref().unwrap_or(""), 2);

    if format == WaypointFormat::D109 {
        w.u32(wpt.estimated_time_enroute.unwrap_or(UNKNOWN_ETE));
    }

    let strings = [
        (wpt.identification.as_str(), D108_IDENT_MAX),
        (wpt.comment.as_deref().unwrap_or(""), D108_COMMENT_MAX),
        (wpt.facility.as_deref().unwrap_or(""), D108_FACILITY_MAX),
        (wpt.city.as_deref().unwrap_or(""), D108_CITY_MAX),
        (wpt.address.as_deref().unwrap_or(""), D108_ADDRESS_MAX),
        (wpt.cross_road.as_deref().unwrap_or(""), D108_CROSS_ROAD_MAX),
    ];
    // The record must fit one packet: later strings are cut first and
    // always keep their terminator
    let mut budget = MAX_PAYLOAD.saturating_sub(w.len());
    for (i, (value, max_len)) in strings.iter().enumerate() {
        let reserved = strings.len() - i - 1;
        let before = w.len();
        w.zstring(value, (*max_len).min(budget.saturating_sub(reserved)));
        budget = budget.saturating_sub(w.len() - before);
    }
    w.finish()
}

fn decode_d108_family(format: WaypointFormat, data: &[u8]) -> Result<Waypoint, ParseError> {
    let mut r = RecordReader::new(data);
    let mut wpt = Waypoint::default();

    if format == WaypointFormat::D109 {
        r.require(53)?;
        let _dtyp = r.u8()?;
        wpt.class = Some(r.u8()?);
        let dspl_color = r.u8()?;
        wpt.color = Some(dspl_color & 0x1F);
        wpt.display = Some((dspl_color >> 5) & 0x03);
        let _attr = r.u8()?;
    } else {
        r.require(48)?;
        wpt.class = Some(r.u8()?);
        wpt.color = Some(r.u8()?);
        wpt.display = Some(r.u8()?);
        let _attr = r.u8()?;
    }

    wpt.symbol = Some(r.u16()?);
    wpt.subclass = Some(r.bytes(USER_SUBCLASS.len())?.to_vec());
    wpt.latitude = r.semicircles()?;
    wpt.longitude = r.semicircles()?;
    wpt.altitude = r.optional_f32()?;
    wpt.depth = r.optional_f32()?;
    wpt.proximity_distance = r.optional_f32()?;
    wpt.state = none_if_empty(r.fixed_string(2)?);
    wpt.country_code = none_if_empty(r.fixed_string(2)?);

    if format == WaypointFormat::D109 {
        let ete = r.u32()?;
        wpt.estimated_time_enroute = (ete != UNKNOWN_ETE).then_some(ete);
    }

    wpt.identification = r.zstring(D108_IDENT_MAX);
    wpt.comment = none_if_empty(r.zstring(D108_COMMENT_MAX));
    wpt.facility = none_if_empty(r.zstring(D108_FACILITY_MAX));
    wpt.city = none_if_empty(r.zstring(D108_CITY_MAX));
    wpt.address = none_if_empty(r.zstring(D108_ADDRESS_MAX));
    wpt.cross_road = none_if_empty(r.zstring(D108_CROSS_ROAD_MAX));
    Ok(wpt)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUANTUM: f64 = 180.0 / 2_147_483_648.0;

    fn assert_position(a: &Waypoint, b: &Waypoint) {
        assert!((a.latitude - b.latitude).abs() <= QUANTUM, "{} vs {}", a.latitude, b.latitude);
        assert!((a.longitude - b.longitude).abs() <= QUANTUM, "{} vs {}", a.longitude, b.longitude);
    }

    fn sample() -> Waypoint {
        Waypoint {
            identification: "HOME".into(),
            latitude: 47.070_714,
            longitude: 15.439_504,
            comment: Some("FRONT DOOR".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_d100_layout() {
        let data = WaypointFormat::D100.encode(&sample());
        assert_eq!(data.len(), 58);
        assert_eq!(&data[..6], b"HOME  ");
        assert_eq!(&data[18..28], b"FRONT DOOR");
        assert_eq!(data[57], b' ');
    }

    #[test]
    fn test_fixed_formats_roundtrip() {
        let cases = [
            (WaypointFormat::D100, 58),
            (WaypointFormat::D101, 63),
            (WaypointFormat::D102, 64),
            (WaypointFormat::D103, 60),
            (WaypointFormat::D107, 65),
        ];
        for (format, len) in cases {
            let mut wpt = sample();
            match format {
                WaypointFormat::D101 => {
                    wpt.symbol = Some(18);
                    wpt.proximity_distance = Some(150.0);
                }
                WaypointFormat::D102 => {
                    wpt.symbol = Some(8_200);
                    wpt.proximity_distance = Some(75.5);
                }
                WaypointFormat::D103 => {
                    wpt.symbol = Some(6);
                    wpt.display = Some(1);
                }
                WaypointFormat::D107 => {
                    wpt.symbol = Some(6);
                    wpt.display = Some(2);
                    wpt.proximity_distance = Some(20.0);
                    wpt.color = Some(3);
                }
                _ => {}
            }
            let data = format.encode(&wpt);
            assert_eq!(data.len(), len, "{:?}", format);
            let back = format.decode(&data).unwrap();
            assert_position(&back, &wpt);
            assert_eq!(back.identification, wpt.identification);
            assert_eq!(back.comment, wpt.comment);
            assert_eq!(back.symbol, wpt.symbol);
            assert_eq!(back.display, wpt.display);
            assert_eq!(back.proximity_distance, wpt.proximity_distance);
            assert_eq!(back.color, wpt.color);
        }
    }

    #[test]
    fn test_d100_truncates_long_identifier() {
        let wpt = Waypoint::new("VERYLONGNAME", 1.0, 2.0);
        let back = WaypointFormat::D100
            .decode(&WaypointFormat::D100.encode(&wpt))
            .unwrap();
        assert_eq!(back.identification, "VERYLO");
        assert_eq!(back.comment, None);
    }

    #[test]
    fn test_d108_roundtrip() {
        let wpt = Waypoint {
            identification: "Summit Hut".into(),
            latitude: -33.856_784,
            longitude: 151.215_297,
            altitude: Some(1_234.5),
            depth: None,
            proximity_distance: None,
            comment: Some("water available".into()),
            symbol: Some(8_236),
            class: Some(0),
            color: Some(0xFF),
            display: Some(0),
            subclass: Some(USER_SUBCLASS.to_vec()),
            facility: None,
            city: Some("Sydney".into()),
            address: None,
            cross_road: None,
            state: Some("NS".into()),
            country_code: Some("AU".into()),
            estimated_time_enroute: None,
        };
        let data = WaypointFormat::D108.encode(&wpt);
        assert_eq!(data[3], 0x60);
        let back = WaypointFormat::D108.decode(&data).unwrap();
        assert_position(&back, &wpt);
        assert_eq!(
            Waypoint {
                latitude: wpt.latitude,
                longitude: wpt.longitude,
                ..back
            },
            wpt
        );
    }

    #[test]
    fn test_d109_roundtrip_packs_color_and_display() {
        let wpt = Waypoint {
            identification: "CAMP".into(),
            latitude: 60.5,
            longitude: -140.25,
            altitude: Some(512.0),
            depth: Some(3.5),
            proximity_distance: Some(40.0),
            comment: None,
            symbol: Some(151),
            class: Some(0),
            color: Some(9),
            display: Some(2),
            subclass: Some(USER_SUBCLASS.to_vec()),
            facility: Some("Ranger station".into()),
            city: None,
            address: Some("Trail 4".into()),
            cross_road: Some("Ridge".into()),
            state: None,
            country_code: Some("CA".into()),
            estimated_time_enroute: Some(3_600),
        };
        let data = WaypointFormat::D109.encode(&wpt);
        assert_eq!(data[0], 0x01);
        assert_eq!(data[2], 9 | (2 << 5));
        assert_eq!(data[3], 0x70);
        let back = WaypointFormat::D109.decode(&data).unwrap();
        assert_position(&back, &wpt);
        assert_eq!(
            Waypoint {
                latitude: wpt.latitude,
                longitude: wpt.longitude,
                ..back
            },
            wpt
        );
    }

    #[test]
    fn test_d108_defaults_for_sparse_waypoint() {
        let data = WaypointFormat::D108.encode(&Waypoint::new("A", 0.0, 0.0));
        // fixed block + six terminators + "A"
        assert_eq!(data.len(), 48 + 6 + 1);
        assert_eq!(data[1], 0xFF);
        assert_eq!(&data[6..24], &USER_SUBCLASS);
        let back = WaypointFormat::D108.decode(&data).unwrap();
        assert_eq!(back.altitude, None);
        assert_eq!(back.comment, None);
    }

    #[test]
    fn test_long_strings_fit_one_packet() {
        let wpt = Waypoint {
            identification: "I".repeat(60),
            comment: Some("C".repeat(60)),
            facility: Some("F".repeat(60)),
            city: Some("T".repeat(60)),
            address: Some("A".repeat(60)),
            cross_road: Some("CROSS".into()),
            ..Waypoint::new("", 10.0, 20.0)
        };
        for (format, address_len) in [(WaypointFormat::D108, 47), (WaypointFormat::D109, 42)] {
            let data = format.encode(&wpt);
            assert_eq!(data.len(), MAX_PAYLOAD, "{:?}", format);
            assert!(crate::Packet::new(35, data.clone()).encode().is_ok());

            let back = format.decode(&data).unwrap();
            assert_eq!(back.identification, "I".repeat(50));
            assert_eq!(back.comment, Some("C".repeat(50)));
            assert_eq!(back.facility, Some("F".repeat(30)));
            assert_eq!(back.city, Some("T".repeat(24)));
            assert_eq!(back.address.map(|a| a.len()), Some(address_len));
            assert_eq!(back.cross_road, None);
        }
    }

    #[test]
    fn test_strings_that_fit_are_untouched() {
        let wpt = Waypoint {
            comment: Some("C".repeat(50)),
            address: Some("A".repeat(50)),
            cross_road: Some("CROSS".into()),
            ..Waypoint::new("I".repeat(50), 10.0, 20.0)
        };
        let back = WaypointFormat::D109
            .decode(&WaypointFormat::D109.encode(&wpt))
            .unwrap();
        assert_eq!(back.identification, wpt.identification);
        assert_eq!(back.address, wpt.address);
        assert_eq!(back.cross_road.as_deref(), Some("CROSS"));
    }

    #[test]
    fn test_wide_symbol_in_byte_formats() {
        let wpt = Waypoint {
            symbol: Some(8_200),
            ..sample()
        };
        for format in [WaypointFormat::D101, WaypointFormat::D103, WaypointFormat::D107] {
            let back = format.decode(&format.encode(&wpt)).unwrap();
            assert_eq!(back.symbol, Some(0), "{:?}", format);
        }
        let back = WaypointFormat::D102
            .decode(&WaypointFormat::D102.encode(&wpt))
            .unwrap();
        assert_eq!(back.symbol, Some(8_200));
    }

    #[test]
    fn test_short_record_is_rejected() {
        assert!(matches!(
            WaypointFormat::D103.decode(&[0u8; 20]),
            Err(ParseError::TooShort { needed: 60, .. })
        ));
        assert!(WaypointFormat::D108.decode(&[0u8; 47]).is_err());
    }
}
