//! Capability registry
//!
//! A device advertises what it understands as a list of tokens such as
//! `L1`, `A10` or `D108`. On the wire each token is three bytes: an ASCII
//! letter followed by a little-endian `u16` number. Older devices do not
//! send the list at all; their set comes from [`crate::models`].
//!
//! Record formats are chosen from the set by fixed priority per record kind.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::ParseError;
use crate::link::{CommandProtocol, LinkProtocol};
use crate::records::pvt::PvtFormat;
use crate::records::route::{RouteHeaderFormat, RouteLinkFormat};
use crate::records::track::{TrackHeaderFormat, TrackPointFormat};
use crate::records::waypoint::WaypointFormat;

/// Size of one token inside a protocol array packet
pub const TOKEN_WIRE_LEN: usize = 3;

/// One advertised capability, e.g. `D108`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityToken {
    pub tag: char,
    pub number: u16,
}

impl CapabilityToken {
    pub const fn new(tag: char, number: u16) -> Self {
        Self { tag, number }
    }

    /// Decode a 3-byte wire token
    pub fn from_wire(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < TOKEN_WIRE_LEN {
            return Err(ParseError::TooShort {
                needed: TOKEN_WIRE_LEN,
                actual: data.len(),
            });
        }
        let tag = char::from(data[0]);
        if !tag.is_ascii_alphabetic() {
            return Err(ParseError::InvalidCapability(format!("tag byte 0x{:02X}", data[0])));
        }
        Ok(Self {
            tag,
            number: LittleEndian::read_u16(&data[1..3]),
        })
    }

    /// Encode as a 3-byte wire token
    pub fn to_wire(&self) -> [u8; TOKEN_WIRE_LEN] {
        let mut out = [0u8; TOKEN_WIRE_LEN];
        out[0] = u8::try_from(u32::from(self.tag)).unwrap_or(b'?');
        LittleEndian::write_u16(&mut out[1..3], self.number);
        out
    }
}

impl fmt::Display for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag, self.number)
    }
}

impl FromStr for CapabilityToken {
    type Err = ParseError;

    /// Parses `D108`, `L1` or the zero-padded `L001`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let tag = chars
            .next()
            .filter(|c| c.is_ascii_alphabetic())
            .ok_or_else(|| ParseError::InvalidCapability(s.to_string()))?;
        let number = chars
            .as_str()
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidCapability(s.to_string()))?;
        Ok(Self {
            tag: tag.to_ascii_uppercase(),
            number,
        })
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for CapabilityToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for CapabilityToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The set of capabilities a connected device supports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Capabilities {
    tokens: BTreeSet<CapabilityToken>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the payload of a protocol array packet
    ///
    /// A trailing partial token is ignored.
    pub fn from_protocol_array(payload: &[u8]) -> Result<Self, ParseError> {
        let tokens = payload
            .chunks_exact(TOKEN_WIRE_LEN)
            .map(CapabilityToken::from_wire)
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { tokens })
    }

    /// Build from token strings such as `"D108"`
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .map(|t| t.as_ref().parse())
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { tokens })
    }

    /// Encode as a protocol array payload
    pub fn encode_protocol_array(&self) -> Vec<u8> {
        self.tokens.iter().flat_map(|t| t.to_wire()).collect()
    }

    pub fn insert(&mut self, token: CapabilityToken) -> bool {
        self.tokens.insert(token)
    }

    pub fn contains(&self, token: CapabilityToken) -> bool {
        self.tokens.contains(&token)
    }

    /// Test a token by its string form; malformed strings are never supported
    pub fn supports(&self, token: &str) -> bool {
        token
            .parse::<CapabilityToken>()
            .map(|t| self.contains(t))
            .unwrap_or(false)
    }

    fn has(&self, tag: char, number: u16) -> bool {
        self.contains(CapabilityToken::new(tag, number))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityToken> {
        self.tokens.iter()
    }

    /// Link generation; L001 when the device names neither
    pub fn link_protocol(&self) -> LinkProtocol {
        if self.has('L', 1) {
            LinkProtocol::L001
        } else if self.has('L', 2) {
            LinkProtocol::L002
        } else {
            LinkProtocol::L001
        }
    }

    /// Command generation; A010 when the device names neither
    pub fn command_protocol(&self) -> CommandProtocol {
        if self.has('A', 10) {
            CommandProtocol::A010
        } else if self.has('A', 11) {
            CommandProtocol::A011
        } else {
            CommandProtocol::A010
        }
    }

    pub fn waypoint_format(&self) -> Option<WaypointFormat> {
        WaypointFormat::PRIORITY
            .into_iter()
            .find(|f| self.has('D', f.number()))
    }

    pub fn route_header_format(&self) -> Option<RouteHeaderFormat> {
        RouteHeaderFormat::PRIORITY
            .into_iter()
            .find(|f| self.has('D', f.number()))
    }

    pub fn route_link_format(&self) -> Option<RouteLinkFormat> {
        self.has('D', 210).then_some(RouteLinkFormat::D210)
    }

    pub fn track_header_format(&self) -> Option<TrackHeaderFormat> {
        TrackHeaderFormat::PRIORITY
            .into_iter()
            .find(|f| self.has('D', f.number()))
    }

    pub fn trackpoint_format(&self) -> Option<TrackPointFormat> {
        TrackPointFormat::PRIORITY
            .into_iter()
            .find(|f| self.has('D', f.number()))
    }

    pub fn pvt_format(&self) -> Option<PvtFormat> {
        PvtFormat::PRIORITY
            .into_iter()
            .find(|f| self.has('D', f.number()))
    }

    pub fn supports_waypoint_transfer(&self) -> bool {
        self.has('A', 100)
    }

    pub fn supports_route_transfer(&self) -> bool {
        self.has('A', 200) || self.has('A', 201)
    }

    /// Routes carry link records between waypoints
    pub fn supports_route_links(&self) -> bool {
        self.has('A', 201)
    }

    pub fn supports_track_transfer(&self) -> bool {
        self.has('A', 300) || self.has('A', 301)
    }

    /// Tracks carry header records
    pub fn supports_track_headers(&self) -> bool {
        self.has('A', 301)
    }

    pub fn supports_pvt(&self) -> bool {
        self.has('A', 800)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in &self.tokens {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", token)?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<CapabilityToken> for Capabilities {
    fn from_iter<T: IntoIterator<Item = CapabilityToken>>(iter: T) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}
