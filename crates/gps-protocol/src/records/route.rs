//! Route records
//!
//! A route travels as a header (D200/D201/D202) followed by its waypoints,
//! each in the negotiated waypoint format. Devices with route links (A201)
//! put a D210 link record between consecutive waypoints.

use crate::datatypes::{RecordReader, RecordWriter};
use crate::error::ParseError;
use crate::records::waypoint::Waypoint;

const D201_COMMENT_LEN: usize = 20;
const D202_IDENT_MAX: usize = 51;
const D210_IDENT_MAX: usize = 51;
const D210_SUBCLASS_LEN: usize = 18;

/// Link class for a plain line segment
pub const LINK_CLASS_LINE: u16 = 0;
/// Link class for a segment without a direct line
pub const LINK_CLASS_DIRECT: u16 = 0xFF;

/// Route header in its logical form
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteHeader {
    /// Route number (D200/D201)
    pub number: Option<u8>,
    /// Route name (D202)
    pub identification: Option<String>,
    /// Comment (D201)
    pub comment: Option<String>,
}

/// A route with its waypoints in travel order
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Route {
    pub header: RouteHeader,
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    pub fn new(header: RouteHeader) -> Self {
        Self {
            header,
            waypoints: Vec::new(),
        }
    }

    /// Display name: identification, then comment, then number
    pub fn name(&self) -> String {
        self.header
            .identification
            .clone()
            .or_else(|| self.header.comment.clone())
            .or_else(|| self.header.number.map(|n| n.to_string()))
            .unwrap_or_default()
    }
}

/// Route header wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RouteHeaderFormat {
    D200,
    D201,
    D202,
}

impl RouteHeaderFormat {
    pub const PRIORITY: [RouteHeaderFormat; 3] = [
        RouteHeaderFormat::D202,
        RouteHeaderFormat::D201,
        RouteHeaderFormat::D200,
    ];

    pub fn number(&self) -> u16 {
        match self {
            RouteHeaderFormat::D200 => 200,
            RouteHeaderFormat::D201 => 201,
            RouteHeaderFormat::D202 => 202,
        }
    }

    pub fn encode(&self, header: &RouteHeader) -> Vec<u8> {
        let mut w = RecordWriter::new();
        match self {
            RouteHeaderFormat::D200 => {
                w.u8(header.number.unwrap_or(0));
            }
            RouteHeaderFormat::D201 => {
                w.u8(header.number.unwrap_or(0)).fixed_string(
                    header.comment.as_deref().unwrap_or(""),
                    D201_COMMENT_LEN,
                );
            }
            RouteHeaderFormat::D202 => {
                w.zstring(
                    header.identification.as_deref().unwrap_or(""),
                    D202_IDENT_MAX,
                );
            }
        }
        w.finish()
    }

    pub fn decode(&self, data: &[u8]) -> Result<RouteHeader, ParseError> {
        let mut r = RecordReader::new(data);
        match self {
            RouteHeaderFormat::D200 => Ok(RouteHeader {
                number: Some(r.u8()?),
                ..Default::default()
            }),
            RouteHeaderFormat::D201 => {
                r.require(1 + D201_COMMENT_LEN)?;
                let number = Some(r.u8()?);
                let comment = r.fixed_string(D201_COMMENT_LEN)?;
                Ok(RouteHeader {
                    number,
                    comment: (!comment.is_empty()).then_some(comment),
                    ..Default::default()
                })
            }
            RouteHeaderFormat::D202 => {
                let ident = r.zstring(D202_IDENT_MAX);
                Ok(RouteHeader {
                    identification: Some(ident),
                    ..Default::default()
                })
            }
        }
    }
}

/// Link between two consecutive route waypoints (D210)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteLink {
    pub class: u16,
    pub subclass: Vec<u8>,
    pub identification: String,
}

impl Default for RouteLink {
    fn default() -> Self {
        Self {
            class: LINK_CLASS_LINE,
            subclass: vec![0u8; D210_SUBCLASS_LEN],
            identification: String::new(),
        }
    }
}

/// Route link wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RouteLinkFormat {
    D210,
}

impl RouteLinkFormat {
    pub fn number(&self) -> u16 {
        210
    }

    pub fn encode(&self, link: &RouteLink) -> Vec<u8> {
        let mut subclass = link.subclass.clone();
        subclass.resize(D210_SUBCLASS_LEN, 0);
        RecordWriter::with_capacity(21)
            .u16(link.class)
            .bytes(&subclass)
            .zstring(&link.identification, D210_IDENT_MAX)
            .finish()
    }

    pub fn decode(&self, data: &[u8]) -> Result<RouteLink, ParseError> {
        let mut r = RecordReader::new(data);
        r.require(2 + D210_SUBCLASS_LEN)?;
        Ok(RouteLink {
            class: r.u16()?,
            subclass: r.bytes(D210_SUBCLASS_LEN)?.to_vec(),
            identification: r.zstring(D210_IDENT_MAX),
        })
    }
}
