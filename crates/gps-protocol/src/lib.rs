//! GPS Protocol Library
//!
//! This crate provides framing, capability negotiation and record codecs
//! for handheld GPS receivers speaking the binary serial protocol:
//!
//! - **Framing**: `DLE id size payload checksum DLE ETX` with DLE stuffing
//!   and an additive checksum, decoded by a streaming state machine
//! - **Link tables**: packet ids and command codes for each link and
//!   command generation
//! - **Capabilities**: the advertised token set (or a legacy table entry)
//!   and priority selection of record formats
//! - **Records**: waypoints, routes, tracks, PVT, product data, files,
//!   flash info and screen bitmaps
//!
//! Nothing here does I/O; `gps-link` drives a session over a byte stream.
//!
//! # Example
//!
//! ```rust
//! use gps_protocol::{Capabilities, DecodeEvent, FrameDecoder, Packet};
//! use gps_protocol::records::{Waypoint, WaypointFormat};
//!
//! let caps = Capabilities::from_tokens(["L1", "A10", "A100", "D108"]).unwrap();
//! let format = caps.waypoint_format().unwrap();
//! assert_eq!(format, WaypointFormat::D108);
//!
//! let payload = format.encode(&Waypoint::new("HOME", 47.07, 15.44));
//! let frame = Packet::new(35, payload).encode().unwrap();
//!
//! let mut decoder = FrameDecoder::new();
//! let events = decoder.push_bytes(&frame);
//! assert!(matches!(&events[..], [DecodeEvent::Packet(p)] if p.id == 35));
//! ```

pub mod capabilities;
pub mod datatypes;
pub mod error;
pub mod link;
pub mod models;
pub mod packet;
pub mod records;

pub use capabilities::{Capabilities, CapabilityToken};
pub use error::{ParseError, ProtocolError};
pub use link::{Command, CommandProtocol, LinkProtocol, PacketKind};
pub use models::LegacyDatabase;
pub use packet::{DecodeEvent, FrameDecoder, Packet};
