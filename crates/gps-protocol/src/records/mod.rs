//! Record codecs
//!
//! One closed enum of wire formats per record kind. Each format encodes
//! and decodes the shared logical record; [`crate::Capabilities`] picks the
//! format a device gets.

pub mod display;
pub mod file;
pub mod product;
pub mod pvt;
pub mod route;
pub mod time;
pub mod track;
pub mod waypoint;

pub use display::{Bitmap, DisplayAssembler, DisplayHeader, DisplayPacket, DisplayProgress, Rgb, Rotation};
pub use file::{FileAssembler, FileChunk, FileHeader, FileRequest, FlashInfo, UnlockResponse};
pub use product::ProductData;
pub use pvt::{FixType, Pvt, PvtFormat};
pub use route::{Route, RouteHeader, RouteHeaderFormat, RouteLink, RouteLinkFormat};
pub use time::Position;
pub use track::{Track, TrackHeader, TrackHeaderFormat, TrackPoint, TrackPointFormat};
pub use waypoint::{Waypoint, WaypointFormat};
