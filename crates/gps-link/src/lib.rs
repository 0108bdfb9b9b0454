//! GPS Link
//!
//! Async session engine for serial GPS receivers, built on tokio.
//!
//! # Architecture
//!
//! A [`GpsSession`] splits its byte stream and runs two tasks next to the
//! caller:
//!
//! - **Reader**: decodes frames, answers each with ACK or NAK, resolves
//!   acknowledged sends and hands packets to the dispatcher, which fills the
//!   result slot the caller waits on
//! - **Watchdog**: sends one NAK when a frame stalls halfway
//!
//! Every write goes through one [`Transport`], so frames never interleave.
//! Progress, raw traffic and position reports are published as
//! [`GpsEvent`]s on a broadcast channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use gps_link::{GpsSession, SessionConfig};
//!
//! # async fn run() -> Result<(), gps_link::LinkError> {
//! let session = GpsSession::open_serial("/dev/ttyUSB0", 9600, SessionConfig::default()).await?;
//! println!("Connected to {}", session.product());
//!
//! let waypoints = session.get_waypoints(Duration::from_secs(30)).await?;
//! for wpt in &waypoints {
//!     println!("{} {:.5} {:.5}", wpt.identification, wpt.latitude, wpt.longitude);
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod config;
mod dispatch;
pub mod error;
pub mod events;
mod reader;
pub mod session;
pub mod slot;
pub mod transport;
pub mod watchdog;

pub use assembler::{AssemblerEvent, BlockKind, BulkAssembler, RecordFormats};
pub use config::SessionConfig;
pub use error::LinkError;
pub use events::{GpsEvent, Operation, PositionFix};
pub use session::GpsSession;
pub use slot::{ResultSlot, SlotGuard};
pub use transport::Transport;
pub use watchdog::{run_watchdog_task, Watchdog, WatchdogReceiver};
