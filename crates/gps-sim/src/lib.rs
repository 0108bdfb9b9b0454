//! GPS Receiver Simulation Library
//!
//! This crate provides a simulated receiver for testing the device protocol
//! without hardware. It includes:
//!
//! - **VirtualReceiver**: answers host packets with protocol-accurate frames
//!   (product data, capability array, bulk transfers, PVT, screenshots, files)
//! - **run_virtual_receiver_task**: drives a receiver over any async byte stream
//!
//! # Example
//!
//! ```rust
//! use gps_protocol::packet::PID_PRODUCT_REQUEST;
//! use gps_protocol::Packet;
//! use gps_sim::{VirtualReceiver, VirtualReceiverConfig};
//!
//! let mut receiver = VirtualReceiver::from_config(VirtualReceiverConfig {
//!     product_id: 29,
//!     software_version: 450,
//!     capabilities: None,
//!     ..Default::default()
//! });
//!
//! // ACK plus product data, no protocol array for this old model
//! let frames = receiver.handle_packet(&Packet::empty(PID_PRODUCT_REQUEST));
//! assert_eq!(frames.len(), 2);
//! ```

pub mod receiver;
pub mod task;

pub use receiver::{ScreenImage, VirtualReceiver, VirtualReceiverConfig};
pub use task::{
    run_virtual_receiver_task, spawn_virtual_receiver, spawn_virtual_receiver_with_interval,
    ReceiverCommand, VirtualReceiverHandle, PVT_INTERVAL,
};
