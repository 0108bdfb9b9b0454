//! Error types for the session engine

use gps_protocol::{ParseError, ProtocolError};
use thiserror::Error;

use crate::events::Operation;

/// Errors that can occur on a device session
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error on the byte stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The session has been closed
    #[error("session closed")]
    Closed,

    /// The device never answered the product request
    #[error("no response from device to product request")]
    NoProduct,

    /// The device lacks a capability the operation needs
    #[error("{operation} not supported by device (requires {capability})")]
    Unsupported {
        /// Operation that was requested
        operation: Operation,
        /// Missing capability token or packet
        capability: String,
    },

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<ParseError> for LinkError {
    fn from(e: ParseError) -> Self {
        LinkError::Protocol(ProtocolError::Parse(e))
    }
}

impl LinkError {
    pub(crate) fn unsupported(operation: Operation, capability: impl Into<String>) -> Self {
        LinkError::Unsupported {
            operation,
            capability: capability.into(),
        }
    }
}
