//! Error types for GPS protocol parsing and encoding

use thiserror::Error;

/// Errors that can occur while parsing protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Record is shorter than its wire format requires
    #[error("record too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    /// Invalid frame structure
    #[error("invalid frame 0x{id:02X}: {reason}")]
    InvalidFrame { id: u8, reason: String },

    /// Checksum mismatch
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Malformed capability token in a protocol array
    #[error("invalid capability token: {0}")]
    InvalidCapability(String),

    /// Unknown display data section tag
    #[error("unknown display section {0}")]
    UnknownDisplaySection(u32),

    /// Payload longer than a frame's size byte can announce
    #[error("payload of packet 0x{id:02X} is {len} bytes, more than a frame holds")]
    PayloadTooLarge { id: u8, len: usize },

    /// Record field holds a value outside its domain
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Higher-level protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}
