//! Error types shared by the codec, the framing layer and the tunnel endpoints.

use thiserror::Error;

/// Every failure the tunnel can report.
///
/// All variants are recoverable at the datagram boundary: a receiver rejects
/// the offending message and keeps serving other sessions.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Caller supplied a value that cannot be represented on the wire
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Bytes on the wire do not form a valid structure
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// A field declares more bytes than the buffer holds
    #[error("Truncated message: needed {needed} bytes, {available} available")]
    TruncatedMessage { needed: usize, available: usize },

    /// A frame payload is larger than its direction allows
    #[error("Capacity exceeded: {size} bytes (max: {capacity})")]
    CapacityExceeded { size: usize, capacity: usize },

    /// Frame references a session the store cannot service
    #[error("Unknown session: {0:#04x}")]
    UnknownSession(u8),

    /// Frame fields embedded in a DNS name or record are invalid
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Invalid configuration or derived sizes
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No response from the peer in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// True for errors caused by undecodable or truncated bytes.
    pub fn is_decoding(&self) -> bool {
        matches!(self, Self::Decoding(_) | Self::TruncatedMessage { .. })
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
