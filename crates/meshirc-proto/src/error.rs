//! Error types for the TS6 wire layer.

use thiserror::Error;

/// Convenience alias for results in this crate.
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level wire errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error while reading or writing a link.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded the line length limit.
    #[error("frame too long: {actual} bytes (limit: {limit})")]
    FrameTooLong {
        /// Actual frame length in bytes.
        actual: usize,
        /// Maximum permitted length.
        limit: usize,
    },

    /// A frame failed to parse.
    #[error("invalid frame: {line}")]
    InvalidFrame {
        /// The offending line.
        line: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },
}

/// Errors encountered while parsing a single TS6 frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// The line was empty or all whitespace.
    #[error("empty frame")]
    Empty,

    /// A source prefix (`:sid`) was present but nothing followed it.
    #[error("source prefix without a command")]
    SourceWithoutCommand,

    /// The command token was missing or not ASCII-alphanumeric.
    #[error("invalid command token: {0:?}")]
    InvalidCommand(String),

    /// The line embedded a control character that can never appear on the wire.
    #[error("illegal control character {byte:#04x} at byte {position}")]
    IllegalControlChar {
        /// The offending byte.
        byte: u8,
        /// Byte offset within the line.
        position: usize,
    },
}
