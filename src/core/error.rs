use std::io;
use thiserror::Error;

/// Custom error types for the WHTS master coordinator
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("frame magic mismatch: got {0:#04x} {1:#04x}")]
    FrameMagic(u8, u8),

    #[error("frame too short: need {needed} bytes, have {available}")]
    FrameShort { needed: usize, available: usize },

    #[error("unknown message id {message_id:#04x} for packet class {packet_class:#04x}")]
    UnknownMessageId { packet_class: u8, message_id: u8 },

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    PayloadLenMismatch { expected: usize, actual: usize },

    #[error("send failed: {0}")]
    Send(String),

    #[error("radio transmission suppressed after {consecutive_failures} consecutive failures")]
    RadioSuppressed { consecutive_failures: u32 },

    #[error("short-id pool exhausted")]
    PoolExhausted,

    #[error("enrollment refused for device {device_id:#010x} after {announce_count} announces")]
    EnrollmentRefused { device_id: u32, announce_count: u8 },

    #[error("backend response correlation timed out for request {message_id:#04x}")]
    CorrelationTimeout { message_id: u8 },

    #[error("command {message_id:#04x} to device {device_id:#010x} exhausted its retries")]
    CommandExhausted { device_id: u32, message_id: u8 },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new send error
    pub fn send(msg: impl Into<String>) -> Self {
        Error::Send(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Returns true for malformed-input errors that are absorbed by
    /// log-and-drop at the protocol boundary.
    pub fn is_wire_decode(&self) -> bool {
        matches!(
            self,
            Error::FrameMagic(..)
                | Error::FrameShort { .. }
                | Error::UnknownMessageId { .. }
                | Error::PayloadLenMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameMagic(0x00, 0xcd);
        assert!(err.to_string().contains("magic"));
        assert!(err.is_wire_decode());

        let err = Error::send("socket closed");
        assert_eq!(err.to_string(), "send failed: socket closed");
        assert!(!err.is_wire_decode());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
