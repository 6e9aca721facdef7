//! Error types for the address codec.
//!
//! All errors are structured, testable, and provide actionable information.
//! The connection state machine itself is infallible: failures reach it as
//! events (a dial that exhausted its targets, a handshake that rejected the
//! peer) rather than as `Result`s.

use thiserror::Error;

/// Errors that can occur while decoding or constructing socket addresses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    /// Buffer is shorter than the fixed-size address header
    #[error("serialized address truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum byte count for the fixed header
        expected: usize,
        /// Actual bytes available
        actual: usize,
    },

    /// Buffer length disagrees with the name length recorded in the header
    #[error("serialized address length mismatch: header implies {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Total length implied by the header
        expected: usize,
        /// Actual bytes available
        actual: usize,
    },

    /// UNIX socket path does not fit in a `sockaddr_un`
    #[error("unix socket path too long: {len} bytes exceeds maximum {max}")]
    PathTooLong {
        /// Length of the rejected path
        len: usize,
        /// Maximum path length the platform supports
        max: usize,
    },
}
