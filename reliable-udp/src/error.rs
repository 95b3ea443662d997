//! Crate-wide error type.
//!
//! Every fallible operation in the engine returns [`Result`].  The loops in
//! [`crate::connection`] decide per variant whether an error is fatal or is
//! logged and retried; see the notes on each variant.

use std::io;

use thiserror::Error;

use crate::segment::SegmentError;
use crate::state::ConnectionState;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a connection.
#[derive(Error, Debug)]
pub enum Error {
    /// Stored checksum disagrees with the recomputed one.
    ///
    /// The receive path drops the segment; recovery is the sender's timeout.
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },

    /// Send or receive syscall failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The OS entropy source could not be read.
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    /// A segment arrived that makes no sense in the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The caller broke an API precondition (e.g. an empty stream).
    #[error("caller contract violation: {0}")]
    CallerContract(&'static str),

    /// Datagram could not be parsed as a segment.
    #[error("malformed segment: {0}")]
    Malformed(#[from] SegmentError),

    /// A receive deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// Active open gave up.
    #[error("handshake failed after {attempts} SYN attempt(s)")]
    HandshakeFailed { attempts: u32 },

    /// Too many consecutive retransmission timeouts without progress.
    #[error("retransmission limit exceeded")]
    RetriesExceeded,

    /// The peer sent FIN before the stream was fully acknowledged.
    #[error("peer closed after {acknowledged} byte(s) were acknowledged")]
    PeerClosed { acknowledged: usize },

    /// Operation not permitted in the current state.
    #[error("operation not permitted in state {0}")]
    BadState(ConnectionState),

    /// The datagram handle was already released by `close`.
    #[error("transport handle already released")]
    Released,
}

impl Error {
    /// `true` for errors the owning loop drops and keeps going on.
    ///
    /// Corrupt or malformed segments and stray control traffic are recovered
    /// by the peer's retransmission, never by the receiver.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. } | Error::Malformed(_) | Error::ProtocolViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_display_is_hex() {
        let e = Error::ChecksumMismatch {
            stored: 0xabcd,
            computed: 0x1234,
        };
        assert_eq!(
            e.to_string(),
            "checksum mismatch: stored 0xabcd, computed 0x1234"
        );
    }

    #[test]
    fn recoverable_classification() {
        assert!(Error::ChecksumMismatch {
            stored: 0,
            computed: 1
        }
        .is_recoverable());
        assert!(Error::ProtocolViolation("stray ack".into()).is_recoverable());
        assert!(!Error::Timeout.is_recoverable());
        assert!(!Error::PeerClosed { acknowledged: 0 }.is_recoverable());
        assert!(!Error::EntropyUnavailable("gone".into()).is_recoverable());
    }

    #[test]
    fn io_error_converts_to_transport() {
        let e: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(e, Error::Transport(_)));
    }
}
