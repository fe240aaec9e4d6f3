//! Transport error classification
//!
//! The forwarding loops need to tell apart three situations without three
//! separate control paths: the peer closed normally, the operation merely
//! timed out, or the transport is actually sick. Benign closes and timeouts
//! are suppressed from user-facing logs; everything else is reported and
//! feeds the caller's reconnect decision.

use std::io;

/// True for errors that indicate orderly or expected peer-side termination.
pub fn is_benign_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// True when the error carries a timeout indication from the network layer.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// True for accept errors worth retrying instead of tearing the listener down.
pub fn is_transient_accept(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, "test")
    }

    #[test]
    fn test_benign_closes() {
        assert!(is_benign_close(&err(io::ErrorKind::UnexpectedEof)));
        assert!(is_benign_close(&err(io::ErrorKind::ConnectionReset)));
        assert!(is_benign_close(&err(io::ErrorKind::BrokenPipe)));
        assert!(is_benign_close(&err(io::ErrorKind::NotConnected)));
        assert!(!is_benign_close(&err(io::ErrorKind::PermissionDenied)));
        assert!(!is_benign_close(&err(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn test_timeouts() {
        assert!(is_timeout(&err(io::ErrorKind::TimedOut)));
        assert!(is_timeout(&err(io::ErrorKind::WouldBlock)));
        assert!(!is_timeout(&err(io::ErrorKind::ConnectionReset)));
    }

    #[test]
    fn test_transient_accept() {
        assert!(is_transient_accept(&err(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient_accept(&err(io::ErrorKind::Interrupted)));
        assert!(!is_transient_accept(&err(io::ErrorKind::AddrInUse)));
        assert!(!is_transient_accept(&err(io::ErrorKind::InvalidInput)));
    }

    #[test]
    fn test_classes_are_disjoint() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::TimedOut,
            io::ErrorKind::WouldBlock,
        ] {
            let e = err(kind);
            assert!(!(is_benign_close(&e) && is_timeout(&e)));
        }
    }
}
