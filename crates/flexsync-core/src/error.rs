//! Error types for flexsync.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, protocol decode
//! failures and radio-reported command failures are all captured here.
//!
//! Most protocol errors never reach the caller: the TCP and UDP receive
//! loops log them and skip the offending line, pair, or frame. They surface
//! only from the pure parsing functions and from setup calls such as
//! connect and bind.

/// The error type for all flexsync operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP connect refused, UDP bind failed, socket
    /// closed mid-write).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed reply line, truncated VITA-49
    /// header, discovery list arity mismatch).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the radio.
    ///
    /// Returned by connect when the TCP connection or the version/handle
    /// handshake does not complete in time, and by request-style commands
    /// whose reply does not arrive within the command timeout.
    #[error("timeout waiting for response")]
    Timeout,

    /// A second connect attempt was started on a connector that already has
    /// one in flight.
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    /// An invalid parameter was passed to a builder or command helper.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the radio has been established, or it was closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the radio was lost while a request was waiting.
    #[error("connection lost")]
    ConnectionLost,

    /// The radio answered a command with a non-zero response code.
    #[error("command failed with code 0x{code:08X}: {message}")]
    Command {
        /// Radio-defined response code.
        code: u32,
        /// Reply text accompanying the code.
        message: String,
    },

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("connection refused".into());
        assert_eq!(e.to_string(), "transport error: connection refused");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("bad reply line".into());
        assert_eq!(e.to_string(), "protocol error: bad reply line");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_connect_in_progress() {
        assert_eq!(
            Error::ConnectInProgress.to_string(),
            "a connection attempt is already in progress"
        );
    }

    #[test]
    fn error_display_command() {
        let e = Error::Command {
            code: 0x5000_0015,
            message: "Invalid slice".into(),
        };
        assert_eq!(
            e.to_string(),
            "command failed with code 0x50000015: Invalid slice"
        );
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
        assert_eq!(Error::ConnectionLost.to_string(), "connection lost");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
