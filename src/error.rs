use std::io;

use thiserror::Error as ThisError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error conditions produced by this framework.
///
/// Synchronous operations return these directly; asynchronous completions
/// deliver them together with a context describing the bytes progressed, so
/// callers can distinguish "nothing happened" from "partial".
///
/// Everything outside of [`Error::WouldBlock`], [`Error::Cancelled`] and
/// [`Error::Eof`] is fatal for the direction in which it arose: once
/// observed, all future operations in that direction fail with the same
/// error.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The operation cannot make progress now but may succeed after a
    /// readiness event.
    #[error("operation would block")]
    WouldBlock,

    /// Permanent directional end-of-stream.
    #[error("end of stream")]
    Eof,

    /// The operation was cancelled by the user before it had observable
    /// side effects.
    #[error("operation cancelled")]
    Cancelled,

    /// Contract violation, or the operation is not applicable in the
    /// object's current state.
    #[error("invalid operation")]
    Invalid,

    /// The backend cannot honor a requested mode, e.g. edge triggering on
    /// a backend without kernel support.
    #[error("not implemented by this backend")]
    NotImplemented,

    /// A probe of the descriptor revealed a terminal socket error that the
    /// operating system did not further describe.
    #[error("connection dead")]
    ConnectionDead,

    /// An operating system error passed through unchanged.
    #[error("os error {0}")]
    Os(i32),
}

impl Error {
    /// Returns the last OS error observed on the calling thread.
    pub fn last_os_error() -> Error {
        Error::from(io::Error::last_os_error())
    }

    /// Returns true if this error permanently poisons the direction it was
    /// observed in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::WouldBlock | Error::Cancelled | Error::Eof)
    }

    /// Returns true if the operation should be retried after a readiness
    /// event.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        match error.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::UnexpectedEof => Error::Eof,
            io::ErrorKind::InvalidInput => Error::Invalid,
            _ => match error.raw_os_error() {
                Some(code) => Error::Os(code),
                None => Error::ConnectionDead,
            },
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> io::Error {
        match error {
            Error::WouldBlock => io::ErrorKind::WouldBlock.into(),
            Error::Eof => io::ErrorKind::UnexpectedEof.into(),
            Error::Cancelled => io::Error::new(io::ErrorKind::Other, "operation cancelled"),
            Error::Invalid => io::ErrorKind::InvalidInput.into(),
            Error::NotImplemented => io::Error::new(io::ErrorKind::Unsupported, "not implemented"),
            Error::ConnectionDead => io::ErrorKind::ConnectionReset.into(),
            Error::Os(code) => io::Error::from_raw_os_error(code),
        }
    }
}
