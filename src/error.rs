use std::fmt;

use failure::Backtrace;
use failure::Context;
use failure::Fail;

/// Error information returned by this crate in case of failures.
#[derive(Debug)]
pub struct Error(Context<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.get_context()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error(inner)
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.0.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.0.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Exhaustive list of possible errors emitted by this crate.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "{} failed due to coordination service error", _0)]
    Backend(&'static str),

    #[fail(display = "connection to coordination service failed")]
    BackendConnect,

    #[fail(display = "invalid arguments: {}", _0)]
    BadArguments(&'static str),

    #[fail(display = "assertion on lock '{}' failed: {}", _0, _1)]
    LockAssertionFailed(String, &'static str),

    #[fail(display = "lock '{}' is no longer held", _0)]
    LockLost(String),

    #[fail(display = "node '{}' already exists", _0)]
    NodeExists(String),

    #[fail(display = "node '{}' does not exist", _0)]
    NoNode(String),

    #[fail(display = "node '{}' is not empty", _0)]
    NotEmpty(String),

    #[fail(display = "session interrupted while waiting on '{}'", _0)]
    SessionInterrupted(String),

    #[fail(display = "timed out waiting for {}", _0)]
    WaitTimeout(&'static str),
}

impl ErrorKind {
    /// True for create conflicts the caller may absorb.
    pub fn is_node_exists(&self) -> bool {
        match self {
            ErrorKind::NodeExists(_) => true,
            _ => false,
        }
    }

    /// True for missing-node conditions the caller may absorb.
    pub fn is_no_node(&self) -> bool {
        match self {
            ErrorKind::NoNode(_) => true,
            _ => false,
        }
    }

    /// True for non-empty delete conditions the caller may absorb.
    pub fn is_not_empty(&self) -> bool {
        match self {
            ErrorKind::NotEmpty(_) => true,
            _ => false,
        }
    }

    /// True when the session was lost while an operation was in flight.
    pub fn is_session_interrupted(&self) -> bool {
        match self {
            ErrorKind::SessionInterrupted(_) => true,
            _ => false,
        }
    }
}

/// Short form alias for functions returning `Error`s.
pub type Result<T> = ::std::result::Result<T, Error>;
