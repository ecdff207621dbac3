use std::path::PathBuf;

use libc::c_int;

use crate::engine::{self, Engine, RawArchive};
use crate::path::IntoEntryPathError;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad classes of failure, for callers that only need to branch on the kind.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Resource,
    Protocol,
    Io,
    Configuration,
    Cursor,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("The archive engine did not return a session handle.")]
    HandleCreation,

    #[error("The archive session has already been released.")]
    Released,

    #[error("Archive engine failed (status {status}, errno {errno}): {message}")]
    Protocol {
        status: c_int,
        errno: c_int,
        message: String,
    },

    #[error("Archive engine stopped accepting data after {written} of {expected} bytes: {message}")]
    ShortWrite {
        written: u64,
        expected: u64,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("Invalid entry name. Name: '{0}'")]
    InvalidName(String),

    #[error("Cannot derive an entry name from path. Path: '{}'", .1.display())]
    InvalidPath(#[source] IntoEntryPathError, PathBuf),

    #[error("Entry is no longer current, the cursor has moved past it. Name: '{name}'")]
    StaleEntry { name: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::HandleCreation | Error::Released => ErrorKind::Resource,
            Error::Protocol { .. } | Error::ShortWrite { .. } => ErrorKind::Protocol,
            Error::Io(_) => ErrorKind::Io,
            Error::Config(_)
            | Error::Unsupported(_)
            | Error::InvalidName(_)
            | Error::InvalidPath(..) => ErrorKind::Configuration,
            Error::StaleEntry { .. } => ErrorKind::Cursor,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::Unsupported(_) => std::io::Error::new(std::io::ErrorKind::Unsupported, err),
            Error::InvalidName(_) | Error::InvalidPath(..) | Error::Config(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
            }
            other => std::io::Error::other(other),
        }
    }
}

/// Reads the engine's last error for `a`.
///
/// # Safety
/// `a` must be a live session pointer.
pub(crate) unsafe fn last_error<E: Engine>(a: *mut RawArchive) -> (c_int, Option<String>) {
    (E::errno(a), engine::string_from_ptr(E::error_string(a)))
}

/// Maps a non-success status into a protocol error carrying the engine's text.
///
/// # Safety
/// `a` must be a live session pointer.
pub(crate) unsafe fn protocol_error<E: Engine>(a: *mut RawArchive, status: c_int) -> Error {
    let (errno, message) = last_error::<E>(a);
    Error::Protocol {
        status,
        errno,
        message: message.unwrap_or_else(|| format!("no error message (status {})", status)),
    }
}
