use std::fmt::Display;
use std::io;

/// GraniteDB errors.
#[derive(Debug)]
pub enum Error {
    /// An IO error. The operation failed and on-disk state may be
    /// partially written.
    Io(io::Error),
    /// An operation was given zero rows or zero parts where at least one
    /// is required.
    EmptyInput(&'static str),
    /// A granule was asked to hold more than `GRANULE_SIZE` rows.
    GranuleFull,
    /// A granule was range-queried before it was sorted.
    NotSorted,
    /// Malformed on-disk data: the named field could not be decoded.
    Decode(&'static str, String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::EmptyInput(what) => write!(f, "empty input: {what}"),
            Error::GranuleFull => write!(f, "granule is full"),
            Error::NotSorted => write!(f, "granule must be sorted before querying"),
            Error::Decode(field, msg) => write!(f, "decode error at {field}: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// A GraniteDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;
