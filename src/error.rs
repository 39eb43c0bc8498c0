use std::{error, fmt, io};

/// An error that occurred while converting an object.
#[derive(Debug)]
pub struct Error {
    inner: ErrorInner,
}

#[derive(Debug)]
enum ErrorInner {
    Io(io::Error),
    Parse(&'static str),
    List(String),
    Convert(String),
}

/// The kind of error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An I/O error occurred while writing the output.
    Io(io::ErrorKind),
    /// The input is not an object file this crate accepts.
    Parse,
    /// The function list is malformed.
    List,
    /// The object cannot be converted.
    Convert,
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Io(e) => e.fmt(f),
            ErrorInner::Parse(e) => f.write_str(e),
            ErrorInner::List(e) => e.fmt(f),
            ErrorInner::Convert(e) => e.fmt(f),
        }
    }
}

impl error::Error for Error {}

impl Error {
    /// Get the kind of error.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Io(e) => ErrorKind::Io(e.kind()),
            ErrorInner::Parse(_) => ErrorKind::Parse,
            ErrorInner::List(_) => ErrorKind::List,
            ErrorInner::Convert(_) => ErrorKind::Convert,
        }
    }

    pub(crate) fn io(error: io::Error) -> Self {
        Self {
            inner: ErrorInner::Io(error),
        }
    }

    pub(crate) fn parse(message: &'static str) -> Self {
        Self {
            inner: ErrorInner::Parse(message),
        }
    }

    pub(crate) fn list(message: impl Into<String>) -> Self {
        Self {
            inner: ErrorInner::List(message.into()),
        }
    }

    pub(crate) fn convert(message: impl Into<String>) -> Self {
        Self {
            inner: ErrorInner::Convert(message.into()),
        }
    }
}

/// The `Result` type for this library.
pub type Result<T> = std::result::Result<T, Error>;
