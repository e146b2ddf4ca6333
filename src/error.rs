use std::fmt::Display;

/// tabletdb errors.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// Invalid on-disk data: a magic mismatch, an unknown encoding or
    /// compression tag, an unknown framing tag, or a short read inside a
    /// framed structure.
    Corrupt(String),
    /// A CRC32 mismatch in a block preamble or a log fragment.
    Checksum { expected: u32, actual: u32 },
    /// An integer too large for the framing encoding.
    TooLarge(u64),
    /// An IO error.
    IO(String),
    /// `get` on a key that is not present.
    NotFound,
    /// Invalid caller input.
    BadArgument(String),
    /// An operation on a closed tablet stack.
    Closed,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::Checksum { expected, actual } => {
                write!(
                    f,
                    "checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"
                )
            }
            Error::TooLarge(n) => write!(f, "integer too large to encode: {n}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::NotFound => write!(f, "key not found"),
            Error::BadArgument(msg) => write!(f, "bad argument: {msg}"),
            Error::Closed => write!(f, "tablet stack is closed"),
        }
    }
}

/// Constructs an Error::Corrupt for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corrupt(format!($($args)*)) };
}

/// A tabletdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
