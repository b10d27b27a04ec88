use std::{error::Error, fmt, io};

use crate::Version;

/// The regressor module's result type.
pub type Result<T> = std::result::Result<T, RegressorErr>;

/// Model file failures.
#[derive(Debug)]
pub enum RegressorErr {
    Io(io::Error),
    /// The file was written by a version this reader can't understand.
    IncompatibleVersion { found: Version, oldest: Version },
    /// The file's bit width disagrees with the configured one.
    BitsMismatch { configured: u32, found: u32 },
    /// The file doesn't follow the model format.
    Malformed(String),
}

impl fmt::Display for RegressorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegressorErr::Io(e) => write!(f, "io error: {e}"),
            RegressorErr::IncompatibleVersion { found, oldest } => write!(
                f,
                "model has possibly incompatible version {found}, the oldest readable is {oldest}"
            ),
            RegressorErr::BitsMismatch { configured, found } => write!(
                f,
                "wrong number of bits for the model: configured {configured}, found {found}"
            ),
            RegressorErr::Malformed(reason) => write!(f, "malformed model: {reason}"),
        }
    }
}

impl Error for RegressorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RegressorErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RegressorErr {
    fn from(e: io::Error) -> Self {
        RegressorErr::Io(e)
    }
}
