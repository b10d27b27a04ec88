use std::{fmt, str::FromStr};

use crate::error::RegressorErr;

/// A `major.minor.rev` model format version, ordered component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub rev: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, rev: u32) -> Self {
        Self { major, minor, rev }
    }
}

/// The version written into every saved model.
pub const CURRENT_VERSION: Version = Version::new(6, 1, 3);

/// Models older than this are rejected.
pub const LAST_COMPATIBLE_VERSION: Version = Version::new(6, 1, 3);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.rev)
    }
}

impl FromStr for Version {
    type Err = RegressorErr;

    /// Parses `major[.minor[.rev]]`, missing components being zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RegressorErr::Malformed(format!("invalid version string {s:?}"));

        let mut parts = [0; 3];
        let mut components = s.trim().split('.');
        for part in parts.iter_mut() {
            if let Some(component) = components.next() {
                *part = component.parse().map_err(|_| malformed())?;
            }
        }
        if components.next().is_some() {
            return Err(malformed());
        }

        let [major, minor, rev] = parts;
        Ok(Self::new(major, minor, rev))
    }
}
