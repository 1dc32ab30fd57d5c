//! Database schema version triples
//!
//! OVSDB schemas carry an "x.y.z" version string. Typed table bindings gate
//! themselves on these versions, so the triple is totally ordered and
//! const-constructible.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A schema version as defined by RFC 7047: three numeric fields compared
/// field-wise, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '.');
        let mut field = |name: &str| -> Result<u64, Error> {
            parts
                .next()
                .ok_or_else(|| Error::protocol(format!("version '{s}' is missing its {name} field")))?
                .parse::<u64>()
                .map_err(|_| Error::protocol(format!("version '{s}' has a non-numeric {name} field")))
        };
        let major = field("major")?;
        let minor = field("minor")?;
        let patch = field("patch")?;
        Ok(Version::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
