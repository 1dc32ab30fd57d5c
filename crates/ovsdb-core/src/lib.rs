//! ovsdb-core: shared types for the OVSDB client engine
//!
//! This crate provides:
//! - RFC 7047 value notation (atoms, sets, maps, rows)
//! - Database schema version triples
//! - The error taxonomy used across the workspace

pub mod error;
pub mod notation;
pub mod version;

pub use error::{Error, Result};
pub use notation::{Atom, OvsValue, Row};
pub use version::Version;

/// Prelude for convenient imports
pub mod prelude {
    pub use super::error::{Error, Result};
    pub use super::notation::{Atom, OvsValue, Row};
    pub use super::version::Version;
}
