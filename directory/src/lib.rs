//! Maps project API keys to project identities.
//!
//! Projects are created and managed by the account subsystem; this crate only
//! holds the key index the telemetry pipeline authenticates against.

pub mod config;
mod directory;
pub mod metrics_defs;
mod negative_cache;
pub mod source;
pub mod types;

pub use directory::{Directory, DirectoryError};
pub use types::{Project, ProjectId};
