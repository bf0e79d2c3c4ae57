//! Phase execution engine for phasebox
//!
//! This crate handles:
//! - Assembling the container configuration of each lifecycle phase
//! - Running phases against a container runtime
//! - Staging the application source into the shared app volume exactly once
//!   per lifecycle, by whichever phase gets there first (on Windows, by the
//!   phase that populates the app)
//! - Relaying phase output into the logging stack

pub mod archive;
mod error;
mod lifecycle;
mod logging;
mod mount_paths;
mod phase;
mod phase_config;
mod phase_factory;
pub mod pipe;
mod run_once;
mod staging;

pub use archive::{ArchiveSource, FileFilter, SourceKind, TarOptions};
pub use error::*;
pub use lifecycle::*;
pub use logging::*;
pub use mount_paths::*;
pub use phase::*;
pub use phase_config::*;
pub use phase_factory::*;
pub use run_once::*;
pub use staging::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
