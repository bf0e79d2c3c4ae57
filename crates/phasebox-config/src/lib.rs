//! Configuration for phasebox
//!
//! This crate handles:
//! - Global configuration (`~/.config/phasebox/config.toml`)
//! - Proxy settings forwarded into phase containers
//! - The target operating system of the builder image

mod error;
mod global;

pub use error::*;
pub use global::*;
