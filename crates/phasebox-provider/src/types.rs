//! Common types for container runtimes

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// First 12 characters, the form `docker ps` shows
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Process-level configuration of a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image to use
    pub image: String,
    /// Command to run
    pub cmd: Vec<String>,
    /// Entrypoint override (empty keeps the image entrypoint)
    pub entrypoint: Vec<String>,
    /// Environment variables as `KEY=VALUE`
    pub env: Vec<String>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// User to run as
    pub user: Option<String>,
}

/// Host-level configuration of a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSpec {
    /// `source:target[:options]` bind strings
    pub binds: Vec<String>,
    /// Structured mounts
    pub mounts: Vec<MountConfig>,
    /// Network mode
    pub network_mode: Option<String>,
}

/// Mount configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Mount type (bind, volume, tmpfs)
    pub mount_type: MountType,
    /// Source path or volume name
    pub source: String,
    /// Target path in container
    pub target: String,
    /// Read-only
    pub read_only: bool,
}

impl MountConfig {
    pub fn volume(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            mount_type: MountType::Volume,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            mount_type: MountType::Bind,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Mount type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

impl std::fmt::Display for MountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind => write!(f, "bind"),
            Self::Volume => write!(f, "volume"),
            Self::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

/// Runtime information
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub name: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
}

/// Lazy, single-pass tar byte stream uploaded into a container
pub type ArchiveStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Destination for a container's stdout or stderr
pub type OutputSink = dyn AsyncWrite + Send + Unpin;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ContainerId::new("mock-1").short(), "mock-1");
    }

    #[test]
    fn test_short_id_multibyte() {
        // 'é' is two bytes and straddles byte 12
        let id = ContainerId::new("abcdefghijké-tail");
        assert_eq!(id.short(), "abcdefghijké");
        let id = ContainerId::new("ééééééééééééé");
        assert_eq!(id.short(), "éééééééééééé");
    }
}
