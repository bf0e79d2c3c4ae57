//! Global configuration for phasebox
//!
//! Located at `~/.config/phasebox/config.toml`

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global phasebox configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub runtime: RuntimeConfig,
    pub lifecycle: LifecycleConfig,
    pub proxy: ProxyConfig,
}

/// Container runtime connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Docker-compatible API socket (unix path, npipe path or http URL)
    pub socket: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            timeout_secs: 120,
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// Lifecycle defaults shared by every phase of a build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Name of the application directory inside the app volume
    pub workspace: String,
    /// Operating system of the builder image
    pub target_os: TargetOs,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            workspace: "workspace".to_string(),
            target_os: TargetOs::Linux,
        }
    }
}

/// Operating system the phase containers run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    #[default]
    Linux,
    Windows,
}

impl TargetOs {
    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }
}

impl std::fmt::Display for TargetOs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// Proxy settings forwarded into phase containers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// Fill unset values from the process environment
    pub fn resolve(&self) -> Self {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Fill unset values using `lookup`, preferring the upper-case variable
    pub fn resolve_with<F>(&self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = |upper: &str, lower: &str| {
            lookup(upper)
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(lower).filter(|v| !v.is_empty()))
        };

        Self {
            http: self
                .http
                .clone()
                .or_else(|| from_env("HTTP_PROXY", "http_proxy")),
            https: self
                .https
                .clone()
                .or_else(|| from_env("HTTPS_PROXY", "https_proxy")),
            no_proxy: self
                .no_proxy
                .clone()
                .or_else(|| from_env("NO_PROXY", "no_proxy")),
        }
    }
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.clone(),
            source: e,
        })?;

        if config
            .lifecycle
            .workspace
            .contains(|c: char| c == '/' || c == '\\')
        {
            return Err(ConfigError::Invalid(format!(
                "lifecycle.workspace must be a single directory name, got '{}'",
                config.lifecycle.workspace
            )));
        }

        tracing::debug!(
            "Loaded config from {:?}: target_os={}",
            path,
            config.lifecycle.target_os
        );

        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "phasebox").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.lifecycle.workspace, "workspace");
        assert_eq!(config.lifecycle.target_os, TargetOs::Linux);
        assert_eq!(config.runtime.timeout_secs, 120);
        assert_eq!(config.proxy, ProxyConfig::default());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
socket = "/run/user/1000/podman/podman.sock"

[lifecycle]
workspace = "app"
target_os = "windows"

[proxy]
https = "http://proxy.internal:3128"
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.socket, "/run/user/1000/podman/podman.sock");
        assert_eq!(config.runtime.timeout_secs, 120);
        assert_eq!(config.lifecycle.workspace, "app");
        assert!(config.lifecycle.target_os.is_windows());
        assert_eq!(
            config.proxy.https,
            Some("http://proxy.internal:3128".to_string())
        );
        assert_eq!(config.proxy.http, None);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = GlobalConfig::load_from(&tmp.path().join("missing.toml")).unwrap();
        assert_eq!(config.lifecycle.workspace, "workspace");
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/config.toml");

        let mut config = GlobalConfig::default();
        config.lifecycle.target_os = TargetOs::Windows;
        config.proxy.no_proxy = Some("localhost".to_string());
        config.save_to(&path).unwrap();

        let loaded = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(loaded.lifecycle.target_os, TargetOs::Windows);
        assert_eq!(loaded.proxy.no_proxy, Some("localhost".to_string()));
    }

    #[test]
    fn test_rejects_workspace_with_separator() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[lifecycle]\nworkspace = \"a/b\"\n").unwrap();

        let result = GlobalConfig::load_from(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_proxy_resolve_prefers_explicit_then_upper_case() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HTTP_PROXY", "http://upper:80"),
            ("http_proxy", "http://lower:80"),
            ("https_proxy", "http://lower-secure:443"),
            ("NO_PROXY", ""),
        ]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let explicit = ProxyConfig {
            http: Some("http://configured:80".to_string()),
            ..Default::default()
        };
        let resolved = explicit.resolve_with(lookup);

        assert_eq!(resolved.http, Some("http://configured:80".to_string()));
        assert_eq!(resolved.https, Some("http://lower-secure:443".to_string()));
        assert_eq!(resolved.no_proxy, None);

        let resolved = ProxyConfig::default().resolve_with(lookup);
        assert_eq!(resolved.http, Some("http://upper:80".to_string()));
    }
}
