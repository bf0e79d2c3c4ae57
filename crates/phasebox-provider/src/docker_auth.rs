//! Docker registry credential support
//!
//! Parses `~/.docker/config.json` (or `$DOCKER_CONFIG/config.json`), invokes
//! credential helpers, and serializes the result into the JSON blob that
//! lifecycle phases read from `CNB_REGISTRY_AUTH`.

use crate::{ProviderError, Result};
use base64::Engine;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Environment variable phases read registry credentials from
pub const REGISTRY_AUTH_ENV: &str = "CNB_REGISTRY_AUTH";

/// Registry name used for images without an explicit registry
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Key Docker Hub credentials are stored under in config.json
const DOCKER_HUB_CONFIG_KEY: &str = "https://index.docker.io/v1/";

/// Docker configuration from ~/.docker/config.json
#[derive(Debug, Deserialize, Default)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, AuthEntry>,
    #[serde(rename = "credsStore")]
    pub creds_store: Option<String>,
    #[serde(rename = "credHelpers", default)]
    pub cred_helpers: HashMap<String, String>,
}

/// Auth entry in the auths section
#[derive(Debug, Deserialize, Default)]
pub struct AuthEntry {
    /// Base64-encoded "username:password"
    pub auth: Option<String>,
    #[serde(rename = "registrytoken")]
    pub registry_token: Option<String>,
}

/// Credential resolved for one registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCredential {
    Basic { username: String, password: String },
    Bearer(String),
}

impl RegistryCredential {
    /// Value of an HTTP Authorization header for this credential
    pub fn authorization(&self) -> String {
        match self {
            Self::Basic { username, password } => format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password))
            ),
            Self::Bearer(token) => format!("Bearer {}", token),
        }
    }
}

/// Response from credential helper
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

impl DockerConfig {
    /// Load Docker config from `$DOCKER_CONFIG` or `~/.docker`
    pub fn load() -> Option<Self> {
        let config_path = docker_config_dir()?.join("config.json");
        let content = std::fs::read_to_string(&config_path).ok()?;
        match serde_json::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Failed to parse docker config: {}", e);
                None
            }
        }
    }

    /// Get credential for a specific registry
    pub fn get_credential(&self, registry: &str) -> Option<RegistryCredential> {
        let key = config_key(registry);

        // Check for registry-specific credential helper first
        if let Some(helper) = self.cred_helpers.get(key) {
            if let Some(cred) = invoke_credential_helper(helper, key) {
                return Some(cred);
            }
        }

        // Try global credential helper
        if let Some(store) = &self.creds_store {
            if let Some(cred) = invoke_credential_helper(store, key) {
                return Some(cred);
            }
        }

        // Fall back to static auths
        let entry = self.auths.get(key).or_else(|| self.auths.get(registry))?;
        if let Some(token) = &entry.registry_token {
            return Some(RegistryCredential::Bearer(token.clone()));
        }
        entry.auth.as_deref().and_then(decode_auth)
    }
}

fn docker_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir));
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".docker"))
}

fn config_key(registry: &str) -> &str {
    if registry == DEFAULT_REGISTRY {
        DOCKER_HUB_CONFIG_KEY
    } else {
        registry
    }
}

/// Invoke a Docker credential helper to get credentials for a registry
fn invoke_credential_helper(store: &str, registry: &str) -> Option<RegistryCredential> {
    // Helper binary is named "docker-credential-{store}"
    let helper = format!("docker-credential-{}", store);

    let mut child = match Command::new(&helper)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!("Failed to spawn credential helper '{}': {}", helper, e);
            return None;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(registry.as_bytes()).is_err() {
            tracing::debug!("Failed to write to credential helper stdin");
            return None;
        }
    }

    let output = match child.wait_with_output() {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("Credential helper failed: {}", e);
            return None;
        }
    };

    if !output.status.success() {
        tracing::debug!(
            "Credential helper '{}' returned non-zero for registry '{}'",
            helper,
            registry
        );
        return None;
    }

    // Parse JSON response: {"Username": "...", "Secret": "..."}
    match serde_json::from_slice::<CredentialResponse>(&output.stdout) {
        // Helpers report identity tokens with this sentinel username
        Ok(response) if response.username == "<token>" => {
            Some(RegistryCredential::Bearer(response.secret))
        }
        Ok(response) => Some(RegistryCredential::Basic {
            username: response.username,
            password: response.secret,
        }),
        Err(e) => {
            tracing::debug!("Failed to parse credential helper response: {}", e);
            None
        }
    }
}

/// Decode base64-encoded "username:password" auth string
fn decode_auth(auth: &str) -> Option<RegistryCredential> {
    let decoded = base64::engine::general_purpose::STANDARD.decode(auth).ok()?;
    let decoded_str = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded_str.split_once(':')?;
    Some(RegistryCredential::Basic {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Extract the registry hostname from an image name
/// Examples:
///   "nginx" -> "index.docker.io"
///   "registry.example.com/image:tag" -> "registry.example.com"
///   "localhost:5000/image" -> "localhost:5000"
pub fn registry_for_image(image: &str) -> String {
    // Remove digest suffix first (@sha256:...)
    let image_no_digest = image.split('@').next().unwrap_or(image);

    match image_no_digest.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            if first == "docker.io" {
                DEFAULT_REGISTRY.to_string()
            } else {
                first.to_string()
            }
        }
        _ => DEFAULT_REGISTRY.to_string(),
    }
}

/// Serialize credentials for the registries of `images` into the
/// `CNB_REGISTRY_AUTH` JSON format: `{"<registry>": "<authorization>"}`.
/// Registries without credentials are omitted.
pub fn build_registry_auth<F>(images: &[&str], lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<RegistryCredential>,
{
    let mut auths = BTreeMap::new();
    for image in images {
        let registry = registry_for_image(image);
        if auths.contains_key(&registry) {
            continue;
        }
        if let Some(cred) = lookup(&registry) {
            auths.insert(registry, cred.authorization());
        }
    }

    serde_json::to_string(&auths).map_err(|e| ProviderError::ConfigError(e.to_string()))
}

/// Build the `CNB_REGISTRY_AUTH` value for `images` from the local Docker config
pub fn registry_auth_env(images: &[&str]) -> Result<String> {
    let config = DockerConfig::load().unwrap_or_default();
    build_registry_auth(images, |registry| config.get_credential(registry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_for_image() {
        assert_eq!(registry_for_image("nginx"), "index.docker.io");
        assert_eq!(registry_for_image("nginx:latest"), "index.docker.io");
        assert_eq!(registry_for_image("library/nginx"), "index.docker.io");
        assert_eq!(registry_for_image("docker.io/library/nginx"), "index.docker.io");

        assert_eq!(
            registry_for_image("registry.example.com/myimage"),
            "registry.example.com"
        );
        assert_eq!(
            registry_for_image("registry.example.com/org/myimage:v1"),
            "registry.example.com"
        );
        assert_eq!(registry_for_image("localhost:5000/myimage"), "localhost:5000");
        assert_eq!(
            registry_for_image("gcr.io/project/image@sha256:abcd"),
            "gcr.io"
        );
    }

    #[test]
    fn test_decode_auth() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("testuser:testpass");
        assert_eq!(
            decode_auth(&encoded),
            Some(RegistryCredential::Basic {
                username: "testuser".to_string(),
                password: "testpass".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_auth_with_colon_in_password() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("user:pass:word");
        assert_eq!(
            decode_auth(&encoded),
            Some(RegistryCredential::Basic {
                username: "user".to_string(),
                password: "pass:word".to_string(),
            })
        );
    }

    #[test]
    fn test_static_auth_lookup_uses_docker_hub_key() {
        let config: DockerConfig = serde_json::from_str(&format!(
            r#"{{"auths": {{"https://index.docker.io/v1/": {{"auth": "{}"}}}}}}"#,
            base64::engine::general_purpose::STANDARD.encode("hub:secret")
        ))
        .unwrap();

        assert_eq!(
            config.get_credential(DEFAULT_REGISTRY),
            Some(RegistryCredential::Basic {
                username: "hub".to_string(),
                password: "secret".to_string(),
            })
        );
        assert_eq!(config.get_credential("gcr.io"), None);
    }

    #[test]
    fn test_build_registry_auth() {
        let lookup = |registry: &str| match registry {
            "index.docker.io" => Some(RegistryCredential::Basic {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
            "ghcr.io" => Some(RegistryCredential::Bearer("tok".to_string())),
            _ => None,
        };

        let json = build_registry_auth(
            &["builder/image", "ghcr.io/org/run:1", "quay.io/other", "nginx"],
            lookup,
        )
        .unwrap();

        let parsed: BTreeMap<String, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["index.docker.io"], "Basic dXNlcjpwYXNz");
        assert_eq!(parsed["ghcr.io"], "Bearer tok");
    }

    #[test]
    fn test_build_registry_auth_empty() {
        assert_eq!(build_registry_auth(&["nginx"], |_| None).unwrap(), "{}");
    }
}
