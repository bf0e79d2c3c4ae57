//! Container runtime trait and implementations for phasebox
//!
//! This crate provides the narrow slice of a container runtime that the
//! phase engine needs: create a container, upload a tar stream into it,
//! run it to completion while relaying its output, and remove it.

mod docker;
mod docker_auth;
mod error;
mod types;

pub use docker::DockerRuntime;
pub use docker_auth::*;
pub use error::*;
pub use types::*;

use async_trait::async_trait;

/// Trait for container runtimes (Docker, Podman via its Docker API, ...)
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container, returning its id
    async fn create(&self, container: &ContainerSpec, host: &HostSpec) -> Result<ContainerId>;

    /// Extract a tar stream into `dest` inside the container
    async fn copy_archive_into(
        &self,
        id: &ContainerId,
        dest: &str,
        archive: ArchiveStream,
    ) -> Result<()>;

    /// Start the container and block until it exits, relaying its output.
    /// A non-zero exit status is returned as [`ProviderError::NonZeroExit`].
    async fn run(
        &self,
        id: &ContainerId,
        stdout: &mut OutputSink,
        stderr: &mut OutputSink,
    ) -> Result<()>;

    /// Remove a container
    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// Check if the runtime is available/connected
    async fn ping(&self) -> Result<()>;

    /// Get runtime information
    fn info(&self) -> RuntimeInfo;
}

/// Connect to the runtime configured in the global config
pub async fn create_runtime(
    config: &phasebox_config::GlobalConfig,
) -> Result<Box<dyn ContainerRuntime>> {
    let socket = &config.runtime.socket;
    match DockerRuntime::new(socket, config.runtime.timeout_secs).await {
        Ok(runtime) => Ok(Box::new(runtime)),
        Err(e) => {
            let socket_exists =
                std::path::Path::new(socket.trim_start_matches("unix://")).exists();
            Err(ProviderError::ConnectionError(format_connection_error(
                socket,
                socket_exists,
                &e,
            )))
        }
    }
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(
    socket_path: &str,
    socket_exists: bool,
    underlying: &ProviderError,
) -> String {
    let mut msg = String::from("Cannot connect to the container runtime\n\n");

    if !socket_exists {
        msg.push_str(&format!(
            "The Docker API socket was not found at:\n  {}\n\n",
            socket_path
        ));
        msg.push_str("To start Docker, run:\n");
        msg.push_str("  sudo systemctl enable --now docker\n");
        msg.push_str("Or point [runtime] socket in the phasebox config at a running daemon.\n");
    } else {
        msg.push_str(&format!(
            "The socket exists at {} but the daemon is not responding.\n\n",
            socket_path
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_missing_socket() {
        let err = ProviderError::ConnectionError("refused".to_string());
        let msg = format_connection_error("/nonexistent/docker.sock", false, &err);
        assert!(msg.contains("/nonexistent/docker.sock"));
        assert!(msg.contains("was not found"));
        assert!(!msg.contains("refused"));
    }

    #[test]
    fn test_connection_error_unresponsive_daemon() {
        let err = ProviderError::ConnectionError("refused".to_string());
        let msg = format_connection_error("/var/run/docker.sock", true, &err);
        assert!(msg.contains("not responding"));
        assert!(msg.contains("refused"));
    }
}
