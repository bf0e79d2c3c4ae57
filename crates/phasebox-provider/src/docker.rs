//! Docker runtime implementation using bollard

use crate::{
    ArchiveStream, ContainerId, ContainerRuntime, ContainerSpec, HostSpec, MountType,
    OutputSink, ProviderError, Result, RuntimeInfo,
};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
    WaitContainerOptions,
};
use bollard::service::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

/// Docker runtime using bollard crate
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker API at `socket_path` and verify it responds
    pub async fn new(socket_path: &str, timeout_secs: u64) -> Result<Self> {
        let client = connect(socket_path, timeout_secs)
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self { client })
    }
}

fn connect(
    socket_path: &str,
    timeout_secs: u64,
) -> std::result::Result<Docker, bollard::errors::Error> {
    if socket_path.starts_with("http://") || socket_path.starts_with("https://") {
        return Docker::connect_with_http(socket_path, timeout_secs, bollard::API_DEFAULT_VERSION);
    }

    #[cfg(windows)]
    if socket_path.starts_with("npipe://") || socket_path.starts_with("//./pipe/") {
        let path = socket_path.trim_start_matches("npipe://");
        return Docker::connect_with_named_pipe(path, timeout_secs, bollard::API_DEFAULT_VERSION);
    }

    let path = socket_path.trim_start_matches("unix://");
    Docker::connect_with_socket(path, timeout_secs, bollard::API_DEFAULT_VERSION)
}

/// Map a daemon 404 to the more specific error, keep anything else as is
fn not_found_as(
    err: bollard::errors::Error,
    not_found: impl FnOnce() -> ProviderError,
) -> ProviderError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => not_found(),
        other => other.into(),
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn to_bollard_mount(mount: &crate::MountConfig) -> Mount {
    Mount {
        target: Some(mount.target.clone()),
        source: Some(mount.source.clone()),
        typ: Some(match mount.mount_type {
            MountType::Bind => MountTypeEnum::BIND,
            MountType::Volume => MountTypeEnum::VOLUME,
            MountType::Tmpfs => MountTypeEnum::TMPFS,
        }),
        read_only: Some(mount.read_only),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, container: &ContainerSpec, host: &HostSpec) -> Result<ContainerId> {
        for mount in &host.mounts {
            tracing::debug!("{} mount {} -> {}", mount.mount_type, mount.source, mount.target);
        }

        let host_config = HostConfig {
            binds: non_empty(host.binds.clone()),
            mounts: non_empty(host.mounts.iter().map(to_bollard_mount).collect()),
            network_mode: host.network_mode.clone(),
            ..Default::default()
        };

        let config = Config {
            image: Some(container.image.clone()),
            cmd: non_empty(container.cmd.clone()),
            entrypoint: non_empty(container.entrypoint.clone()),
            env: non_empty(container.env.clone()),
            labels: if container.labels.is_empty() {
                None
            } else {
                Some(container.labels.clone())
            },
            user: container.user.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| not_found_as(e, || ProviderError::ImageNotFound(container.image.clone())))?;

        for warning in &response.warnings {
            tracing::warn!("create {}: {}", container.image, warning);
        }

        Ok(ContainerId::new(response.id))
    }

    async fn copy_archive_into(
        &self,
        id: &ContainerId,
        dest: &str,
        archive: ArchiveStream,
    ) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dest,
            ..Default::default()
        };

        self.client
            .upload_to_container_streaming(&id.0, Some(options), archive)
            .await
            .map_err(|e| not_found_as(e, || ProviderError::ContainerNotFound(id.0.clone())))?;

        Ok(())
    }

    async fn run(
        &self,
        id: &ContainerId,
        stdout: &mut OutputSink,
        stderr: &mut OutputSink,
    ) -> Result<()> {
        // Attach before start so no early output is lost
        let AttachContainerResults { mut output, .. } = self
            .client
            .attach_container(
                &id.0,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;

        while let Some(chunk) = output.next().await {
            match chunk? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.write_all(&message).await?;
                }
                LogOutput::StdErr { message } => {
                    stderr.write_all(&message).await?;
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        stdout.flush().await?;
        stderr.flush().await?;

        let mut wait = self.client.wait_container(
            &id.0,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        while let Some(result) = wait.next().await {
            match result {
                Ok(response) if response.status_code != 0 => {
                    return Err(ProviderError::NonZeroExit {
                        code: response.status_code,
                    });
                }
                Ok(_) => {}
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    return Err(ProviderError::NonZeroExit { code });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client
            .remove_container(&id.0, Some(options))
            .await
            .map_err(|e| not_found_as(e, || ProviderError::ContainerNotFound(id.0.clone())))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            name: "docker".to_string(),
            api_version: format!(
                "{}.{}",
                bollard::API_DEFAULT_VERSION.major_version,
                bollard::API_DEFAULT_VERSION.minor_version
            ),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MountConfig;

    #[test]
    fn test_not_found_mapping() {
        let err = not_found_as(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "No such image: example/builder".to_string(),
            },
            || ProviderError::ImageNotFound("example/builder".to_string()),
        );
        assert!(matches!(err, ProviderError::ImageNotFound(ref i) if i == "example/builder"));

        let err = not_found_as(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 500,
                message: "boom".to_string(),
            },
            || ProviderError::ContainerNotFound("abc".to_string()),
        );
        assert!(matches!(err, ProviderError::Docker(_)));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty::<String>(Vec::new()), None);
        assert_eq!(non_empty(vec![1]), Some(vec![1]));
    }

    #[test]
    fn test_to_bollard_mount() {
        let mount = to_bollard_mount(&MountConfig::volume("cache-vol", "/cache").read_only());
        assert_eq!(mount.typ, Some(MountTypeEnum::VOLUME));
        assert_eq!(mount.source.as_deref(), Some("cache-vol"));
        assert_eq!(mount.target.as_deref(), Some("/cache"));
        assert_eq!(mount.read_only, Some(true));

        let mount = to_bollard_mount(&MountConfig::bind("/host", "/ctr"));
        assert_eq!(mount.typ, Some(MountTypeEnum::BIND));
        assert_eq!(mount.read_only, Some(false));
    }
}
