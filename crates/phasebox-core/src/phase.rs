//! A single lifecycle phase: one container, created, optionally seeded with
//! the application source, run to completion and removed

use crate::archive::{ArchiveSource, FileFilter, SourceKind, TarOptions};
use crate::lifecycle::LifecycleContext;
use crate::logging::{LogLevel, PhaseLogger, PrefixWriter};
use crate::mount_paths::MountPaths;
use crate::phase_config::PhaseConfigProvider;
use crate::run_once::RunOnce;
use crate::staging::stream_archive_into;
use crate::{PhaseError, Result, StageError};
use phasebox_config::TargetOs;
use phasebox_provider::{ContainerId, ContainerRuntime, ContainerSpec, HostSpec};
use std::path::PathBuf;
use std::sync::Arc;

/// Where a populating Windows phase receives the source before copying it
/// into the app volume itself
const WINDOWS_STAGING_PATH: &str = "/windows";

pub struct Phase {
    name: String,
    os: TargetOs,
    container: ContainerSpec,
    host: HostSpec,
    populates_app: bool,
    container_id: Option<ContainerId>,
    runtime: Arc<dyn ContainerRuntime>,
    logger: Arc<dyn PhaseLogger>,
    uid: u64,
    gid: u64,
    app_path: PathBuf,
    mount_paths: MountPaths,
    app_once: Arc<RunOnce>,
    file_filter: Option<FileFilter>,
}

impl Phase {
    pub fn new(provider: PhaseConfigProvider, lifecycle: &LifecycleContext) -> Self {
        let (name, os, container, host, populates_app) = provider.into_parts();
        let builder = lifecycle.builder_image();
        Self {
            name,
            os,
            container,
            host,
            populates_app,
            container_id: None,
            runtime: lifecycle.runtime().clone(),
            logger: lifecycle.logger().clone(),
            uid: builder.uid,
            gid: builder.gid,
            app_path: lifecycle.app_path().to_path_buf(),
            mount_paths: lifecycle.mount_paths().clone(),
            app_once: lifecycle.app_once().clone(),
            file_filter: lifecycle.file_filter().cloned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_spec(&self) -> &ContainerSpec {
        &self.container
    }

    pub fn host_spec(&self) -> &HostSpec {
        &self.host
    }

    /// Id of the container once [`Phase::run`] has created it
    pub fn container_id(&self) -> Option<&ContainerId> {
        self.container_id.as_ref()
    }

    /// Create the container, make sure the app volume holds the source, and
    /// run the container to completion
    ///
    /// The container stays behind on failure; call [`Phase::cleanup`]
    /// regardless of the outcome.
    pub async fn run(&mut self) -> Result<()> {
        let (container, extract_path) = self.container_for_run();

        let id = self
            .runtime
            .create(&container, &self.host)
            .await
            .map_err(|source| PhaseError::Create {
                phase: self.name.clone(),
                source,
            })?;
        tracing::debug!("Created {} container {}", self.name, id.short());
        self.container_id = Some(id.clone());

        // On Windows only the populating phase can receive the source; the
        // others wait until it has been staged
        let once = self.app_once.clone();
        let staged = if self.os.is_windows() && !self.populates_app {
            tracing::debug!("Phase {} waiting for the app source", self.name);
            once.wait().await
        } else {
            once.run(|| self.stage_app(&id, extract_path)).await
        };
        staged.map_err(|source| PhaseError::Stage {
            phase: self.name.clone(),
            source,
        })?;

        let mut stdout = PrefixWriter::new(self.logger.clone(), LogLevel::Info, &self.name);
        let mut stderr = PrefixWriter::new(self.logger.clone(), LogLevel::Error, &self.name);
        self.runtime
            .run(&id, &mut stdout, &mut stderr)
            .await
            .map_err(|source| PhaseError::Run {
                phase: self.name.clone(),
                source,
            })?;

        tracing::debug!("Phase {} finished", self.name);
        Ok(())
    }

    /// Force-remove the phase's container
    pub async fn cleanup(&self) -> Result<()> {
        let Some(id) = &self.container_id else {
            return Err(PhaseError::NoContainer {
                phase: self.name.clone(),
            });
        };

        self.runtime
            .remove(id, true)
            .await
            .map_err(|source| PhaseError::Cleanup {
                phase: self.name.clone(),
                source,
            })?;
        tracing::debug!("Removed {} container {}", self.name, id.short());
        Ok(())
    }

    /// [`Phase::run`] followed by [`Phase::cleanup`], whatever the run
    /// outcome
    ///
    /// A missing container is not reported on top of the run error that
    /// caused it.
    pub async fn run_and_cleanup(&mut self) -> Result<()> {
        let run = self.run().await;
        let cleanup = self.cleanup().await;

        match (run, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(cleanup)) => Err(cleanup),
            (Err(run), Ok(())) | (Err(run), Err(PhaseError::NoContainer { .. })) => Err(run),
            (Err(run), Err(cleanup)) => Err(PhaseError::RunAndCleanup {
                phase: self.name.clone(),
                run: Box::new(run),
                cleanup: Box::new(cleanup),
            }),
        }
    }

    /// Container config with the Windows copy step prepended when needed,
    /// and the path the source archive is extracted at
    ///
    /// Windows containers cannot extract into a mounted volume while the
    /// container is stopped, so the populating phase receives the source in
    /// its own filesystem and copies it into the app volume when it starts.
    fn container_for_run(&self) -> (ContainerSpec, &'static str) {
        let mut container = self.container.clone();
        if !(self.os.is_windows() && self.populates_app) {
            return (container, "/");
        }

        let app_dir = self.mount_paths.app_dir();
        let mut entrypoint = vec![
            "cmd".to_string(),
            "/c".to_string(),
            format!(
                "echo Copying app directory to '{}' && xcopy c:\\windows\\{} {} /E /H /Y /C /B &&",
                app_dir,
                self.mount_paths.app_dir_name(),
                app_dir
            ),
        ];
        entrypoint.append(&mut container.entrypoint);
        container.entrypoint = entrypoint;
        (container, WINDOWS_STAGING_PATH)
    }

    async fn stage_app(&self, id: &ContainerId, dest: &str) -> std::result::Result<(), StageError> {
        let options = TarOptions {
            root: self.mount_paths.app_dir_name().to_string(),
            uid: self.uid,
            gid: self.gid,
            mode: None,
        };
        let mut source = ArchiveSource::open(&self.app_path, options, self.file_filter.clone())
            .map_err(|source| StageError::Archive {
                path: self.app_path.clone(),
                source,
            })?;
        // Windows hosts have no executable bits to carry over
        if source.kind() == SourceKind::Dir && cfg!(windows) {
            source = source.with_mode(0o777);
        }

        tracing::info!(
            "Copying {} into the app volume via {}",
            self.app_path.display(),
            self.name
        );
        stream_archive_into(self.runtime.as_ref(), id, dest, source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::BuilderImage;
    use crate::phase_config::PhaseConfigOp;
    use crate::test_support::{MockCall, MockRuntime};

    fn lifecycle(os: TargetOs, runtime: Arc<MockRuntime>) -> LifecycleContext {
        LifecycleContext::builder(runtime, BuilderImage::new("builder", 1000, 1000), "/src")
            .os(os)
            .volumes("layers", "app")
            .build()
    }

    #[test]
    fn test_windows_populating_phase_copies_from_staging_dir() {
        let ctx = lifecycle(TargetOs::Windows, Arc::new(MockRuntime::new()));
        let phase = Phase::new(
            PhaseConfigProvider::new("detect", &ctx, [PhaseConfigOp::PopulatesApp]),
            &ctx,
        );

        let (container, extract_path) = phase.container_for_run();
        assert_eq!(extract_path, "/windows");
        assert_eq!(
            container.entrypoint,
            vec![
                "cmd",
                "/c",
                r"echo Copying app directory to 'c:\workspace' && xcopy c:\windows\workspace c:\workspace /E /H /Y /C /B &&",
            ]
        );
        assert_eq!(container.cmd, vec!["/cnb/lifecycle/detect"]);
        // The stored config is left alone
        assert!(phase.container_spec().entrypoint.is_empty());
    }

    #[test]
    fn test_entrypoint_untouched_otherwise() {
        let windows = lifecycle(TargetOs::Windows, Arc::new(MockRuntime::new()));
        let phase = Phase::new(PhaseConfigProvider::new("build", &windows, []), &windows);
        let (container, extract_path) = phase.container_for_run();
        assert_eq!(extract_path, "/");
        assert!(container.entrypoint.is_empty());

        let linux = lifecycle(TargetOs::Linux, Arc::new(MockRuntime::new()));
        let phase = Phase::new(
            PhaseConfigProvider::new("detect", &linux, [PhaseConfigOp::PopulatesApp]),
            &linux,
        );
        let (container, extract_path) = phase.container_for_run();
        assert_eq!(extract_path, "/");
        assert!(container.entrypoint.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_without_container() {
        let runtime = Arc::new(MockRuntime::new());
        let ctx = lifecycle(TargetOs::Linux, runtime.clone());
        let phase = Phase::new(PhaseConfigProvider::new("detect", &ctx, []), &ctx);

        let err = phase.cleanup().await.unwrap_err();
        assert!(matches!(err, PhaseError::NoContainer { ref phase } if phase == "detect"));
        assert!(!runtime
            .get_calls()
            .iter()
            .any(|c| matches!(c, MockCall::Remove { .. })));
    }
}
