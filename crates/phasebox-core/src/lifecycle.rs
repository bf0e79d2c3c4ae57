//! State shared by every phase of one lifecycle execution

use crate::archive::FileFilter;
use crate::logging::{PhaseLogger, TracingLogger};
use crate::mount_paths::MountPaths;
use crate::run_once::RunOnce;
use phasebox_config::{GlobalConfig, ProxyConfig, TargetOs};
use phasebox_provider::ContainerRuntime;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builder image the phases run in, and the user it builds as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderImage {
    pub name: String,
    pub uid: u64,
    pub gid: u64,
}

impl BuilderImage {
    pub fn new(name: impl Into<String>, uid: u64, gid: u64) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }
}

/// Runtime handle, volumes, source location and the staging barrier for one
/// build
///
/// Shared between phases behind an `Arc`; a fresh context means a fresh
/// barrier, so the source is staged again.
pub struct LifecycleContext {
    runtime: Arc<dyn ContainerRuntime>,
    logger: Arc<dyn PhaseLogger>,
    builder: BuilderImage,
    app_path: PathBuf,
    file_filter: Option<FileFilter>,
    os: TargetOs,
    proxy: ProxyConfig,
    layers_volume: String,
    app_volume: String,
    mount_paths: MountPaths,
    app_once: Arc<RunOnce>,
}

impl LifecycleContext {
    pub fn builder(
        runtime: Arc<dyn ContainerRuntime>,
        builder: BuilderImage,
        app_path: impl Into<PathBuf>,
    ) -> LifecycleContextBuilder {
        LifecycleContextBuilder {
            runtime,
            builder,
            app_path: app_path.into(),
            logger: None,
            file_filter: None,
            os: TargetOs::default(),
            proxy: ProxyConfig::default(),
            workspace: String::new(),
            volumes: None,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn logger(&self) -> &Arc<dyn PhaseLogger> {
        &self.logger
    }

    pub fn builder_image(&self) -> &BuilderImage {
        &self.builder
    }

    pub fn app_path(&self) -> &Path {
        &self.app_path
    }

    pub fn file_filter(&self) -> Option<&FileFilter> {
        self.file_filter.as_ref()
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    pub fn layers_volume(&self) -> &str {
        &self.layers_volume
    }

    pub fn app_volume(&self) -> &str {
        &self.app_volume
    }

    pub fn mount_paths(&self) -> &MountPaths {
        &self.mount_paths
    }

    pub fn app_once(&self) -> &Arc<RunOnce> {
        &self.app_once
    }
}

pub struct LifecycleContextBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    builder: BuilderImage,
    app_path: PathBuf,
    logger: Option<Arc<dyn PhaseLogger>>,
    file_filter: Option<FileFilter>,
    os: TargetOs,
    proxy: ProxyConfig,
    workspace: String,
    volumes: Option<(String, String)>,
}

impl LifecycleContextBuilder {
    /// Take target OS, workspace name and proxies from the global config,
    /// filling unset proxies from the environment
    pub fn config(mut self, config: &GlobalConfig) -> Self {
        self.os = config.lifecycle.target_os;
        self.workspace = config.lifecycle.workspace.clone();
        self.proxy = config.proxy.resolve();
        self
    }

    pub fn logger(mut self, logger: Arc<dyn PhaseLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn file_filter(mut self, filter: FileFilter) -> Self {
        self.file_filter = Some(filter);
        self
    }

    pub fn os(mut self, os: TargetOs) -> Self {
        self.os = os;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// Use existing volumes instead of generated names
    pub fn volumes(mut self, layers: impl Into<String>, app: impl Into<String>) -> Self {
        self.volumes = Some((layers.into(), app.into()));
        self
    }

    pub fn build(self) -> LifecycleContext {
        let (layers_volume, app_volume) = self.volumes.unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            (
                format!("phasebox-layers-{}", id),
                format!("phasebox-app-{}", id),
            )
        });

        tracing::debug!(
            "Lifecycle for {} ({}) uses volumes {} and {}",
            self.builder.name,
            self.os,
            layers_volume,
            app_volume
        );

        LifecycleContext {
            runtime: self.runtime,
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
            builder: self.builder,
            app_path: self.app_path,
            file_filter: self.file_filter,
            os: self.os,
            proxy: self.proxy,
            mount_paths: MountPaths::for_os(self.os, &self.workspace),
            layers_volume,
            app_volume,
            app_once: Arc::new(RunOnce::new()),
        }
    }
}
