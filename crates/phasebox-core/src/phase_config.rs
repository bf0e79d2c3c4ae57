//! Declarative container configuration for a single phase

use crate::lifecycle::LifecycleContext;
use phasebox_config::{ProxyConfig, TargetOs};
use phasebox_provider::{ContainerSpec, HostSpec, MountConfig, REGISTRY_AUTH_ENV};
use std::collections::HashMap;

const LIFECYCLE_BIN_DIR: &str = "/cnb/lifecycle";
const LINUX_DAEMON_SOCKET: &str = "/var/run/docker.sock";
const WINDOWS_DAEMON_PIPE: &str = r"\\.\pipe\docker_engine";

/// A single adjustment applied on top of the baseline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseConfigOp {
    /// Append arguments to the lifecycle binary's command line
    Args(Vec<String>),
    /// Append `source:target[:options]` binds
    Binds(Vec<String>),
    /// Give the phase access to the container daemon
    DaemonAccess,
    /// Append `KEY=VALUE` environment entries
    Env(Vec<String>),
    /// Run a different image than the builder
    Image(String),
    Mounts(Vec<MountConfig>),
    Network(String),
    /// Pass serialized registry credentials to the phase
    RegistryAccess(String),
    /// Run as the administrative user of the target OS
    Root,
    /// This phase is the first to see the app volume and must seed it
    PopulatesApp,
}

/// Container and host configuration of one phase, built from the
/// lifecycle's baseline plus caller operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseConfigProvider {
    name: String,
    os: TargetOs,
    container: ContainerSpec,
    host: HostSpec,
    populates_app: bool,
}

impl PhaseConfigProvider {
    pub fn new(
        name: impl Into<String>,
        lifecycle: &LifecycleContext,
        ops: impl IntoIterator<Item = PhaseConfigOp>,
    ) -> Self {
        let name = name.into();
        let mut labels = HashMap::new();
        labels.insert("author".to_string(), "phasebox".to_string());

        let mut provider = Self {
            container: ContainerSpec {
                image: lifecycle.builder_image().name.clone(),
                cmd: vec![format!("{}/{}", LIFECYCLE_BIN_DIR, name)],
                labels,
                ..Default::default()
            },
            host: HostSpec::default(),
            os: lifecycle.os(),
            populates_app: false,
            name,
        };

        provider.container.env.extend(proxy_env(lifecycle.proxy()));
        let paths = lifecycle.mount_paths();
        provider.host.binds.push(format!(
            "{}:{}",
            lifecycle.layers_volume(),
            paths.layers_dir()
        ));
        provider
            .host
            .binds
            .push(format!("{}:{}", lifecycle.app_volume(), paths.app_dir()));

        for op in ops {
            provider.apply(op);
        }
        provider
    }

    /// Apply one operation; later operations overwrite earlier scalar values
    pub fn apply(&mut self, op: PhaseConfigOp) {
        match op {
            PhaseConfigOp::Args(args) => self.container.cmd.extend(args),
            PhaseConfigOp::Binds(binds) => self.host.binds.extend(binds),
            PhaseConfigOp::DaemonAccess => {
                if self.os.is_windows() {
                    self.host
                        .binds
                        .push(format!("{}:{}", WINDOWS_DAEMON_PIPE, WINDOWS_DAEMON_PIPE));
                } else {
                    self.host
                        .binds
                        .push(format!("{}:{}", LINUX_DAEMON_SOCKET, LINUX_DAEMON_SOCKET));
                    self.container.user = Some("root".to_string());
                }
            }
            PhaseConfigOp::Env(env) => self.container.env.extend(env),
            PhaseConfigOp::Image(image) => self.container.image = image,
            PhaseConfigOp::Mounts(mounts) => self.host.mounts.extend(mounts),
            PhaseConfigOp::Network(mode) => self.host.network_mode = Some(mode),
            PhaseConfigOp::RegistryAccess(auth) => {
                self.container
                    .env
                    .push(format!("{}={}", REGISTRY_AUTH_ENV, auth));
                if !self.os.is_windows() {
                    self.host.network_mode = Some("host".to_string());
                }
            }
            PhaseConfigOp::Root => {
                let user = if self.os.is_windows() {
                    "ContainerAdministrator"
                } else {
                    "root"
                };
                self.container.user = Some(user.to_string());
            }
            PhaseConfigOp::PopulatesApp => self.populates_app = true,
        }
    }

    fn with(mut self, op: PhaseConfigOp) -> Self {
        self.apply(op);
        self
    }

    pub fn with_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(PhaseConfigOp::Args(args.into_iter().map(Into::into).collect()))
    }

    pub fn with_binds<I, S>(self, binds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(PhaseConfigOp::Binds(binds.into_iter().map(Into::into).collect()))
    }

    pub fn with_daemon_access(self) -> Self {
        self.with(PhaseConfigOp::DaemonAccess)
    }

    pub fn with_env<I, S>(self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(PhaseConfigOp::Env(env.into_iter().map(Into::into).collect()))
    }

    pub fn with_image(self, image: impl Into<String>) -> Self {
        self.with(PhaseConfigOp::Image(image.into()))
    }

    pub fn with_mounts(self, mounts: impl IntoIterator<Item = MountConfig>) -> Self {
        self.with(PhaseConfigOp::Mounts(mounts.into_iter().collect()))
    }

    pub fn with_network(self, mode: impl Into<String>) -> Self {
        self.with(PhaseConfigOp::Network(mode.into()))
    }

    pub fn with_registry_access(self, auth: impl Into<String>) -> Self {
        self.with(PhaseConfigOp::RegistryAccess(auth.into()))
    }

    pub fn with_root(self) -> Self {
        self.with(PhaseConfigOp::Root)
    }

    pub fn populating_app(self) -> Self {
        self.with(PhaseConfigOp::PopulatesApp)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn container_spec(&self) -> &ContainerSpec {
        &self.container
    }

    pub fn host_spec(&self) -> &HostSpec {
        &self.host
    }

    pub fn populates_app(&self) -> bool {
        self.populates_app
    }

    pub(crate) fn into_parts(self) -> (String, TargetOs, ContainerSpec, HostSpec, bool) {
        (
            self.name,
            self.os,
            self.container,
            self.host,
            self.populates_app,
        )
    }
}

/// Both spellings of each configured proxy variable
fn proxy_env(proxy: &ProxyConfig) -> Vec<String> {
    let mut env = Vec::new();
    for (upper, lower, value) in [
        ("HTTP_PROXY", "http_proxy", &proxy.http),
        ("HTTPS_PROXY", "https_proxy", &proxy.https),
        ("NO_PROXY", "no_proxy", &proxy.no_proxy),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            env.push(format!("{}={}", upper, value));
            env.push(format!("{}={}", lower, value));
        }
    }
    env
}
