//! Test support utilities for phasebox-core
//!
//! Provides MockRuntime and a capturing logger for exercising phases
//! without a real Docker daemon.

use crate::logging::{LogLevel, PhaseLogger};
use async_trait::async_trait;
use futures::StreamExt;
use phasebox_provider::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Create { image: String, cmd: Vec<String> },
    CopyInto { id: String, dest: String },
    /// The upload stream was read to the end
    CopyIntoDone { id: String, bytes: usize },
    Run { id: String },
    Remove { id: String, force: bool },
    Ping,
}

/// Configurable mock container runtime for testing
///
/// Container ids are handed out sequentially (`mock-1`, `mock-2`, ...).
pub struct MockRuntime {
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    /// Every container config passed to `create`
    pub created: Arc<Mutex<Vec<(ContainerSpec, HostSpec)>>>,
    /// Complete archives received by `copy_archive_into`
    pub uploads: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Result for create calls
    pub create_result: Arc<Mutex<Result<()>>>,
    /// Result for copy_archive_into calls; an error is returned without
    /// reading the stream
    pub copy_into_result: Arc<Mutex<Result<()>>>,
    /// Delay before copy_archive_into starts reading
    pub copy_delay: Arc<Mutex<Duration>>,
    /// Result for run calls
    pub run_result: Arc<Mutex<Result<()>>>,
    /// Result for remove calls
    pub remove_result: Arc<Mutex<Result<()>>>,
    /// Output written to the sinks by run
    pub stdout: Arc<Mutex<Vec<u8>>>,
    pub stderr: Arc<Mutex<Vec<u8>>>,
    next_id: AtomicUsize,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Create a new mock runtime with default success results
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            created: Arc::new(Mutex::new(Vec::new())),
            uploads: Arc::new(Mutex::new(Vec::new())),
            create_result: Arc::new(Mutex::new(Ok(()))),
            copy_into_result: Arc::new(Mutex::new(Ok(()))),
            copy_delay: Arc::new(Mutex::new(Duration::ZERO)),
            run_result: Arc::new(Mutex::new(Ok(()))),
            remove_result: Arc::new(Mutex::new(Ok(()))),
            stdout: Arc::new(Mutex::new(Vec::new())),
            stderr: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Record a call
    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<(ContainerSpec, HostSpec)> {
        self.created.lock().unwrap().clone()
    }

    pub fn set_create_result(&self, result: Result<()>) {
        *self.create_result.lock().unwrap() = result;
    }

    pub fn set_copy_into_result(&self, result: Result<()>) {
        *self.copy_into_result.lock().unwrap() = result;
    }

    pub fn set_copy_delay(&self, delay: Duration) {
        *self.copy_delay.lock().unwrap() = delay;
    }

    pub fn set_run_result(&self, result: Result<()>) {
        *self.run_result.lock().unwrap() = result;
    }

    pub fn set_remove_result(&self, result: Result<()>) {
        *self.remove_result.lock().unwrap() = result;
    }

    pub fn set_output(&self, stdout: &[u8], stderr: &[u8]) {
        *self.stdout.lock().unwrap() = stdout.to_vec();
        *self.stderr.lock().unwrap() = stderr.to_vec();
    }
}

/// Helper to clone a Result<()> from an Arc<Mutex<Result<()>>>
fn clone_result(r: &Arc<Mutex<Result<()>>>) -> Result<()> {
    let guard = r.lock().unwrap();
    match &*guard {
        Ok(()) => Ok(()),
        Err(e) => Err(clone_provider_error(e)),
    }
}

/// Clone a ProviderError (thiserror types don't implement Clone)
pub fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::ContainerNotFound(s) => ProviderError::ContainerNotFound(s.clone()),
        ProviderError::ImageNotFound(s) => ProviderError::ImageNotFound(s.clone()),
        ProviderError::NonZeroExit { code } => ProviderError::NonZeroExit { code: *code },
        ProviderError::RuntimeError(s) => ProviderError::RuntimeError(s.clone()),
        ProviderError::ConfigError(s) => ProviderError::ConfigError(s.clone()),
        ProviderError::Docker(e) => ProviderError::RuntimeError(format!("{} (cloned)", e)),
        ProviderError::IoError(_) => ProviderError::RuntimeError("IO error (cloned)".into()),
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, container: &ContainerSpec, host: &HostSpec) -> Result<ContainerId> {
        self.record(MockCall::Create {
            image: container.image.clone(),
            cmd: container.cmd.clone(),
        });
        clone_result(&self.create_result)?;
        self.created
            .lock()
            .unwrap()
            .push((container.clone(), host.clone()));
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(ContainerId::new(format!("mock-{}", n)))
    }

    async fn copy_archive_into(
        &self,
        id: &ContainerId,
        dest: &str,
        mut archive: ArchiveStream,
    ) -> Result<()> {
        self.record(MockCall::CopyInto {
            id: id.0.clone(),
            dest: dest.to_string(),
        });

        let delay = *self.copy_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        clone_result(&self.copy_into_result)?;

        let mut received = Vec::new();
        while let Some(chunk) = archive.next().await {
            received.extend_from_slice(&chunk);
        }
        self.record(MockCall::CopyIntoDone {
            id: id.0.clone(),
            bytes: received.len(),
        });
        self.uploads.lock().unwrap().push(received);
        Ok(())
    }

    async fn run(
        &self,
        id: &ContainerId,
        stdout: &mut OutputSink,
        stderr: &mut OutputSink,
    ) -> Result<()> {
        self.record(MockCall::Run { id: id.0.clone() });

        let out = self.stdout.lock().unwrap().clone();
        let err = self.stderr.lock().unwrap().clone();
        stdout.write_all(&out).await?;
        stderr.write_all(&err).await?;
        stdout.flush().await?;
        stderr.flush().await?;

        clone_result(&self.run_result)
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        self.record(MockCall::Remove {
            id: id.0.clone(),
            force,
        });
        clone_result(&self.remove_result)
    }

    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        Ok(())
    }

    fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            name: "mock".to_string(),
            api_version: "1.44".to_string(),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
        }
    }
}

/// Logger that keeps every line for later assertions
#[derive(Debug, Default)]
pub struct CapturingLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl CapturingLogger {
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl PhaseLogger for CapturingLogger {
    fn log(&self, level: LogLevel, msg: &str) {
        self.lines.lock().unwrap().push((level, msg.to_string()));
    }
}
