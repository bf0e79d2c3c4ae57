//! Logging for phase output and the process-wide subscriber

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

/// Destination for lines produced by phase containers
pub trait PhaseLogger: Send + Sync {
    fn log(&self, level: LogLevel, msg: &str);

    fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }
}

/// Forwards phase output to the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl PhaseLogger for TracingLogger {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Info => tracing::info!("{}", msg),
            LogLevel::Error => tracing::error!("{}", msg),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // A subscriber may already be installed (tests, embedding binaries)
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

/// Async sink that splits container output into lines and logs each one as
/// `[<prefix>] <line>`
///
/// A trailing partial line is held back until a newline arrives or the
/// writer is flushed, shut down or dropped.
pub struct PrefixWriter {
    logger: Arc<dyn PhaseLogger>,
    level: LogLevel,
    prefix: String,
    buf: Vec<u8>,
}

impl PrefixWriter {
    pub fn new(logger: Arc<dyn PhaseLogger>, level: LogLevel, prefix: impl Into<String>) -> Self {
        Self {
            logger,
            level,
            prefix: prefix.into(),
            buf: Vec::new(),
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = String::from_utf8_lossy(line);
        self.logger
            .log(self.level, &format!("[{}] {}", self.prefix, text));
    }

    fn emit_complete_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.emit(&line[..pos]);
        }
    }

    fn emit_remainder(&mut self) {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.emit(&rest);
        }
    }
}

impl AsyncWrite for PrefixWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        this.buf.extend_from_slice(data);
        this.emit_complete_lines();
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.get_mut().emit_remainder();
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.poll_flush(cx)
    }
}

impl Drop for PrefixWriter {
    fn drop(&mut self) {
        self.emit_remainder();
    }
}
