//! Error types for phasebox-core

use phasebox_provider::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while producing the application tar stream
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write archive: {0}")]
    Write(#[from] std::io::Error),

    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ArchiveError {
    /// The consumer went away before the archive was fully written
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, Self::Write(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
    }
}

/// Failure while staging the application source into the app volume
#[derive(Error, Debug)]
pub enum StageError {
    #[error("create tar archive from '{path}': {source}")]
    Archive {
        path: PathBuf,
        source: ArchiveError,
    },

    #[error("upload to container: {0}")]
    Upload(#[from] ProviderError),

    #[error("archive task aborted: {0}")]
    Aborted(String),

    #[error("an earlier phase failed to stage the application: {0}")]
    PreviousAttemptFailed(String),
}

/// Failure of a single phase, always annotated with the phase name
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("failed to create '{phase}' container: {source}")]
    Create {
        phase: String,
        source: ProviderError,
    },

    #[error("failed to copy files to '{phase}' container: {source}")]
    Stage { phase: String, source: StageError },

    #[error("failed to run '{phase}' container: {source}")]
    Run {
        phase: String,
        source: ProviderError,
    },

    #[error("failed to remove '{phase}' container: {source}")]
    Cleanup {
        phase: String,
        source: ProviderError,
    },

    #[error("no '{phase}' container to remove")]
    NoContainer { phase: String },

    #[error("{run}; additionally {cleanup}")]
    RunAndCleanup {
        phase: String,
        run: Box<PhaseError>,
        cleanup: Box<PhaseError>,
    },
}

impl PhaseError {
    /// Name of the phase the error belongs to
    pub fn phase(&self) -> &str {
        match self {
            Self::Create { phase, .. }
            | Self::Stage { phase, .. }
            | Self::Run { phase, .. }
            | Self::Cleanup { phase, .. }
            | Self::NoContainer { phase }
            | Self::RunAndCleanup { phase, .. } => phase,
        }
    }
}

pub type Result<T> = std::result::Result<T, PhaseError>;
