//! Streaming of the application source into a container
//!
//! The tar producer runs on a blocking task and writes into a bounded pipe;
//! the runtime upload consumes the other end concurrently.

use crate::archive::ArchiveSource;
use crate::pipe::pipe;
use crate::{ArchiveError, StageError};
use phasebox_provider::{ContainerId, ContainerRuntime};

/// Encode `source` and extract it at `dest` inside container `id`
///
/// When both sides fail, the producer's error is reported, unless it only
/// failed because the upload stopped reading.
pub async fn stream_archive_into(
    runtime: &dyn ContainerRuntime,
    id: &ContainerId,
    dest: &str,
    source: ArchiveSource,
) -> Result<(), StageError> {
    let path = source.path().to_path_buf();
    let (writer, reader) = pipe();

    tracing::debug!(
        "Streaming {} into container {} at {}",
        path.display(),
        id.short(),
        dest
    );

    let producer = tokio::task::spawn_blocking(move || -> Result<(), ArchiveError> {
        let writer = source.write_tar(writer)?;
        writer.close()?;
        Ok(())
    });
    let upload = runtime.copy_archive_into(id, dest, Box::pin(reader.into_stream()));

    let (produced, uploaded) = tokio::join!(producer, upload);

    match (produced, uploaded) {
        (Err(join_err), _) => Err(StageError::Aborted(join_err.to_string())),
        (Ok(Err(archive_err)), Err(upload_err)) if archive_err.is_broken_pipe() => {
            Err(StageError::Upload(upload_err))
        }
        (Ok(Err(archive_err)), _) => Err(StageError::Archive {
            path,
            source: archive_err,
        }),
        (Ok(Ok(())), Err(upload_err)) => Err(StageError::Upload(upload_err)),
        (Ok(Ok(())), Ok(())) => {
            tracing::debug!("Finished streaming {}", path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{SourceKind, TarOptions};
    use crate::test_support::{MockCall, MockRuntime};
    use phasebox_provider::ProviderError;
    use std::io::Read;
    use std::path::Path;

    fn options() -> TarOptions {
        TarOptions {
            root: "workspace".to_string(),
            uid: 1000,
            gid: 1000,
            mode: None,
        }
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_streams_full_archive() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("app.py"), "print('hi')").unwrap();
        // Large enough to need many pipe chunks
        std::fs::write(tmp.path().join("blob.bin"), vec![7u8; 1024 * 1024]).unwrap();

        let runtime = MockRuntime::new();
        let id = ContainerId::new("c1");
        let source = ArchiveSource::new(tmp.path(), SourceKind::Dir, options(), None);

        stream_archive_into(&runtime, &id, "/", source).await.unwrap();

        let uploads = runtime.uploads();
        assert_eq!(uploads.len(), 1);
        let names = entry_names(&uploads[0]);
        assert!(names.iter().any(|n| n == "workspace/app.py"));
        assert!(names.iter().any(|n| n == "workspace/blob.bin"));

        let mut archive = tar::Archive::new(uploads[0].as_slice());
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap() == Path::new("workspace/blob.bin") {
                let mut content = Vec::new();
                entry.read_to_end(&mut content).unwrap();
                assert_eq!(content.len(), 1024 * 1024);
            }
        }

        assert!(runtime.was_called(&MockCall::CopyInto {
            id: "c1".to_string(),
            dest: "/".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_producer_error_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing");

        let runtime = MockRuntime::new();
        runtime.set_copy_into_result(Err(ProviderError::RuntimeError(
            "unexpected EOF".to_string(),
        )));
        let source = ArchiveSource::new(&missing, SourceKind::Dir, options(), None);

        let err = stream_archive_into(&runtime, &ContainerId::new("c1"), "/", source)
            .await
            .unwrap_err();

        match err {
            StageError::Archive { path, source } => {
                assert_eq!(path, missing);
                assert!(matches!(source, ArchiveError::Read { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_error_reported_over_broken_pipe() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("blob.bin"), vec![1u8; 4 * 1024 * 1024]).unwrap();

        let runtime = MockRuntime::new();
        runtime.set_copy_into_result(Err(ProviderError::RuntimeError(
            "no space left on device".to_string(),
        )));
        let source = ArchiveSource::new(tmp.path(), SourceKind::Dir, options(), None);

        let err = stream_archive_into(&runtime, &ContainerId::new("c1"), "/", source)
            .await
            .unwrap_err();

        match err {
            StageError::Upload(e) => assert!(e.to_string().contains("no space left")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
