//! Tar encoding of the application source
//!
//! A directory is walked recursively; a zip file is unpacked entry by entry.
//! Either way the entries are re-rooted under a single directory name, owned
//! by the build user, and written straight into the supplied writer so the
//! archive never has to exist in memory as a whole.

use crate::ArchiveError;
use std::fs::{File, Metadata};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Inclusion predicate over source paths; `false` drops the path (and,
/// for directories, everything below it)
///
/// Paths are relative to the source root, for directories and zip files
/// alike, so `src/app.py` names the same entry in both.
pub type FileFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Header settings applied to every entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarOptions {
    /// Directory every entry is placed under
    pub root: String,
    pub uid: u64,
    pub gid: u64,
    /// Permission bits forced onto every entry; `None` keeps the source's
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Dir,
    Zip,
}

/// Application source ready to be encoded
#[derive(Clone)]
pub struct ArchiveSource {
    path: PathBuf,
    kind: SourceKind,
    options: TarOptions,
    filter: Option<FileFilter>,
}

impl std::fmt::Debug for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSource")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl ArchiveSource {
    pub fn new(
        path: impl Into<PathBuf>,
        kind: SourceKind,
        options: TarOptions,
        filter: Option<FileFilter>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            options,
            filter,
        }
    }

    /// Inspect `path` and pick the encoding: directories are walked, any
    /// other file is read as a zip archive
    pub fn open(
        path: impl Into<PathBuf>,
        options: TarOptions,
        filter: Option<FileFilter>,
    ) -> Result<Self, ArchiveError> {
        let path = path.into();
        let meta = std::fs::metadata(&path).map_err(read_error(&path))?;
        let kind = if meta.is_dir() {
            SourceKind::Dir
        } else {
            SourceKind::Zip
        };
        Ok(Self::new(path, kind, options, filter))
    }

    /// Force every entry to `mode`
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.options.mode = Some(mode);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn options(&self) -> &TarOptions {
        &self.options
    }

    /// Encode the source into `out`, returning the writer once the archive
    /// trailer has been written
    pub fn write_tar<W: Write>(&self, out: W) -> Result<W, ArchiveError> {
        match self.kind {
            SourceKind::Dir => {
                write_dir_as_tar(&self.path, &self.options, self.filter.as_ref(), out)
            }
            SourceKind::Zip => {
                write_zip_as_tar(&self.path, &self.options, self.filter.as_ref(), out)
            }
        }
    }
}

fn read_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Read {
        path: path.to_path_buf(),
        source,
    }
}

fn new_header(
    entry_type: tar::EntryType,
    size: u64,
    mode: u32,
    mtime: u64,
    options: &TarOptions,
) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(options.mode.unwrap_or(mode));
    header.set_uid(options.uid);
    header.set_gid(options.gid);
    header.set_mtime(mtime);
    header
}

fn append_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &Path,
    mode: u32,
    mtime: u64,
    options: &TarOptions,
) -> Result<(), ArchiveError> {
    let mut header = new_header(tar::EntryType::Directory, 0, mode, mtime, options);
    builder.append_data(&mut header, name, std::io::empty())?;
    Ok(())
}

#[cfg(unix)]
fn host_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn host_mode(meta: &Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}

fn mtime(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write the contents of directory `src` as a tar stream rooted at
/// `options.root`
pub fn write_dir_as_tar<W: Write>(
    src: &Path,
    options: &TarOptions,
    filter: Option<&FileFilter>,
    out: W,
) -> Result<W, ArchiveError> {
    let meta = std::fs::metadata(src).map_err(read_error(src))?;
    let mut builder = tar::Builder::new(out);

    let root = PathBuf::from(&options.root);
    append_dir(&mut builder, &root, host_mode(&meta), mtime(&meta), options)?;
    add_dir_to_tar(&mut builder, src, Path::new(""), options, filter)?;

    Ok(builder.into_inner()?)
}

/// Recursively add directory contents to tar; `relative` is `dir` relative
/// to the source root
fn add_dir_to_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    relative: &Path,
    options: &TarOptions,
    filter: Option<&FileFilter>,
) -> Result<(), ArchiveError> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(read_error(dir))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(read_error(dir))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = relative.join(entry.file_name());
        if let Some(filter) = filter {
            if !filter(&relative) {
                tracing::trace!("excluding {}", relative.display());
                continue;
            }
        }

        let name = Path::new(&options.root).join(&relative);
        let meta = std::fs::symlink_metadata(&path).map_err(read_error(&path))?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            append_dir(builder, &name, host_mode(&meta), mtime(&meta), options)?;
            add_dir_to_tar(builder, &path, &relative, options, filter)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path).map_err(read_error(&path))?;
            let mut header = new_header(
                tar::EntryType::Symlink,
                0,
                0o777,
                mtime(&meta),
                options,
            );
            builder.append_link(&mut header, &name, &target)?;
        } else if file_type.is_file() {
            let file = File::open(&path).map_err(read_error(&path))?;
            let mut header = new_header(
                tar::EntryType::Regular,
                meta.len(),
                host_mode(&meta),
                mtime(&meta),
                options,
            );
            builder.append_data(&mut header, &name, file)?;
        } else {
            tracing::debug!("skipping special file {}", path.display());
        }
    }

    Ok(())
}

/// Write the entries of zip file `src` as a tar stream rooted at
/// `options.root`
pub fn write_zip_as_tar<W: Write>(
    src: &Path,
    options: &TarOptions,
    filter: Option<&FileFilter>,
    out: W,
) -> Result<W, ArchiveError> {
    let file = File::open(src).map_err(read_error(src))?;
    let mut zip = zip::ZipArchive::new(file)?;
    let mut builder = tar::Builder::new(out);

    let root = PathBuf::from(&options.root);
    append_dir(&mut builder, &root, 0o755, 0, options)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("skipping zip entry with unsafe path '{}'", entry.name());
            continue;
        };

        if let Some(filter) = filter {
            if !filter(&relative) {
                tracing::trace!("excluding {}", relative.display());
                continue;
            }
        }

        let name = root.join(&relative);
        let unix_mode = entry.unix_mode();

        if entry.is_dir() {
            let mode = unix_mode.map(|m| m & 0o7777).unwrap_or(0o755);
            append_dir(&mut builder, &name, mode, 0, options)?;
        } else if unix_mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            entry.read_to_string(&mut target).map_err(read_error(src))?;
            let mut header = new_header(tar::EntryType::Symlink, 0, 0o777, 0, options);
            builder.append_link(&mut header, &name, &target)?;
        } else {
            let mode = unix_mode.map(|m| m & 0o7777).unwrap_or(0o644);
            let mut header =
                new_header(tar::EntryType::Regular, entry.size(), mode, 0, options);
            builder.append_data(&mut header, &name, &mut entry)?;
        }
    }

    Ok(builder.into_inner()?)
}
