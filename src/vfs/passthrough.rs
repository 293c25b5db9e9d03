use super::file::{BoxedFile, File, WriteAt};
use super::{Change, Dir, Filesystem, Metadata, Symlink, VfsError, VfsResult};
use parking_lot::RwLock;
use std::fs::{self, DirBuilder, FileTimes, OpenOptions, Permissions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::IntoRawFd;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Flags handled by `OpenOptions` itself rather than passed through as
/// custom flags.
const STD_OPEN_FLAGS: i32 =
    libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC | libc::O_APPEND;

/// A passthrough filesystem that maps mount paths into a host directory
///
/// Every path is resolved below `host_root`. Paths that try to climb out of
/// it with `..`, or through a symlink that lands outside it, are refused.
#[derive(Debug, Clone)]
pub struct PassthroughFs {
    /// The real filesystem path on the host
    host_root: PathBuf,
}

impl PassthroughFs {
    /// Create a new passthrough filesystem rooted at `host_root`
    pub fn new(host_root: PathBuf) -> Self {
        debug!(root = %host_root.display(), "created passthrough filesystem");
        Self { host_root }
    }

    /// Get the host root path
    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Translate a mount path to the actual host path
    pub fn translate_path(&self, path: &Path) -> VfsResult<PathBuf> {
        let mut host_path = self.host_root.clone();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => host_path.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(VfsError::permission_denied(path));
                }
            }
        }
        Ok(host_path)
    }

    /// Translate a mount path and check that the host object it names stays
    /// below the root once symlinks are resolved.
    ///
    /// With `follow` unset the final component is not resolved, so a link
    /// itself can be inspected, renamed or removed.
    fn resolve(&self, path: &Path, follow: bool) -> VfsResult<PathBuf> {
        let host_path = self.translate_path(path)?;
        let root = self.host_root.canonicalize()?;
        let mut existing = if follow || host_path == self.host_root {
            host_path.as_path()
        } else {
            host_path.parent().unwrap_or(self.host_root.as_path())
        };
        loop {
            match existing.canonicalize() {
                Ok(real) if real.starts_with(&root) => return Ok(host_path),
                Ok(real) => {
                    debug!(path = %path.display(), real = %real.display(), "refused escaping path");
                    return Err(VfsError::permission_denied(path));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // A dangling link could still be created through.
                    if existing.symlink_metadata().is_ok() {
                        return Err(VfsError::permission_denied(path));
                    }
                    match existing.parent() {
                        Some(parent) => existing = parent,
                        None => return Ok(host_path),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

fn to_metadata(name: String, meta: &fs::Metadata) -> VfsResult<Metadata> {
    Ok(Metadata {
        name,
        size: meta.len(),
        modified: meta.modified()?,
        mode: meta.mode(),
        is_dir: meta.is_dir(),
    })
}

impl Filesystem for PassthroughFs {
    fn open_file(&self, path: &Path, flags: i32, mode: u32) -> VfsResult<BoxedFile> {
        let host_path = self.resolve(path, true)?;

        let accmode = flags & libc::O_ACCMODE;
        let writable = accmode == libc::O_WRONLY || accmode == libc::O_RDWR;
        let mut options = OpenOptions::new();
        options
            .read(accmode == libc::O_RDONLY || accmode == libc::O_RDWR)
            .write(writable)
            .append(flags & libc::O_APPEND != 0)
            .truncate(writable && flags & libc::O_TRUNC != 0)
            .mode(mode)
            .custom_flags(flags & !STD_OPEN_FLAGS);
        if flags & libc::O_CREAT != 0 {
            if flags & libc::O_EXCL != 0 {
                options.create_new(true);
            } else {
                options.create(true);
            }
        }

        let file = options.open(&host_path)?;
        Ok(Arc::new(PassthroughFile::new(
            path.display().to_string(),
            file,
        )))
    }

    fn stat(&self, path: &Path) -> VfsResult<Metadata> {
        let host_path = self.resolve(path, false)?;
        let meta = fs::symlink_metadata(host_path)?;
        to_metadata(entry_name(path), &meta)
    }

    fn remove(&self, path: &Path) -> VfsResult<()> {
        let host_path = self.resolve(path, false)?;
        if host_path == self.host_root {
            return Err(VfsError::permission_denied(path));
        }
        if fs::symlink_metadata(&host_path)?.is_dir() {
            fs::remove_dir(host_path)?;
        } else {
            fs::remove_file(host_path)?;
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        fs::rename(self.resolve(from, false)?, self.resolve(to, false)?)?;
        Ok(())
    }

    fn as_dir(&self) -> Option<&dyn Dir> {
        Some(self)
    }

    fn as_symlink(&self) -> Option<&dyn Symlink> {
        Some(self)
    }

    fn as_change(&self) -> Option<&dyn Change> {
        Some(self)
    }
}

impl Dir for PassthroughFs {
    fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(self.resolve(path, true)?)?;
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> VfsResult<Vec<Metadata>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path, true)?)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(to_metadata(name, &entry.metadata()?)?);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl Symlink for PassthroughFs {
    fn symlink(&self, target: &Path, link: &Path) -> VfsResult<()> {
        std::os::unix::fs::symlink(target, self.resolve(link, false)?)?;
        Ok(())
    }

    fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        Ok(fs::read_link(self.resolve(path, false)?)?)
    }
}

impl Change for PassthroughFs {
    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        fs::set_permissions(self.resolve(path, true)?, Permissions::from_mode(mode))?;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> VfsResult<()> {
        std::os::unix::fs::chown(self.resolve(path, true)?, Some(uid), Some(gid))?;
        Ok(())
    }

    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let file = fs::File::open(self.resolve(path, true)?)?;
        file.set_times(FileTimes::new().set_accessed(atime).set_modified(mtime))?;
        Ok(())
    }
}

/// A file implementation that passes through operations to a host file.
///
/// Positioned reads and writes only need shared access to the descriptor,
/// so they run concurrently; `close` waits for them to finish.
pub struct PassthroughFile {
    name: String,
    file: RwLock<Option<fs::File>>,
}

impl PassthroughFile {
    pub fn new(name: String, file: fs::File) -> Self {
        Self {
            name,
            file: RwLock::new(Some(file)),
        }
    }

    fn with_file<T>(&self, op: impl FnOnce(&fs::File) -> std::io::Result<T>) -> VfsResult<T> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or(VfsError::Closed)?;
        Ok(op(file)?)
    }
}

impl File for PassthroughFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        self.with_file(|mut file| file.read(buf))
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.with_file(|file| file.read_at(buf, offset))
    }

    fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        self.with_file(|mut file| file.write(buf))
    }

    fn seek(&self, pos: SeekFrom) -> VfsResult<u64> {
        self.with_file(|mut file| file.seek(pos))
    }

    fn truncate(&self, size: u64) -> VfsResult<()> {
        self.with_file(|file| file.set_len(size))
    }

    fn close(&self) -> VfsResult<()> {
        let file = self.file.write().take().ok_or(VfsError::Closed)?;
        let result = unsafe { libc::close(file.into_raw_fd()) };
        if result < 0 {
            Err(VfsError::Io(std::io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }

    fn as_write_at(&self) -> Option<&dyn WriteAt> {
        Some(self)
    }
}

impl WriteAt for PassthroughFile {
    fn write_at(&self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.with_file(|file| file.write_at(buf, offset))
    }
}
