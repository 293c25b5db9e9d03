pub mod file;
pub mod memory;
pub mod passthrough;

use std::io;
use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

pub use file::{BoxedFile, File, WriteAt};

// File types for mode field
pub const S_IFMT: u32 = 0o170000; // File type mask
pub const S_IFREG: u32 = 0o100000; // Regular file
pub const S_IFDIR: u32 = 0o040000; // Directory
pub const S_IFLNK: u32 = 0o120000; // Symbolic link

/// VFS error type
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation on a file that has already been closed.
    #[error("file already closed")]
    Closed,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl VfsError {
    pub fn not_found(path: impl AsRef<Path>) -> Self {
        Self::NotFound(path.as_ref().display().to_string())
    }

    pub fn already_exists(path: impl AsRef<Path>) -> Self {
        Self::AlreadyExists(path.as_ref().display().to_string())
    }

    pub fn permission_denied(path: impl AsRef<Path>) -> Self {
        Self::PermissionDenied(path.as_ref().display().to_string())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_a_directory(path: impl AsRef<Path>) -> Self {
        Self::NotADirectory(path.as_ref().display().to_string())
    }

    pub fn is_a_directory(path: impl AsRef<Path>) -> Self {
        Self::IsADirectory(path.as_ref().display().to_string())
    }

    pub fn directory_not_empty(path: impl AsRef<Path>) -> Self {
        Self::DirectoryNotEmpty(path.as_ref().display().to_string())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true if this error only signals end of stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, VfsError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

pub type VfsResult<T> = StdResult<T, VfsError>;

/// Metadata of a file or directory as reported by a [`Filesystem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Base name of the entry
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
    /// Mode bits (permissions, possibly with file type bits)
    pub mode: u32,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Base filesystem contract.
///
/// Every backend provides path-based open, stat, remove and rename. Richer
/// backends additionally implement the optional capability traits ([`Dir`],
/// [`Symlink`], [`Change`]) and advertise them through the `as_*` queries,
/// which default to `None`.
pub trait Filesystem: Send + Sync {
    /// Open a file with `libc::O_*` flags, creating it with `mode` if
    /// `O_CREAT` is set.
    fn open_file(&self, path: &Path, flags: i32, mode: u32) -> VfsResult<BoxedFile>;

    /// Get metadata for a path.
    fn stat(&self, path: &Path) -> VfsResult<Metadata>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &Path) -> VfsResult<()>;

    /// Rename a file or directory.
    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    fn as_dir(&self) -> Option<&dyn Dir> {
        None
    }

    fn as_symlink(&self) -> Option<&dyn Symlink> {
        None
    }

    fn as_change(&self) -> Option<&dyn Change> {
        None
    }
}

/// Directory capability.
pub trait Dir: Send + Sync {
    /// Create a directory and any missing parents.
    fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// List the entries of a directory.
    fn read_dir(&self, path: &Path) -> VfsResult<Vec<Metadata>>;
}

/// Symbolic link capability.
pub trait Symlink: Send + Sync {
    /// Create a symbolic link at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> VfsResult<()>;

    fn readlink(&self, path: &Path) -> VfsResult<PathBuf>;
}

/// Permission, ownership and timestamp capability.
pub trait Change: Send + Sync {
    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()>;

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> VfsResult<()>;

    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> VfsResult<()>;
}

/// A shared filesystem trait object for dynamic dispatch
pub type BoxedFilesystem = Arc<dyn Filesystem>;
