use super::VfsResult;
use std::io::SeekFrom;
use std::sync::Arc;

/// File object returned by [`super::Filesystem::open_file`].
///
/// All methods take `&self` so a file can be shared between threads; the
/// implementation provides the interior mutability it needs. Note that
/// `seek` followed by `write` is two calls and therefore not atomic.
pub trait File: Send + Sync {
    /// Name the file was opened with
    fn name(&self) -> &str;

    /// Read from the file at the current offset
    fn read(&self, buf: &mut [u8]) -> VfsResult<usize>;

    /// Read from the file at `offset` without moving the current offset
    ///
    /// Returns fewer bytes than requested (possibly zero) at end of file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> VfsResult<usize>;

    /// Write to the file at the current offset
    fn write(&self, buf: &[u8]) -> VfsResult<usize>;

    /// Seek to a position in the file
    fn seek(&self, pos: SeekFrom) -> VfsResult<u64>;

    /// Change the size of the file
    fn truncate(&self, size: u64) -> VfsResult<()>;

    /// Close the file
    ///
    /// Every later operation on the same object fails.
    fn close(&self) -> VfsResult<()>;

    /// Positioned write support, if this file offers it
    fn as_write_at(&self) -> Option<&dyn WriteAt> {
        None
    }
}

/// Positioned writes.
///
/// Implementations must tolerate concurrent calls at different offsets.
pub trait WriteAt: Send + Sync {
    fn write_at(&self, buf: &[u8], offset: u64) -> VfsResult<usize>;
}

/// A shared File trait object for dynamic dispatch
pub type BoxedFile = Arc<dyn File>;
