//! Userspace filesystem driver callback surface.
//!
//! The driver framework dispatches kernel requests as path-based callbacks
//! on [`FileSystemInterface`], each returning either a non-negative result or
//! a negated errno. [`FuseWrapper`] implements this surface on top of any
//! [`crate::vfs::Filesystem`].

pub mod attr;
pub mod errno;
pub mod fdtable;
pub mod wrapper;

pub use fdtable::FdTable;
pub use wrapper::FuseWrapper;

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Handle value passed by the driver when a call is not tied to an open file.
pub const NO_HANDLE: u64 = u64::MAX;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Time with nanosecond resolution, relative to the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub fn new(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                sec: d.as_secs() as i64,
                nsec: d.subsec_nanos() as i64,
            },
            Err(e) => {
                let d = e.duration();
                let mut sec = -(d.as_secs() as i64);
                let mut nsec = d.subsec_nanos() as i64;
                if nsec > 0 {
                    sec -= 1;
                    nsec = NANOS_PER_SEC - nsec;
                }
                Self { sec, nsec }
            }
        }
    }

    pub fn time(&self) -> SystemTime {
        let nsec = Duration::from_nanos(self.nsec.clamp(0, NANOS_PER_SEC - 1) as u64);
        if self.sec >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.sec as u64) + nsec
        } else {
            UNIX_EPOCH - Duration::from_secs(self.sec.unsigned_abs()) + nsec
        }
    }
}

/// File status as handed back to the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub atim: Timespec,
    pub mtim: Timespec,
    pub ctim: Timespec,
    pub blksize: i64,
    pub blocks: i64,
    pub birthtim: Timespec,
    pub flags: u32,
}

/// Filesystem statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

/// Callback used by `readdir` to hand one entry to the driver.
///
/// Returns false once the driver's buffer is full.
pub type FillDir<'a> = dyn FnMut(&str, Option<&Stat>, i64) -> bool + 'a;

/// Callback used by `listxattr` to hand one attribute name to the driver.
pub type FillXattr<'a> = dyn FnMut(&str) -> bool + 'a;

/// Every callback the driver framework dispatches.
///
/// Callbacks may be invoked concurrently from many driver threads. Integer
/// results are `0` (or a byte count) on success and a negated errno on
/// failure; handle-returning calls yield `(code, handle)` with handle `0` on
/// failure.
pub trait FileSystemInterface: Send + Sync {
    /// Called when the filesystem is mounted.
    fn init(&self);

    /// Called when the filesystem is unmounted.
    fn destroy(&self);

    /// Get filesystem statistics.
    fn statfs(&self, path: &str, stat: &mut Statfs) -> i32;

    /// Create a file node.
    fn mknod(&self, path: &str, mode: u32, dev: u64) -> i32;

    /// Create a directory.
    fn mkdir(&self, path: &str, mode: u32) -> i32;

    /// Remove a file.
    fn unlink(&self, path: &str) -> i32;

    /// Remove a directory.
    fn rmdir(&self, path: &str) -> i32;

    /// Create a hard link.
    fn link(&self, oldpath: &str, newpath: &str) -> i32;

    /// Create a symbolic link at `newpath` pointing to `target`.
    fn symlink(&self, target: &str, newpath: &str) -> i32;

    /// Read the target of a symbolic link.
    fn readlink(&self, path: &str) -> (i32, String);

    /// Rename a file or directory.
    fn rename(&self, oldpath: &str, newpath: &str) -> i32;

    /// Change permission bits.
    fn chmod(&self, path: &str, mode: u32) -> i32;

    /// Change owner and group.
    fn chown(&self, path: &str, uid: u32, gid: u32) -> i32;

    /// Change access and modification times (`[atime, mtime]`).
    fn utimens(&self, path: &str, tmsp: &[Timespec]) -> i32;

    /// Check file access permissions.
    fn access(&self, path: &str, mask: u32) -> i32;

    /// Create and open a file.
    fn create(&self, path: &str, flags: i32, mode: u32) -> (i32, u64);

    /// Open a file.
    fn open(&self, path: &str, flags: i32) -> (i32, u64);

    /// Get file attributes.
    fn getattr(&self, path: &str, stat: &mut Stat, fh: u64) -> i32;

    /// Change the size of a file, through `fh` unless it is [`NO_HANDLE`].
    fn truncate(&self, path: &str, size: i64, fh: u64) -> i32;

    /// Read data from an open file.
    fn read(&self, path: &str, buf: &mut [u8], offset: i64, fh: u64) -> i32;

    /// Write data to an open file.
    fn write(&self, path: &str, buf: &[u8], offset: i64, fh: u64) -> i32;

    /// Flush cached file data.
    fn flush(&self, path: &str, fh: u64) -> i32;

    /// Close an open file.
    fn release(&self, path: &str, fh: u64) -> i32;

    /// Synchronize file contents.
    fn fsync(&self, path: &str, datasync: bool, fh: u64) -> i32;

    /// Open a directory.
    fn opendir(&self, path: &str) -> (i32, u64);

    /// Read a directory, handing each entry to `fill`.
    fn readdir(&self, path: &str, fill: &mut FillDir<'_>, offset: i64, fh: u64) -> i32;

    /// Close an open directory.
    fn releasedir(&self, path: &str, fh: u64) -> i32;

    /// Synchronize directory contents.
    fn fsyncdir(&self, path: &str, datasync: bool, fh: u64) -> i32;

    /// Set an extended attribute.
    fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> i32;

    /// Get an extended attribute.
    fn getxattr(&self, path: &str, name: &str) -> (i32, Vec<u8>);

    /// Remove an extended attribute.
    fn removexattr(&self, path: &str, name: &str) -> i32;

    /// List extended attributes.
    fn listxattr(&self, path: &str, fill: &mut FillXattr<'_>) -> i32;
}
