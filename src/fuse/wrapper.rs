//! Driver callbacks implemented on top of a [`Filesystem`].

use super::attr::fill_stat;
use super::errno::{errno, status};
use super::fdtable::FdTable;
use super::{FileSystemInterface, FillDir, FillXattr, Stat, Statfs, Timespec, NO_HANDLE};
use crate::vfs::{BoxedFilesystem, Filesystem, VfsResult};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Exposes a [`Filesystem`] through [`FileSystemInterface`].
///
/// Optional capabilities are queried on every call that needs them; calls
/// whose capability is missing report `ENOSYS`.
pub struct FuseWrapper {
    underlying: BoxedFilesystem,
    fds: FdTable,
}

impl FuseWrapper {
    pub fn new(underlying: BoxedFilesystem) -> Self {
        Self {
            underlying,
            fds: FdTable::new(),
        }
    }

    pub fn from_fs<F: Filesystem + 'static>(fs: F) -> Self {
        Self::new(Arc::new(fs))
    }

    /// Number of files currently open through this wrapper.
    pub fn open_files(&self) -> usize {
        self.fds.len()
    }

    fn open_handle(&self, path: &str, flags: i32, mode: u32) -> (i32, u64) {
        match self.underlying.open_file(Path::new(path), flags, mode) {
            Ok(file) => (0, self.fds.allocate(file)),
            Err(e) => (errno(&e), 0),
        }
    }

    /// Truncate a path that has no open handle.
    fn truncate_path(&self, path: &str, size: u64) -> VfsResult<()> {
        let file = self
            .underlying
            .open_file(Path::new(path), libc::O_WRONLY, 0o777)?;
        let truncated = file.truncate(size);
        let closed = file.close();
        truncated.and(closed)
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

impl FileSystemInterface for FuseWrapper {
    fn init(&self) {
        debug!("init");
    }

    fn destroy(&self) {
        debug!(open_files = self.fds.len(), "destroy");
    }

    fn statfs(&self, path: &str, _stat: &mut Statfs) -> i32 {
        trace!(path, "statfs");
        -libc::ENOSYS
    }

    fn mknod(&self, path: &str, mode: u32, dev: u64) -> i32 {
        trace!(path, mode, dev, "mknod");
        -libc::ENOSYS
    }

    fn mkdir(&self, path: &str, mode: u32) -> i32 {
        trace!(path, mode, "mkdir");
        match self.underlying.as_dir() {
            Some(dir) => status(dir.mkdir_all(Path::new(path), mode)),
            None => -libc::ENOSYS,
        }
    }

    fn unlink(&self, path: &str) -> i32 {
        trace!(path, "unlink");
        status(self.underlying.remove(Path::new(path)))
    }

    fn rmdir(&self, path: &str) -> i32 {
        trace!(path, "rmdir");
        status(self.underlying.remove(Path::new(path)))
    }

    fn link(&self, oldpath: &str, newpath: &str) -> i32 {
        trace!(oldpath, newpath, "link");
        -libc::ENOSYS
    }

    fn symlink(&self, target: &str, newpath: &str) -> i32 {
        trace!(target, newpath, "symlink");
        match self.underlying.as_symlink() {
            Some(fs) => status(fs.symlink(Path::new(target), Path::new(newpath))),
            None => -libc::ENOSYS,
        }
    }

    fn readlink(&self, path: &str) -> (i32, String) {
        trace!(path, "readlink");
        match self.underlying.as_symlink() {
            Some(fs) => match fs.readlink(Path::new(path)) {
                Ok(target) => (0, target.to_string_lossy().into_owned()),
                Err(e) => (errno(&e), String::new()),
            },
            None => (-libc::ENOSYS, String::new()),
        }
    }

    fn rename(&self, oldpath: &str, newpath: &str) -> i32 {
        trace!(oldpath, newpath, "rename");
        status(
            self.underlying
                .rename(Path::new(oldpath), Path::new(newpath)),
        )
    }

    fn chmod(&self, path: &str, mode: u32) -> i32 {
        trace!(path, mode, "chmod");
        match self.underlying.as_change() {
            Some(fs) => status(fs.chmod(Path::new(path), mode)),
            None => -libc::ENOSYS,
        }
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> i32 {
        trace!(path, uid, gid, "chown");
        match self.underlying.as_change() {
            Some(fs) => status(fs.chown(Path::new(path), uid, gid)),
            None => -libc::ENOSYS,
        }
    }

    fn utimens(&self, path: &str, tmsp: &[Timespec]) -> i32 {
        trace!(path, "utimens");
        match self.underlying.as_change() {
            Some(fs) => match tmsp {
                [atime, mtime] => status(fs.chtimes(Path::new(path), atime.time(), mtime.time())),
                _ => -libc::EINVAL,
            },
            None => -libc::ENOSYS,
        }
    }

    fn access(&self, path: &str, mask: u32) -> i32 {
        trace!(path, mask, "access");
        -libc::ENOSYS
    }

    fn create(&self, path: &str, flags: i32, mode: u32) -> (i32, u64) {
        trace!(path, flags, mode, "create");
        self.open_handle(path, flags | libc::O_CREAT | libc::O_RDWR, mode)
    }

    fn open(&self, path: &str, flags: i32) -> (i32, u64) {
        trace!(path, flags, "open");
        self.open_handle(path, flags | libc::O_RDONLY, 0o777)
    }

    // The VFS has no stat by handle, so the handle is ignored.
    fn getattr(&self, path: &str, stat: &mut Stat, fh: u64) -> i32 {
        trace!(path, fh, "getattr");
        match self.underlying.stat(Path::new(path)) {
            Ok(meta) => {
                fill_stat(&meta, stat);
                0
            }
            Err(e) => errno(&e),
        }
    }

    fn truncate(&self, path: &str, size: i64, fh: u64) -> i32 {
        trace!(path, size, fh, "truncate");
        let Ok(size) = u64::try_from(size) else {
            return -libc::EINVAL;
        };
        if fh == NO_HANDLE {
            return status(self.truncate_path(path, size));
        }
        match self.fds.get(fh) {
            Some(file) => status(file.truncate(size)),
            None => -libc::EINVAL,
        }
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: i64, fh: u64) -> i32 {
        trace!(path, len = buf.len(), offset, fh, "read");
        let Some(file) = self.fds.get(fh) else {
            return -libc::EINVAL;
        };
        let Ok(offset) = u64::try_from(offset) else {
            return -libc::EINVAL;
        };
        match file.read_at(buf, offset) {
            Ok(n) => count(n),
            Err(e) if e.is_eof() => 0,
            Err(e) => errno(&e),
        }
    }

    fn write(&self, path: &str, buf: &[u8], offset: i64, fh: u64) -> i32 {
        trace!(path, len = buf.len(), offset, fh, "write");
        let Some((file, guard)) = self.fds.get_for_write(fh) else {
            return -libc::EINVAL;
        };
        let Ok(offset) = u64::try_from(offset) else {
            return -libc::EINVAL;
        };

        if let Some(positioned) = file.as_write_at() {
            drop(guard);
            return match positioned.write_at(buf, offset) {
                Ok(n) => count(n),
                Err(e) => errno(&e),
            };
        }

        // Seek and write are separate calls; the guard keeps them together.
        let result = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write(buf));
        drop(guard);
        match result {
            Ok(n) => count(n),
            Err(e) => errno(&e),
        }
    }

    fn flush(&self, path: &str, fh: u64) -> i32 {
        trace!(path, fh, "flush");
        -libc::ENOSYS
    }

    fn release(&self, path: &str, fh: u64) -> i32 {
        trace!(path, fh, "release");
        match self.fds.remove(fh) {
            Some(file) => status(file.close()),
            None => -libc::EINVAL,
        }
    }

    fn fsync(&self, path: &str, datasync: bool, fh: u64) -> i32 {
        trace!(path, datasync, fh, "fsync");
        -libc::ENOSYS
    }

    fn opendir(&self, path: &str) -> (i32, u64) {
        trace!(path, "opendir");
        (0, self.fds.allocate_token())
    }

    // Entries are listed afresh on every call; the handle carries no state.
    fn readdir(&self, path: &str, fill: &mut FillDir<'_>, offset: i64, fh: u64) -> i32 {
        trace!(path, offset, fh, "readdir");
        let Some(dir) = self.underlying.as_dir() else {
            return -libc::ENOSYS;
        };
        let entries = match dir.read_dir(Path::new(path)) {
            Ok(entries) => entries,
            Err(e) => return errno(&e),
        };
        let mut stat = Stat::default();
        for entry in &entries {
            fill_stat(entry, &mut stat);
            if !fill(&entry.name, Some(&stat), 0) {
                break;
            }
        }
        0
    }

    fn releasedir(&self, path: &str, fh: u64) -> i32 {
        trace!(path, fh, "releasedir");
        0
    }

    fn fsyncdir(&self, path: &str, datasync: bool, fh: u64) -> i32 {
        trace!(path, datasync, fh, "fsyncdir");
        -libc::ENOSYS
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> i32 {
        trace!(path, name, len = value.len(), flags, "setxattr");
        -libc::ENOSYS
    }

    fn getxattr(&self, path: &str, name: &str) -> (i32, Vec<u8>) {
        trace!(path, name, "getxattr");
        (-libc::ENOSYS, Vec::new())
    }

    fn removexattr(&self, path: &str, name: &str) -> i32 {
        trace!(path, name, "removexattr");
        -libc::ENOSYS
    }

    fn listxattr(&self, path: &str, _fill: &mut FillXattr<'_>) -> i32 {
        trace!(path, "listxattr");
        -libc::ENOSYS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::memory::MemoryFs;
    use crate::vfs::passthrough::PassthroughFs;
    use crate::vfs::{BoxedFile, File, Metadata, VfsError, WriteAt, S_IFDIR};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant, UNIX_EPOCH};

    /// Exposes only the base contract of a memory filesystem.
    struct BasicFs(MemoryFs);

    impl Filesystem for BasicFs {
        fn open_file(&self, path: &Path, flags: i32, mode: u32) -> VfsResult<BoxedFile> {
            self.0.open_file(path, flags, mode)
        }

        fn stat(&self, path: &Path) -> VfsResult<Metadata> {
            self.0.stat(path)
        }

        fn remove(&self, path: &Path) -> VfsResult<()> {
            self.0.remove(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
            self.0.rename(from, to)
        }
    }

    /// Counts writes that are in flight at the same time.
    #[derive(Default)]
    struct InFlight {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl InFlight {
        fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        fn max(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    /// Memory filesystem whose files can hide positioned writes, fail on
    /// close, end reads with an error, and report write concurrency.
    struct StubFs {
        inner: MemoryFs,
        positioned: bool,
        fail_close: bool,
        eof_reads: bool,
        in_flight_writes: Arc<InFlight>,
    }

    impl StubFs {
        fn new(positioned: bool) -> Self {
            Self {
                inner: MemoryFs::new(),
                positioned,
                fail_close: false,
                eof_reads: false,
                in_flight_writes: Arc::new(InFlight::default()),
            }
        }
    }

    impl Filesystem for StubFs {
        fn open_file(&self, path: &Path, flags: i32, mode: u32) -> VfsResult<BoxedFile> {
            let inner = self.inner.open_file(path, flags, mode)?;
            Ok(Arc::new(StubFile {
                inner,
                positioned: self.positioned,
                fail_close: self.fail_close,
                eof_reads: self.eof_reads,
                in_flight_writes: self.in_flight_writes.clone(),
            }))
        }

        fn stat(&self, path: &Path) -> VfsResult<Metadata> {
            self.inner.stat(path)
        }

        fn remove(&self, path: &Path) -> VfsResult<()> {
            self.inner.remove(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
            self.inner.rename(from, to)
        }
    }

    struct StubFile {
        inner: BoxedFile,
        positioned: bool,
        fail_close: bool,
        eof_reads: bool,
        in_flight_writes: Arc<InFlight>,
    }

    impl File for StubFile {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
            self.inner.read(buf)
        }

        fn read_at(&self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
            if self.eof_reads {
                return Err(VfsError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            self.inner.read_at(buf, offset)
        }

        fn write(&self, buf: &[u8]) -> VfsResult<usize> {
            self.in_flight_writes.enter();
            thread::sleep(Duration::from_millis(10));
            let result = self.inner.write(buf);
            self.in_flight_writes.leave();
            result
        }

        fn seek(&self, pos: SeekFrom) -> VfsResult<u64> {
            self.inner.seek(pos)
        }

        fn truncate(&self, size: u64) -> VfsResult<()> {
            self.inner.truncate(size)
        }

        fn close(&self) -> VfsResult<()> {
            self.inner.close()?;
            if self.fail_close {
                return Err(VfsError::Io(std::io::Error::other("close failed")));
            }
            Ok(())
        }

        fn as_write_at(&self) -> Option<&dyn WriteAt> {
            if self.positioned {
                Some(self)
            } else {
                None
            }
        }
    }

    impl WriteAt for StubFile {
        // Waits until a second positioned write overlaps with this one.
        fn write_at(&self, buf: &[u8], offset: u64) -> VfsResult<usize> {
            self.in_flight_writes.enter();
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.in_flight_writes.max() < 2 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            let result = self.inner.as_write_at().unwrap().write_at(buf, offset);
            self.in_flight_writes.leave();
            result
        }
    }

    fn memory_wrapper() -> FuseWrapper {
        FuseWrapper::from_fs(MemoryFs::new())
    }

    #[test]
    fn test_open_missing_file() {
        let fs = memory_wrapper();
        assert_eq!(fs.open("/a", libc::O_RDONLY), (-libc::ENOENT, 0));
    }

    #[test]
    fn test_create_write_read() {
        let fs = memory_wrapper();
        let (rc, fh) = fs.create("/a", libc::O_RDWR | libc::O_CREAT, 0o644);
        assert_eq!(rc, 0);
        assert_ne!(fh, 0);

        assert_eq!(fs.write("/a", b"hello", 0, fh), 5);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read("/a", &mut buf, 0, fh), 5);
        assert_eq!(&buf, b"hello");

        let mut stat = Stat::default();
        assert_eq!(fs.getattr("/a", &mut stat, fh), 0);
        assert_eq!(stat.size, 5);
        assert_eq!(fs.release("/a", fh), 0);
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        assert_eq!(fs.write("/a", b"abc", 0, fh), 3);

        let mut buf = [0u8; 8];
        assert_eq!(fs.read("/a", &mut buf, 2, fh), 1);
        assert_eq!(fs.read("/a", &mut buf, 100, fh), 0);
    }

    #[test]
    fn test_read_end_of_stream_error_returns_zero() {
        let mut stub_fs = StubFs::new(false);
        stub_fs.eof_reads = true;
        let fs = FuseWrapper::from_fs(stub_fs);

        let (_, fh) = fs.create("/a", 0, 0o644);
        assert_eq!(fs.write("/a", b"abc", 0, fh), 3);
        let mut buf = [0u8; 4];
        assert_eq!(fs.read("/a", &mut buf, 0, fh), 0);
    }

    #[test]
    fn test_huge_offsets_and_sizes_fail_cleanly() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        assert_eq!(fs.write("/a", b"abc", 0, fh), 3);

        assert_eq!(fs.write("/a", b"x", i64::MAX, fh), -libc::EINVAL);
        assert_eq!(fs.truncate("/a", i64::MAX, fh), -libc::EINVAL);
        assert_eq!(fs.release("/a", fh), 0);
        assert_eq!(fs.truncate("/a", i64::MAX, NO_HANDLE), -libc::EINVAL);

        // The file is unchanged and still usable.
        let (_, fh) = fs.open("/a", libc::O_RDWR);
        let mut buf = [0u8; 8];
        assert_eq!(fs.read("/a", &mut buf, 0, fh), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(fs.truncate("/a", 1, fh), 0);
        assert_eq!(fs.read("/a", &mut buf, 0, fh), 1);
    }

    #[test]
    fn test_read_on_write_only_handle() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        fs.release("/a", fh);

        let (rc, fh) = fs.open("/a", libc::O_WRONLY);
        assert_eq!(rc, 0);
        let mut buf = [0u8; 4];
        assert_eq!(fs.read("/a", &mut buf, 0, fh), -libc::EPERM);
    }

    #[test]
    fn test_negative_offsets_rejected() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        let mut buf = [0u8; 4];
        assert_eq!(fs.read("/a", &mut buf, -1, fh), -libc::EINVAL);
        assert_eq!(fs.write("/a", b"x", -1, fh), -libc::EINVAL);
        assert_eq!(fs.truncate("/a", -1, fh), -libc::EINVAL);
        // The write lock was released on the error path.
        assert_eq!(fs.write("/a", b"x", 0, fh), 1);
    }

    #[test]
    fn test_create_existing_exclusive() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        fs.release("/a", fh);
        assert_eq!(
            fs.create("/a", libc::O_EXCL, 0o644),
            (-libc::EEXIST, 0)
        );
    }

    #[test]
    fn test_truncate_without_handle() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        assert_eq!(fs.write("/a", b"0123456789", 0, fh), 10);
        assert_eq!(fs.release("/a", fh), 0);

        assert_eq!(fs.truncate("/a", 0, NO_HANDLE), 0);
        let mut stat = Stat::default();
        assert_eq!(fs.getattr("/a", &mut stat, NO_HANDLE), 0);
        assert_eq!(stat.size, 0);
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn test_truncate_missing_path() {
        let fs = memory_wrapper();
        assert_eq!(fs.truncate("/missing", 0, NO_HANDLE), -libc::ENOENT);
    }

    #[test]
    fn test_truncate_with_handle() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        assert_eq!(fs.write("/a", b"0123456789", 0, fh), 10);
        assert_eq!(fs.truncate("/a", 4, fh), 0);

        let mut stat = Stat::default();
        fs.getattr("/a", &mut stat, fh);
        assert_eq!(stat.size, 4);
        assert_eq!(fs.truncate("/a", 0, fh + 100), -libc::EINVAL);
    }

    #[test]
    fn test_release_then_write() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        assert_eq!(fs.release("/a", fh), 0);
        assert_eq!(fs.write("/a", b"x", 0, fh), -libc::EINVAL);
        let mut buf = [0u8; 1];
        assert_eq!(fs.read("/a", &mut buf, 0, fh), -libc::EINVAL);
        assert_eq!(fs.release("/a", fh), -libc::EINVAL);
    }

    #[test]
    fn test_release_removes_entry_when_close_fails() {
        let mut stub_fs = StubFs::new(true);
        stub_fs.fail_close = true;
        let fs = FuseWrapper::from_fs(stub_fs);

        let (_, fh) = fs.create("/a", 0, 0o644);
        assert_eq!(fs.open_files(), 1);
        assert_eq!(fs.release("/a", fh), -libc::EIO);
        assert_eq!(fs.open_files(), 0);
        assert_eq!(fs.write("/a", b"x", 0, fh), -libc::EINVAL);
    }

    #[test]
    fn test_fallback_writes_are_serialized() {
        let fs = Arc::new(FuseWrapper::from_fs(StubFs::new(false)));
        let (_, fh) = fs.create("/a", 0, 0o644);
        let barrier = Arc::new(Barrier::new(4));

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let fs = fs.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    fs.write("/a", &[b'a' + i as u8; 4], i * 4, fh)
                })
            })
            .collect();
        for writer in writers {
            assert_eq!(writer.join().unwrap(), 4);
        }

        let mut buf = [0u8; 16];
        assert_eq!(fs.read("/a", &mut buf, 0, fh), 16);
        assert_eq!(&buf, b"aaaabbbbccccdddd");
    }

    #[test]
    fn test_fallback_max_in_flight() {
        let stub_fs = StubFs::new(false);
        let in_flight_writes = stub_fs.in_flight_writes.clone();
        let fs = Arc::new(FuseWrapper::from_fs(stub_fs));
        let (_, fh) = fs.create("/a", 0, 0o644);

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let fs = fs.clone();
                thread::spawn(move || fs.write("/a", b"xx", i * 2, fh))
            })
            .collect();
        for writer in writers {
            assert_eq!(writer.join().unwrap(), 2);
        }
        assert_eq!(in_flight_writes.max(), 1);
    }

    #[test]
    fn test_positioned_writes_run_concurrently() {
        let stub_fs = StubFs::new(true);
        let in_flight_writes = stub_fs.in_flight_writes.clone();
        let fs = Arc::new(FuseWrapper::from_fs(stub_fs));
        let (_, fh) = fs.create("/a", 0, 0o644);

        let writers: Vec<_> = (0..2)
            .map(|i| {
                let fs = fs.clone();
                thread::spawn(move || fs.write("/a", b"yy", i * 2, fh))
            })
            .collect();
        for writer in writers {
            assert_eq!(writer.join().unwrap(), 2);
        }
        assert_eq!(in_flight_writes.max(), 2);
    }

    #[test]
    fn test_held_write_lock_does_not_block_other_handles() {
        let fs = FuseWrapper::from_fs(StubFs::new(false));
        let (_, fh1) = fs.create("/a", 0, 0o644);
        let (_, fh2) = fs.create("/b", 0, 0o644);

        let (_file, guard) = fs.fds.get_for_write(fh1).unwrap();
        assert_eq!(fs.write("/b", b"fast", 0, fh2), 4);
        let mut buf = [0u8; 4];
        assert_eq!(fs.read("/a", &mut buf, 0, fh1), 0);
        drop(guard);
        assert_eq!(fs.write("/a", b"slow", 0, fh1), 4);
    }

    #[test]
    fn test_opendir_tokens_are_unique() {
        let fs = memory_wrapper();
        let (_, fh) = fs.create("/a", 0, 0o644);
        let (rc, dh1) = fs.opendir("/");
        assert_eq!(rc, 0);
        let (_, dh2) = fs.opendir("/");
        assert_ne!(dh1, fh);
        assert_ne!(dh1, dh2);
        assert_eq!(fs.releasedir("/", dh1), 0);
        // Directory handles never land in the file table.
        assert_eq!(fs.open_files(), 1);
    }

    #[test]
    fn test_readdir_fills_entries() {
        let fs = memory_wrapper();
        assert_eq!(fs.mkdir("/dir", 0o755), 0);
        assert_eq!(fs.mkdir("/dir/sub", 0o700), 0);
        let (_, fh) = fs.create("/dir/file", 0, 0o644);
        assert_eq!(fs.write("/dir/file", b"1234", 0, fh), 4);

        let mut seen = Vec::new();
        let (_, dh) = fs.opendir("/dir");
        let rc = fs.readdir(
            "/dir",
            &mut |name, stat, offset| {
                let stat = stat.unwrap();
                seen.push((name.to_string(), stat.mode & S_IFDIR != 0, stat.size, offset));
                true
            },
            0,
            dh,
        );
        assert_eq!(rc, 0);
        assert_eq!(
            seen,
            vec![
                ("file".to_string(), false, 4, 0),
                ("sub".to_string(), true, 0, 0),
            ]
        );
    }

    #[test]
    fn test_readdir_stops_when_buffer_full() {
        let fs = memory_wrapper();
        for name in ["/a", "/b", "/c"] {
            let (_, fh) = fs.create(name, 0, 0o644);
            fs.release(name, fh);
        }
        let mut calls = 0;
        let rc = fs.readdir(
            "/",
            &mut |_, _, _| {
                calls += 1;
                false
            },
            0,
            NO_HANDLE,
        );
        assert_eq!(rc, 0);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_readdir_missing_directory() {
        let fs = memory_wrapper();
        let rc = fs.readdir("/nope", &mut |_, _, _| true, 0, NO_HANDLE);
        assert_eq!(rc, -libc::ENOENT);
    }

    #[test]
    fn test_capabilities_absent() {
        let fs = FuseWrapper::from_fs(BasicFs(MemoryFs::new()));
        assert_eq!(fs.mkdir("/d", 0o755), -libc::ENOSYS);
        assert_eq!(fs.symlink("/t", "/l"), -libc::ENOSYS);
        assert_eq!(fs.readlink("/l"), (-libc::ENOSYS, String::new()));
        assert_eq!(fs.chmod("/f", 0o600), -libc::ENOSYS);
        assert_eq!(fs.chown("/f", 1, 1), -libc::ENOSYS);
        assert_eq!(fs.utimens("/f", &[]), -libc::ENOSYS);

        let mut calls = 0;
        let rc = fs.readdir(
            "/",
            &mut |_, _, _| {
                calls += 1;
                true
            },
            0,
            NO_HANDLE,
        );
        assert_eq!(rc, -libc::ENOSYS);
        assert_eq!(calls, 0);

        // The base contract still works.
        let (rc, fh) = fs.create("/f", 0, 0o644);
        assert_eq!(rc, 0);
        assert_eq!(fs.write("/f", b"ok", 0, fh), 2);
        assert_eq!(fs.release("/f", fh), 0);
        assert_eq!(fs.rename("/f", "/g"), 0);
        assert_eq!(fs.unlink("/g"), 0);
    }

    #[test]
    fn test_unimplemented_surface() {
        let fs = memory_wrapper();
        let mut statfs = Statfs::default();
        assert_eq!(fs.statfs("/", &mut statfs), -libc::ENOSYS);
        assert_eq!(fs.mknod("/n", 0o644, 0), -libc::ENOSYS);
        assert_eq!(fs.link("/a", "/b"), -libc::ENOSYS);
        assert_eq!(fs.access("/", 0), -libc::ENOSYS);
        assert_eq!(fs.flush("/", 1), -libc::ENOSYS);
        assert_eq!(fs.fsync("/", false, 1), -libc::ENOSYS);
        assert_eq!(fs.fsyncdir("/", true, 1), -libc::ENOSYS);
        assert_eq!(fs.setxattr("/", "user.x", b"v", 0), -libc::ENOSYS);
        assert_eq!(fs.getxattr("/", "user.x"), (-libc::ENOSYS, Vec::new()));
        assert_eq!(fs.removexattr("/", "user.x"), -libc::ENOSYS);
        assert_eq!(fs.listxattr("/", &mut |_| true), -libc::ENOSYS);
    }

    #[test]
    fn test_mkdir_unlink_rmdir_rename() {
        let fs = memory_wrapper();
        assert_eq!(fs.mkdir("/a/b", 0o755), 0);
        let (_, fh) = fs.create("/a/b/f", 0, 0o644);
        fs.release("/a/b/f", fh);

        assert_eq!(fs.rmdir("/a/b"), -libc::EIO);
        assert_eq!(fs.rename("/a/b/f", "/a/g"), 0);
        assert_eq!(fs.rmdir("/a/b"), 0);
        assert_eq!(fs.unlink("/a/g"), 0);
        assert_eq!(fs.unlink("/a/g"), -libc::ENOENT);

        let mut stat = Stat::default();
        assert_eq!(fs.getattr("/a", &mut stat, NO_HANDLE), 0);
        assert_eq!(stat.mode & S_IFDIR, S_IFDIR);
    }

    #[test]
    fn test_symlink_and_readlink() {
        let fs = memory_wrapper();
        assert_eq!(fs.symlink("target", "/link"), 0);
        assert_eq!(fs.readlink("/link"), (0, "target".to_string()));
        assert_eq!(fs.symlink("other", "/link"), -libc::EEXIST);
        assert_eq!(fs.readlink("/missing"), (-libc::ENOENT, String::new()));
    }

    #[test]
    fn test_chmod_chown_utimens() {
        let memory = Arc::new(MemoryFs::new());
        let fs = FuseWrapper::new(memory.clone());
        let (_, fh) = fs.create("/f", 0, 0o644);
        fs.release("/f", fh);

        assert_eq!(fs.chmod("/f", 0o600), 0);
        assert_eq!(fs.chown("/f", 1000, 1000), 0);
        assert_eq!(memory.owner(Path::new("/f")).unwrap(), (1000, 1000));

        let mtime = Timespec { sec: 1_000, nsec: 0 };
        assert_eq!(fs.utimens("/f", &[Timespec::default(), mtime]), 0);
        assert_eq!(fs.utimens("/f", &[mtime]), -libc::EINVAL);

        let mut stat = Stat::default();
        fs.getattr("/f", &mut stat, NO_HANDLE);
        assert_eq!(stat.mode & 0o7777, 0o600);
        assert_eq!(stat.mtim, mtime);
        assert_eq!(
            memory.stat(Path::new("/f")).unwrap().modified,
            UNIX_EPOCH + Duration::from_secs(1_000)
        );

        assert_eq!(fs.chmod("/missing", 0o600), -libc::ENOENT);
    }

    #[test]
    fn test_passthrough_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FuseWrapper::from_fs(PassthroughFs::new(dir.path().to_path_buf()));

        assert_eq!(fs.open("/missing", libc::O_RDONLY), (-libc::ENOENT, 0));
        let (rc, fh) = fs.create("/a.txt", libc::O_TRUNC, 0o644);
        assert_eq!(rc, 0);
        assert_eq!(fs.write("/a.txt", b"hello", 0, fh), 5);
        assert_eq!(fs.release("/a.txt", fh), 0);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"hello");

        assert_eq!(fs.truncate("/a.txt", 2, NO_HANDLE), 0);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"he");

        assert_eq!(fs.mkdir("/sub", 0o755), 0);
        assert_eq!(fs.mkdir("/sub", 0o755), 0);
        let mut names = Vec::new();
        fs.readdir(
            "/",
            &mut |name, _, _| {
                names.push(name.to_string());
                true
            },
            0,
            NO_HANDLE,
        );
        assert_eq!(names, vec!["a.txt", "sub"]);

        assert_eq!(fs.getattr("/../etc", &mut Stat::default(), NO_HANDLE), -libc::EPERM);
    }
}
