use crate::vfs::BoxedFile;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::collections::HashMap;
use std::sync::Arc;

/// Held while a write to a handle is in progress; dropping it releases the
/// handle's write lock.
pub type WriteGuard = ArcMutexGuard<RawMutex, ()>;

/// An open file and the lock serializing writes to it.
struct FdEntry {
    file: BoxedFile,
    write_lock: Arc<Mutex<()>>,
}

/// Inner state of the FD table, protected by a single mutex
struct FdTableInner {
    entries: HashMap<u64, FdEntry>,
    /// Last handle handed out (monotonically increasing)
    last_fd: u64,
}

/// Table of open files keyed by driver-visible handles
///
/// Handles are never reused within the lifetime of a table and `0` is never
/// issued, so it can be used to signal failure. The table lock only guards
/// the map itself and is never held across file I/O.
pub struct FdTable {
    inner: Mutex<FdTableInner>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FdTableInner {
                entries: HashMap::new(),
                last_fd: 0,
            }),
        }
    }

    /// Register an open file and return its handle
    pub fn allocate(&self, file: BoxedFile) -> u64 {
        let mut inner = self.inner.lock();
        inner.last_fd += 1;
        let fd = inner.last_fd;
        inner.entries.insert(
            fd,
            FdEntry {
                file,
                write_lock: Arc::new(Mutex::new(())),
            },
        );
        fd
    }

    /// Issue a fresh handle without registering anything under it
    ///
    /// Used for directory handles, which have no backing file.
    pub fn allocate_token(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.last_fd += 1;
        inner.last_fd
    }

    pub fn get(&self, fd: u64) -> Option<BoxedFile> {
        self.inner.lock().entries.get(&fd).map(|e| e.file.clone())
    }

    /// Get a file together with its write lock, held
    ///
    /// Blocks while another writer holds the lock. The table lock is released
    /// before waiting, so other handles are unaffected.
    pub fn get_for_write(&self, fd: u64) -> Option<(BoxedFile, WriteGuard)> {
        let (file, write_lock) = {
            let inner = self.inner.lock();
            let entry = inner.entries.get(&fd)?;
            (entry.file.clone(), entry.write_lock.clone())
        };
        Some((file, write_lock.lock_arc()))
    }

    /// Remove a handle, returning its file for closing
    ///
    /// A writer still holding the handle's write lock keeps it alive until it
    /// finishes.
    pub fn remove(&self, fd: u64) -> Option<BoxedFile> {
        self.inner.lock().entries.remove(&fd).map(|e| e.file)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FdTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FdTable")
            .field("entry_count", &inner.entries.len())
            .field("last_fd", &inner.last_fd)
            .finish()
    }
}
