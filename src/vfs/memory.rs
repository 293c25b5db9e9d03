//! In-memory filesystem.
//!
//! Used for testing and scratch mounts. All data is lost when dropped.

use super::file::{BoxedFile, File, WriteAt};
use super::{
    Change, Dir, Filesystem, Metadata, Symlink, VfsError, VfsResult, S_IFDIR, S_IFLNK, S_IFMT,
    S_IFREG,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

const MAX_SYMLINK_HOPS: usize = 40;

/// A node in the memory filesystem, shared with the files opened on it.
#[derive(Debug)]
struct Inode {
    mode: u32,
    uid: u32,
    gid: u32,
    modified: SystemTime,
    data: Vec<u8>,
    target: Option<PathBuf>,
}

impl Inode {
    fn file(perm: u32) -> Self {
        Self::new(S_IFREG | (perm & 0o7777), None)
    }

    fn directory(perm: u32) -> Self {
        Self::new(S_IFDIR | (perm & 0o7777), None)
    }

    fn symlink(target: PathBuf) -> Self {
        Self::new(S_IFLNK | 0o777, Some(target))
    }

    fn new(mode: u32, target: Option<PathBuf>) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            modified: SystemTime::now(),
            data: Vec::new(),
            target,
        }
    }

    fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    fn size(&self) -> u64 {
        match &self.target {
            Some(target) => target.as_os_str().len() as u64,
            None => self.data.len() as u64,
        }
    }
}

type InodeRef = Arc<RwLock<Inode>>;

/// In-memory filesystem implementing every optional capability.
///
/// Paths are normalized to be relative to the root, which is the empty path.
#[derive(Debug)]
pub struct MemoryFs {
    nodes: RwLock<HashMap<PathBuf, InodeRef>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(PathBuf::new(), Arc::new(RwLock::new(Inode::directory(0o755))));
        debug!("created memory filesystem");
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Owner and group recorded for a path by `chown`.
    pub fn owner(&self, path: &Path) -> VfsResult<(u32, u32)> {
        let node = self.lookup(&normalize(path))?;
        let inode = node.read();
        Ok((inode.uid, inode.gid))
    }

    fn lookup(&self, path: &Path) -> VfsResult<InodeRef> {
        self.nodes
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| VfsError::not_found(path))
    }

    fn check_parent(nodes: &HashMap<PathBuf, InodeRef>, path: &Path) -> VfsResult<()> {
        let parent = path.parent().ok_or_else(|| VfsError::invalid_input("root has no parent"))?;
        match nodes.get(parent) {
            Some(node) if node.read().is_dir() => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(parent)),
            None => Err(VfsError::not_found(parent)),
        }
    }

    /// Follow symbolic links until a non-link path is reached.
    fn resolve(nodes: &HashMap<PathBuf, InodeRef>, path: PathBuf) -> VfsResult<PathBuf> {
        let mut current = path;
        for _ in 0..MAX_SYMLINK_HOPS {
            let target = match nodes.get(&current) {
                Some(node) => node.read().target.clone(),
                None => return Ok(current),
            };
            match target {
                Some(target) => {
                    let base = current.parent().map(Path::to_path_buf).unwrap_or_default();
                    current = normalize(&base.join(target));
                }
                None => return Ok(current),
            }
        }
        Err(VfsError::other("too many levels of symbolic links"))
    }

    fn has_children(nodes: &HashMap<PathBuf, InodeRef>, path: &Path) -> bool {
        nodes
            .keys()
            .any(|p| p.as_path() != path && p.parent() == Some(path))
    }
}

/// Normalize a path: drop the root, resolve `.` and `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(s) => result.push(s),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    result
}

fn metadata(path: &Path, inode: &Inode) -> Metadata {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string());
    Metadata {
        name,
        size: inode.size(),
        modified: inode.modified,
        mode: inode.mode,
        is_dir: inode.is_dir(),
    }
}

impl Filesystem for MemoryFs {
    fn open_file(&self, path: &Path, flags: i32, mode: u32) -> VfsResult<BoxedFile> {
        let mut nodes = self.nodes.write();
        let path = Self::resolve(&nodes, normalize(path))?;

        let accmode = flags & libc::O_ACCMODE;
        let readable = accmode == libc::O_RDONLY || accmode == libc::O_RDWR;
        let writable = accmode == libc::O_WRONLY || accmode == libc::O_RDWR;

        let node = match nodes.get(&path) {
            Some(node) => {
                if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 {
                    return Err(VfsError::already_exists(&path));
                }
                if node.read().is_dir() {
                    return Err(VfsError::is_a_directory(&path));
                }
                if writable && flags & libc::O_TRUNC != 0 {
                    let mut inode = node.write();
                    inode.data.clear();
                    inode.modified = SystemTime::now();
                }
                node.clone()
            }
            None if flags & libc::O_CREAT != 0 => {
                Self::check_parent(&nodes, &path)?;
                let node = Arc::new(RwLock::new(Inode::file(mode)));
                nodes.insert(path.clone(), node.clone());
                node
            }
            None => return Err(VfsError::not_found(&path)),
        };

        Ok(Arc::new(MemoryFile {
            name: path.display().to_string(),
            node,
            pos: Mutex::new(0),
            readable,
            writable,
            append: flags & libc::O_APPEND != 0,
            closed: AtomicBool::new(false),
        }))
    }

    fn stat(&self, path: &Path) -> VfsResult<Metadata> {
        let path = normalize(path);
        let node = self.lookup(&path)?;
        let inode = node.read();
        Ok(metadata(&path, &inode))
    }

    fn remove(&self, path: &Path) -> VfsResult<()> {
        let path = normalize(path);
        if path.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("/"));
        }
        let mut nodes = self.nodes.write();
        let is_dir = match nodes.get(&path) {
            Some(node) => node.read().is_dir(),
            None => return Err(VfsError::not_found(&path)),
        };
        if is_dir && Self::has_children(&nodes, &path) {
            return Err(VfsError::directory_not_empty(&path));
        }
        nodes.remove(&path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let from = normalize(from);
        let to = normalize(to);
        if from.as_os_str().is_empty() || (to.starts_with(&from) && to != from) {
            return Err(VfsError::invalid_input(format!(
                "cannot move {} into {}",
                from.display(),
                to.display()
            )));
        }
        if from == to {
            return Ok(());
        }

        let mut nodes = self.nodes.write();
        let source_is_dir = match nodes.get(&from) {
            Some(node) => node.read().is_dir(),
            None => return Err(VfsError::not_found(&from)),
        };
        Self::check_parent(&nodes, &to)?;
        if let Some(existing) = nodes.get(&to) {
            let existing_is_dir = existing.read().is_dir();
            if existing_is_dir && !source_is_dir {
                return Err(VfsError::is_a_directory(&to));
            }
            if !existing_is_dir && source_is_dir {
                return Err(VfsError::not_a_directory(&to));
            }
            if existing_is_dir && Self::has_children(&nodes, &to) {
                return Err(VfsError::directory_not_empty(&to));
            }
        }

        let moved: Vec<PathBuf> = nodes
            .keys()
            .filter(|p| p.starts_with(&from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                let suffix = old.strip_prefix(&from).unwrap_or(Path::new(""));
                let new = if suffix.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(suffix)
                };
                nodes.insert(new, node);
            }
        }
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

impl Dir for MemoryFs {
    fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let path = normalize(path);
        let mut nodes = self.nodes.write();
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            match nodes.get(&current) {
                Some(node) if node.read().is_dir() => {}
                Some(_) => return Err(VfsError::not_a_directory(&current)),
                None => {
                    nodes.insert(current.clone(), Arc::new(RwLock::new(Inode::directory(mode))));
                }
            }
        }
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> VfsResult<Vec<Metadata>> {
        let path = normalize(path);
        let nodes = self.nodes.read();
        match nodes.get(&path) {
            Some(node) if node.read().is_dir() => {}
            Some(_) => return Err(VfsError::not_a_directory(&path)),
            None => return Err(VfsError::not_found(&path)),
        }

        let mut entries: Vec<Metadata> = nodes
            .iter()
            .filter(|(p, _)| p.as_path() != path && p.parent() == Some(path.as_path()))
            .map(|(p, node)| metadata(p, &node.read()))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl Symlink for MemoryFs {
    fn symlink(&self, target: &Path, link: &Path) -> VfsResult<()> {
        let link = normalize(link);
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&link) {
            return Err(VfsError::already_exists(&link));
        }
        Self::check_parent(&nodes, &link)?;
        nodes.insert(
            link,
            Arc::new(RwLock::new(Inode::symlink(target.to_path_buf()))),
        );
        Ok(())
    }

    fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let path = normalize(path);
        let node = self.lookup(&path)?;
        let inode = node.read();
        inode
            .target
            .clone()
            .ok_or_else(|| VfsError::invalid_input(format!("not a symlink: {}", path.display())))
    }
}

impl Change for MemoryFs {
    fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let node = self.lookup(&normalize(path))?;
        let mut inode = node.write();
        if inode.is_symlink() {
            return Ok(());
        }
        inode.mode = (inode.mode & S_IFMT) | (mode & 0o7777);
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> VfsResult<()> {
        let node = self.lookup(&normalize(path))?;
        let mut inode = node.write();
        inode.uid = uid;
        inode.gid = gid;
        Ok(())
    }

    fn chtimes(&self, path: &Path, _atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let node = self.lookup(&normalize(path))?;
        node.write().modified = mtime;
        Ok(())
    }
}

/// A file opened on a [`MemoryFs`].
///
/// Shares its node with the filesystem, so writes are visible through every
/// other handle and through `stat`.
pub struct MemoryFile {
    name: String,
    node: InodeRef,
    pos: Mutex<u64>,
    readable: bool,
    writable: bool,
    append: bool,
    closed: AtomicBool,
}

impl MemoryFile {
    fn check_open(&self) -> VfsResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(VfsError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_readable(&self) -> VfsResult<()> {
        self.check_open()?;
        if !self.readable {
            return Err(VfsError::permission_denied(&self.name));
        }
        Ok(())
    }

    fn check_writable(&self) -> VfsResult<()> {
        self.check_open()?;
        if !self.writable {
            return Err(VfsError::permission_denied(&self.name));
        }
        Ok(())
    }

    fn copy_out(&self, buf: &mut [u8], offset: u64) -> usize {
        let inode = self.node.read();
        let len = inode.data.len() as u64;
        if offset >= len {
            return 0;
        }
        let start = offset as usize;
        let n = buf.len().min(inode.data.len() - start);
        buf[..n].copy_from_slice(&inode.data[start..start + n]);
        n
    }

    fn copy_in(&self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| VfsError::invalid_input("offset out of range"))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| VfsError::invalid_input("offset out of range"))?;
        let mut inode = self.node.write();
        grow(&mut inode.data, end)?;
        inode.data[start..end].copy_from_slice(buf);
        inode.modified = SystemTime::now();
        Ok(buf.len())
    }
}

/// Extend `data` with zeros up to `len` bytes, failing instead of aborting
/// when the allocation cannot be made.
fn grow(data: &mut Vec<u8>, len: usize) -> VfsResult<()> {
    if data.len() < len {
        data.try_reserve(len - data.len())
            .map_err(|_| VfsError::invalid_input("file too large"))?;
        data.resize(len, 0);
    }
    Ok(())
}

impl File for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        self.check_readable()?;
        let mut pos = self.pos.lock();
        let n = self.copy_out(buf, *pos);
        *pos += n as u64;
        Ok(n)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.check_readable()?;
        Ok(self.copy_out(buf, offset))
    }

    fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        self.check_writable()?;
        let mut pos = self.pos.lock();
        if self.append {
            *pos = self.node.read().data.len() as u64;
        }
        let n = self.copy_in(buf, *pos)?;
        *pos += n as u64;
        Ok(n)
    }

    fn seek(&self, pos: SeekFrom) -> VfsResult<u64> {
        self.check_open()?;
        let mut current = self.pos.lock();
        let next = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
            SeekFrom::End(delta) => (self.node.read().data.len() as u64).checked_add_signed(delta),
        };
        let next = next.ok_or_else(|| VfsError::invalid_input("seek before start of file"))?;
        *current = next;
        Ok(next)
    }

    fn truncate(&self, size: u64) -> VfsResult<()> {
        self.check_writable()?;
        let size = usize::try_from(size).map_err(|_| VfsError::invalid_input("size out of range"))?;
        let mut inode = self.node.write();
        grow(&mut inode.data, size)?;
        inode.data.truncate(size);
        inode.modified = SystemTime::now();
        Ok(())
    }

    fn close(&self) -> VfsResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(VfsError::Closed);
        }
        Ok(())
    }

    fn as_write_at(&self) -> Option<&dyn WriteAt> {
        Some(self)
    }
}

impl WriteAt for MemoryFile {
    fn write_at(&self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.check_writable()?;
        self.copy_in(buf, offset)
    }
}
