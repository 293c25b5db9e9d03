pub mod fuse;
pub mod vfs;

pub use fuse::{FileSystemInterface, FuseWrapper, Stat, Timespec, NO_HANDLE};
pub use vfs::{
    memory::MemoryFs, passthrough::PassthroughFs, Change, Dir, Filesystem, Metadata, Symlink,
    VfsError, VfsResult,
};
