use super::{Stat, Timespec};
use crate::vfs::{Metadata, S_IFDIR};

/// Fill `out` from VFS metadata.
///
/// Only size, modification time and mode are known to the VFS; every other
/// field is reset to zero.
pub fn fill_stat(meta: &Metadata, out: &mut Stat) {
    *out = Stat {
        size: meta.size as i64,
        mtim: Timespec::new(meta.modified),
        mode: meta.mode,
        ..Stat::default()
    };
    if meta.is_dir {
        out.mode |= S_IFDIR;
    }
}
