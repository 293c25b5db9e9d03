//! Translation of VFS errors into driver error codes.

use crate::vfs::{VfsError, VfsResult};
use std::io::ErrorKind;

/// Map a VFS error to a negated errno.
pub fn errno(err: &VfsError) -> i32 {
    if is_exist(err) {
        -libc::EEXIST
    } else if is_not_exist(err) {
        -libc::ENOENT
    } else if is_permission(err) {
        -libc::EPERM
    } else if is_invalid(err) {
        -libc::EINVAL
    } else {
        -libc::EIO
    }
}

/// Map a unit result to `0` or a negated errno.
pub fn status(result: VfsResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => errno(&e),
    }
}

fn io_kind(err: &VfsError) -> Option<ErrorKind> {
    match err {
        VfsError::Io(e) => Some(e.kind()),
        _ => None,
    }
}

fn is_exist(err: &VfsError) -> bool {
    matches!(err, VfsError::AlreadyExists(_)) || io_kind(err) == Some(ErrorKind::AlreadyExists)
}

fn is_not_exist(err: &VfsError) -> bool {
    matches!(err, VfsError::NotFound(_)) || io_kind(err) == Some(ErrorKind::NotFound)
}

fn is_permission(err: &VfsError) -> bool {
    matches!(err, VfsError::PermissionDenied(_))
        || io_kind(err) == Some(ErrorKind::PermissionDenied)
}

fn is_invalid(err: &VfsError) -> bool {
    matches!(err, VfsError::InvalidInput(_) | VfsError::Closed)
        || io_kind(err) == Some(ErrorKind::InvalidInput)
}
