//! This module stores the errno utilities.
//!
//! Every fallible operation of the crate returns an [`EResult`]. The error
//! values are positive errno codes; a host VFS is expected to negate them at
//! its own boundary.

/// Type representing a Unix errno.
pub type Errno = i32;

/// Result of a filesystem operation.
pub type EResult<T> = Result<T, Errno>;

/// Operation not permitted.
pub const EPERM: Errno = 1;
/// No such file or directory.
pub const ENOENT: Errno = 2;
/// I/O error.
pub const EIO: Errno = 5;
/// Not enough memory.
pub const ENOMEM: Errno = 12;
/// Bad address.
pub const EFAULT: Errno = 14;
/// File exists.
pub const EEXIST: Errno = 17;
/// Not a directory.
pub const ENOTDIR: Errno = 20;
/// Is a directory.
pub const EISDIR: Errno = 21;
/// Invalid argument.
pub const EINVAL: Errno = 22;
/// No space left on device.
pub const ENOSPC: Errno = 28;
/// Filename too long.
pub const ENAMETOOLONG: Errno = 36;
/// Value too large to be stored in data type.
pub const EOVERFLOW: Errno = 75;
