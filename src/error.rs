//! Error kinds surfaced by the filesystem core.
//!
//! spec.md §7 describes these informally ("surface as boolean failure or
//! -1-return"); this gives them a concrete shape so callers can match on
//! *why* an operation failed instead of just that it did.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The free-map has no sectors left to hand out.
    #[error("out of space: the free-map has no sectors left")]
    OutOfSpace,
    /// A path component doesn't exist, or a non-final component isn't a directory.
    #[error("bad path: a component is missing or passes through a non-directory")]
    BadPath,
    /// `create`/`mkdir` targeted a name that already exists in the parent directory.
    #[error("a file or directory with that name already exists")]
    NameExists,
    /// An operation that requires a directory was given a regular file.
    #[error("expected a directory")]
    NotDirectory,
    /// `remove` was called on a directory that still has entries besides `.`/`..`.
    #[error("directory is not empty")]
    DirectoryNotEmpty,
    /// The requested offset exceeds what direct/indirect/double-indirect pointers can address.
    #[error("offset exceeds the maximum representable file length")]
    FileLengthLimit,
    /// The inode currently has outstanding `deny_write` callers.
    #[error("writes are currently denied on this inode")]
    DeniedWrite,
}

pub type FsResult<T> = Result<T, FsError>;
