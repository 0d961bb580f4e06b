//! A Pintos-style hierarchical filesystem core: a write-back buffer
//! cache over a fixed-size block device, and an inode storage engine
//! built on top of it with direct, indirect, and double-indirect
//! sector pointers.
//!
//! Path resolution and directory maintenance sit above both, but the
//! free-map and the block device itself are external collaborators —
//! this crate only calls through the [`freemap::FreeMap`] and
//! [`device::BlockDevice`] traits.

pub mod bio;
pub mod device;
pub mod error;
pub mod freemap;
pub mod fs;
pub mod param;

pub use bio::Cache;
pub use device::{BlockDevice, MemDevice};
pub use error::{FsError, FsResult};
pub use freemap::{BitmapFreeMap, FreeMap};
pub use fs::dir::{DirEntry, DirOps};
pub use fs::inode::{InodeEngine, OpenInode};
pub use fs::path::Cwd;
pub use fs::{Filesystem, OpenFile};
