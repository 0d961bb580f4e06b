//! Crate-wide constants.
//!
//! Mirrors the role of rv6's `param.rs`: every magic number the rest of the
//! crate needs shows up here once, named.

/// Size of a disk sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Number of slots in the buffer cache.
pub const NUM_SLOTS: usize = 64;

/// Reserved sector number meaning "no block here".
pub const NO_SECTOR: u32 = 0xFFFF_FFFF;

/// Sector holding the root directory's inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Number of direct block pointers stored in an inode.
pub const DIRECT_COUNT: usize = 123;

/// Number of sector-number entries in one indirect block.
pub const PTRS_PER_SECTOR: usize = SECTOR_SIZE / core::mem::size_of::<u32>();

/// First byte-sector-number covered by the single-indirect range.
pub const INDIRECT_BASE: u64 = DIRECT_COUNT as u64;

/// First byte-sector-number covered by the double-indirect range.
pub const DOUBLE_BASE: u64 = INDIRECT_BASE + PTRS_PER_SECTOR as u64;

/// One past the last sector index a double-indirect inode can address.
pub const MAX_SECTOR_INDEX: u64 = DOUBLE_BASE + (PTRS_PER_SECTOR * PTRS_PER_SECTOR) as u64;

/// Maximum representable file length in bytes.
pub const MAX_FILE_LENGTH: u64 = MAX_SECTOR_INDEX * SECTOR_SIZE as u64;

/// Magic value stamped into every on-disk inode for integrity checking.
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// Maximum length of a path, including the terminator the C ancestor used.
pub const MAX_PATH: usize = 257;

/// Maximum length of a single path component (directory entry name).
pub const NAME_MAX: usize = 27;
