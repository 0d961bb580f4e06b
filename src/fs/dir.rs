//! Directory maintenance.
//!
//! A directory is an ordinary file whose bytes are an array of
//! fixed-size entries: a sector number plus a name, 32 bytes each so
//! that sixteen fit in one sector. Deleted entries are marked by a
//! sentinel sector number rather than compacted away, matching the
//! direct-slot reuse the inode layer already relies on elsewhere.

use std::sync::Arc;

use zerocopy::{AsBytes, FromBytes};

use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::fs::inode::{InodeEngine, OpenInode};
use crate::param::{NAME_MAX, NO_SECTOR};

const NAME_FIELD: usize = NAME_MAX + 1;

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct RawEntry {
    sector: u32,
    name: [u8; NAME_FIELD],
}

pub const ENTRY_SIZE: usize = core::mem::size_of::<RawEntry>();

fn encode_name(name: &str) -> FsResult<[u8; NAME_FIELD]> {
    if name.is_empty() || name.len() > NAME_MAX || name.contains('/') {
        return Err(FsError::BadPath);
    }
    let mut buf = [0u8; NAME_FIELD];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    Ok(buf)
}

fn decode_name(buf: &[u8; NAME_FIELD]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    core::str::from_utf8(&buf[..end]).unwrap_or("")
}

/// One resolved directory entry, handed back to callers outside this module.
pub struct DirEntry {
    pub name: String,
    pub sector: u32,
}

/// Directory reads and writes, layered directly on [`InodeEngine`]'s
/// `read_at`/`write_at` — a directory carries no structure the inode
/// layer doesn't already provide, only the fixed-size record format
/// above it.
pub struct DirOps<'a, D: BlockDevice, F: FreeMap> {
    pub inodes: &'a InodeEngine<D, F>,
}

impl<'a, D: BlockDevice, F: FreeMap> DirOps<'a, D, F> {
    pub fn new(inodes: &'a InodeEngine<D, F>) -> Self {
        Self { inodes }
    }

    fn entry_at(&self, dir: &Arc<OpenInode>, pos: u64) -> FsResult<Option<RawEntry>> {
        let mut buf = [0u8; ENTRY_SIZE];
        let n = self.inodes.read_at(dir, &mut buf, pos)?;
        if n < ENTRY_SIZE {
            return Ok(None);
        }
        Ok(RawEntry::read_from(&buf[..]))
    }

    /// Looks up `name` in `dir`, returning its sector if present.
    pub fn lookup(&self, dir: &Arc<OpenInode>, name: &str) -> FsResult<Option<u32>> {
        let length = self.inodes.length(dir);
        let mut pos = 0u64;
        while pos < length {
            if let Some(entry) = self.entry_at(dir, pos)? {
                if entry.sector != NO_SECTOR && decode_name(&entry.name) == name {
                    return Ok(Some(entry.sector));
                }
            }
            pos += ENTRY_SIZE as u64;
        }
        Ok(None)
    }

    /// Adds `name -> sector` to `dir`, reusing a freed slot if one
    /// exists, appending otherwise. Fails if `name` is already present.
    pub fn add_entry(&self, dir: &Arc<OpenInode>, name: &str, sector: u32) -> FsResult<()> {
        if self.lookup(dir, name)?.is_some() {
            return Err(FsError::NameExists);
        }
        let encoded = encode_name(name)?;
        let record = RawEntry {
            sector,
            name: encoded,
        };

        let length = self.inodes.length(dir);
        let mut pos = 0u64;
        while pos < length {
            let mut buf = [0u8; ENTRY_SIZE];
            let n = self.inodes.read_at(dir, &mut buf, pos)?;
            let free = n < ENTRY_SIZE
                || RawEntry::read_from(&buf[..])
                    .map(|e| e.sector == NO_SECTOR)
                    .unwrap_or(true);
            if free {
                self.inodes.write_at(dir, record.as_bytes(), pos)?;
                return Ok(());
            }
            pos += ENTRY_SIZE as u64;
        }
        self.inodes.write_at(dir, record.as_bytes(), length)?;
        Ok(())
    }

    /// Removes the entry named `name` by overwriting it with a
    /// tombstone. Does not compact later entries.
    pub fn remove_entry(&self, dir: &Arc<OpenInode>, name: &str) -> FsResult<()> {
        let length = self.inodes.length(dir);
        let mut pos = 0u64;
        while pos < length {
            if let Some(entry) = self.entry_at(dir, pos)? {
                if entry.sector != NO_SECTOR && decode_name(&entry.name) == name {
                    let tombstone = RawEntry {
                        sector: NO_SECTOR,
                        name: [0u8; NAME_FIELD],
                    };
                    self.inodes.write_at(dir, tombstone.as_bytes(), pos)?;
                    return Ok(());
                }
            }
            pos += ENTRY_SIZE as u64;
        }
        Err(FsError::BadPath)
    }

    /// Lists every live entry in `dir`, skipping `.` and `..`.
    pub fn readdir(&self, dir: &Arc<OpenInode>) -> FsResult<Vec<DirEntry>> {
        let length = self.inodes.length(dir);
        let mut out = Vec::new();
        let mut pos = 0u64;
        while pos < length {
            if let Some(entry) = self.entry_at(dir, pos)? {
                if entry.sector != NO_SECTOR {
                    let name = decode_name(&entry.name);
                    if name != "." && name != ".." {
                        out.push(DirEntry {
                            name: name.to_string(),
                            sector: entry.sector,
                        });
                    }
                }
            }
            pos += ENTRY_SIZE as u64;
        }
        Ok(out)
    }

    /// True if `dir` has no entries besides `.` and `..`.
    pub fn is_empty(&self, dir: &Arc<OpenInode>) -> FsResult<bool> {
        Ok(self.readdir(dir)?.is_empty())
    }

    /// Seeds a freshly created directory's `.` and `..` entries. Per
    /// spec.md §4.8/§3, every directory other than the root carries
    /// both, and the root's `..` points back at itself.
    pub fn seed(
        &self,
        dir: &Arc<OpenInode>,
        self_sector: u32,
        parent_sector: u32,
    ) -> FsResult<()> {
        self.add_entry(dir, ".", self_sector)?;
        self.add_entry(dir, "..", parent_sector)?;
        Ok(())
    }
}
