//! On-disk inode layout, sector indexing, and the inode engine.
//!
//! An inode describes a single file's byte length and the sectors that
//! hold its data, reachable through a direct table, a single-indirect
//! block, and a double-indirect block. The engine keeps a table of
//! in-use inodes in memory so that opening the same sector twice returns
//! the same handle and reference count, exactly as described in
//! spec.md §3 ("Open-inode").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, trace};
use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::Cache;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::param::{
    DIRECT_COUNT, DOUBLE_BASE, INDIRECT_BASE, INODE_MAGIC, MAX_SECTOR_INDEX, NO_SECTOR,
    PTRS_PER_SECTOR, SECTOR_SIZE,
};

/// The on-disk inode record, byte-for-byte. `is_dir` is stored as a full
/// word (not a single byte) so the record lands at exactly `SECTOR_SIZE`
/// with no trailing reserved padding — see SPEC_FULL.md §3.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct RawInode {
    length: i32,
    magic: u32,
    is_dir: u32,
    direct: [u32; DIRECT_COUNT],
    indirect: u32,
    double_indirect: u32,
}

const_assert_eq!(core::mem::size_of::<RawInode>(), SECTOR_SIZE);

/// One indirect block: 128 raw sector numbers, no header.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct RawIndirect {
    table: [u32; PTRS_PER_SECTOR],
}

const_assert_eq!(core::mem::size_of::<RawIndirect>(), SECTOR_SIZE);

/// A sector pointer as stored on disk: either nothing, or a concrete
/// sector. Kept out of every in-memory computation as soon as possible
/// (Design Notes §9: "prefer a sum type... encode as 0xFFFFFFFF only at
/// the on-disk boundary").
fn decode_ptr(raw: u32) -> Option<u32> {
    if raw == NO_SECTOR {
        None
    } else {
        Some(raw)
    }
}

fn encode_ptr(ptr: Option<u32>) -> u32 {
    ptr.unwrap_or(NO_SECTOR)
}

/// The in-memory view of an on-disk inode.
#[derive(Clone, Copy)]
pub struct OnDiskInode {
    pub length: u64,
    pub is_dir: bool,
    direct: [Option<u32>; DIRECT_COUNT],
    indirect: Option<u32>,
    double_indirect: Option<u32>,
}

impl OnDiskInode {
    fn empty(is_dir: bool) -> Self {
        Self {
            length: 0,
            is_dir,
            direct: [None; DIRECT_COUNT],
            indirect: None,
            double_indirect: None,
        }
    }

    fn from_raw(raw: &RawInode) -> FsResult<Self> {
        if raw.magic != INODE_MAGIC {
            return Err(FsError::BadPath);
        }
        let mut direct = [None; DIRECT_COUNT];
        for (slot, raw_ptr) in direct.iter_mut().zip(raw.direct.iter()) {
            *slot = decode_ptr(*raw_ptr);
        }
        Ok(Self {
            length: raw.length as u64,
            is_dir: raw.is_dir != 0,
            direct,
            indirect: decode_ptr(raw.indirect),
            double_indirect: decode_ptr(raw.double_indirect),
        })
    }

    fn to_raw(self) -> RawInode {
        let mut direct = [NO_SECTOR; DIRECT_COUNT];
        for (raw_ptr, ptr) in direct.iter_mut().zip(self.direct.iter()) {
            *raw_ptr = encode_ptr(*ptr);
        }
        RawInode {
            length: self.length as i32,
            magic: INODE_MAGIC,
            is_dir: self.is_dir as u32,
            direct,
            indirect: encode_ptr(self.indirect),
            double_indirect: encode_ptr(self.double_indirect),
        }
    }
}

/// Which level of the pointer table a byte offset falls into, per
/// spec.md §3/§4.2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SectorIndex {
    Direct(usize),
    Indirect(usize),
    Double(usize, usize),
}

/// Maps a byte offset to the sector index that would hold it. Pure,
/// total over the addressable range, `None` past the maximum
/// representable file length.
fn sector_index(byte_offset: u64) -> Option<SectorIndex> {
    let b = byte_offset / SECTOR_SIZE as u64;
    if b < INDIRECT_BASE {
        Some(SectorIndex::Direct(b as usize))
    } else if b < DOUBLE_BASE {
        Some(SectorIndex::Indirect((b - INDIRECT_BASE) as usize))
    } else if b < MAX_SECTOR_INDEX {
        let off = b - DOUBLE_BASE;
        Some(SectorIndex::Double(
            (off / PTRS_PER_SECTOR as u64) as usize,
            (off % PTRS_PER_SECTOR as u64) as usize,
        ))
    } else {
        None
    }
}

fn read_indirect<D: BlockDevice>(cache: &Cache<D>, sector: u32) -> RawIndirect {
    let mut buf = [0u8; SECTOR_SIZE];
    cache.read(sector, &mut buf, 0, SECTOR_SIZE, 0);
    RawIndirect::read_from(&buf[..]).expect("sector-sized buffer always parses")
}

fn write_indirect<D: BlockDevice>(cache: &Cache<D>, sector: u32, block: &RawIndirect) {
    cache.write(sector, block.as_bytes(), 0, SECTOR_SIZE, 0);
}

fn zeroed_indirect() -> RawIndirect {
    RawIndirect {
        table: [NO_SECTOR; PTRS_PER_SECTOR],
    }
}

/// Resolves a byte offset to the data sector holding it, per spec.md §4.3.
/// Returns `Ok(None)` for a hole (within bounds but never allocated) and
/// `Err(FileLengthLimit)` past the end of the addressable range.
fn byte_to_sector<D: BlockDevice>(
    cache: &Cache<D>,
    inode: &OnDiskInode,
    pos: u64,
) -> FsResult<Option<u32>> {
    if pos >= inode.length {
        return Ok(None);
    }
    let idx = sector_index(pos).ok_or(FsError::FileLengthLimit)?;
    Ok(match idx {
        SectorIndex::Direct(i) => inode.direct[i],
        SectorIndex::Indirect(i) => match inode.indirect {
            None => None,
            Some(sec) => decode_ptr(read_indirect(cache, sec).table[i]),
        },
        SectorIndex::Double(i, j) => match inode.double_indirect {
            None => None,
            Some(sec) => match decode_ptr(read_indirect(cache, sec).table[i]) {
                None => None,
                Some(leaf) => decode_ptr(read_indirect(cache, leaf).table[j]),
            },
        },
    })
}

/// Attaches a freshly allocated data sector `new_sec` at `idx` inside
/// `inode`, allocating whatever structural (indirect/double-indirect)
/// blocks are still missing along the way. Per spec.md §4.4 and Design
/// Notes §9 open question 3, a structural allocation that succeeds but is
/// followed by a failing one is not rolled back.
fn add_new_sector<D: BlockDevice, F: FreeMap>(
    cache: &Cache<D>,
    freemap: &F,
    inode: &mut OnDiskInode,
    new_sec: u32,
    idx: SectorIndex,
) -> FsResult<()> {
    match idx {
        SectorIndex::Direct(i) => {
            inode.direct[i] = Some(new_sec);
            Ok(())
        }
        SectorIndex::Indirect(i) => {
            let sec = match inode.indirect {
                Some(sec) => sec,
                None => {
                    let sec = freemap.allocate(1).ok_or(FsError::OutOfSpace)?;
                    write_indirect(cache, sec, &zeroed_indirect());
                    inode.indirect = Some(sec);
                    sec
                }
            };
            let mut block = read_indirect(cache, sec);
            block.table[i] = new_sec;
            write_indirect(cache, sec, &block);
            Ok(())
        }
        SectorIndex::Double(i, j) => {
            let dsec = match inode.double_indirect {
                Some(sec) => sec,
                None => {
                    let sec = freemap.allocate(1).ok_or(FsError::OutOfSpace)?;
                    write_indirect(cache, sec, &zeroed_indirect());
                    inode.double_indirect = Some(sec);
                    sec
                }
            };
            let mut outer = read_indirect(cache, dsec);
            let leaf_ptr = decode_ptr(outer.table[i]);
            let leaf_sec = match leaf_ptr {
                Some(sec) => sec,
                None => {
                    let sec = freemap.allocate(1).ok_or(FsError::OutOfSpace)?;
                    write_indirect(cache, sec, &zeroed_indirect());
                    outer.table[i] = sec;
                    write_indirect(cache, dsec, &outer);
                    sec
                }
            };
            let mut leaf = read_indirect(cache, leaf_sec);
            leaf.table[j] = new_sec;
            write_indirect(cache, leaf_sec, &leaf);
            Ok(())
        }
    }
}

/// Grows `inode` from `old_length` to `new_length`, allocating one data
/// sector at a time for every sector-boundary offset newly covered, and
/// zeroing each one so reads from the grown region observe zero bytes.
/// Per spec.md §4.5.
fn grow<D: BlockDevice, F: FreeMap>(
    cache: &Cache<D>,
    freemap: &F,
    inode: &mut OnDiskInode,
    old_length: u64,
    new_length: u64,
) -> FsResult<()> {
    inode.length = new_length;

    let sector_size = SECTOR_SIZE as u64;
    let mut s = (old_length / sector_size) * sector_size;
    let e = ((new_length - 1) / sector_size) * sector_size;
    let zero = [0u8; SECTOR_SIZE];

    while s <= e {
        if byte_to_sector(cache, inode, s)?.is_none() {
            let new_sec = freemap.allocate(1).ok_or(FsError::OutOfSpace)?;
            let idx = sector_index(s).ok_or(FsError::FileLengthLimit)?;
            add_new_sector(cache, freemap, inode, new_sec, idx)?;
            cache.write(new_sec, &zero, 0, SECTOR_SIZE, 0);
        }
        s += sector_size;
    }
    Ok(())
}

/// Releases every sector `inode` owns, stopping each level at its own
/// first `NO_SECTOR`. Fixes the two source bugs documented in Design
/// Notes §9 (open questions 1 and 2): every level is always walked
/// (never short-circuited by which pointers happen to be set), and a
/// double-indirect leaf is read from the *parent's* `table[i]` entry.
fn free_all_blocks<D: BlockDevice, F: FreeMap>(cache: &Cache<D>, freemap: &F, inode: &OnDiskInode) {
    for ptr in inode.direct.iter().take_while(|p| p.is_some()) {
        freemap.release(ptr.unwrap(), 1);
    }

    if let Some(indirect) = inode.indirect {
        let block = read_indirect(cache, indirect);
        for ptr in block
            .table
            .iter()
            .copied()
            .map(decode_ptr)
            .take_while(|p| p.is_some())
        {
            freemap.release(ptr.unwrap(), 1);
        }
        freemap.release(indirect, 1);
    }

    if let Some(double) = inode.double_indirect {
        let outer = read_indirect(cache, double);
        for leaf_ptr in outer
            .table
            .iter()
            .copied()
            .map(decode_ptr)
            .take_while(|p| p.is_some())
        {
            let leaf_sec = leaf_ptr.unwrap();
            let leaf = read_indirect(cache, leaf_sec);
            for ptr in leaf
                .table
                .iter()
                .copied()
                .map(decode_ptr)
                .take_while(|p| p.is_some())
            {
                freemap.release(ptr.unwrap(), 1);
            }
            freemap.release(leaf_sec, 1);
        }
        freemap.release(double, 1);
    }
}

/// Bookkeeping for one open inode, distinct from the metadata lock used
/// while reading/writing the on-disk struct: `close()` is not one of the
/// calls the facade's global I/O lock serializes (SPEC_FULL.md §4.6), so
/// this needs its own lock to stay correct under concurrent open/close.
struct OpenState {
    open_count: u32,
    removed: bool,
    deny_write_count: u32,
}

/// An in-memory handle to an on-disk inode, reference-counted across
/// every opener of the same sector.
pub struct OpenInode {
    pub sector: u32,
    /// Guards read-modify-write access to the on-disk struct itself
    /// (first in the lock order: inode metadata lock -> cache admission
    /// lock -> cache slot lock).
    metadata_lock: Mutex<()>,
    state: Mutex<OpenState>,
}

/// The open-inode registry plus every operation that reads or mutates an
/// inode's on-disk representation.
pub struct InodeEngine<D: BlockDevice, F: FreeMap> {
    cache: Arc<Cache<D>>,
    freemap: Arc<F>,
    open: Mutex<HashMap<u32, Arc<OpenInode>>>,
}

impl<D: BlockDevice, F: FreeMap> InodeEngine<D, F> {
    pub fn new(cache: Arc<Cache<D>>, freemap: Arc<F>) -> Self {
        Self {
            cache,
            freemap,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates an inode struct at `sector`, grows it from zero to
    /// `length`, and writes it through the cache. Per spec.md §4.6.
    pub fn create(&self, sector: u32, length: u64, is_dir: bool) -> FsResult<()> {
        let mut inode = OnDiskInode::empty(is_dir);
        if length > 0 {
            grow(&self.cache, &*self.freemap, &mut inode, 0, length)?;
        }
        self.write_inode(sector, &inode);
        debug!("inode_create sector {sector} length {length} is_dir {is_dir}");
        Ok(())
    }

    fn write_inode(&self, sector: u32, inode: &OnDiskInode) {
        let raw = inode.to_raw();
        self.cache.write(sector, raw.as_bytes(), 0, SECTOR_SIZE, 0);
    }

    fn read_inode(&self, sector: u32) -> OnDiskInode {
        let mut buf = [0u8; SECTOR_SIZE];
        self.cache.read(sector, &mut buf, 0, SECTOR_SIZE, 0);
        let raw = RawInode::read_from(&buf[..]).expect("sector-sized buffer always parses");
        OnDiskInode::from_raw(&raw).expect("inode sector was created by this engine")
    }

    /// Opens `sector`, returning the same handle (with an incremented
    /// `open_count`) if it's already open.
    pub fn open(&self, sector: u32) -> Arc<OpenInode> {
        let mut open = self.open.lock().unwrap();
        if let Some(existing) = open.get(&sector) {
            existing.state.lock().unwrap().open_count += 1;
            trace!("inode_reopen sector {sector}");
            return Arc::clone(existing);
        }
        let inode = Arc::new(OpenInode {
            sector,
            metadata_lock: Mutex::new(()),
            state: Mutex::new(OpenState {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
            }),
        });
        open.insert(sector, Arc::clone(&inode));
        trace!("inode_open sector {sector}");
        inode
    }

    /// Decrements `open_count`; on the last close, frees the inode's
    /// blocks if it was marked removed.
    pub fn close(&self, inode: &Arc<OpenInode>) {
        let mut open = self.open.lock().unwrap();
        let mut state = inode.state.lock().unwrap();
        state.open_count -= 1;
        if state.open_count != 0 {
            return;
        }
        open.remove(&inode.sector);
        let removed = state.removed;
        drop(state);
        drop(open);

        if removed {
            let disk = self.read_inode(inode.sector);
            free_all_blocks(&self.cache, &*self.freemap, &disk);
            self.freemap.release(inode.sector, 1);
            debug!("inode_close freed sector {}", inode.sector);
        }
    }

    /// Marks `inode` to be deleted once the last opener closes it.
    pub fn remove(&self, inode: &Arc<OpenInode>) {
        inode.state.lock().unwrap().removed = true;
    }

    pub fn is_removed(&self, inode: &Arc<OpenInode>) -> bool {
        inode.state.lock().unwrap().removed
    }

    /// Reads at most `dst.len()` bytes starting at `offset`, stopping at
    /// end-of-file. Returns the number of bytes actually read.
    pub fn read_at(&self, inode: &Arc<OpenInode>, dst: &mut [u8], offset: u64) -> FsResult<usize> {
        let _guard = inode.metadata_lock.lock().unwrap();
        let disk = self.read_inode(inode.sector);

        let mut total = 0usize;
        let mut offset = offset;
        while total < dst.len() {
            let sector = byte_to_sector(&self.cache, &disk, offset)?;
            let sector_off = (offset % SECTOR_SIZE as u64) as usize;
            let inode_left = disk.length.saturating_sub(offset);
            let sector_left = (SECTOR_SIZE - sector_off) as u64;
            let chunk = inode_left.min(sector_left).min((dst.len() - total) as u64) as usize;
            if chunk == 0 {
                break;
            }
            match sector {
                Some(sec) => self.cache.read(sec, dst, total, chunk, sector_off),
                None => dst[total..total + chunk].fill(0),
            }
            total += chunk;
            offset += chunk as u64;
        }
        Ok(total)
    }

    /// Writes `src.len()` bytes starting at `offset`, growing the file
    /// first if the write extends past the current length. Returns 0
    /// without writing anything if writes are currently denied.
    pub fn write_at(&self, inode: &Arc<OpenInode>, src: &[u8], offset: u64) -> FsResult<usize> {
        if inode.state.lock().unwrap().deny_write_count > 0 {
            return Ok(0);
        }

        let _guard = inode.metadata_lock.lock().unwrap();
        let mut disk = self.read_inode(inode.sector);
        let end = offset + src.len() as u64;
        if end > disk.length {
            grow(&self.cache, &*self.freemap, &mut disk, disk.length, end)?;
            self.write_inode(inode.sector, &disk);
        }

        let mut total = 0usize;
        let mut offset = offset;
        while total < src.len() {
            let sector = byte_to_sector(&self.cache, &disk, offset)?;
            let sector_off = (offset % SECTOR_SIZE as u64) as usize;
            let inode_left = disk.length.saturating_sub(offset);
            let sector_left = (SECTOR_SIZE - sector_off) as u64;
            let chunk = inode_left.min(sector_left).min((src.len() - total) as u64) as usize;
            if chunk == 0 {
                break;
            }
            let sector = sector.expect("grow() allocated every sector up to the new length");
            self.cache.write(sector, src, total, chunk, sector_off);
            total += chunk;
            offset += chunk as u64;
        }
        Ok(total)
    }

    /// Reads the on-disk struct and returns its `length` field.
    pub fn length(&self, inode: &Arc<OpenInode>) -> u64 {
        self.read_inode(inode.sector).length
    }

    pub fn is_dir(&self, inode: &Arc<OpenInode>) -> bool {
        self.read_inode(inode.sector).is_dir
    }

    pub fn deny_write(&self, inode: &Arc<OpenInode>) {
        let mut state = inode.state.lock().unwrap();
        state.deny_write_count += 1;
        debug_assert!(state.deny_write_count <= state.open_count);
    }

    pub fn allow_write(&self, inode: &Arc<OpenInode>) {
        let mut state = inode.state.lock().unwrap();
        debug_assert!(state.deny_write_count > 0);
        state.deny_write_count -= 1;
    }

    /// Reads the full on-disk struct, exposed for the directory layer
    /// (lookups, `.`/`..` seeding) and the path resolver.
    pub(crate) fn snapshot(&self, inode: &Arc<OpenInode>) -> OnDiskInode {
        self.read_inode(inode.sector)
    }

    pub(crate) fn cache(&self) -> &Cache<D> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use crate::freemap::BitmapFreeMap;
    use crate::param::ROOT_DIR_SECTOR;

    fn engine(sectors: u32) -> InodeEngine<MemDevice, BitmapFreeMap> {
        let cache = Arc::new(Cache::new(MemDevice::new(sectors)));
        let freemap = Arc::new(BitmapFreeMap::new(sectors));
        InodeEngine::new(cache, freemap)
    }

    #[test]
    fn sector_index_boundaries() {
        assert_eq!(sector_index(0), Some(SectorIndex::Direct(0)));
        assert_eq!(
            sector_index(122 * SECTOR_SIZE as u64),
            Some(SectorIndex::Direct(122))
        );
        assert_eq!(
            sector_index(123 * SECTOR_SIZE as u64),
            Some(SectorIndex::Indirect(0))
        );
        assert_eq!(
            sector_index(250 * SECTOR_SIZE as u64),
            Some(SectorIndex::Indirect(127))
        );
        assert_eq!(
            sector_index(251 * SECTOR_SIZE as u64),
            Some(SectorIndex::Double(0, 0))
        );
        assert_eq!(sector_index(MAX_SECTOR_INDEX * SECTOR_SIZE as u64), None);
    }

    #[test]
    fn create_then_open_reports_requested_length() {
        let e = engine(4096);
        e.create(ROOT_DIR_SECTOR, 5, false).unwrap();
        let ip = e.open(ROOT_DIR_SECTOR);
        assert_eq!(e.length(&ip), 5);
    }

    #[test]
    fn write_then_read_round_trips() {
        let e = engine(4096);
        e.create(10, 0, false).unwrap();
        let ip = e.open(10);
        let n = e.write_at(&ip, b"hello", 0).unwrap();
        assert_eq!(n, 5);
        let mut buf = [0u8; 5];
        let n = e.read_at(&ip, &mut buf, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_past_end_zero_fills_the_gap() {
        let e = engine(40_000);
        e.create(10, 0, false).unwrap();
        let ip = e.open(10);
        e.write_at(&ip, b"X", 130 * SECTOR_SIZE as u64).unwrap();
        assert_eq!(e.length(&ip), 130 * SECTOR_SIZE as u64 + 1);
        let mut buf = [0xFFu8; 1];
        e.read_at(&ip, &mut buf, 100 * SECTOR_SIZE as u64).unwrap();
        assert_eq!(buf, [0]);
    }

    #[test]
    fn growth_past_double_indirect_threshold_sets_both_pointers() {
        let e = engine(80_000);
        e.create(10, 0, false).unwrap();
        let ip = e.open(10);
        let ones = vec![1u8; 512 * 252];
        e.write_at(&ip, &ones, 0).unwrap();
        let disk = e.snapshot(&ip);
        assert!(disk.indirect.is_some());
        assert!(disk.double_indirect.is_some());
    }

    #[test]
    fn remove_then_close_frees_every_sector() {
        let e = engine(4096);
        e.create(10, 0, false).unwrap();
        let ip = e.open(10);
        e.write_at(&ip, &vec![1u8; 512 * 5], 0).unwrap();
        let before = e.freemap.allocate(1).unwrap();
        e.freemap.release(before, 1);

        e.remove(&ip);
        e.close(&ip);

        // The five data sectors released by free_all_blocks plus the
        // inode sector itself must be available for reuse.
        let mut got = Vec::new();
        for _ in 0..6 {
            got.push(e.freemap.allocate(1).unwrap());
        }
        assert_eq!(got.len(), 6);
    }

    #[test]
    fn deny_write_blocks_writes_until_allowed() {
        let e = engine(4096);
        e.create(10, 0, false).unwrap();
        let ip = e.open(10);
        e.deny_write(&ip);
        assert_eq!(e.write_at(&ip, b"x", 0).unwrap(), 0);
        e.allow_write(&ip);
        assert_eq!(e.write_at(&ip, b"x", 0).unwrap(), 1);
    }
}
