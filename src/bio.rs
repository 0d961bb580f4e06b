//! Buffer cache.
//!
//! A fixed-size set of sector-sized slots sitting between all filesystem
//! code and the block device. Caching sectors in memory reduces the
//! number of device reads/writes and gives every other module in the
//! crate a single synchronization point for sectors touched by multiple
//! callers at once.
//!
//! Interface:
//! * `read`/`write` copy bytes into or out of the cached copy of a sector,
//!   pulling it in from the device on a miss.
//! * `shutdown` flushes every dirty slot and consumes the cache; there is
//!   no way to use it afterwards.
//!
//! Replacement is clock (second-chance): a slot's `referenced` bit is
//! cleared the first time the clock hand passes over it while evicting,
//! and the slot is only taken on a second pass, or immediately if it was
//! never populated.

use array_macro::array;
use log::{debug, trace};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::device::BlockDevice;
use crate::param::{NO_SECTOR, NUM_SLOTS, SECTOR_SIZE};

/// Fields mutated only while a slot's own lock is held: the second-chance
/// bit, the dirty bit, and the sector's bytes.
struct SlotInner {
    referenced: bool,
    dirty: bool,
    data: [u8; SECTOR_SIZE],
}

/// One cache slot. `valid`/`disk_sector` are the slot's *identity* and are
/// only ever changed while the cache's admission lock is held, which lets
/// a lookup scan read them without taking every slot's individual lock.
struct Slot {
    valid: AtomicBool,
    disk_sector: AtomicU32,
    inner: Mutex<SlotInner>,
}

impl Slot {
    fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            disk_sector: AtomicU32::new(NO_SECTOR),
            inner: Mutex::new(SlotInner {
                referenced: false,
                dirty: false,
                data: [0u8; SECTOR_SIZE],
            }),
        }
    }
}

/// The operation a cache access is performing, which determines whether a
/// freshly repurposed slot starts out dirty.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

/// A write-back, clock-replacement cache of sectors from a [`BlockDevice`].
pub struct Cache<D: BlockDevice> {
    device: D,
    slots: [Slot; NUM_SLOTS],
    /// The single global admission lock. Its payload is the clock hand so
    /// that advancing the cursor is only ever done by whoever holds it.
    admission: Mutex<usize>,
}

impl<D: BlockDevice> Cache<D> {
    /// Zeroes every slot and attaches the cache to `device`. Corresponds
    /// to spec.md §4.1's `init()`.
    pub fn new(device: D) -> Self {
        Self {
            device,
            slots: array![_ => Slot::new(); NUM_SLOTS],
            admission: Mutex::new(0),
        }
    }

    /// Copies `size` bytes out of sector `sec` at `sec_off` into
    /// `dst[dst_off..]`.
    pub fn read(&self, sec: u32, dst: &mut [u8], dst_off: usize, size: usize, sec_off: usize) {
        self.access(sec, Op::Read, sec_off, |data| {
            dst[dst_off..dst_off + size].copy_from_slice(&data[sec_off..sec_off + size]);
        })
    }

    /// Copies `size` bytes from `src[src_off..]` into sector `sec` at
    /// `sec_off`, marking the slot dirty.
    pub fn write(&self, sec: u32, src: &[u8], src_off: usize, size: usize, sec_off: usize) {
        self.access(sec, Op::Write, sec_off, |data| {
            data[sec_off..sec_off + size].copy_from_slice(&src[src_off..src_off + size]);
        })
    }

    /// Implements the lookup-then-miss algorithm of spec.md §4.1. `copy`
    /// performs the actual byte transfer once the slot holding `sec` is
    /// locked and populated.
    fn access(&self, sec: u32, op: Op, sec_off: usize, copy: impl FnOnce(&mut [u8; SECTOR_SIZE])) {
        let mut cursor = self.admission.lock().unwrap();

        if let Some(slot) = self.lookup(sec) {
            drop(cursor);
            let mut inner = slot.inner.lock().unwrap();
            copy(&mut inner.data);
            inner.referenced = true;
            if op == Op::Write {
                inner.dirty = true;
            }
            trace!("cache hit sector {sec} off {sec_off}");
            return;
        }

        // Miss: admission lock is still held, so no other thread can pick
        // the same victim out from under us.
        let victim = self.select_victim(&mut cursor);
        let slot = &self.slots[victim];
        let mut inner = slot.inner.lock().unwrap();

        if inner.dirty {
            self.flush_locked(slot, &inner);
        }

        slot.valid.store(true, Ordering::Release);
        slot.disk_sector.store(sec, Ordering::Release);
        inner.referenced = true;
        inner.dirty = op == Op::Write;

        // Read unconditionally, even for a write: the write may be
        // partial within the sector, so the rest of the sector's
        // existing contents still need to come from disk.
        self.device.read(sec, &mut inner.data);
        copy(&mut inner.data);

        debug!("cache miss sector {sec} -> slot {victim}");
        drop(inner);
        drop(cursor);
    }

    /// Scans for a valid slot already holding `sec`. Must be called with
    /// the admission lock held.
    fn lookup(&self, sec: u32) -> Option<&Slot> {
        self.slots.iter().find(|slot| {
            slot.valid.load(Ordering::Acquire) && slot.disk_sector.load(Ordering::Acquire) == sec
        })
    }

    /// Clock victim selection. `cursor` is the admission lock's guard, so
    /// advancing it is visible to the next miss under the same lock.
    fn select_victim(&self, cursor: &mut usize) -> usize {
        loop {
            if *cursor >= NUM_SLOTS {
                *cursor = 0;
            }
            let idx = *cursor;
            *cursor += 1;

            let slot = &self.slots[idx];
            let mut inner = slot.inner.lock().unwrap();
            if !slot.valid.load(Ordering::Acquire) || !inner.referenced {
                return idx;
            }
            inner.referenced = false;
        }
    }

    /// Writes a slot's data back to disk if it's dirty. The caller must
    /// already hold the slot's lock.
    fn flush_locked(&self, slot: &Slot, inner: &SlotInner) {
        let sector = slot.disk_sector.load(Ordering::Acquire);
        self.device.write(sector, &inner.data);
    }

    /// Flushes every dirty slot, then consumes the cache and hands the
    /// device back. There is no `Cache` left afterward to misuse.
    pub fn shutdown(self) -> D {
        for slot in &self.slots {
            let mut inner = slot.inner.lock().unwrap();
            if slot.valid.load(Ordering::Acquire) && inner.dirty {
                self.flush_locked(slot, &inner);
                inner.dirty = false;
            }
        }
        self.device
    }
}
