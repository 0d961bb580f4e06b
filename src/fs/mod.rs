//! The filesystem facade: the public surface composing the buffer
//! cache, the inode engine, directory maintenance, and path resolution
//! into `create`/`open`/`remove`/`mkdir`/`chdir` plus a per-open-file
//! handle.

pub mod dir;
pub mod inode;
pub mod path;

use std::sync::{Arc, Mutex};

use log::info;

use crate::bio::Cache;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::param::ROOT_DIR_SECTOR;

use dir::DirOps;
use inode::{InodeEngine, OpenInode};
use path::Cwd;

/// The assembled filesystem. Every read/write/open/seek/tell/filesize
/// call serializes through `io_lock`, matching spec.md §5's single
/// global lock; `close` deliberately does not take it, since an open
/// inode's own bookkeeping lock (see `fs::inode`) is what keeps it
/// correct under concurrent closes.
pub struct Filesystem<D: BlockDevice, F: FreeMap> {
    cache: Arc<Cache<D>>,
    freemap: Arc<F>,
    inodes: InodeEngine<D, F>,
    io_lock: Mutex<()>,
}

/// A handle returned by `open`, pairing an inode with its own seek
/// position and deny-write state.
pub struct OpenFile<'fs, D: BlockDevice, F: FreeMap> {
    fs: &'fs Filesystem<D, F>,
    inode: Arc<OpenInode>,
    position: Mutex<u64>,
    write_denied: bool,
}

impl<D: BlockDevice, F: FreeMap> Filesystem<D, F> {
    /// Attaches to `device`/`freemap`. If `format` is set, also lays
    /// down a fresh, empty root directory at `ROOT_DIR_SECTOR`.
    pub fn init(device: D, freemap: F, format: bool) -> FsResult<Self> {
        let cache = Arc::new(Cache::new(device));
        let freemap = Arc::new(freemap);
        let inodes = InodeEngine::new(Arc::clone(&cache), Arc::clone(&freemap));

        if format {
            info!("formatting filesystem");
            freemap.create();
            let root_sector = freemap.allocate(1).ok_or(FsError::OutOfSpace)?;
            debug_assert_eq!(root_sector, ROOT_DIR_SECTOR);
            inodes.create(ROOT_DIR_SECTOR, 0, true)?;
            let root = inodes.open(ROOT_DIR_SECTOR);
            DirOps::new(&inodes).seed(&root, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR)?;
            inodes.close(&root);
        } else {
            freemap.open();
        }

        Ok(Self {
            cache,
            freemap,
            inodes,
            io_lock: Mutex::new(()),
        })
    }

    /// Flushes the cache and consumes the filesystem, handing the
    /// device back.
    pub fn shutdown(self) -> D {
        self.freemap.close();
        let cache = Arc::try_unwrap(self.cache)
            .unwrap_or_else(|_| panic!("open files outlived the filesystem"));
        cache.shutdown()
    }

    /// Returns the root directory as a [`Cwd`] for relative resolution.
    pub fn root(&self) -> Cwd {
        Cwd::root()
    }

    /// Creates a regular file of `initial_size` bytes named by the
    /// final component of `path`.
    pub fn create(&self, cwd: &Cwd, path: &str, initial_size: u64) -> FsResult<()> {
        let _guard = self.io_lock.lock().unwrap();
        let resolved = path::resolve(&self.inodes, cwd, path)?;
        let ops = DirOps::new(&self.inodes);
        if ops.lookup(&resolved.parent, &resolved.name)?.is_some() {
            self.inodes.close(&resolved.parent);
            return Err(FsError::NameExists);
        }
        let sector = self.freemap.allocate(1).ok_or(FsError::OutOfSpace)?;
        let result = self
            .inodes
            .create(sector, initial_size, false)
            .and_then(|()| ops.add_entry(&resolved.parent, &resolved.name, sector));
        self.inodes.close(&resolved.parent);
        if result.is_err() {
            self.freemap.release(sector, 1);
        }
        result
    }

    /// Creates a directory named by the final component of `path`,
    /// seeded with `.` and `..`.
    pub fn mkdir(&self, cwd: &Cwd, path: &str) -> FsResult<()> {
        let _guard = self.io_lock.lock().unwrap();
        let resolved = path::resolve(&self.inodes, cwd, path)?;
        let ops = DirOps::new(&self.inodes);
        if ops.lookup(&resolved.parent, &resolved.name)?.is_some() {
            self.inodes.close(&resolved.parent);
            return Err(FsError::NameExists);
        }
        let sector = self.freemap.allocate(1).ok_or(FsError::OutOfSpace)?;
        let result = self.inodes.create(sector, 0, true).and_then(|()| {
            let child = self.inodes.open(sector);
            let seeded = ops.seed(&child, sector, resolved.parent.sector);
            self.inodes.close(&child);
            seeded.and_then(|()| ops.add_entry(&resolved.parent, &resolved.name, sector))
        });
        self.inodes.close(&resolved.parent);
        if result.is_err() {
            self.freemap.release(sector, 1);
        }
        result
    }

    /// Opens `path`, returning a handle good for read/write/seek.
    pub fn open<'fs>(&'fs self, cwd: &Cwd, path: &str) -> FsResult<OpenFile<'fs, D, F>> {
        let _guard = self.io_lock.lock().unwrap();
        let inode = path::resolve_full(&self.inodes, cwd, path)?;
        Ok(OpenFile {
            fs: self,
            inode,
            position: Mutex::new(0),
            write_denied: false,
        })
    }

    /// Changes `cwd` to the directory named by `path`.
    pub fn chdir(&self, cwd: &Cwd, path: &str) -> FsResult<Cwd> {
        let _guard = self.io_lock.lock().unwrap();
        let inode = path::resolve_full(&self.inodes, cwd, path)?;
        if !self.inodes.is_dir(&inode) {
            self.inodes.close(&inode);
            return Err(FsError::NotDirectory);
        }
        let sector = inode.sector;
        self.inodes.close(&inode);
        Ok(Cwd { sector })
    }

    /// Removes the entry named by `path`. The inode's blocks are only
    /// freed once every opener has closed it (see `fs::inode::close`).
    /// A directory must be empty (besides `.`/`..`) to be removed.
    pub fn remove(&self, cwd: &Cwd, path: &str) -> FsResult<()> {
        let _guard = self.io_lock.lock().unwrap();
        let resolved = path::resolve(&self.inodes, cwd, path)?;
        let ops = DirOps::new(&self.inodes);
        let sector = ops
            .lookup(&resolved.parent, &resolved.name)?
            .ok_or(FsError::BadPath);
        let sector = match sector {
            Ok(s) => s,
            Err(e) => {
                self.inodes.close(&resolved.parent);
                return Err(e);
            }
        };

        let target = self.inodes.open(sector);
        if self.inodes.is_dir(&target) && !ops.is_empty(&target)? {
            self.inodes.close(&target);
            self.inodes.close(&resolved.parent);
            return Err(FsError::DirectoryNotEmpty);
        }

        ops.remove_entry(&resolved.parent, &resolved.name)?;
        self.inodes.remove(&target);
        self.inodes.close(&target);
        self.inodes.close(&resolved.parent);
        Ok(())
    }
}

impl<'fs, D: BlockDevice, F: FreeMap> OpenFile<'fs, D, F> {
    pub fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        let _guard = self.fs.io_lock.lock().unwrap();
        let mut pos = self.position.lock().unwrap();
        let n = self.fs.inodes.read_at(&self.inode, buf, *pos)?;
        *pos += n as u64;
        Ok(n)
    }

    pub fn write(&self, buf: &[u8]) -> FsResult<usize> {
        let _guard = self.fs.io_lock.lock().unwrap();
        if self.write_denied {
            return Err(FsError::DeniedWrite);
        }
        let mut pos = self.position.lock().unwrap();
        let n = self.fs.inodes.write_at(&self.inode, buf, *pos)?;
        *pos += n as u64;
        Ok(n)
    }

    pub fn seek(&self, offset: u64) {
        let _guard = self.fs.io_lock.lock().unwrap();
        *self.position.lock().unwrap() = offset;
    }

    pub fn tell(&self) -> u64 {
        let _guard = self.fs.io_lock.lock().unwrap();
        *self.position.lock().unwrap()
    }

    pub fn filesize(&self) -> u64 {
        let _guard = self.fs.io_lock.lock().unwrap();
        self.fs.inodes.length(&self.inode)
    }

    pub fn deny_write(&mut self) {
        self.fs.inodes.deny_write(&self.inode);
        self.write_denied = true;
    }

    pub fn allow_write(&mut self) {
        self.fs.inodes.allow_write(&self.inode);
        self.write_denied = false;
    }
}

impl<'fs, D: BlockDevice, F: FreeMap> Drop for OpenFile<'fs, D, F> {
    fn drop(&mut self) {
        if self.write_denied {
            self.fs.inodes.allow_write(&self.inode);
        }
        self.fs.inodes.close(&self.inode);
    }
}
