//! Path resolution.
//!
//! Splits a path into the directory that should contain the final
//! component and the component's name itself, walking only through
//! directory inodes already reachable via [`InodeEngine`]/[`DirOps`].
//! Absolute paths start at the root; anything else starts at the
//! caller-supplied current directory.

use std::sync::Arc;

use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::fs::dir::DirOps;
use crate::fs::inode::{InodeEngine, OpenInode};
use crate::param::ROOT_DIR_SECTOR;

/// The directory an unqualified path should be resolved relative to.
pub struct Cwd {
    pub sector: u32,
}

impl Cwd {
    pub fn root() -> Self {
        Self {
            sector: ROOT_DIR_SECTOR,
        }
    }
}

/// The parent directory of a path's final component, plus the
/// component's own name (still unresolved — it may or may not exist).
pub struct Resolved {
    pub parent: Arc<OpenInode>,
    pub name: String,
}

fn tokenize(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Resolves `path` to (parent directory, final component name),
/// opening and closing every intermediate directory it walks through.
/// Per spec.md §4.9, a non-final component that names something other
/// than a directory is `BadPath`, and so is an empty path.
pub fn resolve<D: BlockDevice, F: FreeMap>(
    inodes: &InodeEngine<D, F>,
    cwd: &Cwd,
    path: &str,
) -> FsResult<Resolved> {
    let start_sector = if path.starts_with('/') {
        ROOT_DIR_SECTOR
    } else {
        cwd.sector
    };

    let components = tokenize(path);
    let (last, leading) = components.split_last().ok_or(FsError::BadPath)?;

    let mut current = inodes.open(start_sector);
    for component in leading {
        if !inodes.is_dir(&current) {
            inodes.close(&current);
            return Err(FsError::NotDirectory);
        }
        let ops = DirOps::new(inodes);
        let next_sector = ops.lookup(&current, component)?;
        inodes.close(&current);
        match next_sector {
            Some(sector) => current = inodes.open(sector),
            None => return Err(FsError::BadPath),
        }
    }

    if !inodes.is_dir(&current) {
        inodes.close(&current);
        return Err(FsError::NotDirectory);
    }

    Ok(Resolved {
        parent: current,
        name: last.to_string(),
    })
}

/// Resolves `path` all the way to the inode it names (not just its
/// parent), for `open`/`remove`/`chdir`.
pub fn resolve_full<D: BlockDevice, F: FreeMap>(
    inodes: &InodeEngine<D, F>,
    cwd: &Cwd,
    path: &str,
) -> FsResult<Arc<OpenInode>> {
    if path == "/" {
        return Ok(inodes.open(ROOT_DIR_SECTOR));
    }
    let resolved = resolve(inodes, cwd, path)?;
    let ops = DirOps::new(inodes);
    let sector = ops.lookup(&resolved.parent, &resolved.name)?;
    inodes.close(&resolved.parent);
    match sector {
        Some(sector) => Ok(inodes.open(sector)),
        None => Err(FsError::BadPath),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::Cache;
    use crate::device::MemDevice;
    use crate::freemap::BitmapFreeMap;

    fn engine() -> InodeEngine<MemDevice, BitmapFreeMap> {
        let cache = Arc::new(Cache::new(MemDevice::new(4096)));
        let freemap = Arc::new(BitmapFreeMap::new(4096));
        InodeEngine::new(cache, freemap)
    }

    #[test]
    fn resolve_splits_parent_and_name() {
        let e = engine();
        e.create(ROOT_DIR_SECTOR, 0, true).unwrap();
        let root = e.open(ROOT_DIR_SECTOR);
        DirOps::new(&e).seed(&root, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR).unwrap();
        e.create(10, 0, false).unwrap();
        DirOps::new(&e).add_entry(&root, "foo", 10).unwrap();
        e.close(&root);

        let cwd = Cwd::root();
        let resolved = resolve(&e, &cwd, "/foo").unwrap();
        assert_eq!(resolved.name, "foo");
        assert_eq!(resolved.parent.sector, ROOT_DIR_SECTOR);
        e.close(&resolved.parent);
    }

    #[test]
    fn resolve_through_missing_directory_is_bad_path() {
        let e = engine();
        e.create(ROOT_DIR_SECTOR, 0, true).unwrap();
        let root = e.open(ROOT_DIR_SECTOR);
        DirOps::new(&e).seed(&root, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR).unwrap();
        e.close(&root);

        let cwd = Cwd::root();
        assert_eq!(resolve(&e, &cwd, "/missing/file").unwrap_err(), FsError::BadPath);
    }

    #[test]
    fn dot_and_dot_dot_resolve_to_self_and_parent() {
        let e = engine();
        e.create(ROOT_DIR_SECTOR, 0, true).unwrap();
        let root = e.open(ROOT_DIR_SECTOR);
        DirOps::new(&e).seed(&root, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR).unwrap();
        e.create(10, 0, true).unwrap();
        let sub = e.open(10);
        DirOps::new(&e).seed(&sub, 10, ROOT_DIR_SECTOR).unwrap();
        DirOps::new(&e).add_entry(&root, "d", 10).unwrap();
        e.close(&sub);
        e.close(&root);

        let cwd = Cwd::root();
        let dot = resolve_full(&e, &cwd, "/d/.").unwrap();
        assert_eq!(dot.sector, 10);
        e.close(&dot);

        let dot_dot = resolve_full(&e, &cwd, "/d/..").unwrap();
        assert_eq!(dot_dot.sector, ROOT_DIR_SECTOR);
        e.close(&dot_dot);

        let plain = resolve_full(&e, &cwd, "/d").unwrap();
        assert_eq!(plain.sector, 10);
        e.close(&plain);
    }

    #[test]
    fn resolve_through_a_file_is_not_directory() {
        let e = engine();
        e.create(ROOT_DIR_SECTOR, 0, true).unwrap();
        let root = e.open(ROOT_DIR_SECTOR);
        DirOps::new(&e).seed(&root, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR).unwrap();
        e.create(10, 0, false).unwrap();
        DirOps::new(&e).add_entry(&root, "foo", 10).unwrap();
        e.close(&root);

        let cwd = Cwd::root();
        assert_eq!(
            resolve(&e, &cwd, "/foo/bar").unwrap_err(),
            FsError::NotDirectory
        );
    }
}
