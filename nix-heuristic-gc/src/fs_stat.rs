//! Filesystem aggregation: computes `(max_atime, inode_count, byte_size)` for
//! a store path on disk.
//!
//! Grounded directly on the reference walker, extended to also track byte
//! size (the original only tracked atime and inode count).

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// `(max_atime, inodes, size)` folded over a path and (if a directory) its
/// subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatAgg {
    pub max_atime: i64,
    pub inodes: u64,
    pub size: u64,
}

impl StatAgg {
    const ZERO: StatAgg = StatAgg {
        max_atime: 0,
        inodes: 1,
        size: 0,
    };

    fn fold(self, other: StatAgg) -> StatAgg {
        StatAgg {
            max_atime: self.max_atime.max(other.max_atime),
            inodes: self.inodes + other.inodes,
            size: self.size + other.size,
        }
    }
}

/// Aggregates atime/inode/size stats for `path`, not following symlinks and
/// excluding directory atimes (the walk itself updates them).
///
/// Permission errors degrade to `StatAgg::ZERO` for the affected subtree
/// rather than propagating; this matches the store's tolerance of partially
/// readable trees left behind by previous, interrupted collections.
pub fn path_stat_agg(path: &Path) -> StatAgg {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return StatAgg::ZERO,
    };

    if meta.is_dir() {
        dir_stat_agg(path)
    } else {
        StatAgg {
            max_atime: meta.atime(),
            inodes: 1,
            size: meta.size(),
        }
    }
}

fn dir_stat_agg(path: &Path) -> StatAgg {
    let entries = match fs::read_dir(path) {
        Ok(e) => e,
        Err(_) => return StatAgg::ZERO,
    };

    entries.fold(StatAgg::ZERO, |acc, entry| {
        let Ok(entry) = entry else {
            return acc;
        };
        acc.fold(direntry_stat_agg(&entry))
    })
}

fn direntry_stat_agg(entry: &fs::DirEntry) -> StatAgg {
    let meta = match entry.metadata() {
        Ok(m) => m,
        Err(_) => return StatAgg::ZERO,
    };

    if meta.is_dir() {
        dir_stat_agg(&entry.path())
    } else {
        StatAgg {
            max_atime: meta.atime(),
            inodes: 1,
            size: meta.size(),
        }
    }
}
