//! The per-path record the garbage graph is built from (§3, §4.5, §4.6).
//!
//! Lazy fields are computed once, cached, and (aside from
//! `inherited_max_atime`) never overwritten. Node itself is never shared
//! across threads: the graph builder computes lazy values for a batch of
//! nodes in parallel as pure, owned values (via [`crate::executor`]) and
//! writes them back into the corresponding nodes serially afterward, so
//! `Cell`/`OnceCell` single-threaded interior mutability is sufficient here.

use std::cell::{Cell, OnceCell};

use nix_compat::store_path::StorePath;

use crate::fs_stat::StatAgg;
use crate::quantity::QuantityUnit;

/// Independently user-configurable penalties. Each field is the already
/// weight-mapped internal float (§4.5); `None` disables the penalty.
#[derive(Debug, Clone, Copy, Default)]
pub struct Penalties {
    pub invalid: Option<f64>,
    pub drv: Option<f64>,
    pub substitutable: Option<f64>,
    pub inodes: Option<f64>,
    pub size: Option<f64>,
}

/// One of `{ false, true, "only" }`, controlling whether a node class is
/// eligible for removal at all (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFilter {
    Exclude,
    Include,
    Only,
}

impl ClassFilter {
    /// Whether a node whose class predicate evaluates to `predicate` passes
    /// this filter.
    pub fn allows(self, predicate: bool) -> bool {
        match self {
            ClassFilter::Include => true,
            ClassFilter::Only => predicate,
            ClassFilter::Exclude => !predicate,
        }
    }

    /// Whether this filter needs to know the predicate's actual value
    /// (as opposed to `Include`, which allows regardless).
    pub fn needs_predicate(self) -> bool {
        !matches!(self, ClassFilter::Include)
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        ClassFilter::Include
    }
}

/// Which classes are eligible for removal at all, independent of scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassFilters {
    pub invalid: ClassFilter,
    pub drvs: ClassFilter,
    pub substitutable: ClassFilter,
}

/// One dead store path, as tracked by the garbage graph.
///
/// `nar_size: None` means the path is *invalid* -- parseable but lacking
/// store-reported [`crate::store::PathInfo`] (§3).
#[derive(Debug)]
pub struct Node {
    pub path: StorePath,
    nar_size: Option<u64>,

    fs_stat: OnceCell<StatAgg>,
    substitutable: OnceCell<bool>,
    inherited_max_atime: Cell<i64>,
}

impl Node {
    pub fn new(path: StorePath, nar_size: Option<u64>) -> Self {
        Node {
            path,
            nar_size,
            fs_stat: OnceCell::new(),
            substitutable: OnceCell::new(),
            inherited_max_atime: Cell::new(0),
        }
    }

    /// Whether this node has usable store-reported path info.
    pub fn valid(&self) -> bool {
        self.nar_size.is_some()
    }

    pub fn is_drv(&self) -> bool {
        self.path.is_derivation()
    }

    /// Caches a filesystem-aggregator result, computed externally (possibly
    /// in parallel) by the caller. A no-op if already cached.
    pub fn set_fs_stat(&self, agg: StatAgg) {
        let _ = self.fs_stat.set(agg);
    }

    fn fs_stat(&self) -> StatAgg {
        *self
            .fs_stat
            .get()
            .expect("fs_stat must be primed before being read (see GarbageGraph::push_candidates)")
    }

    /// Total inode count under this path.
    pub fn inodes(&self) -> u64 {
        self.fs_stat().inodes
    }

    /// `nar_size` if valid, else the filesystem-aggregated size (§3).
    pub fn size(&self) -> u64 {
        match self.nar_size {
            Some(n) => n,
            None => self.fs_stat().size,
        }
    }

    fn fs_max_atime(&self) -> i64 {
        self.fs_stat().max_atime
    }

    /// Raises the inherited atime to at least `atime`. Called exactly once
    /// per direct referrer, at the referrer's removal (§4.8 step 4).
    pub fn inherit_max_atime(&self, atime: i64) {
        if atime > self.inherited_max_atime.get() {
            self.inherited_max_atime.set(atime);
        }
    }

    /// `max(fs_max_atime, inherited_max_atime)` when atime inheritance is on,
    /// else just `fs_max_atime` (§3).
    pub fn effective_max_atime(&self, inherit_atime: bool) -> i64 {
        let fs_atime = self.fs_max_atime();
        if inherit_atime {
            fs_atime.max(self.inherited_max_atime.get())
        } else {
            fs_atime
        }
    }

    /// Whether the substitutability cache has already been primed.
    pub fn substitutable_is_known(&self) -> bool {
        self.substitutable.get().is_some()
    }

    /// Caches a substitutability result, computed externally by the caller
    /// (bulk query at heap construction, or a one-off query for a late
    /// arrival per Open Question (c)). A no-op if already cached.
    pub fn set_substitutable(&self, value: bool) {
        let _ = self.substitutable.set(value);
    }

    fn substitutable(&self) -> bool {
        self.substitutable.get().copied().unwrap_or(false)
    }

    /// `size` or `inodes`, whichever the budget is measured in (§3).
    pub fn limit_measurement(&self, unit: QuantityUnit) -> u64 {
        match unit {
            QuantityUnit::Bytes => self.size(),
            QuantityUnit::Inodes => self.inodes(),
        }
    }

    /// Whether this node may be removed at all, independent of its score
    /// (§4.6). Callers must prime `substitutable` first whenever any class
    /// filter actually inspects it (`ClassFilter::needs_predicate`).
    pub fn collection_allowed(&self, filters: &ClassFilters) -> bool {
        filters.invalid.allows(!self.valid())
            && filters.drvs.allows(self.is_drv())
            && filters.substitutable.allows(self.substitutable())
    }

    /// Computes this node's score (§4.5). Lower is more desirable to evict.
    /// `fs_stat`/`substitutable` must already be primed for any penalty that
    /// needs them.
    pub fn score(&self, unit: QuantityUnit, inherit_atime: bool, penalties: &Penalties) -> f64 {
        let mut s = self.effective_max_atime(inherit_atime) as f64;

        if let Some(w) = penalties.invalid {
            if !self.valid() {
                s -= w;
            }
        }
        if let Some(w) = penalties.drv {
            if self.is_drv() {
                s -= w;
            }
        }
        if let Some(w) = penalties.substitutable {
            if self.substitutable() {
                s -= w;
            }
        }

        let size = self.size() as f64;
        let inodes = self.inodes() as f64;
        let (inodes_score, size_score) = match unit {
            QuantityUnit::Bytes => (inodes / (size + 1.0), size),
            QuantityUnit::Inodes => (inodes, size / (inodes + 1.0)),
        };

        if let Some(w) = penalties.inodes {
            s -= w * inodes_score;
        }
        if let Some(w) = penalties.size {
            s -= w * size_score;
        }

        s
    }
}
