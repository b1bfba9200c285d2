//! The narrow façade the engine speaks to the store through (§4.3, §6).
//!
//! This module only specifies the *contract*; `native` and `mock` provide
//! the two implementations the core ships with.

mod mock;
#[cfg(feature = "native-store")]
mod native;

pub use mock::MockStore;
#[cfg(feature = "native-store")]
pub use native::NativeStore;

use std::collections::BTreeSet;

use nix_compat::store_path::StorePath;

/// Which GC action to perform via [`StoreAdapter::collect_garbage`].
#[derive(Debug, Clone)]
pub enum GcAction {
    /// List the dead set without deleting anything.
    ReturnDead,
    /// Delete exactly these paths (the selection this collector computed).
    DeleteSpecific(BTreeSet<StorePath>),
}

/// Result of a [`StoreAdapter::collect_garbage`] call.
///
/// `paths` are raw, absolute, store-prefixed path strings as the store
/// reports them -- not yet parsed into [`StorePath`]s. The store's dead-set
/// is not guaranteed to only contain entries this crate's naming scheme can
/// parse (see `very_invalid_paths`, §3); parsing and bucketing those
/// failures is the graph builder's job, not the adapter's.
#[derive(Debug, Clone, Default)]
pub struct GcResult {
    pub paths: BTreeSet<String>,
    pub bytes_freed: u64,
}

/// What the store knows about a valid path.
#[derive(Debug, Clone)]
pub struct PathInfo {
    pub path: StorePath,
    pub nar_size: u64,
    pub references: BTreeSet<StorePath>,
}

/// Raised by [`StoreAdapter::query_derivation_outputs`] when the store has no
/// realisation recorded for a requested output. Callers tolerate this by
/// treating the result as empty (§4.7 step 6, §7).
#[derive(Debug, thiserror::Error)]
#[error("no realisation recorded for derivation output")]
pub struct MissingRealisation;

/// The store operations the core consumes. See the module-level contract in
/// the design notes: everything about how a real store implements these is
/// deliberately kept out of this trait.
pub trait StoreAdapter: Send + Sync {
    /// Runs a GC action and reports the result.
    fn collect_garbage(&self, action: GcAction) -> Result<GcResult, crate::error::GcError>;

    /// Referrers-first topological order over `paths`: for every reference
    /// edge `a -> b`, `a` appears before `b`.
    fn topo_sort_paths(
        &self,
        paths: &BTreeSet<StorePath>,
    ) -> Result<Vec<StorePath>, crate::error::GcError>;

    /// Fetches path info for a single path. `Ok(None)` means the path has no
    /// usable info (an *invalid* path per §3), not a fatal condition.
    fn query_path_info(
        &self,
        path: &StorePath,
    ) -> Result<Option<PathInfo>, crate::error::GcError>;

    /// Returns the subset of `paths` that a configured binary cache can
    /// re-supply.
    fn query_substitutable_paths(
        &self,
        paths: &BTreeSet<StorePath>,
    ) -> Result<BTreeSet<StorePath>, crate::error::GcError>;

    /// Same as [`StoreAdapter::query_substitutable_paths`], but stops early if
    /// `cancelled` flips to `true`, returning whatever was gathered so far.
    /// The default implementation ignores cancellation; implementations
    /// backed by real network probes should override it.
    fn query_substitutable_paths_interruptible(
        &self,
        paths: &BTreeSet<StorePath>,
        cancelled: &std::sync::atomic::AtomicBool,
    ) -> Result<BTreeSet<StorePath>, crate::error::GcError> {
        let _ = cancelled;
        self.query_substitutable_paths(paths)
    }

    /// The output paths of a derivation. A missing realisation is tolerated
    /// by the caller (§4.7 step 6) and should be surfaced as
    /// `Ok(BTreeSet::new())`, not an error -- store implementations translate
    /// [`MissingRealisation`] to the empty set themselves.
    fn query_derivation_outputs(
        &self,
        drv_path: &StorePath,
    ) -> Result<BTreeSet<StorePath>, crate::error::GcError>;

    /// The store's on-disk root, e.g. `/nix/store`.
    fn nix_store_path(&self) -> &str;

    /// Whether the store is configured to keep derivations of live outputs
    /// alive (induces `OUTPUT_DRV` edges, §3).
    fn gc_keep_derivations(&self) -> bool;

    /// Whether the store is configured to keep outputs of live derivations
    /// alive (induces `DRV_OUTPUT` edges, §3).
    fn gc_keep_outputs(&self) -> bool;
}
