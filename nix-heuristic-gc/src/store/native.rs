//! [`StoreAdapter`] backed by the real store, via the `nix-store-sys` FFI
//! bridge to `libnixstore`.

use std::collections::BTreeSet;

use nix_compat::store_path::StorePath;

use crate::error::GcError;
use crate::store::{GcAction as CoreGcAction, GcResult, PathInfo, StoreAdapter};

/// Wraps an open `nix-store-sys::Store` handle.
pub struct NativeStore {
    inner: cxx::UniquePtr<nix_store_sys::Store>,
    store_dir: String,
}

// `cxx::UniquePtr` doesn't derive these, but the bridged `nix::ref<nix::Store>`
// it wraps is the same handle the reference CLI tools share across their own
// worker threads for read-only queries; `collect_garbage`'s deletion path
// is only ever invoked from the single control thread (§5).
unsafe impl Send for NativeStore {}
unsafe impl Sync for NativeStore {}

impl NativeStore {
    /// Opens the store pointed to by the environment (`NIX_REMOTE` et al.,
    /// see §6), honored by `libnixstore` itself, not by this crate.
    pub fn open() -> Result<Self, GcError> {
        let inner = nix_store_sys::open().map_err(|e| GcError::Store(e.to_string()))?;
        let store_dir = inner.nix_store_path();
        Ok(Self { inner, store_dir })
    }

    /// Parses a bare `HASH-name` string the FFI layer returned back into a
    /// [`StorePath`], optionally stripping a leading store-dir prefix first.
    fn parse_relative(&self, s: &str) -> Result<StorePath, GcError> {
        let stripped = s
            .strip_prefix(self.nix_store_path())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(s);
        stripped
            .parse()
            .map_err(|e: nix_compat::store_path::Error| GcError::Store(e.to_string()))
    }
}

impl StoreAdapter for NativeStore {
    fn collect_garbage(&self, action: CoreGcAction) -> Result<GcResult, GcError> {
        let (ffi_action, paths_to_delete): (nix_store_sys::GcAction, Vec<String>) = match action {
            CoreGcAction::ReturnDead => (nix_store_sys::GcAction::ReturnDead, Vec::new()),
            CoreGcAction::DeleteSpecific(paths) => (
                nix_store_sys::GcAction::DeleteSpecific,
                paths.iter().map(|p| p.to_string()).collect(),
            ),
        };

        let result = self
            .inner
            .collect_garbage(ffi_action, &paths_to_delete)
            .map_err(|e| GcError::Store(e.to_string()))?;

        Ok(GcResult {
            paths: result.paths.into_iter().collect(),
            bytes_freed: result.bytes_freed,
        })
    }

    fn topo_sort_paths(&self, paths: &BTreeSet<StorePath>) -> Result<Vec<StorePath>, GcError> {
        let input: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        let sorted = self
            .inner
            .topo_sort_paths(&input)
            .map_err(|e| GcError::Store(e.to_string()))?;
        sorted.iter().map(|p| self.parse_relative(p)).collect()
    }

    fn query_path_info(&self, path: &StorePath) -> Result<Option<PathInfo>, GcError> {
        match self.inner.query_path_info(&path.to_string()) {
            Ok(info) => {
                let mut references = BTreeSet::new();
                for r in info.references {
                    references.insert(self.parse_relative(&r)?);
                }
                Ok(Some(PathInfo {
                    path: path.clone(),
                    nar_size: info.nar_size,
                    references,
                }))
            }
            // An invalid path is not an unrecoverable error: query_path_info
            // throwing is libnixstore's way of saying "no PathInfo here".
            Err(_) => Ok(None),
        }
    }

    fn query_substitutable_paths(
        &self,
        paths: &BTreeSet<StorePath>,
    ) -> Result<BTreeSet<StorePath>, GcError> {
        let input: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        let substitutable = self
            .inner
            .query_substitutable_paths(&input)
            .map_err(|e| GcError::Store(e.to_string()))?;
        substitutable.iter().map(|p| self.parse_relative(p)).collect()
    }

    fn query_derivation_outputs(
        &self,
        drv_path: &StorePath,
    ) -> Result<BTreeSet<StorePath>, GcError> {
        match self.inner.query_derivation_outputs(&drv_path.to_string()) {
            Ok(outputs) => outputs.iter().map(|p| self.parse_relative(p)).collect(),
            // Tolerated per §4.7 step 6 / §7: treated as no outputs found.
            Err(_) => Ok(BTreeSet::new()),
        }
    }

    fn nix_store_path(&self) -> &str {
        &self.store_dir
    }

    fn gc_keep_derivations(&self) -> bool {
        self.inner.gc_keep_derivations()
    }

    fn gc_keep_outputs(&self) -> bool {
        self.inner.gc_keep_outputs()
    }
}
