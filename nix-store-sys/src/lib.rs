//! Low-level, narrow bindings to `libnixstore`.
//!
//! This crate only exposes the handful of store operations the heuristic
//! collector's engine needs (see `nix_heuristic_gc::store::StoreAdapter`):
//! listing dead paths, path info lookup, topological sort, substitutability
//! queries, derivation output lookup, and deletion. Everything else about
//! the C++ store implementation is intentionally left opaque on this side
//! of the bridge.

#[cxx::bridge(namespace = "nix_heuristic_gc_sys")]
mod ffi {
    /// Mirrors `nix::GCOptions::GCAction` (nix/store-api.hh), restricted to
    /// the actions this collector ever requests.
    #[repr(u8)]
    enum GcAction {
        ReturnDead,
        DeleteSpecific,
    }

    /// Result of a `collect_garbage` call.
    struct GcResult {
        paths: Vec<String>,
        bytes_freed: u64,
    }

    /// Subset of `nix::ValidPathInfo` the collector reads.
    struct PathInfoFfi {
        nar_size: u64,
        references: Vec<String>,
    }

    unsafe extern "C++" {
        include!("nix-store-sys/include/shim.h");

        type Store;

        /// Opens the store pointed to by `NIX_REMOTE` (or the default).
        fn open_store() -> Result<UniquePtr<Store>>;

        fn nix_store_path(self: &Store) -> String;
        fn gc_keep_derivations(self: &Store) -> bool;
        fn gc_keep_outputs(self: &Store) -> bool;

        /// Runs a GC action. `paths_to_delete` is only consulted for
        /// `DeleteSpecific`.
        fn collect_garbage(
            self: &Store,
            action: GcAction,
            paths_to_delete: &[String],
        ) -> Result<GcResult>;

        /// Referrers-first topological order over `paths`.
        fn topo_sort_paths(self: &Store, paths: &[String]) -> Result<Vec<String>>;

        /// Fails if `path` has no valid path info.
        fn query_path_info(self: &Store, path: &str) -> Result<PathInfoFfi>;

        fn query_substitutable_paths(self: &Store, paths: &[String]) -> Result<Vec<String>>;

        /// Fails with a realisation-not-found error, tolerated by the caller.
        fn query_derivation_outputs(self: &Store, drv_path: &str) -> Result<Vec<String>>;
    }
}

pub use ffi::{GcAction, GcResult, PathInfoFfi, Store};

/// Opens the native store. This is the only entry point callers need; the
/// remainder of the bridge is reached through methods on the returned handle.
pub fn open() -> Result<cxx::UniquePtr<Store>, cxx::Exception> {
    ffi::open_store()
}
