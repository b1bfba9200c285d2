//! An in-memory [`StoreAdapter`] for driving the engine against scripted
//! fixtures, without a live Nix installation. Used by the integration test
//! suite to exercise the scenarios from §8.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use nix_compat::store_path::StorePath;

use crate::error::GcError;
use crate::store::{GcAction, GcResult, PathInfo, StoreAdapter};

/// A scripted, in-memory store. Construct one with [`MockStore::builder`],
/// register paths and their references, then hand it to
/// [`crate::graph::GarbageGraph::build`].
pub struct MockStore {
    store_dir: String,
    gc_keep_derivations: bool,
    gc_keep_outputs: bool,
    dead_set: BTreeSet<StorePath>,
    /// Raw, deliberately-unparseable names also reported as dead, to
    /// exercise `very_invalid_paths` handling (§3).
    unparseable_dead_names: Vec<String>,
    path_infos: HashMap<StorePath, PathInfo>,
    substitutable: BTreeSet<StorePath>,
    derivation_outputs: HashMap<StorePath, BTreeSet<StorePath>>,
    /// Records every path handed to `collect_garbage(DeleteSpecific(..))`,
    /// for assertions in tests.
    pub deleted: Mutex<Vec<StorePath>>,
}

/// Builds a [`MockStore`] fixture.
#[derive(Default)]
pub struct MockStoreBuilder {
    store_dir: String,
    gc_keep_derivations: bool,
    gc_keep_outputs: bool,
    dead_set: BTreeSet<StorePath>,
    unparseable_dead_names: Vec<String>,
    path_infos: HashMap<StorePath, PathInfo>,
    substitutable: BTreeSet<StorePath>,
    derivation_outputs: HashMap<StorePath, BTreeSet<StorePath>>,
}

impl MockStore {
    pub fn builder() -> MockStoreBuilder {
        MockStoreBuilder {
            store_dir: "/nix/store".to_string(),
            ..Default::default()
        }
    }
}

impl MockStoreBuilder {
    /// Registers a valid path in the dead set, with `nar_size` and
    /// `references`. Referenced paths need not themselves be registered (a
    /// reference to a path outside the dead set is simply ignored by the
    /// graph builder, per §4.7 step 5).
    pub fn with_path(
        mut self,
        path: StorePath,
        nar_size: u64,
        references: impl IntoIterator<Item = StorePath>,
    ) -> Self {
        self.dead_set.insert(path.clone());
        self.path_infos.insert(
            path.clone(),
            PathInfo {
                path,
                nar_size,
                references: references.into_iter().collect(),
            },
        );
        self
    }

    /// Registers a path in the dead set with no path info (an *invalid*
    /// path, §3): it will still be parseable, but `query_path_info` fails.
    pub fn with_invalid_path(mut self, path: StorePath) -> Self {
        self.dead_set.insert(path);
        self
    }

    /// Registers a raw, unparseable name as dead, so it lands in
    /// `very_invalid_paths` instead of becoming a node (§3).
    pub fn with_unparseable_dead_name(mut self, name: impl Into<String>) -> Self {
        self.unparseable_dead_names.push(name.into());
        self
    }

    /// Overrides the on-disk store root (default `/nix/store`), so tests can
    /// point the filesystem aggregator at a scratch directory with
    /// controlled atimes instead of the real store.
    pub fn with_store_dir(mut self, dir: impl Into<String>) -> Self {
        self.store_dir = dir.into();
        self
    }

    pub fn with_substitutable(mut self, path: StorePath) -> Self {
        self.substitutable.insert(path);
        self
    }

    pub fn with_derivation_outputs(
        mut self,
        drv: StorePath,
        outputs: impl IntoIterator<Item = StorePath>,
    ) -> Self {
        self.derivation_outputs
            .insert(drv, outputs.into_iter().collect());
        self
    }

    pub fn with_gc_keep_derivations(mut self, v: bool) -> Self {
        self.gc_keep_derivations = v;
        self
    }

    pub fn with_gc_keep_outputs(mut self, v: bool) -> Self {
        self.gc_keep_outputs = v;
        self
    }

    pub fn build(self) -> MockStore {
        MockStore {
            store_dir: self.store_dir,
            gc_keep_derivations: self.gc_keep_derivations,
            gc_keep_outputs: self.gc_keep_outputs,
            dead_set: self.dead_set,
            unparseable_dead_names: self.unparseable_dead_names,
            path_infos: self.path_infos,
            substitutable: self.substitutable,
            derivation_outputs: self.derivation_outputs,
            deleted: Mutex::new(Vec::new()),
        }
    }
}

impl StoreAdapter for MockStore {
    fn collect_garbage(&self, action: GcAction) -> Result<GcResult, GcError> {
        match action {
            GcAction::ReturnDead => Ok(GcResult {
                paths: self
                    .dead_set
                    .iter()
                    .map(|p| format!("{}/{}", self.store_dir, p))
                    .chain(
                        self.unparseable_dead_names
                            .iter()
                            .map(|n| format!("{}/{}", self.store_dir, n)),
                    )
                    .collect(),
                bytes_freed: 0,
            }),
            GcAction::DeleteSpecific(paths) => {
                let bytes_freed = paths
                    .iter()
                    .filter_map(|p| self.path_infos.get(p))
                    .map(|info| info.nar_size)
                    .sum();
                self.deleted.lock().unwrap().extend(paths.iter().cloned());
                Ok(GcResult {
                    paths: paths.iter().map(|p| format!("{}/{}", self.store_dir, p)).collect(),
                    bytes_freed,
                })
            }
        }
    }

    fn topo_sort_paths(&self, paths: &BTreeSet<StorePath>) -> Result<Vec<StorePath>, GcError> {
        // Kahn's algorithm over the reference edges restricted to `paths`,
        // referrers first -- mirrors the real store's topo_sort_paths
        // contract (§4.3) closely enough for test fixtures.
        let mut in_degree: HashMap<&StorePath, usize> = paths.iter().map(|p| (p, 0)).collect();
        let mut referrers: HashMap<&StorePath, Vec<&StorePath>> =
            paths.iter().map(|p| (p, Vec::new())).collect();

        for p in paths {
            if let Some(info) = self.path_infos.get(p) {
                for r in &info.references {
                    if let Some(entry) = in_degree.get_mut(r) {
                        *entry += 1;
                        referrers.get_mut(p).unwrap().push(r);
                    }
                }
            }
        }

        let mut ready: Vec<&StorePath> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&p, _)| p)
            .collect();
        ready.sort();

        let mut order = Vec::with_capacity(paths.len());
        let mut queue = ready;
        while let Some(p) = queue.pop() {
            order.push(p.clone());
            for r in referrers.get(p).cloned().unwrap_or_default() {
                let d = in_degree.get_mut(r).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push(r);
                    queue.sort();
                }
            }
        }

        Ok(order)
    }

    fn query_path_info(&self, path: &StorePath) -> Result<Option<PathInfo>, GcError> {
        Ok(self.path_infos.get(path).cloned())
    }

    fn query_substitutable_paths(
        &self,
        paths: &BTreeSet<StorePath>,
    ) -> Result<BTreeSet<StorePath>, GcError> {
        Ok(paths.intersection(&self.substitutable).cloned().collect())
    }

    fn query_derivation_outputs(
        &self,
        drv_path: &StorePath,
    ) -> Result<BTreeSet<StorePath>, GcError> {
        Ok(self
            .derivation_outputs
            .get(drv_path)
            .cloned()
            .unwrap_or_default())
    }

    fn nix_store_path(&self) -> &str {
        &self.store_dir
    }

    fn gc_keep_derivations(&self) -> bool {
        self.gc_keep_derivations
    }

    fn gc_keep_outputs(&self) -> bool {
        self.gc_keep_outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(s: &str) -> StorePath {
        s.parse().unwrap()
    }

    #[test]
    fn topo_sort_is_referrers_first() {
        let leaf = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-leaf");
        let mid = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-mid");
        let root = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-root");

        let store = MockStore::builder()
            .with_path(leaf.clone(), 10, [])
            .with_path(mid.clone(), 10, [leaf.clone()])
            .with_path(root.clone(), 10, [mid.clone()])
            .build();

        let dead_set: BTreeSet<_> = [leaf.clone(), mid.clone(), root.clone()].into();
        let order = store.topo_sort_paths(&dead_set).unwrap();
        let pos = |p: &StorePath| order.iter().position(|x| x == p).unwrap();
        assert!(pos(&root) < pos(&mid));
        assert!(pos(&mid) < pos(&leaf));
    }
}
