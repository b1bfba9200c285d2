//! End-to-end scenarios driven through the mock store adapter, exercising
//! the eviction engine's handling of atime inheritance, class filtering,
//! and keep-derivations/keep-outputs cycles against real on-disk atimes.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use filetime::FileTime;
use rstest::rstest;
use tempfile::TempDir;

use nix_compat::store_path::StorePath;
use nix_heuristic_gc::engine::remove_to_limit;
use nix_heuristic_gc::error::GcError;
use nix_heuristic_gc::executor::AnyExecutor;
use nix_heuristic_gc::graph::{GarbageGraph, GraphConfig};
use nix_heuristic_gc::node::{ClassFilter, ClassFilters, Penalties};
use nix_heuristic_gc::quantity::QuantityUnit;
use nix_heuristic_gc::store::{GcAction, GcResult, MockStore, PathInfo, StoreAdapter};

fn sp(s: &str) -> StorePath {
    s.parse().unwrap()
}

/// Writes a one-byte file at `dir/<path>` and sets its atime, so
/// `path_stat_agg` reads a controlled value instead of falling back to zero
/// for a nonexistent `/nix/store` entry.
fn touch(dir: &Path, path: &StorePath, atime: i64) {
    let file = dir.join(path.to_string());
    std::fs::write(&file, b"x").unwrap();
    filetime::set_file_atime(&file, FileTime::from_unix_time(atime, 0)).unwrap();
}

fn inline_executor() -> AnyExecutor {
    AnyExecutor::from_thread_count(Some(0))
}

fn no_penalties_config(inherit_atime: bool) -> GraphConfig {
    GraphConfig {
        limit_unit: QuantityUnit::Bytes,
        inherit_atime,
        penalties: Penalties::default(),
        filters: ClassFilters::default(),
    }
}

// S2/S3 share a shape: a linear chain where only one leaf is ever a
// pseudo-root at a time, so removal order is forced by topology regardless
// of `inherit_atime`. Parametrized over both settings rather than
// duplicating the fixture per case.
#[rstest]
#[case::no_inheritance(false)]
#[case::with_inheritance(true)]
fn linear_chain_removes_leaves_first_regardless_of_inheritance(#[case] inherit_atime: bool) {
    let p1 = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-p1");
    let p2 = sp("00bgd045z0d4icpbc2yyz4gx48ak44lb-p2");
    let p3 = sp("00bgd045z0d4icpbc2yyz4gx48ak44lc-p3");
    let p4 = sp("00bgd045z0d4icpbc2yyz4gx48ak44ld-p4");
    let p5 = sp("00bgd045z0d4icpbc2yyz4gx48ak44le-p5");

    let dir = TempDir::new().unwrap();
    touch(dir.path(), &p1, 50);
    touch(dir.path(), &p2, 40);
    touch(dir.path(), &p3, 30);
    touch(dir.path(), &p4, 20);
    touch(dir.path(), &p5, 10);

    let store = Arc::new(
        MockStore::builder()
            .with_store_dir(dir.path().to_str().unwrap())
            .with_path(p1.clone(), 100, [])
            .with_path(p2.clone(), 100, [p1.clone()])
            .with_path(p3.clone(), 100, [p2.clone()])
            .with_path(p4.clone(), 100, [p3.clone()])
            .with_path(p5.clone(), 100, [p4.clone()])
            .build(),
    );

    let executor = inline_executor();
    let mut graph =
        GarbageGraph::build(store, &executor, no_penalties_config(inherit_atime)).unwrap();

    let removed = remove_to_limit(&mut graph, &executor, 250, None).unwrap();
    let order: Vec<String> = removed.iter().map(|n| n.path.to_string()).collect();
    assert_eq!(order, vec![p5.to_string(), p4.to_string(), p3.to_string()]);

    let total: u64 = removed.iter().map(|n| n.limit_measurement(QuantityUnit::Bytes)).sum();
    assert!(total >= 250);
}

// S3: atime inheritance propagates from a removed referrer to its direct
// dependency, and wins over the dependency's own (older) atime.
#[test]
fn atime_inherits_from_removed_referrer() {
    let p1 = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-p1");
    let p2 = sp("00bgd045z0d4icpbc2yyz4gx48ak44lb-p2");
    let p3 = sp("00bgd045z0d4icpbc2yyz4gx48ak44lc-p3");
    let p4 = sp("00bgd045z0d4icpbc2yyz4gx48ak44ld-p4");
    let p5 = sp("00bgd045z0d4icpbc2yyz4gx48ak44le-p5");

    let dir = TempDir::new().unwrap();
    touch(dir.path(), &p1, 1);
    touch(dir.path(), &p2, 40);
    touch(dir.path(), &p3, 500);
    touch(dir.path(), &p4, 20);
    touch(dir.path(), &p5, 10);

    let store = Arc::new(
        MockStore::builder()
            .with_store_dir(dir.path().to_str().unwrap())
            .with_path(p1.clone(), 100, [])
            .with_path(p2.clone(), 100, [p1.clone()])
            .with_path(p3.clone(), 100, [p2.clone()])
            .with_path(p4.clone(), 100, [p3.clone()])
            .with_path(p5.clone(), 100, [p4.clone()])
            .build(),
    );

    let executor = inline_executor();
    let mut graph = GarbageGraph::build(store, &executor, no_penalties_config(true)).unwrap();

    // Chain topology exposes exactly one candidate at a time, so removal
    // order is forced regardless of score: p5, p4, p3, then p2.
    let removed: Vec<_> = (0..4)
        .map(|_| graph.remove_heap_root(&executor).unwrap())
        .collect();
    let order: Vec<String> = removed.iter().map(|n| n.path.to_string()).collect();
    assert_eq!(
        order,
        vec![p5.to_string(), p4.to_string(), p3.to_string(), p2.to_string()]
    );

    // p2 inherited p3's atime (500), which itself inherited p4's (20),
    // which inherited p5's (10) -- and 500 dominates p2's own fs atime (40).
    assert_eq!(removed[3].effective_max_atime(true), 500);
}

// S4: with the substitutable penalty enabled, a substitutable leaf is
// preferred for eviction over a non-substitutable one with the same atime.
#[test]
fn substitutable_leaf_evicted_before_equally_recent_non_substitutable() {
    let sub = sp("00bgd045z0d4icpbc2yyz4gx48ak44lf-sub");
    let non_sub = sp("00bgd045z0d4icpbc2yyz4gx48ak44lg-nonsub");

    let dir = TempDir::new().unwrap();
    touch(dir.path(), &sub, 100);
    touch(dir.path(), &non_sub, 100);

    let store = Arc::new(
        MockStore::builder()
            .with_store_dir(dir.path().to_str().unwrap())
            .with_path(sub.clone(), 900, [])
            .with_path(non_sub.clone(), 900, [])
            .with_substitutable(sub.clone())
            .build(),
    );

    let config = GraphConfig {
        limit_unit: QuantityUnit::Bytes,
        inherit_atime: false,
        penalties: Penalties {
            substitutable: Some(1e5),
            ..Penalties::default()
        },
        filters: ClassFilters::default(),
    };

    let executor = inline_executor();
    let mut graph = GarbageGraph::build(store, &executor, config).unwrap();

    let removed = remove_to_limit(&mut graph, &executor, 900, None).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].path, sub);
}

// S5: without overshoot correction the lowest-score node is always chosen
// regardless of overshoot; with correction enabled, a smaller candidate is
// still preferred below the limit, but once only an over-size candidate
// remains the engine selects it anyway rather than raising a fatal error
// (§4.8's "least-bad choice").
#[test]
fn overshoot_correction_prefers_a_smaller_candidate_but_still_selects_an_oversize_one() {
    let x = sp("00bgd045z0d4icpbc2yyz4gx48ak44lh-x");
    let y = sp("00bgd045z0d4icpbc2yyz4gx48ak44li-y");

    let dir = TempDir::new().unwrap();
    touch(dir.path(), &x, 10);
    touch(dir.path(), &y, 20);

    // No correction: x (lower score) is removed first, and since it alone
    // doesn't satisfy the limit the loop continues on to y.
    let executor = inline_executor();
    let store = Arc::new(
        MockStore::builder()
            .with_store_dir(dir.path().to_str().unwrap())
            .with_path(x.clone(), 900, [])
            .with_path(y.clone(), 1500, [])
            .build(),
    );
    let mut graph =
        GarbageGraph::build(store, &executor, no_penalties_config(false)).unwrap();
    let removed = remove_to_limit(&mut graph, &executor, 1000, None).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(removed[0].path, x);
    assert_eq!(removed[1].path, y);

    // With correction enabled and only the over-size y as a candidate (no x
    // in this graph), the engine still selects it instead of erroring out.
    let only_y = Arc::new(
        MockStore::builder()
            .with_store_dir(dir.path().to_str().unwrap())
            .with_path(y.clone(), 1500, [])
            .build(),
    );
    let mut graph =
        GarbageGraph::build(only_y, &executor, no_penalties_config(false)).unwrap();
    let removed = remove_to_limit(&mut graph, &executor, 1000, Some(5e5)).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].path, y);
}

// S6: with both keep-derivations and keep-outputs enabled, a drv/output pair
// forms an irreducible 2-cycle; the engine removes everything else and
// reports the remainder as a cycle instead of looping forever.
#[test]
fn keep_derivations_and_outputs_cycle_is_reported_not_resolved() {
    let drv = sp("00bgd045z0d4icpbc2yyz4gx48ak44lj-x.drv");
    let out = sp("00bgd045z0d4icpbc2yyz4gx48ak44lk-x");
    let free = sp("00bgd045z0d4icpbc2yyz4gx48ak44ll-free");

    let store = Arc::new(
        MockStore::builder()
            .with_path(free.clone(), 50, [])
            .with_path(drv.clone(), 10, [])
            .with_path(out.clone(), 10, [])
            .with_derivation_outputs(drv.clone(), [out.clone()])
            .with_gc_keep_derivations(true)
            .with_gc_keep_outputs(true)
            .build(),
    );

    let executor = inline_executor();
    let mut graph = GarbageGraph::build(store, &executor, no_penalties_config(false)).unwrap();
    assert_eq!(graph.pseudo_root_count(), 1); // only `free`; drv/out hold each other

    let removed = remove_to_limit(&mut graph, &executor, 1_000_000, None).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].path, free);

    assert_eq!(graph.node_count(), 2);
    assert!(graph.find_cycle().is_some());
}

// S7: under `collect_substitutable == "only"`, non-substitutable leaves
// never become eviction candidates even once their in-degree reaches zero.
#[test]
fn only_substitutable_filter_strands_non_substitutable_leaves() {
    let sub_leaf = sp("00bgd045z0d4icpbc2yyz4gx48ak44lm-sub");
    let other_leaf = sp("00bgd045z0d4icpbc2yyz4gx48ak44ln-other");

    let store = Arc::new(
        MockStore::builder()
            .with_path(sub_leaf.clone(), 10, [])
            .with_path(other_leaf.clone(), 10, [])
            .with_substitutable(sub_leaf.clone())
            .build(),
    );

    let config = GraphConfig {
        limit_unit: QuantityUnit::Bytes,
        inherit_atime: false,
        penalties: Penalties::default(),
        filters: ClassFilters {
            substitutable: ClassFilter::Only,
            ..ClassFilters::default()
        },
    };

    let executor = inline_executor();
    let mut graph = GarbageGraph::build(store, &executor, config).unwrap();

    let removed = remove_to_limit(&mut graph, &executor, 1_000_000, None).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].path, sub_leaf);

    // `other_leaf` reached in-degree zero but was never collection_allowed,
    // so it was never pushed and is still sitting in the graph.
    assert_eq!(graph.node_count(), 1);
}

/// A store whose every method panics, for proving that configuration
/// validation short-circuits before any store access (S8).
struct PanicStore;

impl StoreAdapter for PanicStore {
    fn collect_garbage(&self, _action: GcAction) -> Result<GcResult, GcError> {
        panic!("store must not be queried when config validation fails")
    }

    fn topo_sort_paths(&self, _paths: &BTreeSet<StorePath>) -> Result<Vec<StorePath>, GcError> {
        panic!("store must not be queried when config validation fails")
    }

    fn query_path_info(&self, _path: &StorePath) -> Result<Option<PathInfo>, GcError> {
        panic!("store must not be queried when config validation fails")
    }

    fn query_substitutable_paths(
        &self,
        _paths: &BTreeSet<StorePath>,
    ) -> Result<BTreeSet<StorePath>, GcError> {
        panic!("store must not be queried when config validation fails")
    }

    fn query_derivation_outputs(
        &self,
        _drv_path: &StorePath,
    ) -> Result<BTreeSet<StorePath>, GcError> {
        panic!("store must not be queried when config validation fails")
    }

    fn nix_store_path(&self) -> &str {
        panic!("store must not be queried when config validation fails")
    }

    fn gc_keep_derivations(&self) -> bool {
        panic!("store must not be queried when config validation fails")
    }

    fn gc_keep_outputs(&self) -> bool {
        panic!("store must not be queried when config validation fails")
    }
}

// S8: `--only-invalid --only-drvs` (or any two `only` filters together) is
// rejected before the store is ever touched.
#[test]
fn conflicting_only_filters_rejected_before_store_access() {
    use nix_heuristic_gc::orchestrate::Config;

    let config = Config {
        limit: "1000".parse().unwrap(),
        threads: Some(0),
        dry_run: true,
        inherit_atime: false,
        penalties: Penalties::default(),
        w_exceeding_limit: None,
        filters: ClassFilters {
            invalid: ClassFilter::Only,
            drvs: ClassFilter::Only,
            ..ClassFilters::default()
        },
    };

    let store: Arc<dyn StoreAdapter> = Arc::new(PanicStore);
    let result = nix_heuristic_gc::orchestrate::run(store, &config);
    assert!(matches!(result, Err(GcError::Config(_))));
}
