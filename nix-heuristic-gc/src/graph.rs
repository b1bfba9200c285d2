//! Constructs the augmented dependency graph over a store's dead-set (§4.7).
//!
//! Grounded on the reference `GarbageGraph.__init__`, reimplemented over
//! [`petgraph::stable_graph::StableDiGraph`] (following the tombstoned-slot
//! pattern `ClosureValidator` uses for its own digest-indexed directory
//! graph) so that node handles stay valid once the eviction engine starts
//! removing nodes.
//!
//! Per-node lazy attributes (filesystem stats, substitutability) are
//! computed as plain owned values by [`Executor::map`], then written back
//! into the corresponding [`Node`]s on the calling thread -- see the note on
//! [`Node`] about why this keeps `Node` itself single-threaded.

use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use nix_compat::store_path::StorePath;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use tracing::{debug, info, warn};

use crate::error::GcError;
use crate::executor::{AnyExecutor, Executor};
use crate::fs_stat::{path_stat_agg, StatAgg};
use crate::node::{ClassFilters, Node, Penalties};
use crate::quantity::QuantityUnit;
use crate::store::{GcAction, StoreAdapter};

/// Edge labels (§3). Direction `a -> b` means "removing `a` may enable
/// removing `b`"; in-degree counts remaining referrers holding a node back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Reference,
    OutputDrv,
    DrvOutput,
}

/// A `(score, node_index)` heap entry. Ties break on `index` for
/// determinism across runs (§9).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapEntry {
    pub score: f64,
    pub index: NodeIndex,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want the lowest score first, so the
        // comparison is reversed. Scores can never be NaN: every penalty
        // term is a sum/product of finite values, and the only divisions
        // (inodes_score, size_score) carry a `+1` guard (§4.5).
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Configuration translated from CLI/friendly weights at orchestration time
/// (§4.9, §4.11).
#[derive(Clone)]
pub struct GraphConfig {
    pub limit_unit: QuantityUnit,
    pub inherit_atime: bool,
    pub penalties: Penalties,
    pub filters: ClassFilters,
}

/// Owned inputs for scoring one candidate node, handed to the executor.
struct ScoreJob {
    index: NodeIndex,
    path: StorePath,
    valid: bool,
    is_drv: bool,
    known_substitutable: Option<bool>,
}

/// Owned outputs of scoring one candidate node, written back serially. The
/// score itself is computed afterward, on the node, once these are cached
/// (`Node::score` needs `effective_max_atime`, which depends on
/// `inherited_max_atime`, a value only the control thread ever mutates).
struct ScoreResult {
    index: NodeIndex,
    fs_stat: StatAgg,
    substitutable: Option<bool>,
}

/// The dependency DAG (or, with both keep-flags set, graph-with-cycles) of
/// dead paths, plus the min-heap of currently removable nodes.
pub struct GarbageGraph {
    store: Arc<dyn StoreAdapter>,
    store_dir: String,
    config: GraphConfig,

    graph: StableDiGraph<Node, EdgeType>,
    path_index: HashMap<StorePath, NodeIndex>,
    in_degree: HashMap<NodeIndex, usize>,
    heap: BinaryHeap<HeapEntry>,

    /// Store entries whose name could not even be parsed into a
    /// [`StorePath`] (§3). Never enter the graph.
    pub very_invalid_paths: Vec<String>,
}

impl GarbageGraph {
    /// Builds the graph from the store's current dead-set (§4.7).
    pub fn build(
        store: Arc<dyn StoreAdapter>,
        executor: &AnyExecutor,
        config: GraphConfig,
    ) -> Result<Self, GcError> {
        if store.gc_keep_derivations() && store.gc_keep_outputs() {
            warn!(
                "both keep-derivations and keep-outputs are enabled in the nix \
                 configuration; this will likely not work very well due to \
                 reference loops"
            );
        }

        info!("querying dead paths");
        let dead = store.collect_garbage(GcAction::ReturnDead)?;

        let mut very_invalid_paths = Vec::new();
        let mut dead_set = BTreeSet::new();
        for raw in &dead.paths {
            let name = raw.rsplit('/').next().unwrap_or(raw);
            match name.parse::<StorePath>() {
                Ok(sp) => {
                    dead_set.insert(sp);
                }
                Err(_) => very_invalid_paths.push(raw.clone()),
            }
        }
        info!(
            dead_count = dead_set.len(),
            very_invalid_count = very_invalid_paths.len(),
            "dead-set parsed"
        );

        info!("topologically sorting paths");
        let sorted = store.topo_sort_paths(&dead_set)?;

        let mut graph = StableDiGraph::new();
        let mut path_index = HashMap::new();
        let mut in_degree = HashMap::new();

        info!("building graph");
        // Reverse (leaves first): guarantees a referee already has a node by
        // the time we look at edges pointing to it (§4.7 step 4, §5).
        for store_path in sorted.into_iter().rev() {
            let path_info = store.query_path_info(&store_path)?;
            let node = Node::new(store_path.clone(), path_info.as_ref().map(|i| i.nar_size));
            let index = graph.add_node(node);
            path_index.insert(store_path.clone(), index);
            in_degree.insert(index, 0);

            if let Some(info) = path_info {
                for referee in &info.references {
                    if referee == &store_path {
                        debug!(path = %store_path, "omitting self-referencing edge");
                        continue;
                    }
                    if let Some(&referee_index) = path_index.get(referee) {
                        graph.add_edge(index, referee_index, EdgeType::Reference);
                        *in_degree.get_mut(&referee_index).unwrap() += 1;
                    }
                    // else: referenced path isn't in the dead-set; it cannot
                    // constrain anyone's removal, so it's ignored.
                }
            }
        }

        if store.gc_keep_derivations() || store.gc_keep_outputs() {
            info!("populating output-drv / drv-output edges");
            let drv_paths: Vec<(StorePath, NodeIndex)> = path_index
                .iter()
                .filter(|(p, _)| p.is_derivation())
                .map(|(p, &i)| (p.clone(), i))
                .collect();

            for (drv_path, drv_index) in drv_paths {
                let outputs = store.query_derivation_outputs(&drv_path)?;
                for output in outputs {
                    if let Some(&output_index) = path_index.get(&output) {
                        if store.gc_keep_derivations() {
                            graph.add_edge(output_index, drv_index, EdgeType::OutputDrv);
                            *in_degree.get_mut(&drv_index).unwrap() += 1;
                        }
                        if store.gc_keep_outputs() {
                            graph.add_edge(drv_index, output_index, EdgeType::DrvOutput);
                            *in_degree.get_mut(&output_index).unwrap() += 1;
                        }
                    }
                }
            }
        }

        debug!("gathering nodes for heap");
        let pseudo_roots: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&i, _)| i)
            .collect();
        info!(
            node_count = graph.node_count(),
            pseudo_root_count = pseudo_roots.len(),
            very_invalid_count = very_invalid_paths.len(),
            "graph constructed"
        );

        let mut bulk_substitutable = None;
        if config.penalties.substitutable.is_some() {
            info!("bulk querying path substitutability");
            let candidate_paths: BTreeSet<StorePath> = pseudo_roots
                .iter()
                .filter_map(|&i| graph.node_weight(i))
                .filter(|n| n.valid())
                .map(|n| n.path.clone())
                .collect();
            bulk_substitutable = Some(store.query_substitutable_paths(&candidate_paths)?);
        }

        let store_dir = store.nix_store_path().to_string();
        let mut result = GarbageGraph {
            store,
            store_dir,
            config,
            graph,
            path_index,
            in_degree,
            heap: BinaryHeap::new(),
            very_invalid_paths,
        };

        info!("constructing heap");
        result.push_candidates(executor, pseudo_roots, bulk_substitutable.as_ref());

        Ok(result)
    }

    /// Computes scores for `candidates` (in parallel via `executor`) and
    /// pushes the `collection_allowed` ones onto the heap (§4.7 steps 8-9,
    /// §4.8 step 5). `bulk_substitutable`, if given, is consulted before
    /// falling back to a one-by-one query for nodes not covered by it (Open
    /// Question (c)).
    fn push_candidates(
        &mut self,
        executor: &AnyExecutor,
        candidates: Vec<NodeIndex>,
        bulk_substitutable: Option<&BTreeSet<StorePath>>,
    ) {
        let need_substitutable =
            self.config.penalties.substitutable.is_some() || self.config.filters.substitutable.needs_predicate();

        let jobs: Vec<ScoreJob> = candidates
            .into_iter()
            .map(|i| {
                let node = self.node(i);
                let known_substitutable = if !need_substitutable {
                    None
                } else if let Some(set) = bulk_substitutable {
                    Some(set.contains(&node.path))
                } else {
                    None
                };
                ScoreJob {
                    index: i,
                    path: node.path.clone(),
                    valid: node.valid(),
                    is_drv: node.is_drv(),
                    known_substitutable,
                }
            })
            .collect();

        let store_dir = self.store_dir.clone();
        let store = self.store.clone();

        let results = executor.map(jobs, move |job| {
            let abs = Path::new(&store_dir).join(job.path.to_string());
            let fs_stat = path_stat_agg(&abs);

            let substitutable = if !need_substitutable {
                None
            } else if let Some(known) = job.known_substitutable {
                Some(known)
            } else if !job.valid {
                Some(false)
            } else {
                let single: BTreeSet<StorePath> = [job.path.clone()].into();
                Some(
                    store
                        .query_substitutable_paths(&single)
                        .map(|s| s.contains(&job.path))
                        .unwrap_or(false),
                )
            };

            ScoreResult {
                index: job.index,
                fs_stat,
                substitutable,
            }
        });

        let unit = self.config.limit_unit;
        let inherit_atime = self.config.inherit_atime;
        let penalties = self.config.penalties;
        let filters = self.config.filters;

        for result in results {
            let node = self.node(result.index);
            node.set_fs_stat(result.fs_stat);
            if let Some(sub) = result.substitutable {
                node.set_substitutable(sub);
            }
            if node.collection_allowed(&filters) {
                let score = node.score(unit, inherit_atime, &penalties);
                self.heap.push(HeapEntry {
                    score,
                    index: result.index,
                });
            }
        }
    }

    fn node(&self, index: NodeIndex) -> &Node {
        self.graph.node_weight(index).expect("node must exist")
    }

    /// Direct out-neighbours of `index` (dedup'd), per §4.8 step 2.
    fn out_neighbours(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        self.graph
            .neighbors_directed(index, Direction::Outgoing)
            .filter(|n| seen.insert(*n))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn heap_peek(&self) -> Option<&HeapEntry> {
        self.heap.peek()
    }

    pub fn heap_is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    /// Replaces the current root with `entry` (§4.8
    /// `correct_heap_root_for_limit_excess`): pops whatever is at the root
    /// -- assumed to be the same node `entry` was derived from, corrected --
    /// and pushes `entry` in its place. The caller re-peeks afterward to see
    /// whether `entry` still surfaces as the root.
    pub fn heap_push_pop(&mut self, entry: HeapEntry) {
        self.heap.pop();
        self.heap.push(entry);
    }

    /// Pops the lowest-scoring candidate, removes it from the graph,
    /// propagates inherited atime, and pushes newly-exposed pseudo-roots
    /// (§4.8 `remove_heap_root`).
    pub fn remove_heap_root(&mut self, executor: &AnyExecutor) -> Result<Node, GcError> {
        let entry = self
            .heap
            .pop()
            .ok_or_else(|| GcError::Internal("remove_heap_root called on empty heap".into()))?;

        let removed_index = entry.index;
        let out_neighbours = self.out_neighbours(removed_index);

        let removed_node = self
            .graph
            .remove_node(removed_index)
            .expect("heap entries always reference live nodes");
        self.path_index.remove(&removed_node.path);
        self.in_degree.remove(&removed_index);

        if self.config.inherit_atime {
            let removed_atime = removed_node.effective_max_atime(true);
            for &n in &out_neighbours {
                if let Some(node) = self.graph.node_weight(n) {
                    node.inherit_max_atime(removed_atime);
                }
            }
        }

        // Re-derive in-degree from the graph itself rather than decrementing
        // once per dedup'd out-neighbour: `remove_node` above already dropped
        // every edge the removed node held, including any parallel ones (e.g.
        // a `Reference` and a `DrvOutput` both connecting the same ordered
        // pair), so a per-edge decrement here would under-count compared to
        // the per-edge increment done at build time.
        let mut newly_exposed = Vec::new();
        for &n in &out_neighbours {
            if self.in_degree.contains_key(&n) {
                let actual = self.graph.neighbors_directed(n, Direction::Incoming).count();
                self.in_degree.insert(n, actual);
                if actual == 0 {
                    newly_exposed.push(n);
                }
            }
        }

        self.push_candidates(executor, newly_exposed, None);

        Ok(removed_node)
    }

    /// The first detected cycle among the nodes still in the graph, as a
    /// path list, for diagnostics (§4.8 `remove_to_limit`). `None` if the
    /// remaining graph is acyclic.
    pub fn find_cycle(&self) -> Option<Vec<StorePath>> {
        use petgraph::visit::{depth_first_search, DfsEvent};

        let mut back_edge: Option<(NodeIndex, NodeIndex)> = None;
        let _ = depth_first_search(&self.graph, self.graph.node_indices(), |event| {
            if let DfsEvent::BackEdge(a, b) = event {
                back_edge = Some((a, b));
            }
        });

        back_edge.map(|(a, b)| vec![self.node(a).path.clone(), self.node(b).path.clone()])
    }

    pub fn pseudo_root_count(&self) -> usize {
        self.in_degree.values().filter(|&&d| d == 0).count()
    }

    /// The budget unit's measurement for `index` (used by the
    /// overshoot-correction routine).
    pub fn limit_measurement(&self, index: NodeIndex) -> u64 {
        self.node(index).limit_measurement(self.config.limit_unit)
    }

    pub fn score_of(&self, index: NodeIndex) -> f64 {
        self.node(index)
            .score(self.config.limit_unit, self.config.inherit_atime, &self.config.penalties)
    }

    /// The set of paths currently present as nodes, for equality checks
    /// between independently built graphs (property 6, §8).
    pub fn paths(&self) -> BTreeSet<StorePath> {
        self.path_index.keys().cloned().collect()
    }

    /// The edge set as `(referrer, referee, label)` triples, for the same
    /// purpose as [`GarbageGraph::paths`].
    pub fn edges(&self) -> BTreeSet<(StorePath, StorePath, &'static str)> {
        self.graph
            .edge_indices()
            .map(|e| {
                let (a, b) = self.graph.edge_endpoints(e).expect("edge index is valid");
                let label = match self.graph[e] {
                    EdgeType::Reference => "reference",
                    EdgeType::OutputDrv => "output_drv",
                    EdgeType::DrvOutput => "drv_output",
                };
                (self.node(a).path.clone(), self.node(b).path.clone(), label)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nix_compat::store_path::StorePath;

    use crate::executor::AnyExecutor;
    use crate::node::{ClassFilters, Penalties};
    use crate::quantity::QuantityUnit;
    use crate::store::MockStore;

    use super::{GarbageGraph, GraphConfig};

    fn sp(s: &str) -> StorePath {
        s.parse().unwrap()
    }

    fn config() -> GraphConfig {
        GraphConfig {
            limit_unit: QuantityUnit::Bytes,
            inherit_atime: false,
            penalties: Penalties::default(),
            filters: ClassFilters::default(),
        }
    }

    // Property 7: a path that references itself never gets a self-edge, and
    // stays a pseudo-root (its own in-degree is never incremented for it).
    #[test]
    fn self_reference_is_dropped() {
        let p = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-self");
        let store = Arc::new(MockStore::builder().with_path(p.clone(), 10, [p.clone()]).build());

        let executor = AnyExecutor::from_thread_count(Some(0));
        let graph = GarbageGraph::build(store, &executor, config()).unwrap();

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.pseudo_root_count(), 1);
        assert!(graph.edges().is_empty());
    }

    // Property 6: building the graph twice from identical store state
    // produces equal node-sets and edge-sets.
    #[test]
    fn build_is_idempotent() {
        let a = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-a");
        let b = sp("00bgd045z0d4icpbc2yyz4gx48ak44lb-b");

        let build_store = || {
            Arc::new(
                MockStore::builder()
                    .with_path(a.clone(), 10, [])
                    .with_path(b.clone(), 10, [a.clone()])
                    .build(),
            )
        };

        let executor = AnyExecutor::from_thread_count(Some(0));
        let g1 = GarbageGraph::build(build_store(), &executor, config()).unwrap();
        let g2 = GarbageGraph::build(build_store(), &executor, config()).unwrap();

        assert_eq!(g1.paths(), g2.paths());
        assert_eq!(g1.edges(), g2.edges());
        assert_eq!(g1.pseudo_root_count(), g2.pseudo_root_count());
    }

    // §3: a dead-set entry whose name can't even be parsed into a StorePath
    // never becomes a node; it's reported separately.
    #[test]
    fn unparseable_names_are_set_aside() {
        let p = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-ok");
        let store = Arc::new(
            MockStore::builder()
                .with_path(p, 10, [])
                .with_unparseable_dead_name("not-a-store-path-at-all")
                .build(),
        );

        let executor = AnyExecutor::from_thread_count(Some(0));
        let graph = GarbageGraph::build(store, &executor, config()).unwrap();

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.very_invalid_paths.len(), 1);
    }

    // §4.7 step 5: a reference to a path outside the dead-set is ignored --
    // it neither gets an edge nor inflates in-degree.
    #[test]
    fn reference_outside_dead_set_is_ignored() {
        let live = sp("00bgd045z0d4icpbc2yyz4gx48ak44la-live");
        let dead = sp("00bgd045z0d4icpbc2yyz4gx48ak44lb-dead");

        let store = Arc::new(MockStore::builder().with_path(dead.clone(), 10, [live]).build());

        let executor = AnyExecutor::from_thread_count(Some(0));
        let graph = GarbageGraph::build(store, &executor, config()).unwrap();

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.pseudo_root_count(), 1);
        assert!(graph.edges().is_empty());
    }
}
