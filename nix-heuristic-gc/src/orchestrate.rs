//! Ties the engine together end to end (§4.9): builds the graph with
//! configured weights, runs the eviction loop to the requested limit, and
//! hands the chosen set to the store for deletion (or reports it, dry-run).
//!
//! This module owns the one validated `Config` the CLI binary constructs
//! from arguments (§4.11); the graph/engine modules never see raw flags.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::engine::remove_to_limit;
use crate::error::{ConfigError, GcError};
use crate::executor::AnyExecutor;
use crate::graph::GarbageGraph;
use crate::node::{ClassFilter, ClassFilters, Node, Penalties};
use crate::quantity::Quantity;
use crate::store::{GcAction, StoreAdapter};

/// A fully validated run configuration: CLI flags, translated from friendly
/// weights into the internal floats the scoring formula uses (§4.5), plus
/// the store-independent knobs (§4.11).
#[derive(Clone)]
pub struct Config {
    pub limit: Quantity,
    pub threads: Option<usize>,
    pub dry_run: bool,
    pub inherit_atime: bool,
    pub penalties: Penalties,
    pub w_exceeding_limit: Option<f64>,
    pub filters: ClassFilters,
}

impl Config {
    /// Checks the cross-field invariants that aren't already enforced by the
    /// type of an individual field (§4.6, §4.11): at most one collection
    /// class may be restricted to `"only"`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let only_flags: Vec<&'static str> = [
            ("invalid", self.filters.invalid),
            ("drvs", self.filters.drvs),
            ("substitutable", self.filters.substitutable),
        ]
        .into_iter()
        .filter(|(_, f)| *f == ClassFilter::Only)
        .map(|(name, _)| name)
        .collect();

        if only_flags.len() > 1 {
            return Err(ConfigError::MultipleOnlyFlags(
                only_flags[0],
                only_flags[1],
            ));
        }

        Ok(())
    }
}

/// The outcome of a full run: what was selected, and what the store reported
/// back about the dead-set's unparseable entries.
pub struct RunSummary {
    pub removed: Vec<Node>,
    pub very_invalid_paths: Vec<String>,
    pub total_measurement: u64,
    pub bytes_freed: Option<u64>,
}

/// Runs one full GC pass: build the graph, evict to the limit, and either
/// print the selection (dry-run) or delegate deletion to the store.
pub fn run(store: Arc<dyn StoreAdapter>, config: &Config) -> Result<RunSummary, GcError> {
    config.validate()?;

    info!(
        limit = %config.limit,
        dry_run = config.dry_run,
        "starting heuristic garbage collection"
    );

    let executor = AnyExecutor::from_thread_count(config.threads);

    let graph_config = crate::graph::GraphConfig {
        limit_unit: config.limit.unit,
        inherit_atime: config.inherit_atime,
        penalties: config.penalties,
        filters: config.filters,
    };

    let mut graph = GarbageGraph::build(store.clone(), &executor, graph_config)?;
    let very_invalid_paths = graph.very_invalid_paths.clone();

    let removed = remove_to_limit(
        &mut graph,
        &executor,
        config.limit.value,
        config.w_exceeding_limit,
    )?;

    let total_measurement: u64 = removed
        .iter()
        .map(|n| n.limit_measurement(config.limit.unit))
        .sum();

    info!(
        count = removed.len(),
        total_measurement,
        unit = %config.limit.unit,
        "requesting deletion of {} store paths",
        removed.len()
    );

    let bytes_freed = if config.dry_run {
        let store_dir = store.nix_store_path();
        for node in &removed {
            println!("{store_dir}/{}", node.path);
        }
        None
    } else {
        let paths: BTreeSet<_> = removed.iter().map(|n| n.path.clone()).collect();
        let result = store.collect_garbage(GcAction::DeleteSpecific(paths))?;
        info!(bytes_freed = result.bytes_freed, "deletion complete");
        Some(result.bytes_freed)
    };

    Ok(RunSummary {
        removed,
        very_invalid_paths,
        total_measurement,
        bytes_freed,
    })
}
