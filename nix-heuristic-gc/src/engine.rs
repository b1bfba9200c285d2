//! The eviction loop proper: pops the cheapest-to-remove node repeatedly
//! until the reclamation budget is met, applying overshoot correction when
//! `w_exceeding_limit` is configured (§4.8).

use tracing::{debug, warn};

use crate::error::GcError;
use crate::executor::AnyExecutor;
use crate::graph::{GarbageGraph, HeapEntry};
use crate::node::Node;

/// Nudges the heap root's key up whenever removing it would overshoot the
/// remaining budget, so that smaller candidates get a chance to be chosen
/// first. A no-op once the root already fits, or once a correction leaves
/// the key unchanged.
fn correct_heap_root_for_limit_excess(
    graph: &mut GarbageGraph,
    limit: u64,
    limit_removed: u64,
    w_exceeding_limit: f64,
) -> Result<(), GcError> {
    let remaining = limit.saturating_sub(limit_removed);
    let bound = graph.heap_len() + 1;

    for _ in 0..bound {
        let Some(&HeapEntry { score, index }) = graph.heap_peek() else {
            return Ok(());
        };

        let m = graph.limit_measurement(index);
        if m <= remaining {
            return Ok(());
        }

        // The base must be the node's fresh, uncorrected score, not the
        // (possibly already-corrected) heap key -- otherwise a still-oversized
        // root keeps having the penalty re-added on top of itself and the
        // fixed-point check below never triggers.
        let fresh_score = graph.score_of(index);
        let corrected = fresh_score + (m - remaining) as f64 * w_exceeding_limit / limit as f64;
        if corrected == score {
            return Ok(());
        }

        debug!(
            node = index.index(),
            old_score = score,
            new_score = corrected,
            "heap root overshoots the remaining budget, correcting"
        );
        graph.heap_push_pop(HeapEntry { score: corrected, index });
    }

    Err(GcError::Internal(
        "overshoot-correction loop exceeded its iteration bound".into(),
    ))
}

/// Removes nodes (lowest score first) until the accumulated
/// `limit_measurement` reaches `limit`, or the heap empties first -- in
/// which case a warning is logged along with any detected reference cycle
/// among the paths left behind (§4.8 `remove_to_limit`).
pub fn remove_to_limit(
    graph: &mut GarbageGraph,
    executor: &AnyExecutor,
    limit: u64,
    w_exceeding_limit: Option<f64>,
) -> Result<Vec<Node>, GcError> {
    let unit = graph.config().limit_unit;
    let mut removed = Vec::new();
    let mut limit_removed: u64 = 0;

    while limit_removed < limit {
        if let Some(w) = w_exceeding_limit.filter(|&w| w != 0.0) {
            correct_heap_root_for_limit_excess(graph, limit, limit_removed, w)?;
        }

        if graph.heap_is_empty() {
            warn!(
                removed = removed.len(),
                limit_removed, limit, "heap emptied before the reclamation limit was reached"
            );
            if graph.node_count() > 0 {
                if let Some(cycle) = graph.find_cycle() {
                    warn!(
                        cycle = ?cycle.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        "remaining paths could not be removed; they may form a reference cycle"
                    );
                }
            }
            break;
        }

        let node = graph.remove_heap_root(executor)?;
        limit_removed += node.limit_measurement(unit);
        debug!(
            path = %node.path,
            limit_removed,
            limit,
            "removed node"
        );
        removed.push(node);
    }

    Ok(removed)
}
