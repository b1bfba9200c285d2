//! Error taxonomy for the collector.
//!
//! Every fallible operation in this crate returns [`GcError`]. The variants
//! mirror the failure modes a GC run can actually hit: bad configuration
//! (rejected before any store work happens), per-path degradations that are
//! tolerated and folded into the graph, and a small number of conditions that
//! are genuinely fatal.

use nix_compat::store_path;

/// Top-level error type for the collector.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    /// Rejected at configuration-validation time, before any store call is made.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The store reported a failure that isn't one of the tolerated,
    /// per-path cases below (e.g. a connection failure).
    #[error("unrecoverable store error: {0}")]
    Store(String),

    /// The overshoot-correction loop in the eviction engine ran past its
    /// proven bound. This can only happen if an invariant elsewhere in the
    /// engine was violated, so it is treated as a bug, not user error.
    #[error("internal assertion failed: {0}")]
    Internal(String),
}

/// Configuration errors, rejected before any store work is attempted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at most one collection-class flag may be set to \"only\"; found {0} and {1}")]
    MultipleOnlyFlags(&'static str, &'static str),

    #[error("--threads must be >= 0, got {0}")]
    NegativeThreads(i64),

    #[error("ambiguous quantity {0:?}: contains both an inode marker and a byte unit")]
    AmbiguousQuantity(String),

    #[error("could not parse quantity {0:?}: {1}")]
    InvalidQuantity(String, String),

    #[error("friendly weight strength must be in 1..=10, got {0}")]
    WeightOutOfRange(u8),
}

/// Raised while parsing a single dead-set entry into a [`store_path::StorePath`].
///
/// Not part of [`GcError`]: the graph builder catches this per-path and
/// deposits the offending path into `very_invalid_paths` rather than failing
/// the whole run (see [`crate::graph::GarbageGraph::very_invalid_paths`]).
pub type StorePathParseError = store_path::Error;
