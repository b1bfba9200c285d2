//! A heuristic garbage collector for a content-addressed package store.
//!
//! Given a store's current dead-set, this crate builds an augmented
//! dependency graph, scores every removable path by a weighted combination
//! of recency, size, inode count, substitutability and validity, and evicts
//! the cheapest candidates until a user-supplied reclamation budget is met
//! (or no more candidates remain). See [`orchestrate::run`] for the single
//! entry point that ties the pieces below together; the rest of the crate
//! is usable standalone by an embedder that wants finer control.

pub mod engine;
pub mod error;
pub mod executor;
pub mod fs_stat;
pub mod graph;
pub mod node;
pub mod orchestrate;
pub mod quantity;
pub mod store;
pub mod weights;
