#![deny(unsafe_code)]
//! # ripple-graph
//!
//! In-memory typed directed multigraph of services and their dependencies.
//!
//! An edge `source -> target` means `source` depends on `target`; impact
//! therefore flows *upstream* (against edge direction) when a target breaks.
//! The graph supports bidirectional neighborhood queries, bounded impact
//! traversal, shortest path, JSON export/import, YAML config import, and
//! non-destructive merging of multiple provenance layers.
//!
//! The structure itself is not internally locked: embedding hosts wrap it in
//! a reader-preferring lock so traversals see either the pre- or the
//! post-mutation graph, never a partial one.

pub mod config;
pub mod graph;
mod traversal;

pub use config::GraphConfig;
pub use graph::ServiceGraph;
