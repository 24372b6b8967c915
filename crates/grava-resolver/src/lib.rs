//! Dependency graph resolution engine: incremental worklist traversal,
//! version conflict resolution with eviction and restart, and a composable
//! exclude-rule filter algebra.
//!
//! The engine never performs I/O. Metadata and version lookups go through
//! the resolver traits in [`builder`]; the final graph is emitted through
//! the visitor in [`visit`]. The whole engine is single-threaded: every
//! mutation of the shared graph must be observed by subsequent worklist
//! processing, so there is no internal locking and no re-entrancy.

pub mod builder;
pub mod conflict;
pub mod filter;
pub mod graph;
mod node;
mod state;
pub mod version;
pub mod visit;
