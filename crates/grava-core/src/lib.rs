//! Core data types for the Grava dependency resolution engine.
//!
//! This crate defines the vocabulary shared between the engine and its
//! callers: module identities, dependency declarations with version
//! selectors and exclude rules, component/configuration metadata, and the
//! unified error type.
//!
//! This crate is intentionally free of async code and network I/O.

pub mod dependency;
pub mod errors;
pub mod identity;
pub mod metadata;
