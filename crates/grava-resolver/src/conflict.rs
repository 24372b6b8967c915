//! Version conflict batching and resolution.
//!
//! The handler collects modules with more than one discovered version and
//! resolves them one batch at a time, after the worklist drains, so that
//! breadth-first discovery can surface as many candidates as possible
//! before any winner is picked. Strategies are tried in declared order:
//! the forced-direct-dependency resolver first, then the default
//! comparator-based resolver.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::Serialize;

use grava_core::identity::ModuleVersionId;

use crate::state::ModuleKey;
use crate::version;

/// Why a module version was selected into the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionReason {
    /// The synthetic root component.
    Root,
    /// Requested directly, no conflict involved.
    Requested,
    /// Won a conflict because a direct dependency forced it.
    Forced,
    /// Won a conflict under the configured version policy.
    ConflictResolution,
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelectionReason::Root => "root",
            SelectionReason::Requested => "requested",
            SelectionReason::Forced => "forced",
            SelectionReason::ConflictResolution => "conflict resolution",
        };
        f.write_str(s)
    }
}

/// One version of a module participating in a conflict.
#[derive(Debug, Clone)]
pub struct ConflictCandidate {
    pub id: ModuleVersionId,
    /// Whether a force-flagged direct dependency of the root nominates
    /// this version.
    pub forced: bool,
}

/// Result of registering a module's versions with the handler.
#[derive(Debug, Clone, Copy)]
pub struct PotentialConflict {
    pub conflict: bool,
}

/// A pluggable conflict resolution strategy.
///
/// Strategies see the candidate list and either pick a winner or decline,
/// passing the batch to the next strategy.
pub trait ConflictResolver {
    /// The selection reason recorded when this strategy picks the winner.
    fn reason(&self) -> SelectionReason;

    /// Pick the index of the winning candidate, or `None` to decline.
    fn choose(&self, candidates: &[ConflictCandidate]) -> Option<usize>;
}

/// Honors the `force` flag on direct dependencies of the root: the first
/// candidate nominated by a root-forced selector wins.
#[derive(Debug, Default)]
pub struct ForcedVersionResolver;

impl ConflictResolver for ForcedVersionResolver {
    fn reason(&self) -> SelectionReason {
        SelectionReason::Forced
    }

    fn choose(&self, candidates: &[ConflictCandidate]) -> Option<usize> {
        candidates.iter().position(|c| c.forced)
    }
}

/// Picks the highest version under a pluggable comparator. Always chooses.
pub struct LatestVersionResolver {
    comparator: fn(&str, &str) -> Ordering,
}

impl LatestVersionResolver {
    pub fn new() -> Self {
        Self {
            comparator: version::compare_versions,
        }
    }

    pub fn with_comparator(comparator: fn(&str, &str) -> Ordering) -> Self {
        Self { comparator }
    }
}

impl Default for LatestVersionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver for LatestVersionResolver {
    fn reason(&self) -> SelectionReason {
        SelectionReason::ConflictResolution
    }

    fn choose(&self, candidates: &[ConflictCandidate]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let mut best = 0;
        for (i, candidate) in candidates.iter().enumerate().skip(1) {
            let ord = (self.comparator)(&candidate.id.version, &candidates[best].id.version);
            if ord == Ordering::Greater {
                best = i;
            }
        }
        Some(best)
    }
}

/// Batches conflicting modules and applies the strategy chain.
pub struct ConflictHandler {
    resolvers: Vec<Box<dyn ConflictResolver>>,
    pending: VecDeque<ModuleKey>,
    queued: HashSet<ModuleKey>,
}

impl ConflictHandler {
    /// Handler with the default chain: forced versions first, then
    /// highest version wins.
    pub fn new() -> Self {
        Self::with_resolvers(vec![
            Box::new(ForcedVersionResolver),
            Box::new(LatestVersionResolver::new()),
        ])
    }

    pub fn with_resolvers(resolvers: Vec<Box<dyn ConflictResolver>>) -> Self {
        Self {
            resolvers,
            pending: VecDeque::new(),
            queued: HashSet::new(),
        }
    }

    /// Register the current version count of a module. A module with more
    /// than one known version is in conflict and is queued for resolution
    /// (idempotently).
    pub(crate) fn register_module(
        &mut self,
        module: ModuleKey,
        version_count: usize,
    ) -> PotentialConflict {
        let conflict = version_count > 1;
        if conflict && self.queued.insert(module) {
            self.pending.push_back(module);
        }
        PotentialConflict { conflict }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn take_next(&mut self) -> Option<ModuleKey> {
        let module = self.pending.pop_front()?;
        self.queued.remove(&module);
        Some(module)
    }

    /// Apply the strategy chain to a candidate batch.
    ///
    /// Panics if no strategy chooses; the default chain always terminates
    /// with [`LatestVersionResolver`], so this only fires on a custom chain
    /// that declines a non-empty batch.
    pub(crate) fn select(&self, candidates: &[ConflictCandidate]) -> (usize, SelectionReason) {
        for resolver in &self.resolvers {
            if let Some(winner) = resolver.choose(candidates) {
                return (winner, resolver.reason());
            }
        }
        panic!("no conflict resolver chose a winner among {candidates:?}");
    }
}

impl Default for ConflictHandler {
    fn default() -> Self {
        Self::new()
    }
}
