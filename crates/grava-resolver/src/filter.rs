//! The resolution filter: an immutable, composable predicate over module
//! identities representing the exclude rules accumulated along dependency
//! paths.
//!
//! `union` models "reachable via either parent path" (accepts if either
//! accepts); `intersect` models "this node's own excludes apply on top"
//! (accepts only if both accept). `accepts_same_modules` is an equivalence
//! test used purely as a re-traversal short-circuit: it must never claim
//! two filters equivalent when they are not, while a missed equivalence
//! only costs a redundant re-traversal.

use std::sync::Arc;

use grava_core::dependency::ExcludeRule;
use grava_core::identity::ModuleId;

/// An immutable predicate over module identities.
///
/// Cheap to clone; `union` and `intersect` return new filters and never
/// mutate in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFilter {
    spec: FilterSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterSpec {
    /// Accepts every module.
    AcceptAll,
    /// Rejects a module if any rule matches it. Rules are sorted and
    /// deduplicated so structural equality is canonical.
    Excludes(Arc<Vec<ExcludeRule>>),
    /// Accepts if any branch accepts.
    AnyOf(Arc<Vec<FilterSpec>>),
    /// Accepts only if every branch accepts.
    AllOf(Arc<Vec<FilterSpec>>),
}

impl ModuleFilter {
    /// The starting filter: accepts every module.
    pub fn accept_all() -> Self {
        Self {
            spec: FilterSpec::AcceptAll,
        }
    }

    /// Compile a set of exclude rules into a filter rejecting exactly the
    /// modules matched by any of them.
    pub fn excluding(rules: &[ExcludeRule]) -> Self {
        if rules.is_empty() {
            return Self::accept_all();
        }
        let mut rules = rules.to_vec();
        rules.sort();
        rules.dedup();
        Self {
            spec: FilterSpec::Excludes(Arc::new(rules)),
        }
    }

    pub fn accepts(&self, id: &ModuleId) -> bool {
        self.spec.accepts(id)
    }

    /// Accepts a module if either filter accepts it.
    pub fn union(&self, other: &ModuleFilter) -> ModuleFilter {
        if self.spec == other.spec {
            return self.clone();
        }
        let spec = match (&self.spec, &other.spec) {
            (FilterSpec::AcceptAll, _) | (_, FilterSpec::AcceptAll) => FilterSpec::AcceptAll,
            (FilterSpec::Excludes(a), FilterSpec::Excludes(b))
                if a.iter().all(ExcludeRule::is_exact) && b.iter().all(ExcludeRule::is_exact) =>
            {
                // With exact rules, a module is rejected by both sides only
                // if the same rule appears in both sets.
                let common: Vec<ExcludeRule> =
                    a.iter().filter(|r| b.contains(r)).cloned().collect();
                if common.is_empty() {
                    FilterSpec::AcceptAll
                } else {
                    FilterSpec::Excludes(Arc::new(common))
                }
            }
            _ => FilterSpec::AnyOf(Arc::new(flatten_any(&self.spec, &other.spec))),
        };
        ModuleFilter { spec }
    }

    /// Accepts a module only if both filters accept it.
    pub fn intersect(&self, other: &ModuleFilter) -> ModuleFilter {
        if self.spec == other.spec {
            return self.clone();
        }
        let spec = match (&self.spec, &other.spec) {
            (FilterSpec::AcceptAll, s) | (s, FilterSpec::AcceptAll) => s.clone(),
            (FilterSpec::Excludes(a), FilterSpec::Excludes(b)) => {
                let mut merged: Vec<ExcludeRule> = a.iter().chain(b.iter()).cloned().collect();
                merged.sort();
                merged.dedup();
                FilterSpec::Excludes(Arc::new(merged))
            }
            _ => FilterSpec::AllOf(Arc::new(flatten_all(&self.spec, &other.spec))),
        };
        ModuleFilter { spec }
    }

    /// Whether this filter accepts exactly the same set of modules as
    /// `other`. Sound but incomplete: structurally different filters with
    /// the same predicate compare unequal, which only costs performance.
    pub fn accepts_same_modules(&self, other: &ModuleFilter) -> bool {
        self.spec == other.spec
    }
}

impl FilterSpec {
    fn accepts(&self, id: &ModuleId) -> bool {
        match self {
            FilterSpec::AcceptAll => true,
            FilterSpec::Excludes(rules) => !rules.iter().any(|r| r.matches(id)),
            FilterSpec::AnyOf(branches) => branches.iter().any(|b| b.accepts(id)),
            FilterSpec::AllOf(branches) => branches.iter().all(|b| b.accepts(id)),
        }
    }
}

fn flatten_any(a: &FilterSpec, b: &FilterSpec) -> Vec<FilterSpec> {
    let mut branches = Vec::new();
    for spec in [a, b] {
        match spec {
            FilterSpec::AnyOf(inner) => branches.extend(inner.iter().cloned()),
            other => branches.push(other.clone()),
        }
    }
    branches.dedup();
    branches
}

fn flatten_all(a: &FilterSpec, b: &FilterSpec) -> Vec<FilterSpec> {
    let mut branches = Vec::new();
    for spec in [a, b] {
        match spec {
            FilterSpec::AllOf(inner) => branches.extend(inner.iter().cloned()),
            other => branches.push(other.clone()),
        }
    }
    branches.dedup();
    branches
}
