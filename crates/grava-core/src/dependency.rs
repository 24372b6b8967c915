//! Dependency declarations: the requested module, version selector,
//! transitivity and force flags, and per-declaration exclude rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{ModuleId, ModuleVersionId};

/// Wildcard marker accepted in either field of an [`ExcludeRule`].
pub const WILDCARD: &str = "*";

/// A pattern that removes a module from consideration along a dependency path.
///
/// Either field may be `"*"` to match any group or any name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExcludeRule {
    pub group: String,
    pub name: String,
}

impl ExcludeRule {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Exclude every artifact in a group.
    pub fn group(group: impl Into<String>) -> Self {
        Self::new(group, WILDCARD)
    }

    /// Whether this rule matches the given module.
    pub fn matches(&self, id: &ModuleId) -> bool {
        (self.group == WILDCARD || self.group == id.group)
            && (self.name == WILDCARD || self.name == id.name)
    }

    /// Whether this rule names exactly one module (no wildcards).
    pub fn is_exact(&self) -> bool {
        self.group != WILDCARD && self.name != WILDCARD
    }
}

impl fmt::Display for ExcludeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// A dependency declaration: the requested shape of one edge in the graph.
///
/// This is the "selector" the engine resolves: which module, which version
/// constraint, whether transitive dependencies are carried, whether this
/// declaration forces its version in conflicts, and which modules it
/// excludes from the subtree it reaches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    pub module: ModuleId,
    /// Requested version or constraint, interpreted by the id resolver.
    pub version: String,
    #[serde(default = "default_transitive")]
    pub transitive: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub excludes: Vec<ExcludeRule>,
}

fn default_transitive() -> bool {
    true
}

impl DependencyDeclaration {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            module: ModuleId::new(group, name),
            version: version.into(),
            transitive: true,
            force: false,
            excludes: Vec::new(),
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn intransitive(mut self) -> Self {
        self.transitive = false;
        self
    }

    pub fn excluding(mut self, rule: ExcludeRule) -> Self {
        self.excludes.push(rule);
        self
    }

    /// The module version this declaration nominally requests.
    pub fn requested(&self) -> ModuleVersionId {
        ModuleVersionId {
            module: self.module.clone(),
            version: self.version.clone(),
        }
    }
}

impl fmt::Display for DependencyDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.version)
    }
}
