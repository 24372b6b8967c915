//! Component metadata: the descriptor shape returned by the external
//! metadata resolver, holding named configurations of dependencies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dependency::{DependencyDeclaration, ExcludeRule};
use crate::identity::ModuleVersionId;

/// The default configuration name, used when a declaration does not map to
/// a more specific target configuration.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// A named bucket of dependencies and exclude rules within a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationMetadata {
    pub name: String,
    pub dependencies: Vec<DependencyDeclaration>,
    /// Exclude rules applied to everything reachable through this configuration.
    pub excludes: Vec<ExcludeRule>,
    /// Whether dependencies of this configuration carry their own dependencies.
    pub transitive: bool,
}

impl ConfigurationMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            excludes: Vec::new(),
            transitive: true,
        }
    }

    pub fn with_dependency(mut self, dependency: DependencyDeclaration) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_exclude(mut self, rule: ExcludeRule) -> Self {
        self.excludes.push(rule);
        self
    }

    pub fn intransitive(mut self) -> Self {
        self.transitive = false;
        self
    }
}

/// The full resolved descriptor of one module version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub id: ModuleVersionId,
    configurations: BTreeMap<String, ConfigurationMetadata>,
}

impl ComponentMetadata {
    pub fn new(id: ModuleVersionId) -> Self {
        Self {
            id,
            configurations: BTreeMap::new(),
        }
    }

    pub fn with_configuration(mut self, configuration: ConfigurationMetadata) -> Self {
        self.configurations
            .insert(configuration.name.clone(), configuration);
        self
    }

    /// Shorthand for a component with a single `default` configuration
    /// holding the given dependencies.
    pub fn with_default_dependencies(self, dependencies: Vec<DependencyDeclaration>) -> Self {
        let mut configuration = ConfigurationMetadata::new(DEFAULT_CONFIGURATION);
        configuration.dependencies = dependencies;
        self.with_configuration(configuration)
    }

    pub fn configuration(&self, name: &str) -> Option<&ConfigurationMetadata> {
        self.configurations.get(name)
    }

    pub fn configuration_names(&self) -> impl Iterator<Item = &str> {
        self.configurations.keys().map(String::as_str)
    }
}
