//! The core graph algorithm: computing a configuration node's outgoing
//! edges from its accumulated incoming filters, attaching and detaching
//! edges, cascading removal, and module restart after conflict resolution.
//!
//! Everything here mutates the arena through `ResolveState`; cascades are
//! expressed through the worklist (re-enqueueing affected nodes) rather
//! than recursion, so stack depth stays bounded on deep graphs.

use std::sync::Arc;

use grava_core::errors::{ResolveError, ResolveResult};
use grava_core::metadata::ComponentMetadata;

use crate::builder::Resolvers;
use crate::conflict::SelectionReason;
use crate::filter::ModuleFilter;
use crate::state::{DependencyEdge, EdgeKey, ModuleKey, NodeKey, ResolveState, VersionKey, VersionStatus};

impl ResolveState {
    /// Compute (or recompute) a node's outgoing edges and return the newly
    /// created ones for the driver to resolve.
    ///
    /// A node owned by a non-selected version is stale and contributes
    /// nothing. A node with no transitive incoming edges (other than the
    /// root) contributes nothing either, and sheds any outgoing edges left
    /// over from an earlier traversal. Otherwise the accumulated filter is
    /// compared against the previous traversal's filter: if both accept
    /// the same module set, the existing edges are kept as-is.
    pub fn visit_outgoing_dependencies(&mut self, node: NodeKey) -> Vec<EdgeKey> {
        let version = self.node(node).version;
        if self.version(version).status != VersionStatus::Selected {
            return Vec::new();
        }

        let is_root = self.is_root(node);
        let transitive_incoming: Vec<EdgeKey> = self
            .node(node)
            .incoming
            .iter()
            .copied()
            .filter(|&edge| self.edge(edge).transitive)
            .collect();

        if transitive_incoming.is_empty() && !is_root {
            if self.node(node).previous_filter.is_some() {
                self.remove_outgoing_edges(node);
            }
            return Vec::new();
        }

        let path_filter = if is_root {
            ModuleFilter::accept_all()
        } else {
            let mut edges = transitive_incoming.iter().copied();
            let first = self.edge(edges.next().expect("non-empty")).path_filter.clone();
            edges.fold(first, |acc, edge| acc.union(&self.edge(edge).path_filter))
        };
        let own = ModuleFilter::excluding(&self.node(node).metadata.excludes);
        let filter = path_filter.intersect(&own);

        if let Some(previous) = &self.node(node).previous_filter {
            if previous.accepts_same_modules(&filter) {
                // Same reachable module set: keep the edges, but remember
                // the new filter value for artifact-level consumers.
                self.node_mut(node).previous_filter = Some(filter);
                return Vec::new();
            }
        }

        self.remove_outgoing_edges(node);

        let declarations = self.node(node).metadata.dependencies.clone();
        let source_transitive = self.node(node).metadata.transitive;
        let mut created = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            if !filter.accepts(&declaration.module) {
                tracing::trace!(
                    from = %self.node_id(node),
                    module = %declaration.module,
                    "dependency excluded by path filter"
                );
                continue;
            }
            let selector = self.get_or_create_selector(node, &declaration);
            let edge_filter = filter.intersect(&ModuleFilter::excluding(&declaration.excludes));
            let transitive = source_transitive && declaration.transitive;
            let key = EdgeKey(self.edges.len());
            self.edges.push(DependencyEdge {
                from: node,
                declaration,
                selector,
                transitive,
                path_filter: edge_filter,
                targets: Vec::new(),
                failure: None,
            });
            self.node_mut(node).outgoing.push(key);
            created.push(key);
        }
        self.node_mut(node).previous_filter = Some(filter);
        created
    }

    /// Remove every outgoing edge of a node, detaching each from its
    /// targets and dropping it from any unattached list. Clears the
    /// memoized filter so a later reselection re-traverses from scratch.
    pub fn remove_outgoing_edges(&mut self, node: NodeKey) {
        let outgoing = std::mem::take(&mut self.node_mut(node).outgoing);
        for edge in outgoing {
            self.detach_edge(edge);
            self.unpark(edge);
        }
        self.node_mut(node).previous_filter = None;
    }

    /// Detach an edge from all its target nodes, re-enqueueing each target
    /// at the front of the worklist so pruning propagates immediately.
    pub fn detach_edge(&mut self, edge: EdgeKey) {
        let targets = std::mem::take(&mut self.edge_mut(edge).targets);
        for target in targets {
            self.node_mut(target).incoming.retain(|&e| e != edge);
            self.enqueue_front(target);
        }
    }

    /// Attach an edge to the configuration nodes of its resolved target
    /// version.
    ///
    /// No-op for unresolved or failed selectors. If the target version is
    /// not (yet) selected the edge parks on the target module's unattached
    /// list instead; a later restart drains that list. Metadata or
    /// configuration-mapping failures are recorded on the edge and do not
    /// stop the run.
    pub fn attach_edge(&mut self, edge: EdgeKey, resolvers: &mut Resolvers<'_>) {
        let selector = self.edge(edge).selector;
        let version = match &self.selector(selector).resolved {
            Some(Ok(version)) => *version,
            _ => return,
        };
        let module = self.version(version).module;
        if self.version(version).status != VersionStatus::Selected {
            self.park_unattached(module, edge);
            return;
        }

        let metadata = match self.resolve_version_metadata(version, resolvers) {
            Ok(metadata) => metadata,
            Err(err) => {
                self.edge_mut(edge).failure = Some(err);
                return;
            }
        };

        let from = self.edge(edge).from;
        let declaration = self.edge(edge).declaration.clone();
        let names = {
            let source = &self.node(from).metadata;
            match resolvers.configurations.resolve(&declaration, source, &metadata) {
                Ok(names) => names,
                Err(err) => {
                    self.edge_mut(edge).failure = Some(err);
                    return;
                }
            }
        };

        for name in names {
            if metadata.configuration(&name).is_none() {
                self.edge_mut(edge).failure = Some(ResolveError::ConfigurationNotFound {
                    id: metadata.id.to_string(),
                    configuration: name,
                });
                continue;
            }
            let target = self.get_or_create_node(version, &name);
            if !self.node(target).incoming.contains(&edge) {
                self.node_mut(target).incoming.push(edge);
                self.edge_mut(edge).targets.push(target);
                // "More selected" work goes to the back of the queue so
                // conflicts are discovered breadth-first before any is
                // resolved.
                self.enqueue_back(target);
            }
        }
    }

    /// Memoized metadata resolution for a version, failures included.
    /// Never retried within a run.
    pub fn resolve_version_metadata(
        &mut self,
        version: VersionKey,
        resolvers: &mut Resolvers<'_>,
    ) -> ResolveResult<Arc<ComponentMetadata>> {
        if let Some(cached) = &self.version(version).metadata {
            return cached.clone();
        }
        let id = self.version(version).id.clone();
        let result = resolvers.metadata.resolve(&id).map(Arc::new);
        if let Err(err) = &result {
            tracing::debug!(%id, %err, "metadata resolution failed");
        }
        self.version_mut(version).metadata = Some(result.clone());
        result
    }

    /// Apply a conflict outcome: select the winner, evict the rest, and
    /// re-route the module's edges.
    ///
    /// Losing versions have the incoming edges of their nodes detached and
    /// re-attached; since the selectors still point at the losers at that
    /// moment, re-attachment parks those edges. The selectors are then
    /// replayed onto the winner without consulting the external resolver,
    /// and the unattached list is drained, which finally attaches
    /// everything to the winner's configuration nodes.
    pub fn restart_module(
        &mut self,
        module: ModuleKey,
        winner: VersionKey,
        reason: SelectionReason,
        resolvers: &mut Resolvers<'_>,
    ) {
        tracing::debug!(
            module = %self.module(module).id,
            winner = %self.version(winner).id.version,
            %reason,
            "restarting module after conflict resolution"
        );
        self.select(module, winner, reason);

        let versions = self.module(module).versions.clone();
        for version in versions {
            if version == winner {
                // The winner's nodes recompute their outgoing edges.
                let nodes = self.version(version).nodes.clone();
                for node in nodes {
                    self.enqueue_back(node);
                }
            } else {
                let nodes = self.version(version).nodes.clone();
                for node in nodes {
                    let incoming = self.node(node).incoming.clone();
                    for edge in incoming {
                        self.detach_edge(edge);
                        self.attach_edge(edge, resolvers);
                    }
                }
            }
        }

        let selectors = self.module(module).selectors.clone();
        for selector in selectors {
            if matches!(self.selector(selector).resolved, Some(Ok(_))) {
                self.selector_mut(selector).resolved = Some(Ok(winner));
            }
        }

        let parked = std::mem::take(&mut self.module_mut(module).unattached);
        for edge in parked {
            self.attach_edge(edge, resolvers);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use grava_core::dependency::{DependencyDeclaration, ExcludeRule};
    use grava_core::errors::{ResolveError, ResolveResult};
    use grava_core::identity::{ModuleId, ModuleVersionId};
    use grava_core::metadata::ComponentMetadata;

    use crate::builder::{ComponentMetadataResolver, DefaultConfigurationResolver, Resolvers};
    use crate::conflict::SelectionReason;
    use crate::filter::ModuleFilter;
    use crate::state::{EdgeKey, NodeKey, ResolveState};

    /// Everything here works against memoized metadata, so a resolver that
    /// always fails catches any accidental external lookup.
    struct NoMetadata;

    impl ComponentMetadataResolver for NoMetadata {
        fn resolve(&mut self, id: &ModuleVersionId) -> ResolveResult<ComponentMetadata> {
            Err(ResolveError::MetadataFailed {
                id: id.to_string(),
                message: "lookup not expected in this test".to_string(),
            })
        }
    }

    fn seed_root(state: &mut ResolveState, deps: Vec<DependencyDeclaration>) -> NodeKey {
        let meta = ComponentMetadata::new(ModuleVersionId::new("com.example", "app", "1.0"))
            .with_default_dependencies(deps);
        let module = state.get_or_create_module(&meta.id.module);
        let version = state.get_or_create_version(module, "1.0");
        state.version_mut(version).metadata = Some(Ok(Arc::new(meta)));
        state.select(module, version, SelectionReason::Root);
        let node = state.get_or_create_node(version, "default");
        state.root = Some(node);
        node
    }

    /// Seed module `org.a:a:1.0` with the given dependencies, resolve the
    /// root's first edge to it, attach, and return (incoming edge, a node).
    fn attach_child(
        state: &mut ResolveState,
        root: NodeKey,
        deps: Vec<DependencyDeclaration>,
    ) -> (EdgeKey, NodeKey) {
        let edges = state.visit_outgoing_dependencies(root);
        assert_eq!(edges.len(), 1);
        let edge = edges[0];

        let meta = ComponentMetadata::new(ModuleVersionId::new("org.a", "a", "1.0"))
            .with_default_dependencies(deps);
        let module = state.get_or_create_module(&ModuleId::new("org.a", "a"));
        let version = state.get_or_create_version(module, "1.0");
        state.version_mut(version).metadata = Some(Ok(Arc::new(meta)));
        let selector = state.edge(edge).selector;
        state.module_mut(module).selectors.push(selector);
        state.selector_mut(selector).resolved = Some(Ok(version));
        state.select(module, version, SelectionReason::Requested);

        let mut metadata = NoMetadata;
        let mut configurations = DefaultConfigurationResolver;
        let mut resolvers = Resolvers {
            metadata: &mut metadata,
            configurations: &mut configurations,
        };
        state.attach_edge(edge, &mut resolvers);
        let node = state.version(version).nodes[0];
        (edge, node)
    }

    #[test]
    fn retraversal_with_unchanged_filter_keeps_edges() {
        let mut state = ResolveState::new();
        let root = seed_root(
            &mut state,
            vec![DependencyDeclaration::new("org.a", "a", "1.0")],
        );
        let created = state.visit_outgoing_dependencies(root);
        assert_eq!(created.len(), 1);
        let outgoing = state.node(root).outgoing.clone();

        let again = state.visit_outgoing_dependencies(root);
        assert!(again.is_empty());
        assert_eq!(state.node(root).outgoing, outgoing);
    }

    #[test]
    fn unselected_version_contributes_nothing() {
        let mut state = ResolveState::new();
        let root = seed_root(
            &mut state,
            vec![DependencyDeclaration::new("org.a", "a", "1.0")],
        );
        let module = state.get_or_create_module(&ModuleId::new("com.example", "app"));
        state.clear_selection(module);
        assert!(state.visit_outgoing_dependencies(root).is_empty());
        assert!(state.node(root).outgoing.is_empty());
    }

    #[test]
    fn losing_transitivity_sheds_outgoing_edges() {
        let mut state = ResolveState::new();
        let root = seed_root(
            &mut state,
            vec![DependencyDeclaration::new("org.a", "a", "1.0")],
        );
        let (incoming, a_node) = attach_child(
            &mut state,
            root,
            vec![DependencyDeclaration::new("org.c", "c", "1.0")],
        );

        let created = state.visit_outgoing_dependencies(a_node);
        assert_eq!(created.len(), 1);

        state.edge_mut(incoming).transitive = false;
        let again = state.visit_outgoing_dependencies(a_node);
        assert!(again.is_empty());
        assert!(state.node(a_node).outgoing.is_empty());
        assert!(state.node(a_node).previous_filter.is_none());
    }

    #[test]
    fn narrowed_filter_recreates_and_prunes_edges() {
        let mut state = ResolveState::new();
        let root = seed_root(
            &mut state,
            vec![DependencyDeclaration::new("org.a", "a", "1.0")],
        );
        let (incoming, a_node) = attach_child(
            &mut state,
            root,
            vec![DependencyDeclaration::new("org.c", "c", "1.0")],
        );

        let created = state.visit_outgoing_dependencies(a_node);
        assert_eq!(created.len(), 1);

        state.edge_mut(incoming).path_filter =
            ModuleFilter::excluding(&[ExcludeRule::new("org.c", "c")]);
        let again = state.visit_outgoing_dependencies(a_node);
        assert!(again.is_empty());
        assert!(state.node(a_node).outgoing.is_empty());
    }

    #[test]
    fn detached_target_reenqueues_at_front() {
        let mut state = ResolveState::new();
        let root = seed_root(
            &mut state,
            vec![DependencyDeclaration::new("org.a", "a", "1.0")],
        );
        let (_, a_node) = attach_child(&mut state, root, vec![]);
        // Drain what attach queued, then check detach queues again.
        while state.dequeue().is_some() {}

        state.remove_outgoing_edges(root);
        assert_eq!(state.dequeue(), Some(a_node));
        assert!(state.node(a_node).incoming.is_empty());
    }
}
