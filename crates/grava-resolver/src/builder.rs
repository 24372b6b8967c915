//! The traversal driver: external resolver interfaces, the worklist main
//! loop, conflict draining, and final assembly through the visitor.
//!
//! The engine performs no I/O; metadata and version lookups go through the
//! injected resolver traits, which are treated as synchronous callbacks
//! that can fail. A failed callback is recorded on the edge that triggered
//! it and never retried within the run.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use grava_core::dependency::DependencyDeclaration;
use grava_core::errors::{ResolveError, ResolveResult};
use grava_core::identity::ModuleVersionId;
use grava_core::metadata::{ComponentMetadata, ConfigurationMetadata, DEFAULT_CONFIGURATION};

use crate::conflict::{ConflictCandidate, ConflictHandler, SelectionReason};
use crate::graph::{GraphAssembler, ResolvedGraph};
use crate::state::{EdgeKey, ModuleKey, NodeKey, ResolveState, VersionKey, VersionStatus};
use crate::visit::{DependencyGraphVisitor, NodeView};

/// Maps a dependency declaration to the module version it selects.
pub trait ComponentIdResolver {
    fn resolve(&mut self, declaration: &DependencyDeclaration) -> ResolveResult<ModuleVersionId>;
}

/// Fetches the full descriptor of a module version.
pub trait ComponentMetadataResolver {
    fn resolve(&mut self, id: &ModuleVersionId) -> ResolveResult<ComponentMetadata>;
}

/// Maps a declaration plus its source configuration to the configuration
/// names it targets in the resolved component.
pub trait DependencyToConfigurationResolver {
    fn resolve(
        &mut self,
        declaration: &DependencyDeclaration,
        source: &ConfigurationMetadata,
        target: &ComponentMetadata,
    ) -> ResolveResult<BTreeSet<String>>;
}

/// Default mapping: the target configuration named like the source, falling
/// back to `default`.
#[derive(Debug, Default)]
pub struct DefaultConfigurationResolver;

impl DependencyToConfigurationResolver for DefaultConfigurationResolver {
    fn resolve(
        &mut self,
        _declaration: &DependencyDeclaration,
        source: &ConfigurationMetadata,
        target: &ComponentMetadata,
    ) -> ResolveResult<BTreeSet<String>> {
        let name = if target.configuration(&source.name).is_some() {
            source.name.clone()
        } else {
            DEFAULT_CONFIGURATION.to_string()
        };
        Ok(BTreeSet::from([name]))
    }
}

/// The resolver callbacks threaded through attach and restart operations.
pub(crate) struct Resolvers<'a> {
    pub metadata: &'a mut dyn ComponentMetadataResolver,
    pub configurations: &'a mut dyn DependencyToConfigurationResolver,
}

/// A dependency declaration that could not be resolved, with the node that
/// declared it.
#[derive(Debug, Clone)]
pub struct EdgeFailure {
    pub from: ModuleVersionId,
    pub requested: DependencyDeclaration,
    pub error: ResolveError,
}

/// The output of [`DependencyGraphBuilder::resolve_graph`].
///
/// Per-edge failures do not abort the run; whether any of them should fail
/// the overall operation is the caller's policy.
#[derive(Debug)]
pub struct ResolutionResult {
    pub graph: ResolvedGraph,
    pub failures: Vec<EdgeFailure>,
    pub evicted: Vec<ModuleVersionId>,
}

/// Orchestrates one resolution run: seeds the root, drives the worklist,
/// drains conflicts, and emits the selected subgraph to a visitor.
pub struct DependencyGraphBuilder {
    ids: Box<dyn ComponentIdResolver>,
    metadata: Box<dyn ComponentMetadataResolver>,
    configurations: Box<dyn DependencyToConfigurationResolver>,
    conflicts: ConflictHandler,
}

impl DependencyGraphBuilder {
    pub fn new(
        ids: Box<dyn ComponentIdResolver>,
        metadata: Box<dyn ComponentMetadataResolver>,
    ) -> Self {
        Self {
            ids,
            metadata,
            configurations: Box::new(DefaultConfigurationResolver),
            conflicts: ConflictHandler::new(),
        }
    }

    pub fn with_configuration_resolver(
        mut self,
        configurations: Box<dyn DependencyToConfigurationResolver>,
    ) -> Self {
        self.configurations = configurations;
        self
    }

    pub fn with_conflict_handler(mut self, conflicts: ConflictHandler) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// Run a resolution rooted at the given component metadata and emit
    /// the selected subgraph to `visitor`.
    pub fn resolve(
        &mut self,
        root: ComponentMetadata,
        root_configuration: &str,
        visitor: &mut dyn DependencyGraphVisitor,
    ) -> ResolveResult<()> {
        let state = self.run(root, root_configuration)?;
        assemble(&state, visitor);
        Ok(())
    }

    /// Convenience entry point: resolve and assemble into a
    /// [`ResolvedGraph`] with collected failures and evictions.
    pub fn resolve_graph(
        &mut self,
        root: ComponentMetadata,
        root_configuration: &str,
    ) -> ResolveResult<ResolutionResult> {
        let state = self.run(root, root_configuration)?;
        let mut assembler = GraphAssembler::new();
        assemble(&state, &mut assembler);
        let (graph, failures) = assembler.into_parts();
        let evicted = state
            .versions
            .iter()
            .filter(|v| v.status == VersionStatus::Evicted)
            .map(|v| v.id.clone())
            .collect();
        Ok(ResolutionResult {
            graph,
            failures,
            evicted,
        })
    }

    fn run(
        &mut self,
        root: ComponentMetadata,
        root_configuration: &str,
    ) -> ResolveResult<ResolveState> {
        let Self {
            ids,
            metadata,
            configurations,
            conflicts,
        } = self;

        let root_id = root.id.clone();
        if root.configuration(root_configuration).is_none() {
            return Err(ResolveError::ConfigurationNotFound {
                id: root_id.to_string(),
                configuration: root_configuration.to_string(),
            });
        }

        let mut state = ResolveState::new();
        let module = state.get_or_create_module(&root_id.module);
        let version = state.get_or_create_version(module, &root_id.version);
        // The root's metadata is supplied by the caller, not fetched.
        state.version_mut(version).metadata = Some(Ok(Arc::new(root)));
        state.select(module, version, SelectionReason::Root);
        let root_node = state.get_or_create_node(version, root_configuration);
        state.root = Some(root_node);
        state.enqueue_back(root_node);

        let mut resolvers = Resolvers {
            metadata: metadata.as_mut(),
            configurations: configurations.as_mut(),
        };

        while !state.queue_is_empty() || conflicts.has_pending() {
            if let Some(node) = state.dequeue() {
                tracing::trace!(node = %state.node_id(node), "visiting configuration node");
                let new_edges = state.visit_outgoing_dependencies(node);
                for edge in new_edges {
                    if resolve_edge_target(&mut state, edge, ids.as_mut(), conflicts).is_some() {
                        state.attach_edge(edge, &mut resolvers);
                    }
                }
            } else {
                let module = conflicts
                    .take_next()
                    .expect("conflict handler reported pending conflicts");
                let (keys, candidates) = conflict_candidates(&state, module);
                let (winner, reason) = conflicts.select(&candidates);
                state.restart_module(module, keys[winner], reason, &mut resolvers);
            }
        }

        Ok(state)
    }
}

/// Resolve an edge's selector to a module version, registering newly-seen
/// versions with the conflict handler. Returns `None` when the selector
/// failed; the failure is recorded on the edge.
fn resolve_edge_target(
    state: &mut ResolveState,
    edge: EdgeKey,
    ids: &mut dyn ComponentIdResolver,
    conflicts: &mut ConflictHandler,
) -> Option<VersionKey> {
    let selector = state.edge(edge).selector;
    let version = match state.selector(selector).resolved.clone() {
        Some(Ok(version)) => version,
        Some(Err(err)) => {
            state.edge_mut(edge).failure = Some(err);
            return None;
        }
        None => {
            let declaration = state.selector(selector).declaration.clone();
            match ids.resolve(&declaration) {
                Ok(id) => {
                    let module = state.get_or_create_module(&id.module);
                    let mut version = state.get_or_create_version(module, &id.version);
                    // The module's conflict may already be settled. A late
                    // selector against an evicted version resolves to the
                    // winner directly; no later restart would drain an edge
                    // parked behind the loser.
                    if state.version(version).status == VersionStatus::Evicted {
                        if let Some(winner) = state.module(module).selected {
                            version = winner;
                        }
                    }
                    state.module_mut(module).selectors.push(selector);
                    state.selector_mut(selector).resolved = Some(Ok(version));
                    version
                }
                Err(err) => {
                    tracing::debug!(selector = %declaration, %err, "selector resolution failed");
                    state.selector_mut(selector).resolved = Some(Err(err.clone()));
                    state.edge_mut(edge).failure = Some(err);
                    return None;
                }
            }
        }
    };

    if state.version(version).status == VersionStatus::New {
        let module = state.version(version).module;
        let potential = conflicts.register_module(module, state.module(module).versions.len());
        if potential.conflict {
            tracing::debug!(
                module = %state.module(module).id,
                version = %state.version(version).id.version,
                "version conflict detected"
            );
            // Deselect the previous winner and prune its subtree; the
            // batch is resolved once the worklist drains.
            if let Some(previous) = state.clear_selection(module) {
                let nodes = state.version(previous).nodes.clone();
                for node in nodes {
                    state.remove_outgoing_edges(node);
                }
            }
        } else {
            state.select(module, version, SelectionReason::Requested);
        }
    }

    Some(version)
}

/// The candidate batch for one module's conflict: every known version,
/// flagged as forced when a force-flagged direct dependency of the root
/// resolved to it. Matching is by resolved version, not by the declared
/// constraint text, so dynamic constraints still pin their candidate.
fn conflict_candidates(
    state: &ResolveState,
    module: ModuleKey,
) -> (Vec<VersionKey>, Vec<ConflictCandidate>) {
    let forced_versions: HashSet<VersionKey> = state
        .module(module)
        .selectors
        .iter()
        .filter_map(|&key| {
            let selector = state.selector(key);
            if !selector.declaration.force || !state.is_root(selector.from) {
                return None;
            }
            match selector.resolved {
                Some(Ok(version)) => Some(version),
                _ => None,
            }
        })
        .collect();

    let mut keys = Vec::new();
    let mut candidates = Vec::new();
    for &version in &state.module(module).versions {
        let id = state.version(version).id.clone();
        let forced = forced_versions.contains(&version);
        keys.push(version);
        candidates.push(ConflictCandidate { id, forced });
    }
    (keys, candidates)
}

/// Emit the selected subgraph: every node whose owning version is selected
/// and which is the root or still has incoming edges, in creation order.
///
/// Panics if an emitted node has an incoming edge from a non-selected
/// node; that would mean the traversal left the graph inconsistent, which
/// is a bug in the engine, not a user-facing failure.
fn assemble(state: &ResolveState, visitor: &mut dyn DependencyGraphVisitor) {
    let root = state.root.expect("root was seeded before traversal");
    let emitted: Vec<NodeKey> = (0..state.nodes.len())
        .map(NodeKey)
        .filter(|&node| {
            state.version(state.node(node).version).status == VersionStatus::Selected
                && (state.is_root(node) || !state.node(node).incoming.is_empty())
        })
        .collect();

    for &node in &emitted {
        for &edge in &state.node(node).incoming {
            let from = state.edge(edge).from;
            let from_version = state.node(from).version;
            assert!(
                state.version(from_version).status == VersionStatus::Selected,
                "internal consistency: {} has an incoming edge from unselected {}",
                state.node_id(node),
                state.node_id(from),
            );
        }
    }

    let root_view = NodeView::new(state, root);
    visitor.start(&root_view);
    for &node in &emitted {
        visitor.visit_node(&NodeView::new(state, node));
    }
    for &node in &emitted {
        visitor.visit_edges(&NodeView::new(state, node));
    }
    visitor.finish(&root_view);
}
