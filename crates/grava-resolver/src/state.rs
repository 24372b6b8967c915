//! The resolution state: arenas of modules, versions, selectors,
//! configuration nodes and dependency edges, all addressed by small index
//! keys through one registry struct.
//!
//! Back-references (incoming/outgoing edge sets, unattached-edge lists)
//! are stored as keys rather than pointers, so the mutable shared graph
//! has no ownership cycles. The registry is exclusively owned and mutated
//! by the driver's single thread; nothing here is `Sync`-aware on purpose.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use grava_core::dependency::DependencyDeclaration;
use grava_core::errors::{ResolveError, ResolveResult};
use grava_core::identity::{ModuleId, ModuleVersionId};
use grava_core::metadata::{ComponentMetadata, ConfigurationMetadata};

use crate::conflict::SelectionReason;
use crate::filter::ModuleFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ModuleKey(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VersionKey(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeKey(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EdgeKey(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SelectorKey(pub(crate) usize);

/// Lifecycle of one module version during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VersionStatus {
    /// Discovered but not yet registered with conflict handling.
    New,
    /// The single winning version of its module.
    Selected,
    /// Participating in an unresolved conflict.
    Conflict,
    /// Lost a conflict; permanently out of the result.
    Evicted,
}

/// All state for one module identity: its known versions, the current
/// selection, the selectors targeting it, and edges waiting for a
/// selection before they can attach.
pub(crate) struct ModuleState {
    pub id: ModuleId,
    pub versions: Vec<VersionKey>,
    pub version_index: HashMap<String, VersionKey>,
    pub selected: Option<VersionKey>,
    pub selectors: Vec<SelectorKey>,
    /// Edges whose target module version is not yet selected. Membership
    /// is idempotent; drained on restart.
    pub unattached: Vec<EdgeKey>,
}

/// Per (module, version) state: lifecycle, memoized metadata, and the
/// configuration nodes realized against this version.
pub(crate) struct ModuleVersionState {
    pub id: ModuleVersionId,
    pub module: ModuleKey,
    pub status: VersionStatus,
    /// Meaningful while `status == Selected`.
    pub reason: SelectionReason,
    /// Memoized metadata, including failures; never retried within a run.
    pub metadata: Option<ResolveResult<Arc<ComponentMetadata>>>,
    pub nodes: Vec<NodeKey>,
    pub node_index: HashMap<String, NodeKey>,
}

/// One distinct requested selector, resolved lazily and stickily.
pub(crate) struct SelectorState {
    pub declaration: DependencyDeclaration,
    /// The configuration node that declared this selector.
    pub from: NodeKey,
    /// Cached resolution, success or failure, both sticky. Overwritten
    /// (without re-invoking the external resolver) on module restart.
    pub resolved: Option<ResolveResult<VersionKey>>,
}

/// A node of the graph under construction: one configuration of one
/// module version, with mutable incoming/outgoing edge sets.
pub(crate) struct ConfigurationNode {
    pub version: VersionKey,
    pub metadata: ConfigurationMetadata,
    pub incoming: Vec<EdgeKey>,
    pub outgoing: Vec<EdgeKey>,
    /// The filter used for the last outgoing-edge computation; the no-op
    /// short-circuit compares against this. Cleared whenever outgoing
    /// edges are force-removed so a reselection re-traverses.
    pub previous_filter: Option<ModuleFilter>,
}

/// A resolved dependency declaration connecting a source configuration
/// node to the configuration nodes of the selected target version.
pub(crate) struct DependencyEdge {
    pub from: NodeKey,
    pub declaration: DependencyDeclaration,
    pub selector: SelectorKey,
    /// Source configuration transitivity AND declaration transitivity.
    pub transitive: bool,
    /// Path filter carried to the target: the source node's filter
    /// intersected with this declaration's own excludes.
    pub path_filter: ModuleFilter,
    /// Target nodes this edge is currently attached to.
    pub targets: Vec<NodeKey>,
    pub failure: Option<ResolveError>,
}

/// The single registry owning all long-lived state for one resolution run.
///
/// Modules, versions, nodes and selectors are never destroyed once
/// created; edges are only ever detached from the node sets that reference
/// them. The worklist is a FIFO queue with a membership set: "more
/// selected" work appends to the back (breadth-first conflict discovery),
/// "fewer selected" work jumps the queue so pruning flushes first.
pub(crate) struct ResolveState {
    pub modules: Vec<ModuleState>,
    pub module_index: HashMap<ModuleId, ModuleKey>,
    pub versions: Vec<ModuleVersionState>,
    pub nodes: Vec<ConfigurationNode>,
    pub edges: Vec<DependencyEdge>,
    pub selectors: Vec<SelectorState>,
    pub selector_index: HashMap<(NodeKey, DependencyDeclaration), SelectorKey>,
    pub root: Option<NodeKey>,
    queue: VecDeque<NodeKey>,
    queued: std::collections::HashSet<NodeKey>,
}

impl ResolveState {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            module_index: HashMap::new(),
            versions: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            selectors: Vec::new(),
            selector_index: HashMap::new(),
            root: None,
            queue: VecDeque::new(),
            queued: std::collections::HashSet::new(),
        }
    }

    pub fn module(&self, key: ModuleKey) -> &ModuleState {
        &self.modules[key.0]
    }

    pub fn module_mut(&mut self, key: ModuleKey) -> &mut ModuleState {
        &mut self.modules[key.0]
    }

    pub fn version(&self, key: VersionKey) -> &ModuleVersionState {
        &self.versions[key.0]
    }

    pub fn version_mut(&mut self, key: VersionKey) -> &mut ModuleVersionState {
        &mut self.versions[key.0]
    }

    pub fn node(&self, key: NodeKey) -> &ConfigurationNode {
        &self.nodes[key.0]
    }

    pub fn node_mut(&mut self, key: NodeKey) -> &mut ConfigurationNode {
        &mut self.nodes[key.0]
    }

    pub fn edge(&self, key: EdgeKey) -> &DependencyEdge {
        &self.edges[key.0]
    }

    pub fn edge_mut(&mut self, key: EdgeKey) -> &mut DependencyEdge {
        &mut self.edges[key.0]
    }

    pub fn selector(&self, key: SelectorKey) -> &SelectorState {
        &self.selectors[key.0]
    }

    pub fn selector_mut(&mut self, key: SelectorKey) -> &mut SelectorState {
        &mut self.selectors[key.0]
    }

    pub fn node_id(&self, key: NodeKey) -> &ModuleVersionId {
        &self.version(self.node(key).version).id
    }

    pub fn is_root(&self, key: NodeKey) -> bool {
        self.root == Some(key)
    }

    pub fn get_or_create_module(&mut self, id: &ModuleId) -> ModuleKey {
        if let Some(&key) = self.module_index.get(id) {
            return key;
        }
        let key = ModuleKey(self.modules.len());
        self.modules.push(ModuleState {
            id: id.clone(),
            versions: Vec::new(),
            version_index: HashMap::new(),
            selected: None,
            selectors: Vec::new(),
            unattached: Vec::new(),
        });
        self.module_index.insert(id.clone(), key);
        key
    }

    pub fn get_or_create_version(&mut self, module: ModuleKey, version: &str) -> VersionKey {
        if let Some(&key) = self.module(module).version_index.get(version) {
            return key;
        }
        let key = VersionKey(self.versions.len());
        let id = ModuleVersionId {
            module: self.module(module).id.clone(),
            version: version.to_string(),
        };
        self.versions.push(ModuleVersionState {
            id,
            module,
            status: VersionStatus::New,
            reason: SelectionReason::Requested,
            metadata: None,
            nodes: Vec::new(),
            node_index: HashMap::new(),
        });
        let state = self.module_mut(module);
        state.versions.push(key);
        state.version_index.insert(version.to_string(), key);
        key
    }

    /// Obtain or lazily create the configuration node for (version, name).
    /// The node registry persists for the whole run, so re-lookup after
    /// eviction and reselection returns the same node.
    pub fn get_or_create_node(&mut self, version: VersionKey, configuration: &str) -> NodeKey {
        if let Some(&key) = self.version(version).node_index.get(configuration) {
            return key;
        }
        let metadata = match &self.version(version).metadata {
            Some(Ok(meta)) => meta
                .configuration(configuration)
                .cloned()
                .unwrap_or_else(|| {
                    panic!(
                        "configuration '{}' of {} requested before being checked",
                        configuration,
                        self.version(version).id
                    )
                }),
            _ => panic!(
                "configuration node for {} created before metadata resolution",
                self.version(version).id
            ),
        };
        let key = NodeKey(self.nodes.len());
        self.nodes.push(ConfigurationNode {
            version,
            metadata,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            previous_filter: None,
        });
        let state = self.version_mut(version);
        state.nodes.push(key);
        state.node_index.insert(configuration.to_string(), key);
        key
    }

    /// Obtain or create the selector state for a declaration at a call
    /// site. Re-traversal of the same node reuses the same selector, so
    /// resolution stays sticky across edge recreation.
    pub fn get_or_create_selector(
        &mut self,
        from: NodeKey,
        declaration: &DependencyDeclaration,
    ) -> SelectorKey {
        let index_key = (from, declaration.clone());
        if let Some(&key) = self.selector_index.get(&index_key) {
            return key;
        }
        let key = SelectorKey(self.selectors.len());
        self.selectors.push(SelectorState {
            declaration: declaration.clone(),
            from,
            resolved: None,
        });
        self.selector_index.insert(index_key, key);
        key
    }

    /// Mark a version selected. At most one version of a module may be
    /// selected at a time; every other known version becomes evicted.
    pub fn select(&mut self, module: ModuleKey, winner: VersionKey, reason: SelectionReason) {
        assert!(
            self.module(module).selected.is_none(),
            "module {} already has a selected version",
            self.module(module).id
        );
        let versions = self.module(module).versions.clone();
        for key in versions {
            let state = self.version_mut(key);
            if key == winner {
                state.status = VersionStatus::Selected;
                state.reason = reason;
            } else {
                state.status = VersionStatus::Evicted;
            }
        }
        self.module_mut(module).selected = Some(winner);
        tracing::debug!(
            module = %self.module(module).id,
            version = %self.version(winner).id.version,
            %reason,
            "selected module version"
        );
    }

    /// Drop the current selection and move every known version of the
    /// module into the conflict state. Returns the previous winner, whose
    /// outgoing edges the caller must cascade away.
    pub fn clear_selection(&mut self, module: ModuleKey) -> Option<VersionKey> {
        let previous = self.module_mut(module).selected.take();
        let versions = self.module(module).versions.clone();
        for key in versions {
            self.version_mut(key).status = VersionStatus::Conflict;
        }
        previous
    }

    /// Park an edge on the module until a version is selected. Idempotent.
    pub fn park_unattached(&mut self, module: ModuleKey, edge: EdgeKey) {
        let list = &mut self.module_mut(module).unattached;
        if !list.contains(&edge) {
            list.push(edge);
        }
    }

    /// Remove an edge from the unattached list of its resolved target
    /// module, if it is parked there.
    pub fn unpark(&mut self, edge: EdgeKey) {
        let selector = self.edge(edge).selector;
        if let Some(Ok(version)) = &self.selector(selector).resolved {
            let module = self.version(*version).module;
            self.module_mut(module).unattached.retain(|&e| e != edge);
        }
    }

    /// Append to the worklist ("more selected": favor breadth-first
    /// discovery of conflicts).
    pub fn enqueue_back(&mut self, node: NodeKey) {
        if self.queued.insert(node) {
            self.queue.push_back(node);
        }
    }

    /// Jump the worklist ("fewer selected": flush pruning quickly).
    pub fn enqueue_front(&mut self, node: NodeKey) {
        if self.queued.insert(node) {
            self.queue.push_front(node);
        }
    }

    pub fn dequeue(&mut self) -> Option<NodeKey> {
        let node = self.queue.pop_front()?;
        self.queued.remove(&node);
        Some(node)
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
