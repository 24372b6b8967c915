//! The visitor interface the engine emits the final graph through, and the
//! borrowed read views it hands out.
//!
//! Views are thin handles over the resolution arena; they are only valid
//! during a visitor callback and expose exactly what downstream consumers
//! (classpath assembly, reporting) need: identities, configuration names,
//! edges with their declarations, per-edge failures, and selection reasons.

use grava_core::dependency::DependencyDeclaration;
use grava_core::errors::ResolveError;
use grava_core::identity::ModuleVersionId;

use crate::conflict::SelectionReason;
use crate::state::{EdgeKey, NodeKey, ResolveState};

/// A selected configuration node in the final graph.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    state: &'a ResolveState,
    key: NodeKey,
}

impl<'a> NodeView<'a> {
    pub(crate) fn new(state: &'a ResolveState, key: NodeKey) -> Self {
        Self { state, key }
    }

    /// The owning module version.
    pub fn id(&self) -> &'a ModuleVersionId {
        self.state.node_id(self.key)
    }

    pub fn configuration(&self) -> &'a str {
        &self.state.node(self.key).metadata.name
    }

    pub fn is_root(&self) -> bool {
        self.state.is_root(self.key)
    }

    /// Why the owning module version was selected.
    pub fn selection_reason(&self) -> SelectionReason {
        let version = self.state.node(self.key).version;
        self.state.version(version).reason
    }

    pub fn incoming(&self) -> Vec<EdgeView<'a>> {
        self.state
            .node(self.key)
            .incoming
            .iter()
            .map(|&key| EdgeView {
                state: self.state,
                key,
            })
            .collect()
    }

    pub fn outgoing(&self) -> Vec<EdgeView<'a>> {
        self.state
            .node(self.key)
            .outgoing
            .iter()
            .map(|&key| EdgeView {
                state: self.state,
                key,
            })
            .collect()
    }
}

/// A resolved dependency edge.
#[derive(Clone, Copy)]
pub struct EdgeView<'a> {
    state: &'a ResolveState,
    key: EdgeKey,
}

impl<'a> EdgeView<'a> {
    pub fn from(&self) -> NodeView<'a> {
        NodeView::new(self.state, self.state.edge(self.key).from)
    }

    /// The declaration this edge was built from.
    pub fn declaration(&self) -> &'a DependencyDeclaration {
        &self.state.edge(self.key).declaration
    }

    /// The configuration nodes this edge is attached to. Empty for failed
    /// or still-unattached edges.
    pub fn targets(&self) -> Vec<NodeView<'a>> {
        self.state
            .edge(self.key)
            .targets
            .iter()
            .map(|&key| NodeView::new(self.state, key))
            .collect()
    }

    pub fn is_transitive(&self) -> bool {
        self.state.edge(self.key).transitive
    }

    /// The failure recorded on this edge, if its selector or target
    /// metadata could not be resolved.
    pub fn failure(&self) -> Option<&'a ResolveError> {
        self.state.edge(self.key).failure.as_ref()
    }

    /// Why the resolved target version was selected, when resolution
    /// succeeded.
    pub fn selection_reason(&self) -> Option<SelectionReason> {
        let selector = self.state.edge(self.key).selector;
        match &self.state.selector(selector).resolved {
            Some(Ok(version)) => Some(self.state.version(*version).reason),
            _ => None,
        }
    }
}

/// Receives the assembled graph after traversal terminates.
///
/// Callbacks arrive in a fixed order: `start`, every `visit_node`, every
/// `visit_edges` (nodes in creation order both times), then `finish`.
pub trait DependencyGraphVisitor {
    fn start(&mut self, root: &NodeView<'_>) {
        let _ = root;
    }

    fn visit_node(&mut self, node: &NodeView<'_>) {
        let _ = node;
    }

    /// Called once per node after all nodes have been announced; edge sets
    /// are complete at this point.
    fn visit_edges(&mut self, node: &NodeView<'_>) {
        let _ = node;
    }

    fn finish(&mut self, root: &NodeView<'_>) {
        let _ = root;
    }
}
