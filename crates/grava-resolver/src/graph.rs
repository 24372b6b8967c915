//! The assembled result graph and the visitor that builds it.
//!
//! The engine's internal arena is not exposed after a run; instead the
//! [`GraphAssembler`] visitor copies the selected subgraph into a
//! petgraph-backed [`ResolvedGraph`] that downstream consumers can query
//! and print.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use grava_core::identity::ModuleVersionId;

use crate::builder::EdgeFailure;
use crate::conflict::SelectionReason;
use crate::visit::{DependencyGraphVisitor, NodeView};

/// A node in the resolved dependency graph.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ResolvedNode {
    pub id: ModuleVersionId,
    pub configuration: String,
    pub reason: SelectionReason,
}

impl ResolvedNode {
    /// Registry key: one entry per (module version, configuration).
    fn key(&self) -> String {
        format!("{}/{}", self.id, self.configuration)
    }
}

impl fmt::Display for ResolvedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Edge label in the resolved graph.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEdge {
    /// The version string the declaration asked for, which may differ
    /// from the selected version after conflict resolution.
    pub requested: String,
    pub transitive: bool,
}

/// The selected subgraph of one resolution run, backed by petgraph.
#[derive(Debug)]
pub struct ResolvedGraph {
    graph: DiGraph<ResolvedNode, ResolvedEdge>,
    index: HashMap<String, NodeIndex>,
    pub root: Option<NodeIndex>,
}

impl ResolvedGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            root: None,
        }
    }

    /// Add or retrieve a node. If the key already exists, returns the
    /// existing index.
    pub fn add_node(&mut self, node: ResolvedNode) -> NodeIndex {
        let key = node.key();
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(node);
        self.index.insert(key, idx);
        idx
    }

    /// Set the root node of the graph (the component resolution started from).
    pub fn set_root(&mut self, idx: NodeIndex) {
        self.root = Some(idx);
    }

    /// Add a dependency edge from `from` to `to`.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: ResolvedEdge) {
        if !self.graph.edges(from).any(|e| e.target() == to) {
            self.graph.add_edge(from, to, edge);
        }
    }

    /// Look up a node by module version id and configuration name.
    pub fn find(&self, id: &ModuleVersionId, configuration: &str) -> Option<NodeIndex> {
        self.index.get(&format!("{id}/{configuration}")).copied()
    }

    /// First node (in creation order) belonging to the given module.
    pub fn module_node(&self, group: &str, name: &str) -> Option<NodeIndex> {
        self.graph.node_indices().find(|&idx| {
            let module = &self.graph[idx].id.module;
            module.group == group && module.name == name
        })
    }

    pub fn contains_module(&self, group: &str, name: &str) -> bool {
        self.module_node(group, name).is_some()
    }

    /// The selected version of a module, if it is in the graph.
    pub fn selected_version(&self, group: &str, name: &str) -> Option<&str> {
        self.module_node(group, name)
            .map(|idx| self.graph[idx].id.version.as_str())
    }

    /// Get the node data for an index.
    pub fn node(&self, idx: NodeIndex) -> &ResolvedNode {
        &self.graph[idx]
    }

    /// All resolved nodes (excluding root).
    pub fn all_nodes(&self) -> Vec<&ResolvedNode> {
        self.graph
            .node_indices()
            .filter(|&idx| Some(idx) != self.root)
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Direct dependencies of a node.
    pub fn dependencies_of(&self, idx: NodeIndex) -> Vec<(NodeIndex, &ResolvedEdge)> {
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.target(), e.weight()))
            .collect()
    }

    /// Reverse dependencies (who depends on this node).
    pub fn dependents_of(&self, idx: NodeIndex) -> Vec<(NodeIndex, &ResolvedEdge)> {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
            .collect()
    }

    /// Number of nodes (excluding root).
    pub fn len(&self) -> usize {
        let total = self.graph.node_count();
        if self.root.is_some() {
            total.saturating_sub(1)
        } else {
            total
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Print the dependency tree to a string.
    pub fn print_tree(&self, max_depth: Option<usize>) -> String {
        let mut output = String::new();
        let root = match self.root {
            Some(r) => r,
            None => return output,
        };

        output.push_str(&format!("{}\n", self.graph[root]));

        let mut visited = HashSet::new();
        visited.insert(root);

        let deps = self.dependencies_of(root);
        let count = deps.len();
        for (i, (idx, _)) in deps.iter().enumerate() {
            let is_last = i == count - 1;
            self.print_subtree(&mut output, *idx, "", is_last, 1, max_depth, &mut visited);
        }

        output
    }

    #[allow(clippy::too_many_arguments)]
    fn print_subtree(
        &self,
        output: &mut String,
        idx: NodeIndex,
        prefix: &str,
        is_last: bool,
        depth: usize,
        max_depth: Option<usize>,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        output.push_str(&format!("{prefix}{connector}{}\n", self.graph[idx]));

        if let Some(max) = max_depth {
            if depth >= max {
                return;
            }
        }

        if !visited.insert(idx) {
            return;
        }

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let deps = self.dependencies_of(idx);
        let count = deps.len();
        for (i, (child, _)) in deps.iter().enumerate() {
            let is_last = i == count - 1;
            self.print_subtree(
                output,
                *child,
                &child_prefix,
                is_last,
                depth + 1,
                max_depth,
                visited,
            );
        }

        visited.remove(&idx);
    }

    /// Find the path from root to the first node of the given module.
    pub fn find_path(&self, group: &str, name: &str) -> Option<Vec<&ResolvedNode>> {
        let root = self.root?;
        let target = self.module_node(group, name)?;
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if self.dfs_path(root, target, &mut path, &mut visited) {
            Some(path.iter().map(|&idx| &self.graph[idx]).collect())
        } else {
            None
        }
    }

    fn dfs_path(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        path: &mut Vec<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            path.pop();
            return false;
        }
        for edge in self.graph.edges(current) {
            if self.dfs_path(edge.target(), target, path, visited) {
                return true;
            }
        }
        path.pop();
        visited.remove(&current);
        false
    }
}

impl Default for ResolvedGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Visitor that copies the emitted subgraph into a [`ResolvedGraph`] and
/// collects per-edge failures for downstream error reporting.
pub struct GraphAssembler {
    graph: ResolvedGraph,
    failures: Vec<EdgeFailure>,
}

impl GraphAssembler {
    pub fn new() -> Self {
        Self {
            graph: ResolvedGraph::new(),
            failures: Vec::new(),
        }
    }

    pub fn into_parts(self) -> (ResolvedGraph, Vec<EdgeFailure>) {
        (self.graph, self.failures)
    }
}

impl Default for GraphAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn resolved_node(view: &NodeView<'_>) -> ResolvedNode {
    ResolvedNode {
        id: view.id().clone(),
        configuration: view.configuration().to_string(),
        reason: view.selection_reason(),
    }
}

impl DependencyGraphVisitor for GraphAssembler {
    fn start(&mut self, root: &NodeView<'_>) {
        let idx = self.graph.add_node(resolved_node(root));
        self.graph.set_root(idx);
    }

    fn visit_node(&mut self, node: &NodeView<'_>) {
        self.graph.add_node(resolved_node(node));
    }

    fn visit_edges(&mut self, node: &NodeView<'_>) {
        let from = self
            .graph
            .find(node.id(), node.configuration())
            .expect("visit_node announced every emitted node");
        for edge in node.outgoing() {
            if let Some(error) = edge.failure() {
                self.failures.push(EdgeFailure {
                    from: node.id().clone(),
                    requested: edge.declaration().clone(),
                    error: error.clone(),
                });
                continue;
            }
            for target in edge.targets() {
                let to = self.graph.add_node(resolved_node(&target));
                self.graph.add_edge(
                    from,
                    to,
                    ResolvedEdge {
                        requested: edge.declaration().version.clone(),
                        transitive: edge.is_transitive(),
                    },
                );
            }
        }
    }
}
