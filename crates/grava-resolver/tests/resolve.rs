//! End-to-end resolution runs against an in-memory component registry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use grava_core::dependency::{DependencyDeclaration, ExcludeRule};
use grava_core::errors::{ResolveError, ResolveResult};
use grava_core::identity::ModuleVersionId;
use grava_core::metadata::ComponentMetadata;
use grava_resolver::builder::{
    ComponentIdResolver, ComponentMetadataResolver, DependencyGraphBuilder, ResolutionResult,
};
use grava_resolver::conflict::SelectionReason;

/// In-memory registry shared between the id and metadata resolvers, with a
/// per-selector call counter to observe resolution stickiness.
#[derive(Clone)]
struct Registry {
    components: Rc<HashMap<ModuleVersionId, ComponentMetadata>>,
    id_calls: Rc<RefCell<HashMap<String, usize>>>,
}

impl Registry {
    fn new(components: Vec<ComponentMetadata>) -> Self {
        Self {
            components: Rc::new(components.into_iter().map(|c| (c.id.clone(), c)).collect()),
            id_calls: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    fn id_calls(&self, selector: &str) -> usize {
        self.id_calls
            .borrow()
            .get(selector)
            .copied()
            .unwrap_or_default()
    }
}

impl ComponentIdResolver for Registry {
    fn resolve(&mut self, declaration: &DependencyDeclaration) -> ResolveResult<ModuleVersionId> {
        *self
            .id_calls
            .borrow_mut()
            .entry(declaration.to_string())
            .or_default() += 1;
        let id = declaration.requested();
        if self.components.contains_key(&id) {
            Ok(id)
        } else {
            Err(ResolveError::ModuleNotFound {
                selector: declaration.to_string(),
            })
        }
    }
}

impl ComponentMetadataResolver for Registry {
    fn resolve(&mut self, id: &ModuleVersionId) -> ResolveResult<ComponentMetadata> {
        self.components
            .get(id)
            .cloned()
            .ok_or_else(|| ResolveError::MetadataFailed {
                id: id.to_string(),
                message: "not in registry".to_string(),
            })
    }
}

fn component(id: &str, deps: Vec<DependencyDeclaration>) -> ComponentMetadata {
    ComponentMetadata::new(ModuleVersionId::parse(id).unwrap()).with_default_dependencies(deps)
}

fn dep(group: &str, name: &str, version: &str) -> DependencyDeclaration {
    DependencyDeclaration::new(group, name, version)
}

fn resolve(registry: &Registry, root: ComponentMetadata) -> ResolutionResult {
    let mut builder =
        DependencyGraphBuilder::new(Box::new(registry.clone()), Box::new(registry.clone()));
    builder.resolve_graph(root, "default").unwrap()
}

#[test]
fn tree_without_conflicts() {
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.a:a:1.0", vec![dep("org.c", "c", "1.0")]),
        component("org.b:b:1.0", vec![]),
        component("org.c:c:1.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert_eq!(result.graph.len(), 3);
    assert!(result.failures.is_empty());
    assert!(result.evicted.is_empty());
    assert_eq!(result.graph.selected_version("org.a", "a"), Some("1.0"));
    assert_eq!(result.graph.selected_version("org.c", "c"), Some("1.0"));
}

#[test]
fn highest_version_wins_conflict() {
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.a:a:1.0", vec![dep("org.c", "c", "1.0")]),
        component("org.b:b:1.0", vec![dep("org.c", "c", "2.0")]),
        component("org.c:c:1.0", vec![]),
        component("org.c:c:2.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert_eq!(result.graph.selected_version("org.c", "c"), Some("2.0"));
    assert_eq!(
        result.evicted,
        vec![ModuleVersionId::new("org.c", "c", "1.0")]
    );
    let c = result.graph.module_node("org.c", "c").unwrap();
    assert_eq!(
        result.graph.node(c).reason,
        SelectionReason::ConflictResolution
    );
    // Both declaring nodes point at the winner.
    assert_eq!(result.graph.dependents_of(c).len(), 2);
}

#[test]
fn requested_version_survives_on_redirected_edge() {
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.a:a:1.0", vec![dep("org.c", "c", "1.0")]),
        component("org.b:b:1.0", vec![dep("org.c", "c", "2.0")]),
        component("org.c:c:1.0", vec![]),
        component("org.c:c:2.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    let a = result.graph.module_node("org.a", "a").unwrap();
    let deps = result.graph.dependencies_of(a);
    assert_eq!(deps.len(), 1);
    // The edge still records 1.0 even though 2.0 was selected.
    assert_eq!(deps[0].1.requested, "1.0");
    assert_eq!(result.graph.node(deps[0].0).id.version, "2.0");
}

#[test]
fn conflict_winner_subtree_is_traversed() {
    // The losing version's subtree must vanish and the winner's appear,
    // even though the loser was fully expanded first.
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.a:a:1.0", vec![dep("org.c", "c", "1.0")]),
        component("org.b:b:1.0", vec![dep("org.c", "c", "2.0")]),
        component("org.c:c:1.0", vec![dep("org.old", "old", "1.0")]),
        component("org.c:c:2.0", vec![dep("org.new", "new", "1.0")]),
        component("org.old:old:1.0", vec![]),
        component("org.new:new:1.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert!(result.graph.contains_module("org.new", "new"));
    assert!(!result.graph.contains_module("org.old", "old"));
    assert!(result.failures.is_empty());
}

#[test]
fn late_edge_to_evicted_version_attaches_to_winner() {
    // d is only discovered inside the winner's subtree, after c's
    // conflict is settled; its request for the evicted c:1.0 must still
    // produce an edge, routed to the winner.
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.a:a:1.0", vec![dep("org.c", "c", "2.0")]),
        component("org.b:b:1.0", vec![dep("org.c", "c", "1.0")]),
        component("org.c:c:1.0", vec![]),
        component("org.c:c:2.0", vec![dep("org.d", "d", "1.0")]),
        component("org.d:d:1.0", vec![dep("org.c", "c", "1.0")]),
    ]);

    let result = resolve(&registry, root);
    assert_eq!(result.graph.selected_version("org.c", "c"), Some("2.0"));
    assert!(result.failures.is_empty());

    let d = result.graph.module_node("org.d", "d").unwrap();
    let deps = result.graph.dependencies_of(d);
    assert_eq!(deps.len(), 1);
    assert_eq!(
        result.graph.node(deps[0].0).id,
        ModuleVersionId::new("org.c", "c", "2.0")
    );
    assert_eq!(deps[0].1.requested, "1.0");
    let c = result.graph.module_node("org.c", "c").unwrap();
    assert_eq!(result.graph.dependents_of(c).len(), 3);
}

#[test]
fn forced_root_dependency_overrides_conflict() {
    let root = component(
        "com.example:app:1.0",
        vec![
            dep("org.m", "m", "1.0").forced(),
            dep("org.b", "b", "1.0"),
        ],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.b:b:1.0", vec![dep("org.m", "m", "2.0")]),
        component("org.m:m:1.0", vec![]),
        component("org.m:m:2.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert_eq!(result.graph.selected_version("org.m", "m"), Some("1.0"));
    let m = result.graph.module_node("org.m", "m").unwrap();
    assert_eq!(result.graph.node(m).reason, SelectionReason::Forced);
    assert_eq!(
        result.evicted,
        vec![ModuleVersionId::new("org.m", "m", "2.0")]
    );
}

#[test]
fn forced_dynamic_constraint_pins_its_resolved_version() {
    // The id resolver maps "1.+" to a concrete version; the force must
    // follow that resolution, not the constraint text.
    struct DynamicIds;
    impl ComponentIdResolver for DynamicIds {
        fn resolve(
            &mut self,
            declaration: &DependencyDeclaration,
        ) -> ResolveResult<ModuleVersionId> {
            let version = if declaration.version == "1.+" {
                "1.9"
            } else {
                declaration.version.as_str()
            };
            Ok(ModuleVersionId {
                module: declaration.module.clone(),
                version: version.to_string(),
            })
        }
    }

    let root = component(
        "com.example:app:1.0",
        vec![
            dep("org.m", "m", "1.+").forced(),
            dep("org.b", "b", "1.0"),
        ],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.b:b:1.0", vec![dep("org.m", "m", "2.0")]),
        component("org.m:m:1.9", vec![]),
        component("org.m:m:2.0", vec![]),
    ]);
    let mut builder = DependencyGraphBuilder::new(Box::new(DynamicIds), Box::new(registry));
    let result = builder.resolve_graph(root, "default").unwrap();

    assert_eq!(result.graph.selected_version("org.m", "m"), Some("1.9"));
    let m = result.graph.module_node("org.m", "m").unwrap();
    assert_eq!(result.graph.node(m).reason, SelectionReason::Forced);
    assert_eq!(
        result.evicted,
        vec![ModuleVersionId::new("org.m", "m", "2.0")]
    );
}

#[test]
fn exclude_prunes_single_path() {
    // root -> a -(excludes x)-> s -> x: x is unreachable.
    let root = component("com.example:app:1.0", vec![dep("org.a", "a", "1.0")]);
    let registry = Registry::new(vec![
        root.clone(),
        component(
            "org.a:a:1.0",
            vec![dep("org.s", "s", "1.0").excluding(ExcludeRule::new("org.x", "x"))],
        ),
        component("org.s:s:1.0", vec![dep("org.x", "x", "1.0")]),
        component("org.x:x:1.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert!(result.graph.contains_module("org.s", "s"));
    assert!(!result.graph.contains_module("org.x", "x"));
    assert!(result.failures.is_empty());
    assert!(result.evicted.is_empty());
}

#[test]
fn unexcluded_second_path_restores_module() {
    // A second path to s without the exclude widens s's filter, so x
    // comes back.
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component(
            "org.a:a:1.0",
            vec![dep("org.s", "s", "1.0").excluding(ExcludeRule::new("org.x", "x"))],
        ),
        component("org.b:b:1.0", vec![dep("org.s", "s", "1.0")]),
        component("org.s:s:1.0", vec![dep("org.x", "x", "1.0")]),
        component("org.x:x:1.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert!(result.graph.contains_module("org.x", "x"));
    assert!(result.failures.is_empty());
}

#[test]
fn wildcard_group_exclude_prunes_whole_group() {
    let root = component("com.example:app:1.0", vec![dep("org.a", "a", "1.0")]);
    let registry = Registry::new(vec![
        root.clone(),
        component(
            "org.a:a:1.0",
            vec![dep("org.s", "s", "1.0").excluding(ExcludeRule::group("org.noise"))],
        ),
        component(
            "org.s:s:1.0",
            vec![
                dep("org.noise", "one", "1.0"),
                dep("org.noise", "two", "1.0"),
                dep("org.keep", "keep", "1.0"),
            ],
        ),
        component("org.noise:one:1.0", vec![]),
        component("org.noise:two:1.0", vec![]),
        component("org.keep:keep:1.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert!(!result.graph.contains_module("org.noise", "one"));
    assert!(!result.graph.contains_module("org.noise", "two"));
    assert!(result.graph.contains_module("org.keep", "keep"));
}

#[test]
fn intransitive_dependency_has_no_children() {
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0").intransitive()],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.a:a:1.0", vec![dep("org.c", "c", "1.0")]),
        component("org.c:c:1.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert!(result.graph.contains_module("org.a", "a"));
    assert!(!result.graph.contains_module("org.c", "c"));
    assert!(result.failures.is_empty());
}

#[test]
fn unresolvable_selector_does_not_abort_the_run() {
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.gone", "gone", "1.0"), dep("org.a", "a", "1.0")],
    );
    let registry = Registry::new(vec![root.clone(), component("org.a:a:1.0", vec![])]);

    let result = resolve(&registry, root);
    assert!(result.graph.contains_module("org.a", "a"));
    assert!(!result.graph.contains_module("org.gone", "gone"));
    assert_eq!(result.failures.len(), 1);
    assert!(matches!(
        result.failures[0].error,
        ResolveError::ModuleNotFound { .. }
    ));
    assert_eq!(
        result.failures[0].from,
        ModuleVersionId::new("com.example", "app", "1.0")
    );
}

#[test]
fn metadata_failure_is_recorded_on_the_edge() {
    // The id resolves but the descriptor fetch fails: the module stays
    // out of the graph and the failure carries the requesting node.
    struct Ids;
    impl ComponentIdResolver for Ids {
        fn resolve(
            &mut self,
            declaration: &DependencyDeclaration,
        ) -> ResolveResult<ModuleVersionId> {
            Ok(declaration.requested())
        }
    }

    let root = component("com.example:app:1.0", vec![dep("org.a", "a", "1.0")]);
    let registry = Registry::new(vec![root.clone()]);
    let mut builder = DependencyGraphBuilder::new(Box::new(Ids), Box::new(registry));
    let result = builder.resolve_graph(root, "default").unwrap();

    assert!(result.graph.is_empty());
    assert_eq!(result.failures.len(), 1);
    assert!(matches!(
        result.failures[0].error,
        ResolveError::MetadataFailed { .. }
    ));
}

#[test]
fn failed_selector_is_never_retried() {
    // s is reached twice through paths with different filters, so its
    // outgoing edges are recreated; the failed selector must still hit
    // the resolver exactly once.
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component(
            "org.a:a:1.0",
            vec![dep("org.s", "s", "1.0").excluding(ExcludeRule::new("org.unrelated", "z"))],
        ),
        // The longer path reaches s only after s's first traversal, so the
        // filter widens afterwards and forces edge recreation.
        component("org.b:b:1.0", vec![dep("org.bb", "bb", "1.0")]),
        component("org.bb:bb:1.0", vec![dep("org.s", "s", "1.0")]),
        component(
            "org.s:s:1.0",
            vec![dep("org.gone", "gone", "1.0"), dep("org.y", "y", "1.0")],
        ),
        component("org.y:y:1.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert_eq!(registry.id_calls("org.gone:gone:1.0"), 1);
    assert_eq!(result.failures.len(), 1);
    assert!(result.graph.contains_module("org.y", "y"));
}

#[test]
fn diamond_converges_on_one_node() {
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.a:a:1.0", vec![dep("org.d", "d", "1.0")]),
        component("org.b:b:1.0", vec![dep("org.d", "d", "1.0")]),
        component("org.d:d:1.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    assert_eq!(result.graph.len(), 3);
    let d = result.graph.module_node("org.d", "d").unwrap();
    assert_eq!(result.graph.dependents_of(d).len(), 2);
    assert_eq!(registry.id_calls("org.d:d:1.0"), 2);
}

#[test]
fn end_to_end_conflict_scenario() {
    let root = component(
        "com.example:app:1.0",
        vec![dep("org.a", "a", "1.0"), dep("org.b", "b", "1.0")],
    );
    let registry = Registry::new(vec![
        root.clone(),
        component("org.a:a:1.0", vec![dep("org.c", "c", "1.0")]),
        component("org.b:b:1.0", vec![dep("org.c", "c", "2.0")]),
        component("org.c:c:1.0", vec![]),
        component("org.c:c:2.0", vec![]),
    ]);

    let result = resolve(&registry, root);
    let mut names: Vec<String> = result
        .graph
        .all_nodes()
        .iter()
        .map(|n| n.id.to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["org.a:a:1.0", "org.b:b:1.0", "org.c:c:2.0"]);
    assert_eq!(
        result.evicted,
        vec![ModuleVersionId::new("org.c", "c", "1.0")]
    );

    let path = result.graph.find_path("org.c", "c").unwrap();
    assert_eq!(path.len(), 3);
    assert_eq!(path[2].id.version, "2.0");
}

#[test]
fn visitor_sees_nodes_before_edges() {
    use grava_resolver::visit::{DependencyGraphVisitor, NodeView};

    #[derive(Default)]
    struct Recorder {
        started: Option<String>,
        nodes: Vec<String>,
        edge_phases: usize,
        finished: bool,
    }

    impl DependencyGraphVisitor for Recorder {
        fn start(&mut self, root: &NodeView<'_>) {
            self.started = Some(root.id().to_string());
        }
        fn visit_node(&mut self, node: &NodeView<'_>) {
            assert_eq!(self.edge_phases, 0, "nodes are announced before edges");
            self.nodes.push(node.id().to_string());
        }
        fn visit_edges(&mut self, _node: &NodeView<'_>) {
            self.edge_phases += 1;
        }
        fn finish(&mut self, _root: &NodeView<'_>) {
            self.finished = true;
        }
    }

    let root = component("com.example:app:1.0", vec![dep("org.a", "a", "1.0")]);
    let registry = Registry::new(vec![root.clone(), component("org.a:a:1.0", vec![])]);
    let mut builder =
        DependencyGraphBuilder::new(Box::new(registry.clone()), Box::new(registry));
    let mut recorder = Recorder::default();
    builder.resolve(root, "default", &mut recorder).unwrap();

    assert_eq!(recorder.started.as_deref(), Some("com.example:app:1.0"));
    assert_eq!(recorder.nodes.len(), 2);
    assert_eq!(recorder.edge_phases, 2);
    assert!(recorder.finished);
}
