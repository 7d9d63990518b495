//! Dependency Graph Builder — BFS discovery of a deploy's resources
//! followed by a topological ordering used by the Manifest Builder to
//! resolve nodes in dependency-first order.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Ordered pair identifying a content-addressed deploy resource. Canonical
/// textual form is `authorityId:contentHash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub authority_id: String,
    pub content_hash: String,
}

impl ResourceRef {
    pub fn new(authority_id: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            authority_id: authority_id.into(),
            content_hash: content_hash.into(),
        }
    }

    pub fn ref_key(&self) -> String {
        format!("{}:{}", self.authority_id, self.content_hash)
    }
}

/// The resource kinds a resolved node can carry. `Collection` references are
/// never resolved into their own `Node` — they are terminal leaves
/// identified by NSID, handled as [`DependencyRef::Collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Computed,
    Function,
    SearchIndex,
    Subscription,
}

/// A dependency edge out of a resolved node: either another content-addressed
/// resource to resolve in turn, or a terminal reference to a live PDS
/// collection by NSID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRef {
    Resource(ResourceRef),
    Collection { nsid: Option<String> },
}

/// A fully resolved graph node: the resource's kind plus its outgoing
/// dependency edges.
#[derive(Debug, Clone)]
pub struct Node {
    pub resource_ref: ResourceRef,
    pub kind: ResourceKind,
    pub dependencies: Vec<DependencyRef>,
}

/// The externally-visible entry points into the graph: a deploy's declared
/// endpoints.
#[derive(Debug, Clone)]
pub struct EndpointRef {
    pub name: String,
    pub resource_ref: ResourceRef,
}

/// Resolves a single `ResourceRef` into its `Node`. `Ok(None)` means the
/// reference could not be resolved (logged, then skipped by the builder —
/// it surfaces later as a validation error).
#[async_trait]
pub trait NodeResolver: Send + Sync {
    async fn resolve(&self, resource_ref: &ResourceRef) -> anyhow::Result<Option<Node>>;
}

/// The discovered graph: every successfully resolved node, plus a
/// topological order over them (partial, if a cycle was detected).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: HashMap<String, Node>,
    pub order: Vec<String>,
    pub cycle_warnings: Vec<String>,
}

/// BFS-discovers every node reachable from `endpoints`, enqueueing only
/// resource-kind dependencies (collection-kind dependencies are terminal),
/// then computes a topological order.
pub async fn build_graph(endpoints: &[EndpointRef], resolver: &dyn NodeResolver) -> Graph {
    let mut nodes: HashMap<String, Node> = HashMap::new();
    let mut enqueued: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<ResourceRef> = VecDeque::new();

    for endpoint in endpoints {
        let key = endpoint.resource_ref.ref_key();
        if enqueued.insert(key) {
            queue.push_back(endpoint.resource_ref.clone());
        }
    }

    while let Some(resource_ref) = queue.pop_front() {
        let key = resource_ref.ref_key();
        match resolver.resolve(&resource_ref).await {
            Ok(Some(node)) => {
                for dep in &node.dependencies {
                    if let DependencyRef::Resource(dep_ref) = dep {
                        let dep_key = dep_ref.ref_key();
                        if enqueued.insert(dep_key) {
                            queue.push_back(dep_ref.clone());
                        }
                    }
                }
                nodes.insert(key, node);
            }
            Ok(None) => {
                tracing::warn!(resource = %key, "dependency reference could not be resolved, skipping");
            }
            Err(err) => {
                tracing::warn!(resource = %key, error = %err, "resolver failed, skipping");
            }
        }
    }

    let (order, cycle_warnings) = topological_sort(&nodes);
    Graph {
        nodes,
        order,
        cycle_warnings,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-colour DFS topological sort. Back-edges become warnings; the sort
/// continues and yields a partial order rather than failing outright.
fn topological_sort(nodes: &HashMap<String, Node>) -> (Vec<String>, Vec<String>) {
    let mut color: HashMap<String, Color> = nodes.keys().map(|k| (k.clone(), Color::White)).collect();
    let mut order = Vec::with_capacity(nodes.len());
    let mut warnings = Vec::new();

    fn visit(
        key: &str,
        nodes: &HashMap<String, Node>,
        color: &mut HashMap<String, Color>,
        order: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        match color.get(key) {
            Some(Color::Black) | None => return,
            Some(Color::Gray) => {
                warnings.push(format!("circular dependency detected involving {key}"));
                return;
            }
            Some(Color::White) => {}
        }

        color.insert(key.to_string(), Color::Gray);
        if let Some(node) = nodes.get(key) {
            for dep in &node.dependencies {
                if let DependencyRef::Resource(dep_ref) = dep {
                    let dep_key = dep_ref.ref_key();
                    if nodes.contains_key(&dep_key) {
                        visit(&dep_key, nodes, color, order, warnings);
                    }
                }
            }
        }
        color.insert(key.to_string(), Color::Black);
        order.push(key.to_string());
    }

    let keys: Vec<String> = nodes.keys().cloned().collect();
    for key in &keys {
        visit(key.as_str(), nodes, &mut color, &mut order, &mut warnings);
    }

    (order, warnings)
}

/// Returns human-readable validation errors:
/// - an endpoint references a node that was never resolved;
/// - a resource-kind dependency references a node that was never resolved;
/// - a collection-kind dependency is missing its NSID.
pub fn validate(graph: &Graph, endpoints: &[EndpointRef]) -> Vec<String> {
    let mut errors = Vec::new();

    for endpoint in endpoints {
        let key = endpoint.resource_ref.ref_key();
        if !graph.nodes.contains_key(&key) {
            errors.push(format!(
                "endpoint '{}' references unresolved resource {key}",
                endpoint.name
            ));
        }
    }

    for node in graph.nodes.values() {
        for dep in &node.dependencies {
            match dep {
                DependencyRef::Resource(dep_ref) => {
                    let dep_key = dep_ref.ref_key();
                    if !graph.nodes.contains_key(&dep_key) {
                        errors.push(format!(
                            "resource {} depends on unresolved resource {dep_key}",
                            node.resource_ref.ref_key()
                        ));
                    }
                }
                DependencyRef::Collection { nsid: None } => {
                    errors.push(format!(
                        "resource {} has a collection dependency missing its NSID",
                        node.resource_ref.ref_key()
                    ));
                }
                DependencyRef::Collection { nsid: Some(_) } => {}
            }
        }
    }

    for warning in &graph.cycle_warnings {
        errors.push(warning.clone());
    }

    errors
}
