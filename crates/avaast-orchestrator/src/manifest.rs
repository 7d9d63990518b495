//! Manifest Builder — drives the Dependency Graph Builder, validates the
//! result, then resolves every node in topological order into an immutable
//! `DeployManifest`.

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

use crate::graph::{build_graph, validate, DependencyRef, EndpointRef, NodeResolver, ResourceKind, ResourceRef};

/// The kind of an externally-registered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Computed,
    Function,
    SearchIndex,
    Subscription,
}

impl From<ResourceKind> for EndpointKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Computed => EndpointKind::Computed,
            ResourceKind::Function => EndpointKind::Function,
            ResourceKind::SearchIndex => EndpointKind::SearchIndex,
            ResourceKind::Subscription => EndpointKind::Subscription,
        }
    }
}

/// An externally visible XRPC method name bound to a resource.
#[derive(Debug, Clone)]
pub struct DeployedEndpoint {
    pub name: String,
    pub kind: EndpointKind,
    pub resource_ref: ResourceRef,
}

/// A fully resolved node: its body, dependency edges, and (for function
/// kind) its code blob.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub resource_ref: ResourceRef,
    pub kind: ResourceKind,
    pub record_body: Value,
    pub dependencies: Vec<DependencyRef>,
    pub code_blob: Option<Vec<u8>>,
}

/// Immutable snapshot of a deploy's fully resolved resources. Once built,
/// never mutated.
#[derive(Debug, Clone)]
pub struct DeployManifest {
    pub deploy_ref: ResourceRef,
    pub endpoints: Vec<DeployedEndpoint>,
    pub resources: HashMap<String, ResolvedResource>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("deploy validation failed: {0}")]
    Validation(String),
    #[error("failed to fetch resource body for {0}: {1}")]
    BodyFetch(String, anyhow::Error),
    #[error("failed to fetch code blob for {0}: {1}")]
    BlobFetch(String, anyhow::Error),
}

/// The Manifest Builder's view of the record world: resolves graph nodes,
/// and fetches bodies/blobs for the nodes it resolved.
#[async_trait]
pub trait RecordSource: NodeResolver {
    async fn record_body(&self, resource_ref: &ResourceRef) -> anyhow::Result<Value>;
    async fn code_blob(&self, resource_ref: &ResourceRef) -> anyhow::Result<Vec<u8>>;
}

pub struct ManifestBuilder<S: RecordSource> {
    source: Arc<S>,
    built: RwLock<HashMap<String, (u64, DeployManifest)>>,
}

impl<S: RecordSource> ManifestBuilder<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            built: RwLock::new(HashMap::new()),
        }
    }

    /// Builds (or returns the cached) manifest for `deploy_ref` given its
    /// declared endpoints. Building is idempotent: a second call for the
    /// same `deploy_ref` with an unchanged endpoint list returns the
    /// previously built manifest without re-resolving anything.
    pub async fn build(
        &self,
        deploy_ref: ResourceRef,
        endpoints: Vec<DeployedEndpoint>,
    ) -> Result<DeployManifest, ManifestError> {
        let deploy_key = deploy_ref.ref_key();
        let input_hash = hash_endpoints(&endpoints);

        if let Some((cached_hash, manifest)) = self.built.read().get(&deploy_key) {
            if *cached_hash == input_hash {
                return Ok(manifest.clone());
            }
        }

        let endpoint_refs: Vec<EndpointRef> = endpoints
            .iter()
            .map(|e| EndpointRef {
                name: e.name.clone(),
                resource_ref: e.resource_ref.clone(),
            })
            .collect();

        let graph = build_graph(&endpoint_refs, self.source.as_ref()).await;
        let errors = validate(&graph, &endpoint_refs);
        if !errors.is_empty() {
            return Err(ManifestError::Validation(errors.join("; ")));
        }

        let mut resources = HashMap::with_capacity(graph.order.len());
        for key in &graph.order {
            let node = graph.nodes.get(key).expect("order only lists resolved nodes");
            let record_body = self
                .source
                .record_body(&node.resource_ref)
                .await
                .map_err(|err| ManifestError::BodyFetch(key.clone(), err))?;

            let code_blob = if node.kind == ResourceKind::Function {
                Some(
                    self.source
                        .code_blob(&node.resource_ref)
                        .await
                        .map_err(|err| ManifestError::BlobFetch(key.clone(), err))?,
                )
            } else {
                None
            };

            resources.insert(
                key.clone(),
                ResolvedResource {
                    resource_ref: node.resource_ref.clone(),
                    kind: node.kind,
                    record_body,
                    dependencies: node.dependencies.clone(),
                    code_blob,
                },
            );
        }

        let manifest = DeployManifest {
            deploy_ref: deploy_ref.clone(),
            endpoints,
            resources,
            resolved_at: Utc::now(),
        };

        self.built
            .write()
            .insert(deploy_key, (input_hash, manifest.clone()));

        Ok(manifest)
    }
}

fn hash_endpoints(endpoints: &[DeployedEndpoint]) -> u64 {
    let mut entries: Vec<String> = endpoints
        .iter()
        .map(|e| format!("{}={}", e.name, e.resource_ref.ref_key()))
        .collect();
    entries.sort();

    let mut hasher = DefaultHasher::new();
    for entry in entries {
        entry.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use std::sync::Mutex;

    struct StaticSource {
        nodes: Mutex<HashMap<String, Node>>,
        bodies: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl NodeResolver for StaticSource {
        async fn resolve(&self, resource_ref: &ResourceRef) -> anyhow::Result<Option<Node>> {
            Ok(self.nodes.lock().unwrap().get(&resource_ref.ref_key()).cloned())
        }
    }

    #[async_trait]
    impl RecordSource for StaticSource {
        async fn record_body(&self, resource_ref: &ResourceRef) -> anyhow::Result<Value> {
            Ok(self
                .bodies
                .lock()
                .unwrap()
                .get(&resource_ref.ref_key())
                .cloned()
                .unwrap_or(Value::Null))
        }

        async fn code_blob(&self, _resource_ref: &ResourceRef) -> anyhow::Result<Vec<u8>> {
            Ok(b"compiled".to_vec())
        }
    }

    fn endpoint(name: &str, r: &ResourceRef, kind: EndpointKind) -> DeployedEndpoint {
        DeployedEndpoint {
            name: name.to_string(),
            kind,
            resource_ref: r.clone(),
        }
    }

    #[tokio::test]
    async fn builds_manifest_covering_every_endpoint() {
        let computed = ResourceRef::new("did:plc:alice", "computed1");
        let mut nodes = HashMap::new();
        nodes.insert(
            computed.ref_key(),
            Node {
                resource_ref: computed.clone(),
                kind: ResourceKind::Computed,
                dependencies: vec![],
            },
        );
        let mut bodies = HashMap::new();
        bodies.insert(computed.ref_key(), serde_json::json!({"query": "..."}));

        let source = Arc::new(StaticSource {
            nodes: Mutex::new(nodes),
            bodies: Mutex::new(bodies),
        });
        let builder = ManifestBuilder::new(source);
        let deploy_ref = ResourceRef::new("did:plc:alice", "deploy1");
        let endpoints = vec![endpoint("getThing", &computed, EndpointKind::Computed)];

        let manifest = builder.build(deploy_ref.clone(), endpoints).await.unwrap();
        assert_eq!(manifest.resources.len(), 1);
        assert!(manifest
            .resources
            .keys()
            .collect::<std::collections::HashSet<_>>()
            .is_superset(
                &manifest
                    .endpoints
                    .iter()
                    .map(|e| e.resource_ref.ref_key())
                    .collect()
            ));
    }

    #[tokio::test]
    async fn unresolved_endpoint_raises_validation_error() {
        let missing = ResourceRef::new("did:plc:alice", "missing");
        let source = Arc::new(StaticSource {
            nodes: Mutex::new(HashMap::new()),
            bodies: Mutex::new(HashMap::new()),
        });
        let builder = ManifestBuilder::new(source);
        let deploy_ref = ResourceRef::new("did:plc:alice", "deploy1");
        let endpoints = vec![endpoint("getThing", &missing, EndpointKind::Computed)];

        let result = builder.build(deploy_ref, endpoints).await;
        assert!(matches!(result, Err(ManifestError::Validation(_))));
    }

    #[tokio::test]
    async fn rebuild_with_unchanged_endpoints_is_idempotent() {
        let computed = ResourceRef::new("did:plc:alice", "computed1");
        let mut nodes = HashMap::new();
        nodes.insert(
            computed.ref_key(),
            Node {
                resource_ref: computed.clone(),
                kind: ResourceKind::Computed,
                dependencies: vec![],
            },
        );
        let source = Arc::new(StaticSource {
            nodes: Mutex::new(nodes),
            bodies: Mutex::new(HashMap::new()),
        });
        let builder = ManifestBuilder::new(source);
        let deploy_ref = ResourceRef::new("did:plc:alice", "deploy1");
        let endpoints = vec![endpoint("getThing", &computed, EndpointKind::Computed)];

        let first = builder.build(deploy_ref.clone(), endpoints.clone()).await.unwrap();
        let second = builder.build(deploy_ref, endpoints).await.unwrap();
        assert_eq!(first.resolved_at, second.resolved_at);
    }
}
