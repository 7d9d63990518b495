//! Controller orchestration — the single consumer of the Watcher's event
//! channel. Routes every event by its (unqualified) collection name to the
//! Change Log, the in-memory record store, the Deploy Orchestrator, or the
//! Gateway's admin registries (router, traffic shaper, subscriptions).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use avaast_orchestrator::graph::{DependencyRef, Node, NodeResolver, ResourceKind, ResourceRef};
use avaast_orchestrator::manifest::{DeployedEndpoint, EndpointKind, ManifestBuilder, RecordSource};
use avaast_orchestrator::{DeployOrchestrator, TrafficRule};
use avaast_query::Query;
use avaast_store::{Database, EventKind as StoreEventKind, NewChangeLogEntry};
use avaast_watcher::{Event, EventOp, PdsResolver};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::router::DynamicRouter;
use crate::shaper::TrafficShaper;
use crate::subscriptions::{SubscriptionDef, SubscriptionManager};

/// In-memory cache of record bodies, keyed by `ResourceRef`, doubling as
/// the `NodeResolver`/`RecordSource` the Manifest Builder resolves deploy
/// graphs against. Retained while referenced by any non-retired deploy;
/// this implementation never evicts, relying on process lifetime (the
/// Controller runs for as long as the Gateway does).
pub struct RecordStore {
    kinds: RwLock<HashMap<String, ResourceKind>>,
    bodies: RwLock<HashMap<String, Value>>,
    resolver: Arc<PdsResolver>,
}

impl RecordStore {
    pub fn new(resolver: Arc<PdsResolver>) -> Self {
        Self {
            kinds: RwLock::new(HashMap::new()),
            bodies: RwLock::new(HashMap::new()),
            resolver,
        }
    }

    pub fn insert(&self, resource_ref: &ResourceRef, kind: ResourceKind, body: Value) {
        let key = resource_ref.ref_key();
        self.kinds.write().insert(key.clone(), kind);
        self.bodies.write().insert(key, body);
    }

    pub fn get_body(&self, resource_ref: &ResourceRef) -> Option<Value> {
        self.bodies.read().get(&resource_ref.ref_key()).cloned()
    }
}

#[async_trait]
impl NodeResolver for RecordStore {
    async fn resolve(&self, resource_ref: &ResourceRef) -> anyhow::Result<Option<Node>> {
        let key = resource_ref.ref_key();
        let Some(kind) = self.kinds.read().get(&key).copied() else {
            return Ok(None);
        };
        let body = self.bodies.read().get(&key).cloned().unwrap_or(Value::Null);
        Ok(Some(Node {
            resource_ref: resource_ref.clone(),
            kind,
            dependencies: parse_dependencies(&body),
        }))
    }
}

#[async_trait]
impl RecordSource for RecordStore {
    async fn record_body(&self, resource_ref: &ResourceRef) -> anyhow::Result<Value> {
        Ok(self
            .bodies
            .read()
            .get(&resource_ref.ref_key())
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn code_blob(&self, resource_ref: &ResourceRef) -> anyhow::Result<Vec<u8>> {
        self.resolver
            .get_blob(&resource_ref.authority_id, &resource_ref.content_hash)
            .await
            .map_err(Into::into)
    }
}

/// Reads a record body's own declared `dependencies[]` (each either
/// `{authorityId, contentHash}` for another resource, or `{collection}` for
/// a terminal PDS collection reference).
fn parse_dependencies(body: &Value) -> Vec<DependencyRef> {
    body.get("dependencies")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| {
                    if let (Some(authority_id), Some(content_hash)) = (
                        entry.get("authorityId").and_then(Value::as_str),
                        entry.get("contentHash").and_then(Value::as_str),
                    ) {
                        DependencyRef::Resource(ResourceRef::new(authority_id, content_hash))
                    } else {
                        DependencyRef::Collection {
                            nsid: entry.get("collection").and_then(Value::as_str).map(str::to_string),
                        }
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The registries a Controller pushes to on deploy activation and
/// `appView` updates. Matches the shape of [`crate::server::AppState`]
/// without depending on it, so the Controller can be exercised standalone.
pub struct AdminSink {
    pub router: Arc<DynamicRouter>,
    pub shaper: Arc<TrafficShaper>,
    pub subscriptions: Arc<SubscriptionManager>,
}

pub struct Controller {
    store: Arc<RecordStore>,
    orchestrator: Arc<DeployOrchestrator<RecordStore>>,
    changelog: Arc<Database>,
    admin: Arc<AdminSink>,
    authority_id: String,
    latest_traffic_rules: RwLock<Vec<TrafficRule>>,
}

impl Controller {
    pub fn new(
        authority_id: String,
        resolver: Arc<PdsResolver>,
        changelog: Arc<Database>,
        admin: Arc<AdminSink>,
        max_active: usize,
        drain_grace: Duration,
    ) -> Self {
        let store = Arc::new(RecordStore::new(resolver));
        let manifest_builder = Arc::new(ManifestBuilder::new(store.clone()));
        let orchestrator = Arc::new(DeployOrchestrator::with_limits(
            manifest_builder,
            max_active,
            drain_grace,
        ));
        Self {
            store,
            orchestrator,
            changelog,
            admin,
            authority_id,
            latest_traffic_rules: RwLock::new(Vec::new()),
        }
    }

    pub fn orchestrator(&self) -> Arc<DeployOrchestrator<RecordStore>> {
        self.orchestrator.clone()
    }

    pub fn record_store(&self) -> Arc<RecordStore> {
        self.store.clone()
    }

    /// Drains the Watcher's event channel until it closes, dispatching
    /// each event in arrival order. This is the sole consumer: no other
    /// task mutates the record store, orchestrator, or admin registries
    /// except through the methods this loop calls.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    #[instrument(skip(self, event), fields(collection = %event.collection, record_key = %event.record_key))]
    pub async fn handle_event(&self, event: Event) {
        if let Err(err) = self.append_changelog(&event).await {
            warn!(error = %err, "failed to append change log entry");
        }

        let Some(short) = event.collection.strip_prefix("app.avaast.") else {
            return;
        };

        if event.op == EventOp::Delete {
            return;
        }

        let Some(content_hash) = event.content_hash.clone() else {
            return;
        };
        let resource_ref = ResourceRef::new(event.authority_id.clone(), content_hash);
        let body = event.body.clone().unwrap_or(Value::Null);

        match short {
            "computed" => self.store.insert(&resource_ref, ResourceKind::Computed, body),
            "function" => self.store.insert(&resource_ref, ResourceKind::Function, body),
            "searchIndex" => self.store.insert(&resource_ref, ResourceKind::SearchIndex, body),
            "subscription" => {
                self.store.insert(&resource_ref, ResourceKind::Subscription, body.clone());
                self.register_subscription(&event.record_key, &body);
            }
            "deploy" => self.handle_deploy(resource_ref, body).await,
            "appView" => self.handle_app_view(&body),
            _ => {}
        }
    }

    async fn append_changelog(&self, event: &Event) -> anyhow::Result<()> {
        let event_type = match event.op {
            EventOp::Create => StoreEventKind::Create,
            EventOp::Update => StoreEventKind::Update,
            EventOp::Delete => StoreEventKind::Delete,
        };
        self.changelog
            .append_changelog_entry(NewChangeLogEntry {
                collection: event.collection.clone(),
                record_key: event.record_key.clone(),
                authority_id: event.authority_id.clone(),
                event_type,
                body: event.body.clone(),
            })
            .await?;
        Ok(())
    }

    fn register_subscription(&self, name: &str, body: &Value) {
        let collection = body
            .get("collection")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let filter_expr = body
            .get("filterExpr")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let projection_fields = body
            .get("projectionFields")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        self.admin.subscriptions.register(
            name.to_string(),
            SubscriptionDef {
                collection,
                filter_expr,
                projection_fields,
            },
        );
    }

    async fn handle_deploy(&self, deploy_ref: ResourceRef, body: Value) {
        let endpoints: Vec<DeployedEndpoint> = body
            .get("endpoints")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(parse_endpoint).collect())
            .unwrap_or_default();

        match self.orchestrator.process_deploy(deploy_ref.clone(), endpoints).await {
            Ok(status) => {
                info!(deploy = %deploy_ref.ref_key(), state = ?status.state, "deploy processed");
                if let Some(manifest) = status.manifest {
                    self.admin.router.replace_all(manifest.endpoints);
                    let rules = self.latest_traffic_rules.read().clone();
                    if let Err(err) = self.admin.shaper.update_rules(rules) {
                        warn!(error = %err, "re-push of traffic rules on deploy activation rejected");
                    }
                }
            }
            Err(err) => warn!(deploy = %deploy_ref.ref_key(), error = %err, "deploy processing failed"),
        }
    }

    fn handle_app_view(&self, body: &Value) {
        let rules: Vec<TrafficRule> = body
            .get("trafficRules")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(parse_traffic_rule).collect())
            .unwrap_or_default();

        *self.latest_traffic_rules.write() = rules.clone();

        let active_endpoints: Vec<DeployedEndpoint> = self
            .orchestrator
            .active_deploys()
            .into_iter()
            .filter_map(|status| status.manifest)
            .flat_map(|manifest| manifest.endpoints)
            .collect();
        if !active_endpoints.is_empty() {
            self.admin.router.replace_all(active_endpoints);
        }

        if let Err(err) = self.admin.shaper.update_rules(rules) {
            warn!(error = %err, "appView traffic rule update rejected");
        }
    }

    /// Exposes the watched authority for callers that need to thread it
    /// into the internal execution API (params' implicit `$authorityId`).
    pub fn authority_id(&self) -> &str {
        &self.authority_id
    }
}

fn parse_endpoint(entry: &Value) -> Option<DeployedEndpoint> {
    let name = entry.get("name")?.as_str()?.to_string();
    let kind = match entry.get("kind")?.as_str()? {
        "computed" => EndpointKind::Computed,
        "function" => EndpointKind::Function,
        "searchIndex" => EndpointKind::SearchIndex,
        "subscription" => EndpointKind::Subscription,
        _ => return None,
    };
    let reference = entry.get("ref")?;
    let resource_ref = ResourceRef::new(
        reference.get("authorityId")?.as_str()?.to_string(),
        reference.get("contentHash")?.as_str()?.to_string(),
    );
    Some(DeployedEndpoint { name, kind, resource_ref })
}

fn parse_traffic_rule(entry: &Value) -> Option<TrafficRule> {
    let deploy = entry.get("deploy")?;
    let resource_ref = ResourceRef::new(
        deploy.get("authorityId")?.as_str()?.to_string(),
        deploy.get("contentHash")?.as_str()?.to_string(),
    );
    let weight_bp = entry.get("weightBP")?.as_u64()? as u32;
    Some(TrafficRule {
        deploy: resource_ref,
        weight_bp,
    })
}

/// Parses a `computed` record's body as the `Query` it declares.
pub fn parse_computed_query(body: &Value) -> anyhow::Result<Query> {
    Ok(serde_json::from_value(body.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn computed_event_populates_the_record_store() {
        let resolver = Arc::new(PdsResolver::new(reqwest::Client::new()));
        let changelog = Arc::new(Database::connect_in_memory().await.unwrap());
        let admin = Arc::new(AdminSink {
            router: Arc::new(DynamicRouter::new()),
            shaper: Arc::new(TrafficShaper::new()),
            subscriptions: Arc::new(SubscriptionManager::new()),
        });
        let controller = Controller::new(
            "did:plc:alice".into(),
            resolver,
            changelog,
            admin,
            2,
            Duration::from_millis(0),
        );

        let event = Event {
            op: EventOp::Create,
            collection: "app.avaast.computed".into(),
            record_key: "c1".into(),
            authority_id: "did:plc:alice".into(),
            content_hash: Some("hash1".into()),
            body: Some(serde_json::json!({"select": []})),
        };
        controller.handle_event(event).await;

        let body = controller
            .record_store()
            .get_body(&ResourceRef::new("did:plc:alice", "hash1"))
            .unwrap();
        assert_eq!(body["select"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn app_view_pushes_traffic_rules_to_the_shaper() {
        let resolver = Arc::new(PdsResolver::new(reqwest::Client::new()));
        let changelog = Arc::new(Database::connect_in_memory().await.unwrap());
        let shaper = Arc::new(TrafficShaper::new());
        let admin = Arc::new(AdminSink {
            router: Arc::new(DynamicRouter::new()),
            shaper: shaper.clone(),
            subscriptions: Arc::new(SubscriptionManager::new()),
        });
        let controller = Controller::new(
            "did:plc:alice".into(),
            resolver,
            changelog,
            admin,
            2,
            Duration::from_millis(0),
        );

        let event = Event {
            op: EventOp::Create,
            collection: "app.avaast.appView".into(),
            record_key: "av1".into(),
            authority_id: "did:plc:alice".into(),
            content_hash: Some("hashview".into()),
            body: Some(serde_json::json!({
                "trafficRules": [
                    {"deploy": {"authorityId": "did:plc:alice", "contentHash": "d1"}, "weightBP": 10000}
                ]
            })),
        };
        controller.handle_event(event).await;

        assert_eq!(shaper.rule_count(), 1);
    }

    #[tokio::test]
    async fn deploy_activation_repushes_the_latest_traffic_rules() {
        let resolver = Arc::new(PdsResolver::new(reqwest::Client::new()));
        let changelog = Arc::new(Database::connect_in_memory().await.unwrap());
        let shaper = Arc::new(TrafficShaper::new());
        let admin = Arc::new(AdminSink {
            router: Arc::new(DynamicRouter::new()),
            shaper: shaper.clone(),
            subscriptions: Arc::new(SubscriptionManager::new()),
        });
        let controller = Controller::new(
            "did:plc:alice".into(),
            resolver,
            changelog,
            admin,
            2,
            Duration::from_millis(0),
        );

        let app_view = Event {
            op: EventOp::Create,
            collection: "app.avaast.appView".into(),
            record_key: "av1".into(),
            authority_id: "did:plc:alice".into(),
            content_hash: Some("hashview".into()),
            body: Some(serde_json::json!({
                "trafficRules": [
                    {"deploy": {"authorityId": "did:plc:alice", "contentHash": "d1"}, "weightBP": 10000}
                ]
            })),
        };
        controller.handle_event(app_view).await;
        assert_eq!(shaper.rule_count(), 1);

        // A brand new Shaper push is only made by the appView handler, so
        // clobber the rule via a direct call to simulate a later reset, then
        // confirm the deploy activation below puts it back.
        shaper.update_rules(vec![]).unwrap();
        assert_eq!(shaper.rule_count(), 0);

        let deploy = Event {
            op: EventOp::Create,
            collection: "app.avaast.deploy".into(),
            record_key: "d1".into(),
            authority_id: "did:plc:alice".into(),
            content_hash: Some("d1".into()),
            body: Some(serde_json::json!({"endpoints": []})),
        };
        controller.handle_event(deploy).await;

        assert_eq!(shaper.rule_count(), 1);
    }

    #[tokio::test]
    async fn app_view_repushes_endpoints_from_the_active_manifest() {
        let resolver = Arc::new(PdsResolver::new(reqwest::Client::new()));
        let changelog = Arc::new(Database::connect_in_memory().await.unwrap());
        let router = Arc::new(DynamicRouter::new());
        let admin = Arc::new(AdminSink {
            router: router.clone(),
            shaper: Arc::new(TrafficShaper::new()),
            subscriptions: Arc::new(SubscriptionManager::new()),
        });
        let controller = Controller::new(
            "did:plc:alice".into(),
            resolver,
            changelog,
            admin,
            2,
            Duration::from_millis(0),
        );

        let computed = Event {
            op: EventOp::Create,
            collection: "app.avaast.computed".into(),
            record_key: "c1".into(),
            authority_id: "did:plc:alice".into(),
            content_hash: Some("hash1".into()),
            body: Some(serde_json::json!({"select": []})),
        };
        controller.handle_event(computed).await;

        let deploy = Event {
            op: EventOp::Create,
            collection: "app.avaast.deploy".into(),
            record_key: "d1".into(),
            authority_id: "did:plc:alice".into(),
            content_hash: Some("d1".into()),
            body: Some(serde_json::json!({
                "endpoints": [
                    {
                        "name": "getThing",
                        "kind": "computed",
                        "ref": {"authorityId": "did:plc:alice", "contentHash": "hash1"}
                    }
                ]
            })),
        };
        controller.handle_event(deploy).await;
        assert!(router.get_endpoint("getThing").is_ok());

        router.replace_all(vec![]);
        assert!(router.get_endpoint("getThing").is_err());

        let app_view = Event {
            op: EventOp::Create,
            collection: "app.avaast.appView".into(),
            record_key: "av1".into(),
            authority_id: "did:plc:alice".into(),
            content_hash: Some("hashview".into()),
            body: Some(serde_json::json!({"trafficRules": []})),
        };
        controller.handle_event(app_view).await;

        assert!(router.get_endpoint("getThing").is_ok());
    }
}
