//! Deploy Orchestrator — the state machine every deploy runs through, plus
//! the *K*-concurrent-ACTIVE-deploys activation/draining policy.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::{
    graph::ResourceRef,
    manifest::{DeployManifest, DeployedEndpoint, ManifestBuilder, ManifestError, RecordSource},
};

const DEFAULT_MAX_ACTIVE: usize = 2;
const TRANSITION_CHANNEL_CAPACITY: usize = 256;

/// A deploy's position in its lifecycle. Transitions are linear except
/// `Failed` (reachable from any state) and `Draining` (from `Active`,
/// voluntarily or forced by the *K* limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Pending,
    Fetching,
    Resolving,
    Building,
    Activating,
    Active,
    Draining,
    Retired,
    Failed,
}

impl DeployState {
    fn is_in_flight(self) -> bool {
        matches!(
            self,
            DeployState::Pending
                | DeployState::Fetching
                | DeployState::Resolving
                | DeployState::Building
                | DeployState::Activating
        )
    }
}

/// A deploy's current status snapshot.
#[derive(Debug, Clone)]
pub struct DeployStatus {
    pub deploy_ref: ResourceRef,
    pub state: DeployState,
    pub manifest: Option<DeployManifest>,
    pub error: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl DeployStatus {
    fn pending(deploy_ref: ResourceRef) -> Self {
        Self {
            deploy_ref,
            state: DeployState::Pending,
            manifest: None,
            error: None,
            activated_at: None,
            retired_at: None,
        }
    }
}

/// A traffic rule entry: a weighted pointer to a deploy. Weights are in
/// basis points (`10000` == 100%); a rule set's weights must sum to exactly
/// `10000` before the Traffic Shaper will accept it.
#[derive(Debug, Clone)]
pub struct TrafficRule {
    pub deploy: ResourceRef,
    pub weight_bp: u32,
}

/// Fired on every transition, carrying the deploy ref, its new state, and
/// the manifest if one now exists.
#[derive(Debug, Clone)]
pub struct DeployTransition {
    pub deploy_ref: ResourceRef,
    pub new_state: DeployState,
    pub manifest: Option<DeployManifest>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("deploy {0} is already mid-transition")]
    TransitionInProgress(String),
    #[error("deploy {0} not found")]
    NotFound(String),
    #[error("deploy {0} is not active")]
    NotActive(String),
    #[error(transparent)]
    Validation(#[from] ManifestError),
}

/// Drives deploys through their lifecycle state machine, generic over the
/// record source used to resolve and materialize manifests.
pub struct DeployOrchestrator<S: RecordSource> {
    manifest_builder: Arc<ManifestBuilder<S>>,
    statuses: Arc<RwLock<HashMap<String, DeployStatus>>>,
    transitions_tx: broadcast::Sender<DeployTransition>,
    max_active: usize,
    drain_grace: Duration,
}

impl<S: RecordSource> DeployOrchestrator<S> {
    pub fn new(manifest_builder: Arc<ManifestBuilder<S>>) -> Self {
        Self::with_limits(manifest_builder, DEFAULT_MAX_ACTIVE, Duration::from_secs(0))
    }

    pub fn with_limits(
        manifest_builder: Arc<ManifestBuilder<S>>,
        max_active: usize,
        drain_grace: Duration,
    ) -> Self {
        let (transitions_tx, _rx) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            manifest_builder,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            transitions_tx,
            max_active,
            drain_grace,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeployTransition> {
        self.transitions_tx.subscribe()
    }

    pub fn status(&self, deploy_ref: &ResourceRef) -> Option<DeployStatus> {
        self.statuses.read().get(&deploy_ref.ref_key()).cloned()
    }

    /// Every deploy currently in the `ACTIVE` state, oldest-activated first.
    pub fn active_deploys(&self) -> Vec<DeployStatus> {
        let mut active: Vec<DeployStatus> = self
            .statuses
            .read()
            .values()
            .filter(|s| s.state == DeployState::Active)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.activated_at);
        active
    }

    /// Advances a deploy from `PENDING` through to `ACTIVE`, building its
    /// manifest along the way. Enforces the *K* limit by forcing the
    /// oldest-activated `ACTIVE` deploy to `DRAINING` if needed.
    #[instrument(skip(self, endpoints))]
    pub async fn process_deploy(
        &self,
        deploy_ref: ResourceRef,
        endpoints: Vec<DeployedEndpoint>,
    ) -> Result<DeployStatus, OrchestratorError> {
        let key = deploy_ref.ref_key();

        {
            let mut statuses = self.statuses.write();
            if let Some(existing) = statuses.get(&key) {
                if existing.state.is_in_flight() {
                    return Err(OrchestratorError::TransitionInProgress(key));
                }
            }
            statuses.insert(key.clone(), DeployStatus::pending(deploy_ref.clone()));
        }

        self.transition(&key, DeployState::Fetching, None);
        self.transition(&key, DeployState::Resolving, None);
        self.transition(&key, DeployState::Building, None);

        let manifest = match self.manifest_builder.build(deploy_ref.clone(), endpoints).await {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(deploy = %key, error = %err, "deploy manifest build failed");
                self.fail(&key, err.to_string());
                return Err(OrchestratorError::Validation(err));
            }
        };

        self.transition(&key, DeployState::Activating, Some(manifest.clone()));

        self.enforce_active_limit().await;

        {
            let mut statuses = self.statuses.write();
            if let Some(status) = statuses.get_mut(&key) {
                status.state = DeployState::Active;
                status.manifest = Some(manifest.clone());
                status.activated_at = Some(Utc::now());
            }
        }
        self.broadcast(&key, DeployState::Active, Some(manifest));

        info!(deploy = %key, "deploy active");
        Ok(self.statuses.read().get(&key).cloned().expect("just inserted"))
    }

    /// Moves `ACTIVE` → `DRAINING` → `RETIRED`, waiting `drain_grace`
    /// between the two so in-flight operations against the old manifest can
    /// finish.
    #[instrument(skip(self))]
    pub async fn retire_deploy(&self, deploy_ref: &ResourceRef) -> Result<DeployStatus, OrchestratorError> {
        let key = deploy_ref.ref_key();
        {
            let status = self
                .statuses
                .read()
                .get(&key)
                .cloned()
                .ok_or_else(|| OrchestratorError::NotFound(key.clone()))?;
            if status.state != DeployState::Active {
                return Err(OrchestratorError::NotActive(key));
            }
        }

        self.transition(&key, DeployState::Draining, None);

        if !self.drain_grace.is_zero() {
            tokio::time::sleep(self.drain_grace).await;
        }

        {
            let mut statuses = self.statuses.write();
            if let Some(status) = statuses.get_mut(&key) {
                status.state = DeployState::Retired;
                status.retired_at = Some(Utc::now());
            }
        }
        self.broadcast(&key, DeployState::Retired, None);

        info!(deploy = %key, "deploy retired");
        Ok(self.statuses.read().get(&key).cloned().expect("just updated"))
    }

    /// Extracts the traffic-rule deploy refs from an `appView` record body.
    /// Callers decide whether to fetch any deploy not already known.
    pub fn process_app_view(record: &Value) -> Vec<ResourceRef> {
        record
            .get("trafficRules")
            .and_then(Value::as_array)
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(|rule| {
                        let deploy = rule.get("deploy")?;
                        let authority_id = deploy.get("authorityId")?.as_str()?.to_string();
                        let content_hash = deploy.get("contentHash")?.as_str()?.to_string();
                        Some(ResourceRef::new(authority_id, content_hash))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn enforce_active_limit(&self) {
        let active = self.active_deploys();
        if active.len() < self.max_active {
            return;
        }

        if let Some(oldest) = active.into_iter().next() {
            let key = oldest.deploy_ref.ref_key();
            warn!(deploy = %key, limit = self.max_active, "activation pressure, draining oldest active deploy");
            if let Err(err) = self.retire_deploy(&oldest.deploy_ref).await {
                warn!(deploy = %key, error = %err, "failed to drain oldest active deploy");
            }
        }
    }

    fn transition(&self, key: &str, new_state: DeployState, manifest: Option<DeployManifest>) {
        {
            let mut statuses = self.statuses.write();
            if let Some(status) = statuses.get_mut(key) {
                status.state = new_state;
                if manifest.is_some() {
                    status.manifest = manifest.clone();
                }
            }
        }
        self.broadcast(key, new_state, manifest);
    }

    fn fail(&self, key: &str, error: String) {
        {
            let mut statuses = self.statuses.write();
            if let Some(status) = statuses.get_mut(key) {
                status.state = DeployState::Failed;
                status.error = Some(error);
            }
        }
        self.broadcast(key, DeployState::Failed, None);
    }

    fn broadcast(&self, key: &str, new_state: DeployState, manifest: Option<DeployManifest>) {
        let deploy_ref = match self.statuses.read().get(key) {
            Some(status) => status.deploy_ref.clone(),
            None => return,
        };
        let _ = self.transitions_tx.send(DeployTransition {
            deploy_ref,
            new_state,
            manifest,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::{Node, NodeResolver, ResourceKind},
        manifest::EndpointKind,
    };
    use async_trait::async_trait;

    struct EmptySource;

    #[async_trait]
    impl NodeResolver for EmptySource {
        async fn resolve(&self, resource_ref: &ResourceRef) -> anyhow::Result<Option<Node>> {
            Ok(Some(Node {
                resource_ref: resource_ref.clone(),
                kind: ResourceKind::Computed,
                dependencies: vec![],
            }))
        }
    }

    #[async_trait]
    impl RecordSource for EmptySource {
        async fn record_body(&self, _resource_ref: &ResourceRef) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }

        async fn code_blob(&self, _resource_ref: &ResourceRef) -> anyhow::Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn orchestrator() -> DeployOrchestrator<EmptySource> {
        let builder = Arc::new(ManifestBuilder::new(Arc::new(EmptySource)));
        DeployOrchestrator::with_limits(builder, 1, Duration::from_millis(0))
    }

    fn deploy(n: &str) -> ResourceRef {
        ResourceRef::new("did:plc:alice", n)
    }

    fn endpoints_for(r: &ResourceRef) -> Vec<DeployedEndpoint> {
        vec![DeployedEndpoint {
            name: format!("endpoint-{}", r.content_hash),
            kind: EndpointKind::Computed,
            resource_ref: r.clone(),
        }]
    }

    #[tokio::test]
    async fn process_deploy_reaches_active() {
        let orch = orchestrator();
        let d1 = deploy("d1");
        let status = orch.process_deploy(d1.clone(), endpoints_for(&d1)).await.unwrap();
        assert_eq!(status.state, DeployState::Active);
        assert!(status.activated_at.is_some());
    }

    #[tokio::test]
    async fn activating_past_k_drains_oldest_active() {
        let orch = orchestrator();
        let d1 = deploy("d1");
        let d2 = deploy("d2");

        orch.process_deploy(d1.clone(), endpoints_for(&d1)).await.unwrap();
        orch.process_deploy(d2.clone(), endpoints_for(&d2)).await.unwrap();

        let d1_status = orch.status(&d1).unwrap();
        assert_eq!(d1_status.state, DeployState::Retired);

        let d2_status = orch.status(&d2).unwrap();
        assert_eq!(d2_status.state, DeployState::Active);

        assert_eq!(orch.active_deploys().len(), 1);
    }

    #[tokio::test]
    async fn retire_deploy_moves_through_draining_to_retired() {
        let orch = orchestrator();
        let d1 = deploy("d1");
        orch.process_deploy(d1.clone(), endpoints_for(&d1)).await.unwrap();

        let status = orch.retire_deploy(&d1).await.unwrap();
        assert_eq!(status.state, DeployState::Retired);
        assert!(status.retired_at.is_some());
    }

    #[test]
    fn process_app_view_extracts_deploy_refs() {
        let record = serde_json::json!({
            "trafficRules": [
                {"deploy": {"authorityId": "did:plc:alice", "contentHash": "d1"}, "weightBP": 10000},
            ]
        });
        let refs = DeployOrchestrator::<EmptySource>::process_app_view(&record);
        assert_eq!(refs, vec![deploy("d1")]);
    }
}
