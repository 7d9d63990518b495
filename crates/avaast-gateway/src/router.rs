//! Dynamic Router — the `endpointName → DeployedEndpoint` registry the
//! Gateway HTTP surface consults to dispatch an XRPC call.

use std::collections::HashMap;

use avaast_orchestrator::DeployedEndpoint;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("method not found: {0}")]
    MethodNotFound(String),
}

/// Registered endpoints, keyed by their externally visible XRPC method
/// name. Registering a name that already exists replaces the prior entry.
pub struct DynamicRouter {
    endpoints: RwLock<HashMap<String, DeployedEndpoint>>,
}

impl Default for DynamicRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicRouter {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the entire registry with `endpoints`, keyed by name.
    pub fn replace_all(&self, endpoints: Vec<DeployedEndpoint>) {
        let mut map = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints {
            map.insert(endpoint.name.clone(), endpoint);
        }
        *self.endpoints.write() = map;
    }

    pub fn get_endpoint(&self, name: &str) -> Result<DeployedEndpoint, RouterError> {
        self.endpoints
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::MethodNotFound(name.to_string()))
    }

    pub fn get_endpoint_names(&self) -> Vec<String> {
        self.endpoints.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avaast_orchestrator::{graph::ResourceRef, manifest::EndpointKind};

    fn endpoint(name: &str) -> DeployedEndpoint {
        DeployedEndpoint {
            name: name.to_string(),
            kind: EndpointKind::Computed,
            resource_ref: ResourceRef::new("did:plc:alice", "c1"),
        }
    }

    #[test]
    fn unknown_endpoint_is_method_not_found() {
        let router = DynamicRouter::new();
        let err = router.get_endpoint("chat.pirate.doesNotExist").unwrap_err();
        assert_eq!(
            err,
            RouterError::MethodNotFound("chat.pirate.doesNotExist".into())
        );
    }

    #[test]
    fn replace_all_swaps_the_whole_registry() {
        let router = DynamicRouter::new();
        router.replace_all(vec![endpoint("chat.pirate.getAvasts")]);
        assert!(router.get_endpoint("chat.pirate.getAvasts").is_ok());

        router.replace_all(vec![endpoint("chat.pirate.getAyes")]);
        assert!(router.get_endpoint("chat.pirate.getAvasts").is_err());
        assert!(router.get_endpoint("chat.pirate.getAyes").is_ok());
    }

    #[test]
    fn registering_duplicate_name_replaces_prior_entry() {
        let router = DynamicRouter::new();
        router.replace_all(vec![endpoint("chat.pirate.getAvasts")]);
        let first = router.get_endpoint("chat.pirate.getAvasts").unwrap();
        router.replace_all(vec![DeployedEndpoint {
            resource_ref: ResourceRef::new("did:plc:alice", "c2"),
            ..endpoint("chat.pirate.getAvasts")
        }]);
        let second = router.get_endpoint("chat.pirate.getAvasts").unwrap();
        assert_ne!(first.resource_ref.content_hash, second.resource_ref.content_hash);
    }
}
