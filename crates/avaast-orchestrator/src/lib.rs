//! Runs the state machine over versioned deploys: resolves their dependency
//! graphs into manifests and arbitrates activation/draining under a
//! configurable concurrency limit.

pub mod graph;
pub mod manifest;
pub mod orchestrator;

pub use graph::{build_graph, validate, DependencyRef, EndpointRef, Node, NodeResolver, ResourceKind, ResourceRef};
pub use manifest::{DeployManifest, DeployedEndpoint, EndpointKind, ManifestBuilder, ManifestError, RecordSource, ResolvedResource};
pub use orchestrator::{DeployOrchestrator, DeployState, DeployStatus, DeployTransition, OrchestratorError, TrafficRule};
