//! The Gateway process: the XRPC entrypoint (Dynamic Router + Traffic
//! Shaper), the admin push API the Controller drives, and the Controller
//! orchestration itself that wires the Watcher's events to the Orchestrator
//! and the Gateway's in-memory registries.

pub mod controller;
pub mod execution;
pub mod identity;
pub mod middleware;
pub mod router;
pub mod server;
pub mod shaper;
pub mod subscriptions;
pub mod telemetry;
