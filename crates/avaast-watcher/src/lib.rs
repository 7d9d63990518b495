//! Maintains an eventually-consistent view of a PDS account's
//! `app.avaast.*` records across three transport modes (real-time relay,
//! repo firehose, HTTP polling fallback), with cursor persistence and
//! reconnect policy.

pub mod error;
pub mod event;
pub mod resolver;
pub mod transport;
pub mod watcher;

pub use error::ResolutionError;
pub use event::{default_watched_collections, qualify_collection, Event, EventOp};
pub use resolver::PdsResolver;
pub use transport::WatcherTransport;
pub use watcher::{SelectedTransport, Watcher, WatcherConfig};
