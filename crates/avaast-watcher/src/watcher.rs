//! The Watcher itself: picks a transport at start according to the
//! configured selection policy and exposes the unified event stream.

use std::{collections::HashSet, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use avaast_store::Database;

use crate::{
    event::Event,
    resolver::PdsResolver,
    transport::{
        firehose::FirehoseTransport, polling::PollingTransport, relay::RelayTransport,
        WatcherTransport,
    },
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub authority_id: String,
    pub relay_url: Option<String>,
    pub watched_collections: HashSet<String>,
    pub poll_interval: Duration,
}

impl WatcherConfig {
    pub fn new(authority_id: impl Into<String>, watched_collections: HashSet<String>) -> Self {
        Self {
            authority_id: authority_id.into(),
            relay_url: None,
            watched_collections,
            poll_interval: crate::transport::polling::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into());
        self
    }
}

/// Which transport the selection policy ultimately picked for a running
/// Watcher instance — exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedTransport {
    Relay,
    Firehose,
    Polling,
}

pub struct Watcher {
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    selected: SelectedTransport,
}

impl Watcher {
    /// Applies the selection policy (relay configured → relay; else probe
    /// firehose; on failure → polling), spawns the chosen transport, and
    /// returns the handle plus the event channel it feeds.
    pub async fn start(
        config: WatcherConfig,
        resolver: Arc<PdsResolver>,
        store: Option<Arc<Database>>,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let (transport, selected): (Arc<dyn WatcherTransport>, SelectedTransport) =
            if let Some(relay_url) = config.relay_url.clone() {
                (
                    Arc::new(RelayTransport::new(
                        relay_url,
                        config.authority_id.clone(),
                        config.watched_collections.clone(),
                    )),
                    SelectedTransport::Relay,
                )
            } else {
                let firehose = FirehoseTransport::new(
                    resolver.clone(),
                    store.clone(),
                    config.authority_id.clone(),
                    config.watched_collections.clone(),
                );
                match firehose.probe().await {
                    Ok(()) => (Arc::new(firehose), SelectedTransport::Firehose),
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "firehose unavailable at startup, falling back to polling"
                        );
                        (
                            Arc::new(PollingTransport::new(
                                resolver.clone(),
                                config.authority_id.clone(),
                                config.watched_collections.clone(),
                                config.poll_interval,
                            )),
                            SelectedTransport::Polling,
                        )
                    }
                }
            };

        tracing::info!(?selected, authority_id = %config.authority_id, "watcher transport selected");

        let handle = tokio::spawn(async move {
            transport.run(event_tx, stop_rx).await;
        });

        (
            Self {
                stop_tx,
                task: Mutex::new(Some(handle)),
                selected,
            },
            event_rx,
        )
    }

    pub fn selected_transport(&self) -> SelectedTransport {
        self.selected
    }

    /// Terminates the active transport and waits for its task to exit.
    /// Idle transports stop immediately; an in-flight message is delivered
    /// best-effort before the task observes the stop signal.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
