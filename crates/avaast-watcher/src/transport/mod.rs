//! Transport implementations. Relay, Firehose, and Polling share no class
//! hierarchy — each is an independent implementation behind the same narrow
//! `{run, stop}` contract, driven by the Watcher's selection policy.

pub mod firehose;
pub mod polling;
pub mod relay;

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::event::Event;

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// A running transport's reconnect backoff state: starts at
/// [`RECONNECT_BASE_DELAY`], doubles on every failed attempt, caps at
/// [`RECONNECT_MAX_DELAY`], and resets the moment a connection succeeds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            delay: RECONNECT_BASE_DELAY,
        }
    }
}

impl Backoff {
    pub(crate) async fn wait(&mut self) {
        tokio::time::sleep(self.delay).await;
        self.delay = std::cmp::min(self.delay * 2, RECONNECT_MAX_DELAY);
    }

    pub(crate) fn reset(&mut self) {
        self.delay = RECONNECT_BASE_DELAY;
    }
}

/// Unifying contract every transport runs behind. `run` owns its own
/// reconnect loop and never returns until `stop` flips to `true`; it must
/// never propagate transport errors to the caller — only log them.
#[async_trait::async_trait]
pub trait WatcherTransport: Send + Sync {
    async fn run(&self, sink: mpsc::Sender<Event>, stop: watch::Receiver<bool>);
}

/// True once the stop signal has been raised.
pub(crate) fn is_stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}
