//! Firehose transport — subscribes directly to the authoritative PDS's repo
//! commit stream. Binary frames would require a CBOR/CAR decoder this
//! implementation does not carry; they are dropped in favour of the textual
//! JSON frames the stream also emits, with the polling transport as the
//! documented fallback for any PDS that speaks binary frames exclusively.

use std::{collections::HashSet, sync::Arc};

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use avaast_store::Database;

use crate::{
    event::{Event, EventOp},
    resolver::PdsResolver,
};

use super::{is_stopped, Backoff, WatcherTransport};

const FIREHOSE_CURSOR_KEY: &str = "firehose";

#[derive(Debug, Deserialize)]
struct FirehoseFrame {
    seq: Option<i64>,
    #[serde(rename = "authorityId")]
    authority_id: String,
    operation: String,
    collection: String,
    #[serde(rename = "recordKey")]
    record_key: String,
    body: Option<Value>,
    #[serde(rename = "contentHash")]
    content_hash: Option<String>,
}

pub struct FirehoseTransport {
    resolver: Arc<PdsResolver>,
    store: Option<Arc<Database>>,
    authority_id: String,
    watched_collections: HashSet<String>,
}

impl FirehoseTransport {
    pub fn new(
        resolver: Arc<PdsResolver>,
        store: Option<Arc<Database>>,
        authority_id: String,
        watched_collections: HashSet<String>,
    ) -> Self {
        Self {
            resolver,
            store,
            authority_id,
            watched_collections,
        }
    }

    /// One-shot connection attempt used by the Watcher's startup selection
    /// policy; does not retry or reconnect.
    pub async fn probe(&self) -> anyhow::Result<()> {
        let url = self.subscribe_url().await?;
        let (stream, _response) = tokio_tungstenite::connect_async(&url).await?;
        drop(stream);
        Ok(())
    }

    async fn subscribe_url(&self) -> anyhow::Result<String> {
        let base_url = self.resolver.resolve(&self.authority_id).await?;
        let ws_base = base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);

        let cursor = match &self.store {
            Some(store) => store.get_cursor(FIREHOSE_CURSOR_KEY).await?,
            None => None,
        };

        Ok(match cursor {
            Some(cursor) => format!(
                "{ws_base}/xrpc/com.atproto.sync.subscribeRepos?cursor={cursor}"
            ),
            None => format!("{ws_base}/xrpc/com.atproto.sync.subscribeRepos"),
        })
    }

    fn translate(&self, frame: FirehoseFrame) -> Option<Event> {
        if frame.authority_id != self.authority_id {
            return None;
        }
        if !self.watched_collections.contains(&frame.collection) {
            return None;
        }
        let op = match frame.operation.as_str() {
            "create" => EventOp::Create,
            "update" => EventOp::Update,
            "delete" => EventOp::Delete,
            other => {
                tracing::warn!(operation = other, "firehose frame with unknown operation");
                return None;
            }
        };
        Some(Event {
            op,
            collection: frame.collection,
            record_key: frame.record_key,
            authority_id: frame.authority_id,
            content_hash: frame.content_hash,
            body: frame.body,
        })
    }

    async fn commit_cursor(&self, seq: i64) {
        if let Some(store) = &self.store {
            if let Err(err) = store.set_cursor(FIREHOSE_CURSOR_KEY, seq).await {
                tracing::warn!(error = %err, "failed to persist firehose cursor");
            }
        }
    }
}

#[async_trait::async_trait]
impl WatcherTransport for FirehoseTransport {
    async fn run(&self, sink: mpsc::Sender<Event>, mut stop: watch::Receiver<bool>) {
        let mut backoff = Backoff::default();

        while !is_stopped(&stop) {
            let url = match self.subscribe_url().await {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!(error = %err, "firehose could not build subscribe url, retrying");
                    tokio::select! {
                        _ = backoff.wait() => {}
                        _ = stop.changed() => {}
                    }
                    continue;
                }
            };

            let connection = tokio_tungstenite::connect_async(&url).await;
            let (mut stream, _response) = match connection {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "firehose connect failed, retrying");
                    tokio::select! {
                        _ = backoff.wait() => {}
                        _ = stop.changed() => {}
                    }
                    continue;
                }
            };
            backoff.reset();
            tracing::info!(url = %url, "firehose connected");

            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        let _ = stream.close(None).await;
                        return;
                    }
                    message = stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<FirehoseFrame>(&text) {
                                    Ok(frame) => {
                                        if let Some(seq) = frame.seq {
                                            self.commit_cursor(seq).await;
                                        }
                                        if let Some(event) = self.translate(frame) {
                                            if sink.send(event).await.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                    Err(err) => {
                                        tracing::debug!(error = %err, "firehose text frame not decodable, skipping");
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                tracing::debug!("firehose binary frame skipped (no CBOR decoder)");
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::warn!(url = %url, "firehose connection closed, reconnecting");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                tracing::warn!(url = %url, error = %err, "firehose stream error, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }

            if is_stopped(&stop) {
                return;
            }
            tokio::select! {
                _ = backoff.wait() => {}
                _ = stop.changed() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> FirehoseTransport {
        FirehoseTransport::new(
            Arc::new(PdsResolver::new(reqwest::Client::new())),
            None,
            "did:plc:alice".to_string(),
            HashSet::from(["app.avaast.deploy".to_string()]),
        )
    }

    #[test]
    fn unwatched_collection_is_dropped() {
        let frame = FirehoseFrame {
            seq: Some(1),
            authority_id: "did:plc:alice".to_string(),
            operation: "create".to_string(),
            collection: "app.avaast.other".to_string(),
            record_key: "a".to_string(),
            body: None,
            content_hash: None,
        };
        assert!(transport().translate(frame).is_none());
    }

    #[test]
    fn matching_frame_translates() {
        let frame = FirehoseFrame {
            seq: Some(7),
            authority_id: "did:plc:alice".to_string(),
            operation: "delete".to_string(),
            collection: "app.avaast.deploy".to_string(),
            record_key: "a".to_string(),
            body: None,
            content_hash: None,
        };
        let event = transport().translate(frame).expect("translates");
        assert_eq!(event.op, EventOp::Delete);
    }
}
