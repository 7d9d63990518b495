//! Relay transport — a JSON-framed WebSocket carrying pre-decoded commit
//! frames from an upstream relay service.

use std::collections::HashSet;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::event::{Event, EventOp};

use super::{is_stopped, Backoff, WatcherTransport};

#[derive(Debug, Deserialize)]
struct RelayFrame {
    kind: String,
    #[serde(rename = "authorityId")]
    authority_id: String,
    #[allow(dead_code)]
    #[serde(rename = "time_us")]
    time_us: Option<i64>,
    commit: Option<CommitBody>,
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    operation: String,
    collection: String,
    #[serde(rename = "recordKey")]
    record_key: String,
    body: Option<Value>,
    #[serde(rename = "contentHash")]
    content_hash: Option<String>,
}

pub struct RelayTransport {
    url: String,
    authority_id: String,
    watched_collections: HashSet<String>,
}

impl RelayTransport {
    pub fn new(url: String, authority_id: String, watched_collections: HashSet<String>) -> Self {
        Self {
            url,
            authority_id,
            watched_collections,
        }
    }

    fn translate(&self, frame: RelayFrame) -> Option<Event> {
        if frame.kind != "commit" {
            return None;
        }
        if frame.authority_id != self.authority_id {
            return None;
        }
        let commit = frame.commit?;
        if !self.watched_collections.contains(&commit.collection) {
            return None;
        }

        let op = match commit.operation.as_str() {
            "create" => EventOp::Create,
            "update" => EventOp::Update,
            "delete" => EventOp::Delete,
            other => {
                tracing::warn!(operation = other, "relay frame with unknown operation");
                return None;
            }
        };

        Some(Event {
            op,
            collection: commit.collection,
            record_key: commit.record_key,
            authority_id: frame.authority_id,
            content_hash: commit.content_hash,
            body: commit.body,
        })
    }
}

#[async_trait::async_trait]
impl WatcherTransport for RelayTransport {
    async fn run(&self, sink: mpsc::Sender<Event>, mut stop: watch::Receiver<bool>) {
        let mut backoff = Backoff::default();

        while !is_stopped(&stop) {
            let connection = tokio_tungstenite::connect_async(&self.url).await;
            let (mut stream, _response) = match connection {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(url = %self.url, error = %err, "relay connect failed, retrying");
                    tokio::select! {
                        _ = backoff.wait() => {}
                        _ = stop.changed() => {}
                    }
                    continue;
                }
            };
            backoff.reset();
            tracing::info!(url = %self.url, "relay connected");

            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        let _ = stream.close(None).await;
                        return;
                    }
                    message = stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<RelayFrame>(&text) {
                                    Ok(frame) => {
                                        if let Some(event) = self.translate(frame) {
                                            if sink.send(event).await.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                    Err(err) => {
                                        tracing::warn!(error = %err, "relay frame not decodable, skipping");
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::warn!(url = %self.url, "relay connection closed, reconnecting");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                tracing::warn!(url = %self.url, error = %err, "relay stream error, reconnecting");
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

    fn transport() -> RelayTransport {
        RelayTransport::new(
            "wss://relay.example/subscribe".to_string(),
            "did:plc:alice".to_string(),
            HashSet::from(["app.avaast.deploy".to_string()]),
        )
    }

    #[test]
    fn non_commit_frames_are_dropped() {
        let frame = RelayFrame {
            kind: "info".to_string(),
            authority_id: "did:plc:alice".to_string(),
            time_us: None,
            commit: None,
        };
        assert!(transport().translate(frame).is_none());
    }

    #[test]
    fn frames_for_other_authorities_are_dropped() {
        let frame = RelayFrame {
            kind: "commit".to_string(),
            authority_id: "did:plc:mallory".to_string(),
            time_us: Some(1),
            commit: Some(CommitBody {
                operation: "create".to_string(),
                collection: "app.avaast.deploy".to_string(),
                record_key: "abc".to_string(),
                body: None,
                content_hash: None,
            }),
        };
        assert!(transport().translate(frame).is_none());
    }

    #[test]
    fn frames_for_unwatched_collections_are_dropped() {
        let frame = RelayFrame {
            kind: "commit".to_string(),
            authority_id: "did:plc:alice".to_string(),
            time_us: Some(1),
            commit: Some(CommitBody {
                operation: "create".to_string(),
                collection: "app.avaast.unrelated".to_string(),
                record_key: "abc".to_string(),
                body: None,
                content_hash: None,
            }),
        };
        assert!(transport().translate(frame).is_none());
    }

    #[test]
    fn matching_commit_frame_translates_to_event() {
        let frame = RelayFrame {
            kind: "commit".to_string(),
            authority_id: "did:plc:alice".to_string(),
            time_us: Some(1),
            commit: Some(CommitBody {
                operation: "update".to_string(),
                collection: "app.avaast.deploy".to_string(),
                record_key: "abc".to_string(),
                body: Some(serde_json::json!({"ok": true})),
                content_hash: Some("bafy123".to_string()),
            }),
        };
        let event = transport().translate(frame).expect("should translate");
        assert_eq!(event.op, EventOp::Update);
        assert_eq!(event.collection, "app.avaast.deploy");
        assert_eq!(event.content_hash.as_deref(), Some("bafy123"));
    }
}
