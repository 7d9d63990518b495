//! Polling transport — the universal fallback. Lists each watched
//! collection on a fixed interval and diffs against the last-seen content
//! hash per `(collection, recordKey)` to synthesize create/update/delete
//! events.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use base64::Engine;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};

use crate::{
    event::{Event, EventOp},
    resolver::PdsResolver,
};

use super::{is_stopped, WatcherTransport};

const LIST_LIMIT: u32 = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct PollingTransport {
    resolver: Arc<PdsResolver>,
    authority_id: String,
    watched_collections: HashSet<String>,
    interval: Duration,
    seen: Mutex<HashMap<(String, String), String>>,
}

impl PollingTransport {
    pub fn new(
        resolver: Arc<PdsResolver>,
        authority_id: String,
        watched_collections: HashSet<String>,
        interval: Duration,
    ) -> Self {
        Self {
            resolver,
            authority_id,
            watched_collections,
            interval,
            seen: Mutex::new(HashMap::new()),
        }
    }

    async fn poll_once(&self, sink: &mpsc::Sender<Event>) {
        for collection in self.watched_collections.clone() {
            let records = match self
                .resolver
                .list_records(&self.authority_id, &collection, LIST_LIMIT)
                .await
            {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!(collection = %collection, error = %err, "poll listRecords failed");
                    continue;
                }
            };

            let mut current: HashMap<String, (String, Option<Value>)> = HashMap::new();
            for record in &records {
                if let Some((record_key, content_hash, body)) = decode_record(record) {
                    current.insert(record_key, (content_hash, body));
                }
            }

            let mut seen = self.seen.lock();
            let previous_keys: Vec<String> = seen
                .keys()
                .filter(|(c, _)| c == &collection)
                .map(|(_, key)| key.clone())
                .collect();

            for (record_key, (content_hash, body)) in &current {
                let composite = (collection.clone(), record_key.clone());
                match seen.get(&composite) {
                    None => {
                        seen.insert(composite, content_hash.clone());
                        emit(sink, EventOp::Create, &collection, record_key, &self.authority_id, Some(content_hash.clone()), body.clone()).await;
                    }
                    Some(previous_hash) if previous_hash != content_hash => {
                        seen.insert(composite, content_hash.clone());
                        emit(sink, EventOp::Update, &collection, record_key, &self.authority_id, Some(content_hash.clone()), body.clone()).await;
                    }
                    Some(_) => {}
                }
            }

            for record_key in previous_keys {
                if !current.contains_key(&record_key) {
                    seen.remove(&(collection.clone(), record_key.clone()));
                    emit(sink, EventOp::Delete, &collection, &record_key, &self.authority_id, None, None).await;
                }
            }
        }
    }
}

fn decode_record(record: &Value) -> Option<(String, String, Option<Value>)> {
    let uri = record.get("uri").and_then(Value::as_str);
    let record_key = uri
        .and_then(|uri| uri.rsplit('/').next())
        .map(|s| s.to_string())
        .or_else(|| record.get("rkey").and_then(Value::as_str).map(String::from))?;

    let body = record.get("value").cloned();

    let content_hash = record
        .get("cid")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| fallback_content_hash(body.as_ref()));

    Some((record_key, content_hash, body))
}

fn fallback_content_hash(body: Option<&Value>) -> String {
    let bytes = body.map(|v| v.to_string()).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

async fn emit(
    sink: &mpsc::Sender<Event>,
    op: EventOp,
    collection: &str,
    record_key: &str,
    authority_id: &str,
    content_hash: Option<String>,
    body: Option<Value>,
) {
    let _ = sink
        .send(Event {
            op,
            collection: collection.to_string(),
            record_key: record_key.to_string(),
            authority_id: authority_id.to_string(),
            content_hash,
            body,
        })
        .await;
}

#[async_trait::async_trait]
impl WatcherTransport for PollingTransport {
    async fn run(&self, sink: mpsc::Sender<Event>, mut stop: watch::Receiver<bool>) {
        while !is_stopped(&stop) {
            self.poll_once(&sink).await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop.changed() => { return; }
            }
        }
    }
}
