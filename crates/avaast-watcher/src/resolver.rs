//! PDS Resolver — maps an authority identifier (DID-like) to an HTTP base
//! URL, then exposes narrow record/blob fetch operations against that base.
//!
//! Two identifier families are supported: directory-hosted (looked up
//! against a PLC-style directory) and web-hosted (`did:web:<domain>`,
//! resolved via that domain's `.well-known/did.json`). Resolved base URLs
//! are cached with a TTL so repeated lookups for the same authority don't
//! repeat the DID-document fetch.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ResolutionError;

const DEFAULT_TTL: Duration = Duration::from_secs(300);
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
const PLC_DIRECTORY_BASE: &str = "https://plc.directory";

#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(default)]
    service: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "serviceEndpoint")]
    service_endpoint: String,
}

struct CacheEntry {
    base_url: String,
    expires_at: Instant,
}

/// Resolves authority identifiers to PDS base URLs and proxies record/blob
/// reads against the resolved host.
pub struct PdsResolver {
    http: reqwest::Client,
    directory_base: String,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl PdsResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            directory_base: PLC_DIRECTORY_BASE.to_string(),
            ttl: DEFAULT_TTL,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_directory_base(mut self, base: impl Into<String>) -> Self {
        self.directory_base = base.into();
        self
    }

    /// Resolves `authority_id` to a PDS base URL, consulting the cache first.
    pub async fn resolve(&self, authority_id: &str) -> Result<String, ResolutionError> {
        if let Some(cached) = self.cached(authority_id) {
            return Ok(cached);
        }

        let document_url = did_document_url(authority_id, &self.directory_base);
        let document: DidDocument = retry_with_backoff(|| async {
            let response = self
                .http
                .get(&document_url)
                .send()
                .await
                .map_err(|source| ResolutionError::Transport {
                    url: document_url.clone(),
                    source,
                })?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ResolutionError::NotFound(authority_id.to_string()));
            }
            if !response.status().is_success() {
                return Err(ResolutionError::Upstream {
                    status: response.status().as_u16(),
                    url: document_url.clone(),
                });
            }

            response
                .json::<DidDocument>()
                .await
                .map_err(|source| ResolutionError::Transport {
                    url: document_url.clone(),
                    source,
                })
        })
        .await?;

        let base_url = document
            .service
            .into_iter()
            .find(|entry| {
                entry.id.ends_with("atproto_pds") || entry.kind == "AtprotoPersonalDataServer"
            })
            .map(|entry| entry.service_endpoint)
            .ok_or_else(|| ResolutionError::NoServiceEntry(authority_id.to_string()))?;

        self.cache.write().insert(
            authority_id.to_string(),
            CacheEntry {
                base_url: base_url.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        Ok(base_url)
    }

    fn cached(&self, authority_id: &str) -> Option<String> {
        let cache = self.cache.read();
        let entry = cache.get(authority_id)?;
        if entry.expires_at > Instant::now() {
            Some(entry.base_url.clone())
        } else {
            None
        }
    }

    /// Fetches a single record by collection and record key.
    pub async fn get_record(
        &self,
        authority_id: &str,
        collection: &str,
        record_key: &str,
    ) -> Result<Value, ResolutionError> {
        let base_url = self.resolve(authority_id).await?;
        let url = format!(
            "{base_url}/xrpc/com.atproto.repo.getRecord?repo={authority_id}&collection={collection}&rkey={record_key}"
        );
        self.fetch_json(&url).await
    }

    /// Lists up to `limit` records in `collection` for `authority_id`.
    pub async fn list_records(
        &self,
        authority_id: &str,
        collection: &str,
        limit: u32,
    ) -> Result<Vec<Value>, ResolutionError> {
        let base_url = self.resolve(authority_id).await?;
        let url = format!(
            "{base_url}/xrpc/com.atproto.repo.listRecords?repo={authority_id}&collection={collection}&limit={limit}"
        );
        let body = self.fetch_json(&url).await?;
        Ok(body
            .get("records")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Fetches a content-addressed blob.
    pub async fn get_blob(
        &self,
        authority_id: &str,
        content_hash: &str,
    ) -> Result<Vec<u8>, ResolutionError> {
        let base_url = self.resolve(authority_id).await?;
        let url = format!(
            "{base_url}/xrpc/com.atproto.sync.getBlob?did={authority_id}&cid={content_hash}"
        );

        retry_with_backoff(|| async {
            let response = self.http.get(&url).send().await.map_err(|source| {
                ResolutionError::Transport {
                    url: url.clone(),
                    source,
                }
            })?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ResolutionError::NotFound(content_hash.to_string()));
            }
            if !response.status().is_success() {
                return Err(ResolutionError::Upstream {
                    status: response.status().as_u16(),
                    url: url.clone(),
                });
            }
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|source| ResolutionError::Transport {
                    url: url.clone(),
                    source,
                })
        })
        .await
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, ResolutionError> {
        retry_with_backoff(|| async {
            let response = self.http.get(url).send().await.map_err(|source| {
                ResolutionError::Transport {
                    url: url.to_string(),
                    source,
                }
            })?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ResolutionError::NotFound(url.to_string()));
            }
            if !response.status().is_success() {
                return Err(ResolutionError::Upstream {
                    status: response.status().as_u16(),
                    url: url.to_string(),
                });
            }
            response
                .json::<Value>()
                .await
                .map_err(|source| ResolutionError::Transport {
                    url: url.to_string(),
                    source,
                })
        })
        .await
    }
}

fn did_document_url(authority_id: &str, directory_base: &str) -> String {
    if let Some(domain) = authority_id.strip_prefix("did:web:") {
        let domain = domain.replace(':', "/");
        format!("https://{domain}/.well-known/did.json")
    } else {
        format!("{directory_base}/{authority_id}")
    }
}

/// Retries `operation` up to [`RETRY_ATTEMPTS`] times with capped exponential
/// backoff. `NotFound` and malformed-document failures are not retried —
/// only transport/upstream failures are.
async fn retry_with_backoff<F, Fut, T>(mut operation: F) -> Result<T, ResolutionError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ResolutionError>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut last_err = None;

    for attempt in 0..RETRY_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err @ ResolutionError::NotFound(_))
            | Err(err @ ResolutionError::NoServiceEntry(_))
            | Err(err @ ResolutionError::MalformedDocument(_, _)) => return Err(err),
            Err(err) => {
                last_err = Some(err);
                if attempt + 1 < RETRY_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, RETRY_MAX_DELAY);
                }
            }
        }
    }

    Err(last_err.expect("loop runs at least once"))
}
