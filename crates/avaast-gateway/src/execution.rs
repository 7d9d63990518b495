//! Internal execution API (Gateway → Engine): compiles a `computed`
//! endpoint's published `Query` into a `Plan`, executes it against live PDS
//! state routed through the Change Log for history-suffixed sources, and
//! caches the result by canonical query text and parameters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use avaast_query::{
    execute_with_params, plan, CacheKey, DataSource, Query, QueryCache, QueryError, Row,
    RoutingDataSource, Source,
};
use avaast_store::Database;
use avaast_watcher::PdsResolver;
use serde_json::Value;
use thiserror::Error;

const DEFAULT_LIST_LIMIT: u32 = 1_000;
const QUERY_CACHE_VERSION: u64 = 1;

/// Errors surfaced by executing an internal query, mapped to the gateway's
/// XRPC error taxonomy by [`crate::server::ApiError`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),
    #[error("upstream PDS request failed: {0}")]
    UpstreamFailure(String),
    #[error("query definition is malformed: {0}")]
    DeployValidationError(String),
    #[error(transparent)]
    Storage(#[from] avaast_store::StorageError),
}

impl From<QueryError> for ExecutionError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::UnsupportedExpression(msg) => ExecutionError::UnsupportedExpression(msg),
            other @ (QueryError::UnknownAlias(_)
            | QueryError::UnknownField { .. }
            | QueryError::MissingOperand { .. }
            | QueryError::ExpectedArrayOperand { .. }
            | QueryError::InvalidLikePattern(_)) => {
                ExecutionError::DeployValidationError(other.to_string())
            }
            QueryError::DataSource(err) => ExecutionError::UpstreamFailure(err.to_string()),
        }
    }
}

/// Fetches live records straight from the authority's PDS, unwrapping the
/// `{uri, cid, value}` record envelope into the bare record body.
pub struct PdsDataSource {
    resolver: Arc<PdsResolver>,
    default_authority: String,
}

impl PdsDataSource {
    pub fn new(resolver: Arc<PdsResolver>, default_authority: String) -> Self {
        Self {
            resolver,
            default_authority,
        }
    }
}

#[async_trait]
impl DataSource for PdsDataSource {
    async fn fetch(&self, source: &Source) -> anyhow::Result<Vec<Row>> {
        let authority_id = source
            .authority_id
            .clone()
            .unwrap_or_else(|| self.default_authority.clone());
        let records = self
            .resolver
            .list_records(&authority_id, &source.collection, DEFAULT_LIST_LIMIT)
            .await?;

        Ok(records
            .into_iter()
            .filter_map(|record| {
                let uri = record.get("uri").and_then(Value::as_str).map(str::to_string);
                let cid = record.get("cid").and_then(Value::as_str).map(str::to_string);
                let body = record.get("value").cloned().unwrap_or(Value::Null);
                let mut row: Row = match body {
                    Value::Object(map) => map.into_iter().collect(),
                    _ => Row::new(),
                };
                if let Some(uri) = uri {
                    row.insert("_uri".into(), Value::String(uri));
                }
                if let Some(cid) = cid {
                    row.insert("_cid".into(), Value::String(cid));
                }
                Some(row)
            })
            .collect())
    }
}

/// The result of executing a `computed` endpoint's query once.
pub struct QueryOutcome {
    pub results: Vec<Value>,
    pub cached: bool,
    pub duration: Duration,
}

/// Drives query compilation, execution, and caching for every `computed`
/// endpoint invocation.
pub struct QueryEngine {
    data_source: RoutingDataSource<PdsDataSource>,
    cache: QueryCache,
}

impl QueryEngine {
    pub fn new(resolver: Arc<PdsResolver>, store: Arc<Database>, default_authority: String) -> Self {
        let pds = PdsDataSource::new(resolver, default_authority);
        Self {
            data_source: RoutingDataSource::new(pds, store),
            cache: QueryCache::with_defaults(),
        }
    }

    pub async fn run(
        &self,
        query: &Query,
        canonical_text: &str,
        params: &HashMap<String, Value>,
    ) -> Result<QueryOutcome, ExecutionError> {
        let started = Instant::now();
        let param_pairs: Vec<(&str, &Value)> =
            params.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let key = CacheKey::new(canonical_text, &param_pairs);

        if let Some(cached) = self.cache.get(&key, QUERY_CACHE_VERSION) {
            let results: Vec<Value> = serde_json::from_value(cached).unwrap_or_default();
            return Ok(QueryOutcome {
                results,
                cached: true,
                duration: started.elapsed(),
            });
        }

        let compiled = plan(query);
        let rows = execute_with_params(&compiled, &self.data_source, params).await?;
        let results: Vec<Value> = rows
            .into_iter()
            .map(|row| Value::Object(row.into_iter().collect()))
            .collect();

        self.cache
            .put(key, serde_json::to_value(&results).unwrap_or(Value::Null), QUERY_CACHE_VERSION);

        Ok(QueryOutcome {
            results,
            cached: false,
            duration: started.elapsed(),
        })
    }
}
