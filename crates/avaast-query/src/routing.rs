//! Wraps a [`DataSource`] so that collections suffixed `:updates` or
//! `:deletes` are served from the Change Log instead of the wrapped source,
//! exposing `_rkey`, `_authorityId`, `_eventType`, and `_createdAt` alongside
//! the changed record's body fields.

use std::sync::Arc;

use async_trait::async_trait;
use avaast_store::{ChangeLogFilters, Database, EventKind};
use serde_json::Value;

use crate::ast::Source;
use crate::engine::{DataSource, Row};

const UPDATES_SUFFIX: &str = ":updates";
const DELETES_SUFFIX: &str = ":deletes";

pub struct RoutingDataSource<S> {
    inner: S,
    store: Arc<Database>,
}

impl<S> RoutingDataSource<S> {
    pub fn new(inner: S, store: Arc<Database>) -> Self {
        Self { inner, store }
    }

    async fn fetch_changelog(&self, base_collection: &str, source: &Source, event_type: EventKind) -> anyhow::Result<Vec<Row>> {
        let filters = ChangeLogFilters {
            collection: Some(base_collection.to_string()),
            authority_id: source.authority_id.clone(),
            event_type: Some(event_type),
            after: None,
            limit: None,
        };
        let entries = self.store.list_changelog_entries(&filters).await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let mut row: Row = match entry.body {
                    Some(Value::Object(map)) => map.into_iter().collect(),
                    _ => Row::new(),
                };
                row.insert("_rkey".into(), Value::String(entry.record_key));
                row.insert("_authorityId".into(), Value::String(entry.authority_id));
                row.insert("_eventType".into(), Value::String(event_type_label(entry.event_type)));
                row.insert("_createdAt".into(), Value::String(entry.created_at.to_rfc3339()));
                row
            })
            .collect())
    }
}

fn event_type_label(kind: EventKind) -> String {
    match kind {
        EventKind::Create => "create",
        EventKind::Update => "update",
        EventKind::Delete => "delete",
    }
    .to_string()
}

#[async_trait]
impl<S: DataSource + Send + Sync> DataSource for RoutingDataSource<S> {
    async fn fetch(&self, source: &Source) -> anyhow::Result<Vec<Row>> {
        if let Some(base) = source.collection.strip_suffix(UPDATES_SUFFIX) {
            return self.fetch_changelog(base, source, EventKind::Update).await;
        }
        if let Some(base) = source.collection.strip_suffix(DELETES_SUFFIX) {
            return self.fetch_changelog(base, source, EventKind::Delete).await;
        }
        self.inner.fetch(source).await
    }
}
