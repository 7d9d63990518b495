//! Change Log — the append-only record of accepted mutations the Watcher has
//! observed, consumed by the Controller to drive downstream components and
//! by operators for replay/debugging.
//!
//! Entries are never updated or deleted once written (§3 Lifecycles); the
//! only operations are `append` and a filtered, time-ordered `list`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

use crate::{Database, DatabaseDriver, StorageError};

/// The kind of mutation a Change Log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }

    fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw {
            "create" => Ok(EventKind::Create),
            "update" => Ok(EventKind::Update),
            "delete" => Ok(EventKind::Delete),
            other => Err(StorageError::Decode(format!("unknown event_type: {other}"))),
        }
    }
}

/// A single durable Change Log row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub collection: String,
    pub record_key: String,
    pub authority_id: String,
    pub event_type: EventKind,
    pub body: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to append a new entry; `id` and `created_at` are assigned
/// by the store.
#[derive(Debug, Clone)]
pub struct NewChangeLogEntry {
    pub collection: String,
    pub record_key: String,
    pub authority_id: String,
    pub event_type: EventKind,
    pub body: Option<Value>,
}

/// Optional filters for listing Change Log entries. `None` fields are not
/// applied.
#[derive(Debug, Clone, Default)]
pub struct ChangeLogFilters {
    pub collection: Option<String>,
    pub authority_id: Option<String>,
    pub event_type: Option<EventKind>,
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

const DEFAULT_LIST_LIMIT: i64 = 100;

impl Database {
    /// Appends a new Change Log entry and returns the fully populated row.
    pub async fn append_changelog_entry(
        &self,
        entry: NewChangeLogEntry,
    ) -> Result<ChangeLogEntry, StorageError> {
        let created_at = Utc::now();
        let body_json = entry
            .body
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|err| StorageError::Decode(err.to_string()))?;

        let id: i64 = match self.driver() {
            DatabaseDriver::Sqlite => {
                let result = sqlx::query(
                    "INSERT INTO changelog (collection, record_key, authority_id, event_type, body_json, created_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&entry.collection)
                .bind(&entry.record_key)
                .bind(&entry.authority_id)
                .bind(entry.event_type.as_str())
                .bind(&body_json)
                .bind(created_at.to_rfc3339())
                .execute(self.pool())
                .await?;
                result.last_insert_id().unwrap_or_default()
            }
            DatabaseDriver::Postgres => {
                let row = sqlx::query(
                    "INSERT INTO changelog (collection, record_key, authority_id, event_type, body_json, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                )
                .bind(&entry.collection)
                .bind(&entry.record_key)
                .bind(&entry.authority_id)
                .bind(entry.event_type.as_str())
                .bind(&body_json)
                .bind(created_at)
                .fetch_one(self.pool())
                .await?;
                row.try_get("id")?
            }
        };

        Ok(ChangeLogEntry {
            id,
            collection: entry.collection,
            record_key: entry.record_key,
            authority_id: entry.authority_id,
            event_type: entry.event_type,
            body: entry.body,
            created_at,
        })
    }

    /// Lists entries matching `filters`, newest first, capped at
    /// `filters.limit` (default 100).
    pub async fn list_changelog_entries(
        &self,
        filters: &ChangeLogFilters,
    ) -> Result<Vec<ChangeLogEntry>, StorageError> {
        let mut builder: QueryBuilder<sqlx::Any> = QueryBuilder::new(
            "SELECT id, collection, record_key, authority_id, event_type, body_json, created_at FROM changelog WHERE 1 = 1",
        );

        if let Some(collection) = &filters.collection {
            builder.push(" AND collection = ").push_bind(collection.clone());
        }
        if let Some(authority_id) = &filters.authority_id {
            builder.push(" AND authority_id = ").push_bind(authority_id.clone());
        }
        if let Some(event_type) = filters.event_type {
            builder.push(" AND event_type = ").push_bind(event_type.as_str());
        }
        if let Some(after) = filters.after {
            match self.driver() {
                DatabaseDriver::Sqlite => {
                    builder.push(" AND created_at > ").push_bind(after.to_rfc3339());
                }
                DatabaseDriver::Postgres => {
                    builder.push(" AND created_at > ").push_bind(after);
                }
            }
        }

        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(filters.limit.unwrap_or(DEFAULT_LIST_LIMIT));

        let rows = builder.build().fetch_all(self.pool()).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row_to_entry(&row, self.driver())?);
        }
        Ok(out)
    }
}

fn row_to_entry(
    row: &sqlx::any::AnyRow,
    driver: DatabaseDriver,
) -> Result<ChangeLogEntry, StorageError> {
    let body_json: Option<String> = row.try_get("body_json")?;
    let body = body_json
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|err| StorageError::Decode(err.to_string()))?;

    let created_at = match driver {
        DatabaseDriver::Sqlite => {
            let raw: String = row.try_get("created_at")?;
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|err| StorageError::Decode(err.to_string()))?
        }
        DatabaseDriver::Postgres => row.try_get("created_at")?,
    };

    Ok(ChangeLogEntry {
        id: row.try_get("id")?,
        collection: row.try_get("collection")?,
        record_key: row.try_get("record_key")?,
        authority_id: row.try_get("authority_id")?,
        event_type: EventKind::parse(&row.try_get::<String, _>("event_type")?)?,
        body,
        created_at,
    })
}

/// Helper kept for callers constructing synthetic record keys in tests and
/// for the Watcher's own idempotency checks.
pub fn synthetic_record_key() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(collection: &str) -> NewChangeLogEntry {
        NewChangeLogEntry {
            collection: collection.to_string(),
            record_key: synthetic_record_key(),
            authority_id: "did:plc:alice".to_string(),
            event_type: EventKind::Create,
            body: Some(serde_json::json!({"text": "hello"})),
        }
    }

    #[tokio::test]
    async fn append_then_list_round_trips() {
        let db = Database::connect_in_memory().await.unwrap();
        let entry = db.append_changelog_entry(sample("app.bsky.feed.post")).await.unwrap();
        assert!(entry.id > 0);

        let found = db
            .list_changelog_entries(&ChangeLogFilters::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].collection, "app.bsky.feed.post");
        assert_eq!(found[0].event_type, EventKind::Create);
    }

    #[tokio::test]
    async fn list_filters_by_collection_and_authority() {
        let db = Database::connect_in_memory().await.unwrap();
        db.append_changelog_entry(sample("app.bsky.feed.post")).await.unwrap();
        db.append_changelog_entry(sample("app.bsky.feed.like")).await.unwrap();

        let filters = ChangeLogFilters {
            collection: Some("app.bsky.feed.like".to_string()),
            ..Default::default()
        };
        let found = db.list_changelog_entries(&filters).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].collection, "app.bsky.feed.like");
    }

    #[tokio::test]
    async fn list_respects_explicit_limit() {
        let db = Database::connect_in_memory().await.unwrap();
        for _ in 0..5 {
            db.append_changelog_entry(sample("app.bsky.feed.post")).await.unwrap();
        }

        let filters = ChangeLogFilters {
            limit: Some(2),
            ..Default::default()
        };
        let found = db.list_changelog_entries(&filters).await.unwrap();
        assert_eq!(found.len(), 2);
    }
}
