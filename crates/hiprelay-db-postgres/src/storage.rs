//! `FlowStore` implementation on PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hiprelay_storage::{
    FlowFields, FlowRecord, FlowStore, HEALTH_ID_FIELD, StorageError,
};
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::classify_sqlx_error;
use crate::migrations;

type FlowRow = (String, Value, i64, DateTime<Utc>, DateTime<Utc>);

/// Merge semantics live in SQL: `||` on JSONB replaces the top-level keys of
/// the left operand that appear in the right one and keeps the rest. The
/// `healthID` key is stripped from the incoming document so the natural key
/// is never rewritten.
const UPSERT_SQL: &str = r#"
    INSERT INTO flow_record (health_id, document, revision, created_at, updated_at)
    VALUES ($1, $2, 1, now(), now())
    ON CONFLICT (health_id) DO UPDATE
    SET document = flow_record.document || (EXCLUDED.document - 'healthID'),
        revision = flow_record.revision + 1,
        updated_at = now()
    RETURNING health_id, document, revision, created_at, updated_at
"#;

const MERGE_BY_TRANSACTION_SQL: &str = r#"
    UPDATE flow_record
    SET document = document || ($2::jsonb - 'healthID'),
        revision = revision + 1,
        updated_at = now()
    WHERE health_id = (
        SELECT health_id FROM flow_record
        WHERE document ->> 'transactionId' = $1
        ORDER BY updated_at DESC
        LIMIT 1
    )
    RETURNING health_id, document, revision, created_at, updated_at
"#;

const SELECT_SQL: &str = r#"
    SELECT health_id, document, revision, created_at, updated_at
    FROM flow_record
    WHERE health_id = $1
"#;

fn chrono_to_time(dt: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(dt.timestamp()).unwrap_or(OffsetDateTime::UNIX_EPOCH)
        + time::Duration::nanoseconds(dt.timestamp_subsec_nanos() as i64)
}

fn row_to_record(row: FlowRow) -> Result<FlowRecord, StorageError> {
    let (health_id, document, revision, created_at, updated_at) = row;
    let document = match document {
        Value::Object(map) => map,
        other => {
            return Err(StorageError::internal(format!(
                "flow record {health_id} holds a non-object document: {other}"
            )));
        }
    };

    Ok(FlowRecord {
        health_id,
        document,
        revision,
        created_at: chrono_to_time(created_at),
        updated_at: chrono_to_time(updated_at),
    })
}

/// PostgreSQL-backed flow record store.
///
/// Holds the process-wide connection pool. Each write is a single statement,
/// so two requests racing on the same health id both land; when they touch
/// the same top-level field the later commit wins.
#[derive(Debug, Clone)]
pub struct PostgresFlowStore {
    pool: PgPool,
}

impl PostgresFlowStore {
    /// Connects the shared pool and, if configured, applies migrations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::ConnectionError` if the database cannot be reached.
    #[instrument(skip(config), fields(url = %config.redacted_url()))]
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "Connecting flow store pool"
        );
        let pool = config
            .pool_options()
            .connect(&config.url)
            .await
            .map_err(|e| classify_sqlx_error(e, "Failed to connect flow store"))?;

        if config.run_migrations {
            migrations::run(&pool).await?;
        }

        info!("PostgreSQL flow store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl FlowStore for PostgresFlowStore {
    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    async fn upsert(
        &self,
        health_id: &str,
        fields: FlowFields,
    ) -> Result<FlowRecord, StorageError> {
        if health_id.is_empty() {
            return Err(StorageError::invalid_record("health id must not be empty"));
        }

        let mut document = FlowFields::new();
        document.insert(HEALTH_ID_FIELD.to_string(), Value::String(health_id.to_string()));
        document.extend(fields.into_iter().filter(|(k, _)| k != HEALTH_ID_FIELD));

        let row: FlowRow = query_as(UPSERT_SQL)
            .bind(health_id)
            .bind(Value::Object(document))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, "Failed to upsert flow record"))?;

        let record = row_to_record(row)?;
        debug!(revision = record.revision, "Flow record written");
        Ok(record)
    }

    #[instrument(skip(self, fields))]
    async fn merge_by_transaction(
        &self,
        transaction_id: &str,
        fields: FlowFields,
    ) -> Result<Option<FlowRecord>, StorageError> {
        let row: Option<FlowRow> = query_as(MERGE_BY_TRANSACTION_SQL)
            .bind(transaction_id)
            .bind(Value::Object(fields))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, "Failed to merge flow record by transaction"))?;

        row.map(row_to_record).transpose()
    }

    async fn get(&self, health_id: &str) -> Result<Option<FlowRecord>, StorageError> {
        let row: Option<FlowRow> = query_as(SELECT_SQL)
            .bind(health_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, "Failed to read flow record"))?;

        row.map(row_to_record).transpose()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, "Database ping failed"))?;
        Ok(())
    }

    async fn close(&self) {
        info!("Closing PostgreSQL connection pool");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_to_record() {
        let now = Utc::now();
        let record = row_to_record((
            "user@sbx".into(),
            json!({"healthID": "user@sbx", "fetch_requestId": "r1"}),
            3,
            now,
            now,
        ))
        .unwrap();

        assert_eq!(record.health_id, "user@sbx");
        assert_eq!(record.revision, 3);
        assert_eq!(record.field("fetch_requestId"), Some(&json!("r1")));
        assert_eq!(record.created_at.unix_timestamp(), now.timestamp());
    }

    #[test]
    fn test_row_to_record_rejects_non_object() {
        let now = Utc::now();
        let err = row_to_record(("user@sbx".into(), json!([1, 2]), 1, now, now)).unwrap_err();
        assert!(matches!(err, StorageError::Internal { .. }));
    }
}
