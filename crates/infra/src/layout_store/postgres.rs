//! Postgres-backed layout store.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE layout (
//!     id          BIGSERIAL PRIMARY KEY,   -- insertion order, tie-break only
//!     owner       UUID        NOT NULL,
//!     entity      UUID        NOT NULL,
//!     recorded_at TIMESTAMPTZ NOT NULL,
//!     payload     BYTEA       NOT NULL
//! );
//! CREATE INDEX layout_owner_entity_recorded_at ON layout (owner, entity, recorded_at);
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database (any SQLSTATE) | `Rejected` |
//! | PoolTimedOut / PoolClosed / Io / Tls | `Unavailable` |
//! | ColumnDecode / Decode / ColumnNotFound | `Decode` |
//! | Other | `Unavailable` |

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};

use citylayout_core::{LayoutId, LayoutRecord, OwnerId, Payload};

use super::r#trait::{LayoutStore, StoreError};

/// Connection pool limits. Every call is bounded by the acquire timeout plus
/// a server-side `statement_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(5),
        }
    }
}

/// Postgres-backed append-only layout store.
///
/// `PgPool` is internally reference counted; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresLayoutStore {
    pool: PgPool,
}

impl PostgresLayoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url` with the given limits.
    ///
    /// One connection is established here so a wrong URL fails at startup.
    pub async fn connect(database_url: &str, settings: PoolSettings) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid database url: {e}")))?
            .options([(
                "statement_timeout",
                format!("{}ms", settings.statement_timeout.as_millis()),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table and its index if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS layout (
                id          BIGSERIAL   PRIMARY KEY,
                owner       UUID        NOT NULL,
                entity      UUID        NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                payload     BYTEA       NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS layout_owner_entity_recorded_at
                ON layout (owner, entity, recorded_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_index", e))?;

        Ok(())
    }
}

#[async_trait]
impl LayoutStore for PostgresLayoutStore {
    #[instrument(
        skip(self, record),
        fields(owner = %record.owner, entity = %record.entity, bytes = record.payload.len()),
        err
    )]
    async fn insert(&self, record: &LayoutRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO layout (owner, entity, recorded_at, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.owner.as_uuid())
        .bind(record.entity.as_uuid())
        .bind(record.recorded_at)
        .bind(record.payload.as_bytes())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(owner = %owner, entity = %entity, removed = tracing::field::Empty), err)]
    async fn delete_all(&self, owner: OwnerId, entity: LayoutId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM layout WHERE owner = $1 AND entity = $2")
            .bind(owner.as_uuid())
            .bind(entity.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_all", e))?;

        let removed = result.rows_affected();
        Span::current().record("removed", removed);
        Ok(removed)
    }

    /// Join of the per-entity `MAX(recorded_at)` against the base table,
    /// owner-filtered on both sides. `DISTINCT ON` with `id DESC` keeps the
    /// last inserted row when timestamps tie.
    #[instrument(skip(self), fields(owner = %owner, entities = tracing::field::Empty), err)]
    async fn latest_per_entity(&self, owner: OwnerId) -> Result<Vec<LayoutRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (l.entity)
                l.owner,
                l.entity,
                l.recorded_at,
                l.payload
            FROM layout l
            JOIN (
                SELECT entity, MAX(recorded_at) AS recorded_at
                FROM layout
                WHERE owner = $1
                GROUP BY entity
            ) newest
              ON l.entity = newest.entity
             AND l.recorded_at = newest.recorded_at
            WHERE l.owner = $1
            ORDER BY l.entity ASC, l.id DESC
            "#,
        )
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_per_entity", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let row = LayoutRow::from_row(&row).map_err(|e| map_sqlx_error("decode_row", e))?;
            records.push(row.into());
        }

        Span::current().record("entities", records.len());
        Ok(records)
    }
}

struct LayoutRow {
    owner: uuid::Uuid,
    entity: uuid::Uuid,
    recorded_at: DateTime<Utc>,
    payload: Vec<u8>,
}

impl<'r> FromRow<'r, PgRow> for LayoutRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LayoutRow {
            owner: row.try_get("owner")?,
            entity: row.try_get("entity")?,
            recorded_at: row.try_get("recorded_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<LayoutRow> for LayoutRecord {
    fn from(row: LayoutRow) -> Self {
        LayoutRecord::new(
            OwnerId::from_uuid(row.owner),
            LayoutId::from_uuid(row.entity),
            row.recorded_at,
            Payload::new(row.payload),
        )
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            StoreError::Rejected(format!(
                "database error in {operation} (sqlstate {code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode(format!("{operation}: {err}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_converts_to_record_verbatim() {
        let owner = uuid::Uuid::now_v7();
        let entity = uuid::Uuid::now_v7();
        let now = Utc::now();
        let row = LayoutRow {
            owner,
            entity,
            recorded_at: now,
            payload: vec![0xff, 0x00, b'{'],
        };

        let record: LayoutRecord = row.into();
        assert_eq!(record.owner.as_uuid(), &owner);
        assert_eq!(record.entity.as_uuid(), &entity);
        assert_eq!(record.recorded_at, now);
        assert_eq!(record.payload.as_bytes(), &[0xff, 0x00, b'{']);
    }

    #[test]
    fn pool_failures_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error("insert", sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("insert", sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("latest_per_entity", sqlx::Error::ColumnNotFound("payload".into())),
            StoreError::Decode(_)
        ));
    }

    #[test]
    fn default_pool_settings_are_bounded() {
        let s = PoolSettings::default();
        assert_eq!(s.max_connections, 10);
        assert!(s.acquire_timeout > Duration::ZERO);
        assert!(s.statement_timeout > Duration::ZERO);
    }
}
