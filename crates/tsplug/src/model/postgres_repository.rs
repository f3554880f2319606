use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, postgres::PgPool, postgres::PgRow};
use tsplug_core::{Fingerprint, ModelId, ModelState, TenantId, TimeKey};

use super::{ModelError, ModelRecord, ModelRepository, RecordMutation, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT tenant_id, model_id, instance_id, state, fingerprint, time_key,
           context, last_error, created_at, updated_at
    FROM model_records
"#;

/// PostgreSQL implementation of ModelRepository
///
/// `update` runs inside a transaction holding `SELECT ... FOR UPDATE` on
/// the row, which gives the per-record atomicity the orchestrator needs.
pub struct PostgresModelRepository {
    pool: PgPool,
}

impl PostgresModelRepository {
    /// Create a new PostgresModelRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<ModelRecord> {
        let state_str: String = row.get("state");
        let state = state_str
            .parse::<ModelState>()
            .map_err(|_| ModelError::InvalidRecord(format!("Invalid state: {}", state_str)))?;

        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");

        Ok(ModelRecord {
            tenant: TenantId::from_string(row.get::<String, _>("tenant_id")),
            id: ModelId::from_string(row.get::<String, _>("model_id")),
            instance_id: row.get("instance_id"),
            state,
            fingerprint: Fingerprint::from_string(row.get::<String, _>("fingerprint")),
            time_key: TimeKey::from_string(row.get::<String, _>("time_key")),
            context: row.get("context"),
            last_error: row.get("last_error"),
            created_at,
            updated_at,
        })
    }
}

fn db_error(e: sqlx::Error) -> ModelError {
    ModelError::DatabaseError(e.to_string())
}

#[async_trait]
impl ModelRepository for PostgresModelRepository {
    async fn insert(&self, record: ModelRecord) -> Result<ModelRecord> {
        sqlx::query(
            r#"
            INSERT INTO model_records (
                tenant_id, model_id, instance_id, state, fingerprint, time_key,
                context, last_error, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.tenant.as_str())
        .bind(record.id.as_str())
        .bind(&record.instance_id)
        .bind(record.state.to_string())
        .bind(record.fingerprint.as_str())
        .bind(record.time_key.as_str())
        .bind(&record.context)
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ModelError::AlreadyExists(record.id.to_string())
            }
            _ => db_error(e),
        })?;

        Ok(record)
    }

    async fn get(&self, tenant: &TenantId, id: &ModelId) -> Result<Option<ModelRecord>> {
        let query = format!("{} WHERE tenant_id = $1 AND model_id = $2", SELECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn update(
        &self,
        tenant: &TenantId,
        id: &ModelId,
        mutation: RecordMutation,
    ) -> Result<ModelRecord> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let query = format!(
            "{} WHERE tenant_id = $1 AND model_id = $2 FOR UPDATE",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ModelError::NotFound(id.to_string()))?;

        let mut record = Self::from_row(&row)?;
        // Dropping the transaction on error rolls back and releases the row lock
        mutation(&mut record)?;

        sqlx::query(
            r#"
            UPDATE model_records
            SET instance_id = $3, state = $4, fingerprint = $5, time_key = $6,
                context = $7, last_error = $8, updated_at = $9
            WHERE tenant_id = $1 AND model_id = $2
            "#,
        )
        .bind(tenant.as_str())
        .bind(id.as_str())
        .bind(&record.instance_id)
        .bind(record.state.to_string())
        .bind(record.fingerprint.as_str())
        .bind(record.time_key.as_str())
        .bind(&record.context)
        .bind(&record.last_error)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(record)
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<ModelRecord>> {
        let query = format!("{} WHERE tenant_id = $1 ORDER BY created_at DESC", SELECT_COLUMNS);
        let rows = sqlx::query(&query)
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn count_training(&self, tenant: &TenantId, instance_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM model_records
            WHERE tenant_id = $1 AND instance_id = $2 AND state = $3
            "#,
        )
        .bind(tenant.as_str())
        .bind(instance_id)
        .bind(ModelState::Training.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(count as usize)
    }
}
