//! PostgreSQL bulk loader

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info};

use super::{BulkLoader, FileFingerprint, LoadOutcome};
use crate::error::{IngestError, Result};
use crate::types::{quote_identifier, Cell, RecordBatch, TargetTable};

/// Postgres caps a statement at this many bind parameters
const MAX_BIND_PARAMS: usize = 65_535;

/// Loads batches with parameterized multi-row INSERTs inside one transaction
#[derive(Debug, Clone)]
pub struct PgBulkLoader {
    pool: PgPool,
}

impl PgBulkLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Up to `limit` rows of `table`, each rendered as a JSON object
    pub async fn fetch_rows(&self, table: &TargetTable, limit: u32) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT row_to_json(t)::text FROM {} t LIMIT $1",
            table.quoted_name()
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::load(table.name(), e))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(|e| IngestError::load(table.name(), e)))
            .collect()
    }

    /// Record the fingerprint; `false` when it was already recorded
    async fn claim_fingerprint(
        tx: &mut Transaction<'_, Postgres>,
        table: &TargetTable,
        fingerprint: &FileFingerprint,
        rows: u64,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO csvdrop_ingested_files (checksum, target_table, file_name, rows_inserted)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (checksum, target_table, file_name) DO NOTHING
            "#,
        )
        .bind(&fingerprint.checksum)
        .bind(table.name())
        .bind(&fingerprint.file_name)
        .bind(i64::try_from(rows).unwrap_or(i64::MAX))
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_rows(
        tx: &mut Transaction<'_, Postgres>,
        table: &TargetTable,
        batch: &RecordBatch,
    ) -> sqlx::Result<u64> {
        let column_list = batch
            .columns()
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let rows_per_statement = (MAX_BIND_PARAMS / batch.columns().len()).max(1);

        let mut inserted = 0;
        for chunk in batch.rows().chunks(rows_per_statement) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                table.quoted_name(),
                column_list
            ));

            query_builder.push_values(chunk, |mut b, row| {
                for cell in row {
                    match cell {
                        Cell::Text(v) => b.push_bind(v.clone()),
                        Cell::Integer(v) => b.push_bind(*v),
                        Cell::Float(v) => b.push_bind(*v),
                        Cell::Boolean(v) => b.push_bind(*v),
                        Cell::Date(v) => b.push_bind(*v),
                        Cell::Timestamp(v) => b.push_bind(*v),
                    };
                }
            });

            let result = query_builder.build().execute(&mut **tx).await?;
            inserted += result.rows_affected();
            debug!(rows = chunk.len(), "Inserted chunk");
        }

        Ok(inserted)
    }
}

#[async_trait]
impl BulkLoader for PgBulkLoader {
    async fn load(
        &self,
        batch: &RecordBatch,
        table: &TargetTable,
        fingerprint: Option<&FileFingerprint>,
    ) -> Result<LoadOutcome> {
        let batch = batch.without_columns(table.exclude_columns());
        if !batch.is_empty() && batch.columns().is_empty() {
            return Err(IngestError::load(
                table.name(),
                "no columns left to insert after exclusions",
            ));
        }

        let to_load = |e: sqlx::Error| IngestError::load(table.name(), e);

        let mut tx = self.pool.begin().await.map_err(to_load)?;

        if let Some(fingerprint) = fingerprint {
            let claimed = Self::claim_fingerprint(&mut tx, table, fingerprint, batch.len() as u64)
                .await
                .map_err(to_load)?;
            if !claimed {
                tx.rollback().await.map_err(to_load)?;
                return Ok(LoadOutcome::AlreadyLoaded);
            }
        }

        let inserted = if batch.is_empty() {
            0
        } else {
            // Dropping `tx` on error rolls the transaction back
            Self::insert_rows(&mut tx, table, &batch).await.map_err(to_load)?
        };

        tx.commit().await.map_err(to_load)?;

        info!(table = %table.name(), rows = inserted, "Committed bulk insert");
        Ok(LoadOutcome::Inserted(inserted))
    }

    async fn row_count(&self, table: &TargetTable) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted_name());
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IngestError::load(table.name(), e))
    }
}
