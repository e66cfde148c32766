//! Transactional import driver.
//!
//! Lifecycle of one import:
//!
//! ```text
//! IDLE -> LOCK_ACQUIRED -> TRANSACTION_OPEN -> COMMITTED | ROLLED_BACK -> LOCK_RELEASED
//! ```
//!
//! The lock is held through an RAII guard, so `LOCK_RELEASED` is reached on every
//! exit path. Batches run strictly in sequence inside a single transaction; any
//! failure rolls back everything written so far.

use crate::config::ImporterConfig;
use crate::importer::batch::BatchUpsertBuilder;
use crate::importer::catalog;
use crate::importer::csv_reader::CsvBatchReader;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::lock::ImportLock;
use crate::importer::model::Model;
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool, Postgres, Transaction};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportPhase {
    LockAcquired,
    TransactionOpen,
    Committed,
    RolledBack,
    LockReleased,
}

/// Outcome of a committed import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub model_name: String,
    pub table_name: String,
    pub rows_processed: usize,
    pub batches: usize,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Runs imports and purges against one database, serialized by a shared lock.
#[derive(Clone)]
pub struct ImportEngine {
    pub(crate) pool: PgPool,
    pub(crate) lock: ImportLock,
    csv_base_path: PathBuf,
    batch_size: usize,
}

impl ImportEngine {
    pub fn new(pool: PgPool, lock: ImportLock, config: &ImporterConfig) -> Self {
        Self::with_settings(pool, lock, config.csv_base_path.clone(), config.batch_size)
    }

    pub fn with_settings(
        pool: PgPool,
        lock: ImportLock,
        csv_base_path: PathBuf,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            lock,
            csv_base_path,
            batch_size: batch_size.max(1),
        }
    }

    pub fn lock(&self) -> &ImportLock {
        &self.lock
    }

    pub fn csv_base_path(&self) -> &Path {
        &self.csv_base_path
    }

    /// Import `model`'s CSV into its table.
    ///
    /// Returns [`ImportError::Busy`] without touching anything when another
    /// import or purge holds the lock.
    pub async fn import(&self, model: &Model) -> ImportResult<ImportReport> {
        if !model.is_valid() {
            return Err(ImportError::NotInitialized(model.model_name().to_string()));
        }

        let Some(guard) = self.lock.try_acquire() else {
            log::warn!(
                "import of \"{}\" rejected: another operation is running",
                model.model_name()
            );
            return Err(ImportError::Busy);
        };
        transition(model, ImportPhase::LockAcquired);

        let result = self.import_locked(model).await;

        drop(guard);
        transition(model, ImportPhase::LockReleased);
        result
    }

    async fn import_locked(&self, model: &Model) -> ImportResult<ImportReport> {
        let started = Instant::now();
        let path = model.csv_path(&self.csv_base_path);
        let mut reader = CsvBatchReader::open(&path)?;

        if model.fields().is_empty() {
            return Err(ImportError::NoFields);
        }

        let mut tx = self.pool.begin().await?;
        transition(model, ImportPhase::TransactionOpen);

        match self.write_batches(&mut tx, model, &mut reader).await {
            Ok((rows_processed, batches)) => {
                tx.commit().await?;
                transition(model, ImportPhase::Committed);

                let report = ImportReport {
                    model_name: model.model_name().to_string(),
                    table_name: model.table_name().to_string(),
                    rows_processed,
                    batches,
                    elapsed: started.elapsed(),
                    finished_at: Utc::now(),
                };
                log::info!(
                    "imported {} row(s) into {} from {} in {} batch(es) ({:.2}s)",
                    report.rows_processed,
                    report.table_name,
                    path.display(),
                    report.batches,
                    report.elapsed.as_secs_f64()
                );
                Ok(report)
            }
            Err(err) => {
                log::error!(
                    "import of \"{}\" failed, rolling back: {}",
                    model.model_name(),
                    err
                );
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("rollback failed: {}", rollback_err);
                }
                transition(model, ImportPhase::RolledBack);
                Err(err)
            }
        }
    }

    async fn write_batches(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        model: &Model,
        reader: &mut CsvBatchReader,
    ) -> ImportResult<(usize, usize)> {
        let columns =
            catalog::describe_columns(&mut **tx, model.table_name(), &model.row_field_names())
                .await?;
        let conflict_target = if model.unique_keys().is_empty() {
            Vec::new()
        } else {
            let indexes = catalog::unique_indexes(&mut **tx, model.table_name()).await?;
            catalog::conflict_target(model.table_name(), model.unique_keys(), &indexes)?
        };
        if conflict_target.as_slice() != model.unique_keys() {
            log::info!(
                "\"{}\": matching rows on ({}) out of the key field(s) ({})",
                model.model_name(),
                conflict_target.join(", "),
                model.unique_keys().join(", ")
            );
        }
        let builder = BatchUpsertBuilder::new(
            model.table_name(),
            columns,
            &conflict_target,
            self.batch_size,
        )?;

        let mut processed = 0;
        let mut batches = 0;

        while let Some(statement) = builder.next_batch(reader, processed)? {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = query.bind(param.as_str());
            }
            let result = query.execute(&mut **tx).await?;

            processed += statement.rows;
            batches += 1;
            log::trace!(
                "batch {} wrote {} row(s) ({} affected)",
                batches,
                statement.rows,
                result.rows_affected()
            );
        }

        Ok((processed, batches))
    }
}

fn transition(model: &Model, phase: ImportPhase) {
    log::debug!("import \"{}\": {:?}", model.model_name(), phase);
}
