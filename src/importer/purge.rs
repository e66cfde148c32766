//! Full-table purge, serialized with imports through the same lock.

use crate::importer::batch::quote_qualified;
use crate::importer::catalog;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::model::Model;
use crate::importer::writer::ImportEngine;
use rocket_db_pools::sqlx;

#[derive(Debug, Clone)]
pub struct PurgeReport {
    pub table_name: String,
    pub rows_removed: u64,
}

impl ImportEngine {
    /// Delete every row of `model`'s table in a single statement.
    pub async fn purge(&self, model: &Model) -> ImportResult<PurgeReport> {
        if !model.is_valid() {
            return Err(ImportError::NotInitialized(model.model_name().to_string()));
        }

        let Some(_guard) = self.lock.try_acquire() else {
            log::warn!(
                "purge of \"{}\" rejected: another operation is running",
                model.table_name()
            );
            return Err(ImportError::Busy);
        };

        if !catalog::table_exists(&self.pool, model.table_name()).await? {
            return Err(ImportError::TableNotFound(model.table_name().to_string()));
        }

        let sql = format!("DELETE FROM {}", quote_qualified(model.table_name()));
        let result = sqlx::query(&sql).execute(&self.pool).await?;

        log::info!(
            "purged {} row(s) from {}",
            result.rows_affected(),
            model.table_name()
        );

        Ok(PurgeReport {
            table_name: model.table_name().to_string(),
            rows_removed: result.rows_affected(),
        })
    }
}
