//! Process-wide state shared by every route.

use crate::config::ImporterConfig;
use crate::importer::{ImportEngine, ImportLock, StructureCache, UploadError, UploadStore};
use rocket_db_pools::sqlx::PgPool;
use std::sync::Arc;

/// Everything a request needs besides the pool.
///
/// Owns the single [`ImportLock`], so every engine built from it competes for
/// the same flag.
pub struct ImporterState {
    pub config: ImporterConfig,
    pub structure: StructureCache,
    pub uploads: Arc<UploadStore>,
    pub lock: ImportLock,
}

impl ImporterState {
    pub fn new(config: ImporterConfig) -> Result<Self, UploadError> {
        let uploads = Arc::new(UploadStore::new(config.upload_dir.clone())?);
        Ok(Self {
            structure: StructureCache::new(config.structure_path.clone()),
            uploads,
            lock: ImportLock::new(),
            config,
        })
    }

    pub fn engine(&self, pool: &PgPool) -> ImportEngine {
        ImportEngine::new(pool.clone(), self.lock.clone(), &self.config)
    }
}
