//! In-memory cache of the parsed structure file.
//!
//! The engine never reads the YAML itself: callers fetch a [`Structure`] snapshot
//! here and build models from it.

use crate::importer::error::StructureLoadError;
use crate::importer::schema::Structure;
use parking_lot::RwLock;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct StructureCache {
    path: PathBuf,
    snapshot: RwLock<Option<Arc<Structure>>>,
}

impl StructureCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached snapshot, loading the file on first use.
    pub fn get(&self) -> Result<Arc<Structure>, StructureLoadError> {
        if let Some(structure) = self.snapshot.read().as_ref() {
            return Ok(Arc::clone(structure));
        }
        self.refresh()
    }

    /// Re-read the file. A failed load leaves the cache empty.
    pub fn refresh(&self) -> Result<Arc<Structure>, StructureLoadError> {
        match load_structure(&self.path) {
            Ok(structure) => {
                let structure = Arc::new(structure);
                *self.snapshot.write() = Some(Arc::clone(&structure));
                log::info!(
                    "structure cache refreshed from {} ({} model(s))",
                    self.path.display(),
                    structure.len()
                );
                Ok(structure)
            }
            Err(err) => {
                self.flush();
                log::warn!("failed to load structure: {}", err);
                Err(err)
            }
        }
    }

    pub fn flush(&self) {
        self.snapshot.write().take();
    }

    pub fn is_cached(&self) -> bool {
        self.snapshot.read().is_some()
    }
}

/// Read and parse a structure file.
pub fn load_structure(path: &Path) -> Result<Structure, StructureLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StructureLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let value: Value = serde_yaml::from_str(&raw).map_err(|source| StructureLoadError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    if value.is_null() {
        return Err(StructureLoadError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(Structure::parse(&value)?)
}
