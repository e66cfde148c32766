//! Schema-driven CSV bulk import engine.
//!
//! Pipeline for one import:
//!
//! 1. **Schema** (`schema`, `structure_cache`) - YAML structure parsed into per-model descriptors
//! 2. **Model** (`model`) - descriptor for one table, built once per operation
//! 3. **Locking** (`lock`) - non-blocking process-wide flag; imports and purges never overlap
//! 4. **Reading** (`csv_reader`) - raw string rows, plus preview and advisory line count
//! 5. **Statements** (`batch`) - multi-row parameterized INSERT / upsert per batch
//! 6. **Writing** (`writer`, `purge`) - one transaction per import, rollback on any failure
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use csv_importer::importer::{ImportEngine, ImportLock, Model, StructureCache};
//!
//! let structure = StructureCache::new("structure.yml").get()?;
//! let engine = ImportEngine::new(pool, ImportLock::new(), &config);
//!
//! let mut model = Model::new(&structure, "cities");
//! let state = model.import(&engine).await;
//! println!("{:?}: {}", state, model.message().unwrap_or_default());
//! ```

pub mod batch;
pub mod catalog;
pub mod csv_reader;
pub mod error;
pub mod lock;
pub mod model;
pub mod purge;
pub mod schema;
pub mod structure_cache;
pub mod uploads;
pub mod writer;

pub use batch::{BatchUpsertBuilder, ColumnBinding, UpsertStatement};
pub use csv_reader::{CsvBatchReader, Row};
pub use error::{ImportError, SchemaError, StructureLoadError, UploadError};
pub use lock::{ImportLock, ImportLockGuard};
pub use model::{CsvSource, InitializationState, Model, ProcessingState};
pub use purge::PurgeReport;
pub use schema::{FieldDescriptor, Structure, TableSchema};
pub use structure_cache::StructureCache;
pub use uploads::UploadStore;
pub use writer::{ImportEngine, ImportReport};
