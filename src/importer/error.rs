use rocket_db_pools::sqlx;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning the YAML structure into model descriptors.
///
/// Every variant except [`SchemaError::NotAMapping`] is scoped to a single model;
/// sibling models in the same source stay usable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("the structure source must be a mapping of model names to descriptors")]
    NotAMapping,
    #[error("Unknown supplied structure_schema_version: \"{0}\".")]
    UnknownSchemaVersion(String),
    #[error("model \"{model}\" is malformed: {reason}")]
    Malformed { model: String, reason: String },
    #[error("\"{0}\" is not a valid SQL identifier")]
    InvalidIdentifier(String),
}

/// Failure to load the structure file that feeds the schema registry.
#[derive(Debug, Error)]
pub enum StructureLoadError {
    #[error("failed to read structure file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse the structure YAML file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("structure file {path} is empty")]
    Empty { path: PathBuf },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Execution-time failures of an import or purge.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("there is already an ongoing operation")]
    Busy,
    #[error("CSV file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("row {row_index} has {got} column(s), expected {expected}")]
    ColumnCountMismatch {
        row_index: usize,
        got: usize,
        expected: usize,
    },
    #[error("no field to write in, check the structure file")]
    NoFields,
    #[error("table \"{0}\" does not exist")]
    TableNotFound(String),
    #[error("table \"{table}\" has no column \"{column}\"")]
    UnknownColumn { table: String, column: String },
    #[error("table \"{table}\" has no unique index or primary key over the key field(s) {keys}")]
    NoMatchingUniqueIndex { table: String, keys: String },
    #[error("{columns} column(s) x {batch_size} row(s) exceeds the {limit} bind parameter limit")]
    StatementTooLarge {
        columns: usize,
        batch_size: usize,
        limit: usize,
    },
    #[error("model \"{0}\" is not initialized")]
    NotInitialized(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type ImportResult<T> = Result<T, ImportError>;

/// Failure to accept an uploaded CSV file.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
