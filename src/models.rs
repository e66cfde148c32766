use crate::importer::{FieldDescriptor, InitializationState, Model, ProcessingState};
use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ===== Envelopes =====

/// Standard envelope for successful payloads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

// ===== Model Descriptors =====

/// One entry of the structure file as seen by API clients.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub model_name: String,
    pub table_name: String,
    pub initialization_state: InitializationState,
    /// Why the model is invalid, when it is.
    pub message: Option<String>,
}

impl From<&Model> for ModelSummary {
    fn from(model: &Model) -> Self {
        Self {
            model_name: model.model_name().to_string(),
            table_name: model.table_name().to_string(),
            initialization_state: model.initialization_state(),
            message: model.message().map(str::to_string),
        }
    }
}

/// A model with a preview of the CSV it would import.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelDetail {
    #[serde(flatten)]
    pub summary: ModelSummary,
    pub fields: Vec<FieldDescriptor>,
    pub unique_keys: Vec<String>,
    /// Upload used instead of the configured CSV file.
    pub upload_id: Option<u64>,
    pub csv_file: String,
    pub csv_found: bool,
    pub preview: Vec<Vec<String>>,
    /// Advisory line count of the CSV file.
    pub line_count: Option<usize>,
    pub table_exists: bool,
    pub table_row_count: Option<i64>,
}

// ===== Operations =====

/// Outcome of an import or purge request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub model_name: String,
    pub state: ProcessingState,
    pub message: String,
    pub finished_at: DateTime<Utc>,
}

impl OperationResponse {
    pub fn from_model(model: &Model) -> Self {
        Self {
            model_name: model.model_name().to_string(),
            state: model.processing_state(),
            message: model.message().unwrap_or_default().to_string(),
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub model_name: String,
    pub upload_id: u64,
    pub bytes: u64,
    pub message: String,
}

/// One page of rows read back from a model's table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordsPage {
    pub model_name: String,
    pub columns: Vec<String>,
    pub labels: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

/// Process-wide importer status.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Whether an import or purge currently holds the lock.
    pub busy: bool,
    pub structure_cached: bool,
    pub structure_path: String,
    pub pending_uploads: usize,
}
