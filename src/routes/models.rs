//! Read-only views over the structure file: model list and per-model preview.

use crate::error::ApiError;
use crate::importer::{CsvBatchReader, CsvSource, ImportError, Model, Row, catalog};
use crate::models::{DataResponse, ModelDetail, ModelSummary};
use crate::routes::helpers::load_model;
use crate::state::ImporterState;
use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;
use std::path::PathBuf;

/// List every model declared in the structure file, valid or not.
#[openapi(tag = "Models")]
#[get("/models")]
pub fn list_models(
    state: &State<ImporterState>,
) -> Result<Json<DataResponse<Vec<ModelSummary>>>, ApiError> {
    let structure = state.structure.get()?;
    let models = structure
        .model_names()
        .map(|name| ModelSummary::from(&Model::new(&structure, name)))
        .collect();

    Ok(Json(DataResponse { data: models }))
}

/// Describe one model and preview the CSV it would import.
///
/// Pass `upload` to preview a previously uploaded file instead of the
/// configured one.
#[openapi(tag = "Models")]
#[get("/models/<model_name>?<upload>")]
pub async fn get_model(
    model_name: String,
    upload: Option<u64>,
    state: &State<ImporterState>,
    pool: &State<PgPool>,
) -> Result<Json<DataResponse<ModelDetail>>, ApiError> {
    let model = load_model(state, &model_name, upload)?;
    let path = model.csv_path(&state.config.csv_base_path);

    let (csv_found, preview, line_count) = if model.is_valid() {
        let preview_length = state.config.preview_length;
        let read_path = path.clone();
        tokio::task::spawn_blocking(move || read_preview(read_path, preview_length))
            .await
            .map_err(|err| ApiError::InternalError(err.to_string()))??
    } else {
        (false, Vec::new(), None)
    };

    let table_exists = model.is_valid() && catalog::table_exists(pool, model.table_name()).await?;
    let table_row_count = if table_exists {
        Some(catalog::count_rows(pool, model.table_name()).await?)
    } else {
        None
    };

    let upload_id = match model.csv_source() {
        CsvSource::Upload { id, .. } => Some(*id),
        CsvSource::BaseDir { .. } | CsvSource::File { .. } => None,
    };

    Ok(Json(DataResponse {
        data: ModelDetail {
            summary: ModelSummary::from(&model),
            fields: model.fields().to_vec(),
            unique_keys: model.unique_keys().to_vec(),
            upload_id,
            csv_file: path.display().to_string(),
            csv_found,
            preview,
            line_count,
            table_exists,
            table_row_count,
        },
    }))
}

fn read_preview(
    path: PathBuf,
    limit: usize,
) -> Result<(bool, Vec<Row>, Option<usize>), ApiError> {
    let mut reader = match CsvBatchReader::open(&path) {
        Ok(reader) => reader,
        Err(ImportError::FileNotFound(_)) => return Ok((false, Vec::new(), None)),
        Err(err) => return Err(ApiError::InternalError(err.to_string())),
    };

    let preview = reader
        .preview(limit)
        .map_err(|err| ApiError::BadRequest(format!("unreadable CSV file: {err}")))?;
    let line_count = match reader.count_lines() {
        Ok(count) => Some(count),
        Err(err) => {
            log::warn!("failed to count lines of {}: {}", path.display(), err);
            None
        }
    };

    Ok((true, preview, line_count))
}
