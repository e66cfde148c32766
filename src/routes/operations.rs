//! Import, purge and upload endpoints.
//!
//! Import and purge always answer `200` once the model is known; the outcome
//! (`SUCCESS`, `WARNING` when another operation holds the lock, `ERROR`) is
//! carried in the payload together with the model message.

use crate::error::ApiError;
use crate::importer::{CsvSource, ProcessingState};
use crate::models::{DataResponse, OperationResponse, StatusResponse, UploadResponse};
use crate::routes::helpers::load_model;
use crate::state::ImporterState;
use rocket::serde::json::Json;
use rocket::{Data, State};
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;

/// Import a model's CSV file, or a previous upload when `upload` is given.
#[openapi(tag = "Operations")]
#[post("/models/<model_name>/import?<upload>")]
pub async fn import_model(
    model_name: String,
    upload: Option<u64>,
    state: &State<ImporterState>,
    pool: &State<PgPool>,
) -> Result<Json<DataResponse<OperationResponse>>, ApiError> {
    let mut model = load_model(state, &model_name, upload)?;
    let engine = state.engine(pool);

    let outcome = model.import(&engine).await;

    if outcome == ProcessingState::Success {
        if let CsvSource::Upload { id, .. } = model.csv_source() {
            state.uploads.remove(*id);
        }
    }

    Ok(Json(DataResponse {
        data: OperationResponse::from_model(&model),
    }))
}

/// Delete every row of a model's table.
#[openapi(tag = "Operations")]
#[post("/models/<model_name>/purge")]
pub async fn purge_model(
    model_name: String,
    state: &State<ImporterState>,
    pool: &State<PgPool>,
) -> Result<Json<DataResponse<OperationResponse>>, ApiError> {
    let mut model = load_model(state, &model_name, None)?;
    let engine = state.engine(pool);

    model.purge(&engine).await;

    Ok(Json(DataResponse {
        data: OperationResponse::from_model(&model),
    }))
}

/// Store the request body as a CSV file usable by one later preview or import.
#[openapi(skip)]
#[post("/models/<model_name>/upload", data = "<data>")]
pub async fn upload_csv(
    model_name: String,
    data: Data<'_>,
    state: &State<ImporterState>,
) -> Result<Json<DataResponse<UploadResponse>>, ApiError> {
    // Reject unknown models before accepting any bytes.
    load_model(state, &model_name, None)?;

    let (upload_id, bytes) = state
        .uploads
        .store_data(data, state.config.upload_limit_bytes)
        .await?;

    let model = load_model(state, &model_name, Some(upload_id))?;
    let message = model.message().unwrap_or_default().to_string();

    Ok(Json(DataResponse {
        data: UploadResponse {
            model_name,
            upload_id,
            bytes,
            message,
        },
    }))
}

/// Report whether an operation is running and what the cache holds.
#[openapi(tag = "Operations")]
#[get("/status")]
pub fn get_status(state: &State<ImporterState>) -> Json<DataResponse<StatusResponse>> {
    Json(DataResponse {
        data: StatusResponse {
            busy: state.lock.is_busy(),
            structure_cached: state.structure.is_cached(),
            structure_path: state.structure.path().display().to_string(),
            pending_uploads: state.uploads.len(),
        },
    })
}
