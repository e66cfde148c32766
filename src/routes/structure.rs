use crate::error::ApiError;
use crate::importer::Model;
use crate::models::{DataResponse, ModelSummary};
use crate::state::ImporterState;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

/// Re-read the structure file and return the models it now declares.
///
/// A file that fails to load leaves the cache empty and answers `500`.
#[openapi(tag = "Structure")]
#[post("/structure/refresh")]
pub fn refresh_structure(
    state: &State<ImporterState>,
) -> Result<Json<DataResponse<Vec<ModelSummary>>>, ApiError> {
    let structure = state.structure.refresh()?;
    let models = structure
        .model_names()
        .map(|name| ModelSummary::from(&Model::new(&structure, name)))
        .collect();

    Ok(Json(DataResponse { data: models }))
}
