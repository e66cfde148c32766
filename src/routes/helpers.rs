//! Shared helper functions for Rocket route handlers.

use crate::error::ApiError;
use crate::importer::Model;
use crate::state::ImporterState;

/// Build `model_name` from the cached structure, optionally bound to an upload.
///
/// Returns [`ApiError::NotFound`] when the structure has no such entry. Entries
/// that exist but fail to parse come back as invalid models.
pub fn load_model(
    state: &ImporterState,
    model_name: &str,
    upload: Option<u64>,
) -> Result<Model, ApiError> {
    let structure = state.structure.get()?;
    if !structure.contains(model_name) {
        return Err(ApiError::NotFound(format!(
            "Data model \"{model_name}\" doesn't exist."
        )));
    }

    Ok(match upload {
        Some(id) => Model::with_upload(&structure, model_name, id, &state.uploads),
        None => Model::new(&structure, model_name),
    })
}
