use crate::error::ApiError;
use crate::importer::catalog;
use crate::models::{DataResponse, RecordsPage};
use crate::routes::helpers::load_model;
use crate::state::ImporterState;
use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;

/// Page through the rows currently stored in a model's table.
#[openapi(tag = "Records")]
#[get("/models/<model_name>/records?<page>")]
pub async fn list_records(
    model_name: String,
    page: Option<i64>,
    state: &State<ImporterState>,
    pool: &State<PgPool>,
) -> Result<Json<DataResponse<RecordsPage>>, ApiError> {
    let model = load_model(state, &model_name, None)?;
    if !model.is_valid() {
        return Err(ApiError::BadRequest(
            model.message().unwrap_or("invalid data model").to_string(),
        ));
    }

    if !catalog::table_exists(pool, model.table_name()).await? {
        return Err(ApiError::NotFound(format!(
            "Table \"{}\" does not exist",
            model.table_name()
        )));
    }

    let page = page.unwrap_or(1).max(1);
    let page_size = state.config.records_page_size as i64;
    let columns = model.row_field_names();

    let total = catalog::count_rows(pool, model.table_name()).await?;
    let rows = catalog::fetch_page(
        pool,
        model.table_name(),
        &columns,
        page_size,
        (page - 1) * page_size,
    )
    .await?;

    Ok(Json(DataResponse {
        data: RecordsPage {
            model_name: model.model_name().to_string(),
            columns,
            labels: model.labels(),
            rows,
            page,
            page_size,
            total,
        },
    }))
}
