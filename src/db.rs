use rocket_db_pools::{Database, sqlx};

/// Pool for the database that import targets live in.
#[derive(Database)]
#[database("importer_db")]
pub struct ImporterDb(sqlx::PgPool);
