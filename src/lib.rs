#[macro_use]
extern crate rocket;

pub mod config;
pub mod db;
pub mod error;
pub mod importer;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod state;

use crate::config::ImporterConfig;
use crate::db::ImporterDb;
use crate::request_logger::RequestLogger;
use crate::state::ImporterState;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};
use std::time::Duration;

static LOGGER: Once = Once::new();

const UPLOAD_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors();

    let mut rocket = rocket::build().attach(RequestLogger).attach(ImporterDb::init());

    match cors {
        Ok(cors) => rocket = rocket.attach(cors),
        Err(err) => log::error!("CORS disabled, invalid configuration: {}", err),
    }

    rocket
        // Fairing to clone and manage the database pool for the import engine
        .attach(AdHoc::try_on_ignite("Manage DB Pool", |rocket| async move {
            match ImporterDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    Ok(rocket.manage(pool))
                }
                None => {
                    log::error!("database pool not available");
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite(
            "Importer State",
            |rocket| async move {
                let config = ImporterConfig::from_env();
                log::info!(
                    "importer configured: structure={}, csv base path={}, batch size={}",
                    config.structure_path.display(),
                    config.csv_base_path.display(),
                    config.batch_size
                );

                match ImporterState::new(config) {
                    Ok(state) => {
                        // Warm the structure cache; a broken file is reported per request.
                        if let Err(err) = state.structure.get() {
                            log::warn!("structure not loaded at startup: {}", err);
                        }
                        Ok(rocket.manage(state))
                    }
                    Err(err) => {
                        log::error!("failed to prepare upload directory: {}", err);
                        Err(rocket)
                    }
                }
            },
        ))
        // Periodically delete uploads that were never imported
        .attach(AdHoc::on_liftoff("Spawn Upload Sweeper", |rocket| {
            Box::pin(async move {
                if let Some(state) = rocket.state::<ImporterState>() {
                    let uploads = Arc::clone(&state.uploads);
                    let max_age = state.config.upload_max_age;
                    tokio::spawn(async move {
                        log::info!("starting upload sweeper (max age {:?})", max_age);
                        let mut ticker = tokio::time::interval(UPLOAD_SWEEP_INTERVAL.min(max_age));
                        loop {
                            ticker.tick().await;
                            uploads.sweep_older_than(max_age);
                        }
                    });
                } else {
                    log::error!("failed to spawn upload sweeper: importer state not found");
                }
            })
        }))
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health routes
                routes::health::health_check,
                // Model routes
                routes::models::list_models,
                routes::models::get_model,
                // Operation routes
                routes::operations::import_model,
                routes::operations::purge_model,
                routes::operations::upload_csv,
                routes::operations::get_status,
                // Record routes
                routes::records::list_records,
                // Structure routes
                routes::structure::refresh_structure,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("CSV Importer API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::config::ImporterConfig;
    use crate::state::ImporterState;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};
    use std::path::Path;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Convenience helpers for laying out structure files, CSV files and tables in tests.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Run a DDL or seed statement.
        pub async fn execute(&self, sql: &str) -> Result<(), sqlx::Error> {
            sqlx::query(sql).execute(self.pool).await?;
            Ok(())
        }

        /// Rows of `table` rendered as text, ordered by the first column.
        pub async fn rows(
            &self,
            table: &str,
            columns: &[&str],
        ) -> Result<Vec<Vec<Option<String>>>, sqlx::Error> {
            let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
            crate::importer::catalog::fetch_page(self.pool, table, &columns, i64::MAX, 0).await
        }

        pub async fn count(&self, table: &str) -> Result<i64, sqlx::Error> {
            crate::importer::catalog::count_rows(self.pool, table).await
        }
    }

    /// Write `structure.yml` and `csv/` under `root`, returning a config pointing at them.
    pub fn write_workspace(
        root: &Path,
        structure: &str,
        csv_files: &[(&str, &str)],
    ) -> std::io::Result<ImporterConfig> {
        let structure_path = root.join("structure.yml");
        let csv_base_path = root.join("csv");
        std::fs::write(&structure_path, structure)?;
        std::fs::create_dir_all(&csv_base_path)?;
        for (name, contents) in csv_files {
            std::fs::write(csv_base_path.join(format!("{name}.csv")), contents)?;
        }

        Ok(ImporterConfig {
            structure_path,
            csv_base_path,
            ..ImporterConfig::default()
        })
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::ImageExt;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Provision a fresh database on `TEST_DATABASE_URL` when set, otherwise
            /// inside a disposable Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) if !url.trim().is_empty() => Self::with_url(&url, None).await,
                    _ => Self::new().await,
                }
            }

            /// Provision a fresh database by launching a disposable Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().with_tag("16-alpine").start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::with_url(&admin_url, Some(container)).await
            }

            async fn with_url(
                url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container,
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled connection handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ =
                                drop_database_with_fallback(admin_options.clone(), &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ = drop_database_with_fallback(
                                        admin_options.clone(),
                                        &db_name,
                                    )
                                    .await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        importer_state: Option<ImporterState>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pg_pool: None,
                importer_state: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a `PgPool` instance for tests that exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        /// Manage importer state built from `config`.
        pub fn manage_importer(mut self, config: ImporterConfig) -> Self {
            self.importer_state =
                Some(ImporterState::new(config).expect("upload directory is creatable"));
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }

            if let Some(state) = self.importer_state {
                rocket = rocket.manage(state);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
