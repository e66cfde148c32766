//! The importable-table descriptor handed to callers.
//!
//! A [`Model`] is built once per operation from the current structure snapshot.
//! Its initialization state is fixed at construction; only [`Model::import`] and
//! [`Model::purge`] touch the processing state and message afterwards.

use crate::importer::error::ImportError;
use crate::importer::schema::{FieldDescriptor, Structure};
use crate::importer::uploads::UploadStore;
use crate::importer::writer::ImportEngine;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitializationState {
    Uninitialized,
    Invalid,
    Valid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    Unprocessed,
    Error,
    Warning,
    Success,
}

/// Where the rows of an import come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvSource {
    /// `<base path>/<file_name>.csv`
    BaseDir { file_name: String },
    /// A previously uploaded file, by upload id.
    Upload { id: u64, path: PathBuf },
    /// An explicit file chosen by the caller.
    File { path: PathBuf },
}

impl CsvSource {
    pub fn resolve(&self, base_path: &Path) -> PathBuf {
        match self {
            CsvSource::BaseDir { file_name } => base_path.join(format!("{file_name}.csv")),
            CsvSource::Upload { path, .. } | CsvSource::File { path } => path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Model {
    model_name: String,
    table_name: String,
    fields: Vec<FieldDescriptor>,
    unique_keys: Vec<String>,
    csv_source: CsvSource,
    initialization_state: InitializationState,
    processing_state: ProcessingState,
    message: Option<String>,
}

impl Model {
    /// Load `model_name` from the structure, reading rows from the configured base path.
    pub fn new(structure: &Structure, model_name: &str) -> Self {
        Self::build(structure, model_name, None)
    }

    /// Load `model_name` and read rows from upload `upload_id` instead.
    pub fn with_upload(
        structure: &Structure,
        model_name: &str,
        upload_id: u64,
        uploads: &UploadStore,
    ) -> Self {
        Self::build(structure, model_name, Some((upload_id, uploads.path(upload_id))))
    }

    /// Load `model_name` and read rows from `path`, whatever the structure says.
    pub fn with_csv_file(structure: &Structure, model_name: &str, path: PathBuf) -> Self {
        let mut model = Self::build(structure, model_name, None);
        if model.is_valid() {
            model.csv_source = CsvSource::File { path };
        }
        model
    }

    fn build(
        structure: &Structure,
        model_name: &str,
        upload: Option<(u64, Option<PathBuf>)>,
    ) -> Self {
        let mut model = Self {
            model_name: model_name.to_string(),
            table_name: model_name.to_string(),
            fields: Vec::new(),
            unique_keys: Vec::new(),
            csv_source: CsvSource::BaseDir {
                file_name: model_name.to_string(),
            },
            initialization_state: InitializationState::Uninitialized,
            processing_state: ProcessingState::Unprocessed,
            message: None,
        };

        let schema = match structure.get(model_name) {
            Some(Ok(schema)) => schema,
            Some(Err(err)) => return model.invalid(err.to_string()),
            None => return model.invalid(format!("Data model \"{model_name}\" doesn't exist.")),
        };

        model.table_name = schema.table_name.clone();
        model.unique_keys = schema.unique_keys();
        model.fields = schema.fields.clone();
        model.csv_source = CsvSource::BaseDir {
            file_name: schema.csv_file_name.clone(),
        };

        if let Some((id, path)) = upload {
            match path {
                Some(path) if path.is_file() => {
                    model.csv_source = CsvSource::Upload { id, path };
                    model.message = Some(format!(
                        "Your CSV has been uploaded and will be used for {model_name}"
                    ));
                }
                _ => {
                    return model
                        .invalid("Couldn't find the temporary file you just have uploaded.".into());
                }
            }
        }

        model.initialization_state = InitializationState::Valid;
        model
    }

    fn invalid(mut self, message: String) -> Self {
        log::debug!("model \"{}\" is invalid: {}", self.model_name, message);
        self.initialization_state = InitializationState::Invalid;
        self.message = Some(message);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Column names in CSV order.
    pub fn row_field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.label.clone()).collect()
    }

    pub fn unique_keys(&self) -> &[String] {
        &self.unique_keys
    }

    pub fn csv_source(&self) -> &CsvSource {
        &self.csv_source
    }

    pub fn csv_path(&self, base_path: &Path) -> PathBuf {
        self.csv_source.resolve(base_path)
    }

    pub fn initialization_state(&self) -> InitializationState {
        self.initialization_state
    }

    pub fn is_valid(&self) -> bool {
        self.initialization_state == InitializationState::Valid
    }

    pub fn processing_state(&self) -> ProcessingState {
        self.processing_state
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Import the model's CSV into its table and record the outcome.
    pub async fn import(&mut self, engine: &ImportEngine) -> ProcessingState {
        match engine.import(self).await {
            Ok(report) => self.record(
                ProcessingState::Success,
                format!(
                    "Import of {} entrie(s) from model \"{}\" in {:.3} seconds.",
                    report.rows_processed,
                    self.model_name,
                    report.elapsed.as_secs_f64()
                ),
            ),
            Err(ImportError::Busy) => self.record(
                ProcessingState::Warning,
                "Cannot import a CSV file for now. There is already an ongoing operation.".into(),
            ),
            Err(err @ ImportError::NotInitialized(_)) => {
                let reason = self.message.clone().unwrap_or_default();
                self.record(ProcessingState::Error, format!("{err}: {reason}"))
            }
            Err(err) => self.record(
                ProcessingState::Error,
                format!(
                    "Import of {} failed. The target table has not been modified. Error message: {}",
                    self.model_name, err
                ),
            ),
        }
    }

    /// Delete every row of the model's table and record the outcome.
    pub async fn purge(&mut self, engine: &ImportEngine) -> ProcessingState {
        match engine.purge(self).await {
            Ok(report) => self.record(
                ProcessingState::Success,
                format!(
                    "Table {} has been purged. ({} entries removed)",
                    report.table_name, report.rows_removed
                ),
            ),
            Err(ImportError::Busy) => self.record(
                ProcessingState::Warning,
                format!(
                    "Cannot purge table {} for now. There is already an ongoing operation.",
                    self.table_name
                ),
            ),
            Err(err @ ImportError::NotInitialized(_)) => {
                let reason = self.message.clone().unwrap_or_default();
                self.record(ProcessingState::Error, format!("{err}: {reason}"))
            }
            Err(err) => self.record(
                ProcessingState::Error,
                format!("Purge of {} failed. Error message: {}", self.table_name, err),
            ),
        }
    }

    fn record(&mut self, state: ProcessingState, message: String) -> ProcessingState {
        match state {
            ProcessingState::Success => log::info!("{}", message),
            ProcessingState::Warning => log::warn!("{}", message),
            _ => log::error!("{}", message),
        }
        self.processing_state = state;
        self.message = Some(message);
        state
    }
}
