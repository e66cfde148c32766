use crate::importer::batch::DEFAULT_BATCH_SIZE;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn lookup_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn lookup_path(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> PathBuf {
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Runtime configuration for the importer.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// YAML structure file describing importable models.
    pub structure_path: PathBuf,
    /// Directory holding `<csv_file_name>.csv` files.
    pub csv_base_path: PathBuf,
    pub preview_length: usize,
    pub batch_size: usize,
    /// Upload directory; a private temporary directory when unset.
    pub upload_dir: Option<PathBuf>,
    pub upload_limit_bytes: u64,
    /// Uploads older than this are deleted by the background sweep.
    pub upload_max_age: Duration,
    pub records_page_size: usize,
}

impl ImporterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let preview_length = match lookup("IMPORTER_PREVIEW_LENGTH") {
            Some(value) => value.trim().parse::<usize>().unwrap_or_else(|_| {
                log::warn!(
                    "IMPORTER_PREVIEW_LENGTH is not numeric ({:?}), previewing 20 rows",
                    value
                );
                20
            }),
            None => 20,
        };

        Self {
            structure_path: lookup_path(&lookup, "IMPORTER_STRUCTURE_PATH", "./structure.yml"),
            csv_base_path: lookup_path(&lookup, "IMPORTER_CSV_BASE_PATH", "./csv"),
            preview_length,
            batch_size: lookup_usize(&lookup, "IMPORTER_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            upload_dir: lookup("IMPORTER_UPLOAD_DIR")
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            upload_limit_bytes: lookup_usize(&lookup, "IMPORTER_UPLOAD_LIMIT_MB", 64) as u64
                * 1024
                * 1024,
            upload_max_age: Duration::from_secs(
                lookup_usize(&lookup, "IMPORTER_UPLOAD_MAX_AGE_SECS", 3600).max(1) as u64,
            ),
            records_page_size: lookup_usize(&lookup, "IMPORTER_RECORDS_PAGE_SIZE", 20).max(1),
        }
    }
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
