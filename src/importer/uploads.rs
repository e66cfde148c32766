//! Temporary storage for CSV files uploaded through the API.
//!
//! Each upload gets an opaque numeric id that can later replace a model's
//! configured CSV file for one preview/import. Uploads nobody imports are
//! removed by [`UploadStore::sweep_older_than`].

use crate::importer::error::UploadError;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;

enum UploadDir {
    Temporary(TempDir),
    Fixed(PathBuf),
}

struct StoredUpload {
    path: PathBuf,
    stored_at: Instant,
}

pub struct UploadStore {
    dir: UploadDir,
    next_id: AtomicU64,
    files: DashMap<u64, StoredUpload>,
}

impl UploadStore {
    /// Store uploads in `dir`, or in a private temporary directory when `None`.
    pub fn new(dir: Option<PathBuf>) -> Result<Self, UploadError> {
        let dir = match dir {
            Some(path) => {
                std::fs::create_dir_all(&path)?;
                UploadDir::Fixed(path)
            }
            None => UploadDir::Temporary(
                tempfile::Builder::new()
                    .prefix("csv-importer-uploads-")
                    .tempdir()?,
            ),
        };

        Ok(Self {
            dir,
            next_id: AtomicU64::new(1),
            files: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        match &self.dir {
            UploadDir::Temporary(dir) => dir.path(),
            UploadDir::Fixed(path) => path,
        }
    }

    /// Allocate an id and the path its contents should be written to.
    pub fn reserve(&self) -> (u64, PathBuf) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let path = self.dir().join(format!("{}.csv", Uuid::new_v4().simple()));
        self.files.insert(
            id,
            StoredUpload {
                path: path.clone(),
                stored_at: Instant::now(),
            },
        );
        (id, path)
    }

    /// Persist `data` as a new upload, rejecting payloads above `limit` bytes.
    pub async fn store_data(
        &self,
        data: rocket::Data<'_>,
        limit: u64,
    ) -> Result<(u64, u64), UploadError> {
        let (id, path) = self.reserve();

        let written = match data.open(rocket::data::ByteUnit::from(limit)).into_file(&path).await {
            Ok(written) => written,
            Err(err) => {
                self.remove(id);
                return Err(UploadError::Io(err));
            }
        };

        if !written.is_complete() {
            self.remove(id);
            return Err(UploadError::TooLarge { limit });
        }

        let bytes = written.n.written;
        log::info!("stored upload {} ({} bytes) at {}", id, bytes, path.display());
        Ok((id, bytes))
    }

    /// Path of a registered upload.
    pub fn path(&self, id: u64) -> Option<PathBuf> {
        self.files.get(&id).map(|entry| entry.path.clone())
    }

    /// Forget an upload and delete its file.
    pub fn remove(&self, id: u64) -> bool {
        match self.files.remove(&id) {
            Some((_, upload)) => {
                if let Err(err) = std::fs::remove_file(&upload.path) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("failed to delete upload {}: {}", upload.path.display(), err);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Remove every upload stored more than `max_age` ago. Returns how many went.
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        let expired: Vec<u64> = self
            .files
            .iter()
            .filter(|entry| entry.stored_at.elapsed() >= max_age)
            .map(|entry| *entry.key())
            .collect();

        let removed = expired.into_iter().filter(|id| self.remove(*id)).count();
        if removed > 0 {
            log::info!("swept {} expired upload(s)", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

impl Drop for UploadStore {
    fn drop(&mut self) {
        // Temporary directories clean themselves up.
        if let UploadDir::Fixed(_) = self.dir {
            let ids: Vec<u64> = self.files.iter().map(|entry| *entry.key()).collect();
            for id in ids {
                self.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_paths_are_unique_and_registered() {
        let store = UploadStore::new(None).unwrap();
        let (first, first_path) = store.reserve();
        let (second, second_path) = store.reserve();

        assert_ne!(first, second);
        assert_ne!(first_path, second_path);
        assert!(first_path.starts_with(store.dir()));
        assert_eq!(store.path(second), Some(second_path));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn remove_deletes_the_file() {
        let store = UploadStore::new(None).unwrap();
        let (id, path) = store.reserve();
        std::fs::write(&path, "a,b\n").unwrap();

        assert!(store.remove(id));
        assert!(!path.exists());
        assert!(store.path(id).is_none());
        assert!(!store.remove(id));
    }

    #[test]
    fn fixed_directory_is_cleaned_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("uploads");
        let path = {
            let store = UploadStore::new(Some(dir.clone())).unwrap();
            let (_, path) = store.reserve();
            std::fs::write(&path, "x\n").unwrap();
            path
        };

        assert!(dir.is_dir());
        assert!(!path.exists());
    }

    #[test]
    fn sweep_removes_only_expired_uploads() {
        let store = UploadStore::new(None).unwrap();
        let (id, path) = store.reserve();
        std::fs::write(&path, "1,Paris\n").unwrap();

        assert_eq!(store.sweep_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(store.path(id), Some(path.clone()));

        assert_eq!(store.sweep_older_than(Duration::ZERO), 1);
        assert!(store.path(id).is_none());
        assert!(!path.exists());
        assert_eq!(store.len(), 0);
    }
}
