//! JSON file provider: one `<guid>.json` document per error in a directory.

use super::provider::{
    ErrorListing, PersistenceProvider, eviction_candidates, is_cullable, matches_application,
    sort_most_recent_first,
};
use crate::core::{PersistedError, Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct FileProvider {
    dir: PathBuf,
    size: usize,
    /// Serializes every read-modify-write against the directory
    write_lock: Mutex<()>,
}

/// Documents found in the directory
#[derive(Default)]
struct Scan {
    errors: Vec<PersistedError>,
    unreadable: Vec<Uuid>,
}

impl FileProvider {
    pub fn new<P: AsRef<Path>>(dir: P, size: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::IoError(format!(
                "Failed to create error directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self {
            dir,
            size,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, guid: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", guid))
    }

    async fn load(&self, guid: &Uuid) -> Result<Option<PersistedError>> {
        match fs::read(self.file_for(guid)).await {
            Ok(data) => decode(guid, &data).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every `<guid>.json` document. A document that does not decode is
    /// reported by guid instead of failing the whole scan.
    async fn scan(&self) -> Result<Scan> {
        let mut scan = Scan::default();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(guid) = guid_of(&path) else {
                warn!(path = %path.display(), "ignoring file not named after an error guid");
                continue;
            };

            let data = match fs::read(&path).await {
                Ok(data) => data,
                // Removed between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match decode(&guid, &data) {
                Ok(error) => scan.errors.push(error),
                Err(e) => {
                    warn!(%guid, error = %e, "unreadable error file");
                    scan.unreadable.push(guid);
                }
            }
        }

        Ok(scan)
    }

    /// Write to a sibling `.tmp` file, then rename over the document
    async fn save(&self, error: &PersistedError) -> Result<()> {
        let path = self.file_for(&error.guid);
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(error)?;

        fs::write(&tmp, bytes).await.map_err(|e| {
            StoreError::IoError(format!("Failed to write '{}': {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            StoreError::IoError(format!(
                "Failed to rename '{}' -> '{}': {}",
                tmp.display(),
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    async fn remove(&self, guid: &Uuid) -> Result<()> {
        match fs::remove_file(self.file_for(guid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update<F>(&self, guid: &Uuid, mutate: F) -> Result<Option<PersistedError>>
    where
        F: FnOnce(&mut PersistedError) -> bool + Send,
    {
        let Some(mut error) = self.load(guid).await? else {
            return Ok(None);
        };
        if mutate(&mut error) {
            self.save(&error).await?;
            Ok(Some(error))
        } else {
            Ok(None)
        }
    }
}

fn guid_of(path: &Path) -> Option<Uuid> {
    path.file_stem()?.to_str()?.parse().ok()
}

fn decode(guid: &Uuid, data: &[u8]) -> Result<PersistedError> {
    serde_json::from_slice(data).map_err(|e| StoreError::Conversion {
        guid: *guid,
        reason: e.to_string(),
    })
}

#[async_trait]
impl PersistenceProvider for FileProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn latest_by_signature(
        &self,
        error_hash: &Uuid,
        application_name: &str,
    ) -> Result<Option<PersistedError>> {
        let _guard = self.write_lock.lock().await;
        Ok(self
            .scan()
            .await?
            .errors
            .into_iter()
            .filter(|e| {
                !e.is_deleted() && e.error_hash == *error_hash && e.application_name == application_name
            })
            .max_by_key(|e| e.creation_date))
    }

    async fn insert_error(&self, error: PersistedError) -> Result<PersistedError> {
        let _guard = self.write_lock.lock().await;
        self.save(&error).await?;

        if self.size > 0 {
            let all = self.scan().await?.errors;
            for guid in eviction_candidates(&all, self.size) {
                debug!(%guid, "error directory full, removing");
                self.remove(&guid).await?;
            }
        }

        Ok(error)
    }

    async fn merge_duplicate(
        &self,
        guid: &Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<PersistedError>> {
        let _guard = self.write_lock.lock().await;
        self.update(guid, |error| {
            if error.is_deleted() {
                return false;
            }
            error.record_duplicate(occurred_at);
            true
        })
        .await
    }

    async fn get_error(&self, guid: &Uuid) -> Result<Option<PersistedError>> {
        let _guard = self.write_lock.lock().await;
        self.load(guid).await
    }

    async fn get_all_errors(&self, application_name: Option<&str>) -> Result<ErrorListing> {
        let _guard = self.write_lock.lock().await;
        let scan = self.scan().await?;
        let mut listed: Vec<PersistedError> = scan
            .errors
            .into_iter()
            .filter(|e| !e.is_deleted() && matches_application(e, application_name))
            .collect();
        sort_most_recent_first(&mut listed);
        Ok(ErrorListing::with_unreadable(listed, scan.unreadable))
    }

    async fn get_error_count(
        &self,
        since: Option<DateTime<Utc>>,
        application_name: Option<&str>,
    ) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        Ok(self
            .scan()
            .await?
            .errors
            .iter()
            .filter(|e| !e.is_deleted() && matches_application(e, application_name))
            .filter(|e| since.is_none_or(|since| e.creation_date >= since))
            .map(|e| u64::from(e.duplicate_count))
            .sum())
    }

    async fn protect_error(&self, guid: &Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let updated = self.update(guid, |error| {
            error.is_protected = true;
            true
        })
        .await?;
        Ok(updated.is_some())
    }

    async fn delete_error(&self, guid: &Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let updated = self.update(guid, |error| {
            if error.is_deleted() {
                return false;
            }
            error.deletion_date = Some(Utc::now());
            true
        })
        .await?;
        Ok(updated.is_some())
    }

    async fn delete_all_errors(&self, application_name: Option<&str>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut deleted = 0usize;
        for mut error in self.scan().await?.errors {
            if !error.is_deleted() && !error.is_protected && matches_application(&error, application_name) {
                error.deletion_date = Some(now);
                self.save(&error).await?;
                deleted += 1;
            }
        }
        Ok(deleted > 0)
    }

    async fn cull_errors(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0usize;
        for error in self.scan().await?.errors {
            if is_cullable(&error, older_than) {
                self.remove(&error.guid).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn health_check(&self) -> Result<()> {
        let is_dir = fs::metadata(&self.dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if is_dir {
            Ok(())
        } else {
            Err(StoreError::BackendUnavailable(format!(
                "error directory '{}' is missing",
                self.dir.display()
            )))
        }
    }
}
