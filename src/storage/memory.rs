use super::provider::{
    ErrorListing, PersistenceProvider, eviction_candidates, is_cullable, matches_application,
    sort_most_recent_first,
};
use crate::core::{PersistedError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory provider. Keeps at most `size` records (0 = unbounded),
/// evicting the oldest unprotected ones.
pub struct MemoryProvider {
    errors: RwLock<HashMap<Uuid, PersistedError>>,
    size: usize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::with_size(0)
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            errors: RwLock::new(HashMap::new()),
            size,
        }
    }

    /// Number of stored records, deleted ones included
    pub async fn len(&self) -> usize {
        self.errors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn latest_by_signature(
        &self,
        error_hash: &Uuid,
        application_name: &str,
    ) -> Result<Option<PersistedError>> {
        let errors = self.errors.read().await;
        Ok(errors
            .values()
            .filter(|e| {
                !e.is_deleted() && e.error_hash == *error_hash && e.application_name == application_name
            })
            .max_by_key(|e| e.creation_date)
            .cloned())
    }

    async fn insert_error(&self, error: PersistedError) -> Result<PersistedError> {
        let mut errors = self.errors.write().await;
        errors.insert(error.guid, error.clone());

        if self.size > 0 {
            let snapshot: Vec<PersistedError> = errors.values().cloned().collect();
            for guid in eviction_candidates(&snapshot, self.size) {
                debug!(%guid, "memory store full, evicting");
                errors.remove(&guid);
            }
        }

        Ok(error)
    }

    async fn merge_duplicate(
        &self,
        guid: &Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<PersistedError>> {
        let mut errors = self.errors.write().await;
        Ok(errors
            .get_mut(guid)
            .filter(|e| !e.is_deleted())
            .map(|e| {
                e.record_duplicate(occurred_at);
                e.clone()
            }))
    }

    async fn get_error(&self, guid: &Uuid) -> Result<Option<PersistedError>> {
        Ok(self.errors.read().await.get(guid).cloned())
    }

    async fn get_all_errors(&self, application_name: Option<&str>) -> Result<ErrorListing> {
        let errors = self.errors.read().await;
        let mut listed: Vec<PersistedError> = errors
            .values()
            .filter(|e| !e.is_deleted() && matches_application(e, application_name))
            .cloned()
            .collect();
        sort_most_recent_first(&mut listed);
        Ok(ErrorListing::new(listed))
    }

    async fn get_error_count(
        &self,
        since: Option<DateTime<Utc>>,
        application_name: Option<&str>,
    ) -> Result<u64> {
        let errors = self.errors.read().await;
        Ok(errors
            .values()
            .filter(|e| !e.is_deleted() && matches_application(e, application_name))
            .filter(|e| since.is_none_or(|since| e.creation_date >= since))
            .map(|e| u64::from(e.duplicate_count))
            .sum())
    }

    async fn protect_error(&self, guid: &Uuid) -> Result<bool> {
        let mut errors = self.errors.write().await;
        Ok(match errors.get_mut(guid) {
            Some(error) => {
                error.is_protected = true;
                true
            }
            None => false,
        })
    }

    async fn delete_error(&self, guid: &Uuid) -> Result<bool> {
        let mut errors = self.errors.write().await;
        Ok(match errors.get_mut(guid) {
            Some(error) if !error.is_deleted() => {
                error.deletion_date = Some(Utc::now());
                true
            }
            _ => false,
        })
    }

    async fn delete_all_errors(&self, application_name: Option<&str>) -> Result<bool> {
        let mut errors = self.errors.write().await;
        let now = Utc::now();
        let mut deleted = 0usize;
        for error in errors.values_mut() {
            if !error.is_deleted() && !error.is_protected && matches_application(error, application_name) {
                error.deletion_date = Some(now);
                deleted += 1;
            }
        }
        Ok(deleted > 0)
    }

    async fn cull_errors(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut errors = self.errors.write().await;
        let before = errors.len();
        errors.retain(|_, e| !is_cullable(e, older_than));
        Ok(before - errors.len())
    }
}
