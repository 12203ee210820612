use crate::core::{PersistedError, Result};
use crate::rollup::RollupWindow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of logging one occurrence
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome<T> {
    /// Stored as a new record
    Created(T),
    /// Folded into an existing record; carries that record (guid of the first occurrence)
    Merged(T),
    /// Backend unreachable, kept in the backup buffer for a later flush
    Queued,
}

impl<T> LogOutcome<T> {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }

    pub fn stored(&self) -> Option<&T> {
        match self {
            Self::Created(record) | Self::Merged(record) => Some(record),
            Self::Queued => None,
        }
    }
}

/// Listing of non-deleted errors, most recent first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorListing {
    /// Readable records plus unreadable ones
    pub total: usize,
    pub errors: Vec<PersistedError>,
    /// Records the backend holds but could not decode
    pub unreadable: Vec<Uuid>,
}

impl ErrorListing {
    pub fn new(errors: Vec<PersistedError>) -> Self {
        Self::with_unreadable(errors, Vec::new())
    }

    pub fn with_unreadable(errors: Vec<PersistedError>, unreadable: Vec<Uuid>) -> Self {
        Self {
            total: errors.len() + unreadable.len(),
            errors,
            unreadable,
        }
    }
}

/// Persistence provider trait - the pluggable backend behind the error store
///
/// "Not found" is never an error: lookups return `None`, mutations return
/// `false`. Each call is its own backend-local transaction.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Latest non-deleted record of an application with the given signature
    async fn latest_by_signature(
        &self,
        error_hash: &Uuid,
        application_name: &str,
    ) -> Result<Option<PersistedError>>;

    /// Store a brand new record
    async fn insert_error(&self, error: PersistedError) -> Result<PersistedError>;

    /// Bump the duplicate count of an existing record. `None` if it is gone.
    async fn merge_duplicate(
        &self,
        guid: &Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<PersistedError>>;

    /// Merge-or-insert. The default composes the primitives above; backends
    /// with a native atomic upsert should override it.
    async fn log_error(
        &self,
        error: PersistedError,
        window: &RollupWindow,
    ) -> Result<LogOutcome<PersistedError>> {
        let candidate = self
            .latest_by_signature(&error.error_hash, &error.application_name)
            .await?;

        if let Some(existing) = candidate {
            if window.matches(&existing, error.creation_date) {
                if let Some(merged) = self.merge_duplicate(&existing.guid, error.creation_date).await? {
                    return Ok(LogOutcome::Merged(merged));
                }
            }
        }

        Ok(LogOutcome::Created(self.insert_error(error).await?))
    }

    async fn get_error(&self, guid: &Uuid) -> Result<Option<PersistedError>>;

    async fn get_all_errors(&self, application_name: Option<&str>) -> Result<ErrorListing>;

    /// Sum of duplicate counts of non-deleted records created at or after `since`
    async fn get_error_count(
        &self,
        since: Option<DateTime<Utc>>,
        application_name: Option<&str>,
    ) -> Result<u64>;

    async fn protect_error(&self, guid: &Uuid) -> Result<bool>;

    /// Soft delete. `false` when missing or already deleted.
    async fn delete_error(&self, guid: &Uuid) -> Result<bool>;

    /// Soft delete every unprotected record. `true` when anything was deleted.
    async fn delete_all_errors(&self, application_name: Option<&str>) -> Result<bool>;

    /// Hard delete soft-deleted records and unprotected records last seen
    /// before `older_than`. Returns how many were removed.
    async fn cull_errors(&self, older_than: DateTime<Utc>) -> Result<usize>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Should `record` be dropped by an age-based cull?
pub(crate) fn is_cullable(record: &PersistedError, older_than: DateTime<Utc>) -> bool {
    record.is_deleted() || (!record.is_protected && record.last_seen() < older_than)
}

pub(crate) fn matches_application(record: &PersistedError, application_name: Option<&str>) -> bool {
    application_name.is_none_or(|name| record.application_name == name)
}

/// Most recent first, by first occurrence
pub(crate) fn sort_most_recent_first(errors: &mut [PersistedError]) {
    errors.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
}

/// Records to evict so that at most `size` remain. Oldest
/// unprotected records go first; protected ones are never chosen.
pub(crate) fn eviction_candidates(errors: &[PersistedError], size: usize) -> Vec<Uuid> {
    if errors.len() <= size {
        return Vec::new();
    }
    let mut unprotected: Vec<&PersistedError> = errors.iter().filter(|e| !e.is_protected).collect();
    unprotected.sort_by_key(|e| e.last_seen());
    unprotected
        .into_iter()
        .take(errors.len() - size)
        .map(|e| e.guid)
        .collect()
}
