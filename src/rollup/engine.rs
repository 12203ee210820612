// ============================================================================
// Rollup Engine
// ============================================================================

use super::{BackupQueue, KeyedLocks, RollupWindow};
use crate::config::StoreSettings;
use crate::core::{ErrorRecord, PersistedError, Result, StoreError};
use crate::storage::{LogOutcome, PersistenceProvider, ProviderResolver};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Converted listing returned by [`RollupEngine::get_all_errors`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorPage {
    /// Number of records the backend listed
    pub total: usize,
    /// Readable errors, most recent first
    pub errors: Vec<ErrorRecord>,
    /// Records whose payload could not be converted
    pub unreadable: Vec<Uuid>,
}

/// The error store core.
///
/// Decides whether an occurrence rolls up into an existing record, keeps a
/// bounded backup of errors the backend could not take, and delegates
/// everything durable to the resolved [`PersistenceProvider`].
pub struct RollupEngine {
    settings: Arc<StoreSettings>,
    resolver: Arc<ProviderResolver>,
    window: RollupWindow,
    backup: BackupQueue,
    locks: KeyedLocks,
    flushing: AtomicBool,
}

/// Clears the flushing flag however the flush ends
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RollupEngine {
    pub fn new(resolver: Arc<ProviderResolver>) -> Self {
        let settings = Arc::new(resolver.settings().clone());
        Self {
            window: RollupWindow::from_settings(&settings),
            backup: BackupQueue::new(settings.backup_queue_size),
            locks: KeyedLocks::new(),
            flushing: AtomicBool::new(false),
            settings,
            resolver,
        }
    }

    /// Engine whose provider comes from the process-wide registry
    pub fn from_settings(settings: StoreSettings) -> Result<Self> {
        settings.validate()?;
        let resolver = ProviderResolver::with_global_registry(Arc::new(settings));
        Ok(Self::new(Arc::new(resolver)))
    }

    /// Engine bound to an explicit provider
    pub fn with_provider(settings: StoreSettings, provider: Arc<dyn PersistenceProvider>) -> Self {
        let resolver = ProviderResolver::with_provider(Arc::new(settings), provider);
        Self::new(Arc::new(resolver))
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &Arc<ProviderResolver> {
        &self.resolver
    }

    pub fn window(&self) -> RollupWindow {
        self.window
    }

    /// Errors currently waiting in the backup buffer
    pub fn backup_len(&self) -> usize {
        self.backup.len()
    }

    pub fn backup_snapshot(&self) -> Vec<ErrorRecord> {
        self.backup.snapshot()
    }

    /// Record one occurrence.
    ///
    /// Merges into the latest matching record inside the rollup window or
    /// stores a new one. On a merge `error.is_duplicate` is set; the stored
    /// record in the outcome keeps the guid of the first occurrence. When the
    /// backend is unreachable the error goes to the backup buffer and
    /// `Queued` is returned.
    pub async fn log_error(&self, error: &mut ErrorRecord) -> Result<LogOutcome<ErrorRecord>> {
        let provider = self.resolver.resolve().await?;

        match self.store(&provider, error).await {
            Ok(outcome) => {
                if outcome.is_merged() {
                    error.is_duplicate = true;
                }
                self.flush_if_pending(&provider).await;
                Ok(outcome)
            }
            Err(e) if e.is_transient() => {
                warn!(guid = %error.guid, error = %e, "backend unavailable, buffering error");
                self.backup.push(error.clone());
                Ok(LogOutcome::Queued)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_error(&self, guid: &Uuid) -> Result<Option<ErrorRecord>> {
        let provider = self.resolver.resolve().await?;
        let persisted = self.call(provider.get_error(guid)).await?;
        self.flush_if_pending(&provider).await;
        persisted.map(ErrorRecord::try_from).transpose()
    }

    /// Non-deleted errors, most recent first. A record that fails to
    /// convert is reported in `unreadable` instead of failing the listing.
    pub async fn get_all_errors(&self, application_name: Option<&str>) -> Result<ErrorPage> {
        let provider = self.resolver.resolve().await?;
        let listing = self.call(provider.get_all_errors(application_name)).await?;
        self.flush_if_pending(&provider).await;

        let mut page = ErrorPage {
            total: listing.total,
            errors: Vec::with_capacity(listing.errors.len()),
            unreadable: listing.unreadable,
        };
        for persisted in listing.errors {
            let guid = persisted.guid;
            match ErrorRecord::try_from(persisted) {
                Ok(record) => page.errors.push(record),
                Err(e) => {
                    warn!(%guid, error = %e, "skipping unreadable error");
                    page.unreadable.push(guid);
                }
            }
        }
        Ok(page)
    }

    /// Total occurrences (sum of duplicate counts), not record count
    pub async fn get_error_count(
        &self,
        since: Option<DateTime<Utc>>,
        application_name: Option<&str>,
    ) -> Result<u64> {
        let provider = self.resolver.resolve().await?;
        let count = self.call(provider.get_error_count(since, application_name)).await?;
        self.flush_if_pending(&provider).await;
        Ok(count)
    }

    pub async fn protect_error(&self, guid: &Uuid) -> Result<bool> {
        let provider = self.resolver.resolve().await?;
        let protected = self.call(provider.protect_error(guid)).await?;
        self.flush_if_pending(&provider).await;
        Ok(protected)
    }

    /// Soft delete one error. Protection does not prevent an explicit delete.
    pub async fn delete_error(&self, guid: &Uuid) -> Result<bool> {
        let provider = self.resolver.resolve().await?;
        let deleted = self.call(provider.delete_error(guid)).await?;
        if deleted {
            info!(%guid, "error deleted");
        }
        self.flush_if_pending(&provider).await;
        Ok(deleted)
    }

    /// Soft delete every unprotected error of an application (or all)
    pub async fn delete_all_errors(&self, application_name: Option<&str>) -> Result<bool> {
        let provider = self.resolver.resolve().await?;
        let deleted = self.call(provider.delete_all_errors(application_name)).await?;
        info!(application = application_name.unwrap_or("*"), deleted, "bulk delete");
        self.flush_if_pending(&provider).await;
        Ok(deleted)
    }

    /// Automatic culling: hard delete soft-deleted errors and unprotected
    /// errors not seen since `older_than`
    pub async fn cull_errors(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let provider = self.resolver.resolve().await?;
        let removed = self.call(provider.cull_errors(older_than)).await?;
        info!(removed, %older_than, "culled errors");
        self.flush_if_pending(&provider).await;
        Ok(removed)
    }

    /// Resolve the provider and ask it whether it can serve requests
    pub async fn health_check(&self) -> Result<()> {
        let provider = self.resolver.resolve().await?;
        self.call(provider.health_check()).await?;
        self.flush_if_pending(&provider).await;
        Ok(())
    }

    /// Replay the backup buffer into the backend. Returns how many errors
    /// were stored. Stops at the first transient failure and keeps the rest.
    pub async fn flush_backup(&self) -> Result<usize> {
        let provider = self.resolver.resolve().await?;
        self.flush_with(&provider).await
    }

    async fn store(
        &self,
        provider: &Arc<dyn PersistenceProvider>,
        error: &ErrorRecord,
    ) -> Result<LogOutcome<ErrorRecord>> {
        let persisted = PersistedError::from_record(error)?;
        let _guard = self.locks.lock(persisted.error_hash).await;

        let outcome = self.call(provider.log_error(persisted, &self.window)).await?;
        Ok(match outcome {
            LogOutcome::Created(stored) => {
                debug!(guid = %stored.guid, provider = provider.name(), "new error recorded");
                LogOutcome::Created(ErrorRecord::try_from(stored)?)
            }
            LogOutcome::Merged(stored) => {
                debug!(
                    guid = %stored.guid,
                    duplicate_of = %error.guid,
                    count = stored.duplicate_count,
                    "error rolled up"
                );
                LogOutcome::Merged(ErrorRecord::try_from(stored)?)
            }
            LogOutcome::Queued => LogOutcome::Queued,
        })
    }

    /// Bound a backend call by the configured timeout
    async fn call<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.settings.backend_timeout;
        tokio::time::timeout(timeout, operation)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(timeout)))
    }

    async fn flush_if_pending(&self, provider: &Arc<dyn PersistenceProvider>) {
        if self.backup.is_empty() {
            return;
        }
        if let Err(e) = self.flush_with(provider).await {
            warn!(error = %e, "backup flush failed");
        }
    }

    async fn flush_with(&self, provider: &Arc<dyn PersistenceProvider>) -> Result<usize> {
        if self.flushing.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let _flushing = FlushGuard(&self.flushing);

        let mut pending = self.backup.drain().into_iter();
        let mut flushed = 0usize;

        while let Some(error) = pending.next() {
            match self.store(provider, &error).await {
                Ok(_) => flushed += 1,
                Err(e) if e.is_transient() => {
                    let mut remaining = vec![error];
                    remaining.extend(pending);
                    warn!(remaining = remaining.len(), error = %e, "backend still unavailable");
                    self.backup.requeue_front(remaining);
                    return Ok(flushed);
                }
                Err(e) => {
                    warn!(guid = %error.guid, error = %e, "dropping buffered error that cannot be stored");
                }
            }
        }

        if flushed > 0 {
            info!(flushed, "backup buffer flushed");
        }
        Ok(flushed)
    }
}
