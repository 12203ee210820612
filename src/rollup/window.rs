use crate::config::StoreSettings;
use crate::core::PersistedError;
use chrono::{DateTime, Duration, Utc};

/// Which timestamp of an existing record the rollup window is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollupReference {
    /// First occurrence
    #[default]
    CreationDate,
    /// Most recent recurrence, so the window slides while the error keeps firing
    LastDuplicateDate,
}

/// Time window within which a recurring error is merged into an existing record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupWindow {
    pub seconds: u64,
    pub reference: RollupReference,
}

impl RollupWindow {
    pub fn new(seconds: u64, reference: RollupReference) -> Self {
        Self { seconds, reference }
    }

    pub fn from_settings(settings: &StoreSettings) -> Self {
        let reference = if settings.rolls_up_from_last_duplicate() {
            RollupReference::LastDuplicateDate
        } else {
            RollupReference::CreationDate
        };
        Self::new(settings.rollup_seconds, reference)
    }

    pub fn reference_date(&self, candidate: &PersistedError) -> DateTime<Utc> {
        match self.reference {
            RollupReference::CreationDate => candidate.creation_date,
            RollupReference::LastDuplicateDate => candidate.last_seen(),
        }
    }

    /// `occurred_at - reference <= seconds`, deleted records never match
    pub fn matches(&self, candidate: &PersistedError, occurred_at: DateTime<Utc>) -> bool {
        if candidate.is_deleted() {
            return false;
        }
        let limit = i64::try_from(self.seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        occurred_at - self.reference_date(candidate) <= limit
    }
}

impl Default for RollupWindow {
    fn default() -> Self {
        Self::new(StoreSettings::DEFAULT_ROLLUP_SECONDS, RollupReference::CreationDate)
    }
}
