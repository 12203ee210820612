use super::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace for match signatures (UUIDv5).
const SIGNATURE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d0e_8a47_5b3c_9e21_4d7a_b0c8_13f5);

/// One captured exception occurrence plus its rollup metadata.
///
/// The whole record serializes to the full JSON payload that backends store
/// verbatim. Durable rollup fields (`duplicate_count`, `last_duplicate_date`,
/// `deletion_date`, `is_protected`) are owned by the backend and overlaid on
/// top of the payload when a [`PersistedError`] is converted back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub guid: Uuid,
    pub application_name: String,
    #[serde(default)]
    pub machine_name: String,
    pub type_name: String,
    pub message: String,
    /// Stack trace or other detail text
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub custom_data: BTreeMap<String, String>,
    pub creation_date: DateTime<Utc>,
    pub duplicate_count: u32,
    #[serde(default)]
    pub last_duplicate_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_protected: bool,

    /// Set on the caller's instance when `log_error` merged it into an
    /// existing record. Never persisted.
    #[serde(skip)]
    pub is_duplicate: bool,
}

impl ErrorRecord {
    /// Create a new occurrence happening now
    pub fn new(
        application_name: impl Into<String>,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            application_name: application_name.into(),
            machine_name: String::new(),
            type_name: type_name.into(),
            message: message.into(),
            detail: String::new(),
            source: None,
            url: None,
            custom_data: BTreeMap::new(),
            creation_date: Utc::now(),
            duplicate_count: 1,
            last_duplicate_date: None,
            deletion_date: None,
            is_protected: false,
            is_duplicate: false,
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn machine(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = machine_name.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn custom_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_data.insert(key.into(), value.into());
        self
    }

    /// Override the occurrence time
    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.creation_date = when;
        self
    }

    /// Equivalence key used for rollup.
    ///
    /// Two occurrences are "the same error" when they come from the same
    /// application and machine, with the same exception type and the same
    /// detail text. The message is not part of the key.
    pub fn signature(&self) -> Uuid {
        let mut key = Vec::with_capacity(
            self.application_name.len()
                + self.type_name.len()
                + self.detail.len()
                + self.machine_name.len()
                + 3,
        );
        for part in [
            &self.application_name,
            &self.type_name,
            &self.detail,
            &self.machine_name,
        ] {
            key.extend_from_slice(part.as_bytes());
            key.push(0);
        }
        Uuid::new_v5(&SIGNATURE_NAMESPACE, &key)
    }

    /// Last time this error was seen
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_duplicate_date.unwrap_or(self.creation_date)
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion_date.is_some()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Backend-owned durable representation of an [`ErrorRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedError {
    pub guid: Uuid,
    pub application_name: String,
    /// Match signature of the first occurrence
    pub error_hash: Uuid,
    pub creation_date: DateTime<Utc>,
    pub duplicate_count: u32,
    pub last_duplicate_date: Option<DateTime<Utc>>,
    pub deletion_date: Option<DateTime<Utc>>,
    pub is_protected: bool,
    /// Opaque serialized payload, passed through unchanged
    pub full_json: String,
}

impl PersistedError {
    pub fn from_record(record: &ErrorRecord) -> Result<Self> {
        Ok(Self {
            guid: record.guid,
            application_name: record.application_name.clone(),
            error_hash: record.signature(),
            creation_date: record.creation_date,
            duplicate_count: record.duplicate_count.max(1),
            last_duplicate_date: record.last_duplicate_date,
            deletion_date: record.deletion_date,
            is_protected: record.is_protected,
            full_json: record.to_json()?,
        })
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_duplicate_date.unwrap_or(self.creation_date)
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion_date.is_some()
    }

    /// Fold one more occurrence into this record.
    pub fn record_duplicate(&mut self, occurred_at: DateTime<Utc>) {
        self.duplicate_count = self.duplicate_count.saturating_add(1);
        let last = self.last_duplicate_date.unwrap_or(self.creation_date);
        self.last_duplicate_date = Some(last.max(occurred_at));
    }
}

impl TryFrom<PersistedError> for ErrorRecord {
    type Error = StoreError;

    fn try_from(source: PersistedError) -> Result<Self> {
        let mut record =
            ErrorRecord::from_json(&source.full_json).map_err(|e| StoreError::Conversion {
                guid: source.guid,
                reason: e.to_string(),
            })?;

        record.guid = source.guid;
        record.creation_date = source.creation_date;
        record.duplicate_count = source.duplicate_count.max(1);
        record.last_duplicate_date = source.last_duplicate_date;
        record.deletion_date = source.deletion_date;
        record.is_protected = source.is_protected;
        record.is_duplicate = false;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample() -> ErrorRecord {
        ErrorRecord::new("billing", "System.InvalidOperationException", "boom")
            .detail("at Billing.Charge()")
            .machine("web-01")
            .custom_data("order", "42")
            .at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_signature_ignores_message() {
        let a = sample();
        let mut b = sample();
        b.message = "boom again, order 43".to_string();
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.guid, b.guid);
    }

    #[test]
    fn test_signature_separates_applications() {
        let a = sample();
        let mut b = sample();
        b.application_name = "shipping".to_string();
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_signature_field_boundaries() {
        let a = ErrorRecord::new("ab", "c", "m");
        let b = ErrorRecord::new("a", "bc", "m");
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_round_trip_preserves_rollup_fields() {
        let mut record = sample();
        let deleted_at = record.creation_date + Duration::minutes(30);
        record.duplicate_count = 7;
        record.last_duplicate_date = Some(record.creation_date + Duration::minutes(5));
        record.deletion_date = Some(deleted_at);
        record.is_protected = true;

        let persisted = PersistedError::from_record(&record).unwrap();
        let restored = ErrorRecord::try_from(persisted.clone()).unwrap();
        assert_eq!(restored, record);

        let again = PersistedError::from_record(&restored).unwrap();
        assert_eq!(again.guid, persisted.guid);
        assert_eq!(again.duplicate_count, 7);
        assert_eq!(again.last_duplicate_date, persisted.last_duplicate_date);
        assert_eq!(again.deletion_date, Some(deleted_at));
        assert!(again.is_protected);
        assert_eq!(again.error_hash, record.signature());
    }

    #[test]
    fn test_durable_fields_win_over_payload() {
        let record = sample();
        let mut persisted = PersistedError::from_record(&record).unwrap();
        persisted.duplicate_count = 3;
        persisted.is_protected = true;

        let restored = ErrorRecord::try_from(persisted).unwrap();
        assert_eq!(restored.duplicate_count, 3);
        assert!(restored.is_protected);
        assert_eq!(restored.message, "boom");
        assert_eq!(restored.custom_data.get("order").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_is_duplicate_not_serialized() {
        let mut record = sample();
        record.is_duplicate = true;
        let json = record.to_json().unwrap();
        assert!(!json.contains("is_duplicate"));
        assert!(!ErrorRecord::from_json(&json).unwrap().is_duplicate);
    }

    #[test]
    fn test_malformed_payload_is_conversion_error() {
        let mut persisted = PersistedError::from_record(&sample()).unwrap();
        persisted.full_json = "{not json".to_string();
        let guid = persisted.guid;

        match ErrorRecord::try_from(persisted) {
            Err(StoreError::Conversion { guid: failed, .. }) => assert_eq!(failed, guid),
            other => panic!("expected conversion error, got {:?}", other),
        }
    }

    #[test]
    fn test_record_duplicate_only_moves_forward() {
        let mut persisted = PersistedError::from_record(&sample()).unwrap();
        let later = persisted.creation_date + Duration::seconds(100);
        persisted.record_duplicate(later);
        persisted.record_duplicate(persisted.creation_date + Duration::seconds(50));

        assert_eq!(persisted.duplicate_count, 3);
        assert_eq!(persisted.last_duplicate_date, Some(later));
    }

    #[test]
    fn test_zero_count_clamped() {
        let mut persisted = PersistedError::from_record(&sample()).unwrap();
        persisted.duplicate_count = 0;
        assert_eq!(ErrorRecord::try_from(persisted).unwrap().duplicate_count, 1);
    }
}
