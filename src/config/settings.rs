use crate::core::{Result, StoreError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Error store configuration
///
/// Loaded once at startup and treated as read-only afterwards. JSON keys
/// follow the settings block layout:
///
/// ```json
/// { "type": "file", "path": "/var/log/errors", "rollupSeconds": 300 }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// Backend family, looked up in the provider registry
    pub store_type: String,

    /// Directory for file based stores
    pub path: Option<PathBuf>,

    /// Connection string for database backed stores. When loaded through
    /// [`StoreSettings::from_json_with_connections`] this already holds the
    /// value a `connectionStringName` pointed to.
    pub connection_string: Option<String>,

    pub connection_string_name: Option<String>,

    /// How many errors a backend keeps (or displays, depending on type)
    pub size: usize,

    pub include_last_duplicate_date: bool,

    /// Measure the rollup window from the last duplicate instead of the first
    /// occurrence. Has no effect unless `include_last_duplicate_date` is set.
    pub rollup_using_last_duplicate_date: bool,

    pub rollup_seconds: u64,

    /// Bound of the in-memory buffer used while the backend is unreachable
    pub backup_queue_size: usize,

    /// Upper bound for any single backend call
    pub backend_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawStoreSettings {
    #[serde(rename = "type")]
    store_type: Option<String>,
    path: Option<String>,
    connection_string: Option<String>,
    connection_string_name: Option<String>,
    size: Option<i64>,
    include_last_duplicate_date: Option<bool>,
    rollup_using_last_duplicate_date: Option<bool>,
    rollup_seconds: Option<i64>,
    backup_queue_size: Option<i64>,
    backend_timeout_ms: Option<i64>,
}

impl StoreSettings {
    pub const DEFAULT_SIZE: usize = 200;
    pub const DEFAULT_ROLLUP_SECONDS: u64 = 600;
    pub const DEFAULT_BACKUP_QUEUE_SIZE: usize = 1000;
    pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create settings for the given backend type with defaults everywhere else
    pub fn new(store_type: &str) -> Self {
        Self {
            store_type: store_type.to_string(),
            path: None,
            connection_string: None,
            connection_string_name: None,
            size: Self::DEFAULT_SIZE,
            include_last_duplicate_date: false,
            rollup_using_last_duplicate_date: false,
            rollup_seconds: Self::DEFAULT_ROLLUP_SECONDS,
            backup_queue_size: Self::DEFAULT_BACKUP_QUEUE_SIZE,
            backend_timeout: Self::DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn connection_string(mut self, connection_string: &str) -> Self {
        self.connection_string = Some(connection_string.to_string());
        self
    }

    pub fn connection_string_name(mut self, name: &str) -> Self {
        self.connection_string_name = Some(name.to_string());
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn include_last_duplicate_date(mut self, include: bool) -> Self {
        self.include_last_duplicate_date = include;
        self
    }

    pub fn rollup_using_last_duplicate_date(mut self, enabled: bool) -> Self {
        self.rollup_using_last_duplicate_date = enabled;
        self
    }

    pub fn rollup_seconds(mut self, seconds: u64) -> Self {
        self.rollup_seconds = seconds;
        self
    }

    pub fn backup_queue_size(mut self, size: usize) -> Self {
        self.backup_queue_size = size;
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Whether rollup is measured from `last_duplicate_date`
    pub fn rolls_up_from_last_duplicate(&self) -> bool {
        self.include_last_duplicate_date && self.rollup_using_last_duplicate_date
    }

    /// Parse a settings block that has no named connection strings
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_json_with_connections(json, &HashMap::new())
    }

    /// Parse and validate a settings block.
    ///
    /// `connections` is the application's table of named connection strings;
    /// a `connectionStringName` that is missing from it fails here rather
    /// than at the first query.
    pub fn from_json_with_connections(
        json: &str,
        connections: &HashMap<String, String>,
    ) -> Result<Self> {
        let raw: RawStoreSettings = serde_json::from_str(json)
            .map_err(|e| StoreError::Configuration(format!("Invalid settings: {}", e)))?;

        let store_type = raw
            .store_type
            .ok_or_else(|| StoreError::Configuration("'type' is required".to_string()))?;

        let mut settings = Self::new(&store_type);
        settings.path = raw.path.map(PathBuf::from);
        settings.connection_string = raw.connection_string;
        settings.connection_string_name = raw.connection_string_name;
        if let Some(size) = raw.size {
            settings.size = non_negative("size", size)?;
        }
        if let Some(include) = raw.include_last_duplicate_date {
            settings.include_last_duplicate_date = include;
        }
        if let Some(enabled) = raw.rollup_using_last_duplicate_date {
            settings.rollup_using_last_duplicate_date = enabled;
        }
        if let Some(seconds) = raw.rollup_seconds {
            settings.rollup_seconds = non_negative("rollupSeconds", seconds)?;
        }
        if let Some(size) = raw.backup_queue_size {
            settings.backup_queue_size = non_negative("backupQueueSize", size)?;
        }
        if let Some(ms) = raw.backend_timeout_ms {
            settings.backend_timeout = Duration::from_millis(non_negative("backendTimeoutMs", ms)?);
        }

        settings.resolve_connection_string(connections)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply connection string precedence: an explicit string wins, otherwise
    /// the named entry is looked up.
    pub fn resolve_connection_string(
        &mut self,
        connections: &HashMap<String, String>,
    ) -> Result<()> {
        if self.connection_string.is_some() {
            return Ok(());
        }

        if let Some(name) = &self.connection_string_name {
            let value = connections.get(name).ok_or_else(|| {
                StoreError::Configuration(format!("Connection string '{}' not found", name))
            })?;
            self.connection_string = Some(value.clone());
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store_type.trim().is_empty() {
            return Err(StoreError::Configuration("'type' cannot be empty".to_string()));
        }

        if self.backend_timeout.is_zero() {
            return Err(StoreError::Configuration(
                "backendTimeoutMs must be > 0".to_string(),
            ));
        }

        if self.connection_string.is_none() && self.connection_string_name.is_some() {
            return Err(StoreError::Configuration(
                "connectionStringName was never resolved".to_string(),
            ));
        }

        Ok(())
    }
}

fn non_negative<T: TryFrom<i64>>(key: &str, value: i64) -> Result<T> {
    T::try_from(value)
        .map_err(|_| StoreError::Configuration(format!("'{}' must be >= 0, got {}", key, value)))
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::new("memory")
    }
}
