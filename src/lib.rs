// ============================================================================
// errorstore Library
// ============================================================================

//! Error-reporting store with time-window rollup.
//!
//! Occurrences of the same error (same application, machine, exception type
//! and detail) inside the rollup window are folded into one record with a
//! duplicate count instead of piling up. Records live in a pluggable
//! [`PersistenceProvider`]; the built-in ones are `memory` and `file`, and
//! more can be registered by name on the [`ProviderRegistry`].
//!
//! ```ignore
//! let settings = StoreSettings::from_json(r#"{ "type": "memory", "rollupSeconds": 300 }"#)?;
//! let store = RollupEngine::from_settings(settings)?;
//!
//! let mut error = ErrorRecord::new("billing", "TimeoutException", "gateway timed out");
//! match store.log_error(&mut error).await? {
//!     LogOutcome::Created(record) => println!("new error {}", record.guid),
//!     LogOutcome::Merged(record) => println!("seen {} times", record.duplicate_count),
//!     LogOutcome::Queued => println!("backend down, buffered"),
//! }
//! ```

pub mod config;
pub mod core;
pub mod rollup;
pub mod storage;

pub use config::StoreSettings;
pub use crate::core::{ErrorRecord, PersistedError, Result, StoreError};
pub use rollup::{ErrorPage, RollupEngine, RollupReference, RollupWindow};
pub use storage::{
    ErrorListing, FileProvider, LogOutcome, MemoryProvider, PersistenceProvider, ProviderFactory,
    ProviderRegistry, ProviderResolver, ResolverPhase,
};
