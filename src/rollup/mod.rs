pub mod backup;
pub mod engine;
pub mod locks;
pub mod window;

pub use backup::BackupQueue;
pub use engine::{ErrorPage, RollupEngine};
pub use locks::KeyedLocks;
pub use window::{RollupReference, RollupWindow};
