pub mod file;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod resolver;

pub use file::FileProvider;
pub use memory::MemoryProvider;
pub use provider::{ErrorListing, LogOutcome, PersistenceProvider};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use resolver::{ProviderResolver, ResolverPhase};
