pub mod backend;
pub mod cli;
pub mod config;
pub mod errors;
pub mod logger;
pub mod provider;
pub mod query;
pub mod registry;
pub mod session;

pub use backend::memory::{ListOp, MemoryDatabase, MemoryLists};
pub use backend::{ChangeEvent, Database, FeedState, ListBackend, ListHandle, SubscriptionEvent};
pub use config::ProviderConfig;
pub use errors::{BackendError, ParseError, ParseErrorKind, ProviderError, SessionError};
pub use provider::{Provider, ProviderStatus};
pub use query::{QueryDescriptor, QueryPlan};
pub use registry::SubscriptionRegistry;
pub use session::{SearchSession, SessionEvent, SessionState};

/// Initializes logging from the `SEARCH_PROVIDER_LOG_*` environment variables.
///
/// # Errors
/// Returns [`ProviderError::Logging`] if a logger is already installed.
pub fn init() -> Result<(), ProviderError> {
    logger::configure_from_env()
}
