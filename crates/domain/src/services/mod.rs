//! Domain services for the revenue dashboard.
//!
//! Services hold in-process state and business rules; storage is reached
//! through the traits defined here so every service can run against
//! in-memory implementations in tests.

pub mod cache_key;
pub mod clock;
pub mod data_cache;
pub mod export_store;
pub mod fetch_coordinator;
pub mod filter_store;
pub mod preference_store;

pub use cache_key::{canonicalize, CacheKey};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use data_cache::{CacheConfig, CacheHit, CacheStats, DataCache};
pub use export_store::{ExportCursor, ExportStore, InMemoryExportStore};
pub use fetch_coordinator::{
    AutoRefreshHandle, ChartSource, CommittedResult, FetchConfig, FetchCoordinator, FetchError,
    FetchMode, FetchOutcome,
};
pub use filter_store::{FilterStore, DEFAULT_HISTORY_LIMIT};
pub use preference_store::{InMemoryPreferenceStore, PreferenceStore};
