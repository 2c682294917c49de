//! Background job scheduler and job implementations.

mod cache_sweep;
mod runtime_metrics;
mod scheduler;
mod session_eviction;
mod token_cleanup;

pub use cache_sweep::CacheSweepJob;
pub use runtime_metrics::{RuntimeMetricsJob, RuntimeSnapshot};
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use session_eviction::FilterSessionEvictionJob;
pub use token_cleanup::DownloadTokenCleanupJob;
