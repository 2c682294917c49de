//! Repository implementations for database operations.

pub mod chart;
pub mod download_token;
pub mod export_record;
pub mod filter_preference;

pub use chart::{ChartQuery, ChartRepository, RevenueTrend, TrendGranularity};
pub use download_token::DownloadTokenRepository;
pub use export_record::ExportRecordRepository;
pub use filter_preference::FilterPreferenceRepository;
