//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod download_token;
pub mod export_record;
pub mod filter_preference;
pub mod revenue;

pub use download_token::DownloadTokenEntity;
pub use export_record::ExportRecordEntity;
pub use filter_preference::FilterPreferenceEntity;
pub use revenue::{BreakdownRowEntity, SummaryEntity, TrendPointEntity};
