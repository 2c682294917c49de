//! Application services built on the domain layer.

pub mod chart_export;
pub mod export_ledger;
pub mod filter_sessions;

pub use chart_export::ChartExportWriter;
pub use export_ledger::{
    resolve_export_path, ExportLedger, ExportPage, LedgerConfig, LedgerError, ResolvedDownload,
};
pub use filter_sessions::{FilterSessions, SharedFilterStore};
