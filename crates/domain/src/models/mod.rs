//! Domain models for the revenue dashboard.

pub mod chart;
pub mod export;
pub mod filter;

pub use chart::{BreakdownRow, ChartKind, SummaryMetrics, TrendPoint};
pub use export::{
    BulkExportRequest, BulkExportResponse, DownloadToken, ExportFormat, ExportRecord,
    ExportResponse, ExportStatus, IssuedDownload, ListExportsQuery, NewExport,
};
pub use filter::{
    ActiveFilter, AmountRange, CommissionTypeFilter, CompanyFilter, DateRange, EmployeeFilter,
    FilterFieldError, FilterKey, FilterPatch, FilterPreset, FilterState, PaymentMethodFilter,
    ReferralPartnerFilter, RevenueSourceFilter, StatusFilter,
};
