//! Aggregated rows read from the revenue fact table.

use chrono::NaiveDate;
use sqlx::FromRow;

/// One group of a categorical breakdown.
#[derive(Debug, Clone, FromRow)]
pub struct BreakdownRowEntity {
    pub id: Option<i64>,
    pub label: Option<String>,
    pub revenue: f64,
    pub commission: f64,
    pub transactions: i64,
}

/// One bucket of the revenue time series.
#[derive(Debug, Clone, FromRow)]
pub struct TrendPointEntity {
    pub period: NaiveDate,
    pub revenue: f64,
    pub commission: f64,
    pub transactions: i64,
}

/// Headline totals.
#[derive(Debug, Clone, FromRow)]
pub struct SummaryEntity {
    pub total_revenue: f64,
    pub total_commission: f64,
    pub transaction_count: i64,
    pub average_amount: f64,
}
