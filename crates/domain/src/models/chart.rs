//! Chart query kinds and payload shapes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The chart queries the dashboard can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Summary,
    RevenueTrend,
    RevenueByCompany,
    RevenueBySource,
    CommissionByEmployee,
    CommissionByPartner,
    PaymentMethodBreakdown,
}

impl ChartKind {
    pub const ALL: [ChartKind; 7] = [
        ChartKind::Summary,
        ChartKind::RevenueTrend,
        ChartKind::RevenueByCompany,
        ChartKind::RevenueBySource,
        ChartKind::CommissionByEmployee,
        ChartKind::CommissionByPartner,
        ChartKind::PaymentMethodBreakdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Summary => "summary",
            ChartKind::RevenueTrend => "revenue_trend",
            ChartKind::RevenueByCompany => "revenue_by_company",
            ChartKind::RevenueBySource => "revenue_by_source",
            ChartKind::CommissionByEmployee => "commission_by_employee",
            ChartKind::CommissionByPartner => "commission_by_partner",
            ChartKind::PaymentMethodBreakdown => "payment_method_breakdown",
        }
    }
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown chart kind: {}", s))
    }
}

/// Headline totals for the selected filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub total_revenue: f64,
    pub total_commission: f64,
    pub transaction_count: i64,
    pub average_amount: f64,
}

/// One bucket of a revenue time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub period: NaiveDate,
    pub revenue: f64,
    pub commission: f64,
    pub transactions: i64,
}

/// One slice of a categorical breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub id: Option<i64>,
    pub label: String,
    pub revenue: f64,
    pub commission: f64,
    pub transactions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_kind_round_trip_names() {
        for kind in ChartKind::ALL {
            assert_eq!(kind.as_str().parse::<ChartKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_chart_kind_unknown() {
        let err = "pie".parse::<ChartKind>().unwrap_err();
        assert!(err.contains("pie"));
    }
}
