//! Chart data repository.
//!
//! Translates a [`FilterState`] into predicates over the `revenue_records`
//! fact table. Every filter category binds a nullable parameter so one static
//! WHERE clause serves all combinations.

use chrono::NaiveDate;
use domain::models::{
    BreakdownRow, ChartKind, FilterState, SummaryMetrics, TrendPoint,
};
use domain::services::{ChartSource, FetchError, SharedClock};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeSet;

use crate::entities::{BreakdownRowEntity, SummaryEntity, TrendPointEntity};
use crate::metrics::QueryTimer;

/// Longest span, in days, still bucketed per day in the revenue trend.
pub const DAILY_TREND_MAX_DAYS: i64 = 92;

/// Shared WHERE clause. Parameters $1..$11 are bound by [`ChartQuery::bind`].
const FILTER_PREDICATES: &str = r#"
    transaction_date >= $1 AND transaction_date <= $2
    AND ($3::bigint[] IS NULL OR company_id = ANY($3))
    AND ($4::bigint[] IS NULL OR payment_method_id = ANY($4))
    AND ($5::bigint[] IS NULL OR employee_id = ANY($5))
    AND ($6::bigint[] IS NULL OR referral_partner_id = ANY($6))
    AND ($7::bigint[] IS NULL OR revenue_source_id = ANY($7))
    AND ($8::text[] IS NULL OR commission_type = ANY($8))
    AND ($9::text[] IS NULL OR status = ANY($9))
    AND ($10::float8 IS NULL OR amount >= $10)
    AND ($11::float8 IS NULL OR amount <= $11)
"#;

/// Trend bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendGranularity {
    Day,
    Month,
}

impl TrendGranularity {
    pub fn for_span(start: NaiveDate, end: NaiveDate) -> Self {
        if (end - start).num_days() <= DAILY_TREND_MAX_DAYS {
            TrendGranularity::Day
        } else {
            TrendGranularity::Month
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendGranularity::Day => "day",
            TrendGranularity::Month => "month",
        }
    }
}

/// Revenue trend payload.
#[derive(Debug, Clone, Serialize)]
pub struct RevenueTrend {
    pub granularity: TrendGranularity,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub points: Vec<TrendPoint>,
}

/// Bound parameter values for [`FILTER_PREDICATES`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChartQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub companies: Option<Vec<i64>>,
    pub payment_methods: Option<Vec<i64>>,
    pub employees: Option<Vec<i64>>,
    pub referral_partners: Option<Vec<i64>>,
    pub revenue_sources: Option<Vec<i64>>,
    pub commission_types: Option<Vec<String>>,
    pub statuses: Option<Vec<String>>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
}

impl ChartQuery {
    /// Builds query parameters. Empty selections mean "no restriction".
    ///
    /// Returns `None` when the date range cannot be resolved.
    pub fn from_filters(filters: &FilterState, today: NaiveDate) -> Option<Self> {
        let (start_date, end_date) = filters.date_range.resolve(today)?;
        Some(Self {
            start_date,
            end_date,
            companies: non_empty(&filters.companies.selected_companies),
            payment_methods: non_empty(&filters.payment_methods.selected_methods),
            employees: non_empty(&filters.employees.selected_employees),
            referral_partners: non_empty(&filters.referral_partners.selected_partners),
            revenue_sources: non_empty(&filters.revenue_sources.selected_sources),
            commission_types: non_empty(&filters.commission_types.selected_types),
            statuses: non_empty(&filters.statuses.selected_statuses),
            min_amount: filters.amount_range.min_amount,
            max_amount: filters.amount_range.max_amount,
        })
    }

    fn bind<'q, O>(
        &'q self,
        query: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
        query
            .bind(self.start_date)
            .bind(self.end_date)
            .bind(&self.companies)
            .bind(&self.payment_methods)
            .bind(&self.employees)
            .bind(&self.referral_partners)
            .bind(&self.revenue_sources)
            .bind(&self.commission_types)
            .bind(&self.statuses)
            .bind(self.min_amount)
            .bind(self.max_amount)
    }
}

fn non_empty<T: Clone + Ord>(set: &BTreeSet<T>) -> Option<Vec<T>> {
    if set.is_empty() {
        None
    } else {
        Some(set.iter().cloned().collect())
    }
}

/// Id and label columns grouped by each breakdown chart.
fn breakdown_columns(kind: ChartKind) -> Option<(&'static str, &'static str)> {
    match kind {
        ChartKind::RevenueByCompany => Some(("company_id", "company_name")),
        ChartKind::RevenueBySource => Some(("revenue_source_id", "revenue_source_name")),
        ChartKind::CommissionByEmployee => Some(("employee_id", "employee_name")),
        ChartKind::CommissionByPartner => Some(("referral_partner_id", "referral_partner_name")),
        ChartKind::PaymentMethodBreakdown => Some(("payment_method_id", "payment_method_name")),
        ChartKind::Summary | ChartKind::RevenueTrend => None,
    }
}

/// Repository for chart aggregates.
#[derive(Clone)]
pub struct ChartRepository {
    pool: PgPool,
    clock: SharedClock,
}

impl ChartRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    /// Headline totals.
    pub async fn summary(&self, query: &ChartQuery) -> Result<SummaryMetrics, sqlx::Error> {
        let timer = QueryTimer::new("chart_summary");
        let sql = format!(
            r#"
            SELECT
                COALESCE(SUM(amount), 0)::float8 AS total_revenue,
                COALESCE(SUM(commission_amount), 0)::float8 AS total_commission,
                COUNT(*) AS transaction_count,
                COALESCE(AVG(amount), 0)::float8 AS average_amount
            FROM revenue_records
            WHERE {FILTER_PREDICATES}
            "#
        );
        let result = query
            .bind(sqlx::query_as::<_, SummaryEntity>(&sql))
            .fetch_one(&self.pool)
            .await;
        timer.record();
        let entity = result?;

        Ok(SummaryMetrics {
            total_revenue: entity.total_revenue,
            total_commission: entity.total_commission,
            transaction_count: entity.transaction_count,
            average_amount: entity.average_amount,
        })
    }

    /// Revenue bucketed by day or month.
    pub async fn revenue_trend(&self, query: &ChartQuery) -> Result<RevenueTrend, sqlx::Error> {
        let granularity = TrendGranularity::for_span(query.start_date, query.end_date);
        let timer = QueryTimer::new("chart_revenue_trend");
        let sql = format!(
            r#"
            SELECT
                date_trunc('{granularity}', transaction_date)::date AS period,
                COALESCE(SUM(amount), 0)::float8 AS revenue,
                COALESCE(SUM(commission_amount), 0)::float8 AS commission,
                COUNT(*) AS transactions
            FROM revenue_records
            WHERE {FILTER_PREDICATES}
            GROUP BY period
            ORDER BY period
            "#,
            granularity = granularity.as_str()
        );
        let result = query
            .bind(sqlx::query_as::<_, TrendPointEntity>(&sql))
            .fetch_all(&self.pool)
            .await;
        timer.record();

        let points = result?
            .into_iter()
            .map(|p| TrendPoint {
                period: p.period,
                revenue: p.revenue,
                commission: p.commission,
                transactions: p.transactions,
            })
            .collect();

        Ok(RevenueTrend {
            granularity,
            start_date: query.start_date,
            end_date: query.end_date,
            points,
        })
    }

    /// Totals grouped by one dimension, largest first.
    pub async fn breakdown(
        &self,
        kind: ChartKind,
        query: &ChartQuery,
    ) -> Result<Vec<BreakdownRow>, sqlx::Error> {
        let Some((id_column, label_column)) = breakdown_columns(kind) else {
            return Ok(Vec::new());
        };
        let order_column = match kind {
            ChartKind::CommissionByEmployee | ChartKind::CommissionByPartner => "commission",
            _ => "revenue",
        };

        let timer = QueryTimer::new(format!("chart_{}", kind.as_str()));
        let sql = format!(
            r#"
            SELECT
                {id_column} AS id,
                MAX({label_column}) AS label,
                COALESCE(SUM(amount), 0)::float8 AS revenue,
                COALESCE(SUM(commission_amount), 0)::float8 AS commission,
                COUNT(*) AS transactions
            FROM revenue_records
            WHERE {FILTER_PREDICATES}
            GROUP BY {id_column}
            ORDER BY {order_column} DESC, id
            "#
        );
        let result = query
            .bind(sqlx::query_as::<_, BreakdownRowEntity>(&sql))
            .fetch_all(&self.pool)
            .await;
        timer.record();

        Ok(result?
            .into_iter()
            .map(|row| BreakdownRow {
                label: row.label.unwrap_or_else(|| "Unassigned".to_string()),
                id: row.id,
                revenue: row.revenue,
                commission: row.commission,
                transactions: row.transactions,
            })
            .collect())
    }

    async fn load(&self, kind: ChartKind, query: &ChartQuery) -> Result<Value, FetchError> {
        let payload = match kind {
            ChartKind::Summary => self.summary(query).await.map(to_value),
            ChartKind::RevenueTrend => self.revenue_trend(query).await.map(to_value),
            _ => self.breakdown(kind, query).await.map(to_value),
        };

        payload
            .map_err(|e| {
                tracing::error!(chart = %kind, error = %e, "Chart query failed");
                FetchError::Source(format!("chart query failed: {}", e))
            })?
            .map_err(|e| FetchError::Source(format!("chart payload encoding failed: {}", e)))
    }
}

fn to_value<T: Serialize>(payload: T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(payload)
}

#[async_trait::async_trait]
impl ChartSource for ChartRepository {
    async fn fetch(&self, kind: ChartKind, filters: &FilterState) -> Result<Value, FetchError> {
        let today = self.clock.now().date_naive();
        let query = ChartQuery::from_filters(filters, today).ok_or_else(|| {
            FetchError::Source("date range could not be resolved".to_string())
        })?;

        tracing::debug!(
            chart = %kind,
            start_date = %query.start_date,
            end_date = %query.end_date,
            "Loading chart data"
        );

        self.load(kind, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{AmountRange, DateRange};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_query_from_default_filters() {
        let query = ChartQuery::from_filters(&FilterState::default(), date(2025, 3, 31)).unwrap();
        assert_eq!(query.start_date, date(2025, 3, 2));
        assert_eq!(query.end_date, date(2025, 3, 31));
        assert!(query.companies.is_none());
        assert!(query.statuses.is_none());
        assert!(query.min_amount.is_none());
    }

    #[test]
    fn test_query_carries_selections_sorted() {
        let mut filters = FilterState::default();
        filters.companies.selected_companies = [9, 2, 5].into_iter().collect();
        filters.statuses.selected_statuses = ["pending".to_string(), "paid".to_string()]
            .into_iter()
            .collect();
        filters.amount_range = AmountRange {
            min_amount: Some(10.0),
            max_amount: None,
        };

        let query = ChartQuery::from_filters(&filters, date(2025, 1, 1)).unwrap();
        assert_eq!(query.companies, Some(vec![2, 5, 9]));
        assert_eq!(
            query.statuses,
            Some(vec!["paid".to_string(), "pending".to_string()])
        );
        assert_eq!(query.min_amount, Some(10.0));
        assert_eq!(query.max_amount, None);
    }

    #[test]
    fn test_incomplete_custom_range_has_no_query() {
        let filters = FilterState {
            date_range: DateRange::Custom {
                start_date: Some(date(2024, 1, 1)),
                end_date: None,
            },
            ..Default::default()
        };
        assert!(ChartQuery::from_filters(&filters, date(2025, 1, 1)).is_none());
    }

    #[test]
    fn test_trend_granularity() {
        assert_eq!(
            TrendGranularity::for_span(date(2025, 1, 1), date(2025, 3, 31)),
            TrendGranularity::Day
        );
        assert_eq!(
            TrendGranularity::for_span(date(2024, 1, 1), date(2024, 12, 31)),
            TrendGranularity::Month
        );
    }

    #[test]
    fn test_every_breakdown_kind_has_columns() {
        for kind in ChartKind::ALL {
            let expected = !matches!(kind, ChartKind::Summary | ChartKind::RevenueTrend);
            assert_eq!(breakdown_columns(kind).is_some(), expected, "{}", kind);
        }
    }
}
