//! Dashboard filter domain models.
//!
//! A [`FilterState`] is the complete, serializable description of the
//! analytics query a user is looking at. Every filter category is an explicit
//! type so "is this filter active" is decided by a closed `match`, never by
//! probing optional fields.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use shared::validation::{
    validate_amount_bound, validate_amount_order, validate_date_not_future,
    validate_date_not_too_old, validate_date_order, validate_date_range_complete,
};

/// Date range selector: a named preset or an explicit custom range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateRange {
    Today,
    Yesterday,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[default]
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_90_days")]
    Last90Days,
    ThisMonth,
    LastMonth,
    ThisQuarter,
    ThisYear,
    LastYear,
    Custom {
        #[serde(default)]
        start_date: Option<NaiveDate>,
        #[serde(default)]
        end_date: Option<NaiveDate>,
    },
}

impl DateRange {
    /// Builds a complete custom range.
    pub fn custom(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange::Custom {
            start_date: Some(start),
            end_date: Some(end),
        }
    }

    /// Resolves the selector into inclusive calendar bounds relative to `today`.
    ///
    /// Returns `None` for a custom range missing an endpoint.
    pub fn resolve(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let bounds = match *self {
            DateRange::Today => (today, today),
            DateRange::Yesterday => {
                let y = today - Duration::days(1);
                (y, y)
            }
            DateRange::Last7Days => (today - Duration::days(6), today),
            DateRange::Last30Days => (today - Duration::days(29), today),
            DateRange::Last90Days => (today - Duration::days(89), today),
            DateRange::ThisMonth => (first_of_month(today.year(), today.month()), today),
            DateRange::LastMonth => {
                let this_month = first_of_month(today.year(), today.month());
                let last_day = this_month - Duration::days(1);
                (first_of_month(last_day.year(), last_day.month()), last_day)
            }
            DateRange::ThisQuarter => {
                let quarter_start_month = (today.month0() / 3) * 3 + 1;
                (first_of_month(today.year(), quarter_start_month), today)
            }
            DateRange::ThisYear => (first_of_month(today.year(), 1), today),
            DateRange::LastYear => {
                let year = today.year() - 1;
                (
                    first_of_month(year, 1),
                    NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today),
                )
            }
            DateRange::Custom {
                start_date,
                end_date,
            } => (start_date?, end_date?),
        };
        Some(bounds)
    }

    /// Human-readable label for badges.
    pub fn label(&self) -> String {
        match self {
            DateRange::Today => "Today".to_string(),
            DateRange::Yesterday => "Yesterday".to_string(),
            DateRange::Last7Days => "Last 7 days".to_string(),
            DateRange::Last30Days => "Last 30 days".to_string(),
            DateRange::Last90Days => "Last 90 days".to_string(),
            DateRange::ThisMonth => "This month".to_string(),
            DateRange::LastMonth => "Last month".to_string(),
            DateRange::ThisQuarter => "This quarter".to_string(),
            DateRange::ThisYear => "This year".to_string(),
            DateRange::LastYear => "Last year".to_string(),
            DateRange::Custom {
                start_date,
                end_date,
            } => format!(
                "{} to {}",
                start_date.map(|d| d.to_string()).unwrap_or_else(|| "?".into()),
                end_date.map(|d| d.to_string()).unwrap_or_else(|| "?".into())
            ),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// Selected companies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompanyFilter {
    #[serde(default)]
    pub selected_companies: BTreeSet<i64>,
}

/// Selected payment methods.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentMethodFilter {
    #[serde(default)]
    pub selected_methods: BTreeSet<i64>,
}

/// Selected employees.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmployeeFilter {
    #[serde(default)]
    pub selected_employees: BTreeSet<i64>,
}

/// Selected referral partners.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferralPartnerFilter {
    #[serde(default)]
    pub selected_partners: BTreeSet<i64>,
}

/// Selected revenue sources.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RevenueSourceFilter {
    #[serde(default)]
    pub selected_sources: BTreeSet<i64>,
}

/// Selected commission types.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommissionTypeFilter {
    #[serde(default)]
    pub selected_types: BTreeSet<String>,
}

/// Selected record statuses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusFilter {
    #[serde(default)]
    pub selected_statuses: BTreeSet<String>,
}

/// Amount bounds; `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AmountRange {
    #[serde(default)]
    pub min_amount: Option<f64>,
    #[serde(default)]
    pub max_amount: Option<f64>,
}

impl AmountRange {
    pub fn is_unbounded(&self) -> bool {
        self.min_amount.is_none() && self.max_amount.is_none()
    }
}

/// Filter category identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    DateRange,
    Companies,
    PaymentMethods,
    Employees,
    ReferralPartners,
    RevenueSources,
    CommissionTypes,
    AmountRange,
    Statuses,
}

impl FilterKey {
    pub const ALL: [FilterKey; 9] = [
        FilterKey::DateRange,
        FilterKey::Companies,
        FilterKey::PaymentMethods,
        FilterKey::Employees,
        FilterKey::ReferralPartners,
        FilterKey::RevenueSources,
        FilterKey::CommissionTypes,
        FilterKey::AmountRange,
        FilterKey::Statuses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKey::DateRange => "date_range",
            FilterKey::Companies => "companies",
            FilterKey::PaymentMethods => "payment_methods",
            FilterKey::Employees => "employees",
            FilterKey::ReferralPartners => "referral_partners",
            FilterKey::RevenueSources => "revenue_sources",
            FilterKey::CommissionTypes => "commission_types",
            FilterKey::AmountRange => "amount_range",
            FilterKey::Statuses => "statuses",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FilterKey::DateRange => "Date range",
            FilterKey::Companies => "Companies",
            FilterKey::PaymentMethods => "Payment methods",
            FilterKey::Employees => "Employees",
            FilterKey::ReferralPartners => "Referral partners",
            FilterKey::RevenueSources => "Revenue sources",
            FilterKey::CommissionTypes => "Commission types",
            FilterKey::AmountRange => "Amount",
            FilterKey::Statuses => "Status",
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One active filter, for UI badges. Not a query input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveFilter {
    pub key: FilterKey,
    pub label: String,
    pub value: String,
}

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterFieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FilterFieldError {
    fn from_validation(field: FilterKey, err: validator::ValidationError) -> Self {
        Self {
            field: field.as_str().to_string(),
            code: err.code.to_string(),
            message: err
                .message
                .map(|m| m.to_string())
                .unwrap_or_else(|| err.code.to_string()),
        }
    }
}

impl fmt::Display for FilterFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The full analytics query description.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub date_range: DateRange,
    pub companies: CompanyFilter,
    pub payment_methods: PaymentMethodFilter,
    pub employees: EmployeeFilter,
    pub referral_partners: ReferralPartnerFilter,
    pub revenue_sources: RevenueSourceFilter,
    pub commission_types: CommissionTypeFilter,
    pub amount_range: AmountRange,
    pub statuses: StatusFilter,
}

impl FilterState {
    /// Checks every rule a state must satisfy before it may drive a fetch.
    pub fn validate(&self, today: NaiveDate) -> Result<(), Vec<FilterFieldError>> {
        let mut errors = Vec::new();
        let mut push = |key: FilterKey, result: Result<(), validator::ValidationError>| {
            if let Err(e) = result {
                errors.push(FilterFieldError::from_validation(key, e));
            }
        };

        if let DateRange::Custom {
            start_date,
            end_date,
        } = self.date_range
        {
            match (start_date, end_date) {
                (Some(start), Some(end)) => {
                    push(FilterKey::DateRange, validate_date_order(start, end));
                    push(FilterKey::DateRange, validate_date_not_future(end, today));
                    push(FilterKey::DateRange, validate_date_not_too_old(start, today));
                }
                _ => push(
                    FilterKey::DateRange,
                    validate_date_range_complete(start_date, end_date),
                ),
            }
        }

        let AmountRange {
            min_amount,
            max_amount,
        } = self.amount_range;
        if let Some(min) = min_amount {
            push(FilterKey::AmountRange, validate_amount_bound(min));
        }
        if let Some(max) = max_amount {
            push(FilterKey::AmountRange, validate_amount_bound(max));
        }
        if let (Some(min), Some(max)) = (min_amount, max_amount) {
            push(FilterKey::AmountRange, validate_amount_order(min, max));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validates against the UTC calendar date of `now`.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), Vec<FilterFieldError>> {
        self.validate(now.date_naive())
    }

    /// Whether a category differs from its default.
    pub fn is_active(&self, key: FilterKey) -> bool {
        match key {
            FilterKey::DateRange => self.date_range != DateRange::default(),
            FilterKey::Companies => !self.companies.selected_companies.is_empty(),
            FilterKey::PaymentMethods => !self.payment_methods.selected_methods.is_empty(),
            FilterKey::Employees => !self.employees.selected_employees.is_empty(),
            FilterKey::ReferralPartners => !self.referral_partners.selected_partners.is_empty(),
            FilterKey::RevenueSources => !self.revenue_sources.selected_sources.is_empty(),
            FilterKey::CommissionTypes => !self.commission_types.selected_types.is_empty(),
            FilterKey::AmountRange => !self.amount_range.is_unbounded(),
            FilterKey::Statuses => !self.statuses.selected_statuses.is_empty(),
        }
    }

    pub fn active_filter_count(&self) -> usize {
        FilterKey::ALL.iter().filter(|k| self.is_active(**k)).count()
    }

    /// Describes active filters in a fixed category order.
    pub fn active_filters(&self) -> Vec<ActiveFilter> {
        FilterKey::ALL
            .iter()
            .filter(|k| self.is_active(**k))
            .map(|key| ActiveFilter {
                key: *key,
                label: key.label().to_string(),
                value: self.describe(*key),
            })
            .collect()
    }

    fn describe(&self, key: FilterKey) -> String {
        match key {
            FilterKey::DateRange => self.date_range.label(),
            FilterKey::Companies => selected_count(self.companies.selected_companies.len()),
            FilterKey::PaymentMethods => {
                selected_count(self.payment_methods.selected_methods.len())
            }
            FilterKey::Employees => selected_count(self.employees.selected_employees.len()),
            FilterKey::ReferralPartners => {
                selected_count(self.referral_partners.selected_partners.len())
            }
            FilterKey::RevenueSources => {
                selected_count(self.revenue_sources.selected_sources.len())
            }
            FilterKey::CommissionTypes => join_strings(&self.commission_types.selected_types),
            FilterKey::AmountRange => match (self.amount_range.min_amount, self.amount_range.max_amount)
            {
                (Some(min), Some(max)) => format!("{:.2} to {:.2}", min, max),
                (Some(min), None) => format!("at least {:.2}", min),
                (None, Some(max)) => format!("at most {:.2}", max),
                (None, None) => "any".to_string(),
            },
            FilterKey::Statuses => join_strings(&self.statuses.selected_statuses),
        }
    }
}

fn selected_count(n: usize) -> String {
    format!("{} selected", n)
}

fn join_strings(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Partial update: each present key replaces the whole category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companies: Option<CompanyFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_methods: Option<PaymentMethodFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employees: Option<EmployeeFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_partners: Option<ReferralPartnerFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue_sources: Option<RevenueSourceFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_types: Option<CommissionTypeFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_range: Option<AmountRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statuses: Option<StatusFilter>,
}

impl FilterPatch {
    pub fn is_empty(&self) -> bool {
        *self == FilterPatch::default()
    }

    /// Produces a new state with this patch merged over `base`.
    pub fn apply_to(&self, base: &FilterState) -> FilterState {
        let mut next = base.clone();
        if let Some(v) = self.date_range {
            next.date_range = v;
        }
        if let Some(v) = &self.companies {
            next.companies = v.clone();
        }
        if let Some(v) = &self.payment_methods {
            next.payment_methods = v.clone();
        }
        if let Some(v) = &self.employees {
            next.employees = v.clone();
        }
        if let Some(v) = &self.referral_partners {
            next.referral_partners = v.clone();
        }
        if let Some(v) = &self.revenue_sources {
            next.revenue_sources = v.clone();
        }
        if let Some(v) = &self.commission_types {
            next.commission_types = v.clone();
        }
        if let Some(v) = self.amount_range {
            next.amount_range = v;
        }
        if let Some(v) = &self.statuses {
            next.statuses = v.clone();
        }
        next
    }
}

/// A named snapshot of a filter state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPreset {
    pub label: String,
    pub filters: FilterState,
    pub created_at: DateTime<Utc>,
}
