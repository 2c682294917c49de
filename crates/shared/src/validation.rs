//! Common validation utilities.

use chrono::{Months, NaiveDate};
use validator::ValidationError;

/// How far back a custom date range may start, in years.
pub const MAX_DATE_RANGE_AGE_YEARS: u32 = 10;

/// Maximum length of a saved filter preset label.
pub const MAX_PRESET_LABEL_LENGTH: usize = 64;

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates that both endpoints of a custom date range are present.
pub fn validate_date_range_complete(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), ValidationError> {
    if start.is_some() && end.is_some() {
        Ok(())
    } else {
        Err(error(
            "date_range_incomplete",
            "Custom date range requires both a start date and an end date",
        ))
    }
}

/// Validates that the start date is on or before the end date.
pub fn validate_date_order(start: NaiveDate, end: NaiveDate) -> Result<(), ValidationError> {
    if start <= end {
        Ok(())
    } else {
        Err(error(
            "date_range_order",
            "Start date must be on or before the end date",
        ))
    }
}

/// Validates that a date is not after `today`.
pub fn validate_date_not_future(date: NaiveDate, today: NaiveDate) -> Result<(), ValidationError> {
    if date <= today {
        Ok(())
    } else {
        Err(error("date_range_future", "End date cannot be in the future"))
    }
}

/// Validates that a date is no more than ten years before `today`.
pub fn validate_date_not_too_old(date: NaiveDate, today: NaiveDate) -> Result<(), ValidationError> {
    let limit = today
        .checked_sub_months(Months::new(MAX_DATE_RANGE_AGE_YEARS * 12))
        .unwrap_or(NaiveDate::MIN);
    if date >= limit {
        Ok(())
    } else {
        Err(error(
            "date_range_too_old",
            "Start date cannot be more than 10 years in the past",
        ))
    }
}

/// Validates that an amount bound is a finite, non-negative number.
pub fn validate_amount_bound(amount: f64) -> Result<(), ValidationError> {
    if !amount.is_finite() {
        return Err(error("amount_not_finite", "Amount must be a finite number"));
    }
    if amount < 0.0 {
        return Err(error("amount_negative", "Amount cannot be negative"));
    }
    Ok(())
}

/// Validates that the minimum amount does not exceed the maximum amount.
pub fn validate_amount_order(min: f64, max: f64) -> Result<(), ValidationError> {
    if min <= max {
        Ok(())
    } else {
        Err(error(
            "amount_range_order",
            "Minimum amount cannot exceed the maximum amount",
        ))
    }
}

/// Validates a preset label: non-blank, bounded length, no control characters.
pub fn validate_preset_label(label: &str) -> Result<(), ValidationError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(error("preset_label_empty", "Preset label cannot be empty"));
    }
    if trimmed.chars().count() > MAX_PRESET_LABEL_LENGTH {
        return Err(error(
            "preset_label_length",
            "Preset label must be at most 64 characters",
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(error(
            "preset_label_chars",
            "Preset label cannot contain control characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range_complete() {
        let d = date(2024, 1, 1);
        assert!(validate_date_range_complete(Some(d), Some(d)).is_ok());
        assert!(validate_date_range_complete(None, Some(d)).is_err());
        assert!(validate_date_range_complete(Some(d), None).is_err());
        assert!(validate_date_range_complete(None, None).is_err());
    }

    #[test]
    fn test_date_order() {
        assert!(validate_date_order(date(2024, 1, 1), date(2024, 1, 1)).is_ok());
        assert!(validate_date_order(date(2024, 1, 1), date(2024, 2, 1)).is_ok());
        let err = validate_date_order(date(2024, 3, 1), date(2024, 2, 1)).unwrap_err();
        assert_eq!(err.code, "date_range_order");
        assert!(err.message.unwrap().contains("before"));
    }

    #[test]
    fn test_date_not_future() {
        let today = date(2025, 6, 15);
        assert!(validate_date_not_future(today, today).is_ok());
        assert!(validate_date_not_future(date(2025, 6, 16), today).is_err());
    }

    #[test]
    fn test_date_not_too_old() {
        let today = date(2025, 6, 15);
        assert!(validate_date_not_too_old(date(2015, 6, 15), today).is_ok());
        assert!(validate_date_not_too_old(date(2015, 6, 14), today).is_err());
    }

    #[test]
    fn test_amount_bound() {
        assert!(validate_amount_bound(0.0).is_ok());
        assert!(validate_amount_bound(1500.25).is_ok());
        assert_eq!(validate_amount_bound(-0.01).unwrap_err().code, "amount_negative");
        assert_eq!(
            validate_amount_bound(f64::NAN).unwrap_err().code,
            "amount_not_finite"
        );
        assert!(validate_amount_bound(f64::INFINITY).is_err());
    }

    #[test]
    fn test_amount_order() {
        assert!(validate_amount_order(10.0, 10.0).is_ok());
        assert!(validate_amount_order(10.0, 20.0).is_ok());
        assert!(validate_amount_order(20.0, 10.0).is_err());
    }

    #[test]
    fn test_preset_label() {
        assert!(validate_preset_label("Q3 enterprise").is_ok());
        assert!(validate_preset_label("   ").is_err());
        assert!(validate_preset_label(&"x".repeat(65)).is_err());
        assert!(validate_preset_label("tab\there").is_err());
    }
}
