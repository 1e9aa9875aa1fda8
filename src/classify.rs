//! Tiered classification of candidate records
//!
//! The classifier is a pure function of a record's limit, categorical
//! attribute and concatenated address. It never fails: anything it cannot
//! evaluate resolves to `None`.
//!
//! | limit range        | condition                                   | code |
//! |--------------------|---------------------------------------------|------|
//! | limit < low        |                                             | AA   |
//! | low <= limit < mid |                                             | BB   |
//! | mid <= limit < high| exception clause holds                      | C2   |
//! | mid <= limit < high| otherwise                                   | CC   |
//! | limit >= high      |                                             | DD   |
//! | limit absent       |                                             | none |
//!
//! The same rule is rendered as a SQL `CASE` expression by
//! [`crate::database::schema::SqlBuilder::classification_case`] for the
//! server-resident write mode; the two must agree row for row.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{CandidateRecord, CategoryCode};

/// Exception clause inside the middle tier.
///
/// Holds when the categorical attribute equals `categorical` and the
/// concatenated address contains every entry of `required_substrings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionClause {
    /// Categorical value that must match exactly
    pub categorical: String,
    /// Substrings that must all occur in the concatenated address
    #[serde(default)]
    pub required_substrings: Vec<String>,
}

impl ExceptionClause {
    /// Create an exception clause.
    pub fn new(categorical: impl Into<String>, required_substrings: &[&str]) -> Self {
        Self {
            categorical: categorical.into(),
            required_substrings: required_substrings.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Substrings that take part in matching.
    ///
    /// Empty entries match every address and are skipped.
    pub fn effective_substrings(&self) -> impl Iterator<Item = &str> {
        self.required_substrings
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Evaluate the clause.
    pub fn matches(&self, categorical: Option<&str>, address: &str) -> bool {
        categorical == Some(self.categorical.as_str())
            && self.effective_substrings().all(|needle| address.contains(needle))
    }
}

impl Default for ExceptionClause {
    fn default() -> Self {
        Self::new("F", &["송파구", "풍납1동"])
    }
}

/// Thresholds and exception clause of the tiered rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Upper bound (exclusive) of the AA tier
    #[serde(default = "default_low")]
    pub low: Decimal,
    /// Upper bound (exclusive) of the BB tier
    #[serde(default = "default_mid")]
    pub mid: Decimal,
    /// Upper bound (exclusive) of the CC/C2 tier
    #[serde(default = "default_high")]
    pub high: Decimal,
    /// Exception clause selecting C2 over CC; `None` disables C2
    #[serde(default = "default_exception")]
    pub exception: Option<ExceptionClause>,
}

fn default_low() -> Decimal {
    Decimal::from(1000)
}

fn default_mid() -> Decimal {
    Decimal::from(3000)
}

fn default_high() -> Decimal {
    Decimal::from(4000)
}

fn default_exception() -> Option<ExceptionClause> {
    Some(ExceptionClause::default())
}

impl Default for ClassificationRule {
    fn default() -> Self {
        Self {
            low: default_low(),
            mid: default_mid(),
            high: default_high(),
            exception: default_exception(),
        }
    }
}

impl ClassificationRule {
    /// Replace the exception clause.
    pub fn with_exception(mut self, exception: Option<ExceptionClause>) -> Self {
        self.exception = exception;
        self
    }

    /// Check that the thresholds are strictly ascending.
    pub fn validate(&self) -> Result<(), String> {
        if self.low < self.mid && self.mid < self.high {
            Ok(())
        } else {
            Err(format!(
                "classification thresholds must be ascending, got {} / {} / {}",
                self.low, self.mid, self.high
            ))
        }
    }

    /// Classify a limit, categorical attribute and concatenated address.
    pub fn classify(
        &self,
        limit: Option<Decimal>,
        categorical: Option<&str>,
        address: &str,
    ) -> Option<CategoryCode> {
        let limit = limit?;

        if limit < self.low {
            Some(CategoryCode::Aa)
        } else if limit < self.mid {
            Some(CategoryCode::Bb)
        } else if limit < self.high {
            match &self.exception {
                Some(clause) if clause.matches(categorical, address) => Some(CategoryCode::C2),
                _ => Some(CategoryCode::Cc),
            }
        } else {
            Some(CategoryCode::Dd)
        }
    }

    /// Classify a candidate record.
    pub fn classify_record(&self, record: &CandidateRecord) -> Option<CategoryCode> {
        let address = full_address(record.address1.as_deref(), record.address2.as_deref());
        self.classify(record.credit_limit, record.gender.as_deref(), &address)
    }
}

/// Concatenate the two address fragments.
///
/// A missing first fragment contributes nothing; a present second fragment
/// is joined with a single space.
pub fn full_address(address1: Option<&str>, address2: Option<&str>) -> String {
    let mut address = address1.unwrap_or_default().to_string();
    if let Some(second) = address2 {
        address.push(' ');
        address.push_str(second);
    }
    address
}

/// Classify with the default rule.
pub fn classify(
    limit: Option<Decimal>,
    categorical: Option<&str>,
    address: &str,
) -> Option<CategoryCode> {
    ClassificationRule::default().classify(limit, categorical, address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const MATCHING: &str = "서울 송파구 풍납1동 123";

    fn d(s: &str) -> Option<Decimal> {
        Some(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_tiers() {
        assert_eq!(classify(d("500"), None, ""), Some(CategoryCode::Aa));
        assert_eq!(classify(d("2500"), None, ""), Some(CategoryCode::Bb));
        assert_eq!(classify(d("3500"), Some("M"), MATCHING), Some(CategoryCode::Cc));
        assert_eq!(classify(d("3500"), Some("F"), MATCHING), Some(CategoryCode::C2));
        assert_eq!(classify(d("5000"), None, ""), Some(CategoryCode::Dd));
    }

    #[test]
    fn test_boundaries_resolve_to_higher_tier() {
        assert_eq!(classify(d("999.99"), None, ""), Some(CategoryCode::Aa));
        assert_eq!(classify(d("1000"), None, ""), Some(CategoryCode::Bb));
        assert_eq!(classify(d("2999.99"), None, ""), Some(CategoryCode::Bb));
        assert_eq!(classify(d("3000"), None, ""), Some(CategoryCode::Cc));
        assert_eq!(classify(d("3000.00"), Some("F"), MATCHING), Some(CategoryCode::C2));
        assert_eq!(classify(d("3999.99"), None, ""), Some(CategoryCode::Cc));
        assert_eq!(classify(d("4000"), None, ""), Some(CategoryCode::Dd));
    }

    #[test]
    fn test_negative_and_zero_limits_are_lowest_tier() {
        assert_eq!(classify(d("0"), None, ""), Some(CategoryCode::Aa));
        assert_eq!(classify(d("-10"), None, ""), Some(CategoryCode::Aa));
    }

    #[test]
    fn test_absent_limit_is_unclassified() {
        assert_eq!(classify(None, Some("F"), MATCHING), None);
    }

    #[test]
    fn test_exception_requires_every_substring() {
        assert_eq!(
            classify(d("3500"), Some("F"), "서울 송파구 잠실동"),
            Some(CategoryCode::Cc)
        );
        assert_eq!(
            classify(d("3500"), Some("F"), "풍납1동 only"),
            Some(CategoryCode::Cc)
        );
        assert_eq!(classify(d("3500"), None, MATCHING), Some(CategoryCode::Cc));
    }

    #[test]
    fn test_categorical_match_is_exact() {
        assert_eq!(classify(d("3500"), Some("f"), MATCHING), Some(CategoryCode::Cc));
        assert_eq!(classify(d("3500"), Some("F "), MATCHING), Some(CategoryCode::Cc));
    }

    #[test]
    fn test_substrings_may_span_both_fragments() {
        let rule = ClassificationRule::default();
        let record = CandidateRecord::new("C1", "x@example.com", Decimal::from(3500))
            .with_gender("F")
            .with_address(Some("서울 송파구"), Some("풍납1동 12-3"));
        assert_eq!(rule.classify_record(&record), Some(CategoryCode::C2));
    }

    #[test]
    fn test_disabled_exception_never_yields_c2() {
        let rule = ClassificationRule::default().with_exception(None);
        assert_eq!(
            rule.classify(d("3500"), Some("F"), MATCHING),
            Some(CategoryCode::Cc)
        );
    }

    #[test]
    fn test_pluggable_exception_clause() {
        let rule = ClassificationRule::default()
            .with_exception(Some(ExceptionClause::new("M", &["Springfield"])));
        assert_eq!(
            rule.classify(d("3100"), Some("M"), "12 Evergreen Terrace, Springfield"),
            Some(CategoryCode::C2)
        );
        assert_eq!(
            rule.classify(d("3100"), Some("F"), "12 Evergreen Terrace, Springfield"),
            Some(CategoryCode::Cc)
        );
    }

    #[test]
    fn test_empty_substrings_are_ignored() {
        let clause = ExceptionClause::new("F", &["", "Seoul"]);
        assert!(clause.matches(Some("F"), "Seoul"));
        assert_eq!(clause.effective_substrings().count(), 1);
    }

    #[test]
    fn test_full_address() {
        assert_eq!(full_address(Some("a"), Some("b")), "a b");
        assert_eq!(full_address(Some("a"), None), "a");
        assert_eq!(full_address(None, Some("b")), " b");
        assert_eq!(full_address(None, None), "");
    }

    #[test]
    fn test_rule_validation() {
        assert!(ClassificationRule::default().validate().is_ok());
        let rule = ClassificationRule {
            mid: Decimal::from(5000),
            ..Default::default()
        };
        assert!(rule.validate().is_err());
    }
}
