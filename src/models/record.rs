//! Record types flowing through the pipeline
//!
//! `CandidateRecord` is read from the source table, `OutputRecord` is what
//! lands in the sink. Limits are exact decimals so that tier comparisons and
//! the persisted reward amount never drift through floating point.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::CategoryCode;

/// One source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Unique identifier (null in the store means the row is never fetched)
    pub id: String,
    /// Contact address
    pub email: Option<String>,
    /// Credit limit, also the persisted reward amount
    pub credit_limit: Option<Decimal>,
    /// Single-letter categorical attribute
    pub gender: Option<String>,
    /// First address fragment
    pub address1: Option<String>,
    /// Second address fragment
    pub address2: Option<String>,
    /// Enrollment timestamp
    pub enrolled_at: Option<NaiveDateTime>,
}

impl CandidateRecord {
    /// Create a complete record with no address and no categorical attribute.
    pub fn new(id: impl Into<String>, email: impl Into<String>, credit_limit: Decimal) -> Self {
        Self {
            id: id.into(),
            email: Some(email.into()),
            credit_limit: Some(credit_limit),
            gender: None,
            address1: None,
            address2: None,
            enrolled_at: None,
        }
    }

    /// Set the categorical attribute.
    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    /// Set both address fragments.
    pub fn with_address(mut self, address1: Option<&str>, address2: Option<&str>) -> Self {
        self.address1 = address1.map(str::to_string);
        self.address2 = address2.map(str::to_string);
        self
    }

    /// Set the enrollment timestamp.
    pub fn with_enrolled_at(mut self, enrolled_at: NaiveDateTime) -> Self {
        self.enrolled_at = Some(enrolled_at);
        self
    }

    /// Whether identifier, contact address and limit are all present.
    ///
    /// Incomplete records are excluded before classification and are never
    /// counted as errors.
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty() && self.email.is_some() && self.credit_limit.is_some()
    }
}

/// One sink row as created by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Run-period key, constant per run
    pub period_key: String,
    /// Source identifier
    pub customer_id: String,
    /// Contact address
    pub email: String,
    /// Assigned category
    pub code: CategoryCode,
    /// Limit copied verbatim from the candidate
    pub credit_point: Decimal,
    /// Dispatch timestamp, always empty at creation
    pub dispatched_at: Option<NaiveDateTime>,
}

impl OutputRecord {
    /// Build the sink row for a classified candidate.
    ///
    /// Returns `None` for incomplete candidates.
    pub fn from_candidate(
        period_key: &str,
        candidate: &CandidateRecord,
        code: CategoryCode,
    ) -> Option<Self> {
        Some(Self {
            period_key: period_key.to_string(),
            customer_id: candidate.id.clone(),
            email: candidate.email.clone()?,
            code,
            credit_point: candidate.credit_limit?,
            dispatched_at: None,
        })
    }
}

/// A sink row read back for comparison and verification.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SinkRow {
    /// Source identifier
    pub customer_id: String,
    /// Category code as stored
    pub code: String,
    /// Persisted limit
    pub credit_point: Decimal,
}

/// Per-code aggregate over the sink for one period key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSummary {
    /// Category code as stored
    pub code: String,
    /// Rows carrying this code
    pub count: u64,
    /// Average persisted limit, rounded to two places
    pub average_point: Decimal,
}
