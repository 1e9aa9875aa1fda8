//! Enums for the coupon pipeline
//!
//! # Serde Casing Conventions
//!
//! - `SCREAMING_SNAKE_CASE`: persisted codes that land in the sink table (CategoryCode)
//! - `kebab-case`: configuration and CLI keywords (WriteMode)

use serde::{Deserialize, Serialize};

/// Category code assigned by the classifier and persisted in the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryCode {
    /// limit < 1000
    Aa,
    /// 1000 <= limit < 3000
    Bb,
    /// 3000 <= limit < 4000, exception clause not met
    Cc,
    /// 3000 <= limit < 4000, exception clause met
    C2,
    /// limit >= 4000
    Dd,
}

impl CategoryCode {
    /// All codes in tier order.
    pub const ALL: [CategoryCode; 5] = [
        CategoryCode::Aa,
        CategoryCode::Bb,
        CategoryCode::Cc,
        CategoryCode::C2,
        CategoryCode::Dd,
    ];

    /// Code as stored in the sink column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryCode::Aa => "AA",
            CategoryCode::Bb => "BB",
            CategoryCode::Cc => "CC",
            CategoryCode::C2 => "C2",
            CategoryCode::Dd => "DD",
        }
    }
}

impl std::str::FromStr for CategoryCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AA" => Ok(CategoryCode::Aa),
            "BB" => Ok(CategoryCode::Bb),
            "CC" => Ok(CategoryCode::Cc),
            "C2" => Ok(CategoryCode::C2),
            "DD" => Ok(CategoryCode::Dd),
            _ => Err(format!("Unknown category code: {}", s)),
        }
    }
}

impl std::fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How classified records are submitted to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// One literal statement per record, no plan reuse
    PerRow,
    /// One prepared statement, bound and executed per record
    ReusedStatement,
    /// Records accumulated and submitted as one multi-row statement
    #[default]
    ArrayBatch,
    /// Read, classify and insert in a single server-side statement
    ServerResident,
}

impl WriteMode {
    /// All modes, slowest first.
    pub const ALL: [WriteMode; 4] = [
        WriteMode::PerRow,
        WriteMode::ReusedStatement,
        WriteMode::ArrayBatch,
        WriteMode::ServerResident,
    ];

    /// Whether records are classified client-side in this mode.
    pub fn is_row_wise(&self) -> bool {
        !matches!(self, WriteMode::ServerResident)
    }
}

impl std::str::FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "per-row" | "row" => Ok(WriteMode::PerRow),
            "reused-statement" | "prepared" => Ok(WriteMode::ReusedStatement),
            "array-batch" | "batch" => Ok(WriteMode::ArrayBatch),
            "server-resident" | "server" => Ok(WriteMode::ServerResident),
            _ => Err(format!(
                "Unknown write mode: {}. Use 'per-row', 'reused-statement', 'array-batch' or 'server-resident'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::PerRow => write!(f, "per-row"),
            WriteMode::ReusedStatement => write!(f, "reused-statement"),
            WriteMode::ArrayBatch => write!(f, "array-batch"),
            WriteMode::ServerResident => write!(f, "server-resident"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_code_round_trips_through_str() {
        for code in CategoryCode::ALL {
            assert_eq!(code.as_str().parse::<CategoryCode>().unwrap(), code);
        }
        assert!("ZZ".parse::<CategoryCode>().is_err());
    }

    #[test]
    fn test_category_code_serde_uses_sink_spelling() {
        let json = serde_json::to_string(&CategoryCode::C2).unwrap();
        assert_eq!(json, "\"C2\"");
        let json = serde_json::to_string(&CategoryCode::Aa).unwrap();
        assert_eq!(json, "\"AA\"");
    }

    #[test]
    fn test_write_mode_from_str() {
        assert_eq!("per-row".parse::<WriteMode>().unwrap(), WriteMode::PerRow);
        assert_eq!(
            "reused_statement".parse::<WriteMode>().unwrap(),
            WriteMode::ReusedStatement
        );
        assert_eq!("BATCH".parse::<WriteMode>().unwrap(), WriteMode::ArrayBatch);
        assert_eq!(
            "server".parse::<WriteMode>().unwrap(),
            WriteMode::ServerResident
        );
        assert!("bulk".parse::<WriteMode>().is_err());
    }

    #[test]
    fn test_only_server_resident_is_set_based() {
        assert!(WriteMode::PerRow.is_row_wise());
        assert!(WriteMode::ArrayBatch.is_row_wise());
        assert!(!WriteMode::ServerResident.is_row_wise());
    }
}
