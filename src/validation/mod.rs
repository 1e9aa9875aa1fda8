//! Validation functionality
//!
//! Provides input validation and sanitization for identifiers and literals
//! that are spliced into SQL text.

pub mod input;

pub use input::{
    ValidationError, ValidationResult, quote_literal, validate_period_key, validate_table_name,
};
