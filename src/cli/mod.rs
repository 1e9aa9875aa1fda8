//! Command-line interface
//!
//! Commands load `.coupon-bench.toml` from a workspace directory, open the
//! configured store and drive the library.

pub mod commands;
pub mod error;
pub mod logging;
pub mod report;
