//! Models module for the pipeline
//!
//! Defines the records read from the source, the rows written to the sink
//! and the codes the classifier assigns.

pub mod enums;
pub mod record;

pub use enums::*;
pub use record::{CandidateRecord, CodeSummary, OutputRecord, SinkRow};
