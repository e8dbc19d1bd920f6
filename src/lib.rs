//! Demonstra - financial statements from SPED ECD bookkeeping
//!
//! This library parses SPED ECD exports, maps company accounts onto the
//! official referential chart and builds multi-year Balance Sheet (BP) and
//! Income Statement (DRE) rows with horizontal and vertical analysis.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod importers;
pub mod pipeline;
pub mod progress;
pub mod reference_plan;
pub mod statements;
pub mod utils;

pub use error::{ExtractionError, ExtractionWarning};
pub use pipeline::{ExtractionSummary, Extractor, StatementResults};
