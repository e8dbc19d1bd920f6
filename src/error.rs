//! Error and warning types for the extraction pipeline
//!
//! Fatal conditions are `ExtractionError` variants and abort a run; the
//! non-fatal ones are collected as `ExtractionWarning`s and returned next to a
//! successful result.

use serde::Serialize;
use thiserror::Error;

use crate::statements::{StatementKind, Year};

/// Fatal errors of an extraction run or of a results/export/delete call
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("structural parse error: {0}")]
    StructuralParse(String),

    #[error("persistence error: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    #[error("bookkeeping file {0} not found")]
    FileNotFound(i64),

    #[error("bookkeeping file {0} has not been processed yet")]
    NotProcessed(i64),

    #[error("bookkeeping file {id} is {status}; cannot start extraction")]
    InvalidState { id: i64, status: String },

    #[error("export error: {0}")]
    Export(String),
}

impl From<rusqlite::Error> for ExtractionError {
    fn from(err: rusqlite::Error) -> Self {
        ExtractionError::Persistence(err.into())
    }
}

/// Non-fatal findings accumulated during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionWarning {
    /// A single record line could not be used
    RecordParse {
        line: usize,
        record: String,
        reason: String,
    },
    /// A referential code is absent from the official plan; the row is kept
    ReferenceNotFound {
        statement: StatementKind,
        cod_cta_ref: String,
    },
    /// A percentage was left null because its base was zero or absent
    DivisionBaseZero {
        statement: StatementKind,
        cod_cta_ref: String,
        field: String,
        year: Year,
    },
}

impl std::fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ExtractionWarning::RecordParse {
                line,
                record,
                reason,
            } => write!(f, "line {} ({}): {}", line, record, reason),
            ExtractionWarning::ReferenceNotFound {
                statement,
                cod_cta_ref,
            } => write!(
                f,
                "{} code {} not found in the referential plan",
                statement, cod_cta_ref
            ),
            ExtractionWarning::DivisionBaseZero {
                statement,
                cod_cta_ref,
                field,
                year,
            } => write!(
                f,
                "{} code {}: {} for {} left empty (zero base)",
                statement, cod_cta_ref, field, year
            ),
        }
    }
}

/// Result type alias for the db and CLI layers
pub type Result<T> = anyhow::Result<T>;
