//! Extraction pipeline: Parse → Resolve → Aggregate → Analyze → Persist
//!
//! An [`Extractor`] is built once per process with the reference plan loaded
//! and is shared by reference between callers. Every call opens its own
//! SQLite connection; runs on the same file id are serialized, runs on
//! different files proceed in parallel.

use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{self, BookkeepingFile, FileStatus, NewBookkeepingFile, RunOutput};
use crate::error::{ExtractionError, ExtractionWarning, Result};
use crate::export::{export_rows, ExportFormat};
use crate::importers::{self, ParsedLedger};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::reference_plan::ReferencePlan;
use crate::statements::{
    aggregate_balance_sheet, aggregate_income_statement, apply_horizontal, apply_vertical,
    years_in, AggregationInput, AnalysisOutcome, StatementKind, StatementRow, Year,
};
use crate::utils::Deadline;

/// Balance period found in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionMetadata {
    pub years: Vec<Year>,
    pub company: String,
    pub cnpj: String,
    pub periods: Vec<Period>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub file_id: i64,
    pub bp_row_count: usize,
    pub dre_row_count: usize,
    pub metadata: ExtractionMetadata,
    /// First `max_warnings` warnings, in the order they were found
    pub warnings: Vec<ExtractionWarning>,
    pub warning_count: usize,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsMetadata {
    pub years: Vec<Year>,
    pub bp_count: usize,
    pub dre_count: usize,
}

/// Stored statements of a completed file
#[derive(Debug, Clone, Serialize)]
pub struct StatementResults {
    pub bp: Vec<StatementRow>,
    pub dre: Vec<StatementRow>,
    pub metadata: ResultsMetadata,
}

impl StatementResults {
    pub fn rows(&self, statement: StatementKind) -> &[StatementRow] {
        match statement {
            StatementKind::BalanceSheet => &self.bp,
            StatementKind::IncomeStatement => &self.dre,
        }
    }
}

/// A file recorded by [`Extractor::register_file`]
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredFile {
    pub id: i64,
    /// The same content was already registered for the organization
    pub duplicate: bool,
}

pub struct Extractor {
    db_path: PathBuf,
    config: Config,
    plan: Arc<ReferencePlan>,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Extractor {
    /// Build an extractor, loading the reference plan from the database
    pub fn new(db_path: PathBuf, config: Config) -> Result<Self> {
        let conn = db::open_db(Some(db_path.clone()))?;
        let plan = db::load_reference_plan(&conn)?;
        if plan.is_empty() {
            warn!("Reference plan is empty; every statement row will be non-standard");
        } else {
            info!("Reference plan loaded: {} entries", plan.len());
        }
        Self::with_plan(db_path, config, Arc::new(plan))
    }

    /// Build an extractor around an already loaded plan; the config is
    /// validated here as well as on load
    pub fn with_plan(db_path: PathBuf, config: Config, plan: Arc<ReferencePlan>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            db_path,
            config,
            plan,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the copies of registered files, next to the database
    pub fn uploads_dir(&self) -> PathBuf {
        self.db_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join("uploads")
    }

    fn connection(&self) -> std::result::Result<Connection, ExtractionError> {
        db::open_db(Some(self.db_path.clone())).map_err(ExtractionError::Persistence)
    }

    fn file_lock(&self, file_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(file_id).or_default())
    }

    /// Record a pending file the way an upload would
    pub fn register_file(&self, path: &Path, organization_id: i64) -> Result<RegisteredFile> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let hash = blake3::hash(&bytes).to_hex().to_string();
        let conn = db::open_db(Some(self.db_path.clone()))?;

        if let Some(id) = db::find_file_by_hash(&conn, organization_id, &hash)? {
            info!("File {:?} already registered as {}", path, id);
            return Ok(RegisteredFile { id, duplicate: true });
        }

        let header = importers::read_header(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        // the caller's file stays untouched; runs and deletion use our copy
        let stored_path = self
            .uploads_dir()
            .join(organization_id.to_string())
            .join(format!("{}.txt", hash));
        if let Some(parent) = stored_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        std::fs::write(&stored_path, &bytes)
            .with_context(|| format!("Failed to store a copy at {:?}", stored_path))?;

        let inserted = db::insert_bookkeeping_file(
            &conn,
            &NewBookkeepingFile {
                organization_id,
                file_name,
                file_path: stored_path.to_string_lossy().to_string(),
                file_hash: hash,
                file_type: header.file_type,
                cnpj: Some(header.cnpj),
                company_name: Some(header.company_name),
                state_code: header.state_code,
                city_code: header.city_code,
                period_start: Some(header.period_start),
                period_end: Some(header.period_end),
            },
        );
        let id = match inserted {
            Ok(id) => id,
            Err(e) => {
                if let Err(rm) = std::fs::remove_file(&stored_path) {
                    warn!("Could not remove stored copy {:?}: {}", stored_path, rm);
                }
                return Err(e);
            }
        };
        info!("Registered {:?} as file {} (stored at {:?})", path, id, stored_path);
        Ok(RegisteredFile { id, duplicate: false })
    }

    /// Run the whole pipeline for one file
    pub fn start_extraction(
        &self,
        file_id: i64,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<ExtractionSummary, ExtractionError> {
        let deadline = Deadline::new(self.config.timeout());
        let lock = self.file_lock(file_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        progress.report(ProgressEvent::new(5, "Starting extraction"));
        let mut conn = self.connection()?;
        let file = db::get_bookkeeping_file(&conn, file_id)
            .map_err(ExtractionError::Persistence)?
            .ok_or(ExtractionError::FileNotFound(file_id))?;
        let claimed = db::claim_for_processing(&conn, file_id, self.config.timeout())
            .map_err(ExtractionError::Persistence)?;
        if !claimed {
            return Err(ExtractionError::InvalidState {
                id: file_id,
                status: FileStatus::Processing.to_string(),
            });
        }

        match self.run(&mut conn, &file, progress, &deadline) {
            Ok(summary) => Ok(summary),
            Err(err) => {
                error!("Extraction of file {} failed: {}", file_id, err);
                if let Err(mark_err) = db::mark_failed(&conn, file_id, &err.to_string()) {
                    error!("Could not mark file {} as failed: {:#}", file_id, mark_err);
                }
                Err(err)
            }
        }
    }

    fn run(
        &self,
        conn: &mut Connection,
        file: &BookkeepingFile,
        progress: &dyn ProgressSink,
        deadline: &Deadline,
    ) -> std::result::Result<ExtractionSummary, ExtractionError> {
        progress.report(ProgressEvent::new(10, format!("Reading {}", file.file_name)));
        let ledger = importers::parse_ecd_file(&file.file_path, deadline)?;
        progress.report(ProgressEvent::new(
            40,
            format!(
                "Parsed {} records ({} accounts, {} balances)",
                ledger.stats.processed_records,
                ledger.accounts.len(),
                ledger.balances.len()
            ),
        ));
        deadline.check()?;

        let mut warnings = ledger.warnings.clone();
        progress.report(ProgressEvent::new(
            50,
            format!("Ledger validated ({} journal entries)", ledger.entries.len()),
        ));

        let input = AggregationInput::new(&ledger, &self.plan);
        let (mut bp, bp_warnings) = aggregate_balance_sheet(input);
        warnings.extend(bp_warnings);
        progress.report(ProgressEvent::new(60, format!("Balance sheet: {} rows", bp.len())));
        deadline.check()?;

        let (mut dre, dre_warnings) = aggregate_income_statement(input);
        warnings.extend(dre_warnings);
        progress.report(ProgressEvent::new(70, format!("Income statement: {} rows", dre.len())));
        deadline.check()?;

        let mut analysis = AnalysisOutcome::default();
        apply_horizontal(&mut bp, &mut analysis);
        apply_horizontal(&mut dre, &mut analysis);
        progress.report(ProgressEvent::new(80, "Horizontal analysis done"));
        deadline.check()?;

        apply_vertical(&mut bp, &self.config.bp_total_code, &mut analysis);
        apply_vertical(&mut dre, &self.config.dre_total_code, &mut analysis);
        warnings.extend(analysis.warnings);
        progress.report(ProgressEvent::new(90, "Vertical analysis done"));
        deadline.check()?;

        progress.report(ProgressEvent::new(95, "Saving results"));
        let output = RunOutput {
            ledger: &ledger,
            bp: &bp,
            dre: &dre,
        };
        db::persist_run(conn, file.id, &output, self.config.batch_size)
            .map_err(ExtractionError::Persistence)?;

        let summary = ExtractionSummary {
            file_id: file.id,
            bp_row_count: bp.len(),
            dre_row_count: dre.len(),
            metadata: metadata_for(&ledger, &bp, &dre),
            warning_count: warnings.len(),
            warnings: warnings.into_iter().take(self.config.max_warnings).collect(),
            execution_time_ms: deadline.elapsed().as_millis() as u64,
        };
        progress.report(ProgressEvent::new(100, "Extraction completed"));
        info!(
            "File {} extracted in {} ms: {} BP rows, {} DRE rows, {} warnings",
            file.id,
            summary.execution_time_ms,
            summary.bp_row_count,
            summary.dre_row_count,
            summary.warning_count
        );
        Ok(summary)
    }

    /// Stored BP and DRE rows of a completed file
    pub fn get_results(&self, file_id: i64) -> std::result::Result<StatementResults, ExtractionError> {
        let conn = self.connection()?;
        let file = db::get_bookkeeping_file(&conn, file_id)
            .map_err(ExtractionError::Persistence)?
            .ok_or(ExtractionError::FileNotFound(file_id))?;
        if file.status != FileStatus::Completed {
            return Err(ExtractionError::NotProcessed(file_id));
        }

        let bp = db::load_statement_rows(&conn, file_id, StatementKind::BalanceSheet)
            .map_err(ExtractionError::Persistence)?;
        let dre = db::load_statement_rows(&conn, file_id, StatementKind::IncomeStatement)
            .map_err(ExtractionError::Persistence)?;
        if bp.is_empty() && dre.is_empty() {
            return Err(ExtractionError::NotProcessed(file_id));
        }

        let mut years = years_in(&bp);
        years.extend(years_in(&dre));
        years.sort();
        years.dedup();

        Ok(StatementResults {
            metadata: ResultsMetadata {
                years,
                bp_count: bp.len(),
                dre_count: dre.len(),
            },
            bp,
            dre,
        })
    }

    /// Render one statement of a completed file
    pub fn export_statement(
        &self,
        file_id: i64,
        statement: StatementKind,
        format: ExportFormat,
    ) -> std::result::Result<Vec<u8>, ExtractionError> {
        let results = self.get_results(file_id)?;
        export_rows(statement, results.rows(statement), format)
    }

    /// Remove a file's statements and record, then the copy kept by
    /// [`Extractor::register_file`]
    pub fn delete_file(&self, file_id: i64) -> std::result::Result<(), ExtractionError> {
        let lock = self.file_lock(file_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut conn = self.connection()?;
        let path = db::delete_bookkeeping_file(&mut conn, file_id)
            .map_err(ExtractionError::Persistence)?
            .ok_or(ExtractionError::FileNotFound(file_id))?;

        let path = Path::new(&path);
        if !path.starts_with(self.uploads_dir()) {
            warn!("Stored path {:?} is outside the uploads directory; left in place", path);
        } else if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Could not remove stored file {:?}: {}", path, e);
            }
        }

        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&file_id);
        Ok(())
    }
}

fn metadata_for(ledger: &ParsedLedger, bp: &[StatementRow], dre: &[StatementRow]) -> ExtractionMetadata {
    let years: BTreeSet<Year> = years_in(bp).into_iter().chain(years_in(dre)).collect();

    let mut periods: Vec<Period> = ledger
        .balances
        .iter()
        .map(|b| Period {
            start: b.period_start,
            end: b.period_end,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if periods.is_empty() {
        periods.push(Period {
            start: ledger.header.period_start,
            end: ledger.header.period_end,
        });
    }

    ExtractionMetadata {
        years: years.into_iter().collect(),
        company: ledger.header.company_name.clone(),
        cnpj: ledger.header.cnpj.clone(),
        periods,
    }
}
