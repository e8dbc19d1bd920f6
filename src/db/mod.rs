// Database module - SQLite connection and models

pub mod models;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::importers::{FileHeader, ParsedLedger};
use crate::reference_plan::{ReferencePlan, ReferencePlanEntry};
use crate::statements::{StatementKind, StatementRow};
pub use models::{BookkeepingFile, FileStatus, FileType, NewBookkeepingFile};

/// Get the default database path (~/.demonstra/data.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let app_dir = PathBuf::from(home).join(".demonstra");

    // Create directory if it doesn't exist
    std::fs::create_dir_all(&app_dir).context("Failed to create .demonstra directory")?;

    Ok(app_dir.join("data.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(path) => path,
        None => get_default_db_path()?,
    };
    let conn = Connection::open(&path).context(format!("Failed to open database at {:?}", path))?;

    // Enable foreign keys
    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("Failed to enable foreign keys")?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("Failed to set busy timeout")?;

    Ok(conn)
}

/// Initialize the database with schema
///
/// This function creates the database file and runs the schema SQL
/// to set up all tables and indexes.
pub fn init_database(db_path: Option<PathBuf>) -> Result<()> {
    let path = match db_path {
        Some(path) => path,
        None => get_default_db_path()?,
    };

    info!("Initializing database at: {:?}", path);

    let conn = open_db(Some(path))?;

    // Read schema SQL
    let schema_sql = include_str!("schema.sql");

    // Execute schema
    conn.execute_batch(schema_sql)
        .context("Failed to execute schema")?;

    info!("Database initialized successfully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Bookkeeping files
// ---------------------------------------------------------------------------

pub fn insert_bookkeeping_file(conn: &Connection, file: &NewBookkeepingFile) -> Result<i64> {
    conn.execute(
        "INSERT INTO bookkeeping_files (
            organization_id, file_name, file_path, file_hash, file_type, cnpj,
            company_name, state_code, city_code, period_start, period_end
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            file.organization_id,
            file.file_name,
            file.file_path,
            file.file_hash,
            file.file_type.as_str(),
            file.cnpj,
            file.company_name,
            file.state_code,
            file.city_code,
            file.period_start,
            file.period_end,
        ],
    )
    .context("Failed to insert bookkeeping file")?;

    Ok(conn.last_insert_rowid())
}

const FILE_COLUMNS: &str = "id, organization_id, file_name, file_path, file_hash, file_type, cnpj,
    company_name, state_code, city_code, period_start, period_end, status, error_message,
    total_records, processed_records, created_at, updated_at, processed_at";

fn map_bookkeeping_file(row: &Row) -> Result<BookkeepingFile, rusqlite::Error> {
    let file_type: String = row.get(5)?;
    let status: String = row.get(12)?;
    Ok(BookkeepingFile {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        file_name: row.get(2)?,
        file_path: row.get(3)?,
        file_hash: row.get(4)?,
        file_type: FileType::from_str(&file_type)
            .map_err(|_| rusqlite::Error::InvalidColumnType(5, "file_type".to_string(), Type::Text))?,
        cnpj: row.get(6)?,
        company_name: row.get(7)?,
        state_code: row.get(8)?,
        city_code: row.get(9)?,
        period_start: row.get(10)?,
        period_end: row.get(11)?,
        status: FileStatus::from_str(&status)
            .map_err(|_| rusqlite::Error::InvalidColumnType(12, "status".to_string(), Type::Text))?,
        error_message: row.get(13)?,
        total_records: row.get(14)?,
        processed_records: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        processed_at: row.get(18)?,
    })
}

pub fn get_bookkeeping_file(conn: &Connection, id: i64) -> Result<Option<BookkeepingFile>> {
    let sql = format!("SELECT {} FROM bookkeeping_files WHERE id = ?1", FILE_COLUMNS);
    conn.query_row(&sql, params![id], map_bookkeeping_file)
        .optional()
        .context("Failed to load bookkeeping file")
}

pub fn list_bookkeeping_files(conn: &Connection) -> Result<Vec<BookkeepingFile>> {
    let sql = format!("SELECT {} FROM bookkeeping_files ORDER BY id", FILE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let files = stmt
        .query_map([], map_bookkeeping_file)?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to list bookkeeping files")?;
    Ok(files)
}

/// Existing file of an organization with the same content hash
pub fn find_file_by_hash(conn: &Connection, organization_id: i64, hash: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM bookkeeping_files WHERE organization_id = ?1 AND file_hash = ?2",
        params![organization_id, hash],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to look up file hash")
}

/// Move a file to `processing` unless another run already holds it
///
/// A `processing` row untouched for longer than `stale_after` belongs to a
/// run that died and is claimed again. Returns `false` when the file is held
/// by a live run.
pub fn claim_for_processing(
    conn: &Connection,
    id: i64,
    stale_after: Option<Duration>,
) -> Result<bool> {
    let now = Utc::now();
    let stale_before = stale_after
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| now - d);
    let updated = conn.execute(
        "UPDATE bookkeeping_files
         SET status = 'processing', error_message = NULL, updated_at = ?2
         WHERE id = ?1
           AND (status != 'processing' OR (?3 IS NOT NULL AND updated_at < ?3))",
        params![id, now, stale_before],
    )?;
    Ok(updated == 1)
}

pub fn mark_failed(conn: &Connection, id: i64, message: &str) -> Result<()> {
    conn.execute(
        "UPDATE bookkeeping_files
         SET status = 'failed', error_message = ?2, updated_at = ?3
         WHERE id = ?1",
        params![id, message, Utc::now()],
    )
    .context("Failed to mark file as failed")?;
    Ok(())
}

fn mark_completed(
    tx: &Transaction,
    id: i64,
    header: &FileHeader,
    total_records: usize,
    processed_records: usize,
) -> Result<()> {
    let now = Utc::now();
    tx.execute(
        "UPDATE bookkeeping_files
         SET status = 'completed', error_message = NULL, file_type = ?2, cnpj = ?3,
             company_name = ?4, state_code = ?5, city_code = ?6, period_start = ?7,
             period_end = ?8, total_records = ?9, processed_records = ?10,
             updated_at = ?11, processed_at = ?11
         WHERE id = ?1",
        params![
            id,
            header.file_type.as_str(),
            header.cnpj,
            header.company_name,
            header.state_code,
            header.city_code,
            header.period_start,
            header.period_end,
            total_records as i64,
            processed_records as i64,
            now,
        ],
    )
    .context("Failed to mark file as completed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Run persistence
// ---------------------------------------------------------------------------

/// Everything one extraction run writes
pub struct RunOutput<'a> {
    pub ledger: &'a ParsedLedger,
    pub bp: &'a [StatementRow],
    pub dre: &'a [StatementRow],
}

/// Replace the ledger and statements of a file and mark it completed
///
/// One transaction: prior rows are deleted and the new ones inserted in
/// batches; any error rolls everything back.
pub fn persist_run(
    conn: &mut Connection,
    file_id: i64,
    output: &RunOutput,
    batch_size: usize,
) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to start transaction")?;

    delete_ledger(&tx, file_id)?;
    delete_statement_rows(&tx, file_id, None)?;

    insert_ledger(&tx, file_id, output.ledger, batch_size)?;
    insert_statement_rows(&tx, file_id, output.bp, batch_size)?;
    insert_statement_rows(&tx, file_id, output.dre, batch_size)?;

    let stats = &output.ledger.stats;
    mark_completed(
        &tx,
        file_id,
        &output.ledger.header,
        stats.total_lines,
        stats.processed_records,
    )?;

    tx.commit().context("Failed to commit extraction results")?;
    info!(
        "Persisted file {}: {} BP rows, {} DRE rows",
        file_id,
        output.bp.len(),
        output.dre.len()
    );
    Ok(())
}

fn delete_ledger(tx: &Transaction, file_id: i64) -> Result<()> {
    // Mappings and journal items cascade from their parents
    for table in [
        "chart_of_accounts",
        "account_balances",
        "result_balances",
        "journal_entries",
    ] {
        tx.execute(
            &format!("DELETE FROM {} WHERE file_id = ?1", table),
            params![file_id],
        )
        .with_context(|| format!("Failed to clear {}", table))?;
    }
    Ok(())
}

fn insert_ledger(tx: &Transaction, file_id: i64, ledger: &ParsedLedger, batch_size: usize) -> Result<()> {
    let accounts: Vec<_> = ledger.accounts.values().collect();
    for (idx, batch) in accounts.chunks(batch_size).enumerate() {
        let mut account_stmt = tx.prepare_cached(
            "INSERT INTO chart_of_accounts (
                file_id, code, name, account_type, level, parent_code, nature,
                aglutination_code, start_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        let mut mapping_stmt = tx.prepare_cached(
            "INSERT INTO referential_mappings (account_id, cost_center, cod_cta_ref)
             VALUES (?1, ?2, ?3)",
        )?;
        for account in batch {
            account_stmt
                .execute(params![
                    file_id,
                    account.code,
                    account.name,
                    account.account_type.as_str(),
                    account.level,
                    account.parent_code,
                    account.nature,
                    account.aglutination_code,
                    account.start_date,
                ])
                .with_context(|| format!("Failed to insert account {}", account.code))?;
            let account_id = tx.last_insert_rowid();
            for mapping in &account.mappings {
                mapping_stmt.execute(params![account_id, mapping.cost_center, mapping.cod_cta_ref])?;
            }
        }
        debug!("Inserted account batch {} ({} rows)", idx + 1, batch.len());
    }

    for batch in ledger.balances.chunks(batch_size) {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO account_balances (
                file_id, account_code, cost_center, period_start, period_end,
                opening, opening_dc, debit, credit, closing, closing_dc
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for balance in batch {
            stmt.execute(params![
                file_id,
                balance.account_code,
                balance.cost_center,
                balance.period_start,
                balance.period_end,
                balance.opening.to_string(),
                balance.opening_dc.as_str(),
                balance.debit.to_string(),
                balance.credit.to_string(),
                balance.closing.to_string(),
                balance.closing_dc.as_str(),
            ])
            .context("Failed to insert account balance")?;
        }
    }

    for batch in ledger.result_balances.chunks(batch_size) {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO result_balances (file_id, account_code, cost_center, result_date, amount, dc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for balance in batch {
            stmt.execute(params![
                file_id,
                balance.account_code,
                balance.cost_center,
                balance.result_date,
                balance.amount.to_string(),
                balance.dc.as_str(),
            ])
            .context("Failed to insert result balance")?;
        }
    }

    for batch in ledger.entries.chunks(batch_size) {
        let mut entry_stmt = tx.prepare_cached(
            "INSERT INTO journal_entries (file_id, number, entry_date, amount, kind)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut item_stmt = tx.prepare_cached(
            "INSERT INTO journal_items (entry_id, account_code, cost_center, amount, dc, history)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for entry in batch {
            entry_stmt
                .execute(params![
                    file_id,
                    entry.number,
                    entry.date,
                    entry.amount.to_string(),
                    entry.kind,
                ])
                .with_context(|| format!("Failed to insert journal entry {}", entry.number))?;
            let entry_id = tx.last_insert_rowid();
            for item in &entry.items {
                item_stmt.execute(params![
                    entry_id,
                    item.account_code,
                    item.cost_center,
                    item.amount.to_string(),
                    item.dc.as_str(),
                    item.history,
                ])?;
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Statement rows
// ---------------------------------------------------------------------------

fn delete_statement_rows(
    conn: &Connection,
    file_id: i64,
    statement: Option<StatementKind>,
) -> Result<usize> {
    let deleted = match statement {
        Some(kind) => conn.execute(
            "DELETE FROM statement_rows WHERE file_id = ?1 AND statement = ?2",
            params![file_id, kind.as_str()],
        ),
        None => conn.execute(
            "DELETE FROM statement_rows WHERE file_id = ?1",
            params![file_id],
        ),
    }
    .context("Failed to delete statement rows")?;
    Ok(deleted)
}

fn insert_statement_rows(
    tx: &Transaction,
    file_id: i64,
    rows: &[StatementRow],
    batch_size: usize,
) -> Result<()> {
    for (idx, batch) in rows.chunks(batch_size).enumerate() {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO statement_rows (
                file_id, statement, cod_cta_ref, account_codes, description, is_standard,
                level, account_kind, saldos, ah, av
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for row in batch {
            stmt.execute(params![
                file_id,
                row.statement.as_str(),
                row.cod_cta_ref,
                serde_json::to_string(&row.account_codes)?,
                row.description,
                row.is_standard,
                row.level,
                row.account_kind,
                serde_json::to_string(&row.saldos)?,
                serde_json::to_string(&row.ah)?,
                serde_json::to_string(&row.av)?,
            ])
            .with_context(|| format!("Failed to insert statement row {}", row.cod_cta_ref))?;
        }
        debug!("Inserted statement batch {} ({} rows)", idx + 1, batch.len());
    }
    Ok(())
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> Result<T, rusqlite::Error> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Rows of one statement, ordered by referential code
pub fn load_statement_rows(
    conn: &Connection,
    file_id: i64,
    statement: StatementKind,
) -> Result<Vec<StatementRow>> {
    let mut stmt = conn.prepare(
        "SELECT cod_cta_ref, account_codes, description, is_standard, level, account_kind,
                saldos, ah, av
         FROM statement_rows
         WHERE file_id = ?1 AND statement = ?2
         ORDER BY cod_cta_ref",
    )?;
    let rows = stmt
        .query_map(params![file_id, statement.as_str()], |row| {
            Ok(StatementRow {
                statement,
                cod_cta_ref: row.get(0)?,
                account_codes: json_column(row, 1)?,
                description: row.get(2)?,
                is_standard: row.get(3)?,
                level: row.get(4)?,
                account_kind: row.get(5)?,
                saldos: json_column(row, 6)?,
                ah: json_column(row, 7)?,
                av: json_column(row, 8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to load statement rows")?;
    Ok(rows)
}

/// Number of stored rows per statement: (BP, DRE)
pub fn count_statement_rows(conn: &Connection, file_id: i64) -> Result<(usize, usize)> {
    let count = |kind: StatementKind| -> Result<usize> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM statement_rows WHERE file_id = ?1 AND statement = ?2",
            params![file_id, kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    };
    Ok((
        count(StatementKind::BalanceSheet)?,
        count(StatementKind::IncomeStatement)?,
    ))
}

/// Delete BP rows, DRE rows and the file record in one transaction
///
/// Returns the stored file path when the record existed.
pub fn delete_bookkeeping_file(conn: &mut Connection, file_id: i64) -> Result<Option<String>> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to start transaction")?;

    let path: Option<String> = tx
        .query_row(
            "SELECT file_path FROM bookkeeping_files WHERE id = ?1",
            params![file_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(path) = path else {
        return Ok(None);
    };

    let bp = delete_statement_rows(&tx, file_id, Some(StatementKind::BalanceSheet))?;
    let dre = delete_statement_rows(&tx, file_id, Some(StatementKind::IncomeStatement))?;
    tx.execute("DELETE FROM bookkeeping_files WHERE id = ?1", params![file_id])
        .context("Failed to delete bookkeeping file")?;
    tx.commit().context("Failed to commit file deletion")?;

    info!("Deleted file {} ({} BP rows, {} DRE rows)", file_id, bp, dre);
    Ok(Some(path))
}

// ---------------------------------------------------------------------------
// Ledger read-back
// ---------------------------------------------------------------------------

/// Journal entries of a file whose debit and credit totals differ
pub fn find_unbalanced_entries(conn: &Connection, file_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.number, i.amount, i.dc
         FROM journal_entries e
         JOIN journal_items i ON i.entry_id = e.id
         WHERE e.file_id = ?1
         ORDER BY e.id",
    )?;
    let mut totals: Vec<(i64, String, Decimal)> = Vec::new();
    let mut rows = stmt.query(params![file_id])?;
    while let Some(row) = rows.next()? {
        let entry_id: i64 = row.get(0)?;
        let amount = get_decimal_value(row, 2)?;
        let dc: String = row.get(3)?;
        let signed = if dc == "D" { amount } else { -amount };
        match totals.last_mut() {
            Some((last_id, _, total)) if *last_id == entry_id => *total += signed,
            _ => totals.push((entry_id, row.get(1)?, signed)),
        }
    }
    Ok(totals
        .into_iter()
        .filter(|(_, _, total)| !total.is_zero())
        .map(|(_, number, _)| number)
        .collect())
}

pub fn count_ledger_rows(conn: &Connection, file_id: i64, table: &str) -> Result<i64> {
    let sql = match table {
        "referential_mappings" => "SELECT COUNT(*) FROM referential_mappings m
             JOIN chart_of_accounts a ON a.id = m.account_id WHERE a.file_id = ?1"
            .to_string(),
        "journal_items" => "SELECT COUNT(*) FROM journal_items i
             JOIN journal_entries e ON e.id = i.entry_id WHERE e.file_id = ?1"
            .to_string(),
        "chart_of_accounts" | "account_balances" | "result_balances" | "journal_entries" => {
            format!("SELECT COUNT(*) FROM {} WHERE file_id = ?1", table)
        }
        other => anyhow::bail!("unknown ledger table: {}", other),
    };
    conn.query_row(&sql, params![file_id], |row| row.get(0))
        .context("Failed to count ledger rows")
}

pub fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> Result<Decimal, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))?;
            Decimal::from_str(s)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        }
        ValueRef::Integer(i) => Ok(Decimal::from(i)),
        _ => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            Type::Null,
        )),
    }
}

// ---------------------------------------------------------------------------
// Reference plan
// ---------------------------------------------------------------------------

/// Replace the stored plan of the given statements
pub fn replace_reference_plan(conn: &mut Connection, entries: &[ReferencePlanEntry]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut statements: Vec<StatementKind> = entries.iter().map(|e| e.statement).collect();
    statements.sort();
    statements.dedup();
    for statement in &statements {
        tx.execute(
            "DELETE FROM reference_plan WHERE statement = ?1",
            params![statement.as_str()],
        )?;
    }
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO reference_plan (statement, cod_cta_ref, description, level, account_kind)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for entry in entries {
            stmt.execute(params![
                entry.statement.as_str(),
                entry.cod_cta_ref,
                entry.description,
                entry.level,
                entry.account_kind,
            ])?;
        }
    }
    tx.commit().context("Failed to commit reference plan")?;
    info!("Stored {} reference plan entries", entries.len());
    Ok(entries.len())
}

pub fn load_reference_plan(conn: &Connection) -> Result<ReferencePlan> {
    let mut stmt = conn.prepare(
        "SELECT statement, cod_cta_ref, description, level, account_kind FROM reference_plan",
    )?;
    let entries = stmt
        .query_map([], |row| {
            let statement: String = row.get(0)?;
            Ok(ReferencePlanEntry {
                statement: StatementKind::from_str(&statement).map_err(|_| {
                    rusqlite::Error::InvalidColumnType(0, "statement".to_string(), Type::Text)
                })?,
                cod_cta_ref: row.get(1)?,
                description: row.get(2)?,
                level: row.get(3)?,
                account_kind: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to load reference plan")?;
    debug!("Loaded {} reference plan entries", entries.len());
    Ok(ReferencePlan::from_entries(entries))
}
