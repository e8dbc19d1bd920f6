//! Official referential chart of accounts (Plano Referencial RFB)
//!
//! Loaded once per process and shared read-only. The same referential code
//! may exist independently under BP and DRE, so entries are keyed by
//! `(StatementKind, code)`.

use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::statements::StatementKind;

/// One official referential account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferencePlanEntry {
    pub cod_cta_ref: String,
    pub description: String,
    pub statement: StatementKind,
    pub level: u32,
    pub account_kind: String,
}

impl ReferencePlanEntry {
    pub fn new(
        statement: StatementKind,
        cod_cta_ref: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let cod_cta_ref = cod_cta_ref.into();
        let level = level_of(&cod_cta_ref);
        Self {
            description: description.into(),
            statement,
            level,
            account_kind: account_kind_for_level(level).to_string(),
            cod_cta_ref,
        }
    }
}

/// Hierarchy depth of a referential code: number of dots plus one
pub fn level_of(cod_cta_ref: &str) -> u32 {
    cod_cta_ref.matches('.').count() as u32 + 1
}

/// Account kind label for a hierarchy level
pub fn account_kind_for_level(level: u32) -> &'static str {
    match level {
        0 | 1 => "sintética",
        2 => "agregadora",
        3 => "intermediária",
        4 => "subgrupo",
        _ => "analítica",
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferencePlan {
    entries: HashMap<(StatementKind, String), ReferencePlanEntry>,
}

impl ReferencePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I: IntoIterator<Item = ReferencePlanEntry>>(entries: I) -> Self {
        let mut plan = Self::new();
        for entry in entries {
            plan.insert(entry);
        }
        plan
    }

    pub fn insert(&mut self, entry: ReferencePlanEntry) {
        let key = (entry.statement, entry.cod_cta_ref.clone());
        if self.entries.insert(key, entry).is_some() {
            debug!("Reference plan entry replaced");
        }
    }

    pub fn lookup(&self, statement: StatementKind, cod_cta_ref: &str) -> Option<&ReferencePlanEntry> {
        self.entries.get(&(statement, cod_cta_ref.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load one statement's sheet of the official plan from CSV
///
/// Expects a header row with a code column (`COD_CTA_REF`) and a description
/// column (`DESCRIÇÃO`/`DESCRICAO`); `;` and `,` delimiters are accepted.
pub fn load_plan_csv<P: AsRef<Path>>(
    path: P,
    statement: StatementKind,
) -> Result<Vec<ReferencePlanEntry>> {
    let path = path.as_ref();
    info!("Loading {} reference plan from {:?}", statement, path);

    let content = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let text = match std::str::from_utf8(&content) {
        Ok(text) => text.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(&content).0.into_owned(),
    };
    parse_plan_csv(&text, statement)
}

pub fn parse_plan_csv(text: &str, statement: StatementKind) -> Result<Vec<ReferencePlanEntry>> {
    let first_line = text.lines().next().unwrap_or_default();
    let delimiter = if first_line.contains(';') { b';' } else { b',' };

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.trim_start_matches('\u{FEFF}').as_bytes());

    let headers = reader
        .headers()
        .context("Failed to read CSV headers")?
        .clone();
    let (code_idx, desc_idx) = find_columns(&headers)?;

    let mut entries = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.context("Failed to read CSV record")?;
        let code = record.get(code_idx).unwrap_or_default().trim();
        if code.is_empty() {
            continue;
        }
        if !statement.accepts_code(code) {
            warn!(
                "Skipping row {}: code {} does not belong to {}",
                idx + 2,
                code,
                statement
            );
            continue;
        }
        let description = record.get(desc_idx).unwrap_or_default().trim();
        entries.push(ReferencePlanEntry::new(statement, code, description));
    }

    info!("Loaded {} {} reference entries", entries.len(), statement);
    Ok(entries)
}

fn find_columns(headers: &csv::StringRecord) -> Result<(usize, usize)> {
    let mut code_idx = None;
    let mut desc_idx = None;

    for (idx, header) in headers.iter().enumerate() {
        let text = header.trim().to_lowercase();
        if text.contains("cod_cta_ref") || text == "codigo" || text == "código" {
            code_idx = Some(idx);
        }
        if text.contains("descri") {
            desc_idx = Some(idx);
        }
    }

    Ok((
        code_idx.ok_or_else(|| anyhow!("COD_CTA_REF column not found"))?,
        desc_idx.ok_or_else(|| anyhow!("Description column not found"))?,
    ))
}
