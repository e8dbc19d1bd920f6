//! Output formatting module for CLI display
//!
//! This module handles all terminal output formatting, separating
//! the concerns of data calculation from presentation.

use colored::Colorize;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

use crate::db::{BookkeepingFile, FileStatus};
use crate::pipeline::ExtractionSummary;
use crate::statements::{years_in, StatementKind, StatementRow, YearPair};
use crate::utils::{format_decimal_br, format_percent};

/// Pretty JSON, or a JSON error object if serialization fails
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!(r#"{{"error": "JSON serialization failed: {}"}}"#, e))
}

fn colored_status(status: FileStatus) -> String {
    match status {
        FileStatus::Completed => status.as_str().green().to_string(),
        FileStatus::Failed => status.as_str().red().to_string(),
        FileStatus::Processing => status.as_str().yellow().to_string(),
        FileStatus::Pending => status.as_str().normal().to_string(),
    }
}

pub fn format_files_table(files: &[BookkeepingFile]) -> String {
    if files.is_empty() {
        return format!(
            "{} No files registered\nRegister one first using: {} register <file>\n",
            "ℹ".blue().bold(),
            "demonstra".bold()
        );
    }

    #[derive(Tabled)]
    struct FileRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "File")]
        name: String,
        #[tabled(rename = "Company")]
        company: String,
        #[tabled(rename = "CNPJ")]
        cnpj: String,
        #[tabled(rename = "Period")]
        period: String,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<FileRow> = files
        .iter()
        .map(|f| FileRow {
            id: f.id,
            name: f.file_name.clone(),
            company: f.company_name.clone().unwrap_or_default(),
            cnpj: f.cnpj.clone().unwrap_or_default(),
            period: match (f.period_start, f.period_end) {
                (Some(start), Some(end)) => {
                    format!("{} - {}", start.format("%d/%m/%Y"), end.format("%d/%m/%Y"))
                }
                _ => "-".to_string(),
            },
            status: match &f.error_message {
                Some(msg) if f.status == FileStatus::Failed => {
                    format!("{} ({})", colored_status(f.status), msg)
                }
                _ => colored_status(f.status),
            },
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    format!("{}\n", table)
}

pub fn format_summary(summary: &ExtractionSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "\n{} Extraction complete for file {}\n\n",
        "✓".green().bold(),
        summary.file_id
    ));
    output.push_str(&format!(
        "{:<20} {}\n",
        "Company:".bold(),
        summary.metadata.company
    ));
    output.push_str(&format!("{:<20} {}\n", "CNPJ:".bold(), summary.metadata.cnpj));
    let years: Vec<String> = summary.metadata.years.iter().map(|y| y.to_string()).collect();
    output.push_str(&format!("{:<20} {}\n", "Years:".bold(), years.join(", ")));
    output.push_str(&format!(
        "{:<20} {}\n",
        "BP rows:".bold(),
        summary.bp_row_count
    ));
    output.push_str(&format!(
        "{:<20} {}\n",
        "DRE rows:".bold(),
        summary.dre_row_count
    ));
    output.push_str(&format!(
        "{:<20} {} ms\n",
        "Time:".bold(),
        summary.execution_time_ms
    ));

    if summary.warning_count > 0 {
        output.push_str(&format!(
            "\n{} {} warnings",
            "⚠".yellow().bold(),
            summary.warning_count
        ));
        if summary.warning_count > summary.warnings.len() {
            output.push_str(&format!(" (showing first {})", summary.warnings.len()));
        }
        output.push('\n');
        for warning in &summary.warnings {
            output.push_str(&format!("  {}\n", warning.to_string().yellow()));
        }
    }
    output
}

/// Statement rows as a table: one value column per year, the AH % of each
/// transition and the AV % of the latest year
pub fn format_statement_table(statement: StatementKind, rows: &[StatementRow]) -> String {
    let mut output = format!("\n{} {}\n\n", "📊".cyan().bold(), statement.title().bold());
    if rows.is_empty() {
        output.push_str("  (no rows)\n");
        return output;
    }

    let years = years_in(rows);
    let pairs: Vec<YearPair> = years
        .windows(2)
        .map(|w| YearPair::new(w[0], w[1]))
        .collect();
    let last_year = years.last().copied();

    let mut header = vec!["Cód. Referencial".to_string(), "Descrição".to_string()];
    header.extend(years.iter().map(|y| y.to_string()));
    header.extend(pairs.iter().map(|p| format!("AH {}-{}", p.from, p.to)));
    if let Some(year) = last_year {
        header.push(format!("AV {}", year));
    }

    let mut builder = tabled::builder::Builder::default();
    builder.push_record(header);
    for row in rows {
        let mut record = vec![
            if row.is_standard {
                row.cod_cta_ref.clone()
            } else {
                format!("{}*", row.cod_cta_ref)
            },
            row.description.clone(),
        ];
        record.extend(years.iter().map(|y| {
            row.saldos
                .get(y)
                .map(|v| {
                    let text = format_decimal_br(*v);
                    if v.is_sign_negative() && !v.is_zero() {
                        text.red().to_string()
                    } else {
                        text
                    }
                })
                .unwrap_or_else(|| "-".to_string())
        }));
        record.extend(
            pairs
                .iter()
                .map(|p| format_percent(row.ah.get(p).and_then(|c| c.perc))),
        );
        if let Some(year) = last_year {
            record.push(format_percent(row.av.get(&year).copied().flatten()));
        }
        builder.push_record(record);
    }

    let mut table = builder.build();
    table.with(Style::modern());
    table.modify(Columns::new(2..), Alignment::right());
    output.push_str(&table.to_string());

    if rows.iter().any(|r| !r.is_standard) {
        output.push_str(&format!(
            "\n{}\n",
            "* code not found in the official referential plan".bright_black()
        ));
    } else {
        output.push('\n');
    }
    output
}
