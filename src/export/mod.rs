//! Statement export (XLSX and CSV)
//!
//! A statement is first laid out as a format-neutral [`Sheet`] (header plus
//! typed cells) and then rendered. Values are rounded for presentation here;
//! empty cells stay blank.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use itertools::Itertools;

use crate::error::ExtractionError;
use crate::statements::{years_in, StatementKind, StatementRow, Year, YearPair};
use crate::utils::round_presentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Money(Decimal),
    Percent(Decimal),
    Empty,
}

impl Cell {
    fn money(value: Option<&Decimal>) -> Self {
        value.map_or(Cell::Empty, |v| Cell::Money(round_presentation(*v)))
    }

    fn percent(value: Option<Decimal>) -> Self {
        value.map_or(Cell::Empty, |v| Cell::Percent(round_presentation(v)))
    }

    fn as_csv_field(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Money(value) | Cell::Percent(value) => format!("{:.2}", value),
            Cell::Empty => String::new(),
        }
    }
}

/// Laid-out statement, ready to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Lay out a statement: identification columns, one value column per year,
/// an AH (R$)/(%) pair per consecutive year transition, one AV column per year
pub fn build_sheet(statement: StatementKind, rows: &[StatementRow]) -> Sheet {
    let years = years_in(rows);
    let pairs: Vec<YearPair> = years
        .iter()
        .tuple_windows()
        .map(|(from, to)| YearPair::new(*from, *to))
        .collect();

    let mut headers: Vec<String> = ["Código", "Cód. Referencial", "Descrição", "Padrão RFB"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    headers.extend(years.iter().map(Year::to_string));
    for pair in &pairs {
        headers.push(format!("AH {}-{} (R$)", pair.from, pair.to));
        headers.push(format!("AH {}-{} (%)", pair.from, pair.to));
    }
    headers.extend(years.iter().map(|year| format!("AV {} (%)", year)));

    let body = rows
        .iter()
        .map(|row| {
            let mut cells = vec![
                Cell::Text(row.account_codes.join(", ")),
                Cell::Text(row.cod_cta_ref.clone()),
                Cell::Text(row.description.clone()),
                Cell::Text(if row.is_standard { "Sim" } else { "Não" }.to_string()),
            ];
            cells.extend(years.iter().map(|year| Cell::money(row.saldos.get(year))));
            for pair in &pairs {
                let change = row.ah.get(pair);
                cells.push(Cell::money(change.map(|c| &c.abs)));
                cells.push(Cell::percent(change.and_then(|c| c.perc)));
            }
            cells.extend(
                years
                    .iter()
                    .map(|year| Cell::percent(row.av.get(year).copied().flatten())),
            );
            cells
        })
        .collect();

    Sheet {
        name: statement.title().to_string(),
        headers,
        rows: body,
    }
}

/// Render a statement in the requested format
pub fn export_rows(
    statement: StatementKind,
    rows: &[StatementRow],
    format: ExportFormat,
) -> Result<Vec<u8>, ExtractionError> {
    let sheet = build_sheet(statement, rows);
    info!(
        "Exporting {} as {} ({} rows, {} columns)",
        statement,
        format,
        sheet.rows.len(),
        sheet.headers.len()
    );
    match format {
        ExportFormat::Xlsx => render_xlsx(&sheet),
        ExportFormat::Csv => render_csv(&sheet),
    }
}

pub fn render_xlsx(sheet: &Sheet) -> Result<Vec<u8>, ExtractionError> {
    write_workbook(sheet).map_err(|e| ExtractionError::Export(e.to_string()))
}

fn write_workbook(sheet: &Sheet) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let money_format = Format::new().set_num_format("#,##0.00");
    let percent_format = Format::new().set_num_format("0.00");

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&sheet.name)?;

    for (col, header) in sheet.headers.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, header.as_str(), &header_format)?;
        let width = match col {
            0 => 15.0,
            1 => 18.0,
            2 => 50.0,
            3 => 11.0,
            _ => 15.0,
        };
        worksheet.set_column_width(col, width)?;
    }
    worksheet.set_freeze_panes(1, 0)?;

    for (idx, cells) in sheet.rows.iter().enumerate() {
        let row = idx as u32 + 1;
        for (col, cell) in cells.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(text) => {
                    worksheet.write_string(row, col, text.as_str())?;
                }
                Cell::Money(value) => {
                    worksheet.write_number_with_format(
                        row,
                        col,
                        value.to_f64().unwrap_or_default(),
                        &money_format,
                    )?;
                }
                Cell::Percent(value) => {
                    worksheet.write_number_with_format(
                        row,
                        col,
                        value.to_f64().unwrap_or_default(),
                        &percent_format,
                    )?;
                }
                Cell::Empty => {}
            }
        }
    }

    workbook.save_to_buffer()
}

/// CSV with `;` separator and `.` decimal point
pub fn render_csv(sheet: &Sheet) -> Result<Vec<u8>, ExtractionError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());

    let to_export = |e: csv::Error| ExtractionError::Export(e.to_string());
    writer.write_record(&sheet.headers).map_err(to_export)?;
    for cells in &sheet.rows {
        writer
            .write_record(cells.iter().map(Cell::as_csv_field))
            .map_err(to_export)?;
    }
    writer
        .into_inner()
        .map_err(|e| ExtractionError::Export(e.to_string()))
}
