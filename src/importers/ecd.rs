//! SPED ECD (Escrituração Contábil Digital) record parser
//!
//! Streams a pipe-delimited export line by line (`|REG|F1|F2|...|`) and builds
//! a [`ParsedLedger`]. A malformed line becomes a warning and parsing
//! continues; missing structural records (0000, chart of accounts,
//! referential mappings) abort the file.
//!
//! Record layout handled (field positions after the record type):
//! - `0000`: LECD, DT_INI, DT_FIN, NOME, CNPJ, UF, IE, COD_MUN
//! - `I050`/`C050`: DT_ALT, COD_NAT, IND_CTA, NIVEL, COD_CTA, COD_CTA_SUP, CTA
//! - `I051`/`C051`: [COD_ENT_REF], COD_CCUS, COD_CTA_REF
//! - `I052`/`C052`: COD_CCUS, COD_AGL
//! - `I150`: DT_INI, DT_FIN
//! - `I155`: COD_CTA, COD_CCUS, VL_SLD_INI, IND_DC_INI, VL_DEB, VL_CRED, VL_SLD_FIN, IND_DC_FIN
//! - `I200`: NUM_LCTO, DT_LCTO, VL_LCTO, IND_LCTO
//! - `I250`: COD_CTA, COD_CCUS, VL_DC, IND_DC, NUM_ARQ, COD_HIST_PAD, HIST
//! - `I350`: DT_RES
//! - `I355`: COD_CTA, COD_CCUS, VL_CTA, IND_DC

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::str::FromStr;
use tracing::{debug, info};

use super::encoding::LineDecoder;
use super::ledger::{
    Account, AccountBalance, AccountType, DebitCredit, FileHeader, JournalEntry, JournalItem,
    ParseStats, ParsedLedger, ReferentialMapping, ResultBalance,
};
use super::values::{clean_text, digits_only, non_empty, parse_amount, parse_date};
use crate::db::models::FileType;
use crate::error::{ExtractionError, ExtractionWarning};
use crate::utils::Deadline;

/// Lines between two deadline checks
const DEADLINE_CHECK_INTERVAL: usize = 1024;

type LineResult = std::result::Result<(), String>;

/// Parse an ECD export from any buffered reader
pub fn parse_ecd<R: BufRead>(
    mut reader: R,
    deadline: &Deadline,
) -> Result<ParsedLedger, ExtractionError> {
    let mut parser = EcdParser::default();
    let mut decoder = LineDecoder::new();
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).map_err(|e| {
            ExtractionError::StructuralParse(format!(
                "failed to read line {}: {}",
                parser.line + 1,
                e
            ))
        })?;
        if read == 0 {
            break;
        }

        parser.line += 1;
        if parser.line % DEADLINE_CHECK_INTERVAL == 0 {
            deadline.check()?;
        }

        let text = decoder.decode(&buf);
        parser.handle_line(&text);
    }

    let encoding = decoder.encoding();
    info!(
        "Parsed {} lines ({}): {} accounts, {} balances, {} result balances, {} entries",
        parser.line,
        encoding.as_str(),
        parser.accounts.len(),
        parser.balances.len(),
        parser.result_balances.len(),
        parser.entries.len()
    );
    parser.finish(encoding)
}

/// Parse a lone opening record (0000) line
pub fn parse_header_line(line: &str) -> Result<FileHeader, String> {
    let mut parser = EcdParser::default();
    parser.record_0000(&split_fields(line))?;
    parser
        .header
        .ok_or_else(|| "opening record 0000 not found".to_string())
}

#[derive(Default)]
struct EcdParser {
    line: usize,
    header: Option<FileHeader>,
    rejected_layout: Option<String>,
    accounts: BTreeMap<String, Account>,
    /// Account that receives I051/I052 children
    last_account: Option<String>,
    mapping_records: usize,
    period: Option<(NaiveDate, NaiveDate)>,
    result_date: Option<NaiveDate>,
    balances: Vec<AccountBalance>,
    result_balances: Vec<ResultBalance>,
    entries: Vec<JournalEntry>,
    open_entry: Option<JournalEntry>,
    stats: ParseStats,
    warnings: Vec<ExtractionWarning>,
}

impl EcdParser {
    fn handle_line(&mut self, text: &str) {
        self.stats.total_lines += 1;
        if text.trim().is_empty() {
            return;
        }

        let fields = split_fields(text);
        let record = fields[0].trim().to_ascii_uppercase();

        let outcome = match record.as_str() {
            "0000" => self.record_0000(&fields),
            "I050" | "C050" => self.record_i050(&fields),
            "I051" | "C051" => self.record_i051(&fields),
            "I052" | "C052" => self.record_i052(&fields),
            "I150" => self.record_i150(&fields),
            "I155" => self.record_i155(&fields),
            "I200" => self.record_i200(&fields),
            "I250" => self.record_i250(&fields),
            "I350" => self.record_i350(&fields),
            "I355" => self.record_i355(&fields),
            _ => {
                self.stats.skipped_records += 1;
                return;
            }
        };

        match outcome {
            Ok(()) => self.stats.processed_records += 1,
            Err(reason) => self.warn(self.line, &record, reason),
        }
    }

    fn warn(&mut self, line: usize, record: &str, reason: String) {
        debug!("Line {} ({}): {}", line, record, reason);
        self.warnings.push(ExtractionWarning::RecordParse {
            line,
            record: record.to_string(),
            reason,
        });
    }

    fn record_0000(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 6)?;
        let layout = fields[1].trim().to_ascii_uppercase();
        if layout != "LECD" {
            self.rejected_layout = Some(layout.clone());
            return Err(format!("unsupported layout '{}' (expected LECD)", layout));
        }
        let period_start = parse_date(fields[2])?;
        let period_end = parse_date(fields[3])?;
        if period_end < period_start {
            return Err(format!(
                "period end {} before period start {}",
                period_end, period_start
            ));
        }

        let company_name = clean_text(fields[4]);
        self.header = Some(FileHeader {
            file_type: FileType::Ecd,
            period_start,
            period_end,
            company_name: if company_name.is_empty() {
                "Não informado".to_string()
            } else {
                company_name
            },
            cnpj: digits_only(fields[5]),
            state_code: non_empty(fields.get(6)),
            city_code: non_empty(fields.get(8)),
        });
        Ok(())
    }

    fn record_i050(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 8)?;
        let code = fields[5].trim();
        if code.is_empty() {
            return Err("empty COD_CTA".to_string());
        }
        let account_type = AccountType::from_str(fields[3])
            .map_err(|_| format!("invalid IND_CTA '{}'", fields[3]))?;
        let level = fields[4]
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid NIVEL '{}'", fields[4]))?;
        let start_date = match fields[1].trim() {
            "" => None,
            raw => Some(parse_date(raw)?),
        };

        let account = Account {
            code: code.to_string(),
            name: clean_text(fields[7]),
            account_type,
            level,
            parent_code: non_empty(fields.get(6)),
            nature: non_empty(fields.get(2)),
            start_date,
            mappings: Vec::new(),
            aglutination_code: None,
            line: self.line,
        };

        if let Some(previous) = self.accounts.insert(code.to_string(), account) {
            self.warn(
                self.line,
                "I050",
                format!(
                    "duplicate account {} (first defined at line {}); last definition wins",
                    code, previous.line
                ),
            );
        } else {
            self.stats.accounts += 1;
        }
        self.last_account = Some(code.to_string());
        Ok(())
    }

    fn record_i051(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 3)?;
        // Older layouts carry COD_ENT_REF before COD_CCUS
        let (cost_center, cod_cta_ref) = if fields.len() >= 4 {
            (fields[2], fields[3])
        } else {
            (fields[1], fields[2])
        };
        let cod_cta_ref = cod_cta_ref.trim();
        if cod_cta_ref.is_empty() {
            return Err("empty COD_CTA_REF".to_string());
        }

        let account = self.current_account()?;
        account.mappings.push(ReferentialMapping {
            cost_center: non_empty(Some(&cost_center)),
            cod_cta_ref: cod_cta_ref.to_string(),
        });
        self.mapping_records += 1;
        self.stats.mappings += 1;
        Ok(())
    }

    fn record_i052(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 3)?;
        let code = non_empty(fields.get(2));
        let account = self.current_account()?;
        account.aglutination_code = code;
        Ok(())
    }

    fn current_account(&mut self) -> Result<&mut Account, String> {
        self.last_account
            .as_ref()
            .and_then(|code| self.accounts.get_mut(code))
            .ok_or_else(|| "record without a preceding chart-of-accounts record".to_string())
    }

    fn record_i150(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 3)?;
        let start = parse_date(fields[1])?;
        let end = parse_date(fields[2])?;
        if end < start {
            self.period = None;
            return Err(format!("period end {} before period start {}", end, start));
        }
        self.period = Some((start, end));
        Ok(())
    }

    fn record_i155(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 9)?;
        let (period_start, period_end) = self
            .period
            .ok_or_else(|| "balance outside of a valid I150 period".to_string())?;
        let account_code = required_code(fields[1])?;

        let opening = parse_amount(fields[3])?;
        let debit = parse_amount(fields[5])?;
        let credit = parse_amount(fields[6])?;
        let closing = parse_amount(fields[7])?;

        self.balances.push(AccountBalance {
            account_code,
            cost_center: non_empty(fields.get(2)),
            period_start,
            period_end,
            opening,
            opening_dc: parse_indicator(fields[4], opening, "IND_DC_INI")?,
            debit,
            credit,
            closing,
            closing_dc: parse_indicator(fields[8], closing, "IND_DC_FIN")?,
            line: self.line,
        });
        self.stats.balances += 1;
        Ok(())
    }

    fn record_i200(&mut self, fields: &[&str]) -> LineResult {
        self.close_entry();
        require(fields, 4)?;
        let number = required_code(fields[1])?;
        let date = parse_date(fields[2])?;
        let amount = parse_amount(fields[3])?;

        self.open_entry = Some(JournalEntry {
            number,
            date,
            amount,
            kind: non_empty(fields.get(4)).unwrap_or_else(|| "N".to_string()),
            items: Vec::new(),
            line: self.line,
        });
        self.stats.entries += 1;
        Ok(())
    }

    fn record_i250(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 5)?;
        let account_code = required_code(fields[1])?;
        let amount = parse_amount(fields[3])?;
        let dc = DebitCredit::from_str(fields[4])
            .map_err(|_| format!("invalid IND_DC '{}'", fields[4]))?;
        let line = self.line;

        let entry = self
            .open_entry
            .as_mut()
            .ok_or_else(|| "journal item without a preceding I200 entry".to_string())?;
        entry.items.push(JournalItem {
            account_code,
            cost_center: non_empty(fields.get(2)),
            amount,
            dc,
            history: fields.get(7).map(|h| clean_text(h)).filter(|h| !h.is_empty()),
            line,
        });
        self.stats.items += 1;
        Ok(())
    }

    fn record_i350(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 2)?;
        match parse_date(fields[1]) {
            Ok(date) => {
                self.result_date = Some(date);
                Ok(())
            }
            Err(reason) => {
                self.result_date = None;
                Err(reason)
            }
        }
    }

    fn record_i355(&mut self, fields: &[&str]) -> LineResult {
        require(fields, 5)?;
        let result_date = self
            .result_date
            .ok_or_else(|| "result balance outside of a valid I350 block".to_string())?;
        let account_code = required_code(fields[1])?;
        let amount = parse_amount(fields[3])?;

        self.result_balances.push(ResultBalance {
            account_code,
            cost_center: non_empty(fields.get(2)),
            result_date,
            amount,
            dc: parse_indicator(fields[4], amount, "IND_DC")?,
            line: self.line,
        });
        self.stats.result_balances += 1;
        Ok(())
    }

    /// Check the open journal entry and move it to the finished list
    fn close_entry(&mut self) {
        let Some(entry) = self.open_entry.take() else {
            return;
        };

        let debit = entry.total(DebitCredit::Debit);
        let credit = entry.total(DebitCredit::Credit);
        if debit != credit {
            self.warn(
                entry.line,
                "I200",
                format!(
                    "entry {} is unbalanced: debit {} != credit {}",
                    entry.number, debit, credit
                ),
            );
        } else if !entry.items.is_empty() && entry.amount != debit {
            self.warn(
                entry.line,
                "I200",
                format!(
                    "entry {} amount {} differs from its items total {}",
                    entry.number, entry.amount, debit
                ),
            );
        }
        self.entries.push(entry);
    }

    fn finish(
        mut self,
        encoding: super::encoding::DetectedEncoding,
    ) -> Result<ParsedLedger, ExtractionError> {
        self.close_entry();

        if let Some(layout) = self.rejected_layout.take() {
            return Err(ExtractionError::StructuralParse(format!(
                "file layout {} is not an ECD (LECD) bookkeeping file",
                layout
            )));
        }
        let header = self.header.take().ok_or_else(|| {
            ExtractionError::StructuralParse("opening record 0000 not found".to_string())
        })?;
        if self.accounts.is_empty() {
            return Err(ExtractionError::StructuralParse(
                "no chart-of-accounts records (I050) found".to_string(),
            ));
        }
        if self.mapping_records == 0 {
            return Err(ExtractionError::StructuralParse(
                "no referential mapping records (I051) found".to_string(),
            ));
        }

        let accounts = std::mem::take(&mut self.accounts);
        let balances: Vec<AccountBalance> = std::mem::take(&mut self.balances)
            .into_iter()
            .filter(|b| {
                let known = accounts.contains_key(&b.account_code);
                if !known {
                    self.warnings.push(orphan_warning(b.line, "I155", &b.account_code));
                }
                known
            })
            .collect();
        let result_balances: Vec<ResultBalance> = std::mem::take(&mut self.result_balances)
            .into_iter()
            .filter(|r| {
                let known = accounts.contains_key(&r.account_code);
                if !known {
                    self.warnings.push(orphan_warning(r.line, "I355", &r.account_code));
                }
                known
            })
            .collect();
        for entry in &self.entries {
            for item in entry.items.iter().filter(|i| !accounts.contains_key(&i.account_code)) {
                self.warnings.push(ExtractionWarning::RecordParse {
                    line: item.line,
                    record: "I250".to_string(),
                    reason: format!("account {} is not in the chart of accounts", item.account_code),
                });
            }
        }

        // Deferred warnings are appended out of line order; restore it
        self.warnings.sort_by_key(|w| match w {
            ExtractionWarning::RecordParse { line, .. } => *line,
            _ => usize::MAX,
        });

        self.stats.balances = balances.len();
        self.stats.result_balances = result_balances.len();
        self.stats.warnings = self.warnings.len();

        Ok(ParsedLedger {
            header,
            accounts,
            balances,
            result_balances,
            entries: self.entries,
            stats: self.stats,
            warnings: self.warnings,
            encoding,
        })
    }
}

fn orphan_warning(line: usize, record: &str, account_code: &str) -> ExtractionWarning {
    ExtractionWarning::RecordParse {
        line,
        record: record.to_string(),
        reason: format!(
            "account {} is not in the chart of accounts; balance dropped",
            account_code
        ),
    }
}

/// Split `|REG|A|B|` into `["REG", "A", "B"]`
fn split_fields(line: &str) -> Vec<&str> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').collect()
}

fn require(fields: &[&str], count: usize) -> LineResult {
    if fields.len() < count {
        return Err(format!(
            "expected at least {} fields, found {}",
            count,
            fields.len()
        ));
    }
    Ok(())
}

fn required_code(raw: &str) -> Result<String, String> {
    let code = raw.trim();
    if code.is_empty() {
        return Err("empty code field".to_string());
    }
    Ok(code.to_string())
}

/// D/C indicator; a zero amount may come without one
fn parse_indicator(raw: &str, amount: Decimal, name: &str) -> Result<DebitCredit, String> {
    match DebitCredit::from_str(raw) {
        Ok(dc) => Ok(dc),
        Err(_) if raw.trim().is_empty() && amount.is_zero() => Ok(DebitCredit::Debit),
        Err(_) => Err(format!("invalid {} '{}'", name, raw)),
    }
}
