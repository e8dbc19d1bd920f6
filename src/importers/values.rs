//! Field value parsing for SPED records (amounts, dates, text)

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

/// Parse an amount in SPED (`1234,56`), Brazilian (`1.234,56`) or plain
/// (`1234.56`) notation. An empty field is zero.
pub fn parse_amount(raw: &str) -> Result<Decimal, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let normalized = match (trimmed.rfind(','), trimmed.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => trimmed.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => trimmed.replace(',', ""),
        (Some(_), None) => trimmed.replace(',', "."),
        _ => trimmed.to_string(),
    };

    Decimal::from_str(&normalized).map_err(|_| format!("invalid amount '{}'", raw))
}

/// Parse a SPED date (DDMMYYYY)
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    if trimmed.len() != 8 {
        return Err(format!("invalid date '{}' (expected DDMMYYYY)", raw));
    }
    NaiveDate::parse_from_str(trimmed, "%d%m%Y").map_err(|_| format!("invalid date '{}'", raw))
}

/// NFC-normalize and strip control characters
pub fn clean_text(raw: &str) -> String {
    raw.nfc()
        .filter(|c| !c.is_control() && *c != '\u{FFFD}')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Keep digits only (CNPJ is sometimes exported with punctuation)
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Non-empty trimmed field as an owned string
pub fn non_empty(raw: Option<&&str>) -> Option<String> {
    raw.map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
