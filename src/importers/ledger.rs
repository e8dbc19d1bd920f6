//! Structured ledger produced by the ECD parser

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::encoding::DetectedEncoding;
use crate::db::models::FileType;
use crate::error::ExtractionWarning;

/// Debit/credit indicator (IND_DC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DebitCredit {
    Debit,
    Credit,
}

impl DebitCredit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebitCredit::Debit => "D",
            DebitCredit::Credit => "C",
        }
    }
}

impl FromStr for DebitCredit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "D" => Ok(DebitCredit::Debit),
            "C" => Ok(DebitCredit::Credit),
            _ => Err(()),
        }
    }
}

/// Synthetic (grouping) or analytic (postable) account (IND_CTA)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccountType {
    Synthetic,
    Analytic,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Synthetic => "S",
            AccountType::Analytic => "A",
        }
    }
}

impl FromStr for AccountType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(AccountType::Synthetic),
            "A" => Ok(AccountType::Analytic),
            _ => Err(()),
        }
    }
}

/// Opening record (0000) data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    pub file_type: FileType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub company_name: String,
    pub cnpj: String,
    pub state_code: Option<String>,
    pub city_code: Option<String>,
}

/// Company account mapped onto the referential chart (I051)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferentialMapping {
    pub cost_center: Option<String>,
    pub cod_cta_ref: String,
}

/// Chart-of-accounts entry (I050) with its mappings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub level: u32,
    pub parent_code: Option<String>,
    /// COD_NAT: 01 asset, 02 liability, 03 equity, 04 result, 05 compensation, 09 other
    pub nature: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub mappings: Vec<ReferentialMapping>,
    pub aglutination_code: Option<String>,
    pub line: usize,
}

impl Account {
    /// Referential code for a cost center: exact match, then the mapping
    /// without cost center, then the first mapping.
    pub fn referential_code(&self, cost_center: Option<&str>) -> Option<&str> {
        let exact = cost_center.and_then(|cc| {
            self.mappings
                .iter()
                .find(|m| m.cost_center.as_deref() == Some(cc))
        });
        exact
            .or_else(|| self.mappings.iter().find(|m| m.cost_center.is_none()))
            .or_else(|| self.mappings.first())
            .map(|m| m.cod_cta_ref.as_str())
    }
}

/// Period balance (I155 under I150)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub account_code: String,
    pub cost_center: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub opening: Decimal,
    pub opening_dc: DebitCredit,
    pub debit: Decimal,
    pub credit: Decimal,
    pub closing: Decimal,
    pub closing_dc: DebitCredit,
    pub line: usize,
}

impl AccountBalance {
    pub fn is_year_end(&self) -> bool {
        self.period_end.month() == 12
    }
}

/// Result account value before closing entries (I355 under I350)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultBalance {
    pub account_code: String,
    pub cost_center: Option<String>,
    pub result_date: NaiveDate,
    pub amount: Decimal,
    pub dc: DebitCredit,
    pub line: usize,
}

/// Journal line item (I250)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalItem {
    pub account_code: String,
    pub cost_center: Option<String>,
    pub amount: Decimal,
    pub dc: DebitCredit,
    pub history: Option<String>,
    pub line: usize,
}

/// Journal entry (I200) with its items
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub number: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    /// IND_LCTO: N normal, E closing, X extemporaneous
    pub kind: String,
    pub items: Vec<JournalItem>,
    pub line: usize,
}

impl JournalEntry {
    pub fn total(&self, dc: DebitCredit) -> Decimal {
        self.items
            .iter()
            .filter(|item| item.dc == dc)
            .map(|item| item.amount)
            .sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total(DebitCredit::Debit) == self.total(DebitCredit::Credit)
    }
}

/// Counters reported with a parse
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub total_lines: usize,
    pub processed_records: usize,
    pub skipped_records: usize,
    pub accounts: usize,
    pub mappings: usize,
    pub balances: usize,
    pub result_balances: usize,
    pub entries: usize,
    pub items: usize,
    pub warnings: usize,
}

/// Everything the parser extracted from one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLedger {
    pub header: FileHeader,
    /// Keyed by account code; the last definition of a code wins
    pub accounts: BTreeMap<String, Account>,
    pub balances: Vec<AccountBalance>,
    pub result_balances: Vec<ResultBalance>,
    pub entries: Vec<JournalEntry>,
    pub stats: ParseStats,
    pub warnings: Vec<ExtractionWarning>,
    pub encoding: DetectedEncoding,
}

impl ParsedLedger {
    pub fn account(&self, code: &str) -> Option<&Account> {
        self.accounts.get(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account_with(mappings: Vec<(Option<&str>, &str)>) -> Account {
        Account {
            code: "1.1.01".to_string(),
            name: "Caixa".to_string(),
            account_type: AccountType::Analytic,
            level: 3,
            parent_code: Some("1.1".to_string()),
            nature: Some("01".to_string()),
            start_date: None,
            mappings: mappings
                .into_iter()
                .map(|(cc, code)| ReferentialMapping {
                    cost_center: cc.map(str::to_string),
                    cod_cta_ref: code.to_string(),
                })
                .collect(),
            aglutination_code: None,
            line: 1,
        }
    }

    #[test]
    fn test_referential_code_prefers_cost_center_match() {
        let account = account_with(vec![(Some("CC1"), "1.01.01"), (None, "1.01.02")]);
        assert_eq!(account.referential_code(Some("CC1")), Some("1.01.01"));
        assert_eq!(account.referential_code(Some("CC9")), Some("1.01.02"));
        assert_eq!(account.referential_code(None), Some("1.01.02"));
    }

    #[test]
    fn test_referential_code_falls_back_to_first_mapping() {
        let account = account_with(vec![(Some("CC1"), "1.01.01"), (Some("CC2"), "1.01.09")]);
        assert_eq!(account.referential_code(None), Some("1.01.01"));
        assert_eq!(account_with(vec![]).referential_code(None), None);
    }

    #[test]
    fn test_entry_balance_check() {
        let item = |amount, dc| JournalItem {
            account_code: "x".to_string(),
            cost_center: None,
            amount,
            dc,
            history: None,
            line: 2,
        };
        let mut entry = JournalEntry {
            number: "1".to_string(),
            date: NaiveDate::from_ymd_opt(2023, 1, 5).unwrap(),
            amount: dec!(150),
            kind: "N".to_string(),
            items: vec![
                item(dec!(100), DebitCredit::Debit),
                item(dec!(50), DebitCredit::Debit),
                item(dec!(150), DebitCredit::Credit),
            ],
            line: 1,
        };
        assert!(entry.is_balanced());
        entry.items.pop();
        assert!(!entry.is_balanced());
    }
}
