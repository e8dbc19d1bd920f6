//! Financial statement rows (BP and DRE) and their year-keyed series
//!
//! A `StatementRow` is one referential code of one statement, owning its
//! signed yearly values (`saldos`), the horizontal analysis between
//! consecutive years and the vertical analysis against the statement total.

pub mod aggregation;
pub mod analysis;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use aggregation::{
    aggregate_balance_sheet, aggregate_income_statement, signed_value, AggregationInput,
};
pub use analysis::{
    apply_analysis, apply_horizontal, apply_vertical, horizontal_analysis, vertical_analysis,
    vertical_base, AnalysisOutcome,
};

/// Which statement a row, code or plan entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatementKind {
    #[serde(rename = "BP")]
    BalanceSheet,
    #[serde(rename = "DRE")]
    IncomeStatement,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "BP",
            StatementKind::IncomeStatement => "DRE",
        }
    }

    /// Sheet title used by the export builder
    pub fn title(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "Balanço Patrimonial",
            StatementKind::IncomeStatement => "DRE",
        }
    }

    /// Whether a referential code belongs to this statement (1/2 for BP, 3 for DRE)
    pub fn accepts_code(&self, cod_cta_ref: &str) -> bool {
        match self {
            StatementKind::BalanceSheet => {
                cod_cta_ref.starts_with('1') || cod_cta_ref.starts_with('2')
            }
            StatementKind::IncomeStatement => cod_cta_ref.starts_with('3'),
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BP" | "BALANCE" | "BALANCO" => Ok(StatementKind::BalanceSheet),
            "DRE" | "INCOME" => Ok(StatementKind::IncomeStatement),
            _ => Err(()),
        }
    }
}

/// A validated four-digit calendar year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Year(i32);

impl Year {
    pub fn new(year: i32) -> Option<Self> {
        (1000..=9999).contains(&year).then_some(Year(year))
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for Year {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Year::new(value).ok_or_else(|| format!("invalid year: {}", value))
    }
}

impl From<Year> for i32 {
    fn from(year: Year) -> Self {
        year.0
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consecutive-year transition used as the horizontal analysis key ("2022_2023")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearPair {
    pub from: Year,
    pub to: Year,
}

impl YearPair {
    pub fn new(from: Year, to: Year) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for YearPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.from, self.to)
    }
}

impl FromStr for YearPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once('_')
            .ok_or_else(|| format!("invalid year pair: {}", s))?;
        let parse = |part: &str| {
            part.parse::<i32>()
                .ok()
                .and_then(Year::new)
                .ok_or_else(|| format!("invalid year pair: {}", s))
        };
        Ok(YearPair::new(parse(from)?, parse(to)?))
    }
}

impl TryFrom<String> for YearPair {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearPair> for String {
    fn from(pair: YearPair) -> Self {
        pair.to_string()
    }
}

/// Signed values keyed by year, iterated in ascending year order
pub type YearSeries = BTreeMap<Year, Decimal>;

/// Horizontal analysis of one year transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizontalChange {
    pub abs: Decimal,
    /// `None` when the prior year is zero or absent
    pub perc: Option<Decimal>,
}

/// One referential code of one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementRow {
    pub statement: StatementKind,
    pub cod_cta_ref: String,
    /// Company accounts (COD_CTA) aggregated into this row, ascending
    pub account_codes: Vec<String>,
    pub description: String,
    /// Found in the official referential plan
    pub is_standard: bool,
    pub level: Option<u32>,
    pub account_kind: Option<String>,
    pub saldos: YearSeries,
    pub ah: BTreeMap<YearPair, HorizontalChange>,
    pub av: BTreeMap<Year, Option<Decimal>>,
}

impl StatementRow {
    pub fn new(statement: StatementKind, cod_cta_ref: impl Into<String>) -> Self {
        Self {
            statement,
            cod_cta_ref: cod_cta_ref.into(),
            account_codes: Vec::new(),
            description: String::new(),
            is_standard: false,
            level: None,
            account_kind: None,
            saldos: YearSeries::new(),
            ah: BTreeMap::new(),
            av: BTreeMap::new(),
        }
    }

    /// Whether `other` sits below this row in the referential hierarchy
    pub fn is_ancestor_of(&self, other: &str) -> bool {
        is_descendant(&self.cod_cta_ref, other)
    }
}

/// `code` sits below `ancestor` on a dot boundary ("1.01" is under "1")
pub fn is_descendant(ancestor: &str, code: &str) -> bool {
    code.len() > ancestor.len()
        && code.starts_with(ancestor)
        && code.as_bytes()[ancestor.len()] == b'.'
}

/// Ascending union of the years present in a set of rows
pub fn years_in(rows: &[StatementRow]) -> Vec<Year> {
    let mut years: Vec<Year> = rows
        .iter()
        .flat_map(|row| row.saldos.keys().copied())
        .collect();
    years.sort();
    years.dedup();
    years
}
