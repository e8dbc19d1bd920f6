//! Aggregation of company balances into referential statement rows
//!
//! Every company balance is resolved to the referential code of its account
//! (I051 mapping for the balance's cost center), signed according to the
//! statement and its D/C nature, and summed per code and year.

use chrono::Datelike;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::{StatementKind, StatementRow, Year, YearSeries};
use crate::error::ExtractionWarning;
use crate::importers::{DebitCredit, ParsedLedger};
use crate::reference_plan::ReferencePlan;

/// Borrowed inputs shared by both statement builders
#[derive(Debug, Clone, Copy)]
pub struct AggregationInput<'a> {
    pub ledger: &'a ParsedLedger,
    pub plan: &'a ReferencePlan,
}

impl<'a> AggregationInput<'a> {
    pub fn new(ledger: &'a ParsedLedger, plan: &'a ReferencePlan) -> Self {
        Self { ledger, plan }
    }
}

/// One signed contribution before grouping
struct Sample<'a> {
    account_code: &'a str,
    cost_center: Option<&'a str>,
    year: i32,
    amount: Decimal,
    dc: DebitCredit,
}

#[derive(Default)]
struct Accumulator {
    accounts: BTreeSet<String>,
    saldos: YearSeries,
}

/// Sign a value for presentation in a statement
///
/// BP keeps debit balances positive (assets) and negates credit balances;
/// DRE keeps credits positive (revenue) and negates debits (expenses).
pub fn signed_value(statement: StatementKind, amount: Decimal, dc: DebitCredit) -> Decimal {
    match (statement, dc) {
        (StatementKind::BalanceSheet, DebitCredit::Debit) => amount,
        (StatementKind::BalanceSheet, DebitCredit::Credit) => -amount,
        (StatementKind::IncomeStatement, DebitCredit::Debit) => -amount,
        (StatementKind::IncomeStatement, DebitCredit::Credit) => amount,
    }
}

/// BP rows from year-end (December) closing balances of codes under 1 and 2
pub fn aggregate_balance_sheet(input: AggregationInput) -> (Vec<StatementRow>, Vec<ExtractionWarning>) {
    let samples = input
        .ledger
        .balances
        .iter()
        .filter(|b| b.is_year_end())
        .map(|b| Sample {
            account_code: &b.account_code,
            cost_center: b.cost_center.as_deref(),
            year: b.period_end.year(),
            amount: b.closing,
            dc: b.closing_dc,
        });
    aggregate(input, StatementKind::BalanceSheet, samples)
}

/// DRE rows from result balances before closing (I355) of codes under 3
pub fn aggregate_income_statement(
    input: AggregationInput,
) -> (Vec<StatementRow>, Vec<ExtractionWarning>) {
    let samples = input.ledger.result_balances.iter().map(|r| Sample {
        account_code: &r.account_code,
        cost_center: r.cost_center.as_deref(),
        year: r.result_date.year(),
        amount: r.amount,
        dc: r.dc,
    });
    aggregate(input, StatementKind::IncomeStatement, samples)
}

fn aggregate<'a>(
    input: AggregationInput<'a>,
    statement: StatementKind,
    samples: impl Iterator<Item = Sample<'a>>,
) -> (Vec<StatementRow>, Vec<ExtractionWarning>) {
    let mut groups: BTreeMap<String, Accumulator> = BTreeMap::new();
    let mut unmapped = 0usize;

    for sample in samples {
        let Some(account) = input.ledger.account(sample.account_code) else {
            continue;
        };
        let Some(cod_cta_ref) = account.referential_code(sample.cost_center) else {
            unmapped += 1;
            continue;
        };
        if !statement.accepts_code(cod_cta_ref) {
            continue;
        }
        let Some(year) = Year::new(sample.year) else {
            continue;
        };

        let group = groups.entry(cod_cta_ref.to_string()).or_default();
        group.accounts.insert(account.code.clone());
        *group.saldos.entry(year).or_insert(Decimal::ZERO) +=
            signed_value(statement, sample.amount, sample.dc);
    }

    if unmapped > 0 {
        debug!("{}: {} balances without referential mapping ignored", statement, unmapped);
    }

    let mut warnings = Vec::new();
    let rows: Vec<StatementRow> = groups
        .into_iter()
        .map(|(cod_cta_ref, group)| {
            let mut row = StatementRow::new(statement, cod_cta_ref);
            row.account_codes = group.accounts.into_iter().collect();
            row.saldos = group.saldos;

            match input.plan.lookup(statement, &row.cod_cta_ref) {
                Some(entry) => {
                    row.description = entry.description.clone();
                    row.is_standard = true;
                    row.level = Some(entry.level);
                    row.account_kind = Some(entry.account_kind.clone());
                }
                None => {
                    row.description = row
                        .account_codes
                        .first()
                        .and_then(|code| input.ledger.account(code))
                        .map(|account| account.name.clone())
                        .unwrap_or_default();
                    warnings.push(ExtractionWarning::ReferenceNotFound {
                        statement,
                        cod_cta_ref: row.cod_cta_ref.clone(),
                    });
                }
            }
            row
        })
        .collect();

    info!(
        "{}: aggregated {} rows ({} non-standard)",
        statement,
        rows.len(),
        warnings.len()
    );
    (rows, warnings)
}
