//! Horizontal (AH) and vertical (AV) analysis over statement rows
//!
//! All arithmetic keeps full `Decimal` precision. A percentage whose base is
//! zero or absent is left as `None` and reported once as a warning.

use itertools::Itertools;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

use super::{
    is_descendant, years_in, HorizontalChange, StatementRow, Year, YearPair, YearSeries,
};
use crate::error::ExtractionWarning;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Summary of an analysis pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisOutcome {
    pub warnings: Vec<ExtractionWarning>,
    pub null_ah: usize,
    pub null_av: usize,
}

/// Year-over-year change for each consecutive pair of the statement's years
///
/// A pair is produced when the row has a value in either year; a missing
/// value counts as zero for `abs`, and `perc` is `None` when the prior year
/// is absent or zero.
pub fn horizontal_analysis(
    saldos: &YearSeries,
    years: &[Year],
) -> BTreeMap<YearPair, HorizontalChange> {
    years
        .iter()
        .tuple_windows()
        .filter_map(|(prev_year, year)| {
            let prev = saldos.get(prev_year);
            let current = saldos.get(year);
            if prev.is_none() && current.is_none() {
                return None;
            }
            let abs = current.copied().unwrap_or_default() - prev.copied().unwrap_or_default();
            let perc = prev
                .filter(|p| !p.is_zero())
                .map(|p| abs / p.abs() * HUNDRED);
            Some((YearPair::new(*prev_year, *year), HorizontalChange { abs, perc }))
        })
        .collect()
}

/// Share of each year's value in the given base
pub fn vertical_analysis(
    saldos: &YearSeries,
    base: &BTreeMap<Year, Decimal>,
) -> BTreeMap<Year, Option<Decimal>> {
    saldos
        .iter()
        .map(|(year, value)| {
            let perc = base
                .get(year)
                .filter(|b| !b.is_zero())
                .map(|b| value / b * HUNDRED);
            (*year, perc)
        })
        .collect()
}

/// Base of the vertical analysis for each year
///
/// The statement-total row's values when that row is present; otherwise the
/// sum of the leaf rows under the total code. Rows outside the official plan
/// are part of the sum.
pub fn vertical_base(rows: &[StatementRow], total_code: &str) -> BTreeMap<Year, Decimal> {
    if let Some(total) = rows.iter().find(|r| r.cod_cta_ref == total_code) {
        return total.saldos.clone();
    }

    let mut base = BTreeMap::new();
    for row in rows.iter().filter(|r| is_descendant(total_code, &r.cod_cta_ref)) {
        let is_leaf = !rows.iter().any(|other| row.is_ancestor_of(&other.cod_cta_ref));
        if !is_leaf {
            continue;
        }
        for (year, value) in &row.saldos {
            *base.entry(*year).or_insert(Decimal::ZERO) += value;
        }
    }
    debug!(
        "Total row {} absent; vertical base summed from leaves ({} years)",
        total_code,
        base.len()
    );
    base
}

/// Fill `ah` on every row over the years present in the statement
pub fn apply_horizontal(rows: &mut [StatementRow], outcome: &mut AnalysisOutcome) {
    let years = years_in(rows);
    for row in rows.iter_mut() {
        row.ah = horizontal_analysis(&row.saldos, &years);
        for (pair, change) in &row.ah {
            if change.perc.is_none() {
                outcome.null_ah += 1;
                outcome.warnings.push(ExtractionWarning::DivisionBaseZero {
                    statement: row.statement,
                    cod_cta_ref: row.cod_cta_ref.clone(),
                    field: "ah_perc".to_string(),
                    year: pair.to,
                });
            }
        }
    }
}

/// Fill `av` on every row against the statement total
pub fn apply_vertical(rows: &mut [StatementRow], total_code: &str, outcome: &mut AnalysisOutcome) {
    let base = vertical_base(rows, total_code);
    for row in rows.iter_mut() {
        row.av = vertical_analysis(&row.saldos, &base);
        for (year, perc) in &row.av {
            if perc.is_none() {
                outcome.null_av += 1;
                outcome.warnings.push(ExtractionWarning::DivisionBaseZero {
                    statement: row.statement,
                    cod_cta_ref: row.cod_cta_ref.clone(),
                    field: "av_perc".to_string(),
                    year: *year,
                });
            }
        }
    }
}

/// Horizontal then vertical analysis of one statement's rows
pub fn apply_analysis(rows: &mut [StatementRow], total_code: &str) -> AnalysisOutcome {
    let mut outcome = AnalysisOutcome::default();
    apply_horizontal(rows, &mut outcome);
    apply_vertical(rows, total_code, &mut outcome);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statements::StatementKind;
    use rust_decimal_macros::dec;

    fn year(y: i32) -> Year {
        Year::new(y).unwrap()
    }

    fn row(code: &str, values: &[(i32, Decimal)]) -> StatementRow {
        let mut row = StatementRow::new(StatementKind::BalanceSheet, code);
        row.saldos = values.iter().map(|(y, v)| (year(*y), *v)).collect();
        row
    }

    fn pair(from: i32, to: i32) -> YearPair {
        YearPair::new(year(from), year(to))
    }

    #[test]
    fn test_total_assets_scenario() {
        let mut rows = vec![row("1", &[(2022, dec!(100000)), (2023, dec!(120000))])];
        let outcome = apply_analysis(&mut rows, "1");

        let change = &rows[0].ah[&pair(2022, 2023)];
        assert_eq!(change.abs, dec!(20000));
        assert_eq!(change.perc, Some(dec!(20)));
        assert_eq!(rows[0].av[&year(2022)], Some(dec!(100)));
        assert_eq!(rows[0].av[&year(2023)], Some(dec!(100)));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_single_year_has_no_horizontal_analysis() {
        let rows = row("1.01", &[(2023, dec!(10))]);
        assert!(horizontal_analysis(&rows.saldos, &[year(2023)]).is_empty());
    }

    #[test]
    fn test_zero_prior_year_gives_null_percentage() {
        let mut rows = vec![row("1", &[(2022, dec!(0)), (2023, dec!(500))])];
        let outcome = apply_analysis(&mut rows, "1");
        let change = &rows[0].ah[&pair(2022, 2023)];
        assert_eq!(change.abs, dec!(500));
        assert_eq!(change.perc, None);
        // the 2022 total is also the AV base
        assert_eq!(rows[0].av[&year(2022)], None);
        assert_eq!(outcome.null_ah, 1);
        assert_eq!(outcome.null_av, 1);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_negative_prior_year_uses_absolute_base() {
        let saldos: YearSeries = [(year(2022), dec!(-200)), (year(2023), dec!(-100))]
            .into_iter()
            .collect();
        let ah = horizontal_analysis(&saldos, &[year(2022), year(2023)]);
        assert_eq!(ah[&pair(2022, 2023)].abs, dec!(100));
        assert_eq!(ah[&pair(2022, 2023)].perc, Some(dec!(50)));
    }

    #[test]
    fn test_pairs_follow_the_statement_years() {
        let mut rows = vec![
            row("1.01", &[(2021, dec!(10)), (2023, dec!(30))]),
            row("1.02", &[(2021, dec!(5)), (2022, dec!(6)), (2023, dec!(8))]),
        ];
        let outcome = apply_analysis(&mut rows, "1");

        let gap = &rows[0].ah;
        assert_eq!(
            gap.keys().copied().collect::<Vec<_>>(),
            vec![pair(2021, 2022), pair(2022, 2023)]
        );
        assert_eq!(gap[&pair(2021, 2022)].abs, dec!(-10));
        assert_eq!(gap[&pair(2021, 2022)].perc, Some(dec!(-100)));
        assert_eq!(gap[&pair(2022, 2023)].abs, dec!(30));
        assert_eq!(gap[&pair(2022, 2023)].perc, None);
        assert_eq!(rows[1].ah[&pair(2022, 2023)].abs, dec!(2));
        assert_eq!(outcome.null_ah, 1);
        assert!(outcome.warnings.contains(&ExtractionWarning::DivisionBaseZero {
            statement: StatementKind::BalanceSheet,
            cod_cta_ref: "1.01".to_string(),
            field: "ah_perc".to_string(),
            year: year(2023),
        }));
    }

    #[test]
    fn test_pair_without_values_is_skipped() {
        let saldos: YearSeries = [(year(2023), dec!(7))].into_iter().collect();
        let ah = horizontal_analysis(&saldos, &[year(2021), year(2022), year(2023)]);
        assert_eq!(ah.keys().copied().collect::<Vec<_>>(), vec![pair(2022, 2023)]);
        assert_eq!(ah[&pair(2022, 2023)].perc, None);
    }

    #[test]
    fn test_vertical_base_from_leaves_when_total_absent() {
        let rows = vec![
            row("1.01", &[(2023, dec!(300))]),
            row("1.01.01", &[(2023, dec!(100))]),
            row("1.01.02", &[(2023, dec!(200))]),
            row("1.02", &[(2023, dec!(700))]),
            row("2.01", &[(2023, dec!(-1000))]),
        ];
        let base = vertical_base(&rows, "1");
        assert_eq!(base[&year(2023)], dec!(1000));

        let mut rows = rows;
        apply_analysis(&mut rows, "1");
        assert_eq!(rows[0].av[&year(2023)], Some(dec!(30)));
        assert_eq!(rows[3].av[&year(2023)], Some(dec!(70)));
        assert_eq!(rows[4].av[&year(2023)], Some(dec!(-100)));
    }

    #[test]
    fn test_year_missing_from_base_is_null() {
        let mut rows = vec![
            row("1", &[(2023, dec!(100))]),
            row("1.01", &[(2022, dec!(50)), (2023, dec!(100))]),
        ];
        let outcome = apply_analysis(&mut rows, "1");
        assert_eq!(rows[1].av[&year(2022)], None);
        assert_eq!(rows[1].av[&year(2023)], Some(dec!(100)));
        assert_eq!(outcome.null_av, 1);
    }
}
