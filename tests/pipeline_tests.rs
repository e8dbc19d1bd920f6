
use anyhow::Result;
use demonstra::config::Config;
use demonstra::db;
use demonstra::export::ExportFormat;
use demonstra::progress::ProgressEvent;
use demonstra::statements::{years_in, StatementKind, StatementRow, Year, YearPair};
use demonstra::{ExtractionError, ExtractionWarning};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlite_helpers::{count_files, file_status, TestEnv};
use std::path::PathBuf;
use std::sync::mpsc;

fn year(y: i32) -> Year {
    Year::new(y).unwrap()
}

fn pair(from: i32, to: i32) -> YearPair {
    YearPair::new(year(from), year(to))
}

fn stored_path(env: &TestEnv, id: i64) -> Result<PathBuf> {
    let file = db::get_bookkeeping_file(&env.conn()?, id)?
        .ok_or_else(|| anyhow::anyhow!("file {} missing", id))?;
    Ok(PathBuf::from(file.file_path))
}

fn row<'a>(rows: &'a [StatementRow], code: &str) -> &'a StatementRow {
    rows.iter()
        .find(|r| r.cod_cta_ref == code)
        .unwrap_or_else(|| panic!("row {} missing", code))
}

#[test]
fn test_extraction_builds_both_statements() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;

    let summary = extractor.start_extraction(id, &())?;
    assert_eq!(summary.file_id, id);
    assert_eq!(summary.bp_row_count, 4);
    assert_eq!(summary.dre_row_count, 2);
    assert_eq!(summary.metadata.company, "EMPRESA DEMONSTRA LTDA");
    assert_eq!(summary.metadata.cnpj, "12345678000190");
    assert_eq!(summary.metadata.years, vec![year(2022), year(2023)]);
    assert_eq!(summary.metadata.periods.len(), 2);

    let results = extractor.get_results(id)?;
    assert_eq!(results.metadata.bp_count, 4);
    assert_eq!(results.metadata.dre_count, 2);

    let caixa = row(&results.bp, "1.01.01.01.01");
    assert_eq!(caixa.description, "Caixa");
    assert!(caixa.is_standard);
    assert_eq!(caixa.account_codes, vec!["1.1.01".to_string()]);
    assert_eq!(caixa.saldos[&year(2022)], dec!(40000));
    assert_eq!(caixa.saldos[&year(2023)], dec!(50000));

    let (status, error) = file_status(&env.conn()?, id)?;
    assert_eq!(status, "completed");
    assert_eq!(error, None);
    Ok(())
}

#[test]
fn test_asset_total_horizontal_and_vertical() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    extractor.start_extraction(id, &())?;
    let results = extractor.get_results(id)?;

    // No row maps to "1": the base is the sum of the asset leaves (100000 / 120000)
    let assets: Vec<&StatementRow> = results
        .bp
        .iter()
        .filter(|r| r.cod_cta_ref.starts_with("1."))
        .collect();
    for y in [2022, 2023] {
        let total: Decimal = assets.iter().map(|r| r.saldos[&year(y)]).sum();
        let av: Decimal = assets.iter().filter_map(|r| r.av[&year(y)]).sum();
        assert_eq!(total, if y == 2022 { dec!(100000) } else { dec!(120000) });
        assert_eq!(av.round_dp(10), dec!(100));
    }

    let caixa = row(&results.bp, "1.01.01.01.01");
    let change = &caixa.ah[&pair(2022, 2023)];
    assert_eq!(change.abs, dec!(10000));
    assert_eq!(change.perc, Some(dec!(25)));
    assert_eq!(caixa.av[&year(2022)], Some(dec!(40)));

    let fornecedores = row(&results.bp, "2.01.01.03.01");
    assert_eq!(fornecedores.saldos[&year(2022)], dec!(-30000));
    assert_eq!(fornecedores.ah[&pair(2022, 2023)].abs, dec!(-5000));
    Ok(())
}

#[test]
fn test_income_statement_signs() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    let summary = extractor.start_extraction(id, &())?;
    let results = extractor.get_results(id)?;

    let revenue = row(&results.dre, "3.01.01.01.01");
    assert_eq!(revenue.saldos[&year(2023)], dec!(50000));
    assert_eq!(revenue.description, "Venda de Produtos");

    let expenses = row(&results.dre, "3.11.01.01.01");
    assert_eq!(expenses.saldos[&year(2023)], dec!(-30000));
    assert!(!expenses.is_standard);
    assert_eq!(expenses.description, "Despesas Gerais");

    assert!(summary.warnings.contains(&ExtractionWarning::ReferenceNotFound {
        statement: StatementKind::IncomeStatement,
        cod_cta_ref: "3.11.01.01.01".to_string(),
    }));
    Ok(())
}

#[test]
fn test_zero_prior_year_leaves_percentage_empty() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    let summary = extractor.start_extraction(id, &())?;
    let results = extractor.get_results(id)?;

    let bancos = row(&results.bp, "1.01.01.02.01");
    let change = &bancos.ah[&pair(2022, 2023)];
    assert_eq!(change.abs, dec!(10000));
    assert_eq!(change.perc, None);
    assert_eq!(bancos.av[&year(2022)], Some(Decimal::ZERO));

    assert!(summary.warnings.contains(&ExtractionWarning::DivisionBaseZero {
        statement: StatementKind::BalanceSheet,
        cod_cta_ref: "1.01.01.02.01".to_string(),
        field: "ah_perc".to_string(),
        year: year(2023),
    }));
    Ok(())
}

#[test]
fn test_every_year_is_covered() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    extractor.start_extraction(id, &())?;
    let results = extractor.get_results(id)?;

    for rows in [&results.bp, &results.dre] {
        let pairs: Vec<YearPair> = years_in(rows)
            .windows(2)
            .map(|w| YearPair::new(w[0], w[1]))
            .collect();
        for r in rows.iter() {
            let years: Vec<Year> = r.saldos.keys().copied().collect();
            assert_eq!(r.av.keys().copied().collect::<Vec<_>>(), years);
            assert!(r.ah.keys().all(|p| pairs.contains(p)));
            if years.len() > 1 {
                assert_eq!(r.ah.len(), pairs.len());
            }
        }
    }
    Ok(())
}

#[test]
fn test_single_year_file_has_no_horizontal_analysis() -> Result<()> {
    let env = TestEnv::new()?;
    let text = "|0000|LECD|01012023|31122023|UM ANO LTDA|11.111.111/0001-11|RJ||3304557|\n\
                |I050|01012023|01|A|3|1.1.01|1.1|Caixa|\n|I051||1.01.01.01.01|\n\
                |I150|01122023|31122023|\n|I155|1.1.01||0|D|500,00|0|500,00|D|\n";
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.write_ecd("single.txt", text)?)?;
    let summary = extractor.start_extraction(id, &())?;
    assert_eq!(summary.metadata.years, vec![year(2023)]);

    let results = extractor.get_results(id)?;
    let caixa = row(&results.bp, "1.01.01.01.01");
    assert!(caixa.ah.is_empty());
    assert_eq!(caixa.av[&year(2023)], Some(dec!(100)));
    assert!(results.dre.is_empty());
    Ok(())
}

#[test]
fn test_rerun_replaces_previous_output() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;

    extractor.start_extraction(id, &())?;
    let first = extractor.get_results(id)?;
    let conn = env.conn()?;
    let ledger_counts: Vec<i64> = ["chart_of_accounts", "account_balances", "journal_items"]
        .iter()
        .map(|t| db::count_ledger_rows(&conn, id, t))
        .collect::<Result<_>>()?;

    extractor.start_extraction(id, &())?;
    let second = extractor.get_results(id)?;

    assert_eq!(first.bp, second.bp);
    assert_eq!(first.dre, second.dre);
    assert_eq!(db::count_statement_rows(&conn, id)?, (4, 2));
    let again: Vec<i64> = ["chart_of_accounts", "account_balances", "journal_items"]
        .iter()
        .map(|t| db::count_ledger_rows(&conn, id, t))
        .collect::<Result<_>>()?;
    assert_eq!(ledger_counts, again);
    assert_eq!(ledger_counts, vec![6, 8, 4]);
    Ok(())
}

#[test]
fn test_stored_journal_is_balanced() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    extractor.start_extraction(id, &())?;

    let conn = env.conn()?;
    assert_eq!(db::count_ledger_rows(&conn, id, "journal_entries")?, 2);
    assert!(db::find_unbalanced_entries(&conn, id)?.is_empty());
    Ok(())
}

#[test]
fn test_unbalanced_entry_is_reported() -> Result<()> {
    let env = TestEnv::new()?;
    let text = "|0000|LECD|01012023|31122023|EMPRESA|11.111.111/0001-11|RJ||3304557|\n\
                |I050|01012023|01|A|3|1.1.01|1.1|Caixa|\n|I051||1.01.01.01.01|\n\
                |I150|01122023|31122023|\n|I155|1.1.01||0|D|500,00|0|500,00|D|\n\
                |I200|7|10022023|500,00|N|\n|I250|1.1.01||500,00|D|||Ajuste|\n\
                |I250|1.1.01||450,00|C|||Ajuste|\n";
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.write_ecd("unbalanced.txt", text)?)?;
    let summary = extractor.start_extraction(id, &())?;

    assert!(summary
        .warnings
        .iter()
        .any(|w| matches!(w, ExtractionWarning::RecordParse { record, .. } if record == "I200")));
    assert_eq!(db::find_unbalanced_entries(&env.conn()?, id)?, vec!["7".to_string()]);
    Ok(())
}

#[test]
fn test_delete_removes_everything() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let path = env.copy_fixture("ecd.txt")?;
    let id = env.register(&extractor, &path)?;
    extractor.start_extraction(id, &())?;
    let stored = stored_path(&env, id)?;

    extractor.delete_file(id)?;

    let conn = env.conn()?;
    assert_eq!(db::count_statement_rows(&conn, id)?, (0, 0));
    assert_eq!(count_files(&conn)?, 0);
    assert_eq!(db::count_ledger_rows(&conn, id, "chart_of_accounts")?, 0);
    assert!(!stored.exists());
    assert!(path.exists());
    assert!(matches!(
        extractor.get_results(id),
        Err(ExtractionError::FileNotFound(found)) if found == id
    ));
    assert!(matches!(
        extractor.delete_file(id),
        Err(ExtractionError::FileNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_results_before_extraction_are_not_processed() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;

    assert!(matches!(
        extractor.get_results(id),
        Err(ExtractionError::NotProcessed(_))
    ));
    assert!(matches!(
        extractor.export_statement(id, StatementKind::BalanceSheet, ExportFormat::Csv),
        Err(ExtractionError::NotProcessed(_))
    ));
    assert!(matches!(
        extractor.start_extraction(9999, &()),
        Err(ExtractionError::FileNotFound(9999))
    ));
    Ok(())
}

#[test]
fn test_structural_error_marks_file_failed() -> Result<()> {
    let env = TestEnv::new()?;
    let text = "|0000|LECD|01012023|31122023|SEM PLANO|11.111.111/0001-11|RJ||3304557|\n\
                |I150|01122023|31122023|\n";
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.write_ecd("broken.txt", text)?)?;

    let err = extractor.start_extraction(id, &()).unwrap_err();
    assert!(matches!(err, ExtractionError::StructuralParse(_)));

    let (status, message) = file_status(&env.conn()?, id)?;
    assert_eq!(status, "failed");
    assert!(message.unwrap_or_default().contains("I050"));
    assert!(matches!(
        extractor.get_results(id),
        Err(ExtractionError::NotProcessed(_))
    ));
    Ok(())
}

#[test]
fn test_file_claimed_elsewhere_is_rejected() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    assert!(db::claim_for_processing(&env.conn()?, id, None)?);

    assert!(matches!(
        extractor.start_extraction(id, &()),
        Err(ExtractionError::InvalidState { .. })
    ));
    Ok(())
}

#[test]
fn test_abandoned_processing_run_is_taken_over() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    let conn = env.conn()?;
    assert!(db::claim_for_processing(&conn, id, None)?);
    conn.execute(
        "UPDATE bookkeeping_files SET updated_at = '2000-01-01 00:00:00' WHERE id = ?1",
        [id],
    )?;

    // without a timeout nothing is ever considered abandoned
    assert!(!db::claim_for_processing(&conn, id, None)?);

    let summary = extractor.start_extraction(id, &())?;
    assert_eq!(summary.bp_row_count, 4);
    assert_eq!(file_status(&conn, id)?.0, "completed");
    Ok(())
}

#[test]
fn test_zero_batch_size_is_rejected() -> Result<()> {
    let env = TestEnv::new()?;
    let result = env.extractor_with(Config {
        batch_size: 0,
        ..Config::default()
    });
    let err = result.err().expect("batch_size 0 should be refused");
    assert!(err.to_string().contains("batch_size"));
    Ok(())
}

#[test]
fn test_registered_source_survives_delete() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let source = env.copy_fixture("export_da_contabilidade.txt")?;
    let id = env.register(&extractor, &source)?;

    let stored = stored_path(&env, id)?;
    assert_ne!(stored, source);
    assert!(stored.starts_with(extractor.uploads_dir()));
    assert_eq!(std::fs::read(&stored)?, std::fs::read(&source)?);

    extractor.delete_file(id)?;
    assert!(source.exists());
    assert!(!stored.exists());
    Ok(())
}

#[test]
fn test_duplicate_registration_reuses_record() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let first = extractor.register_file(&env.copy_fixture("a.txt")?, 1)?;
    let second = extractor.register_file(&env.copy_fixture("b.txt")?, 1)?;
    let other_org = extractor.register_file(&env.copy_fixture("c.txt")?, 2)?;

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.id, second.id);
    assert_ne!(first.id, other_org.id);
    Ok(())
}

#[test]
fn test_progress_events_are_ordered() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;

    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    extractor.start_extraction(id, &tx)?;
    drop(tx);

    let percents: Vec<u8> = rx.iter().map(|e| e.percent).collect();
    assert_eq!(percents, vec![5, 10, 40, 50, 60, 70, 80, 90, 95, 100]);
    Ok(())
}

#[test]
fn test_warning_list_is_capped() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor_with(Config {
        max_warnings: 1,
        ..Config::default()
    })?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    let summary = extractor.start_extraction(id, &())?;

    assert_eq!(summary.warnings.len(), 1);
    assert!(summary.warning_count >= 2);
    Ok(())
}

#[test]
fn test_concurrent_extractions() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let first = env.register(&extractor, &env.copy_fixture("a.txt")?)?;
    let text = std::fs::read_to_string(sqlite_helpers::ECD_FIXTURE)?
        .replace("EMPRESA DEMONSTRA LTDA", "OUTRA EMPRESA SA");
    let second = env.register(&extractor, &env.write_ecd("b.txt", &text)?)?;

    std::thread::scope(|scope| {
        let handles: Vec<_> = [first, second, first]
            .into_iter()
            .map(|id| {
                let extractor = &extractor;
                scope.spawn(move || extractor.start_extraction(id, &()))
            })
            .collect();
        for handle in handles {
            let summary = handle.join().unwrap().unwrap();
            assert_eq!(summary.bp_row_count, 4);
        }
    });

    let conn = env.conn()?;
    assert_eq!(db::count_statement_rows(&conn, first)?, (4, 2));
    assert_eq!(db::count_statement_rows(&conn, second)?, (4, 2));
    assert_eq!(extractor.get_results(second)?.bp, extractor.get_results(first)?.bp);
    Ok(())
}

#[test]
fn test_export_bp_csv() -> Result<()> {
    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    extractor.start_extraction(id, &())?;

    let bytes = extractor.export_statement(id, StatementKind::BalanceSheet, ExportFormat::Csv)?;
    let text = String::from_utf8(bytes)?;
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 5);
    assert_eq!(
        lines[0],
        "Código;Cód. Referencial;Descrição;Padrão RFB;2022;2023;AH 2022-2023 (R$);AH 2022-2023 (%);AV 2022 (%);AV 2023 (%)"
    );
    assert_eq!(
        lines[1],
        "1.1.01;1.01.01.01.01;Caixa;Sim;40000.00;50000.00;10000.00;25.00;40.00;41.67"
    );
    assert_eq!(
        lines[2],
        "1.1.02;1.01.01.02.01;Bancos Conta Movimento;Sim;0.00;10000.00;10000.00;;0.00;8.33"
    );
    Ok(())
}

#[test]
fn test_export_dre_xlsx() -> Result<()> {
    use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
    use std::io::Cursor;

    let env = TestEnv::new()?;
    let extractor = env.extractor()?;
    let id = env.register(&extractor, &env.copy_fixture("ecd.txt")?)?;
    extractor.start_extraction(id, &())?;

    let bytes =
        extractor.export_statement(id, StatementKind::IncomeStatement, ExportFormat::Xlsx)?;
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;
    let range = workbook.worksheet_range("DRE")?;

    assert_eq!(range.height(), 3);
    assert_eq!(
        range.get((0, 1)),
        Some(&Data::String("Cód. Referencial".to_string()))
    );
    assert_eq!(
        range.get((1, 1)),
        Some(&Data::String("3.01.01.01.01".to_string()))
    );
    assert_eq!(range.get((1, 5)), Some(&Data::Float(50000.0)));
    assert_eq!(range.get((2, 3)), Some(&Data::String("Não".to_string())));
    assert_eq!(range.get((2, 5)), Some(&Data::Float(-30000.0)));
    Ok(())
}
