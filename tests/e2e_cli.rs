use assert_cmd::{cargo, prelude::*};
use predicates::prelude::*;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn setup_temp_home() -> TempDir {
    TempDir::new().expect("failed to create temp home")
}

fn base_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("demonstra"));
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("DEMONSTRA_DB")
        .env_remove("DEMONSTRA_TIMEOUT_SECS")
        .arg("--no-color");
    cmd
}

fn seed_and_register(home: &TempDir) -> PathBuf {
    base_cmd(home)
        .arg("seed-plan")
        .arg("tests/fixtures/plano_referencial_bp.csv")
        .arg("tests/fixtures/plano_referencial_dre.csv")
        .assert()
        .success()
        .stdout(predicate::str::contains("8 BP and 2 DRE"));

    let ecd = home.path().join("ecd.txt");
    std::fs::copy("tests/fixtures/ecd_2022_2023.txt", &ecd).expect("failed to copy fixture");
    base_cmd(home)
        .arg("register")
        .arg(&ecd)
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered as file 1"));
    ecd
}

#[test]
fn files_on_empty_db_shows_hint_without_ansi() {
    let home = setup_temp_home();

    base_cmd(&home)
        .arg("files")
        .assert()
        .success()
        .stdout(predicate::str::contains("No files registered"))
        .stdout(predicate::str::contains("\u{001b}[").not());

    assert!(home.path().join(".demonstra").join("data.db").exists());
}

#[test]
fn extract_then_show_results() {
    let home = setup_temp_home();
    seed_and_register(&home);

    base_cmd(&home)
        .arg("extract")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("Extraction complete for file 1"))
        .stdout(predicate::str::contains("EMPRESA DEMONSTRA LTDA"))
        .stdout(predicate::str::contains("2022, 2023"));

    base_cmd(&home)
        .arg("results")
        .arg("1")
        .arg("--statement")
        .arg("bp")
        .assert()
        .success()
        .stdout(predicate::str::contains("Balanço Patrimonial"))
        .stdout(predicate::str::contains("1.01.01.01.01"))
        .stdout(predicate::str::contains("50.000,00"))
        .stdout(predicate::str::contains("25,00%"))
        .stdout(predicate::str::contains("\u{001b}[").not());

    base_cmd(&home)
        .arg("files")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));
}

#[test]
fn extract_json_summary() {
    let home = setup_temp_home();
    seed_and_register(&home);

    let output = base_cmd(&home)
        .arg("--json")
        .arg("extract")
        .arg("1")
        .output()
        .expect("failed to run extract");
    assert!(output.status.success());

    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(summary["bp_row_count"], 4);
    assert_eq!(summary["dre_row_count"], 2);
    assert_eq!(summary["metadata"]["cnpj"], "12345678000190");
    assert_eq!(summary["metadata"]["years"], serde_json::json!([2022, 2023]));
}

#[test]
fn export_csv_to_file() {
    let home = setup_temp_home();
    seed_and_register(&home);
    base_cmd(&home).arg("extract").arg("1").assert().success();

    let out = home.path().join("exports").join("dre.csv");
    base_cmd(&home)
        .arg("export")
        .arg("1")
        .arg("--statement")
        .arg("dre")
        .arg("--format")
        .arg("csv")
        .arg("-o")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported DRE"));

    let text = std::fs::read_to_string(&out).expect("export should exist");
    assert!(text.starts_with("Código;Cód. Referencial;Descrição;Padrão RFB;2022;2023"));
    assert!(text.contains("3.1.01;3.01.01.01.01;Venda de Produtos;Sim;40000.00;50000.00"));
    assert!(text.contains("3.2.01;3.11.01.01.01;Despesas Gerais;Não"));
}

#[test]
fn results_before_extract_fail() {
    let home = setup_temp_home();
    seed_and_register(&home);

    base_cmd(&home)
        .arg("results")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("has not been processed yet"));
}

#[test]
fn delete_then_results_reports_not_found() {
    let home = setup_temp_home();
    let ecd = seed_and_register(&home);
    base_cmd(&home).arg("extract").arg("1").assert().success();

    base_cmd(&home)
        .arg("delete")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted file 1"));
    assert!(ecd.exists());
    let uploads = home.path().join(".demonstra").join("uploads").join("1");
    assert_eq!(std::fs::read_dir(&uploads).map(|d| d.count()).unwrap_or(0), 0);

    base_cmd(&home)
        .arg("results")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("bookkeeping file 1 not found"));
}

#[test]
fn register_rejects_non_ecd_file() {
    let home = setup_temp_home();
    let bogus = home.path().join("notes.txt");
    std::fs::write(&bogus, "just some text\n").expect("failed to write file");

    base_cmd(&home)
        .arg("register")
        .arg(&bogus)
        .assert()
        .failure()
        .stderr(predicate::str::contains("0000"));
}

#[test]
fn invalid_config_is_reported() {
    let home = setup_temp_home();
    let config = home.path().join("demonstra.toml");
    std::fs::write(&config, "batch_size = 0\n").expect("failed to write config");

    base_cmd(&home)
        .arg("--config")
        .arg(&config)
        .arg("files")
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch_size"));
}
