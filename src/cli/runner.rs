use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use tracing::info;

use crate::cli::formatters::{format_files_table, format_statement_table, format_summary, to_json};
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::db;
use crate::pipeline::{ExtractionSummary, Extractor};
use crate::progress::ProgressEvent;
use crate::reference_plan::load_plan_csv;
use crate::statements::StatementKind;

/// Execute a parsed command line
pub fn run(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = Config::load(cli.config.as_deref())?;
    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => db::get_default_db_path()?,
    };
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }
    // Schema statements are idempotent
    db::init_database(Some(db_path.clone()))?;

    match cli.command {
        Commands::Init => {
            if cli.json {
                println!("{}", to_json(&serde_json::json!({ "database": db_path })));
            } else {
                println!("{} Database ready at {}", "✓".green().bold(), db_path.display());
            }
            Ok(())
        }
        Commands::SeedPlan { bp, dre } => seed_plan(&db_path, &bp, &dre, cli.json),
        Commands::Register { path, org } => {
            let extractor = Extractor::new(db_path, config)?;
            let registered = extractor.register_file(&path, org)?;
            if cli.json {
                println!("{}", to_json(&registered));
            } else if registered.duplicate {
                println!(
                    "{} Same content already registered as file {}",
                    "ℹ".blue().bold(),
                    registered.id
                );
            } else {
                println!("{} Registered as file {}", "✓".green().bold(), registered.id);
            }
            Ok(())
        }
        Commands::Files => {
            let conn = db::open_db(Some(db_path))?;
            let files = db::list_bookkeeping_files(&conn)?;
            if cli.json {
                println!("{}", to_json(&files));
            } else {
                print!("{}", format_files_table(&files));
            }
            Ok(())
        }
        Commands::Extract { id } => {
            let extractor = Extractor::new(db_path, config)?;
            let summary = extract_with_progress(&extractor, id, !cli.json)?;
            if cli.json {
                println!("{}", to_json(&summary));
            } else {
                print!("{}", format_summary(&summary));
            }
            Ok(())
        }
        Commands::Results { id, statement } => {
            let extractor = Extractor::new(db_path, config)?;
            let results = extractor.get_results(id)?;
            if cli.json {
                println!("{}", to_json(&results));
                return Ok(());
            }
            let kinds = match statement {
                Some(arg) => vec![StatementKind::from(arg)],
                None => vec![StatementKind::BalanceSheet, StatementKind::IncomeStatement],
            };
            for kind in kinds {
                print!("{}", format_statement_table(kind, results.rows(kind)));
            }
            Ok(())
        }
        Commands::Export {
            id,
            statement,
            format,
            output,
        } => {
            let extractor = Extractor::new(db_path, config)?;
            let bytes = extractor.export_statement(id, statement.into(), format.into())?;
            write_output(&output, &bytes)?;
            if cli.json {
                println!(
                    "{}",
                    to_json(&serde_json::json!({ "output": output, "bytes": bytes.len() }))
                );
            } else {
                println!(
                    "{} Exported {} to {}",
                    "✓".green().bold(),
                    StatementKind::from(statement),
                    output.display()
                );
            }
            Ok(())
        }
        Commands::Delete { id } => {
            let extractor = Extractor::new(db_path, config)?;
            extractor.delete_file(id)?;
            if cli.json {
                println!("{}", to_json(&serde_json::json!({ "deleted": id })));
            } else {
                println!("{} Deleted file {}", "✓".green().bold(), id);
            }
            Ok(())
        }
    }
}

fn seed_plan(db_path: &Path, bp: &Path, dre: &Path, json: bool) -> Result<()> {
    let mut entries = load_plan_csv(bp, StatementKind::BalanceSheet)?;
    let bp_count = entries.len();
    entries.extend(load_plan_csv(dre, StatementKind::IncomeStatement)?);
    let dre_count = entries.len() - bp_count;

    let mut conn = db::open_db(Some(db_path.to_path_buf()))?;
    db::replace_reference_plan(&mut conn, &entries)?;

    if json {
        println!(
            "{}",
            to_json(&serde_json::json!({ "bp": bp_count, "dre": dre_count }))
        );
    } else {
        println!(
            "{} Reference plan loaded: {} BP and {} DRE accounts",
            "✓".green().bold(),
            bp_count,
            dre_count
        );
    }
    Ok(())
}

/// Run an extraction, rendering its progress events on a bar
fn extract_with_progress(extractor: &Extractor, id: i64, show_bar: bool) -> Result<ExtractionSummary> {
    let (tx, rx) = mpsc::channel::<ProgressEvent>();

    let bar = if show_bar {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
                .context("Invalid progress template")?
                .progress_chars("█▓░"),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let drain_bar = bar.clone();
    let result = thread::scope(|scope| {
        scope.spawn(move || {
            for event in rx {
                drain_bar.set_position(event.percent as u64);
                drain_bar.set_message(event.message);
            }
        });
        let result = extractor.start_extraction(id, &tx);
        // Closing the channel ends the drain loop before the scope joins
        drop(tx);
        result
    });
    bar.finish_and_clear();

    let summary = result?;
    info!("Extraction of file {} finished", id);
    Ok(summary)
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))
}
