use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::export::ExportFormat;
use crate::statements::StatementKind;

pub mod formatters;
pub mod runner;

#[derive(Parser)]
#[command(name = "demonstra")]
#[command(
    version,
    about = "Balance sheet and income statement extraction from SPED ECD files"
)]
#[command(
    long_about = "Parse SPED ECD bookkeeping files, map company accounts onto the official referential chart and build multi-year Balance Sheet (BP) and Income Statement (DRE) with horizontal and vertical analysis."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Config file (defaults to <config dir>/demonstra/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database schema
    Init,

    /// Load the official referential plan from its BP and DRE sheets (CSV)
    SeedPlan {
        /// CSV with COD_CTA_REF and DESCRIÇÃO columns for the balance sheet
        bp: PathBuf,

        /// CSV with COD_CTA_REF and DESCRIÇÃO columns for the income statement
        dre: PathBuf,
    },

    /// Register an ECD file for extraction
    Register {
        /// Path to the SPED ECD text file
        path: PathBuf,

        /// Owning organization id
        #[arg(long, default_value_t = 1)]
        org: i64,
    },

    /// List registered files and their status
    Files,

    /// Run the extraction pipeline for a registered file
    Extract {
        /// File id (see `files`)
        id: i64,
    },

    /// Show the stored statements of a processed file
    Results {
        /// File id
        id: i64,

        /// Only one statement
        #[arg(long, value_enum)]
        statement: Option<StatementArg>,
    },

    /// Export one statement as XLSX or CSV
    Export {
        /// File id
        id: i64,

        /// Statement to export
        #[arg(long, value_enum)]
        statement: StatementArg,

        /// Output format
        #[arg(long, value_enum, default_value_t = FormatArg::Xlsx)]
        format: FormatArg,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Delete a file, its statements and its stored bytes
    Delete {
        /// File id
        id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatementArg {
    Bp,
    Dre,
}

impl From<StatementArg> for StatementKind {
    fn from(arg: StatementArg) -> Self {
        match arg {
            StatementArg::Bp => StatementKind::BalanceSheet,
            StatementArg::Dre => StatementKind::IncomeStatement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Xlsx,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Xlsx => ExportFormat::Xlsx,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}
