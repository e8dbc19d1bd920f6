// Import module - SPED ECD parser

pub mod ecd;
pub mod encoding;
pub mod ledger;
pub mod values;

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

use crate::error::ExtractionError;
use crate::utils::Deadline;

pub use ecd::parse_ecd;
pub use encoding::DetectedEncoding;
pub use ledger::{
    Account, AccountBalance, AccountType, DebitCredit, FileHeader, JournalEntry, JournalItem,
    ParseStats, ParsedLedger, ReferentialMapping, ResultBalance,
};

/// Parse an ECD file from disk
pub fn parse_ecd_file<P: AsRef<Path>>(
    path: P,
    deadline: &Deadline,
) -> Result<ParsedLedger, ExtractionError> {
    let path = path.as_ref();
    info!("Parsing ECD file: {:?}", path);

    let file = File::open(path).map_err(|e| {
        ExtractionError::StructuralParse(format!("cannot open {}: {}", path.display(), e))
    })?;
    parse_ecd(BufReader::new(file), deadline)
}

/// Read only the opening record (0000) of a file, for registration
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<FileHeader> {
    use std::io::BufRead;

    let path = path.as_ref();
    let file = File::open(path).map_err(|e| anyhow!("cannot open {}: {}", path.display(), e))?;
    let mut reader = BufReader::new(file);
    let mut decoder = encoding::LineDecoder::new();
    let mut buf = Vec::new();

    while reader.read_until(b'\n', &mut buf)? > 0 {
        let line = decoder.decode(&buf).into_owned();
        buf.clear();
        if line.trim().is_empty() {
            continue;
        }
        if !line.trim_start().starts_with("|0000|") {
            break;
        }
        return ecd::parse_header_line(&line)
            .map_err(|reason| anyhow!("invalid 0000 record in {}: {}", path.display(), reason));
    }

    Err(anyhow!(
        "{} does not start with a 0000 record",
        path.display()
    ))
}
