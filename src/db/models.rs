use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SPED bookkeeping layouts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FileType {
    Ecd, // Escrituração Contábil Digital
    Ecf, // Escrituração Contábil Fiscal
    Efd, // Escrituração Fiscal Digital
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Ecd => "ECD",
            FileType::Ecf => "ECF",
            FileType::Efd => "EFD",
        }
    }
}

impl FromStr for FileType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ECD" | "LECD" => Ok(FileType::Ecd),
            "ECF" | "LECF" => Ok(FileType::Ecf),
            "EFD" => Ok(FileType::Efd),
            _ => Err(()),
        }
    }
}

/// Processing state of a bookkeeping file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            _ => Err(()),
        }
    }
}

/// An uploaded SPED file and its processing state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookkeepingFile {
    pub id: i64,
    pub organization_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub file_hash: String, // blake3 of the raw bytes
    pub file_type: FileType,
    pub cnpj: Option<String>,
    pub company_name: Option<String>,
    pub state_code: Option<String>,
    pub city_code: Option<String>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub total_records: i64,
    pub processed_records: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields known at registration time
#[derive(Debug, Clone)]
pub struct NewBookkeepingFile {
    pub organization_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub file_hash: String,
    pub file_type: FileType,
    pub cnpj: Option<String>,
    pub company_name: Option<String>,
    pub state_code: Option<String>,
    pub city_code: Option<String>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            FileStatus::Pending,
            FileStatus::Processing,
            FileStatus::Completed,
            FileStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<FileStatus>(), Ok(status));
        }
        assert!("done".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_file_type_accepts_layout_names() {
        assert_eq!("LECD".parse::<FileType>(), Ok(FileType::Ecd));
        assert_eq!("efd".parse::<FileType>(), Ok(FileType::Efd));
    }
}
