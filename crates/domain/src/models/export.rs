//! Export history and download token domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of an export artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Processing,
    Completed,
    Failed,
    Archived,
    Deleted,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Processing => "processing",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
            ExportStatus::Archived => "archived",
            ExportStatus::Deleted => "deleted",
        }
    }

    /// Statuses from which an export may be archived.
    pub const ARCHIVABLE: [ExportStatus; 2] = [ExportStatus::Completed, ExportStatus::Failed];

    /// Statuses from which an export may be deleted.
    pub const DELETABLE: [ExportStatus; 4] = [
        ExportStatus::Processing,
        ExportStatus::Completed,
        ExportStatus::Failed,
        ExportStatus::Archived,
    ];
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "processing" => Ok(ExportStatus::Processing),
            "completed" => Ok(ExportStatus::Completed),
            "failed" => Ok(ExportStatus::Failed),
            "archived" => Ok(ExportStatus::Archived),
            "deleted" => Ok(ExportStatus::Deleted),
            _ => Err(format!("Unknown export status: {}", s)),
        }
    }
}

/// Export file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Excel,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "excel",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "xlsx",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// A recorded export artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub format: ExportFormat,
    pub status: ExportStatus,
    /// Path relative to the export storage root.
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportRecord {
    pub fn file_name(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .map(|p| p.rsplit('/').next().unwrap_or(p))
    }
}

/// Input for registering a new export.
#[derive(Debug, Clone)]
pub struct NewExport {
    pub user_id: Uuid,
    pub format: ExportFormat,
}

/// A persisted download capability. Only the token hash is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadToken {
    pub id: Uuid,
    pub export_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub download_count: i32,
    pub first_downloaded_at: Option<DateTime<Utc>>,
    pub last_downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DownloadToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Returned once when a download is issued. The raw token is never stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedDownload {
    pub download_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Filter for listing exports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExportsQuery {
    pub status: Option<ExportStatus>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

/// Request payload for bulk archive/delete.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkExportRequest {
    #[validate(length(min = 1, max = 100, message = "Between 1 and 100 export ids are required"))]
    pub export_ids: Vec<Uuid>,
}

/// Outcome of a bulk operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExportResponse {
    pub requested: usize,
    pub affected: usize,
}

/// Response payload for export records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub id: Uuid,
    pub format: ExportFormat,
    pub status: ExportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ExportRecord> for ExportResponse {
    fn from(r: ExportRecord) -> Self {
        Self {
            file_name: r.file_name().map(str::to_string),
            id: r.id,
            format: r.format,
            status: r.status,
            file_size: r.file_size,
            error: r.error_message,
            created_at: r.created_at,
            completed_at: r.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: Option<&str>) -> ExportRecord {
        let now = Utc::now();
        ExportRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            format: ExportFormat::Csv,
            status: ExportStatus::Completed,
            file_path: path.map(str::to_string),
            file_size: Some(42),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    #[test]
    fn test_export_status_parse_and_display() {
        for status in [
            ExportStatus::Processing,
            ExportStatus::Completed,
            ExportStatus::Failed,
            ExportStatus::Archived,
            ExportStatus::Deleted,
        ] {
            assert_eq!(status.to_string().parse::<ExportStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ExportStatus>().is_err());
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("XLSX".parse::<ExportFormat>().unwrap(), ExportFormat::Excel);
        assert_eq!(ExportFormat::Excel.extension(), "xlsx");
        assert_eq!(ExportFormat::default(), ExportFormat::Json);
    }

    #[test]
    fn test_file_name_from_path() {
        assert_eq!(
            record(Some("user/2025/report.csv")).file_name(),
            Some("report.csv")
        );
        assert_eq!(record(Some("report.csv")).file_name(), Some("report.csv"));
        assert_eq!(record(None).file_name(), None);
    }

    #[test]
    fn test_export_response_hides_path() {
        let response = ExportResponse::from(record(Some("u1/report.csv")));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["fileName"], "report.csv");
        assert!(json.get("filePath").is_none());
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn test_bulk_request_validation() {
        let empty = BulkExportRequest { export_ids: vec![] };
        assert!(empty.validate().is_err());

        let ok = BulkExportRequest {
            export_ids: vec![Uuid::new_v4()],
        };
        assert!(ok.validate().is_ok());

        let too_many = BulkExportRequest {
            export_ids: (0..101).map(|_| Uuid::new_v4()).collect(),
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_download_token_expiry() {
        let now = Utc::now();
        let token = DownloadToken {
            id: Uuid::new_v4(),
            export_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "h".into(),
            expires_at: now + chrono::Duration::hours(1),
            download_count: 0,
            first_downloaded_at: None,
            last_downloaded_at: None,
            created_at: now,
        };
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + chrono::Duration::hours(1)));
    }
}
