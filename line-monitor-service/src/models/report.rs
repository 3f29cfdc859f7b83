use super::{ConnectionId, MeasurementResult, QuotaSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    #[default]
    Full,
    SpeedTestOnly,
    QuotaCheckOnly,
}

impl CheckMode {
    pub fn includes_quota(self) -> bool {
        matches!(self, CheckMode::Full | CheckMode::QuotaCheckOnly)
    }

    pub fn includes_speed(self) -> bool {
        matches!(self, CheckMode::Full | CheckMode::SpeedTestOnly)
    }
}

impl std::fmt::Display for CheckMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckMode::Full => write!(f, "full"),
            CheckMode::SpeedTestOnly => write!(f, "speed_test_only"),
            CheckMode::QuotaCheckOnly => write!(f, "quota_check_only"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Html,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// One connection joined with its most recent snapshot and measurement.
/// Absent halves stay `None`; they are never defaulted to zero.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportRow {
    pub connection_id: ConnectionId,
    pub line_number: String,
    pub name: String,
    pub provider: String,
    pub description: String,
    pub quota: Option<QuotaSnapshot>,
    pub measurement: Option<MeasurementResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub mode: CheckMode,
    pub rows: Vec<ReportRow>,
}
