use super::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one end-to-end speed measurement for a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementResult {
    pub connection_id: ConnectionId,
    /// Minimum probe round trip, milliseconds.
    pub latency_ms: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    /// Public address the measurement service saw the traffic come from.
    pub public_address: String,
    /// ISP name as reported by the measurement service.
    #[serde(default)]
    pub isp: Option<String>,
    pub endpoint_id: String,
    #[serde(default)]
    pub endpoint_name: String,
    pub captured_at: DateTime<Utc>,
}
