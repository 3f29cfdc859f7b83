pub mod connection;
pub mod measurement;
pub mod quota;
pub mod report;

pub use connection::{Connection, ConnectionId, StoredCredentials};
pub use measurement::MeasurementResult;
pub use quota::{usage_percentage, QuotaSnapshot};
pub use report::{CheckMode, Report, ReportFormat, ReportRow};
