use super::ReportError;
use crate::models::{
    CheckMode, Connection, ConnectionId, MeasurementResult, QuotaSnapshot, Report, ReportRow,
};
use chrono::Utc;
use std::collections::HashMap;

/// Join each connection with its latest snapshot and measurement.
///
/// Rows follow connection order and every connection gets one, even with
/// nothing on record. Halves the check mode did not ask for are left empty.
pub fn aggregate(
    connections: &[Connection],
    snapshots: &HashMap<ConnectionId, QuotaSnapshot>,
    measurements: &HashMap<ConnectionId, MeasurementResult>,
    mode: CheckMode,
) -> Result<Report, ReportError> {
    if connections.is_empty() {
        return Err(ReportError::NoConnections);
    }

    let rows = connections
        .iter()
        .map(|connection| ReportRow {
            connection_id: connection.id,
            line_number: connection.line_number.clone(),
            name: connection.name.clone(),
            provider: connection.provider.clone(),
            description: connection.description.clone(),
            quota: mode
                .includes_quota()
                .then(|| snapshots.get(&connection.id).cloned())
                .flatten(),
            measurement: mode
                .includes_speed()
                .then(|| measurements.get(&connection.id).cloned())
                .flatten(),
        })
        .collect();

    Ok(Report {
        generated_at: Utc::now(),
        mode,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredCredentials;
    use std::net::{IpAddr, Ipv4Addr};

    fn connection(id: ConnectionId) -> Connection {
        Connection {
            id,
            line_number: format!("0{id}"),
            name: format!("line-{id}"),
            description: String::new(),
            provider: "we".to_string(),
            egress_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            credentials: StoredCredentials {
                username: String::new(),
                password: String::new(),
            },
        }
    }

    fn measurement(id: ConnectionId) -> MeasurementResult {
        MeasurementResult {
            connection_id: id,
            latency_ms: 9.0,
            download_mbps: 40.0,
            upload_mbps: 8.0,
            public_address: "198.51.100.1".to_string(),
            isp: None,
            endpoint_id: "1".to_string(),
            endpoint_name: "Cairo".to_string(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_rows_for_every_connection_in_order() {
        // Five lines, scrambled ids: 3 and 9 lack a snapshot, 4 lacks a measurement.
        let connections: Vec<Connection> = [7, 3, 9, 1, 4].into_iter().map(connection).collect();
        let snapshots: HashMap<_, _> = [7, 1, 4]
            .into_iter()
            .map(|id| (id, QuotaSnapshot::new(id, 10.0, 90.0)))
            .collect();
        let measurements: HashMap<_, _> = [7, 3, 9, 1]
            .into_iter()
            .map(|id| (id, measurement(id)))
            .collect();

        let report = aggregate(&connections, &snapshots, &measurements, CheckMode::Full).unwrap();

        let ids: Vec<_> = report.rows.iter().map(|r| r.connection_id).collect();
        assert_eq!(ids, vec![7, 3, 9, 1, 4]);
        assert!(report.rows[1].quota.is_none());
        assert!(report.rows[2].quota.is_none());
        assert!(report.rows[4].measurement.is_none());
        assert_eq!(report.rows[4].quota.as_ref().unwrap().used, 10.0);
        assert!(report.rows[0].quota.is_some() && report.rows[0].measurement.is_some());
    }

    #[test]
    fn test_connection_with_nothing_on_record() {
        let report = aggregate(
            &[connection(1)],
            &HashMap::new(),
            &HashMap::new(),
            CheckMode::Full,
        )
        .unwrap();
        assert_eq!(report.rows.len(), 1);
        assert!(report.rows[0].quota.is_none());
        assert!(report.rows[0].measurement.is_none());
    }

    #[test]
    fn test_check_mode_masks_unrequested_half() {
        let connections = vec![connection(1)];
        let snapshots = HashMap::from([(1, QuotaSnapshot::new(1, 1.0, 1.0))]);
        let measurements = HashMap::from([(1, measurement(1))]);

        let speed = aggregate(&connections, &snapshots, &measurements, CheckMode::SpeedTestOnly)
            .unwrap();
        assert!(speed.rows[0].quota.is_none());
        assert!(speed.rows[0].measurement.is_some());

        let quota = aggregate(&connections, &snapshots, &measurements, CheckMode::QuotaCheckOnly)
            .unwrap();
        assert!(quota.rows[0].quota.is_some());
        assert!(quota.rows[0].measurement.is_none());
    }

    #[test]
    fn test_no_connections() {
        assert!(matches!(
            aggregate(&[], &HashMap::new(), &HashMap::new(), CheckMode::Full),
            Err(ReportError::NoConnections)
        ));
    }
}
