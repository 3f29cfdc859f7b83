use super::ConnectionId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time read of the usage, balance and renewal figures a provider
/// portal reports for one connection. Snapshots are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaSnapshot {
    pub connection_id: ConnectionId,
    /// Data used in the current period, GB.
    pub used: f64,
    /// Data left in the current period, GB.
    pub remaining: f64,
    /// `used / (used + remaining)` as a percentage in `[0, 100]`.
    pub usage_percentage: f64,
    pub balance: Option<f64>,
    pub renewal_date: Option<NaiveDate>,
    pub days_to_renewal: Option<i64>,
    pub renewal_cost: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl QuotaSnapshot {
    pub fn new(connection_id: ConnectionId, used: f64, remaining: f64) -> Self {
        Self {
            connection_id,
            used,
            remaining,
            usage_percentage: usage_percentage(used, remaining),
            balance: None,
            renewal_date: None,
            days_to_renewal: None,
            renewal_cost: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = Some(balance);
        self
    }

    /// Record the renewal date and derive the days left from the capture time.
    pub fn with_renewal(mut self, renewal_date: NaiveDate, renewal_cost: Option<f64>) -> Self {
        self.days_to_renewal =
            Some((renewal_date - self.captured_at.date_naive()).num_days());
        self.renewal_date = Some(renewal_date);
        self.renewal_cost = renewal_cost;
        self
    }

    /// Override the derived day count when the portal states it explicitly.
    pub fn with_days_to_renewal(mut self, days: i64) -> Self {
        self.days_to_renewal = Some(days);
        self
    }

    pub fn captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        if let Some(date) = self.renewal_date {
            self.days_to_renewal = Some((date - captured_at.date_naive()).num_days());
        }
        self
    }
}

/// Share of the quota consumed, clamped to `[0, 100]`. An empty quota
/// (`used + remaining == 0`) reports 0.
pub fn usage_percentage(used: f64, remaining: f64) -> f64 {
    let total = used + remaining;
    if !total.is_finite() || total <= 0.0 {
        return 0.0;
    }
    let pct = used / total * 100.0;
    if pct.is_nan() {
        0.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_usage_percentage() {
        assert_eq!(usage_percentage(25.0, 75.0), 25.0);
        assert_eq!(usage_percentage(140.0, 0.0), 100.0);
        assert_eq!(usage_percentage(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_usage_percentage_clamps_inconsistent_figures() {
        // Portals occasionally report overage as negative remaining.
        assert_eq!(usage_percentage(120.0, -20.0), 100.0);
        assert_eq!(usage_percentage(-5.0, 50.0), 0.0);
    }

    #[test]
    fn test_renewal_days_follow_capture_date() {
        let captured = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let snapshot = QuotaSnapshot::new(1, 10.0, 90.0)
            .captured_at(captured)
            .with_renewal(NaiveDate::from_ymd_opt(2024, 3, 25).unwrap(), Some(350.0));

        assert_eq!(snapshot.days_to_renewal, Some(15));
        assert_eq!(snapshot.renewal_cost, Some(350.0));
        assert_eq!(snapshot.usage_percentage, 10.0);
    }
}
