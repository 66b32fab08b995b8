//! Observability for the classroom coordinator.
//!
//! - [`metrics`]: Prometheus metrics via the `metrics` facade
//! - [`TelemetrySink`]: fire-and-forget UI analytics, backed in production
//!   by [`metrics::MetricsTelemetry`]

pub mod metrics;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Width of the timestamp buckets attached to telemetry events.
pub const TIMESTAMP_BUCKET_SECONDS: i64 = 15;

/// Who and where a telemetry event came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dimensions {
    pub class_id: Option<String>,
    pub class_name: String,
    pub class_acronym: String,
    pub instructor_id: String,
    pub is_instructor: bool,
    pub participant_id: String,
    pub session_remote_user_id: Option<u32>,
    pub user_name: String,
    /// Unix seconds rounded down to a [`TIMESTAMP_BUCKET_SECONDS`] boundary.
    pub ts: i64,
}

/// Receives UI analytics. Implementations must never fail or block.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &str, value: f64, percentage: f64, dimensions: &Dimensions);
}

/// Clamp a percentage into 0-100. NaN becomes 0.
#[must_use]
pub fn clamp_percentage(percentage: f64) -> f64 {
    if percentage.is_nan() {
        0.0
    } else {
        percentage.clamp(0.0, 100.0)
    }
}

#[must_use]
pub fn timestamp_bucket(now: DateTime<Utc>) -> i64 {
    let secs = now.timestamp();
    secs - secs.rem_euclid(TIMESTAMP_BUCKET_SECONDS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clamp_percentage() {
        assert!((clamp_percentage(-5.0) - 0.0).abs() < f64::EPSILON);
        assert!((clamp_percentage(42.5) - 42.5).abs() < f64::EPSILON);
        assert!((clamp_percentage(250.0) - 100.0).abs() < f64::EPSILON);
        assert!((clamp_percentage(f64::NAN) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timestamp_bucket_rounds_down() {
        let at = |s| Utc.timestamp_opt(s, 0).unwrap();
        assert_eq!(timestamp_bucket(at(1_700_000_000)), 1_699_999_995);
        assert_eq!(timestamp_bucket(at(1_700_000_010)), 1_700_000_010);
        assert_eq!(timestamp_bucket(at(1_700_000_024)), 1_700_000_010);
    }
}
