//! Metrics definitions for the classroom coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `classroom_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: event wire codes (~40 values) or UI action names (~20 values)
//! - `outcome`: success, not_found, error
//! - `view`: group, instructor, spotlight
//! - `state`: stopped, paused, playing
//!
//! Per-user identifiers never become labels.

use super::{clamp_percentage, Dimensions, TelemetrySink};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::trace;

/// Initialize the Prometheus metrics recorder and return its handle.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Directory lookups are remote calls made while joining
        .set_buckets_for_metric(
            Matcher::Prefix("classroom_directory".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500],
        )
        .map_err(|e| format!("Failed to set directory lookup buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("classroom_join".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set join duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Event bus
// ============================================================================

/// Metric: `classroom_bus_events_total`, labels: `event`
pub fn record_bus_publish(event: &'static str) {
    counter!("classroom_bus_events_total", "event" => event).increment(1);
}

/// Metric: `classroom_bus_listener_failures_total`, labels: `event`
pub fn record_listener_failure(event: &'static str) {
    counter!("classroom_bus_listener_failures_total", "event" => event).increment(1);
}

/// Metric: `classroom_payload_rejected_total`, labels: `event`
pub fn record_payload_rejected(event: &'static str) {
    counter!("classroom_payload_rejected_total", "event" => event).increment(1);
}

// ============================================================================
// Coordinator lifecycle
// ============================================================================

/// Metric: `classroom_join_duration_seconds`, labels: `outcome`
pub fn record_join(outcome: &'static str, duration: Duration) {
    histogram!("classroom_join_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Metric: `classroom_directory_lookup_seconds`, labels: `outcome`
pub fn record_directory_lookup(outcome: &'static str, duration: Duration) {
    histogram!("classroom_directory_lookup_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Metric: `classroom_participants_joined`
pub fn set_participants_joined(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("classroom_participants_joined").set(count as f64);
}

/// Metric: `classroom_view_switches_total`, labels: `view`
pub fn record_view_switch(view: &'static str) {
    counter!("classroom_view_switches_total", "view" => view).increment(1);
}

/// Metric: `classroom_layout_recomputes_total`
pub fn record_layout_recompute() {
    counter!("classroom_layout_recomputes_total").increment(1);
}

// ============================================================================
// Active speaker / music
// ============================================================================

/// Metric: `classroom_active_speakers`
pub fn set_active_speakers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("classroom_active_speakers").set(count as f64);
}

/// Metric: `classroom_music_transitions_total`, labels: `state`
pub fn record_music_transition(state: &'static str) {
    counter!("classroom_music_transitions_total", "state" => state).increment(1);
}

// ============================================================================
// UI telemetry
// ============================================================================

/// Telemetry sink that reports UI actions as metrics.
///
/// Dimensions carry per-user identifiers, so they are only logged at trace
/// level and never attached as labels.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsTelemetry;

impl TelemetrySink for MetricsTelemetry {
    fn record(&self, event: &str, value: f64, percentage: f64, dimensions: &Dimensions) {
        let percentage = clamp_percentage(percentage);
        counter!("classroom_ui_events_total", "event" => event.to_string()).increment(1);
        gauge!("classroom_ui_event_value", "event" => event.to_string()).set(value);
        trace!(
            target: "classroom.telemetry",
            event,
            value,
            percentage,
            class_acronym = %dimensions.class_acronym,
            participant_id = %dimensions.participant_id,
            is_instructor = dimensions.is_instructor,
            ts = dimensions.ts,
            "UI event"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These execute the recording functions against the global no-op
    // recorder; values are checked with a local DebuggingRecorder below.

    #[test]
    fn test_record_functions_without_recorder() {
        record_bus_publish("MMA");
        record_listener_failure("MMA");
        record_payload_rejected("CV");
        record_join("success", Duration::from_millis(120));
        record_directory_lookup("not_found", Duration::from_millis(3));
        set_participants_joined(3);
        record_view_switch("spotlight");
        record_layout_recompute();
        set_active_speakers(1);
        record_music_transition("playing");
    }

    #[test]
    fn test_metrics_telemetry_counts_ui_events() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let sink = MetricsTelemetry;
            let dims = Dimensions::default();
            sink.record("toggle_mic", 1.0, 0.0, &dims);
            sink.record("toggle_mic", 0.0, 0.0, &dims);
            sink.record("music_volume", 30.0, 130.0, &dims);
        });

        let metrics = snapshotter.snapshot().into_vec();
        let toggles = metrics.iter().find_map(|(key, _, _, value)| {
            let is_toggle = key.key().name() == "classroom_ui_events_total"
                && key.key().labels().any(|l| l.value() == "toggle_mic");
            match (is_toggle, value) {
                (true, DebugValue::Counter(n)) => Some(*n),
                _ => None,
            }
        });
        assert_eq!(toggles, Some(2));

        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "classroom_ui_event_value"));
    }

    #[test]
    fn test_bus_counters_use_event_label() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_bus_publish("MicOn");
            record_bus_publish("MicOn");
            record_listener_failure("MicOn");
        });

        let metrics = snapshotter.snapshot().into_vec();
        let published = metrics.iter().find_map(|(key, _, _, value)| {
            match (key.key().name() == "classroom_bus_events_total", value) {
                (true, DebugValue::Counter(n)) => Some(*n),
                _ => None,
            }
        });
        assert_eq!(published, Some(2));
    }
}
