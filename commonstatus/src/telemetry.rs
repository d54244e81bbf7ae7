//! Process lifetime self-observability
//!
//! Counts probes over the life of the process. The recorder is owned by
//! [`Lifetime`] and never installed globally; handles are registered against
//! it once and shared by every probe.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use commonstatus_convert::{MetricRecord, MetricSet};
use metrics::{Counter, counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Successful probes
pub const PROBE_SUCCESS_TOTAL: &str = "probe_success_total";
/// Failed probes, rejected probe requests included
pub const PROBE_FAILURE_TOTAL: &str = "probe_failure_total";
/// Cumulative probe duration in seconds
pub const PROBE_SECONDS_TOTAL: &str = "probe_seconds_total";

/// Lifetime probe counters and their exposition
#[derive(Clone)]
pub struct Lifetime {
    success: Counter,
    failure: Counter,
    // f64 bits; `metrics` counters only count whole units
    seconds: Arc<AtomicU64>,
    handle: PrometheusHandle,
}

impl Lifetime {
    /// Create a new [`Lifetime`] with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        let (success, failure) = metrics::with_local_recorder(&recorder, || {
            describe_counter!(PROBE_SUCCESS_TOTAL, "Displays count of successful probes");
            describe_counter!(PROBE_FAILURE_TOTAL, "Displays count of failed probes");
            (counter!(PROBE_SUCCESS_TOTAL), counter!(PROBE_FAILURE_TOTAL))
        });
        // Register the series so they are exposed before the first probe.
        success.increment(0);
        failure.increment(0);

        Self {
            success,
            failure,
            seconds: Arc::new(AtomicU64::new(0f64.to_bits())),
            handle,
        }
    }

    /// Count one successful probe that took `elapsed`.
    pub fn record_success(&self, elapsed: Duration) {
        trace!("lifetime: probe succeeded after {elapsed:?}");
        self.success.increment(1);
        self.add_seconds(elapsed);
    }

    /// Count one failed probe that took `elapsed`.
    pub fn record_failure(&self, elapsed: Duration) {
        trace!("lifetime: probe failed after {elapsed:?}");
        self.failure.increment(1);
        self.add_seconds(elapsed);
    }

    fn add_seconds(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let mut current = self.seconds.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + secs).to_bits();
            match self.seconds.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Cumulative duration of every counted probe, in seconds
    #[must_use]
    pub fn seconds(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::Relaxed))
    }

    /// Render the lifetime counters in the text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = self.handle.render();
        if !rendered.is_empty() && !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        let seconds = MetricRecord::counter(
            PROBE_SECONDS_TOTAL,
            "Displays total duration of all probes",
            self.seconds(),
        );
        rendered.push_str(&MetricSet::from(seconds).encode());
        rendered
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rendered: &str, name: &str) -> Option<f64> {
        rendered.lines().find_map(|line| {
            let (metric, value) = line.split_once(' ')?;
            (metric == name).then(|| value.trim().parse().ok()).flatten()
        })
    }

    #[test]
    fn fresh_counters_render_at_zero() {
        let lifetime = Lifetime::new();
        let rendered = lifetime.render();
        assert_eq!(sample(&rendered, PROBE_SUCCESS_TOTAL), Some(0.0));
        assert_eq!(sample(&rendered, PROBE_FAILURE_TOTAL), Some(0.0));
        assert_eq!(sample(&rendered, PROBE_SECONDS_TOTAL), Some(0.0));
        assert!(rendered.contains("# HELP probe_failure_total Displays count of failed probes"));
    }

    #[test]
    fn seconds_total_is_a_counter() {
        let lifetime = Lifetime::new();
        lifetime.record_success(Duration::from_millis(1500));

        let rendered = lifetime.render();
        assert!(
            rendered.contains("# TYPE probe_seconds_total counter\nprobe_seconds_total 1.5\n"),
            "{rendered}"
        );
        assert!(!rendered.contains("gauge"), "{rendered}");
        assert_eq!(rendered.matches("# TYPE probe_seconds_total").count(), 1);
    }

    #[test]
    fn outcomes_accumulate() {
        let lifetime = Lifetime::new();
        lifetime.record_success(Duration::from_millis(500));
        lifetime.record_success(Duration::from_millis(250));
        lifetime.record_failure(Duration::from_millis(250));

        let rendered = lifetime.render();
        assert_eq!(sample(&rendered, PROBE_SUCCESS_TOTAL), Some(2.0));
        assert_eq!(sample(&rendered, PROBE_FAILURE_TOTAL), Some(1.0));
        assert_eq!(sample(&rendered, PROBE_SECONDS_TOTAL), Some(1.0));
    }

    #[test]
    fn instances_are_independent() {
        let a = Lifetime::new();
        let b = Lifetime::new();
        a.record_failure(Duration::from_secs(1));
        assert_eq!(sample(&b.render(), PROBE_FAILURE_TOTAL), Some(0.0));
    }

    #[test]
    fn clones_share_counters() {
        let a = Lifetime::new();
        let b = a.clone();
        b.record_success(Duration::ZERO);
        assert_eq!(sample(&a.render(), PROBE_SUCCESS_TOTAL), Some(1.0));
    }
}
