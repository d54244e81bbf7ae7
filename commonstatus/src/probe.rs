//! Probe orchestration
//!
//! One [`Probe`] is one request against one target: fetch the status page,
//! scan it line by line and collect the result into a fresh [`MetricSet`]
//! that lives exactly as long as the probe's response. A probe moves through
//! [`Phase::Started`], [`Phase::Fetching`], [`Phase::Scanning`] and ends in
//! [`Phase::Completed`], or in [`Phase::Failed`] if the target could not be
//! fetched. Per-line conversion failures never fail a probe, they are counted.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use commonstatus_convert::{
    Dispatcher, MetricRecord, MetricSet, convert,
    exposition::{self, parser::Validator},
};
use reqwest::StatusCode;
use tracing::{debug, error, info, trace};

use crate::telemetry::Lifetime;

#[derive(thiserror::Error, Debug)]
/// Errors produced while fetching a target
pub enum Error {
    /// The target could not be reached in time.
    #[error("failed to connect to the host {target}: {source}")]
    Connect {
        /// The probed target
        target: String,
        /// The underlying client error
        #[source]
        source: reqwest::Error,
    },
    /// The target answered with another status than `200 OK`.
    #[error("HTTP response status code from {target} is not 200: {status}")]
    Status {
        /// The probed target
        target: String,
        /// The status received
        status: StatusCode,
    },
    /// The response body could not be read in time.
    #[error("failed to read the response body of {target}: {source}")]
    Body {
        /// The probed target
        target: String,
        /// The underlying client error
        #[source]
        source: reqwest::Error,
    },
}

/// Names of the metrics a probe reports about itself. A status page may not
/// use them.
pub const SELF_METRICS: [&str; 4] = [
    "converted_metrics",
    "failed_metrics",
    "probe_duration_seconds",
    "up",
];

// Why a status page line produced no metrics
#[derive(thiserror::Error, Debug)]
enum Refused {
    #[error("{0} is reserved for the probe's own metrics")]
    Reserved(String),
    #[error(transparent)]
    Convert(#[from] convert::Error),
    #[error(transparent)]
    Collision(#[from] exposition::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle of a [`Probe`]
pub enum Phase {
    /// Created, nothing done yet
    Started,
    /// Waiting for the target's status page
    Fetching,
    /// Converting the status page line by line
    Scanning,
    /// Every line was scanned and the result is ready
    Completed,
    /// The target could not be fetched
    Failed,
}

impl Phase {
    /// Whether a probe may move from `self` to `next`
    #[must_use]
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Started, Phase::Fetching)
                | (Phase::Fetching, Phase::Scanning)
                | (Phase::Scanning, Phase::Completed)
                | (
                    Phase::Started | Phase::Fetching | Phase::Scanning,
                    Phase::Failed
                )
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Summary of a finished probe
pub struct Outcome {
    /// Lines turned into metrics, directly or by conversion
    pub converted: u64,
    /// Lines no converter accepted
    pub failed: u64,
    /// Wall time from probe creation to completion
    pub duration: Duration,
    /// Whether the target was fetched
    pub success: bool,
}

#[derive(Debug)]
/// Everything a finished probe produced
pub struct Report {
    /// The metrics to expose for this probe
    pub metrics: MetricSet,
    /// Counts and timing
    pub outcome: Outcome,
    /// Why the probe failed, if it did
    pub error: Option<Error>,
}

#[derive(Debug)]
/// A single probe of one target
pub struct Probe {
    target: String,
    timeout: Duration,
    started: Instant,
    now: DateTime<Utc>,
    phase: Phase,
}

impl Probe {
    /// Create a new [`Probe`] of `target`, giving up on the fetch after
    /// `timeout`.
    ///
    /// The probe's clocks start here: its duration and the wall-clock time
    /// derived metrics are relative to are both taken now.
    #[must_use]
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
            started: Instant::now(),
            now: Utc::now(),
            phase: Phase::Started,
        }
    }

    /// The current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal probe transition {:?} -> {next:?}",
            self.phase
        );
        trace!("probe {}: {:?} -> {next:?}", self.target, self.phase);
        self.phase = next;
    }

    /// Run this [`Probe`] to completion
    ///
    /// The outcome is also counted in `lifetime`. A probe never errors as a
    /// whole; a fetch failure is reported in [`Report::error`] and leaves only
    /// `up 0` in the metrics.
    pub async fn run(mut self, client: &reqwest::Client, lifetime: &Lifetime) -> Report {
        self.advance(Phase::Fetching);
        let body = match self.fetch(client).await {
            Ok(body) => body,
            Err(error) => {
                info!("{error}");
                self.advance(Phase::Failed);
                let duration = self.started.elapsed();
                lifetime.record_failure(duration);

                return Report {
                    metrics: MetricSet::from(up(false)),
                    outcome: Outcome {
                        converted: 0,
                        failed: 0,
                        duration,
                        success: false,
                    },
                    error: Some(error),
                };
            }
        };

        self.advance(Phase::Scanning);
        let mut metrics = MetricSet::new();
        let (converted, failed) = scan(&body, &Dispatcher::new(self.now), &mut metrics);

        let duration = self.started.elapsed();
        let own = vec![
            MetricRecord::gauge(
                "converted_metrics",
                "The number of CommonStatus metrics converted to prometheus metrics",
                converted as f64,
            ),
            MetricRecord::gauge(
                "failed_metrics",
                "The number of CommonStatus metrics failed to convert to prometheus metrics",
                failed as f64,
            ),
            MetricRecord::gauge(
                "probe_duration_seconds",
                "Duration of the probe in seconds",
                duration.as_secs_f64(),
            ),
            up(true),
        ];
        if let Err(e) = metrics.push_all(own) {
            error!("probe of {}: own metrics refused: {e}", self.target);
        }
        lifetime.record_success(duration);
        self.advance(Phase::Completed);

        info!(
            "probe of {} succeeded in {:.2} s, converted_metrics={converted} failed_metrics={failed}",
            self.target,
            duration.as_secs_f64()
        );
        Report {
            metrics,
            outcome: Outcome {
                converted,
                failed,
                duration,
                success: true,
            },
            error: None,
        }
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<String, Error> {
        let response = client
            .get(&self.target)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| Error::Connect {
                target: self.target.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Status {
                target: self.target.clone(),
                status,
            });
        }

        response.text().await.map_err(|source| Error::Body {
            target: self.target.clone(),
            source,
        })
    }
}

fn up(success: bool) -> MetricRecord {
    MetricRecord::gauge(
        "up",
        "Was talking to application successful",
        if success { 1.0 } else { 0.0 },
    )
}

/// Convert every line of a status page into `sink`, returning how many lines
/// were converted and how many failed.
///
/// A line that already is an exposition sample is taken as is. Any other line
/// goes through `dispatcher`. Blank lines and `#` comments count as neither.
/// A line fails if its metrics use one of [`SELF_METRICS`] or collide with
/// metrics of an earlier line.
pub fn scan(body: &str, dispatcher: &Dispatcher, sink: &mut MetricSet) -> (u64, u64) {
    let mut validator = Validator::new();
    let mut converted = 0;
    let mut failed = 0;

    for line in body.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        debug!("received a new line: {line}");

        let admitted = match validator.validate(line) {
            None => continue,
            Some(Ok(sample)) => {
                trace!("line is a valid sample, taking it as is: {line}");
                admit(sink, vec![sample.into_record()])
            }
            Some(Err(e)) if line.trim_start().starts_with('#') => {
                debug!("skipping malformed comment line ({e}): {line}");
                continue;
            }
            Some(Err(e)) => {
                trace!("line is not a valid sample ({e}), converting it: {line}");
                dispatcher
                    .convert(line)
                    .map_err(Refused::from)
                    .and_then(|records| admit(sink, records))
            }
        };

        match admitted {
            Ok(produced) => {
                converted += 1;
                debug!("converted line into {produced} metrics: {line}");
            }
            Err(e) => {
                failed += 1;
                debug!("failed to convert line: {e}");
            }
        }
    }

    (converted, failed)
}

fn admit(sink: &mut MetricSet, records: Vec<MetricRecord>) -> Result<usize, Refused> {
    if let Some(record) = records.iter().find(|r| SELF_METRICS.contains(&r.name())) {
        return Err(Refused::Reserved(record.name().to_string()));
    }
    Ok(sink.push_all(records)?)
}
