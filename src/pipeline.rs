/// Batch fetch pipeline: one full pass over a state's ZIP codes.
///
/// For each ZIP code, and for each configured data kind in order:
/// 1. Fetch the tuple from AirNow (paced by the shared rate limiter)
/// 2. Normalize each returned item into an `ObservationRecord`
/// 3. Drop pollutants outside the parameter filter
/// 4. Append the rows to the CSV sink
///
/// HTTP-level failures only cost the tuple its rows. Transport failures are
/// handled according to `TransportErrorPolicy`.

use crate::ingest::airnow::{AirNowClient, FetchError, FetchOutcome};
use crate::ingest::normalize::normalize;
use crate::model::{DataKind, ZipCode};
use crate::ratelimit::RateLimiter;
use crate::sink::{CsvSink, SinkError};
use log::{error, info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use threadpool::ThreadPool;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What a transport-level failure (DNS, refused/reset connection, timeout)
/// does to the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorPolicy {
    /// Log it, count it, and continue with the next tuple.
    #[default]
    Skip,
    /// Stop the run; rows already written stay on disk.
    Abort,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Data kinds fetched for every ZIP code, in order.
    pub kinds: Vec<DataKind>,
    /// `date` parameter for historical requests.
    pub historical_date: String,
    /// Keep only these pollutants (case-insensitive `ParameterName` match).
    pub parameter_filter: Option<Vec<String>>,
    pub transport_errors: TransportErrorPolicy,
    /// Fetch workers; 1 runs strictly sequentially.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kinds: DataKind::ALL.to_vec(),
            historical_date: String::new(),
            parameter_filter: None,
            transport_errors: TransportErrorPolicy::Skip,
            workers: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub zip_codes: usize,
    pub tuples: usize,
    pub rows_written: u64,
    pub rows_filtered: u64,
    pub empty: usize,
    pub throttled: usize,
    pub rejected: usize,
    pub malformed: usize,
    pub network_failures: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("run aborted: {0}")]
    Transport(#[source] FetchError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("fetch worker for zip code {0} exited without reporting")]
    WorkerLost(ZipCode),
}

type TupleResult = (DataKind, Result<FetchOutcome, FetchError>);

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    client: Arc<AirNowClient>,
    limiter: Arc<RateLimiter>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(client: AirNowClient, limiter: Arc<RateLimiter>, config: PipelineConfig) -> Self {
        Self {
            client: Arc::new(client),
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Runs one full pass over `zips`, writing every row to `sink`.
    ///
    /// The sink is flushed before an abort is returned. Callers still own
    /// `finish()` on success.
    pub fn run(&self, zips: &[ZipCode], sink: &mut CsvSink) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary {
            zip_codes: zips.len(),
            ..RunSummary::default()
        };

        info!(
            "Fetching {} data kind(s) for {} zip codes with {} worker(s)",
            self.config.kinds.len(),
            zips.len(),
            self.config.workers.max(1)
        );

        let result = if self.config.workers <= 1 {
            self.run_sequential(zips, sink, &mut summary)
        } else {
            self.run_pooled(zips, sink, &mut summary)
        };

        if let Err(e) = result {
            sink.flush()?;
            return Err(e);
        }

        info!(
            "Run complete: {} rows from {} tuples ({} empty, {} throttled, {} rejected, {} malformed, {} network failures)",
            summary.rows_written,
            summary.tuples,
            summary.empty,
            summary.throttled,
            summary.rejected,
            summary.malformed,
            summary.network_failures
        );
        Ok(summary)
    }

    fn run_sequential(
        &self,
        zips: &[ZipCode],
        sink: &mut CsvSink,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        for (index, zip) in zips.iter().enumerate() {
            info!("Processing zip code {} ({}/{})", zip, index + 1, zips.len());
            for &kind in &self.config.kinds {
                let result = fetch_tuple(&self.client, &self.limiter, zip, kind, &self.config.historical_date);
                self.record(zip, (kind, result), sink, summary)?;
            }
        }
        Ok(())
    }

    /// Fetches ZIP codes on a worker pool and writes their rows in input
    /// order, so the file matches what a sequential run would produce.
    ///
    /// Under `TransportErrorPolicy::Abort` the first transport failure stops
    /// every worker before its next request, and the pool is drained before
    /// the error is returned.
    fn run_pooled(
        &self,
        zips: &[ZipCode],
        sink: &mut CsvSink,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let pool = ThreadPool::new(self.config.workers);
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<(usize, Vec<TupleResult>)>();
        let abort_on_transport = self.config.transport_errors == TransportErrorPolicy::Abort;

        for (index, zip) in zips.iter().enumerate() {
            let tx = tx.clone();
            let stop = Arc::clone(&stop);
            let client = Arc::clone(&self.client);
            let limiter = Arc::clone(&self.limiter);
            let kinds = self.config.kinds.clone();
            let date = self.config.historical_date.clone();
            let zip = zip.clone();

            pool.execute(move || {
                let mut results = Vec::with_capacity(kinds.len());
                for kind in kinds {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let result = fetch_tuple(&client, &limiter, &zip, kind, &date);
                    let failed = result.is_err();
                    results.push((kind, result));
                    if failed && abort_on_transport {
                        stop.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                let _ = tx.send((index, results));
            });
        }
        drop(tx);

        let mut pending: BTreeMap<usize, Vec<TupleResult>> = BTreeMap::new();
        let mut next = 0;

        for (index, results) in rx {
            pending.insert(index, results);
            while let Some(results) = pending.remove(&next) {
                let zip = &zips[next];
                info!("Processing zip code {} ({}/{})", zip, next + 1, zips.len());
                for tuple in results {
                    if let Err(e) = self.record(zip, tuple, sink, summary) {
                        stop.store(true, Ordering::SeqCst);
                        pool.join();
                        return Err(e);
                    }
                }
                next += 1;
            }
        }

        match zips.get(next) {
            Some(zip) => Err(PipelineError::WorkerLost(zip.clone())),
            None => Ok(()),
        }
    }

    /// Applies one tuple's outcome: writes rows, updates counters, logs.
    fn record(
        &self,
        zip: &ZipCode,
        (kind, result): TupleResult,
        sink: &mut CsvSink,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        summary.tuples += 1;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                return match self.config.transport_errors {
                    TransportErrorPolicy::Skip => {
                        error!("{}; skipping", e);
                        summary.network_failures += 1;
                        Ok(())
                    }
                    TransportErrorPolicy::Abort => {
                        error!("{}; aborting run", e);
                        summary.network_failures += 1;
                        Err(PipelineError::Transport(e))
                    }
                };
            }
        };

        match outcome {
            FetchOutcome::Items(items) => {
                for item in &items {
                    let record = normalize(item, zip, kind);
                    if !self.keeps(record.parameter_name.as_deref()) {
                        summary.rows_filtered += 1;
                        continue;
                    }
                    sink.write(&record)?;
                    summary.rows_written += 1;
                }
            }
            FetchOutcome::Empty => {
                warn!("No {} data for zip code {}", kind, zip);
                summary.empty += 1;
            }
            FetchOutcome::ThrottledExhausted { .. } => summary.throttled += 1,
            FetchOutcome::Rejected { .. } => summary.rejected += 1,
            FetchOutcome::Malformed(_) => summary.malformed += 1,
        }
        Ok(())
    }

    fn keeps(&self, parameter: Option<&str>) -> bool {
        match &self.config.parameter_filter {
            None => true,
            Some(allowed) => parameter.is_some_and(|p| allowed.iter().any(|a| a.eq_ignore_ascii_case(p))),
        }
    }
}

fn fetch_tuple(
    client: &AirNowClient,
    limiter: &RateLimiter,
    zip: &ZipCode,
    kind: DataKind,
    historical_date: &str,
) -> Result<FetchOutcome, FetchError> {
    let date = (kind == DataKind::HistoricalObservation && !historical_date.is_empty())
        .then_some(historical_date);
    client.fetch(limiter, zip, kind, date)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::airnow::AirNowSettings;
    use crate::ratelimit::{ManualClock, RateLimitConfig};

    fn pipeline(config: PipelineConfig) -> Pipeline {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), clock.clone()));
        let client = AirNowClient::new(AirNowSettings::new("KEY"), clock).expect("client");
        Pipeline::new(client, limiter, config)
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.kinds, DataKind::ALL.to_vec());
        assert_eq!(config.transport_errors, TransportErrorPolicy::Skip);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_no_filter_keeps_everything() {
        let p = pipeline(PipelineConfig::default());
        assert!(p.keeps(Some("O3")));
        assert!(p.keeps(None));
    }

    #[test]
    fn test_filter_matches_parameter_case_insensitively() {
        let p = pipeline(PipelineConfig {
            parameter_filter: Some(vec!["PM2.5".into(), "CO".into()]),
            ..PipelineConfig::default()
        });
        assert!(p.keeps(Some("pm2.5")));
        assert!(p.keeps(Some("CO")));
        assert!(!p.keeps(Some("O3")));
        assert!(!p.keeps(None), "records without a parameter fail an explicit filter");
    }

    #[test]
    fn test_transport_policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: TransportErrorPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"abort\"").unwrap();
        assert_eq!(w.policy, TransportErrorPolicy::Abort);
    }
}
