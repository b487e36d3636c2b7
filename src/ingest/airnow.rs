/// AirNow API client: URL construction, response parsing, and the
/// retry-on-throttle fetch loop.
///
/// Endpoints (all return a JSON array of per-pollutant objects):
///   /aq/forecast/zipCode/
///   /aq/observation/zipCode/current/
///   /aq/observation/zipCode/historical/   (requires `date`)
///
/// API Documentation: https://docs.airnowapi.org/webservices
///
/// A fetch never fails on HTTP-level problems. Throttling, non-200 statuses
/// and unparseable bodies all come back as a `FetchOutcome` carrying no
/// items. Only transport failures are returned as `FetchError`, so the
/// caller can decide whether they end the run.

use crate::model::{DataKind, ZipCode};
use crate::ratelimit::{Clock, RateLimiter};
use chrono::{Duration as ChronoDuration, NaiveDate};
use log::{debug, error, warn};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const AIRNOW_BASE_URL: &str = "https://www.airnowapi.org";

/// Search radius (miles) around the ZIP code's centroid.
pub const DEFAULT_DISTANCE_MILES: u32 = 25;

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// Result of one fetch tuple that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// HTTP 200 with at least one item.
    Items(Vec<Value>),
    /// HTTP 200 with an empty array, `null`, or an empty body.
    Empty,
    /// Every attempt was answered with HTTP 429.
    ThrottledExhausted { attempts: u32 },
    /// A status other than 200 or 429; not retried.
    Rejected { status: u16 },
    /// HTTP 200 whose body was not a JSON array.
    Malformed(String),
}

impl FetchOutcome {
    pub fn items(&self) -> &[Value] {
        match self {
            FetchOutcome::Items(items) => items,
            _ => &[],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// DNS failure, refused or reset connection, timeout, truncated body.
    #[error("network error fetching {kind} for zip code {zip}: {source}")]
    Network {
        zip: ZipCode,
        kind: DataKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounds the retry-on-429 loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per tuple, including the first.
    pub max_retries: u32,
    /// Wait after a 429 before the next attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Path of the endpoint serving `kind`.
pub fn endpoint_path(kind: DataKind) -> &'static str {
    match kind {
        DataKind::Forecast => "/aq/forecast/zipCode/",
        DataKind::CurrentObservation => "/aq/observation/zipCode/current/",
        DataKind::HistoricalObservation => "/aq/observation/zipCode/historical/",
    }
}

/// Builds the request URL for one tuple. `date` is only sent for historical
/// observations.
///
/// # Example
/// ```
/// use aqmon::ingest::airnow::build_request_url;
/// use aqmon::model::{DataKind, ZipCode};
///
/// let zip = ZipCode::parse("33101").unwrap();
/// let url = build_request_url(
///     "https://www.airnowapi.org",
///     DataKind::CurrentObservation,
///     &zip,
///     25,
///     "KEY",
///     None,
/// );
/// assert!(url.contains("zipCode=33101"));
/// ```
pub fn build_request_url(
    base_url: &str,
    kind: DataKind,
    zip: &ZipCode,
    distance_miles: u32,
    api_key: &str,
    date: Option<&str>,
) -> String {
    let mut url = format!(
        "{}{}?format={}&zipCode={}&distance={}&API_KEY={}",
        base_url.trim_end_matches('/'),
        endpoint_path(kind),
        urlencoding::encode("application/json"),
        zip,
        distance_miles,
        urlencoding::encode(api_key)
    );

    if kind == DataKind::HistoricalObservation {
        if let Some(date) = date {
            url.push_str("&date=");
            url.push_str(&urlencoding::encode(date));
        }
    }

    url
}

/// Formats the `date` parameter of a historical request for midnight on
/// `day` (`yyyy-mm-ddT00-0000`).
pub fn historical_date_param(day: NaiveDate) -> String {
    day.format("%Y-%m-%dT00-0000").to_string()
}

/// Default historical date: midnight of the day before `today`.
pub fn default_historical_date(today: NaiveDate) -> String {
    historical_date_param(today - ChronoDuration::days(1))
}

/// Checks the `yyyy-mm-ddTHH-ZZZZ` shape of a historical date parameter.
pub fn is_valid_historical_date(date: &str) -> bool {
    let Some((day, rest)) = date.split_once('T') else {
        return false;
    };
    let Some((hour, zone)) = rest.split_once('-') else {
        return false;
    };

    NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok()
        && hour.len() == 2
        && hour.parse::<u8>().map(|h| h < 24).unwrap_or(false)
        && zone.len() == 4
        && zone.bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parses a 200 response body into its items.
///
/// Empty bodies and `null` are "no data", not errors. Anything other than
/// a JSON array is reported as an error string.
pub fn parse_observations(body: &str) -> Result<Vec<Value>, String> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(Value::Null) => Ok(Vec::new()),
        Ok(other) => Err(format!("expected a JSON array, got {}", json_type(&other))),
        Err(e) => Err(format!("JSON deserialization failed: {}", e)),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Connection settings for [`AirNowClient`].
#[derive(Clone)]
pub struct AirNowSettings {
    pub base_url: String,
    pub api_key: String,
    pub distance_miles: u32,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl AirNowSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: AIRNOW_BASE_URL.to_string(),
            api_key: api_key.into(),
            distance_miles: DEFAULT_DISTANCE_MILES,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for AirNowSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirNowSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("distance_miles", &self.distance_miles)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Blocking AirNow client. Stateless apart from its configuration; pacing
/// is supplied per call through a shared [`RateLimiter`].
pub struct AirNowClient {
    http: reqwest::blocking::Client,
    settings: AirNowSettings,
    clock: Arc<dyn Clock>,
}

impl AirNowClient {
    pub fn new(settings: AirNowSettings, clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("aqmon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { http, settings, clock })
    }

    pub fn settings(&self) -> &AirNowSettings {
        &self.settings
    }

    /// Fetches one `(zip, kind[, date])` tuple.
    ///
    /// Every HTTP attempt first claims a slot from `limiter`. A 429 waits
    /// `retry.base_delay` and tries again, up to `retry.max_retries`
    /// attempts in total. Any other non-200 status is given up on at once.
    pub fn fetch(
        &self,
        limiter: &RateLimiter,
        zip: &ZipCode,
        kind: DataKind,
        date: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let url = build_request_url(
            &self.settings.base_url,
            kind,
            zip,
            self.settings.distance_miles,
            &self.settings.api_key,
            date,
        );
        let max_attempts = self.settings.retry.max_retries.max(1);

        for attempt in 1..=max_attempts {
            limiter.acquire();
            debug!("GET {} zip={} kind={} attempt={}", endpoint_path(kind), zip, kind, attempt);

            let response = self
                .http
                .get(&url)
                .header("Accept", "application/json")
                .send()
                .map_err(|e| network_error(zip, kind, e))?;

            let status = response.status();

            if status == StatusCode::OK {
                let body = response.text().map_err(|e| network_error(zip, kind, e))?;
                return Ok(match parse_observations(&body) {
                    Ok(items) if items.is_empty() => FetchOutcome::Empty,
                    Ok(items) => FetchOutcome::Items(items),
                    Err(msg) => {
                        warn!("Unparseable {} response for zip code {}: {}", kind, zip, msg);
                        FetchOutcome::Malformed(msg)
                    }
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < max_attempts {
                    warn!(
                        "Rate limit hit for zip code {} ({}). Retrying in {} seconds...",
                        zip,
                        kind,
                        self.settings.retry.base_delay.as_secs_f64()
                    );
                    self.clock.sleep(self.settings.retry.base_delay);
                }
                continue;
            }

            error!(
                "Failed to retrieve {} data for zip code {}. Status code: {}",
                kind,
                zip,
                status.as_u16()
            );
            return Ok(FetchOutcome::Rejected { status: status.as_u16() });
        }

        warn!(
            "Rate limit persisted for zip code {} ({}) after {} attempts; skipping",
            zip, kind, max_attempts
        );
        Ok(FetchOutcome::ThrottledExhausted { attempts: max_attempts })
    }
}

/// Wraps a transport error, dropping the URL so the API key is never
/// rendered into logs.
fn network_error(zip: &ZipCode, kind: DataKind, source: reqwest::Error) -> FetchError {
    FetchError::Network {
        zip: zip.clone(),
        kind,
        source: source.without_url(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
