/// aqmon: statewide AirNow air-quality collection and dashboard.
///
/// # Module structure
///
/// ```text
/// aqmon
/// ├── model       — shared data types (ZipCode, DataKind, ObservationRecord, sentinels)
/// ├── config      — TOML configuration loader (aqmon.toml) and API key file
/// ├── zipcodes    — ZIP code enumeration for a state (bundled registry, lookup table or fixed list)
/// ├── ratelimit   — request pacing: per-request spacing plus the hourly window pause
/// ├── ingest
/// │   ├── airnow    — AirNow API: URL construction, JSON parsing, retry-on-429 fetch
/// │   ├── normalize — raw API items → ObservationRecord
/// │   └── fixtures (test only) — representative API response payloads
/// ├── sink        — CSV output (full and narrow schemas)
/// ├── pipeline    — one full pass over a state's ZIP codes
/// ├── dashboard   — HTML maps of a finished CSV, written to disk or served over HTTP
/// └── logging     — env_logger setup
/// ```

/// Public modules
pub mod config;
pub mod dashboard;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod ratelimit;
pub mod sink;
pub mod zipcodes;
