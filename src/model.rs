/// Shared data types for the AQI ingest pipeline.
///
/// `ZipCode` and `DataKind` identify a fetch tuple; `ObservationRecord` is
/// the flat row written to the output file. Missing values use the sentinels
/// below rather than `Option` at the CSV boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Missing-value sentinels
// ---------------------------------------------------------------------------

/// Written for any absent string or numeric column.
pub const MISSING: &str = "N/A";

/// AQI value meaning "not reported".
pub const AQI_NOT_REPORTED: i64 = -1;

/// Pollutants kept by the narrow output schema.
pub const NARROW_PARAMETERS: &[&str] = &["CO", "SO2", "NO2", "PM2.5", "PM10"];

// ---------------------------------------------------------------------------
// ZipCode
// ---------------------------------------------------------------------------

/// A 5-digit US postal code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZipCode(String);

impl ZipCode {
    /// Validates and wraps a ZIP code. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, InvalidZipCode> {
        let code = raw.trim();
        if code.len() == 5 && code.bytes().all(|b| b.is_ascii_digit()) {
            Ok(ZipCode(code.to_string()))
        } else {
            Err(InvalidZipCode(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ZipCode {
    type Err = InvalidZipCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ZipCode::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ZIP code '{0}': expected 5 digits")]
pub struct InvalidZipCode(pub String);

// ---------------------------------------------------------------------------
// DataKind
// ---------------------------------------------------------------------------

/// Which AirNow product a tuple fetches. The serialized names are the
/// values written to the TYPE column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataKind {
    Forecast,
    CurrentObservation,
    HistoricalObservation,
}

impl DataKind {
    pub const ALL: [DataKind; 3] = [
        DataKind::Forecast,
        DataKind::CurrentObservation,
        DataKind::HistoricalObservation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Forecast => "FORECAST",
            DataKind::CurrentObservation => "CURRENT_OBSERVATION",
            DataKind::HistoricalObservation => "HISTORICAL_OBSERVATION",
        }
    }

    /// Response key holding the date for this kind.
    pub fn date_key(&self) -> &'static str {
        match self {
            DataKind::Forecast => "DateForecast",
            DataKind::CurrentObservation | DataKind::HistoricalObservation => "DateObserved",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FORECAST" => Ok(DataKind::Forecast),
            "CURRENT_OBSERVATION" | "CURRENT" => Ok(DataKind::CurrentObservation),
            "HISTORICAL_OBSERVATION" | "HISTORICAL" => Ok(DataKind::HistoricalObservation),
            other => Err(format!("unknown data kind '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// ObservationRecord
// ---------------------------------------------------------------------------

/// One pollutant reading for one ZIP code and data kind.
///
/// `None` fields render as [`MISSING`]; `aqi` uses [`AQI_NOT_REPORTED`].
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub zip_code: ZipCode,
    pub kind: DataKind,
    pub date: Option<String>,
    pub reporting_area: Option<String>,
    pub state_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub parameter_name: Option<String>,
    pub aqi: i64,
    pub category_number: Option<i64>,
    pub category_name: Option<String>,
    /// Forecast-only.
    pub action_day: bool,
    /// Forecast-only.
    pub discussion: Option<String>,
}

impl ObservationRecord {
    /// A record with every optional field at its default.
    pub fn empty(zip_code: ZipCode, kind: DataKind) -> Self {
        Self {
            zip_code,
            kind,
            date: None,
            reporting_area: None,
            state_code: None,
            latitude: None,
            longitude: None,
            parameter_name: None,
            aqi: AQI_NOT_REPORTED,
            category_number: None,
            category_name: None,
            action_day: false,
            discussion: None,
        }
    }

    pub fn is_aqi_reported(&self) -> bool {
        self.aqi != AQI_NOT_REPORTED
    }
}

/// Renders an optional column value, substituting [`MISSING`].
pub fn or_missing<T: ToString>(value: Option<&T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| MISSING.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
