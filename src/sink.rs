/// CSV output for a single run.
///
/// The sink owns the output file from creation to `finish()`. The file is
/// truncated on open and the header is flushed straight away, so even a run
/// that aborts leaves a well-formed header on disk.

use crate::model::{or_missing, ObservationRecord, NARROW_PARAMETERS};
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT: &str = "florida_aqi_data.csv";

const FULL_HEADER: [&str; 13] = [
    "ZIP_CODE",
    "TYPE",
    "DATE",
    "REPORTING_AREA",
    "STATE_CODE",
    "LATITUDE",
    "LONGITUDE",
    "PARAMETER_NAME",
    "AQI",
    "CATEGORY_NUMBER",
    "CATEGORY_NAME",
    "ACTION_DAY",
    "DISCUSSION",
];

const NARROW_HEADER: [&str; 9] = [
    "Zip Code",
    "DateObserved",
    "AQI",
    "Category",
    "ParameterName",
    "ReportingArea",
    "StateCode",
    "Latitude",
    "Longitude",
];

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Column layout of the output file. One file never mixes layouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputSchema {
    /// All three data kinds, 13 columns.
    #[default]
    Full,
    /// Current-observation layout, 9 columns, limited to CO/SO2/NO2/PM2.5/PM10.
    Narrow,
}

impl OutputSchema {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            OutputSchema::Full => &FULL_HEADER,
            OutputSchema::Narrow => &NARROW_HEADER,
        }
    }

    /// Pollutants kept when no explicit filter is configured.
    pub fn default_parameters(&self) -> Option<&'static [&'static str]> {
        match self {
            OutputSchema::Full => None,
            OutputSchema::Narrow => Some(NARROW_PARAMETERS),
        }
    }

    /// Renders a record as one row in header order.
    pub fn row(&self, record: &ObservationRecord) -> Vec<String> {
        match self {
            OutputSchema::Full => vec![
                record.zip_code.to_string(),
                record.kind.to_string(),
                or_missing(record.date.as_ref()),
                or_missing(record.reporting_area.as_ref()),
                or_missing(record.state_code.as_ref()),
                or_missing(record.latitude.as_ref()),
                or_missing(record.longitude.as_ref()),
                or_missing(record.parameter_name.as_ref()),
                record.aqi.to_string(),
                or_missing(record.category_number.as_ref()),
                or_missing(record.category_name.as_ref()),
                record.action_day.to_string(),
                or_missing(record.discussion.as_ref()),
            ],
            OutputSchema::Narrow => vec![
                record.zip_code.to_string(),
                or_missing(record.date.as_ref()),
                record.aqi.to_string(),
                or_missing(record.category_name.as_ref()),
                or_missing(record.parameter_name.as_ref()),
                or_missing(record.reporting_area.as_ref()),
                or_missing(record.state_code.as_ref()),
                or_missing(record.latitude.as_ref()),
                or_missing(record.longitude.as_ref()),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot open output file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed writing to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed flushing {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct CsvSink {
    writer: csv::Writer<File>,
    path: PathBuf,
    schema: OutputSchema,
    rows_written: u64,
}

impl CsvSink {
    /// Truncates (or creates) `path` and writes the header.
    pub fn create(path: impl AsRef<Path>, schema: OutputSchema) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| SinkError::Open { path: path.clone(), source })?;

        let mut sink = Self {
            writer: csv::Writer::from_writer(file),
            path,
            schema,
            rows_written: 0,
        };

        sink.writer
            .write_record(schema.header())
            .map_err(|source| SinkError::Write { path: sink.path.clone(), source })?;
        sink.flush()?;

        Ok(sink)
    }

    pub fn schema(&self) -> OutputSchema {
        self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn write(&mut self, record: &ObservationRecord) -> Result<(), SinkError> {
        self.writer
            .write_record(self.schema.row(record))
            .map_err(|source| SinkError::Write { path: self.path.clone(), source })?;
        self.rows_written += 1;
        Ok(())
    }

    /// Pushes buffered rows to the OS.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.writer
            .flush()
            .map_err(|source| SinkError::Flush { path: self.path.clone(), source })
    }

    /// Flushes and syncs the file to disk. Returns the number of data rows.
    pub fn finish(mut self) -> Result<u64, SinkError> {
        self.flush()?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|source| SinkError::Flush { path: self.path.clone(), source })?;
        Ok(self.rows_written)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
