/// ZIP code enumeration for a target state.
///
/// Three sources are provided:
///
/// - [`ZipRegistry`]: the USPS ZIP code database bundled with the `zipcodes`
///   crate. This is the default and covers every ZIP code of a state.
/// - [`ZipTable`]: a geographic lookup table on disk (CSV with at least
///   `zipcode` and `state` columns, optionally `state_name`), filtered to
///   one state.
/// - [`ZipList`]: a fixed list, typically from the `[zip_source]` table of
///   the configuration file.

use crate::model::ZipCode;
use log::warn;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ZipCodeError {
    #[error("cannot read ZIP code table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no ZIP codes found for state '{0}'")]
    NoZipCodes(String),

    #[error("unknown state '{0}': expected a US state name or two-letter abbreviation")]
    UnknownState(String),

    #[error("ZIP code registry lookup failed: {0}")]
    Registry(String),

    #[error(transparent)]
    Invalid(#[from] crate::model::InvalidZipCode),
}

/// Resolves every ZIP code of a state.
pub trait ZipCodeSource {
    fn zip_codes(&self, state: &str) -> Result<Vec<ZipCode>, ZipCodeError>;
}

// ---------------------------------------------------------------------------
// Bundled registry
// ---------------------------------------------------------------------------

/// USPS state and territory abbreviations.
const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
    ("AS", "American Samoa"),
    ("GU", "Guam"),
    ("MP", "Northern Mariana Islands"),
    ("PR", "Puerto Rico"),
    ("VI", "Virgin Islands"),
];

/// Resolves a state name or abbreviation (any case) to its USPS code.
pub fn state_abbreviation(state: &str) -> Option<&'static str> {
    let state = state.trim();
    STATES
        .iter()
        .find(|(abbr, name)| abbr.eq_ignore_ascii_case(state) || name.eq_ignore_ascii_case(state))
        .map(|(abbr, _)| *abbr)
}

/// Every ZIP code the `zipcodes` database lists for a state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipRegistry;

impl ZipCodeSource for ZipRegistry {
    /// ZIP codes of `state`, sorted ascending.
    fn zip_codes(&self, state: &str) -> Result<Vec<ZipCode>, ZipCodeError> {
        let abbr = state_abbreviation(state)
            .ok_or_else(|| ZipCodeError::UnknownState(state.trim().to_string()))?;

        let entries = ::zipcodes::filter_by(vec![|z: &::zipcodes::Zipcode| z.state == abbr], None)
            .map_err(|e| ZipCodeError::Registry(format!("{:?}", e)))?;

        let mut codes = BTreeSet::new();
        for entry in entries {
            match ZipCode::parse(&entry.zip_code) {
                Ok(zip) => {
                    codes.insert(zip);
                }
                Err(e) => warn!("Skipping registry entry: {}", e),
            }
        }

        if codes.is_empty() {
            return Err(ZipCodeError::NoZipCodes(state.trim().to_string()));
        }
        Ok(codes.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Lookup table
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ZipRow {
    zipcode: String,
    state: String,
    #[serde(default)]
    state_name: Option<String>,
}

impl ZipRow {
    /// Matches a two-letter abbreviation or a full state name.
    fn in_state(&self, state: &str) -> bool {
        self.state.trim().eq_ignore_ascii_case(state)
            || self
                .state_name
                .as_deref()
                .is_some_and(|name| name.trim().eq_ignore_ascii_case(state))
    }
}

/// CSV lookup table of ZIP codes by state.
#[derive(Debug, Clone)]
pub struct ZipTable {
    path: PathBuf,
}

impl ZipTable {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table_error(&self, source: csv::Error) -> ZipCodeError {
        ZipCodeError::Table { path: self.path.clone(), source }
    }
}

impl ZipCodeSource for ZipTable {
    /// ZIP codes of `state`, de-duplicated and sorted ascending. Rows with
    /// malformed codes are skipped with a warning.
    fn zip_codes(&self, state: &str) -> Result<Vec<ZipCode>, ZipCodeError> {
        let state = state.trim();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| self.table_error(e))?;

        let mut codes = BTreeSet::new();
        for row in reader.deserialize::<ZipRow>() {
            let row = row.map_err(|e| self.table_error(e))?;
            if !row.in_state(state) {
                continue;
            }
            match ZipCode::parse(&row.zipcode) {
                Ok(zip) => {
                    codes.insert(zip);
                }
                Err(e) => warn!("Skipping row in {}: {}", self.path.display(), e),
            }
        }

        if codes.is_empty() {
            return Err(ZipCodeError::NoZipCodes(state.to_string()));
        }
        Ok(codes.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Fixed list
// ---------------------------------------------------------------------------

/// An explicit ZIP code list. The state argument is ignored.
#[derive(Debug, Clone)]
pub struct ZipList {
    codes: Vec<ZipCode>,
}

impl ZipList {
    /// Validates every entry, keeping the given order and dropping repeats.
    pub fn parse<S: AsRef<str>>(codes: &[S]) -> Result<Self, ZipCodeError> {
        let mut seen = BTreeSet::new();
        let mut list = Vec::with_capacity(codes.len());
        for raw in codes {
            let zip = ZipCode::parse(raw.as_ref())?;
            if seen.insert(zip.clone()) {
                list.push(zip);
            }
        }
        Ok(Self { codes: list })
    }
}

impl ZipCodeSource for ZipList {
    fn zip_codes(&self, state: &str) -> Result<Vec<ZipCode>, ZipCodeError> {
        if self.codes.is_empty() {
            return Err(ZipCodeError::NoZipCodes(state.to_string()));
        }
        Ok(self.codes.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TABLE: &str = "\
zipcode,state,state_name,major_city
33130,FL,Florida,Miami
33101,FL,Florida,Miami
32801,FL,Florida,Orlando
30301,GA,Georgia,Atlanta
33101,FL,Florida,Miami
3310,FL,Florida,Broken
";

    fn write_table(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zips.csv");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn codes(zips: &[ZipCode]) -> Vec<&str> {
        zips.iter().map(|z| z.as_str()).collect()
    }

    #[test]
    fn test_table_filters_by_state_name_sorted_and_deduplicated() {
        let (_dir, path) = write_table(TABLE);
        let zips = ZipTable::new(&path).zip_codes("Florida").expect("should load");
        assert_eq!(codes(&zips), vec!["32801", "33101", "33130"]);
    }

    #[test]
    fn test_table_matches_abbreviation_case_insensitively() {
        let (_dir, path) = write_table(TABLE);
        let zips = ZipTable::new(&path).zip_codes("fl").unwrap();
        assert_eq!(zips.len(), 3);
        let ga = ZipTable::new(&path).zip_codes(" georgia ").unwrap();
        assert_eq!(codes(&ga), vec!["30301"]);
    }

    #[test]
    fn test_table_without_state_name_column() {
        let (_dir, path) = write_table("zipcode,state\n33101,FL\n30301,GA\n");
        let zips = ZipTable::new(&path).zip_codes("FL").unwrap();
        assert_eq!(codes(&zips), vec!["33101"]);
    }

    #[test]
    fn test_table_unknown_state_is_error() {
        let (_dir, path) = write_table(TABLE);
        let result = ZipTable::new(&path).zip_codes("Atlantis");
        assert!(matches!(result, Err(ZipCodeError::NoZipCodes(s)) if s == "Atlantis"));
    }

    #[test]
    fn test_missing_table_is_error() {
        let result = ZipTable::new("/nonexistent/zips.csv").zip_codes("FL");
        assert!(matches!(result, Err(ZipCodeError::Table { .. })));
    }

    #[test]
    fn test_list_keeps_order_and_drops_repeats() {
        let list = ZipList::parse(&["33130", "33101", "33130"]).unwrap();
        assert_eq!(codes(&list.zip_codes("ignored").unwrap()), vec!["33130", "33101"]);
    }

    #[test]
    fn test_list_rejects_malformed_codes() {
        assert!(matches!(ZipList::parse(&["33101", "abcde"]), Err(ZipCodeError::Invalid(_))));
    }

    #[test]
    fn test_state_abbreviation_accepts_names_and_codes() {
        assert_eq!(state_abbreviation("Florida"), Some("FL"));
        assert_eq!(state_abbreviation(" fl "), Some("FL"));
        assert_eq!(state_abbreviation("new york"), Some("NY"));
        assert_eq!(state_abbreviation("Atlantis"), None);
    }

    #[test]
    fn test_registry_covers_whole_state() {
        let zips = ZipRegistry.zip_codes("Florida").expect("registry should list Florida");
        assert!(zips.len() > 900, "Florida has well over 900 ZIP codes, got {}", zips.len());
        assert!(zips.iter().any(|z| z.as_str() == "33101"), "should include Miami");
        assert!(zips.iter().any(|z| z.as_str() == "32801"), "should include Orlando");
        assert!(zips.iter().all(|z| z.as_str().starts_with('3')), "Florida ZIPs start with 3");
        assert!(zips.windows(2).all(|w| w[0] < w[1]), "sorted and de-duplicated");
    }

    #[test]
    fn test_registry_matches_abbreviation_like_name() {
        let by_name = ZipRegistry.zip_codes("Georgia").unwrap();
        let by_code = ZipRegistry.zip_codes("ga").unwrap();
        assert_eq!(by_name, by_code);
    }

    #[test]
    fn test_registry_unknown_state_is_error() {
        let result = ZipRegistry.zip_codes("Atlantis");
        assert!(matches!(result, Err(ZipCodeError::UnknownState(s)) if s == "Atlantis"));
    }

    #[test]
    fn test_shipped_table_covers_florida() {
        let zips = ZipTable::new("data/zip_codes.csv")
            .zip_codes("Florida")
            .expect("data/zip_codes.csv should list Florida ZIP codes");
        assert!(zips.iter().any(|z| z.as_str() == "33101"), "should include Miami");
        assert!(zips.iter().all(|z| z.as_str().starts_with('3')), "Florida ZIPs start with 3");
    }
}
