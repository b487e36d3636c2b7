/// AQI dashboard: renders a finished output CSV as one Leaflet map per data
/// kind plus a raw data table.
///
/// Endpoints served by [`serve`]:
/// - GET /        - the dashboard page, rebuilt from the CSV on every request
/// - GET /health  - service health check

use crate::model::{DataKind, AQI_NOT_REPORTED, MISSING};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_DASHBOARD_OUTPUT: &str = "aqi_dashboard.html";
pub const DEFAULT_TITLE: &str = "Florida Air Quality Index (AQI) Map";

/// Map centre used when no row carries coordinates.
pub const FLORIDA_CENTER: (f64, f64) = (27.9944024, -81.7602544);

pub const MIN_MARKER_RADIUS: f64 = 4.0;
pub const MAX_MARKER_RADIUS: f64 = 30.0;

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";
const TILE_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start HTTP server: {0}")]
    Server(#[source] Box<dyn std::error::Error + Send + Sync>),
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One CSV row. Reads the full layout; the aliases also accept the narrow
/// current-observation layout, whose rows all count as CURRENT_OBSERVATION.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardRow {
    #[serde(rename = "ZIP_CODE", alias = "Zip Code", default)]
    pub zip_code: String,
    #[serde(rename = "TYPE", default = "current_observation")]
    pub kind: String,
    #[serde(rename = "DATE", alias = "DateObserved", default)]
    pub date: String,
    #[serde(rename = "REPORTING_AREA", alias = "ReportingArea", default)]
    pub reporting_area: String,
    #[serde(rename = "STATE_CODE", alias = "StateCode", default)]
    pub state_code: String,
    #[serde(rename = "LATITUDE", alias = "Latitude", default)]
    pub latitude: String,
    #[serde(rename = "LONGITUDE", alias = "Longitude", default)]
    pub longitude: String,
    #[serde(rename = "PARAMETER_NAME", alias = "ParameterName", default)]
    pub parameter_name: String,
    #[serde(rename = "AQI", default)]
    pub aqi: String,
    #[serde(rename = "CATEGORY_NUMBER", default)]
    pub category_number: String,
    #[serde(rename = "CATEGORY_NAME", alias = "Category", default)]
    pub category_name: String,
    #[serde(rename = "ACTION_DAY", default)]
    pub action_day: String,
    #[serde(rename = "DISCUSSION", default)]
    pub discussion: String,
}

fn current_observation() -> String {
    DataKind::CurrentObservation.as_str().to_string()
}

impl DashboardRow {
    /// `(lat, lon)` when both columns hold finite numbers.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat = self.latitude.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        let lon = self.longitude.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        Some((lat, lon))
    }

    /// AQI as an integer; anything unparseable counts as not reported.
    pub fn aqi_value(&self) -> i64 {
        let raw = self.aqi.trim();
        raw.parse::<i64>()
            .ok()
            .or_else(|| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.round() as i64)
            })
            .unwrap_or(AQI_NOT_REPORTED)
    }

    pub fn is_aqi_reported(&self) -> bool {
        self.aqi_value() >= 0
    }
}

pub fn load_rows(path: &Path) -> Result<Vec<DashboardRow>, DashboardError> {
    let read_error = |source| DashboardError::Read { path: path.to_path_buf(), source };
    let mut reader = csv::Reader::from_path(path).map_err(read_error)?;
    reader
        .deserialize()
        .collect::<Result<Vec<DashboardRow>, _>>()
        .map_err(read_error)
}

/// Groups rows by TYPE: CURRENT_OBSERVATION, FORECAST, HISTORICAL_OBSERVATION,
/// then any unrecognised TYPE values alphabetically.
pub fn group_by_kind(rows: &[DashboardRow]) -> Vec<(String, Vec<&DashboardRow>)> {
    let rank = |kind: &str| match DataKind::from_str(kind) {
        Ok(DataKind::CurrentObservation) => 0,
        Ok(DataKind::Forecast) => 1,
        Ok(DataKind::HistoricalObservation) => 2,
        Err(_) => 3,
    };

    let mut groups: BTreeMap<(u8, String), Vec<&DashboardRow>> = BTreeMap::new();
    for row in rows {
        let kind = row.kind.trim().to_string();
        groups.entry((rank(&kind), kind)).or_default().push(row);
    }
    groups.into_iter().map(|((_, kind), rows)| (kind, rows)).collect()
}

// ---------------------------------------------------------------------------
// Marker styling
// ---------------------------------------------------------------------------

/// EPA AQI band color.
pub fn aqi_color(aqi: i64) -> &'static str {
    match aqi {
        i64::MIN..=50 => "green",
        51..=100 => "yellow",
        101..=150 => "orange",
        151..=200 => "red",
        201..=300 => "purple",
        _ => "maroon",
    }
}

/// Circle radius in pixels; unreported AQI gets the smallest marker.
pub fn marker_radius(aqi: i64) -> f64 {
    if aqi < 0 {
        return MIN_MARKER_RADIUS;
    }
    (MIN_MARKER_RADIUS + aqi as f64 / 10.0).clamp(MIN_MARKER_RADIUS, MAX_MARKER_RADIUS)
}

/// Mean position of every row with coordinates.
pub fn map_center(rows: &[&DashboardRow]) -> (f64, f64) {
    let points: Vec<(f64, f64)> = rows.iter().filter_map(|r| r.coordinates()).collect();
    if points.is_empty() {
        return FLORIDA_CENTER;
    }
    let n = points.len() as f64;
    let (lat, lon) = points.iter().fold((0.0, 0.0), |(a, b), (lat, lon)| (a + lat, b + lon));
    (lat / n, lon / n)
}

// ---------------------------------------------------------------------------
// HTML rendering
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Marker {
    lat: f64,
    lon: f64,
    color: &'static str,
    radius: f64,
    popup: String,
}

#[derive(Debug, Serialize)]
struct MapSpec {
    id: String,
    center: (f64, f64),
    markers: Vec<Marker>,
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn or_missing(value: &str) -> &str {
    let value = value.trim();
    if value.is_empty() { MISSING } else { value }
}

fn popup(row: &DashboardRow) -> String {
    format!(
        "<b>{}</b><br>AQI: {}<br>Category: {}<br>Pollutant: {}<br>Date: {}<br>Zip Code: {}",
        escape_html(or_missing(&row.reporting_area)),
        row.aqi_value(),
        escape_html(or_missing(&row.category_name)),
        escape_html(or_missing(&row.parameter_name)),
        escape_html(or_missing(&row.date)),
        escape_html(or_missing(&row.zip_code)),
    )
}

fn heading(kind: &str) -> String {
    match DataKind::from_str(kind) {
        Ok(DataKind::CurrentObservation) => "Current AQI Observations".to_string(),
        Ok(DataKind::Forecast) => "AQI Forecast".to_string(),
        Ok(DataKind::HistoricalObservation) => "Historical AQI Data".to_string(),
        Err(_) => kind.to_string(),
    }
}

/// Serializes `value` for an inline `<script>` block.
fn script_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "[]".to_string())
        .replace("</", "<\\/")
}

/// Renders the full dashboard page.
pub fn render_html(rows: &[DashboardRow], title: &str) -> String {
    let groups = group_by_kind(rows);
    let title = escape_html(title);

    let mut maps = Vec::with_capacity(groups.len());
    let mut sections = String::new();

    for (index, (kind, group)) in groups.iter().enumerate() {
        let id = format!("map-{}", index);
        let markers: Vec<Marker> = group
            .iter()
            .filter_map(|row| {
                let (lat, lon) = row.coordinates()?;
                let aqi = row.aqi_value();
                Some(Marker { lat, lon, color: aqi_color(aqi), radius: marker_radius(aqi), popup: popup(row) })
            })
            .collect();

        let _ = write!(
            sections,
            "<section>\n<h2>{}</h2>\n<p class=\"count\">{} rows, {} mapped</p>\n<div id=\"{}\" class=\"map\"></div>\n</section>\n",
            escape_html(&heading(kind)),
            group.len(),
            markers.len(),
            id
        );

        maps.push(MapSpec { id, center: map_center(group), markers });
    }

    if maps.is_empty() {
        sections.push_str("<p>No AQI data available.</p>\n");
    }

    let mut html = String::new();
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<link rel="stylesheet" href="{css}">
<script src="{js}"></script>
<style>
body {{ font-family: sans-serif; margin: 1.5em; }}
.map {{ height: 600px; margin-bottom: 2em; }}
table {{ border-collapse: collapse; font-size: 0.85em; }}
th, td {{ border: 1px solid #ccc; padding: 2px 6px; }}
</style>
</head>
<body>
<h1>{title}</h1>
{sections}"#,
        title = title,
        css = LEAFLET_CSS,
        js = LEAFLET_JS,
        sections = sections,
    );

    html.push_str(&render_table(rows));

    let _ = write!(
        html,
        r#"<script>
const maps = {maps};
for (const spec of maps) {{
  const map = L.map(spec.id).setView(spec.center, 6);
  L.tileLayer("{tiles}", {{ attribution: "&copy; OpenStreetMap contributors" }}).addTo(map);
  for (const m of spec.markers) {{
    L.circleMarker([m.lat, m.lon], {{ radius: m.radius, color: m.color, fillColor: m.color, fill: true, fillOpacity: 0.7 }})
      .bindPopup(m.popup)
      .addTo(map);
  }}
}}
</script>
</body>
</html>
"#,
        maps = script_json(&maps),
        tiles = TILE_URL,
    );

    html
}

fn render_table(rows: &[DashboardRow]) -> String {
    let mut table = String::from("<details>\n<summary>Show AQI data</summary>\n<table>\n<tr>");
    for column in [
        "ZIP_CODE", "TYPE", "DATE", "REPORTING_AREA", "STATE_CODE", "LATITUDE", "LONGITUDE",
        "PARAMETER_NAME", "AQI", "CATEGORY_NUMBER", "CATEGORY_NAME", "ACTION_DAY", "DISCUSSION",
    ] {
        let _ = write!(table, "<th>{}</th>", column);
    }
    table.push_str("</tr>\n");

    for row in rows {
        table.push_str("<tr>");
        for cell in [
            &row.zip_code, &row.kind, &row.date, &row.reporting_area, &row.state_code,
            &row.latitude, &row.longitude, &row.parameter_name, &row.aqi,
            &row.category_number, &row.category_name, &row.action_day, &row.discussion,
        ] {
            let _ = write!(table, "<td>{}</td>", escape_html(or_missing(cell)));
        }
        table.push_str("</tr>\n");
    }

    table.push_str("</table>\n</details>\n");
    table
}

/// Reads `csv_path` and writes the rendered page to `output`.
pub fn write_dashboard(csv_path: &Path, output: &Path, title: &str) -> Result<usize, DashboardError> {
    let rows = load_rows(csv_path)?;
    fs::write(output, render_html(&rows, title))
        .map_err(|source| DashboardError::Write { path: output.to_path_buf(), source })?;
    Ok(rows.len())
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

type HttpResponse = tiny_http::Response<Cursor<Vec<u8>>>;

/// Serves the dashboard until the process is stopped.
pub fn serve(port: u16, csv_path: &Path, title: &str) -> Result<(), DashboardError> {
    let server = tiny_http::Server::http(format!("0.0.0.0:{}", port)).map_err(DashboardError::Server)?;

    info!("Dashboard listening on http://0.0.0.0:{}", port);
    info!("  GET /       - AQI maps from {}", csv_path.display());
    info!("  GET /health - Service health check");

    for request in server.incoming_requests() {
        let (status, content_type, body) = route(request.url(), csv_path, title);
        let response = create_response(status, content_type, body);
        if let Err(e) = request.respond(response) {
            error!("Failed to send response: {}", e);
        }
    }

    Ok(())
}

/// Resolves a request path to `(status, content type, body)`.
pub fn route(url: &str, csv_path: &Path, title: &str) -> (u16, &'static str, String) {
    let path = url.split('?').next().unwrap_or(url);
    match path {
        "/" | "/index.html" => match load_rows(csv_path) {
            Ok(rows) => (200, "text/html; charset=utf-8", render_html(&rows, title)),
            Err(e) => {
                error!("{}", e);
                (
                    500,
                    "text/html; charset=utf-8",
                    format!("<h1>Dashboard unavailable</h1><p>{}</p>", escape_html(&e.to_string())),
                )
            }
        },
        "/health" => (
            200,
            "application/json",
            serde_json::json!({
                "status": "ok",
                "service": "aqi_dashboard",
                "data_file": csv_path.display().to_string(),
                "data_file_present": csv_path.exists(),
            })
            .to_string(),
        ),
        _ => (
            404,
            "application/json",
            serde_json::json!({
                "error": "Not found",
                "available_endpoints": ["/", "/health"]
            })
            .to_string(),
        ),
    }
}

fn create_response(status: u16, content_type: &str, body: String) -> HttpResponse {
    let response = tiny_http::Response::from_data(body.into_bytes())
        .with_status_code(tiny_http::StatusCode::from(status));
    match tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObservationRecord, ZipCode};
    use crate::sink::{CsvSink, OutputSchema};

    fn row(kind: &str, aqi: &str, lat: &str, lon: &str) -> DashboardRow {
        DashboardRow {
            zip_code: "33101".into(),
            kind: kind.into(),
            reporting_area: "Miami".into(),
            latitude: lat.into(),
            longitude: lon.into(),
            aqi: aqi.into(),
            ..DashboardRow::default()
        }
    }

    #[test]
    fn test_aqi_color_bands() {
        assert_eq!(aqi_color(0), "green");
        assert_eq!(aqi_color(50), "green");
        assert_eq!(aqi_color(51), "yellow");
        assert_eq!(aqi_color(100), "yellow");
        assert_eq!(aqi_color(150), "orange");
        assert_eq!(aqi_color(200), "red");
        assert_eq!(aqi_color(300), "purple");
        assert_eq!(aqi_color(301), "maroon");
    }

    #[test]
    fn test_unreported_aqi_gets_minimum_radius() {
        assert_eq!(marker_radius(AQI_NOT_REPORTED), MIN_MARKER_RADIUS);
        assert!(marker_radius(120) > marker_radius(20));
        assert_eq!(marker_radius(5000), MAX_MARKER_RADIUS);
    }

    #[test]
    fn test_aqi_value_tolerates_floats_and_missing() {
        assert_eq!(row("FORECAST", "42", "", "").aqi_value(), 42);
        assert_eq!(row("FORECAST", "57.0", "", "").aqi_value(), 57);
        assert_eq!(row("FORECAST", "N/A", "", "").aqi_value(), AQI_NOT_REPORTED);
        assert!(!row("FORECAST", "-1", "", "").is_aqi_reported());
    }

    #[test]
    fn test_coordinates_require_both_numbers() {
        assert_eq!(row("FORECAST", "1", "25.77", "-80.2").coordinates(), Some((25.77, -80.2)));
        assert_eq!(row("FORECAST", "1", "N/A", "-80.2").coordinates(), None);
    }

    #[test]
    fn test_groups_follow_fixed_kind_order() {
        let rows = vec![
            row("HISTORICAL_OBSERVATION", "1", "", ""),
            row("FORECAST", "2", "", ""),
            row("CURRENT_OBSERVATION", "3", "", ""),
            row("FORECAST", "4", "", ""),
        ];
        let groups = group_by_kind(&rows);
        let kinds: Vec<&str> = groups.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(kinds, vec!["CURRENT_OBSERVATION", "FORECAST", "HISTORICAL_OBSERVATION"]);
        assert_eq!(groups[1].1.len(), 2);
    }

    #[test]
    fn test_map_center_defaults_to_florida() {
        assert_eq!(map_center(&[]), FLORIDA_CENTER);
        let a = row("FORECAST", "1", "26.0", "-80.0");
        let b = row("FORECAST", "1", "28.0", "-82.0");
        assert_eq!(map_center(&[&a, &b]), (27.0, -81.0));
    }

    #[test]
    fn test_render_has_one_map_per_kind_and_escapes_text() {
        let mut tampa = row("FORECAST", "42", "27.95", "-82.46");
        tampa.reporting_area = "Tampa <Bay>".into();
        tampa.discussion = "</script><script>alert(1)</script>".into();
        let rows = vec![row("CURRENT_OBSERVATION", "61", "25.77", "-80.2"), tampa];

        let html = render_html(&rows, "Florida AQI");
        assert!(html.contains("id=\"map-0\""));
        assert!(html.contains("id=\"map-1\""));
        assert!(!html.contains("id=\"map-2\""));
        assert!(html.contains("Tampa &lt;Bay&gt;"));
        assert!(!html.contains("</script><script>alert"), "raw text must never close the script block");
        assert!(html.contains("\"color\":\"yellow\""));
    }

    #[test]
    fn test_render_without_rows() {
        let html = render_html(&[], DEFAULT_TITLE);
        assert!(html.contains("No AQI data available."));
    }

    #[test]
    fn test_loads_rows_written_by_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aqi.csv");

        let mut rec = ObservationRecord::empty(ZipCode::parse("33101").unwrap(), DataKind::Forecast);
        rec.aqi = 42;
        rec.latitude = Some(25.7752);
        rec.longitude = Some(-80.2086);
        let mut sink = CsvSink::create(&path, OutputSchema::Full).unwrap();
        sink.write(&rec).unwrap();
        sink.finish().unwrap();

        let rows = load_rows(&path).expect("should read sink output");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "FORECAST");
        assert_eq!(rows[0].aqi_value(), 42);
        assert_eq!(rows[0].coordinates(), Some((25.7752, -80.2086)));
        assert_eq!(rows[0].category_number, "N/A");
    }

    #[test]
    fn test_loads_narrow_layout_as_current_observations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narrow.csv");
        fs::write(
            &path,
            "Zip Code,DateObserved,AQI,Category,ParameterName,ReportingArea,StateCode,Latitude,Longitude\n\
             33101,2024-09-01,61,Moderate,PM2.5,Miami,FL,25.7752,-80.2086\n",
        )
        .unwrap();

        let rows = load_rows(&path).unwrap();
        assert_eq!(rows[0].kind, "CURRENT_OBSERVATION");
        assert_eq!(rows[0].category_name, "Moderate");
        assert_eq!(rows[0].zip_code, "33101");
    }

    #[test]
    fn test_route_health_and_not_found() {
        let missing = Path::new("/nonexistent/aqi.csv");
        let (status, content_type, body) = route("/health", missing, DEFAULT_TITLE);
        assert_eq!(status, 200);
        assert_eq!(content_type, "application/json");
        assert!(body.contains("\"data_file_present\":false"));

        assert_eq!(route("/nope", missing, DEFAULT_TITLE).0, 404);
        assert_eq!(route("/", missing, DEFAULT_TITLE).0, 500, "unreadable CSV is a server error");
    }
}
