/// Test fixtures: representative JSON payloads from the AirNow API.
///
/// Shapes follow the live responses of:
///   https://www.airnowapi.org/aq/forecast/zipCode/?format=application/json&...
///   https://www.airnowapi.org/aq/observation/zipCode/current/?...
///   https://www.airnowapi.org/aq/observation/zipCode/historical/?...
///
/// Every endpoint returns a bare JSON array, one object per pollutant:
///   [].DateObserved / DateForecast — "YYYY-MM-DD " (note trailing space)
///   [].ReportingArea, StateCode
///   [].Latitude, Longitude          — numbers
///   [].ParameterName                — "O3", "PM2.5", "PM10", ...
///   [].AQI                          — integer, -1 when not forecast
///   [].Category.Number / .Name
///   [].ActionDay, Discussion        — forecast only

/// Current observations for Miami (33101): ozone and PM2.5.
#[cfg(test)]
pub(crate) fn fixture_current_miami_json() -> &'static str {
    r#"[
      {
        "DateObserved": "2024-09-01 ",
        "HourObserved": 14,
        "LocalTimeZone": "EST",
        "ReportingArea": "Miami",
        "StateCode": "FL",
        "Latitude": 25.7752,
        "Longitude": -80.2086,
        "ParameterName": "O3",
        "AQI": 38,
        "Category": { "Number": 1, "Name": "Good" }
      },
      {
        "DateObserved": "2024-09-01 ",
        "HourObserved": 14,
        "LocalTimeZone": "EST",
        "ReportingArea": "Miami",
        "StateCode": "FL",
        "Latitude": 25.7752,
        "Longitude": -80.2086,
        "ParameterName": "PM2.5",
        "AQI": 61,
        "Category": { "Number": 2, "Name": "Moderate" }
      }
    ]"#
}

/// Forecast for Miami: one day with an AQI, one with only a category
/// (AirNow sends AQI -1 when the forecast is category-only).
#[cfg(test)]
pub(crate) fn fixture_forecast_miami_json() -> &'static str {
    r#"[
      {
        "DateIssue": "2024-09-01 ",
        "DateForecast": "2024-09-01 ",
        "ReportingArea": "Miami",
        "StateCode": "FL",
        "Latitude": 25.7752,
        "Longitude": -80.2086,
        "ParameterName": "O3",
        "AQI": 42,
        "Category": { "Number": 1, "Name": "Good" },
        "ActionDay": false,
        "Discussion": "Sea breezes keep ozone low along the coast."
      },
      {
        "DateIssue": "2024-09-01 ",
        "DateForecast": "2024-09-02 ",
        "ReportingArea": "Miami",
        "StateCode": "FL",
        "Latitude": 25.7752,
        "Longitude": -80.2086,
        "ParameterName": "PM2.5",
        "AQI": -1,
        "Category": { "Number": 2, "Name": "Moderate" },
        "ActionDay": true,
        "Discussion": "Saharan dust, \"hazy\" skies expected, sensitive groups take care."
      }
    ]"#
}

/// Historical observation for Orlando (32801) on a requested date.
#[cfg(test)]
pub(crate) fn fixture_historical_orlando_json() -> &'static str {
    r#"[
      {
        "DateObserved": "2024-08-31T00:00:00",
        "HourObserved": 0,
        "LocalTimeZone": "EST",
        "ReportingArea": "Orlando",
        "StateCode": "FL",
        "Latitude": 28.5383,
        "Longitude": -81.3792,
        "ParameterName": "PM10",
        "AQI": 19,
        "Category": { "Number": 1, "Name": "Good" }
      }
    ]"#
}

/// A ZIP with no nearby monitor.
#[cfg(test)]
pub(crate) fn fixture_empty_json() -> &'static str {
    "[]"
}

/// Item with most keys missing and some oddly typed ones.
#[cfg(test)]
pub(crate) fn fixture_sparse_item_json() -> &'static str {
    r#"[
      {
        "ReportingArea": null,
        "Latitude": "27.95",
        "AQI": 57.0,
        "Category": "Moderate"
      }
    ]"#
}
