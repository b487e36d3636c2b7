/// Data source clients and response handling.
///
/// - `airnow`    — AirNow API: URL construction, retry-on-throttle fetch
/// - `normalize` — raw AirNow items into flat `ObservationRecord`s
/// - `fixtures`  — representative AirNow payloads (test only)
pub mod airnow;
pub mod normalize;

#[cfg(test)]
pub(crate) mod fixtures;
