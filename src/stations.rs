//! Read-only station metadata, compiled into the binary.
//!
//! Maps provider stop/station identifiers to rider-facing names, and rail
//! station codes to the lines serving them. The tables are deployment data:
//! extend the JSON assets to cover more stations.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded subway table: base stop id (no N/S suffix) → station name.
const SUBWAY_DB_JSON: &str = include_str!("../assets/subway_stations.json");

/// Embedded rail table: station code → name + lines.
const RAIL_DB_JSON: &str = include_str!("../assets/rail_stations.json");

#[derive(Debug, Clone, Deserialize)]
struct RailStation {
    name: String,
    lines: Vec<String>,
}

static SUBWAY_DB: OnceLock<HashMap<String, String>> = OnceLock::new();
static RAIL_DB: OnceLock<HashMap<String, RailStation>> = OnceLock::new();

fn subway_db() -> &'static HashMap<String, String> {
    SUBWAY_DB.get_or_init(|| {
        serde_json::from_str(SUBWAY_DB_JSON).expect("embedded subway station table is valid JSON")
    })
}

fn rail_db() -> &'static HashMap<String, RailStation> {
    RAIL_DB.get_or_init(|| {
        serde_json::from_str(RAIL_DB_JSON).expect("embedded rail station table is valid JSON")
    })
}

/// Look up a subway station name from a platform stop id
/// (e.g., "127N" → "Times Sq-42 St"). Strips the direction suffix.
pub fn subway_station_name(stop_id: &str) -> Option<&'static str> {
    let base = stop_id.trim_end_matches(['N', 'S']);
    subway_db().get(base).map(String::as_str)
}

/// Look up a rail station name from its three-character code.
pub fn rail_station_name(code: &str) -> Option<&'static str> {
    rail_db().get(code).map(|s| s.name.as_str())
}

/// Lines serving a rail station, empty if the code is unknown.
pub fn rail_lines_for_station(code: &str) -> &'static [String] {
    rail_db()
        .get(code)
        .map(|s| s.lines.as_slice())
        .unwrap_or(&[])
}
