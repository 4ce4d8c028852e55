use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::feeds::bus::BusClient;
use crate::feeds::rail::RailClient;
use crate::feeds::subway::SubwayClient;
use crate::feeds::ArrivalQuery;
use crate::models::ArrivalsResponse;
use crate::stations;
use crate::AppState;

/// GET /api/subway-arrivals — MTA subway board for the requested stations.
///
/// Headers: `api-key`, `station-ids` (comma-separated platform stop ids,
/// e.g. "127N,127S"), `subway-lines` (comma-separated routes).
pub async fn subway_arrivals(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers, &state.config) {
        return unauthorized();
    }
    let Some(stations) = list_header(&headers, "station-ids") else {
        return missing_header("station-ids");
    };
    let Some(lines) = list_header(&headers, "subway-lines") else {
        return missing_header("subway-lines");
    };

    let query = ArrivalQuery { stations, lines };
    let client = SubwayClient::new(&state.http, &state.config.subway);
    let (buckets, alerts) =
        tokio::join!(client.fetch_arrivals(&query), client.fetch_alerts(&query.lines));

    info!("[SUBWAY] {} alerts for lines {:?}", alerts.len(), query.lines);
    Json(ArrivalsResponse::assemble(buckets.rank_and_cap(), alerts)).into_response()
}

/// GET /api/bus-arrivals — MTA bus board for the requested stops.
///
/// Headers: `api-key`, `station-ids` (comma-separated stop codes);
/// `subway-lines` is optional — absent means every route serving the stops.
pub async fn bus_arrivals(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers, &state.config) {
        return unauthorized();
    }
    let Some(stops) = list_header(&headers, "station-ids") else {
        return missing_header("station-ids");
    };
    let routes = list_header(&headers, "subway-lines").unwrap_or_default();

    let query = ArrivalQuery {
        stations: stops,
        lines: routes,
    };
    let client = BusClient::new(&state.http, &state.config.bus);
    let buckets = client.fetch_arrivals(&query).await;

    // BusTime has no alert feed; the alerts list is always empty.
    Json(ArrivalsResponse::assemble(buckets.rank_and_cap(), Vec::new())).into_response()
}

/// GET /api/rail-arrivals — WMATA board for the requested station codes.
///
/// Headers: `api-key`, `station-ids` (comma-separated codes, e.g.
/// "A01,C01"); `lines` is optional — absent falls back to every line
/// serving the requested stations.
pub async fn rail_arrivals(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers, &state.config) {
        return unauthorized();
    }
    let Some(station_codes) = list_header(&headers, "station-ids") else {
        return missing_header("station-ids");
    };
    let lines = match list_header(&headers, "lines") {
        Some(lines) => lines.iter().map(|l| l.to_uppercase()).collect(),
        None => lines_serving(&station_codes),
    };

    let query = ArrivalQuery {
        stations: station_codes,
        lines,
    };
    let client = RailClient::new(&state.http, &state.config.rail);
    let (buckets, alerts) =
        tokio::join!(client.fetch_arrivals(&query), client.fetch_alerts(&query.lines));

    info!("[RAIL] {} alerts for lines {:?}", alerts.len(), query.lines);
    Json(ArrivalsResponse::assemble(buckets.rank_and_cap(), alerts)).into_response()
}

/// GET /healthz — unauthenticated liveness probe.
pub async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

/// GET / — the service has no public pages.
pub async fn index() -> &'static str {
    "This is not for you"
}

// -- Helper functions --

/// Byte-for-byte comparison of the `api-key` header against the configured
/// shared secret. Missing or non-ASCII headers fail closed.
fn authorized(headers: &HeaderMap, config: &Config) -> bool {
    headers
        .get("api-key")
        .map(|value| value.as_bytes() == config.auth.api_key.as_bytes())
        .unwrap_or(false)
}

/// Parse a comma-separated header into a set, dropping empty items.
/// Returns None when the header is absent or holds nothing usable.
fn list_header(headers: &HeaderMap, name: &str) -> Option<HashSet<String>> {
    let raw = headers.get(name)?.to_str().ok()?;
    let items: HashSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Union of the lines serving the requested rail stations.
fn lines_serving(station_codes: &HashSet<String>) -> HashSet<String> {
    station_codes
        .iter()
        .flat_map(|code| stations::rail_lines_for_station(code).iter().cloned())
        .collect()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Invalid API key" })),
    )
        .into_response()
}

fn missing_header(name: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("Missing required header: {}", name) })),
    )
        .into_response()
}
