//! MTA BusTime provider: SIRI stop-monitoring JSON, one document per stop.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::BusConfig;
use crate::models::{AlertNotice, Arrival, Buckets, SubwayDirection};

use super::{epoch_now, ArrivalQuery, FeedError, Normalizer};

/// Bus predictions further out than this are dropped.
const VALIDITY_WINDOW_MINUTES: i64 = 90;

/// The stop-monitoring feed pins its timestamps to this UTC offset.
const FEED_UTC_OFFSET_SECS: i64 = 5 * 3600;

/// Operator prefix BusTime puts on LineRef values.
const LINE_REF_PREFIX: &str = "MTA NYCT_";

/// SIRI stop-monitoring response tree — only the branches this service
/// reads. Everything is optional; a visit missing a field is skipped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopMonitoringResponse {
    siri: Siri,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Siri {
    service_delivery: ServiceDelivery,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceDelivery {
    #[serde(default)]
    stop_monitoring_delivery: Vec<StopMonitoringDelivery>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StopMonitoringDelivery {
    #[serde(default)]
    monitored_stop_visit: Vec<MonitoredStopVisit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MonitoredStopVisit {
    monitored_vehicle_journey: MonitoredVehicleJourney,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MonitoredVehicleJourney {
    line_ref: Option<String>,
    direction_ref: Option<String>,
    destination_name: Option<String>,
    monitored_call: Option<MonitoredCall>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MonitoredCall {
    expected_arrival_time: Option<String>,
}

/// Strip the route modifier tokens BusTime appends to select-bus-service
/// variants, so "M15", "M15+" and "M15-SBS" all compare equal.
fn canonical_route(route: &str) -> String {
    route.replace("-SBS", "").replace('+', "")
}

/// Fuzzy route filter: modifier-insensitive equality. An empty request set
/// accepts every route. Known precision tradeoff — any route whose
/// canonical form collides with a requested one passes.
fn route_matches(requested: &HashSet<String>, route: &str) -> bool {
    if requested.is_empty() {
        return true;
    }
    let base = canonical_route(route);
    requested.iter().any(|r| canonical_route(r) == base)
}

/// Convert a stop-monitoring timestamp to epoch seconds.
///
/// The upstream feed reports ISO-8601 with a fixed `-05:00` offset and does
/// not reliably vary it; the offset and fractional seconds are cut off, the
/// naive time is read as UTC, and the known offset is added back. Known
/// limitation: if the feed ever reports a different offset (e.g. across a
/// daylight-saving transition) this silently lands an hour off.
fn siri_timestamp_to_epoch(raw: &str) -> Option<i64> {
    let trimmed = raw.split("-05:00").next().unwrap_or(raw);
    let trimmed = trimmed.split('.').next().unwrap_or(trimmed);
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S").ok()?;
    Some(naive.and_utc().timestamp() + FEED_UTC_OFFSET_SECS)
}

/// Normalizes decoded stop-monitoring documents. Stateless.
pub struct BusNormalizer;

impl Normalizer for BusNormalizer {
    /// One decoded document per successfully fetched stop id; the stop
    /// filter is applied at fetch time, not here.
    type ArrivalPayload = Vec<StopMonitoringResponse>;
    /// BusTime carries no alert feed; the alerts list is always empty.
    type AlertPayload = ();
    type Direction = SubwayDirection;

    fn normalize_arrivals(
        &self,
        payload: &Vec<StopMonitoringResponse>,
        query: &ArrivalQuery,
        now_epoch: f64,
    ) -> Buckets<SubwayDirection> {
        let mut buckets = Buckets::new();

        for document in payload {
            for delivery in &document.siri.service_delivery.stop_monitoring_delivery {
                for visit in &delivery.monitored_stop_visit {
                    let journey = &visit.monitored_vehicle_journey;

                    let line_ref = journey.line_ref.as_deref().unwrap_or("");
                    let route = line_ref.strip_prefix(LINE_REF_PREFIX).unwrap_or(line_ref);
                    if !route_matches(&query.lines, route) {
                        continue;
                    }

                    let Some(arrival_epoch) = journey
                        .monitored_call
                        .as_ref()
                        .and_then(|call| call.expected_arrival_time.as_deref())
                        .and_then(siri_timestamp_to_epoch)
                    else {
                        continue;
                    };

                    let minutes = ((arrival_epoch as f64 - now_epoch) / 60.0) as i64;
                    if minutes > VALIDITY_WINDOW_MINUTES {
                        continue;
                    }

                    let direction = match journey.direction_ref.as_deref() {
                        Some(d) if d.eq_ignore_ascii_case("NORTH") => SubwayDirection::North,
                        _ => SubwayDirection::South,
                    };

                    buckets.push(
                        direction,
                        Arrival {
                            line: route.to_string(),
                            destination: journey.destination_name.clone().unwrap_or_default(),
                            // Due or past-due buses show as 0.
                            minutes_away: minutes.max(0) as u32,
                        },
                    );
                }
            }
        }

        buckets
    }

    fn normalize_alerts(
        &self,
        _payload: &(),
        _lines: &HashSet<String>,
        _now_epoch: i64,
    ) -> Vec<AlertNotice> {
        Vec::new()
    }
}

/// Bus feed fetcher — request-scoped.
pub struct BusClient<'a> {
    http: &'a reqwest::Client,
    config: &'a BusConfig,
}

impl<'a> BusClient<'a> {
    pub fn new(http: &'a reqwest::Client, config: &'a BusConfig) -> Self {
        BusClient { http, config }
    }

    /// Fetch each requested stop in parallel and normalize the documents
    /// that came back. A failed stop is skipped; the rest still count.
    pub async fn fetch_arrivals(&self, query: &ArrivalQuery) -> Buckets<SubwayDirection> {
        let mut join_set = JoinSet::new();
        for stop_id in &query.stations {
            let http = self.http.clone();
            let url = self.config.stop_monitoring_url.clone();
            let api_key = self.config.api_key.clone();
            let stop_id = stop_id.clone();
            join_set.spawn(async move {
                let result = fetch_stop(&http, &url, &api_key, &stop_id).await;
                (stop_id, result)
            });
        }

        let mut documents = Vec::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((_, Ok(document))) => documents.push(document),
                Ok((stop_id, Err(e))) => {
                    warn!("[BUS] Error fetching stop {}: {}", stop_id, e);
                }
                Err(e) => {
                    warn!("[BUS] Stop fetch task panicked: {}", e);
                }
            }
        }

        BusNormalizer.normalize_arrivals(&documents, query, epoch_now())
    }
}

async fn fetch_stop(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    stop_id: &str,
) -> Result<StopMonitoringResponse, FeedError> {
    let response = http
        .get(url)
        .query(&[
            ("key", api_key),
            ("OperatorRef", "MTA"),
            ("MonitoringRef", stop_id),
            ("version", "2"),
            ("StopMonitoringDetailLevel", "normal"),
        ])
        .send()
        .await
        .map_err(|e| FeedError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FeedError::Status(response.status().as_u16()));
    }

    response
        .json::<StopMonitoringResponse>()
        .await
        .map_err(|e| FeedError::Decode(e.to_string()))
}
