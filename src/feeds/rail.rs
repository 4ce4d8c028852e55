//! WMATA rail provider: GTFS-RT trip updates + the incidents JSON API.

use std::collections::HashSet;

use prost::Message;
use serde::Deserialize;
use tracing::warn;

use crate::config::RailConfig;
use crate::models::{AlertNotice, Arrival, Buckets, RailDirection};
use crate::stations;

use super::transit_realtime::FeedMessage;
use super::{clean_message, epoch_now, round_minutes, ArrivalQuery, FeedError, Normalizer};

/// Predictions outside 0..=200 minutes are stale or not actionable.
const VALIDITY_WINDOW_MINUTES: f64 = 200.0;

/// WMATA incidents response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IncidentsDocument {
    #[serde(default)]
    incidents: Vec<Incident>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Incident {
    description: Option<String>,
}

/// Extract the three-character station code from a feed stop id
/// (e.g. "PF_A01_C" → "A01").
fn station_code(stop_id: &str) -> Option<&str> {
    stop_id.get(3..6)
}

/// Normalizes decoded WMATA payloads. Stateless.
pub struct RailNormalizer;

impl Normalizer for RailNormalizer {
    type ArrivalPayload = FeedMessage;
    type AlertPayload = IncidentsDocument;
    type Direction = RailDirection;

    fn normalize_arrivals(
        &self,
        payload: &FeedMessage,
        query: &ArrivalQuery,
        now_epoch: f64,
    ) -> Buckets<RailDirection> {
        let mut buckets = Buckets::new();

        for entity in &payload.entity {
            let Some(ref trip_update) = entity.trip_update else {
                continue;
            };
            let route_id = trip_update.trip.route_id.as_deref().unwrap_or("");
            if !query.lines.contains(route_id) {
                continue;
            }

            // Unlike the subway, direction comes from the trip itself.
            let direction = match trip_update.trip.direction_id {
                Some(0) => RailDirection::Northeast,
                Some(1) => RailDirection::Southwest,
                _ => continue,
            };

            let destination = trip_update
                .stop_time_update
                .last()
                .and_then(|st| st.stop_id.as_deref())
                .and_then(station_code)
                .and_then(stations::rail_station_name);

            for stop_time in &trip_update.stop_time_update {
                let Some(code) = stop_time.stop_id.as_deref().and_then(station_code) else {
                    continue;
                };
                if !query.stations.contains(code) {
                    continue;
                }
                let Some(arrival_ts) = stop_time.arrival.as_ref().and_then(|a| a.time) else {
                    continue;
                };

                let minutes = (arrival_ts as f64 - now_epoch) / 60.0;
                if minutes < 0.0 || minutes > VALIDITY_WINDOW_MINUTES {
                    continue;
                }

                let Some(destination) = destination else {
                    continue;
                };

                buckets.push(
                    direction,
                    Arrival {
                        line: route_id.to_string(),
                        destination: destination.to_string(),
                        minutes_away: round_minutes(minutes),
                    },
                );
            }
        }

        buckets
    }

    /// Incident descriptions carry no structured affected-line field; a
    /// requested line matches when it appears as a case-insensitive
    /// substring of the description. Known precision tradeoff — a short
    /// line code can match unrelated text.
    fn normalize_alerts(
        &self,
        payload: &IncidentsDocument,
        lines: &HashSet<String>,
        _now_epoch: i64,
    ) -> Vec<AlertNotice> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut notices = Vec::new();

        for incident in &payload.incidents {
            let Some(ref description) = incident.description else {
                continue;
            };
            let haystack = description.to_uppercase();
            for line in lines {
                if !haystack.contains(&line.to_uppercase()) {
                    continue;
                }
                let message = clean_message(description);
                if message.is_empty() {
                    continue;
                }
                if seen.insert((line.clone(), message.clone())) {
                    notices.push(AlertNotice {
                        line: line.clone(),
                        message,
                    });
                }
            }
        }

        notices
    }
}

/// Rail feed fetcher — request-scoped.
pub struct RailClient<'a> {
    http: &'a reqwest::Client,
    config: &'a RailConfig,
}

impl<'a> RailClient<'a> {
    pub fn new(http: &'a reqwest::Client, config: &'a RailConfig) -> Self {
        RailClient { http, config }
    }

    /// Fetch and normalize trip updates. Failure degrades to empty buckets.
    pub async fn fetch_arrivals(&self, query: &ArrivalQuery) -> Buckets<RailDirection> {
        let feed = match fetch_trip_updates(self.http, self.config).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!("[RAIL] Error fetching trip updates: {}", e);
                return Buckets::new();
            }
        };
        RailNormalizer.normalize_arrivals(&feed, query, epoch_now())
    }

    /// Fetch and normalize incidents. Failure degrades to no alerts.
    pub async fn fetch_alerts(&self, lines: &HashSet<String>) -> Vec<AlertNotice> {
        let document = match fetch_incidents(self.http, self.config).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("[RAIL] Error fetching incidents: {}", e);
                return Vec::new();
            }
        };
        RailNormalizer.normalize_alerts(&document, lines, epoch_now() as i64)
    }
}

async fn fetch_trip_updates(
    http: &reqwest::Client,
    config: &RailConfig,
) -> Result<FeedMessage, FeedError> {
    let response = http
        .get(&config.trip_updates_url)
        .header("api_key", &config.api_key)
        .send()
        .await
        .map_err(|e| FeedError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FeedError::Status(response.status().as_u16()));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FeedError::Http(e.to_string()))?;

    FeedMessage::decode(bytes.as_ref()).map_err(|e| FeedError::Decode(e.to_string()))
}

async fn fetch_incidents(
    http: &reqwest::Client,
    config: &RailConfig,
) -> Result<IncidentsDocument, FeedError> {
    let response = http
        .get(&config.incidents_url)
        .header("api_key", &config.api_key)
        .send()
        .await
        .map_err(|e| FeedError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FeedError::Status(response.status().as_u16()));
    }

    response
        .json::<IncidentsDocument>()
        .await
        .map_err(|e| FeedError::Decode(e.to_string()))
}
