//! MTA subway provider: GTFS-RT trip updates + the camsys alerts document.

use std::collections::HashSet;

use prost::Message;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::SubwayConfig;
use crate::models::{AlertNotice, Arrival, Buckets, SubwayDirection};
use crate::stations;

use super::transit_realtime::FeedMessage;
use super::{clean_message, epoch_now, round_minutes, ArrivalQuery, FeedError, Normalizer};

/// Predictions outside 0..=200 minutes are stale or not actionable.
const VALIDITY_WINDOW_MINUTES: f64 = 200.0;

/// Returns the feed URL suffix covering a route, if known.
///
/// Each MTA realtime feed carries a group of routes; the suffix is appended
/// to the configured base URL.
fn feed_suffix_for_line(line: &str) -> Option<&'static str> {
    match line {
        // IRT: 1, 2, 3, 4, 5, 6, GS
        "1" | "2" | "3" | "4" | "5" | "6" | "GS" => Some(""),
        "7" => Some("-7"),
        "A" | "C" | "E" => Some("-ace"),
        "B" | "D" | "F" | "M" => Some("-bdfm"),
        "G" => Some("-g"),
        "J" | "Z" => Some("-jz"),
        "N" | "Q" | "R" | "W" => Some("-nqrw"),
        "L" => Some("-l"),
        "SI" | "SIR" => Some("-si"),
        _ => None,
    }
}

/// Deduplicated feed URLs needed to cover a set of lines.
fn feed_urls_for_lines(base_url: &str, lines: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for line in lines {
        if let Some(suffix) = feed_suffix_for_line(line) {
            if seen.insert(suffix) {
                urls.push(format!("{}{}", base_url, suffix));
            }
        }
    }
    urls
}

/// Camsys subway alerts document (GTFS-RT service alerts as JSON).
/// Every field is optional so one malformed alert never fails the batch.
#[derive(Debug, Default, Deserialize)]
pub struct AlertsDocument {
    #[serde(default)]
    entity: Vec<AlertEntity>,
}

#[derive(Debug, Deserialize)]
struct AlertEntity {
    alert: Option<AlertBody>,
}

#[derive(Debug, Deserialize)]
struct AlertBody {
    #[serde(default)]
    active_period: Vec<ActivePeriod>,
    #[serde(default)]
    informed_entity: Vec<InformedEntity>,
    header_text: Option<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct ActivePeriod {
    start: Option<i64>,
    end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InformedEntity {
    route_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    #[serde(default)]
    translation: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: Option<String>,
}

/// Normalizes decoded subway payloads. Stateless.
pub struct SubwayNormalizer;

impl Normalizer for SubwayNormalizer {
    type ArrivalPayload = FeedMessage;
    type AlertPayload = AlertsDocument;
    type Direction = SubwayDirection;

    fn normalize_arrivals(
        &self,
        payload: &FeedMessage,
        query: &ArrivalQuery,
        now_epoch: f64,
    ) -> Buckets<SubwayDirection> {
        let mut buckets = Buckets::new();

        for entity in &payload.entity {
            let Some(ref trip_update) = entity.trip_update else {
                continue;
            };
            let route_id = trip_update.trip.route_id.as_deref().unwrap_or("");
            if !query.lines.contains(route_id) {
                continue;
            }

            // Destination label comes from the trip's final stop.
            let destination = trip_update
                .stop_time_update
                .last()
                .and_then(|st| st.stop_id.as_deref())
                .and_then(stations::subway_station_name);

            for stop_time in &trip_update.stop_time_update {
                let Some(stop_id) = stop_time.stop_id.as_deref() else {
                    continue;
                };
                if !query.stations.contains(stop_id) {
                    continue;
                }
                let Some(arrival_ts) = stop_time.arrival.as_ref().and_then(|a| a.time) else {
                    continue;
                };

                let minutes = (arrival_ts as f64 - now_epoch) / 60.0;
                if minutes < 0.0 || minutes > VALIDITY_WINDOW_MINUTES {
                    continue;
                }

                // Stop ids encode direction in their final character.
                let direction = match stop_id.chars().last() {
                    Some('N') => SubwayDirection::North,
                    Some('S') => SubwayDirection::South,
                    _ => continue,
                };

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

    fn normalize_alerts(
        &self,
        payload: &AlertsDocument,
        lines: &HashSet<String>,
        now_epoch: i64,
    ) -> Vec<AlertNotice> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut notices = Vec::new();

        for entity in &payload.entity {
            let Some(ref alert) = entity.alert else {
                continue;
            };

            // Strictly-active window test: start < now < end for some period.
            let active = alert.active_period.iter().any(|period| {
                matches!((period.start, period.end),
                    (Some(start), Some(end)) if start < now_epoch && now_epoch < end)
            });
            if !active {
                continue;
            }

            let Some(line) = alert
                .informed_entity
                .first()
                .and_then(|ie| ie.route_id.as_deref())
            else {
                continue;
            };
            if !lines.contains(line) {
                continue;
            }

            let Some(text) = alert
                .header_text
                .as_ref()
                .and_then(|h| h.translation.first())
                .and_then(|t| t.text.as_deref())
            else {
                continue;
            };
            let message = clean_message(text);
            if message.is_empty() {
                continue;
            }

            if seen.insert((line.to_string(), message.clone())) {
                notices.push(AlertNotice {
                    line: line.to_string(),
                    message,
                });
            }
        }

        notices
    }
}

/// Subway feed fetcher — request-scoped, no state beyond borrowed handles.
pub struct SubwayClient<'a> {
    http: &'a reqwest::Client,
    config: &'a SubwayConfig,
}

impl<'a> SubwayClient<'a> {
    pub fn new(http: &'a reqwest::Client, config: &'a SubwayConfig) -> Self {
        SubwayClient { http, config }
    }

    /// Fetch every feed covering the requested lines in parallel, then
    /// normalize into direction buckets. A failed feed contributes nothing.
    pub async fn fetch_arrivals(&self, query: &ArrivalQuery) -> Buckets<SubwayDirection> {
        let urls = feed_urls_for_lines(&self.config.feed_base_url, &query.lines);

        let mut join_set = JoinSet::new();
        for url in urls {
            let http = self.http.clone();
            let api_key = self.config.api_key.clone();
            join_set.spawn(async move {
                let result = fetch_feed(&http, &url, &api_key).await;
                (url, result)
            });
        }

        let now = epoch_now();
        let mut buckets = Buckets::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((url, Ok(feed))) => {
                    debug!("[SUBWAY] Feed {} returned {} entities", url, feed.entity.len());
                    merge(
                        &mut buckets,
                        SubwayNormalizer.normalize_arrivals(&feed, query, now),
                    );
                }
                Ok((url, Err(e))) => {
                    warn!("[SUBWAY] Error fetching {}: {}", url, e);
                }
                Err(e) => {
                    warn!("[SUBWAY] Feed fetch task panicked: {}", e);
                }
            }
        }
        buckets
    }

    /// Fetch and normalize the alerts document. Failure degrades to an
    /// empty alert list.
    pub async fn fetch_alerts(&self, lines: &HashSet<String>) -> Vec<AlertNotice> {
        let document = match fetch_alerts_document(self.http, self.config).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("[SUBWAY] Error fetching alerts: {}", e);
                return Vec::new();
            }
        };
        SubwayNormalizer.normalize_alerts(&document, lines, epoch_now() as i64)
    }
}

fn merge(into: &mut Buckets<SubwayDirection>, from: Buckets<SubwayDirection>) {
    use crate::models::DirectionBucket;
    for &direction in SubwayDirection::ALL {
        for arrival in from.get(direction) {
            into.push(direction, arrival.clone());
        }
    }
}

/// Fetch and decode one GTFS-RT feed. The decoder is freshly constructed
/// per call; nothing is reused across fetches.
async fn fetch_feed(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
) -> Result<FeedMessage, FeedError> {
    let response = http
        .get(url)
        .header("x-api-key", api_key)
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

async fn fetch_alerts_document(
    http: &reqwest::Client,
    config: &SubwayConfig,
) -> Result<AlertsDocument, FeedError> {
    let response = http
        .get(&config.alerts_url)
        .header("x-api-key", &config.api_key)
        .send()
        .await
        .map_err(|e| FeedError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FeedError::Status(response.status().as_u16()));
    }

    response
        .json::<AlertsDocument>()
        .await
        .map_err(|e| FeedError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::transit_realtime::{
        trip_update::{StopTimeEvent, StopTimeUpdate},
        FeedEntity, FeedHeader, TripDescriptor, TripUpdate,
    };

    const NOW: f64 = 1_700_000_000.0;

    fn stop_time(stop_id: &str, arrival_offset_secs: i64) -> StopTimeUpdate {
        StopTimeUpdate {
            stop_id: Some(stop_id.to_string()),
            arrival: Some(StopTimeEvent {
                time: Some(NOW as i64 + arrival_offset_secs),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn trip_entity(id: &str, route: &str, stops: Vec<StopTimeUpdate>) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor {
                    route_id: Some(route.to_string()),
                    ..Default::default()
                },
                stop_time_update: stops,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn feed(entities: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                ..Default::default()
            },
            entity: entities,
        }
    }

    fn query(stations: &[&str], lines: &[&str]) -> ArrivalQuery {
        ArrivalQuery {
            stations: stations.iter().map(|s| s.to_string()).collect(),
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_basic_arrival_bucketing() {
        // Trip ends at South Ferry (142), so downtown arrivals at Times Sq
        // are labeled with that terminal.
        let payload = feed(vec![trip_entity(
            "t1",
            "1",
            vec![stop_time("127S", 300), stop_time("142S", 900)],
        )]);
        let buckets =
            SubwayNormalizer.normalize_arrivals(&payload, &query(&["127S"], &["1"]), NOW);

        let south = buckets.get(SubwayDirection::South);
        assert_eq!(south.len(), 1);
        assert_eq!(south[0].line, "1");
        assert_eq!(south[0].destination, "South Ferry");
        assert_eq!(south[0].minutes_away, 5);
        assert!(buckets.get(SubwayDirection::North).is_empty());
    }

    #[test]
    fn test_sub_minute_prediction_clamps_to_zero() {
        let payload = feed(vec![trip_entity(
            "t1",
            "1",
            vec![stop_time("127N", 45), stop_time("101N", 1200)],
        )]);
        let buckets =
            SubwayNormalizer.normalize_arrivals(&payload, &query(&["127N"], &["1"]), NOW);
        assert_eq!(buckets.get(SubwayDirection::North)[0].minutes_away, 0);
    }

    #[test]
    fn test_prediction_beyond_window_dropped() {
        // 250 minutes out — past the 200-minute validity window.
        let payload = feed(vec![trip_entity(
            "t1",
            "1",
            vec![stop_time("127N", 250 * 60), stop_time("101N", 260 * 60)],
        )]);
        let buckets =
            SubwayNormalizer.normalize_arrivals(&payload, &query(&["127N"], &["1"]), NOW);
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_stale_prediction_dropped() {
        let payload = feed(vec![trip_entity(
            "t1",
            "1",
            vec![stop_time("127N", -120), stop_time("101N", 600)],
        )]);
        let buckets =
            SubwayNormalizer.normalize_arrivals(&payload, &query(&["127N"], &["1"]), NOW);
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_route_filter_applied() {
        let payload = feed(vec![
            trip_entity("t1", "1", vec![stop_time("127N", 300), stop_time("101N", 900)]),
            trip_entity("t2", "7", vec![stop_time("127N", 180), stop_time("701N", 900)]),
        ]);
        let buckets =
            SubwayNormalizer.normalize_arrivals(&payload, &query(&["127N"], &["1"]), NOW);
        let north = buckets.get(SubwayDirection::North);
        assert_eq!(north.len(), 1);
        assert_eq!(north[0].line, "1");
    }

    #[test]
    fn test_unclassifiable_direction_dropped() {
        // Stop id without an N/S suffix cannot be bucketed.
        let payload = feed(vec![trip_entity(
            "t1",
            "1",
            vec![stop_time("127X", 300), stop_time("142S", 900)],
        )]);
        let buckets =
            SubwayNormalizer.normalize_arrivals(&payload, &query(&["127X"], &["1"]), NOW);
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_malformed_entity_does_not_drop_batch() {
        let broken = FeedEntity {
            id: "broken".to_string(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor::default(), // no route_id
                stop_time_update: vec![StopTimeUpdate::default()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let payload = feed(vec![
            broken,
            trip_entity("ok", "1", vec![stop_time("127N", 300), stop_time("101N", 900)]),
        ]);
        let buckets =
            SubwayNormalizer.normalize_arrivals(&payload, &query(&["127N"], &["1"]), NOW);
        assert_eq!(buckets.get(SubwayDirection::North).len(), 1);
    }

    #[test]
    fn test_multiple_trips_all_kept() {
        let payload = feed(vec![
            trip_entity("t1", "1", vec![stop_time("127N", 300), stop_time("101N", 900)]),
            trip_entity("t2", "1", vec![stop_time("127N", 600), stop_time("101N", 1500)]),
        ]);
        let buckets =
            SubwayNormalizer.normalize_arrivals(&payload, &query(&["127N"], &["1"]), NOW);
        assert_eq!(buckets.get(SubwayDirection::North).len(), 2);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let payload = feed(vec![trip_entity(
            "t1",
            "1",
            vec![stop_time("127N", 300), stop_time("101N", 900)],
        )]);
        let q = query(&["127N"], &["1"]);
        let first = SubwayNormalizer.normalize_arrivals(&payload, &q, NOW);
        let second = SubwayNormalizer.normalize_arrivals(&payload, &q, NOW);
        assert_eq!(
            first.get(SubwayDirection::North),
            second.get(SubwayDirection::North)
        );
    }

    #[test]
    fn test_feed_urls_deduplicated() {
        let lines: HashSet<String> =
            ["1", "2", "3", "A"].iter().map(|s| s.to_string()).collect();
        let urls = feed_urls_for_lines("http://example/gtfs", &lines);
        // 1, 2, 3 share one feed; A is separate.
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_feed_suffix_unknown_line() {
        assert_eq!(feed_suffix_for_line("X"), None);
    }

    fn alerts_fixture() -> AlertsDocument {
        let json = format!(
            r#"{{
            "entity": [
                {{
                    "id": "a1",
                    "alert": {{
                        "active_period": [{{"start": {start}, "end": {end}}}],
                        "informed_entity": [{{"route_id": "1"}}],
                        "header_text": {{"translation": [{{"text": "Delays on the 1\nafter an  earlier incident"}}]}}
                    }}
                }},
                {{
                    "id": "a2",
                    "alert": {{
                        "active_period": [{{"start": {future_start}, "end": {future_end}}}],
                        "informed_entity": [{{"route_id": "1"}}],
                        "header_text": {{"translation": [{{"text": "Planned work next weekend"}}]}}
                    }}
                }},
                {{
                    "id": "a3",
                    "alert": {{
                        "active_period": [{{"start": {start}, "end": {end}}}],
                        "informed_entity": [{{"route_id": "7"}}],
                        "header_text": {{"translation": [{{"text": "7 trains rerouted"}}]}}
                    }}
                }},
                {{
                    "id": "broken",
                    "alert": {{
                        "active_period": [{{"start": {start}, "end": {end}}}],
                        "informed_entity": []
                    }}
                }}
            ]
        }}"#,
            start = NOW as i64 - 600,
            end = NOW as i64 + 600,
            future_start = NOW as i64 + 3600,
            future_end = NOW as i64 + 7200,
        );
        serde_json::from_str(&json).expect("fixture is valid JSON")
    }

    #[test]
    fn test_alerts_active_window_and_line_filter() {
        let lines: HashSet<String> = ["1".to_string()].into();
        let notices =
            SubwayNormalizer.normalize_alerts(&alerts_fixture(), &lines, NOW as i64);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].line, "1");
        // Newlines and doubled spaces collapsed.
        assert_eq!(
            notices[0].message,
            "Delays on the 1 after an earlier incident"
        );
    }

    #[test]
    fn test_alerts_malformed_entry_skipped() {
        // The "broken" alert has no informed entity or text; the other
        // matching alerts still come through.
        let lines: HashSet<String> = ["1".to_string(), "7".to_string()].into();
        let notices =
            SubwayNormalizer.normalize_alerts(&alerts_fixture(), &lines, NOW as i64);
        assert_eq!(notices.len(), 2);
    }

    #[test]
    fn test_alerts_deduplicated() {
        let json = format!(
            r#"{{"entity": [
                {{"id": "a", "alert": {{
                    "active_period": [{{"start": {s}, "end": {e}}}],
                    "informed_entity": [{{"route_id": "1"}}],
                    "header_text": {{"translation": [{{"text": "Same message"}}]}}}}}},
                {{"id": "b", "alert": {{
                    "active_period": [{{"start": {s}, "end": {e}}}],
                    "informed_entity": [{{"route_id": "1"}}],
                    "header_text": {{"translation": [{{"text": "Same  message"}}]}}}}}}
            ]}}"#,
            s = NOW as i64 - 60,
            e = NOW as i64 + 60,
        );
        let doc: AlertsDocument = serde_json::from_str(&json).unwrap();
        let lines: HashSet<String> = ["1".to_string()].into();
        let notices = SubwayNormalizer.normalize_alerts(&doc, &lines, NOW as i64);
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn test_alert_boundary_not_active() {
        // start == now fails the strict start < now test.
        let json = format!(
            r#"{{"entity": [
                {{"id": "a", "alert": {{
                    "active_period": [{{"start": {s}, "end": {e}}}],
                    "informed_entity": [{{"route_id": "1"}}],
                    "header_text": {{"translation": [{{"text": "Boundary"}}]}}}}}}
            ]}}"#,
            s = NOW as i64,
            e = NOW as i64 + 60,
        );
        let doc: AlertsDocument = serde_json::from_str(&json).unwrap();
        let lines: HashSet<String> = ["1".to_string()].into();
        assert!(SubwayNormalizer
            .normalize_alerts(&doc, &lines, NOW as i64)
            .is_empty());
    }
}
