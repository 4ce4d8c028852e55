//! Upstream feed fetchers and per-provider normalizers.

use std::collections::HashSet;
use std::time::Duration;

use crate::models::{AlertNotice, Buckets, DirectionBucket};

pub mod bus;
pub mod rail;
pub mod subway;

/// Generated protobuf types from gtfs-realtime.proto.
pub mod transit_realtime {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}

/// Build the pooled HTTP client shared by all upstream calls.
///
/// The client is immutable and connection pooling is its only shared state;
/// every fetch decodes into fresh values.
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("transit-board/1.0")
        .gzip(true)
        .pool_max_idle_per_host(4)
        .timeout(Duration::from_secs(10))
        .build()
}

/// Failure of one upstream call. Always recovered locally: the call's
/// contribution to the response becomes empty.
#[derive(Debug)]
pub enum FeedError {
    Http(String),
    Status(u16),
    Decode(String),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Http(msg) => write!(f, "HTTP error: {}", msg),
            FeedError::Status(code) => write!(f, "unexpected status: {}", code),
            FeedError::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl std::error::Error for FeedError {}

/// Station/line filter extracted from a request.
#[derive(Debug, Clone)]
pub struct ArrivalQuery {
    /// Provider-native stop/station identifiers.
    pub stations: HashSet<String>,
    /// Requested lines. Empty means unfiltered (bus only; the subway and
    /// rail handlers always resolve a non-empty set).
    pub lines: HashSet<String>,
}

/// Turns one provider's decoded payloads into normalized arrivals and
/// alerts. `now_epoch` is an explicit input so the output is a pure
/// function of payload + clock.
pub trait Normalizer {
    type ArrivalPayload;
    type AlertPayload;
    type Direction: DirectionBucket;

    fn normalize_arrivals(
        &self,
        payload: &Self::ArrivalPayload,
        query: &ArrivalQuery,
        now_epoch: f64,
    ) -> Buckets<Self::Direction>;

    fn normalize_alerts(
        &self,
        payload: &Self::AlertPayload,
        lines: &HashSet<String>,
        now_epoch: i64,
    ) -> Vec<AlertNotice>;
}

/// Current Unix time as seconds.
pub fn epoch_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Shared GTFS-RT minute rounding: due/sub-minute predictions show as 0,
/// everything else rounds to the nearest minute.
pub(crate) fn round_minutes(minutes: f64) -> u32 {
    if minutes < 1.0 {
        0
    } else {
        minutes.round() as u32
    }
}

/// Collapse all whitespace runs (including newlines) to single spaces.
pub(crate) fn clean_message(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
