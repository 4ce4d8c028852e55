use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

/// Maximum arrivals kept per direction bucket after ranking.
pub const MAX_PER_DIRECTION: usize = 11;

/// A closed set of travel directions for one provider.
///
/// Buckets are enums, not strings, so a typo'd bucket name is a compile
/// error instead of a silently empty list.
pub trait DirectionBucket: Copy + Eq + Hash + 'static {
    /// Every bucket, in the order it appears in the response body.
    const ALL: &'static [Self];

    /// Rider-facing bucket name used as the JSON key.
    fn label(self) -> &'static str;
}

/// Subway travel direction, derived from the stop id's N/S suffix.
///
/// Bus arrivals reuse this enum: the SIRI feed reports DirectionRef as
/// NORTH/SOUTH and the response keys match the subway board's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubwayDirection {
    North,
    South,
}

impl DirectionBucket for SubwayDirection {
    const ALL: &'static [Self] = &[SubwayDirection::North, SubwayDirection::South];

    fn label(self) -> &'static str {
        match self {
            SubwayDirection::North => "North",
            SubwayDirection::South => "South",
        }
    }
}

/// Rail travel direction, derived from the trip's direction_id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RailDirection {
    Northeast,
    Southwest,
}

impl DirectionBucket for RailDirection {
    const ALL: &'static [Self] = &[RailDirection::Northeast, RailDirection::Southwest];

    fn label(self) -> &'static str {
        match self {
            RailDirection::Northeast => "NE",
            RailDirection::Southwest => "SW",
        }
    }
}

/// One predicted vehicle arrival.
///
/// Only constructed after the provider's validity-window check passes, so
/// `minutes_away` is always in range for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    pub line: String,
    pub destination: String,
    pub minutes_away: u32,
}

/// One active service alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertNotice {
    pub line: String,
    pub message: String,
}

/// Direction-bucketed arrivals for one request.
#[derive(Debug)]
pub struct Buckets<D: DirectionBucket> {
    entries: HashMap<D, Vec<Arrival>>,
}

impl<D: DirectionBucket> Buckets<D> {
    pub fn new() -> Self {
        Buckets {
            entries: HashMap::new(),
        }
    }

    pub fn push(&mut self, direction: D, arrival: Arrival) {
        self.entries.entry(direction).or_default().push(arrival);
    }

    pub fn get(&self, direction: D) -> &[Arrival] {
        self.entries
            .get(&direction)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }

    /// Sort each bucket ascending by minutes away and keep the first
    /// [`MAX_PER_DIRECTION`] entries. The sort is stable, so ties keep the
    /// order the normalizer produced them in.
    pub fn rank_and_cap(mut self) -> Self {
        for arrivals in self.entries.values_mut() {
            arrivals.sort_by_key(|a| a.minutes_away);
            arrivals.truncate(MAX_PER_DIRECTION);
        }
        self
    }
}

impl<D: DirectionBucket> Default for Buckets<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire form of one arrival: the bucket label rides along so a client can
/// flatten all buckets and still classify each entry.
#[derive(Debug, Serialize)]
pub struct ArrivalEntry {
    pub line: String,
    pub destination: String,
    pub direction: &'static str,
    pub minutes_away: u32,
}

/// Final reply body: one key per direction bucket plus `alerts`.
///
/// Buckets appear in the enum's declared order; alerts keep insertion order.
#[derive(Debug, Serialize)]
pub struct ArrivalsResponse {
    #[serde(flatten)]
    buckets: serde_json::Map<String, serde_json::Value>,
    alerts: Vec<AlertNotice>,
}

impl ArrivalsResponse {
    /// Combine ranked buckets and alerts into the reply object. Every bucket
    /// of the provider appears in the output, empty or not.
    pub fn assemble<D: DirectionBucket>(buckets: Buckets<D>, alerts: Vec<AlertNotice>) -> Self {
        let mut out = serde_json::Map::new();
        for &direction in D::ALL {
            let entries: Vec<ArrivalEntry> = buckets
                .get(direction)
                .iter()
                .map(|a| ArrivalEntry {
                    line: a.line.clone(),
                    destination: a.destination.clone(),
                    direction: direction.label(),
                    minutes_away: a.minutes_away,
                })
                .collect();
            out.insert(
                direction.label().to_string(),
                serde_json::to_value(entries).unwrap_or_default(),
            );
        }
        ArrivalsResponse {
            buckets: out,
            alerts,
        }
    }
}
