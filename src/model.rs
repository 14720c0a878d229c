use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a pit-lane crossing. IN means the vehicle leaves the track
/// and enters the pit; OUT means it rejoins the track. This polarity is a
/// domain convention and must not be reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

/// One validated observation of a vehicle crossing the track boundary.
#[derive(Debug, Clone, Serialize)]
pub struct PitEvent {
    pub vehicle_id: String,
    pub direction: Direction,
    /// Free-form station label ("entry"/"exit"); carried for display only.
    pub station: String,
    pub timestamp: DateTime<Utc>,
    /// Coarse grouping label (e.g. calendar day); not used in computation.
    pub session_id: String,
}

/// Wire/storage shape of a pit event, before validation. Timestamps arrive
/// as strings and may be unparseable; those records are dropped here so the
/// engine only ever sees well-typed events.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPitEvent {
    pub vehicle_id: String,
    pub direction: Direction,
    #[serde(default)]
    pub station: String,
    pub timestamp: String,
    #[serde(default)]
    pub session_id: String,
}

impl RawPitEvent {
    pub fn validate(self) -> Option<PitEvent> {
        let vehicle_id = self.vehicle_id.trim().to_string();
        if vehicle_id.is_empty() {
            return None;
        }
        let timestamp = parse_instant(&self.timestamp)?;
        Some(PitEvent {
            vehicle_id,
            direction: self.direction,
            station: self.station,
            timestamp,
            session_id: self.session_id,
        })
    }
}

/// A completion observation for a competition category, recorded manually
/// or inferred from a leaderboard scrape.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionEvent {
    pub event_category: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCompletionEvent {
    pub event_category: String,
    pub timestamp: String,
}

impl RawCompletionEvent {
    pub fn validate(self) -> Option<CompletionEvent> {
        let event_category = self.event_category.trim().to_string();
        if event_category.is_empty() {
            return None;
        }
        let timestamp = parse_instant(&self.timestamp)?;
        Some(CompletionEvent {
            event_category,
            timestamp,
        })
    }
}

/// First-observation record for a unique key (e.g. car number). Once
/// recorded, `first_seen_at` never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenRecord {
    pub key: String,
    pub first_seen_at: DateTime<Utc>,
}

/// RFC 3339 first, epoch milliseconds as a fallback for older exports.
/// Returns None rather than erroring on anything else.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Compact pit-board duration label: `0` -> "0m 00s", `3661` -> "1h 01m 01s".
/// Negative input clamps to zero.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else {
        format!("{}m {:02}s", m, s)
    }
}
