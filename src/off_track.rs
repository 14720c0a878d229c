use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Direction, PitEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackStatus {
    OnTrack,
    OffTrack,
    Unknown,
}

impl std::fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TrackStatus::OnTrack => "ON TRACK",
            TrackStatus::OffTrack => "OFF TRACK",
            TrackStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OffTrackResult {
    pub status: TrackStatus,
    /// Seconds since the open (unmatched) IN; 0 when on track.
    pub current_off_seconds: f64,
    /// Cumulative off-track seconds as of `now`, open interval included.
    pub total_off_seconds: f64,
    pub last_in: Option<DateTime<Utc>>,
    pub last_out: Option<DateTime<Utc>>,
}

impl OffTrackResult {
    fn unknown() -> Self {
        OffTrackResult {
            status: TrackStatus::Unknown,
            current_off_seconds: 0.0,
            total_off_seconds: 0.0,
            last_in: None,
            last_out: None,
        }
    }
}

/// Reconstructs a vehicle's off-track standing from an append-only pit log.
///
/// The log may be unsorted, may mix vehicles, and may be malformed (double
/// IN, orphan OUT, trailing open IN); every malformation resolves to a
/// well-defined result. Pure in `(log, vehicle_id, now)` and never panics.
///
/// Policies for malformed sequences:
/// - a second IN while one is already open moves the open start forward to
///   the newer IN; the earlier interval's time is dropped, not double-counted
/// - an OUT with no open IN, or an OUT earlier than the open IN, contributes
///   nothing
/// - simultaneous timestamps keep their input order (stable sort)
pub fn compute_off_track(
    log: &[PitEvent],
    vehicle_id: &str,
    now: DateTime<Utc>,
) -> OffTrackResult {
    let wanted = vehicle_id.trim();
    if wanted.is_empty() {
        return OffTrackResult::unknown();
    }

    let mut events: Vec<&PitEvent> = log
        .iter()
        .filter(|e| e.vehicle_id.trim() == wanted)
        .collect();
    events.sort_by_key(|e| e.timestamp);

    let mut open_since: Option<DateTime<Utc>> = None;
    let mut total_off_seconds = 0.0_f64;
    let mut last_in: Option<DateTime<Utc>> = None;
    let mut last_out: Option<DateTime<Utc>> = None;

    for event in events {
        match event.direction {
            Direction::In => {
                open_since = Some(event.timestamp);
                last_in = Some(event.timestamp);
            }
            Direction::Out => {
                last_out = Some(event.timestamp);
                if let Some(start) = open_since {
                    if event.timestamp >= start {
                        total_off_seconds += seconds_between(start, event.timestamp);
                        open_since = None;
                    }
                }
            }
        }
    }

    match open_since {
        Some(start) => {
            let current = seconds_between(start, now);
            OffTrackResult {
                status: TrackStatus::OffTrack,
                current_off_seconds: current,
                total_off_seconds: total_off_seconds + current,
                last_in,
                last_out,
            }
        }
        None => OffTrackResult {
            status: TrackStatus::OnTrack,
            current_off_seconds: 0.0,
            total_off_seconds,
            last_in,
            last_out,
        },
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}
