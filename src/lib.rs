//! Core computation library for a Baja SAE pit-board backend: off-track
//! interval accounting, run-rate/ETA estimation, and the bounded first-seen
//! ledger that feeds it. Everything here is pure and synchronous; the
//! websocket service in `main.rs` owns the state and the clock.

pub mod config;
pub mod model;
pub mod off_track;
pub mod run_rate;
pub mod seen_set;

pub use config::EngineConfig;
pub use model::{
    format_duration, parse_instant, CompletionEvent, Direction, PitEvent, RawCompletionEvent,
    RawPitEvent, SeenRecord,
};
pub use off_track::{compute_off_track, OffTrackResult, TrackStatus};
pub use run_rate::{estimate_run_rate, RateEstimate, RateSource};
pub use seen_set::{extract_valid_identifiers, update_seen, SeenUpdate};
