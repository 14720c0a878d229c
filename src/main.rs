use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use pit_board_backend::config::EngineConfig;
use pit_board_backend::model::{
    format_duration, parse_instant, CompletionEvent, PitEvent, RawCompletionEvent, RawPitEvent,
    SeenRecord,
};
use pit_board_backend::off_track::compute_off_track;
use pit_board_backend::run_rate::{estimate_run_rate, RateSource};
use pit_board_backend::seen_set::{extract_valid_identifiers, update_seen};

// ---------- Shared state ----------

#[derive(Clone)]
struct AppState {
    cfg: Arc<EngineConfig>,
    board: Arc<Mutex<Board>>,
}

/// Everything the day's operators have recorded or scraped so far. The core
/// algorithms are stateless; this is the single place state lives.
#[derive(Default)]
struct Board {
    pit_log: Vec<PitEvent>,
    completions: Vec<CompletionEvent>,
    ledger: Vec<SeenRecord>,
    active_category: String,
}

// ---------- Wire protocol ----------

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IngestMsg {
    /// Pit-lane crossing from a crew button press.
    Pit(RawPitEvent),
    /// Manually recorded completion for the active category.
    Completion {
        #[serde(flatten)]
        event: RawCompletionEvent,
        #[serde(default)]
        queue_length: usize,
    },
    /// Raw leaderboard text from one scrape of the results feed.
    Feed {
        text: String,
        #[serde(default)]
        last_updated: Option<String>,
        #[serde(default)]
        queue_length: usize,
    },
    /// Switch the active category; clears completions and the ledger so
    /// unrelated throughput data never mixes.
    SetCategory { category: String },
    /// Read-only off-track status for one vehicle.
    Status { vehicle_id: String },
}

#[derive(Debug, Error)]
enum IngestError {
    #[error("invalid message: {0}")]
    BadFrame(#[from] serde_json::Error),
    #[error("event rejected: unparseable timestamp or blank identifier")]
    BadEvent,
}

// ---------- Handler ----------

fn handle_frame(
    state: &AppState,
    text: &str,
    now: DateTime<Utc>,
) -> Result<serde_json::Value, IngestError> {
    let msg: IngestMsg = serde_json::from_str(text)?;
    match msg {
        IngestMsg::Pit(raw) => {
            let event = raw.validate().ok_or(IngestError::BadEvent)?;
            let mut board = state.board.lock();
            board.pit_log.push(event.clone());
            let result = compute_off_track(&board.pit_log, &event.vehicle_id, now);
            let current_off = format_duration(result.current_off_seconds);
            let total_off = format_duration(result.total_off_seconds);
            tracing::info!(
                "[ pit ] car={} {:?} status={} current={} total={}",
                event.vehicle_id,
                event.direction,
                result.status,
                current_off,
                total_off,
            );
            Ok(json!({
                "vehicle_id": event.vehicle_id,
                "result": result,
                "current_off": current_off,
                "total_off": total_off,
            }))
        }
        IngestMsg::Completion {
            event,
            queue_length,
        } => {
            let event = event.validate().ok_or(IngestError::BadEvent)?;
            let mut board = state.board.lock();
            if board.active_category.is_empty() {
                board.active_category = event.event_category.clone();
            } else if board.active_category != event.event_category {
                tracing::warn!(
                    "completion for {} ignored by estimator; active category is {}",
                    event.event_category,
                    board.active_category
                );
            }
            board.completions.push(event);
            let estimate = estimate_run_rate(
                RateSource::Manual {
                    completions: &board.completions,
                    category: &board.active_category,
                },
                queue_length,
                &state.cfg,
                now,
            );
            tracing::info!(
                "[ rate ] category={} count={} rate={:.2}/min eta={}",
                board.active_category,
                estimate.count,
                estimate.rate_per_min,
                eta_label(estimate.eta_minutes),
            );
            Ok(json!({ "category": board.active_category.clone(), "estimate": estimate }))
        }
        IngestMsg::Feed {
            text,
            last_updated,
            queue_length,
        } => {
            let identifiers = extract_valid_identifiers(&text);
            let feed_last_updated = last_updated.as_deref().and_then(parse_instant);
            let mut board = state.board.lock();
            let update = update_seen(&board.ledger, &identifiers, now, state.cfg.seen_capacity);
            board.ledger = update.updated;
            let estimate = estimate_run_rate(
                RateSource::Feed {
                    ledger: &board.ledger,
                    feed_last_updated,
                },
                queue_length,
                &state.cfg,
                now,
            );
            tracing::info!(
                "[ feed ] seen={} new={} fresh={} rate={:.2}/min eta={}",
                board.ledger.len(),
                update.newly_added_count,
                estimate.fresh,
                estimate.rate_per_min,
                eta_label(estimate.eta_minutes),
            );
            Ok(json!({
                "newly_added": update.newly_added_count,
                "ledger_len": board.ledger.len(),
                "estimate": estimate,
            }))
        }
        IngestMsg::SetCategory { category } => {
            let category = category.trim().to_string();
            let mut board = state.board.lock();
            board.active_category = category.clone();
            board.completions.clear();
            board.ledger.clear();
            tracing::info!("[ cat ] switched to {:?}; session data reset", category);
            Ok(json!({ "category": category, "reset": true }))
        }
        IngestMsg::Status { vehicle_id } => {
            let board = state.board.lock();
            let result = compute_off_track(&board.pit_log, &vehicle_id, now);
            let current_off = format_duration(result.current_off_seconds);
            let total_off = format_duration(result.total_off_seconds);
            Ok(json!({
                "vehicle_id": vehicle_id.trim(),
                "result": result,
                "current_off": current_off,
                "total_off": total_off,
            }))
        }
    }
}

fn eta_label(eta_minutes: Option<f64>) -> String {
    match eta_minutes {
        Some(m) => format!("{:.1}min", m),
        None => "unknown".to_string(),
    }
}

// ---------- Server ----------

async fn handle_connection(state: AppState, stream: TcpStream) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("websocket handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("read error, closing connection: {}", e);
                break;
            }
        };
        if !msg.is_text() {
            continue;
        }
        let reply = match handle_frame(&state, &msg.to_string(), Utc::now()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("rejected frame: {}", e);
                json!({ "error": e.to_string() })
            }
        };
        if let Err(e) = write.send(Message::Text(reply.to_string())).await {
            tracing::warn!("write error, closing connection: {}", e);
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = EngineConfig::resolve();
    let state = AppState {
        cfg: Arc::new(cfg),
        board: Arc::new(Mutex::new(Board::default())),
    };

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8765".to_string());
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("pit board listening on ws://{}", bind_addr);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_connection(state.clone(), stream));
            }
            Err(e) => {
                tracing::warn!("accept error: {}", e);
                // small delay to avoid a tight loop on persistent errors
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state() -> AppState {
        AppState {
            cfg: Arc::new(EngineConfig::default()),
            board: Arc::new(Mutex::new(Board::default())),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn pit_frame_appends_and_reports_status() {
        let state = state();
        let frame = json!({
            "type": "pit",
            "vehicle_id": "42",
            "direction": "IN",
            "station": "entry",
            "timestamp": "2026-04-18T09:30:00Z",
        });
        let reply = handle_frame(&state, &frame.to_string(), at(0)).unwrap();
        assert_eq!(reply["vehicle_id"], "42");
        assert_eq!(reply["result"]["status"], "OFF_TRACK");
        assert_eq!(state.board.lock().pit_log.len(), 1);
    }

    #[test]
    fn bad_timestamp_is_rejected_without_appending() {
        let state = state();
        let frame = json!({
            "type": "pit",
            "vehicle_id": "42",
            "direction": "IN",
            "timestamp": "around lunchtime",
        });
        let err = handle_frame(&state, &frame.to_string(), at(0)).unwrap_err();
        assert!(matches!(err, IngestError::BadEvent));
        assert!(state.board.lock().pit_log.is_empty());
    }

    #[test]
    fn garbage_json_is_a_bad_frame() {
        let state = state();
        let err = handle_frame(&state, "{not json", at(0)).unwrap_err();
        assert!(matches!(err, IngestError::BadFrame(_)));
    }

    #[test]
    fn category_switch_resets_completions_and_ledger() {
        let state = state();
        {
            let mut board = state.board.lock();
            board.active_category = "hill_climb".into();
            board.completions.push(CompletionEvent {
                event_category: "hill_climb".into(),
                timestamp: at(0),
            });
            board.ledger.push(SeenRecord {
                key: "42".into(),
                first_seen_at: at(0),
            });
        }
        let frame = json!({ "type": "set_category", "category": "acceleration" });
        let reply = handle_frame(&state, &frame.to_string(), at(10)).unwrap();
        assert_eq!(reply["reset"], true);

        let board = state.board.lock();
        assert_eq!(board.active_category, "acceleration");
        assert!(board.completions.is_empty());
        assert!(board.ledger.is_empty());
    }

    #[test]
    fn feed_frame_folds_ledger_and_estimates() {
        let state = state();
        let frame = json!({
            "type": "feed",
            "text": "1 42 TeamA OK 12.3\n2 7 TeamB OK 14.0\n3 9 TeamC BAD 1.0",
            "queue_length": 4,
        });
        let reply = handle_frame(&state, &frame.to_string(), at(0)).unwrap();
        assert_eq!(reply["newly_added"], 2);
        assert_eq!(reply["ledger_len"], 2);
        // Both entries were just inserted, so the fallback freshness holds.
        assert_eq!(reply["estimate"]["fresh"], true);
    }

    #[test]
    fn status_frame_does_not_append() {
        let state = state();
        let frame = json!({ "type": "status", "vehicle_id": "42" });
        let reply = handle_frame(&state, &frame.to_string(), at(0)).unwrap();
        assert_eq!(reply["result"]["status"], "ON_TRACK");
        assert!(state.board.lock().pit_log.is_empty());
    }
}
