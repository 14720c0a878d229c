use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::model::{CompletionEvent, SeenRecord};

/// Observation source feeding the estimator. Both shapes reduce to a count
/// of qualifying events plus the start of the observation window.
pub enum RateSource<'a> {
    /// Operator-recorded completions; the window starts at the first
    /// recorded completion for the selected category.
    Manual {
        completions: &'a [CompletionEvent],
        category: &'a str,
    },
    /// First-seen ledger built from periodic scrapes of a results feed;
    /// the window starts at the earliest `first_seen_at`.
    Feed {
        ledger: &'a [SeenRecord],
        feed_last_updated: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RateEstimate {
    /// Completions per minute; 0 when nothing qualifies or the feed is stale.
    pub rate_per_min: f64,
    pub count: usize,
    pub elapsed_minutes: f64,
    /// Minutes to clear the queue; None (displayed "unknown") when the rate
    /// is zero. Never NaN or infinite.
    pub eta_minutes: Option<f64>,
    pub source: &'static str,
    pub fresh: bool,
}

/// Derives a completion throughput and queue ETA from either source.
///
/// `elapsed_minutes` is floored at `cfg.min_window_minutes` (15 seconds by
/// default) so the rate cannot blow up right after the first observation.
/// A feed-mode estimate is only trusted while the feed shows recent
/// activity: the feed's own `last_updated` when it reports one, otherwise
/// any ledger entry added within the freshness window. Stale data degrades
/// to rate 0 and is labeled `fresh: false` rather than extrapolated.
pub fn estimate_run_rate(
    source: RateSource<'_>,
    queue_length: usize,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> RateEstimate {
    match source {
        RateSource::Manual {
            completions,
            category,
        } => {
            let wanted = category.trim();
            let mut count = 0;
            let mut window_start: Option<DateTime<Utc>> = None;
            for c in completions {
                if c.event_category.trim() != wanted {
                    continue;
                }
                count += 1;
                if window_start.map_or(true, |start| c.timestamp < start) {
                    window_start = Some(c.timestamp);
                }
            }
            // Manual observations come straight from the operator.
            assemble("manual", count, window_start, true, queue_length, cfg, now)
        }
        RateSource::Feed {
            ledger,
            feed_last_updated,
        } => {
            let window = Duration::seconds(cfg.freshness_window_s);
            let fresh = match feed_last_updated {
                Some(updated) => now.signed_duration_since(updated) <= window,
                None => ledger
                    .iter()
                    .any(|r| now.signed_duration_since(r.first_seen_at) <= window),
            };
            let window_start = ledger.iter().map(|r| r.first_seen_at).min();
            assemble("feed", ledger.len(), window_start, fresh, queue_length, cfg, now)
        }
    }
}

fn assemble(
    source: &'static str,
    count: usize,
    window_start: Option<DateTime<Utc>>,
    fresh: bool,
    queue_length: usize,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> RateEstimate {
    let elapsed_minutes = window_start
        .map(|start| now.signed_duration_since(start).num_milliseconds().max(0) as f64 / 60_000.0)
        .unwrap_or(0.0)
        .max(cfg.min_window_minutes);

    let rate_per_min = if count == 0 || !fresh {
        0.0
    } else {
        count as f64 / elapsed_minutes
    };
    let eta_minutes = if rate_per_min > 0.0 {
        Some(queue_length as f64 / rate_per_min)
    } else {
        None
    };

    RateEstimate {
        rate_per_min,
        count,
        elapsed_minutes,
        eta_minutes,
        source,
        fresh,
    }
}
