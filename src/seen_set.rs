use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::model::SeenRecord;

pub struct SeenUpdate {
    /// Most-recent-first: consumers rely on index 0 being the newest entry.
    pub updated: Vec<SeenRecord>,
    pub newly_added_count: usize,
}

/// Folds one batch of observed keys into the first-seen ledger.
///
/// A key already present keeps its original `first_seen_at` forever; blank
/// keys and in-batch duplicates are ignored. New records are prepended so
/// the last-listed new key lands at index 0, then the ledger is truncated
/// to `capacity`, dropping the oldest (tail) entries. Repeated calls with
/// the same batch add nothing, so a retried feed poll cannot grow the
/// ledger unbounded.
pub fn update_seen(
    existing: &[SeenRecord],
    observed_keys_now: &[String],
    now: DateTime<Utc>,
    capacity: usize,
) -> SeenUpdate {
    let mut known: HashSet<&str> = existing.iter().map(|r| r.key.as_str()).collect();
    let mut added: Vec<SeenRecord> = Vec::new();
    for key in observed_keys_now {
        let key = key.trim();
        if key.is_empty() || !known.insert(key) {
            continue;
        }
        added.push(SeenRecord {
            key: key.to_string(),
            first_seen_at: now,
        });
    }

    let newly_added_count = added.len();
    added.reverse();
    let mut updated = added;
    updated.extend(existing.iter().cloned());
    updated.truncate(capacity);

    SeenUpdate {
        updated,
        newly_added_count,
    }
}

/// Scans raw leaderboard text for finished-run rows and returns their car
/// identifiers, deduplicated in first-occurrence order.
///
/// A qualifying row carries a leading numeric rank, the identifier in
/// second position, an "OK" marker token, and a finite, strictly positive
/// numeric time right after the marker. Anything else is skipped; arbitrary
/// text never errors.
pub fn extract_valid_identifiers(raw: &str) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<String> = Vec::new();

    for line in raw.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 || tokens[0].parse::<u32>().is_err() {
            continue;
        }
        let identifier = tokens[1];
        let ok_at = match tokens.iter().position(|t| *t == "OK") {
            // The marker sits after rank and identifier.
            Some(i) if i >= 2 => i,
            _ => continue,
        };
        let time = match tokens.get(ok_at + 1).and_then(|t| t.parse::<f64>().ok()) {
            Some(t) => t,
            None => continue,
        };
        if !time.is_finite() || time <= 0.0 {
            continue;
        }
        if seen.insert(identifier) {
            out.push(identifier.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn seen(key: &str, secs: i64) -> SeenRecord {
        SeenRecord {
            key: key.to_string(),
            first_seen_at: at(secs),
        }
    }

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn new_keys_prepend_newest_first() {
        // existing=["1"], observed=["1","2","3"] -> [3, 2, 1], 2 added.
        let existing = vec![seen("1", 0)];
        let update = update_seen(&existing, &keys(&["1", "2", "3"]), at(60), 500);
        assert_eq!(update.newly_added_count, 2);
        let got: Vec<&str> = update.updated.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(got, vec!["3", "2", "1"]);
        assert_eq!(update.updated[0].first_seen_at, at(60));
        assert_eq!(update.updated[2].first_seen_at, at(0));
    }

    #[test]
    fn repeat_observation_is_idempotent_and_keeps_first_seen_at() {
        let batch = keys(&["42", "7"]);
        let first = update_seen(&[], &batch, at(0), 500);
        assert_eq!(first.newly_added_count, 2);

        let second = update_seen(&first.updated, &batch, at(300), 500);
        assert_eq!(second.newly_added_count, 0);
        assert_eq!(second.updated.len(), 2);
        for record in &second.updated {
            assert_eq!(record.first_seen_at, at(0), "first seen is immutable");
        }
    }

    #[test]
    fn in_batch_duplicates_and_blanks_count_once_or_not_at_all() {
        let update = update_seen(&[], &keys(&["42", " 42", "", "  ", "7"]), at(0), 500);
        assert_eq!(update.newly_added_count, 2);
        let got: Vec<&str> = update.updated.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(got, vec!["7", "42"]);
    }

    #[test]
    fn ledger_never_exceeds_capacity_and_drops_the_tail() {
        let existing = vec![seen("a", 0), seen("b", 1), seen("c", 2)];
        let update = update_seen(&existing, &keys(&["d", "e"]), at(10), 4);
        assert_eq!(update.updated.len(), 4);
        let got: Vec<&str> = update.updated.iter().map(|r| r.key.as_str()).collect();
        // Oldest tail entry "c" fell off.
        assert_eq!(got, vec!["e", "d", "a", "b"]);
    }

    #[test]
    fn repeated_polls_stay_bounded() {
        let mut ledger: Vec<SeenRecord> = Vec::new();
        for poll in 0..50 {
            let batch = keys(&[&format!("car-{}", poll % 10), "42"]);
            let update = update_seen(&ledger, &batch, at(poll), 8);
            ledger = update.updated;
            assert!(ledger.len() <= 8);
        }
    }

    #[test]
    fn extracts_only_ok_rows_with_positive_finite_times() {
        let raw = "\
1 42 TeamA OK 12.3
2 13 TeamX OK 0
3 7 TeamB BAD 9.9
4 88 TeamC OK -4.0
5 19 TeamD OK abc
6 55 TeamE OK 101.5";
        assert_eq!(extract_valid_identifiers(raw), vec!["42", "55"]);
    }

    #[test]
    fn skips_rows_without_numeric_rank_or_too_few_tokens() {
        let raw = "\
pos car team status time
x 42 TeamA OK 12.3
1 42 OK
2 42 Team OK 12.3 extra trailing";
        assert_eq!(extract_valid_identifiers(raw), vec!["42"]);
    }

    #[test]
    fn duplicate_identifiers_reported_once() {
        let raw = "1 42 TeamA OK 12.3\n2 42 TeamA OK 13.0\n3 9 TeamB OK 14.1";
        assert_eq!(extract_valid_identifiers(raw), vec!["42", "9"]);
    }

    #[test]
    fn arbitrary_text_never_panics() {
        for junk in ["", "\n\n\n", "<!DOCTYPE html><body>503</body>", "OK OK OK", "1 OK 2"] {
            assert!(extract_valid_identifiers(junk).is_empty());
        }
    }
}
