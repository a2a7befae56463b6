//! Hour-bucketed quota for the rate-limited external review (loop 3).
//!
//! State lives in a single JSON file. Every operation loads it, prunes buckets
//! older than two hours and works on the bucket for the current local hour.
//! Writes go through [`crate::io::write_json`]; there is no locking, so two
//! processes recording at the same instant can lose one increment.

use crate::error::Result;
use crate::io;
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_LIMIT_PER_HOUR: u32 = 8;
const STATE_VERSION: &str = "1.0";
const RETENTION_HOURS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub version: String,
    pub limit_per_hour: u32,
    pub buckets: BTreeMap<String, u32>,
    pub total_executions: u64,
    #[serde(default)]
    pub last_execution: Option<DateTime<Utc>>,
}

impl RateLimitState {
    pub fn new(limit_per_hour: u32) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            limit_per_hour,
            buckets: BTreeMap::new(),
            total_executions: 0,
            last_execution: None,
        }
    }

    /// Drop buckets older than two hours before `now`, and any bucket whose
    /// key does not parse.
    pub fn prune(&mut self, now: DateTime<Local>) {
        let cutoff = now - Duration::hours(RETENTION_HOURS);
        self.buckets
            .retain(|key, _| matches!(parse_bucket(key), Some(t) if t >= cutoff));
    }

    pub fn usage(&self, now: DateTime<Local>) -> u32 {
        self.buckets.get(&bucket_key(now)).copied().unwrap_or(0)
    }
}

/// `Y-M-D-H` of the local wall clock, unpadded (e.g. `2026-3-7-14`).
pub fn bucket_key(now: DateTime<Local>) -> String {
    format!("{}-{}-{}-{}", now.year(), now.month(), now.day(), now.hour())
}

/// Start of the hour a bucket key names, in local time.
pub fn parse_bucket(key: &str) -> Option<DateTime<Local>> {
    let mut parts = key.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let hour: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, 0, 0)?;
    Local.from_local_datetime(&naive).earliest()
}

#[derive(Debug, Clone)]
pub struct RateLimitTracker {
    state_file: PathBuf,
    limit_per_hour: u32,
}

impl RateLimitTracker {
    pub fn new(state_file: &Path, limit_per_hour: u32) -> Self {
        Self {
            state_file: state_file.to_path_buf(),
            limit_per_hour,
        }
    }

    pub fn limit_per_hour(&self) -> u32 {
        self.limit_per_hour
    }

    /// Load the persisted state. Missing, unreadable or malformed state falls
    /// back to a fresh default instead of failing.
    pub fn load(&self) -> RateLimitState {
        let mut state = match io::read_optional(&self.state_file) {
            Ok(Some(data)) => self.parse(&data).unwrap_or_else(|| {
                tracing::warn!(path = %self.state_file.display(), "invalid rate limit state, resetting");
                RateLimitState::new(self.limit_per_hour)
            }),
            Ok(None) => RateLimitState::new(self.limit_per_hour),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read rate limit state, resetting");
                RateLimitState::new(self.limit_per_hour)
            }
        };
        state.limit_per_hour = self.limit_per_hour;
        state
    }

    fn parse(&self, data: &str) -> Option<RateLimitState> {
        let value: serde_json::Value = serde_json::from_str(data).ok()?;
        let version_ok = value
            .get("version")
            .and_then(|v| v.as_str())
            .is_some_and(|v| !v.is_empty());
        let buckets_ok = value.get("buckets").is_some_and(|b| b.is_object());
        let total_ok = value.get("total_executions").is_some_and(|t| t.is_number());
        if !(version_ok && buckets_ok && total_ok) {
            return None;
        }
        let mut value = value;
        if value.get("limit_per_hour").is_none() {
            value["limit_per_hour"] = self.limit_per_hour.into();
        }
        serde_json::from_value(value).ok()
    }

    /// Pruned state as of `now`.
    pub fn snapshot_at(&self, now: DateTime<Local>) -> RateLimitState {
        let mut state = self.load();
        state.prune(now);
        state
    }

    pub fn can_execute(&self) -> bool {
        self.can_execute_at(Local::now())
    }

    pub fn can_execute_at(&self, now: DateTime<Local>) -> bool {
        self.snapshot_at(now).usage(now) < self.limit_per_hour
    }

    pub fn remaining_quota(&self) -> u32 {
        self.remaining_quota_at(Local::now())
    }

    pub fn remaining_quota_at(&self, now: DateTime<Local>) -> u32 {
        self.limit_per_hour
            .saturating_sub(self.snapshot_at(now).usage(now))
    }

    pub fn record_execution(&self) -> Result<()> {
        self.record_execution_at(Local::now())
    }

    pub fn record_execution_at(&self, now: DateTime<Local>) -> Result<()> {
        let mut state = self.snapshot_at(now);
        *state.buckets.entry(bucket_key(now)).or_insert(0) += 1;
        state.total_executions += 1;
        state.last_execution = Some(now.with_timezone(&Utc));
        io::write_json(&self.state_file, &state)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, min, 0)
                    .unwrap(),
            )
            .earliest()
            .unwrap()
    }

    fn tracker(dir: &TempDir, limit: u32) -> RateLimitTracker {
        RateLimitTracker::new(&dir.path().join("rate-limit-state.json"), limit)
    }

    #[test]
    fn bucket_key_is_unpadded() {
        assert_eq!(bucket_key(at(2026, 3, 7, 9, 30)), "2026-3-7-9");
        assert_eq!(bucket_key(at(2026, 11, 21, 23, 0)), "2026-11-21-23");
    }

    #[test]
    fn bucket_key_roundtrips_to_hour_start() {
        let now = at(2026, 5, 4, 13, 45);
        let parsed = parse_bucket(&bucket_key(now)).unwrap();
        assert_eq!(parsed, at(2026, 5, 4, 13, 0));
    }

    #[test]
    fn fresh_tracker_has_full_quota() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir, 8);
        let now = at(2026, 1, 10, 10, 0);
        assert!(t.can_execute_at(now));
        assert_eq!(t.remaining_quota_at(now), 8);
    }

    #[test]
    fn exhausted_bucket_blocks_execution() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir, 8);
        let now = at(2026, 1, 10, 10, 5);
        for _ in 0..8 {
            t.record_execution_at(now).unwrap();
        }
        assert!(!t.can_execute_at(now));
        assert_eq!(t.remaining_quota_at(now), 0);

        let state = t.load();
        assert_eq!(state.total_executions, 8);
        assert!(state.last_execution.is_some());
    }

    #[test]
    fn next_hour_has_fresh_quota() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir, 2);
        let now = at(2026, 1, 10, 10, 59);
        t.record_execution_at(now).unwrap();
        t.record_execution_at(now).unwrap();
        assert!(!t.can_execute_at(now));
        assert!(t.can_execute_at(at(2026, 1, 10, 11, 0)));
    }

    #[test]
    fn buckets_older_than_two_hours_are_pruned() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir, 8);
        t.record_execution_at(at(2026, 1, 10, 6, 0)).unwrap();
        t.record_execution_at(at(2026, 1, 10, 9, 0)).unwrap();

        // Recording at 10:30 prunes 06:00 (older than 08:30) but keeps 09:00.
        t.record_execution_at(at(2026, 1, 10, 10, 30)).unwrap();
        let state = t.load();
        assert!(!state.buckets.contains_key("2026-1-10-6"));
        assert!(state.buckets.contains_key("2026-1-10-9"));
        assert_eq!(state.total_executions, 3);
    }

    #[test]
    fn old_buckets_never_count_toward_quota() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rate-limit-state.json");
        let mut state = RateLimitState::new(8);
        // A full bucket three hours ago and a garbage key.
        state.buckets.insert("2026-1-10-7".to_string(), 8);
        state.buckets.insert("not-a-bucket".to_string(), 99);
        state.total_executions = 8;
        io::write_json(&path, &state).unwrap();

        let t = RateLimitTracker::new(&path, 8);
        let now = at(2026, 1, 10, 10, 0);
        assert_eq!(t.remaining_quota_at(now), 8);
        let snap = t.snapshot_at(now);
        assert!(snap.buckets.is_empty());
    }

    #[test]
    fn invalid_schema_resets_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rate-limit-state.json");
        std::fs::write(&path, r#"{"version":"1.0","buckets":{},"total_executions":"many"}"#)
            .unwrap();
        let t = RateLimitTracker::new(&path, 8);
        let state = t.load();
        assert_eq!(state.total_executions, 0);

        std::fs::write(&path, "not json at all").unwrap();
        assert_eq!(t.load(), RateLimitState::new(8));
    }

    #[test]
    fn configured_limit_overrides_persisted_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rate-limit-state.json");
        RateLimitTracker::new(&path, 8)
            .record_execution_at(at(2026, 2, 1, 12, 0))
            .unwrap();
        let t = RateLimitTracker::new(&path, 3);
        assert_eq!(t.load().limit_per_hour, 3);
        assert_eq!(t.remaining_quota_at(at(2026, 2, 1, 12, 10)), 2);
    }

    #[test]
    fn missing_directory_is_created_on_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".claude/state/rate-limit-state.json");
        RateLimitTracker::new(&path, 8)
            .record_execution_at(at(2026, 2, 1, 12, 0))
            .unwrap();
        assert!(path.exists());
    }
}
