//! Persisted exam countdown
//!
//! The deadline is stored as an absolute epoch timestamp alongside the time
//! limit and content-version marker it was computed from. Re-entering the
//! attempt reads it back, so reloads never reset the countdown. A record
//! whose limit or version no longer matches is discarded and recomputed.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::store::{AttemptScope, KeyValueStore, StoreResult};

/// Field names of the persisted deadline record
pub mod keys {
    pub const DEADLINE_EPOCH_MS: &str = "deadlineEpochMs";
    pub const TIME_LIMIT_MINUTES: &str = "timeLimitMinutes";
    pub const CONTENT_VERSION_MARKER: &str = "contentVersionMarker";

    pub const ALL: [&str; 3] = [DEADLINE_EPOCH_MS, TIME_LIMIT_MINUTES, CONTENT_VERSION_MARKER];
}

/// Wall-clock source
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time anchored once, then advanced by the tokio monotonic clock
///
/// Immune to wall-clock jumps during a session and follows paused tokio time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.anchor + elapsed
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Why a persisted deadline was discarded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StaleDeadline {
    #[error("time limit changed from {stored} to {current} minutes")]
    TimeLimitChanged { stored: u32, current: u32 },

    #[error("content version changed from '{stored}' to '{current}'")]
    ContentVersionChanged { stored: String, current: String },

    #[error("stored deadline record is incomplete or unreadable")]
    Unreadable,
}

/// Where the active deadline came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineSource {
    /// No record existed; a new deadline was persisted
    Created,
    /// A matching record was read back
    Restored,
    /// A stale record was replaced
    Recomputed(StaleDeadline),
}

/// Result of one clock tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTick {
    /// Time left before the deadline
    Running { remaining: Duration },
    /// The deadline passed; auto-submit now
    Expired,
    /// Expiry already reported and no retry is due
    Elapsed,
}

/// Countdown for one assignment attempt
#[derive(Debug)]
pub struct SessionClock {
    store: Arc<dyn KeyValueStore>,
    scope: AttemptScope,
    clock: Arc<dyn Clock>,
    time_limit_minutes: u32,
    content_version: String,
    deadline: Option<DateTime<Utc>>,
    expiry_reported: bool,
    retry_at: Option<DateTime<Utc>>,
}

impl SessionClock {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        scope: AttemptScope,
        clock: Arc<dyn Clock>,
        time_limit_minutes: u32,
        content_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scope,
            clock,
            time_limit_minutes,
            content_version: content_version.into(),
            deadline: None,
            expiry_reported: false,
            retry_at: None,
        }
    }

    pub fn scope(&self) -> &AttemptScope {
        &self.scope
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Restore the persisted deadline or create one
    pub fn start(&mut self) -> StoreResult<DeadlineSource> {
        let source = match self.read_persisted()? {
            Some(Ok(deadline)) => {
                self.deadline = Some(deadline);
                DeadlineSource::Restored
            }
            Some(Err(stale)) => {
                tracing::warn!(
                    attempt = %self.scope,
                    reason = %stale,
                    "Discarding stale deadline"
                );
                self.persist_new_deadline()?;
                DeadlineSource::Recomputed(stale)
            }
            None => {
                self.persist_new_deadline()?;
                DeadlineSource::Created
            }
        };

        self.expiry_reported = false;
        self.retry_at = None;
        tracing::info!(
            attempt = %self.scope,
            deadline = ?self.deadline,
            source = ?source,
            "Session clock started"
        );
        Ok(source)
    }

    /// Time left, clamped at zero; `None` before `start`
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = self.deadline?;
        Some((deadline - self.clock.now()).max(Duration::zero()))
    }

    /// Advance the countdown; reports expiry exactly once per arming
    pub fn tick(&mut self) -> ClockTick {
        let Some(deadline) = self.deadline else {
            return ClockTick::Elapsed;
        };
        let now = self.clock.now();
        let remaining = deadline - now;
        if remaining > Duration::zero() {
            return ClockTick::Running { remaining };
        }

        if !self.expiry_reported {
            self.expiry_reported = true;
            tracing::info!(attempt = %self.scope, "Time limit reached");
            return ClockTick::Expired;
        }

        match self.retry_at {
            Some(at) if now >= at => {
                self.retry_at = None;
                tracing::info!(attempt = %self.scope, "Retrying expired attempt submission");
                ClockTick::Expired
            }
            _ => ClockTick::Elapsed,
        }
    }

    /// Report expiry again once `after` has passed
    pub fn rearm(&mut self, after: Duration) {
        self.retry_at = Some(self.clock.now() + after);
    }

    /// Remove every persisted key of this attempt
    pub fn clear(&mut self) -> StoreResult<()> {
        for field in keys::ALL {
            self.store.remove(&self.scope.key(field))?;
        }
        self.deadline = None;
        self.retry_at = None;
        tracing::debug!(attempt = %self.scope, "Cleared persisted deadline");
        Ok(())
    }

    fn persist_new_deadline(&mut self) -> StoreResult<()> {
        let deadline = self.clock.now() + Duration::minutes(i64::from(self.time_limit_minutes));
        self.store.set(
            &self.scope.key(keys::DEADLINE_EPOCH_MS),
            &deadline.timestamp_millis().to_string(),
        )?;
        self.store.set(
            &self.scope.key(keys::TIME_LIMIT_MINUTES),
            &self.time_limit_minutes.to_string(),
        )?;
        self.store.set(
            &self.scope.key(keys::CONTENT_VERSION_MARKER),
            &self.content_version,
        )?;
        self.deadline = Some(deadline);
        Ok(())
    }

    /// `None` when nothing is stored; `Some(Err)` for a stale record
    fn read_persisted(&self) -> StoreResult<Option<Result<DateTime<Utc>, StaleDeadline>>> {
        let Some(raw_deadline) = self.store.get(&self.scope.key(keys::DEADLINE_EPOCH_MS))? else {
            return Ok(None);
        };
        let raw_limit = self.store.get(&self.scope.key(keys::TIME_LIMIT_MINUTES))?;
        let raw_version = self.store.get(&self.scope.key(keys::CONTENT_VERSION_MARKER))?;

        let deadline = raw_deadline
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        let limit = raw_limit.and_then(|l| l.parse::<u32>().ok());

        let (Some(deadline), Some(limit), Some(version)) = (deadline, limit, raw_version) else {
            return Ok(Some(Err(StaleDeadline::Unreadable)));
        };

        if limit != self.time_limit_minutes {
            return Ok(Some(Err(StaleDeadline::TimeLimitChanged {
                stored: limit,
                current: self.time_limit_minutes,
            })));
        }
        if version != self.content_version {
            return Ok(Some(Err(StaleDeadline::ContentVersionChanged {
                stored: version,
                current: self.content_version.clone(),
            })));
        }

        Ok(Some(Ok(deadline)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, AttemptScope) {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        (
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(start)),
            AttemptScope::new("quiz", "attempt"),
        )
    }

    fn clock(
        store: &Arc<MemoryStore>,
        manual: &Arc<ManualClock>,
        scope: &AttemptScope,
        limit: u32,
        version: &str,
    ) -> SessionClock {
        SessionClock::new(store.clone(), scope.clone(), manual.clone(), limit, version)
    }

    #[test]
    fn test_first_start_persists_deadline() {
        let (store, manual, scope) = setup();
        let mut session_clock = clock(&store, &manual, &scope, 10, "v1");

        assert_eq!(session_clock.start().unwrap(), DeadlineSource::Created);
        assert_eq!(session_clock.remaining(), Some(Duration::minutes(10)));
        assert_eq!(
            store.get(&scope.key(keys::TIME_LIMIT_MINUTES)).unwrap().as_deref(),
            Some("10")
        );
    }

    #[test]
    fn test_reentry_resumes_countdown() {
        let (store, manual, scope) = setup();
        clock(&store, &manual, &scope, 10, "v1").start().unwrap();

        manual.advance(Duration::minutes(5));
        let mut reentered = clock(&store, &manual, &scope, 10, "v1");
        assert_eq!(reentered.start().unwrap(), DeadlineSource::Restored);
        assert_eq!(reentered.remaining(), Some(Duration::minutes(5)));
    }

    #[test]
    fn test_changed_version_recomputes() {
        let (store, manual, scope) = setup();
        clock(&store, &manual, &scope, 10, "v1").start().unwrap();

        manual.advance(Duration::minutes(5));
        let mut reentered = clock(&store, &manual, &scope, 10, "v2");
        assert!(matches!(
            reentered.start().unwrap(),
            DeadlineSource::Recomputed(StaleDeadline::ContentVersionChanged { .. })
        ));
        assert_eq!(reentered.remaining(), Some(Duration::minutes(10)));
    }

    #[test]
    fn test_changed_limit_recomputes() {
        let (store, manual, scope) = setup();
        clock(&store, &manual, &scope, 10, "v1").start().unwrap();

        let mut reentered = clock(&store, &manual, &scope, 20, "v1");
        assert_eq!(
            reentered.start().unwrap(),
            DeadlineSource::Recomputed(StaleDeadline::TimeLimitChanged {
                stored: 10,
                current: 20
            })
        );
    }

    #[test]
    fn test_corrupt_record_recomputes() {
        let (store, manual, scope) = setup();
        store.set(&scope.key(keys::DEADLINE_EPOCH_MS), "soon").unwrap();

        let mut session_clock = clock(&store, &manual, &scope, 10, "v1");
        assert_eq!(
            session_clock.start().unwrap(),
            DeadlineSource::Recomputed(StaleDeadline::Unreadable)
        );
    }

    #[test]
    fn test_expiry_reported_once_then_rearmed() {
        let (store, manual, scope) = setup();
        let mut session_clock = clock(&store, &manual, &scope, 1, "v1");
        session_clock.start().unwrap();

        assert!(matches!(session_clock.tick(), ClockTick::Running { .. }));
        manual.advance(Duration::seconds(60));
        assert_eq!(session_clock.tick(), ClockTick::Expired);
        assert_eq!(session_clock.tick(), ClockTick::Elapsed);

        session_clock.rearm(Duration::seconds(10));
        manual.advance(Duration::seconds(5));
        assert_eq!(session_clock.tick(), ClockTick::Elapsed);
        manual.advance(Duration::seconds(5));
        assert_eq!(session_clock.tick(), ClockTick::Expired);
        assert_eq!(session_clock.tick(), ClockTick::Elapsed);
    }

    #[test]
    fn test_clear_removes_all_keys() {
        let (store, manual, scope) = setup();
        let mut session_clock = clock(&store, &manual, &scope, 10, "v1");
        session_clock.start().unwrap();
        assert_eq!(store.len(), 3);

        session_clock.clear().unwrap();
        assert!(store.is_empty());
        assert!(session_clock.remaining().is_none());
    }
}
