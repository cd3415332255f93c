//! Injectable time sources.
//!
//! Two independent capabilities live here:
//!
//! - [`Clock`]: wall-clock timestamps ("what time is it?"), local and UTC.
//! - [`MonotonicClock`]: elapsed-time measurement, consumed through [`Stopwatch`].
//!
//! Components take these as values (`Arc<dyn ...>`) instead of reading a
//! process-wide global, so a test can freeze time for its own component
//! without affecting anything else running in the process.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, TimeZone, Utc};

/// Source of "current time".
///
/// Implementations must keep both accessors consistent: `utc_now()` is
/// `now()` converted to UTC.
pub trait Clock: Send + Sync {
    /// Current local time.
    fn now(&self) -> DateTime<Local>;

    /// Current UTC time.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Shared, thread-safe clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the real clock as a [`SharedClock`].
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn new<Tz: TimeZone>(instant: DateTime<Tz>) -> Self {
        Self {
            instant: instant.with_timezone(&Utc),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.instant.with_timezone(&Local)
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.instant
    }
}

/// Real clock that can be pinned to a fixed instant and released again.
///
/// The override is scoped to this value (and every `Arc` clone of it).
/// Override values are not validated.
#[derive(Debug, Default)]
pub struct OverridableClock {
    pinned: RwLock<Option<DateTime<Utc>>>,
}

impl OverridableClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin both accessors to `instant` until [`reset`](Self::reset).
    pub fn set<Tz: TimeZone>(&self, instant: DateTime<Tz>) {
        let instant = instant.with_timezone(&Utc);
        *self.pinned.write().unwrap_or_else(|e| e.into_inner()) = Some(instant);
    }

    /// Return to the real system clock.
    pub fn reset(&self) {
        *self.pinned.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_overridden(&self) -> bool {
        self.pinned().is_some()
    }

    fn pinned(&self) -> Option<DateTime<Utc>> {
        *self.pinned.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for OverridableClock {
    fn now(&self) -> DateTime<Local> {
        match self.pinned() {
            Some(instant) => instant.with_timezone(&Local),
            None => Local::now(),
        }
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.pinned().unwrap_or_else(Utc::now)
    }
}

/// Monotonic source used for measuring elapsed time.
pub trait MonotonicClock: Send + Sync {
    fn instant(&self) -> Instant;
}

/// Shared monotonic source handle.
pub type SharedMonotonicClock = Arc<dyn MonotonicClock>;

/// Backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMonotonicClock;

impl MonotonicClock for SystemMonotonicClock {
    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven monotonic source for tests.
///
/// Reports `origin + offset`; the offset only grows through [`advance`](Self::advance).
#[derive(Debug)]
pub struct ManualMonotonicClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualMonotonicClock {
    pub fn new() -> Self {
        Self::with_origin(Instant::now())
    }

    pub fn with_origin(origin: Instant) -> Self {
        Self {
            origin,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset = offset.saturating_add(delta);
    }

    pub fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualMonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for ManualMonotonicClock {
    fn instant(&self) -> Instant {
        let offset = self.offset();
        self.origin
            .checked_add(offset)
            .unwrap_or_else(|| latest_reachable(self.origin, offset))
    }
}

/// Furthest instant at or below `origin + offset` that the platform can represent.
fn latest_reachable(origin: Instant, offset: Duration) -> Instant {
    let mut at = origin;
    let mut step = offset;
    while !step.is_zero() {
        match at.checked_add(step) {
            Some(next) => at = next,
            None => step /= 2,
        }
    }
    at
}

/// Measures elapsed time against a [`MonotonicClock`].
#[derive(Clone)]
pub struct Stopwatch {
    source: SharedMonotonicClock,
    started: Instant,
}

impl Stopwatch {
    /// Start measuring now, according to `source`.
    pub fn start(source: SharedMonotonicClock) -> Self {
        let started = source.instant();
        Self { source, started }
    }

    pub fn started_at(&self) -> Instant {
        self.started
    }

    /// Time since [`start`](Self::start). Never negative.
    pub fn elapsed(&self) -> Duration {
        self.source.instant().saturating_duration_since(self.started)
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

impl std::fmt::Debug for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopwatch")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn system_clock_accessors_agree() {
        let clock = SystemClock;
        let local = clock.now();
        let utc = clock.utc_now();

        let drift = (utc - local.with_timezone(&Utc)).num_seconds().abs();
        assert!(drift <= 1, "drift was {drift}s");
    }

    #[test]
    fn fixed_clock_normalizes_to_utc() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let clock = FixedClock::new(local);

        assert_eq!(clock.utc_now(), t0());
        assert_eq!(clock.now(), local);
        assert_eq!(clock.now().with_timezone(&Utc), clock.utc_now());
    }

    #[test]
    fn override_holds_until_reset() {
        let clock = OverridableClock::new();
        assert!(!clock.is_overridden());

        clock.set(t0());
        for _ in 0..5 {
            assert_eq!(clock.now(), t0());
            assert_eq!(clock.utc_now(), t0());
        }
        assert!(clock.is_overridden());

        clock.reset();
        assert!(!clock.is_overridden());
        let first = clock.utc_now();
        let second = clock.utc_now();
        assert!(second >= first);
        assert!(first > t0());
    }

    #[test]
    fn override_is_scoped_to_the_clock_value() {
        let pinned = Arc::new(OverridableClock::new());
        let other = OverridableClock::new();
        let shared: SharedClock = pinned.clone();

        pinned.set(t0());

        assert_eq!(shared.utc_now(), t0());
        assert_ne!(other.utc_now(), t0());
    }

    #[test]
    fn override_accepts_any_value_again() {
        let clock = OverridableClock::new();
        let later = t0() + chrono::Duration::days(1);

        clock.set(t0());
        clock.set(later);

        assert_eq!(clock.utc_now(), later);
    }

    #[test]
    fn stopwatch_reports_manual_advance_exactly() {
        let source = Arc::new(ManualMonotonicClock::new());
        let watch = Stopwatch::start(source.clone());

        assert_eq!(watch.elapsed(), Duration::ZERO);

        source.advance(Duration::from_millis(1500));
        assert_eq!(watch.elapsed(), Duration::from_millis(1500));
        assert_eq!(watch.elapsed_seconds(), 1.5);
    }

    #[test]
    fn manual_source_saturates_instead_of_overflowing() {
        let origin = Instant::now();
        let source = Arc::new(ManualMonotonicClock::with_origin(origin));
        let watch = Stopwatch::start(source.clone());
        assert_eq!(watch.started_at(), origin);

        source.advance(Duration::MAX);
        let far = source.instant();
        assert!(far > origin);
        assert_eq!(source.offset(), Duration::MAX);

        source.advance(Duration::from_secs(1));
        assert_eq!(source.instant(), far);
        assert!(watch.elapsed() > Duration::ZERO);
    }

    #[test]
    fn shared_system_clock_tracks_real_time() {
        let clock = system_clock();
        let before = Utc::now();
        let observed = clock.utc_now();
        assert!(observed >= before);
        assert!(observed - before < chrono::Duration::seconds(5));
    }

    #[test]
    fn stopwatch_on_system_source_is_non_negative() {
        let watch = Stopwatch::start(Arc::new(SystemMonotonicClock));
        std::thread::sleep(Duration::from_millis(2));
        assert!(watch.elapsed() >= Duration::from_millis(2));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn stopwatch_elapsed_is_sum_of_advances(
                steps in proptest::collection::vec(0u64..10_000, 0..16)
            ) {
                let source = Arc::new(ManualMonotonicClock::new());
                let watch = Stopwatch::start(source.clone());

                for millis in &steps {
                    source.advance(Duration::from_millis(*millis));
                }

                prop_assert_eq!(watch.elapsed(), Duration::from_millis(steps.iter().sum()));
            }

            #[test]
            fn override_is_reported_verbatim(secs in 0i64..4_102_444_800) {
                let clock = OverridableClock::new();
                let instant = Utc.timestamp_opt(secs, 0).unwrap();

                clock.set(instant);
                prop_assert_eq!(clock.utc_now(), instant);
                prop_assert_eq!(clock.now().with_timezone(&Utc), instant);
            }
        }
    }
}
