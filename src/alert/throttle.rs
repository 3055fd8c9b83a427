//! Alert notification rate limiting.
//!
//! A [`Throttle`] decides whether an alert for a given subscriber and pool
//! may go out now, and records the dispatch time when it approves one. It
//! never reads the clock: callers pass `now`, which keeps every decision
//! deterministic in tests.
//!
//! State is owned by the `Throttle` value. Build one per process (or per
//! test) and share it behind an `Arc`; there is no global instance.
//!
//! [`StoreThrottle`] applies the same rules but keeps dispatch times in a
//! [`PoolStore`], so windows hold across separate runs of the binary. The
//! monitor talks to either one through [`NotificationGate`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::store::{PoolStore, StoreError};

// ---------------------------------------------------------------------------
// Notification modes
// ---------------------------------------------------------------------------

/// How often a subscriber wants to hear about out-of-band readings.
///
/// Unrecognised settings are kept as `Unknown` rather than rejected, so a
/// bad value in the user table silences alerts instead of failing requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationMode {
    /// Never notify.
    None,
    /// Notify on every out-of-band reading.
    Each,
    /// At most one notification per rolling 5 minutes.
    Every5Min,
    /// At most one notification per rolling 24 hours.
    Daily,
    /// Any setting outside the known set.
    Unknown(String),
}

impl NotificationMode {
    /// Parses a stored setting. Matching ignores case and surrounding space.
    pub fn from_setting(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NONE" => NotificationMode::None,
            "EACH" => NotificationMode::Each,
            "EVERY_5_MIN" => NotificationMode::Every5Min,
            "DAILY" => NotificationMode::Daily,
            _ => NotificationMode::Unknown(raw.to_string()),
        }
    }

    pub fn as_setting(&self) -> &str {
        match self {
            NotificationMode::None => "NONE",
            NotificationMode::Each => "EACH",
            NotificationMode::Every5Min => "EVERY_5_MIN",
            NotificationMode::Daily => "DAILY",
            NotificationMode::Unknown(raw) => raw,
        }
    }

    /// Rate-limit window for the windowed modes, `None` for the others.
    pub fn window(&self) -> Option<Duration> {
        match self {
            NotificationMode::Every5Min => Some(Duration::minutes(5)),
            NotificationMode::Daily => Some(Duration::hours(24)),
            _ => None,
        }
    }
}

impl From<String> for NotificationMode {
    fn from(raw: String) -> Self {
        NotificationMode::from_setting(&raw)
    }
}

impl From<NotificationMode> for String {
    fn from(mode: NotificationMode) -> Self {
        mode.as_setting().to_string()
    }
}

impl fmt::Display for NotificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_setting())
    }
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Identity under which the last dispatch time is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub subject_id: String,
    pub pool_id: String,
    pub mode: NotificationMode,
}

impl ThrottleKey {
    pub fn new(subject_id: &str, pool_id: &str, mode: NotificationMode) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            pool_id: pool_id.to_string(),
            mode,
        }
    }
}

/// What a mode allows before any dispatch history is consulted.
enum Admission {
    Never,
    Always,
    Within(Duration),
}

impl Admission {
    fn for_mode(mode: &NotificationMode, pool_id: &str) -> Self {
        match mode {
            NotificationMode::None => Admission::Never,
            NotificationMode::Each => Admission::Always,
            NotificationMode::Unknown(raw) => {
                tracing::debug!(
                    component = "throttle",
                    pool = pool_id,
                    mode = %raw,
                    "Unknown notification mode, not notifying"
                );
                Admission::Never
            }
            NotificationMode::Every5Min | NotificationMode::Daily => match mode.window() {
                Some(window) => Admission::Within(window),
                None => Admission::Never,
            },
        }
    }
}

/// Decides notification eligibility and remembers approved dispatches.
///
/// Entries are created on the first approval for a key and overwritten on
/// each later approval. Nothing is ever evicted.
#[derive(Debug, Default)]
pub struct Throttle {
    last_sent: DashMap<ThrottleKey, DateTime<Utc>>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether an alert for `subject_id`/`pool_id` under `mode` may
    /// be sent at `now`.
    ///
    /// For windowed modes an approval stores `now` as the key's last dispatch
    /// before returning, under the map's entry lock, so a concurrent or
    /// immediately following call inside the window sees `false`. The stored
    /// time is kept even if the caller's delivery then fails.
    pub fn should_notify(
        &self,
        subject_id: &str,
        pool_id: &str,
        mode: &NotificationMode,
        now: DateTime<Utc>,
    ) -> bool {
        let window = match Admission::for_mode(mode, pool_id) {
            Admission::Never => return false,
            Admission::Always => return true,
            Admission::Within(window) => window,
        };

        let key = ThrottleKey::new(subject_id, pool_id, mode.clone());
        match self.last_sent.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if now - *slot.get() >= window {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Last approved dispatch for `key`, if any.
    pub fn last_sent(&self, key: &ThrottleKey) -> Option<DateTime<Utc>> {
        self.last_sent.get(key).map(|entry| *entry.value())
    }

    /// Number of keys that have ever been approved.
    pub fn tracked_keys(&self) -> usize {
        self.last_sent.len()
    }
}

// ---------------------------------------------------------------------------
// Gate used by the monitor
// ---------------------------------------------------------------------------

/// Throttle decision as the reading monitor consumes it.
pub trait NotificationGate: Send + Sync {
    fn admit(
        &self,
        subject_id: &str,
        pool_id: &str,
        mode: &NotificationMode,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

impl NotificationGate for Throttle {
    fn admit(
        &self,
        subject_id: &str,
        pool_id: &str,
        mode: &NotificationMode,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.should_notify(subject_id, pool_id, mode, now))
    }
}

/// Throttle whose dispatch times live in the store.
///
/// Each windowed decision is one `claim_notification_window` call, which the
/// store performs as a single atomic check-and-write.
pub struct StoreThrottle<S: PoolStore> {
    store: Arc<S>,
}

impl<S: PoolStore> StoreThrottle<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: PoolStore> NotificationGate for StoreThrottle<S> {
    fn admit(
        &self,
        subject_id: &str,
        pool_id: &str,
        mode: &NotificationMode,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match Admission::for_mode(mode, pool_id) {
            Admission::Never => Ok(false),
            Admission::Always => Ok(true),
            Admission::Within(window) => {
                let key = ThrottleKey::new(subject_id, pool_id, mode.clone());
                self.store.claim_notification_window(&key, window, now)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    // --- Mode parsing -------------------------------------------------------

    #[test]
    fn test_mode_settings_parse_case_insensitively() {
        assert_eq!(NotificationMode::from_setting("none"), NotificationMode::None);
        assert_eq!(NotificationMode::from_setting("EACH"), NotificationMode::Each);
        assert_eq!(NotificationMode::from_setting(" every_5_min "), NotificationMode::Every5Min);
        assert_eq!(NotificationMode::from_setting("Daily"), NotificationMode::Daily);
        assert_eq!(
            NotificationMode::from_setting("BOGUS"),
            NotificationMode::Unknown("BOGUS".to_string())
        );
    }

    #[test]
    fn test_mode_deserializes_unknown_setting_without_error() {
        let mode: NotificationMode = serde_json::from_str("\"HOURLY\"").unwrap();
        assert_eq!(mode, NotificationMode::Unknown("HOURLY".to_string()));
        assert_eq!(serde_json::to_string(&NotificationMode::Every5Min).unwrap(), "\"EVERY_5_MIN\"");
    }

    #[test]
    fn test_only_windowed_modes_have_windows() {
        assert_eq!(NotificationMode::Every5Min.window(), Some(Duration::minutes(5)));
        assert_eq!(NotificationMode::Daily.window(), Some(Duration::hours(24)));
        assert_eq!(NotificationMode::None.window(), None);
        assert_eq!(NotificationMode::Each.window(), None);
        assert_eq!(NotificationMode::Unknown("x".into()).window(), None);
    }

    // --- Non-windowed modes -------------------------------------------------

    #[test]
    fn test_none_mode_never_notifies_and_records_nothing() {
        let throttle = Throttle::new();
        for offset in [0, 1, 86_400 * 7] {
            let now = t0() + Duration::seconds(offset);
            assert!(!throttle.should_notify("user1", "poolA", &NotificationMode::None, now));
        }
        assert_eq!(throttle.tracked_keys(), 0);
    }

    #[test]
    fn test_each_mode_always_notifies_and_records_nothing() {
        let throttle = Throttle::new();
        for _ in 0..5 {
            assert!(throttle.should_notify("user1", "poolA", &NotificationMode::Each, t0()));
        }
        assert_eq!(throttle.tracked_keys(), 0);
    }

    #[test]
    fn test_unknown_mode_fails_closed_without_touching_state() {
        let throttle = Throttle::new();
        let bogus = NotificationMode::from_setting("BOGUS");
        assert!(!throttle.should_notify("user1", "poolA", &bogus, t0()));
        assert_eq!(throttle.tracked_keys(), 0);
        // Other modes for the same subject and pool are unaffected.
        assert!(throttle.should_notify("user1", "poolA", &NotificationMode::Each, t0()));
        assert!(throttle.should_notify("user1", "poolA", &NotificationMode::Daily, t0()));
    }

    // --- Windowed modes -----------------------------------------------------

    #[test]
    fn test_windowed_modes_follow_window_boundaries() {
        for mode in [NotificationMode::Every5Min, NotificationMode::Daily] {
            let throttle = Throttle::new();
            let window = mode.window().unwrap();

            assert!(throttle.should_notify("s", "p", &mode, t0()), "{} first call", mode);
            assert!(!throttle.should_notify("s", "p", &mode, t0()), "{} same instant", mode);
            assert!(
                !throttle.should_notify("s", "p", &mode, t0() + window - Duration::seconds(1)),
                "{} one second before window end",
                mode
            );
            assert!(
                throttle.should_notify("s", "p", &mode, t0() + window),
                "{} exactly at window end",
                mode
            );
        }
    }

    #[test]
    fn test_every_5_min_scenario() {
        let throttle = Throttle::new();
        let mode = NotificationMode::Every5Min;
        assert!(throttle.should_notify("user1", "poolA", &mode, t0()));
        assert!(!throttle.should_notify("user1", "poolA", &mode, t0() + Duration::seconds(60)));
        assert!(throttle.should_notify("user1", "poolA", &mode, t0() + Duration::seconds(301)));
    }

    #[test]
    fn test_suppressed_call_does_not_extend_window() {
        let throttle = Throttle::new();
        let mode = NotificationMode::Every5Min;
        assert!(throttle.should_notify("u", "p", &mode, t0()));
        assert!(!throttle.should_notify("u", "p", &mode, t0() + Duration::seconds(299)));

        let key = ThrottleKey::new("u", "p", mode.clone());
        assert_eq!(throttle.last_sent(&key), Some(t0()));
        assert!(throttle.should_notify("u", "p", &mode, t0() + Duration::seconds(300)));
        assert_eq!(throttle.last_sent(&key), Some(t0() + Duration::seconds(300)));
    }

    #[test]
    fn test_distinct_pools_are_independent() {
        let throttle = Throttle::new();
        let mode = NotificationMode::Daily;
        assert!(throttle.should_notify("user1", "poolA", &mode, t0()));
        assert!(throttle.should_notify("user1", "poolB", &mode, t0()));
        assert!(!throttle.should_notify("user1", "poolA", &mode, t0()));
        assert_eq!(throttle.tracked_keys(), 2);
    }

    #[test]
    fn test_mode_is_part_of_the_key() {
        let throttle = Throttle::new();
        assert!(throttle.should_notify("u", "p", &NotificationMode::Daily, t0()));
        assert!(throttle.should_notify("u", "p", &NotificationMode::Every5Min, t0()));
    }

    #[test]
    fn test_clock_going_backwards_is_suppressed() {
        let throttle = Throttle::new();
        let mode = NotificationMode::Every5Min;
        assert!(throttle.should_notify("u", "p", &mode, t0()));
        assert!(!throttle.should_notify("u", "p", &mode, t0() - Duration::hours(1)));
    }

    #[test]
    fn test_separate_instances_do_not_share_state() {
        let a = Throttle::new();
        let b = Throttle::new();
        assert!(a.should_notify("u", "p", &NotificationMode::Daily, t0()));
        assert!(b.should_notify("u", "p", &NotificationMode::Daily, t0()));
    }

    #[test]
    fn test_concurrent_callers_get_exactly_one_approval() {
        let throttle = Arc::new(Throttle::new());
        let approved = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                let approved = Arc::clone(&approved);
                std::thread::spawn(move || {
                    if throttle.should_notify("u", "p", &NotificationMode::Every5Min, t0()) {
                        approved.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(approved.load(Ordering::SeqCst), 1);
    }

    // --- Store-backed throttle ----------------------------------------------

    #[test]
    fn test_store_throttle_window_survives_new_instances() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let mode = NotificationMode::Every5Min;

        // Each instance stands for one short-lived process.
        let first = StoreThrottle::new(Arc::clone(&store));
        assert!(first.admit("u", "p", &mode, t0()).unwrap());

        let second = StoreThrottle::new(Arc::clone(&store));
        assert!(!second.admit("u", "p", &mode, t0() + Duration::seconds(60)).unwrap());

        let third = StoreThrottle::new(Arc::clone(&store));
        assert!(third.admit("u", "p", &mode, t0() + Duration::minutes(5)).unwrap());
    }

    #[test]
    fn test_store_throttle_mode_rules_match_in_memory_throttle() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let gate = StoreThrottle::new(store);
        for _ in 0..3 {
            assert!(!gate.admit("u", "p", &NotificationMode::None, t0()).unwrap());
            assert!(gate.admit("u", "p", &NotificationMode::Each, t0()).unwrap());
            assert!(
                !gate
                    .admit("u", "p", &NotificationMode::from_setting("WEEKLY"), t0())
                    .unwrap()
            );
        }
        assert!(gate.admit("u", "p", &NotificationMode::Daily, t0()).unwrap());
        assert!(!gate.admit("u", "p", &NotificationMode::Daily, t0() + Duration::hours(23)).unwrap());
        // A different mode is a different key.
        assert!(gate.admit("u", "p", &NotificationMode::Every5Min, t0()).unwrap());
    }

    #[test]
    fn test_in_memory_gate_delegates_to_should_notify() {
        let throttle = Throttle::new();
        let mode = NotificationMode::Every5Min;
        assert!(throttle.admit("u", "p", &mode, t0()).unwrap());
        assert!(!throttle.admit("u", "p", &mode, t0() + Duration::seconds(60)).unwrap());
    }
}
