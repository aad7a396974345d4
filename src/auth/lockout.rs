//! Failed-login throttling keyed by client identifier
//!
//! State is process-local and lost on restart. The counter is only reset by
//! a successful login, never by time passing; once a key has crossed the
//! threshold, every further failure re-arms the lockout.
//!
//! Every attempt reserves a slot before the password is compared, so the
//! check and the later increment are serialized per key: at most
//! `threshold - failures` comparisons can be in flight for one key.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Throttle consulted by the credential verifier
pub trait LockoutTracker: Send + Sync {
    /// Reserve an attempt for `key`. False while the key is locked or while
    /// attempts already in flight could reach the threshold.
    fn try_begin_attempt(&self, key: &str) -> bool;
    /// Settle a reserved attempt as failed
    fn record_failure(&self, key: &str);
    /// Settle a reserved attempt as successful; clears the key's counters
    fn record_success(&self, key: &str);
    /// Release a reserved attempt that ended without a verdict
    fn abandon_attempt(&self, key: &str);
    fn is_locked(&self, key: &str) -> bool;
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub duration: Duration,
    /// Tracked keys above which unlocked, idle entries are evicted
    pub max_entries: usize,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: Duration::minutes(15),
            max_entries: 100_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockoutEntry {
    pub failures: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub in_flight: u32,
}

impl LockoutEntry {
    fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    fn is_idle(&self) -> bool {
        self.failures == 0 && self.in_flight == 0 && self.locked_until.is_none()
    }
}

/// Single global lock; every read-modify-write of an entry runs under it
pub struct InMemoryLockoutTracker {
    policy: LockoutPolicy,
    clock: Clock,
    entries: Mutex<HashMap<String, LockoutEntry>>,
}

impl InMemoryLockoutTracker {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self::with_clock(policy, Arc::new(Utc::now))
    }

    pub fn with_clock(policy: LockoutPolicy, clock: Clock) -> Self {
        Self {
            policy,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, LockoutEntry>> {
        // A panic while holding the lock cannot leave an entry half-written
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_begin_attempt_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries();
        if !entries.contains_key(key) && entries.len() >= self.policy.max_entries {
            self.evict_idle(&mut entries, now);
        }

        let entry = entries.entry(key.to_string()).or_default();
        if entry.is_locked_at(now) {
            return false;
        }

        // Past an expired lockout a single attempt is allowed at a time; its
        // failure re-arms the lockout
        let capacity = self.policy.threshold.saturating_sub(entry.failures).max(1);
        if entry.in_flight >= capacity {
            return false;
        }

        entry.in_flight += 1;
        true
    }

    pub fn record_failure_at(&self, key: &str, now: DateTime<Utc>) {
        let mut entries = self.entries();
        let entry = entries.entry(key.to_string()).or_default();
        entry.in_flight = entry.in_flight.saturating_sub(1);
        entry.failures = entry.failures.saturating_add(1);

        if entry.failures >= self.policy.threshold {
            let until = now + self.policy.duration;
            entry.locked_until = Some(until);
            warn!(client = key, failures = entry.failures, %until, "Client locked out after failed logins");
        }
    }

    pub fn is_locked_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.entries().get(key).is_some_and(|entry| entry.is_locked_at(now))
    }

    /// Drop entries that are neither locked nor have attempts in flight.
    /// Partial counters of those keys are lost; active lockouts never are.
    fn evict_idle(&self, entries: &mut HashMap<String, LockoutEntry>, now: DateTime<Utc>) {
        let before = entries.len();
        entries.retain(|_, entry| entry.is_locked_at(now) || entry.in_flight > 0);
        debug!(evicted = before - entries.len(), "Evicted idle lockout entries");
    }

    #[cfg(test)]
    pub fn entry(&self, key: &str) -> Option<LockoutEntry> {
        self.entries().get(key).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries().len()
    }
}

impl Default for InMemoryLockoutTracker {
    fn default() -> Self {
        Self::new(LockoutPolicy::default())
    }
}

impl LockoutTracker for InMemoryLockoutTracker {
    fn try_begin_attempt(&self, key: &str) -> bool {
        self.try_begin_attempt_at(key, (self.clock)())
    }

    fn record_failure(&self, key: &str) {
        self.record_failure_at(key, (self.clock)());
    }

    fn record_success(&self, key: &str) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };

        entry.in_flight = entry.in_flight.saturating_sub(1);
        entry.failures = 0;
        entry.locked_until = None;
        if entry.in_flight == 0 {
            entries.remove(key);
        }
    }

    fn abandon_attempt(&self, key: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            if entry.is_idle() {
                entries.remove(key);
            }
        }
    }

    fn is_locked(&self, key: &str) -> bool {
        self.is_locked_at(key, (self.clock)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "203.0.113.7";

    #[test]
    fn test_locks_on_threshold() {
        let tracker = InMemoryLockoutTracker::default();
        let now = Utc::now();

        for _ in 0..4 {
            tracker.record_failure_at(KEY, now);
        }
        assert!(!tracker.is_locked_at(KEY, now));

        tracker.record_failure_at(KEY, now);
        assert!(tracker.is_locked_at(KEY, now));
        assert!(tracker.is_locked_at(KEY, now + Duration::minutes(14)));
        assert!(!tracker.is_locked_at(KEY, now + Duration::minutes(15)));
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = InMemoryLockoutTracker::default();
        let now = Utc::now();
        for _ in 0..5 {
            tracker.record_failure_at(KEY, now);
        }
        assert!(tracker.is_locked_at(KEY, now));
        assert!(!tracker.is_locked_at("198.51.100.1", now));
    }

    #[test]
    fn test_success_clears_entry() {
        let tracker = InMemoryLockoutTracker::default();
        let now = Utc::now();
        for _ in 0..7 {
            tracker.record_failure_at(KEY, now);
        }
        tracker.record_success(KEY);
        assert_eq!(tracker.entry(KEY), None);
        assert!(!tracker.is_locked_at(KEY, now));
    }

    #[test]
    fn test_counter_survives_elapsed_time() {
        let tracker = InMemoryLockoutTracker::default();
        let start = Utc::now();
        for _ in 0..4 {
            tracker.record_failure_at(KEY, start);
        }

        // A day later the fifth failure still trips the lockout
        let later = start + Duration::days(1);
        tracker.record_failure_at(KEY, later);
        assert!(tracker.is_locked_at(KEY, later));
    }

    #[test]
    fn test_failure_after_expired_lockout_relocks() {
        let tracker = InMemoryLockoutTracker::default();
        let start = Utc::now();
        for _ in 0..5 {
            tracker.record_failure_at(KEY, start);
        }

        let after = start + Duration::minutes(16);
        assert!(!tracker.is_locked_at(KEY, after));
        tracker.record_failure_at(KEY, after);
        assert!(tracker.is_locked_at(KEY, after));
        assert_eq!(tracker.entry(KEY).unwrap().failures, 6);
    }

    #[test]
    fn test_reservations_cap_in_flight_attempts() {
        let tracker = InMemoryLockoutTracker::default();
        let now = Utc::now();

        for _ in 0..5 {
            assert!(tracker.try_begin_attempt_at(KEY, now));
        }
        assert!(!tracker.try_begin_attempt_at(KEY, now));

        // A settled failure does not free a slot: four failures plus the
        // remaining in-flight attempt already reach the threshold
        tracker.record_failure_at(KEY, now);
        assert!(!tracker.try_begin_attempt_at(KEY, now));

        for _ in 0..4 {
            tracker.record_failure_at(KEY, now);
        }
        assert!(tracker.is_locked_at(KEY, now));
        assert!(!tracker.try_begin_attempt_at(KEY, now));
        assert_eq!(tracker.entry(KEY).unwrap().in_flight, 0);
    }

    #[test]
    fn test_abandoned_attempt_frees_its_slot() {
        let tracker = InMemoryLockoutTracker::default();
        let now = Utc::now();
        for _ in 0..5 {
            tracker.try_begin_attempt_at(KEY, now);
        }
        tracker.abandon_attempt(KEY);
        assert!(tracker.try_begin_attempt_at(KEY, now));

        for _ in 0..5 {
            tracker.abandon_attempt(KEY);
        }
        assert_eq!(tracker.entry(KEY), None);
    }

    #[test]
    fn test_one_attempt_at_a_time_after_expired_lockout() {
        let tracker = InMemoryLockoutTracker::default();
        let start = Utc::now();
        for _ in 0..5 {
            tracker.record_failure_at(KEY, start);
        }

        let after = start + Duration::minutes(16);
        assert!(tracker.try_begin_attempt_at(KEY, after));
        assert!(!tracker.try_begin_attempt_at(KEY, after));
        tracker.record_failure_at(KEY, after);
        assert!(!tracker.try_begin_attempt_at(KEY, after));
    }

    #[test]
    fn test_eviction_keeps_active_lockouts() {
        let tracker = InMemoryLockoutTracker::new(LockoutPolicy {
            max_entries: 3,
            ..LockoutPolicy::default()
        });
        let now = Utc::now();

        for _ in 0..5 {
            tracker.record_failure_at(KEY, now);
        }
        tracker.record_failure_at("198.51.100.1", now);
        tracker.record_failure_at("198.51.100.2", now);
        assert_eq!(tracker.len(), 3);

        assert!(tracker.try_begin_attempt_at("198.51.100.3", now));
        assert_eq!(tracker.len(), 2);
        assert!(tracker.is_locked_at(KEY, now));
        assert_eq!(tracker.entry("198.51.100.1"), None);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_threshold() {
        let tracker = Arc::new(InMemoryLockoutTracker::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let mut admitted = 0;
                    for _ in 0..10 {
                        if tracker.try_begin_attempt(KEY) {
                            admitted += 1;
                            tracker.record_failure(KEY);
                        }
                    }
                    admitted
                })
            })
            .collect();
        let admitted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 5);
        assert_eq!(tracker.entry(KEY).unwrap().failures, 5);
        assert!(tracker.is_locked(KEY));
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let tracker = Arc::new(InMemoryLockoutTracker::default());
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        tracker.record_failure(KEY);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.entry(KEY).unwrap().failures, 100);
        assert!(tracker.is_locked(KEY));
    }
}
