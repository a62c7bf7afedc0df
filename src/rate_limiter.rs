// rate_limiter.rs
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// Minimum number of seconds between two accepted questions from one user.
pub const MIN_INTERVAL: f64 = 2.0;

/// Upper bound on tracked users before stale entries get swept.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Admit,
    /// Seconds the user still has to wait.
    Deny(f64),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Per-user gate remembering the time of each user's last accepted request.
///
/// Timestamps are seconds on a caller-chosen clock. The check and the write of
/// the new timestamp happen under one lock, so two concurrent requests from the
/// same user can never both be admitted inside the interval.
pub struct RateGate<K = u64> {
    state: Mutex<GateState<K>>,
    min_interval: f64,
    capacity: usize,
}

struct GateState<K> {
    last_seen: HashMap<K, f64>,
    last_sweep: Option<f64>,
}

impl<K: Eq + Hash> RateGate<K> {
    pub fn new(min_interval: f64) -> Self {
        Self::with_capacity(min_interval, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(min_interval: f64, capacity: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                last_seen: HashMap::new(),
                last_sweep: None,
            }),
            min_interval,
            capacity: capacity.max(1),
        }
    }

    pub fn min_interval(&self) -> f64 {
        self.min_interval
    }

    pub fn check(&self, user: K, now: f64) -> Decision {
        let mut state = self.lock();
        let GateState {
            last_seen,
            last_sweep,
        } = &mut *state;
        if let Some(&last) = last_seen.get(&user) {
            let elapsed = now - last;
            if elapsed < self.min_interval {
                return Decision::Deny(self.min_interval - elapsed);
            }
            // Never move a user's clock backwards.
            last_seen.insert(user, now.max(last));
            return Decision::Admit;
        }

        // At most one sweep per interval.
        let sweep_due = last_sweep.map_or(true, |at| now - at >= self.min_interval);
        if last_seen.len() >= self.capacity && sweep_due {
            let min_interval = self.min_interval;
            let before = last_seen.len();
            last_seen.retain(|_, &mut last| now - last < min_interval);
            *last_sweep = Some(now);
            log::debug!(
                "Rate gate swept {} stale entries ({} remain)",
                before - last_seen.len(),
                last_seen.len()
            );
        }
        last_seen.insert(user, now);
        Decision::Admit
    }

    pub fn last_seen(&self, user: &K) -> Option<f64> {
        self.lock().last_seen.get(user).copied()
    }

    pub fn tracked_users(&self) -> usize {
        self.lock().last_seen.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState<K>> {
        // A panic while holding the guard cannot leave the map half-written.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K: Eq + Hash> Default for RateGate<K> {
    fn default() -> Self {
        Self::new(MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn first_request_is_admitted_and_recorded() {
        let gate = RateGate::default();
        assert_eq!(gate.check(42u64, 100.0), Decision::Admit);
        assert_eq!(gate.last_seen(&42), Some(100.0));
    }

    #[test]
    fn second_request_inside_interval_is_denied() {
        let gate = RateGate::default();
        gate.check(42u64, 100.0);
        match gate.check(42, 100.5) {
            Decision::Deny(remaining) => assert!((remaining - 1.5).abs() < 1e-9),
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn deny_does_not_touch_state() {
        let gate = RateGate::default();
        gate.check(7u64, 10.0);
        gate.check(7, 11.0);
        gate.check(7, 11.9);
        assert_eq!(gate.last_seen(&7), Some(10.0));
    }

    #[test]
    fn request_exactly_at_interval_is_admitted() {
        let gate = RateGate::default();
        gate.check(1u64, 0.0);
        assert_eq!(gate.check(1, MIN_INTERVAL), Decision::Admit);
        assert_eq!(gate.last_seen(&1), Some(MIN_INTERVAL));
    }

    #[test]
    fn users_are_independent() {
        let gate = RateGate::default();
        gate.check(1u64, 5.0);
        assert_eq!(gate.check(2, 5.1), Decision::Admit);
        assert_eq!(gate.last_seen(&1), Some(5.0));
    }

    #[test]
    fn sweep_drops_only_stale_entries() {
        let gate = RateGate::with_capacity(2.0, 2);
        gate.check(1u64, 0.0);
        gate.check(2, 9.5);
        // Capacity reached: user 1 is stale at t=10, user 2 is not.
        assert_eq!(gate.check(3, 10.0), Decision::Admit);
        assert_eq!(gate.tracked_users(), 2);
        assert_eq!(gate.last_seen(&1), None);
        assert!(!gate.check(2, 10.5).is_admit());
    }

    #[test]
    fn sweeps_at_most_once_per_interval() {
        let gate = RateGate::with_capacity(2.0, 2);
        gate.check(1u64, 0.0);
        gate.check(2, 0.0);

        // Nothing is stale yet, so the sweep removes nothing.
        gate.check(3, 0.5);
        assert_eq!(gate.tracked_users(), 3);

        // Users 1 and 2 are stale now, but the last sweep was too recent.
        gate.check(4, 2.2);
        assert_eq!(gate.tracked_users(), 4);

        // A full interval after the last sweep: 1, 2 and 3 are dropped.
        gate.check(5, 2.6);
        assert_eq!(gate.tracked_users(), 2);
        assert_eq!(gate.last_seen(&4), Some(2.2));
        assert_eq!(gate.last_seen(&5), Some(2.6));
    }

    #[test]
    fn concurrent_requests_from_one_user_admit_once() {
        let gate = Arc::new(RateGate::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.check(99u64, 50.0))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Decision::is_admit)
            .count();
        assert_eq!(admitted, 1);
    }

    proptest! {
        #[test]
        fn deny_reports_remaining_wait(start in 0.0f64..1e6, offset in 0.0f64..MIN_INTERVAL) {
            let gate = RateGate::default();
            gate.check(1u64, start);
            match gate.check(1, start + offset) {
                Decision::Deny(remaining) => {
                    prop_assert!((remaining - (MIN_INTERVAL - offset)).abs() < 1e-6)
                }
                Decision::Admit => prop_assert!(offset >= MIN_INTERVAL - 1e-6),
            }
        }

        #[test]
        fn admits_again_after_interval(start in 0.0f64..1e6, eps in 1e-3f64..100.0) {
            let gate = RateGate::default();
            gate.check(1u64, start);
            prop_assert_eq!(gate.check(1, start + MIN_INTERVAL + eps), Decision::Admit);
        }
    }
}
