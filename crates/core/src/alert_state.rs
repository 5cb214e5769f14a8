//! Per-(rule, host) temporal alert state.
//!
//! Pure logic with no clock of its own: every call takes `now` so the
//! engine (and tests) decide what time it is. The engine keeps one
//! [`AlertStateTracker`] behind its lock and feeds it the outcome of each
//! rule comparison.
//!
//! Phases of a key:
//!
//! ```text
//! IDLE ──cond──▶ PENDING ──duration elapsed──▶ FIRED
//!  ▲               │                             │
//!  └───!cond───────┘◀──────────!cond─────────────┤
//!                                                ▼
//!                              COOLDOWN_BLOCKED (cond, inside cooldown)
//! ```

use std::collections::HashMap;
use std::time::Duration;

use crate::rule::Rule;
use crate::types::{DbId, Timestamp};

/// Identifies one instance of temporal alert state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub rule_id: DbId,
    pub host: String,
}

impl AlertKey {
    pub fn new(rule_id: DbId, host: impl Into<String>) -> Self {
        Self {
            rule_id,
            host: host.into(),
        }
    }
}

/// Tracking record for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyState {
    /// When the condition most recently became true. Cleared when it turns false.
    pub first_met_at: Option<Timestamp>,
    /// When the key last fired.
    pub last_triggered_at: Option<Timestamp>,
    /// Last evaluation that touched this key; drives the retention sweep.
    pub last_seen_at: Timestamp,
}

/// Outcome of observing one comparison result for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Condition false; pending tracking (if any) was cleared.
    Idle,
    /// Condition true but the sustained duration has not elapsed yet.
    Pending,
    /// Condition satisfied but the key fired within its cooldown window.
    CooldownBlocked,
    /// Emit an event. `last_triggered_at` has been stamped.
    Fire,
}

/// Timing parameters of the rule being observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleTiming {
    pub duration: Duration,
    pub cooldown: Duration,
    /// When `true`, zero-duration rules fire on every cycle the condition
    /// holds and ignore the cooldown.
    pub immediate_bypasses_cooldown: bool,
}

impl RuleTiming {
    pub fn for_rule(rule: &Rule, immediate_bypasses_cooldown: bool) -> Self {
        Self {
            duration: rule.duration(),
            cooldown: rule.cooldown(),
            immediate_bypasses_cooldown,
        }
    }
}

/// Counts reported by [`AlertStateTracker::counts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerCounts {
    /// Keys currently tracked.
    pub tracked: usize,
    /// Keys with a first-met time (condition continuously true).
    pub pending: usize,
    /// Keys with a last-triggered time.
    pub triggered: usize,
}

/// All per-key state, in one map.
#[derive(Debug, Default)]
pub struct AlertStateTracker {
    states: HashMap<AlertKey, KeyState>,
}

/// `true` if at least `span` has passed between `since` and `now`.
///
/// A `since` in the future counts as not elapsed.
fn elapsed_at_least(since: Timestamp, now: Timestamp, span: Duration) -> bool {
    match (now - since).to_std() {
        Ok(elapsed) => elapsed >= span,
        Err(_) => false,
    }
}

impl AlertStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one comparison result for `key` and decide what happens.
    pub fn observe(
        &mut self,
        key: &AlertKey,
        condition_met: bool,
        timing: RuleTiming,
        now: Timestamp,
    ) -> Decision {
        if !condition_met {
            if let Some(state) = self.states.get_mut(key) {
                state.first_met_at = None;
                state.last_seen_at = now;
                // Only the cooldown stamp is worth keeping once the condition clears.
                if state.last_triggered_at.is_none() {
                    self.states.remove(key);
                }
            }
            return Decision::Idle;
        }

        let state = self.states.entry(key.clone()).or_insert(KeyState {
            first_met_at: None,
            last_triggered_at: None,
            last_seen_at: now,
        });
        state.last_seen_at = now;

        if timing.duration.is_zero() && timing.immediate_bypasses_cooldown {
            state.last_triggered_at = Some(now);
            return Decision::Fire;
        }

        let cooling = state
            .last_triggered_at
            .is_some_and(|last| !elapsed_at_least(last, now, timing.cooldown));
        if cooling {
            return Decision::CooldownBlocked;
        }

        if timing.duration.is_zero() {
            state.last_triggered_at = Some(now);
            return Decision::Fire;
        }

        match state.first_met_at {
            None => {
                state.first_met_at = Some(now);
                Decision::Pending
            }
            Some(first) if elapsed_at_least(first, now, timing.duration) => {
                state.last_triggered_at = Some(now);
                Decision::Fire
            }
            Some(_) => Decision::Pending,
        }
    }

    /// Drop every key not touched within `retention` of `now`.
    ///
    /// Returns the number of keys removed.
    pub fn purge_stale(&mut self, now: Timestamp, retention: Duration) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, state| !elapsed_at_least(state.last_seen_at, now, retention));
        before - self.states.len()
    }

    pub fn get(&self, key: &AlertKey) -> Option<&KeyState> {
        self.states.get(key)
    }

    pub fn counts(&self) -> TrackerCounts {
        let mut counts = TrackerCounts {
            tracked: self.states.len(),
            ..TrackerCounts::default()
        };
        for state in self.states.values() {
            if state.first_met_at.is_some() {
                counts.pending += 1;
            }
            if state.last_triggered_at.is_some() {
                counts.triggered += 1;
            }
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn timing(duration: u64, cooldown: u64) -> RuleTiming {
        RuleTiming {
            duration: Duration::from_secs(duration),
            cooldown: Duration::from_secs(cooldown),
            immediate_bypasses_cooldown: true,
        }
    }

    fn key() -> AlertKey {
        AlertKey::new(1, "web-1")
    }

    #[test]
    fn false_condition_on_unknown_key_tracks_nothing() {
        let mut tracker = AlertStateTracker::new();
        assert_eq!(tracker.observe(&key(), false, timing(60, 300), at(0)), Decision::Idle);
        assert!(tracker.is_empty());
    }

    #[test]
    fn sustained_condition_fires_once_duration_elapses() {
        let mut tracker = AlertStateTracker::new();
        let t = timing(60, 300);

        assert_eq!(tracker.observe(&key(), true, t, at(0)), Decision::Pending);
        assert_eq!(tracker.observe(&key(), true, t, at(30)), Decision::Pending);
        assert_eq!(tracker.observe(&key(), true, t, at(59)), Decision::Pending);
        assert_eq!(tracker.observe(&key(), true, t, at(60)), Decision::Fire);
        assert_eq!(tracker.get(&key()).unwrap().last_triggered_at, Some(at(60)));
    }

    #[test]
    fn cooldown_blocks_until_window_passes() {
        let mut tracker = AlertStateTracker::new();
        let t = timing(60, 300);

        tracker.observe(&key(), true, t, at(0));
        assert_eq!(tracker.observe(&key(), true, t, at(60)), Decision::Fire);
        assert_eq!(tracker.observe(&key(), true, t, at(61)), Decision::CooldownBlocked);
        assert_eq!(tracker.observe(&key(), true, t, at(359)), Decision::CooldownBlocked);
        assert_eq!(tracker.observe(&key(), true, t, at(360)), Decision::Fire);
    }

    #[test]
    fn clearing_condition_restarts_duration() {
        let mut tracker = AlertStateTracker::new();
        let t = timing(60, 0);

        tracker.observe(&key(), true, t, at(0));
        tracker.observe(&key(), true, t, at(50));
        assert_eq!(tracker.observe(&key(), false, t, at(55)), Decision::Idle);
        assert!(tracker.get(&key()).is_none());

        assert_eq!(tracker.observe(&key(), true, t, at(56)), Decision::Pending);
        assert_eq!(tracker.observe(&key(), true, t, at(100)), Decision::Pending);
        assert_eq!(tracker.observe(&key(), true, t, at(116)), Decision::Fire);
    }

    #[test]
    fn clearing_after_fire_keeps_cooldown_stamp() {
        let mut tracker = AlertStateTracker::new();
        let t = timing(10, 300);

        tracker.observe(&key(), true, t, at(0));
        assert_eq!(tracker.observe(&key(), true, t, at(10)), Decision::Fire);
        tracker.observe(&key(), false, t, at(20));

        let state = tracker.get(&key()).expect("cooldown stamp retained");
        assert!(state.first_met_at.is_none());
        assert_eq!(state.last_triggered_at, Some(at(10)));

        // A new true-run inside the cooldown is still blocked, and its
        // duration only starts counting once the cooldown has passed.
        assert_eq!(tracker.observe(&key(), true, t, at(100)), Decision::CooldownBlocked);
        assert_eq!(tracker.observe(&key(), true, t, at(310)), Decision::Pending);
        assert_eq!(tracker.observe(&key(), true, t, at(320)), Decision::Fire);
    }

    #[test]
    fn immediate_rule_fires_every_cycle_when_bypassing_cooldown() {
        let mut tracker = AlertStateTracker::new();
        let t = timing(0, 300);

        for secs in 0..5 {
            assert_eq!(tracker.observe(&key(), true, t, at(secs)), Decision::Fire);
        }
    }

    #[test]
    fn immediate_rule_respects_cooldown_when_configured() {
        let mut tracker = AlertStateTracker::new();
        let t = RuleTiming {
            immediate_bypasses_cooldown: false,
            ..timing(0, 300)
        };

        assert_eq!(tracker.observe(&key(), true, t, at(0)), Decision::Fire);
        assert_eq!(tracker.observe(&key(), true, t, at(1)), Decision::CooldownBlocked);
        assert_eq!(tracker.observe(&key(), true, t, at(300)), Decision::Fire);
    }

    #[test]
    fn keys_are_independent_per_host() {
        let mut tracker = AlertStateTracker::new();
        let t = timing(0, 0);
        let other = AlertKey::new(1, "web-2");

        tracker.observe(&key(), true, t, at(0));
        tracker.observe(&other, true, t, at(0));
        tracker.observe(&key(), false, t, at(1));

        assert!(tracker.get(&other).is_some());
        assert_eq!(tracker.counts().tracked, 2);
    }

    #[test]
    fn purge_removes_only_stale_keys() {
        let mut tracker = AlertStateTracker::new();
        let t = timing(60, 0);
        let fresh = AlertKey::new(2, "web-1");

        tracker.observe(&key(), true, t, at(0));
        tracker.observe(&fresh, true, t, at(3000));

        let removed = tracker.purge_stale(at(3600), Duration::from_secs(3600));
        assert_eq!(removed, 1);
        assert!(tracker.get(&key()).is_none());
        assert!(tracker.get(&fresh).is_some());
    }

    #[test]
    fn counts_split_pending_and_triggered() {
        let mut tracker = AlertStateTracker::new();
        tracker.observe(&key(), true, timing(60, 0), at(0));
        tracker.observe(&AlertKey::new(2, "web-1"), true, timing(0, 0), at(0));

        let counts = tracker.counts();
        assert_eq!(counts.tracked, 2);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.triggered, 1);
    }
}
