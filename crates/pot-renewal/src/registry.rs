/// Path timer registry: per-path renewal bookkeeping.
///
/// One `RenewalState` per path with live proof-of-transit, plus the
/// distribution record of everything written for the path. Both maps lock
/// internally; callers never hold a lock across an await.
///
/// Only the coordinator mutates entries. Periodic work is serialized by the
/// single worker, lifecycle create/delete for one path never race.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::record::{ConfigTarget, DistributionRecord};
use crate::types::{HopName, PathId, ProfileIndex};
use crate::util::lock;
use crate::wheel::{ScheduleWheel, TimerHandle};

/// Renewal health of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalHealth {
    /// Timer armed, last pass succeeded.
    Active,
    /// Last renewal failed. The previous profile stays live and no timer is
    /// armed until an operator refresh succeeds.
    Stalled { since_ms: u64, reason: String },
}

/// Effective (clamped) renewal parameters for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalParams {
    pub refresh_interval: Duration,
    pub profile_count: u32,
    pub bit_width: u32,
    pub hops: Vec<HopName>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalState {
    pub path: PathId,
    pub refresh_interval: Duration,
    pub profile_count: u32,
    pub bit_width: u32,
    pub hop_count: usize,
    /// Hops in path order, as provisioned.
    pub hops: Vec<HopName>,
    pub active_index: ProfileIndex,
    pub timer: Option<TimerHandle>,
    pub health: RenewalHealth,
    /// Unix ms of the last successful activation.
    pub last_renewed_ms: u64,
    /// Successful renewals since provisioning.
    pub renewals: u64,
}

pub struct PathTimerRegistry {
    wheel: ScheduleWheel,
    states: Mutex<HashMap<PathId, RenewalState>>,
    records: Mutex<HashMap<PathId, DistributionRecord>>,
}

impl PathTimerRegistry {
    pub fn new(wheel: ScheduleWheel) -> Self {
        Self {
            wheel,
            states: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn wheel(&self) -> &ScheduleWheel {
        &self.wheel
    }

    /// Create the state for a freshly provisioned path (active index 0).
    ///
    /// Replaces any previous state for the path, disarming its timer.
    pub fn create(&self, path: PathId, params: RenewalParams, now_ms: u64) -> RenewalState {
        let state = RenewalState {
            path: path.clone(),
            refresh_interval: params.refresh_interval,
            profile_count: params.profile_count,
            bit_width: params.bit_width,
            hop_count: params.hops.len(),
            hops: params.hops,
            active_index: 0,
            timer: None,
            health: RenewalHealth::Active,
            last_renewed_ms: now_ms,
            renewals: 0,
        };
        let previous = lock(&self.states).insert(path, state.clone());
        if let Some(timer) = previous.and_then(|p| p.timer) {
            self.wheel.disarm(timer);
        }
        state
    }

    pub fn get(&self, path: &PathId) -> Option<RenewalState> {
        lock(&self.states).get(path).cloned()
    }

    pub fn contains(&self, path: &PathId) -> bool {
        lock(&self.states).contains_key(path)
    }

    /// Remove a path's state, cancelling its timer first.
    pub fn delete(&self, path: &PathId) -> Option<RenewalState> {
        let timer = lock(&self.states).get_mut(path).and_then(|s| s.timer.take());
        if let Some(timer) = timer {
            self.wheel.disarm(timer);
        }
        lock(&self.states).remove(path)
    }

    pub fn set_active_index(&self, path: &PathId, index: ProfileIndex) -> bool {
        self.update(path, |s| s.active_index = index)
    }

    /// Attach a freshly armed timer. If the path vanished meanwhile the timer
    /// is disarmed and `false` returned.
    pub fn set_timer(&self, path: &PathId, timer: TimerHandle) -> bool {
        let mut previous = None;
        let attached = self.update(path, |s| previous = s.timer.replace(timer));
        if let Some(old) = previous.filter(|old| *old != timer) {
            self.wheel.disarm(old);
        }
        if !attached {
            self.wheel.disarm(timer);
        }
        attached
    }

    /// Record a successful renewal: health back to active, counters bumped.
    pub fn mark_renewed(&self, path: &PathId, now_ms: u64) -> bool {
        self.update(path, |s| {
            s.health = RenewalHealth::Active;
            s.last_renewed_ms = now_ms;
            s.renewals += 1;
        })
    }

    /// Mark a path as stalled and disarm its timer, if one is still pending.
    pub fn mark_stalled(&self, path: &PathId, since_ms: u64, reason: String) -> bool {
        let mut timer = None;
        let found = self.update(path, |s| {
            s.health = RenewalHealth::Stalled { since_ms, reason };
            timer = s.timer.take();
        });
        if let Some(timer) = timer {
            self.wheel.disarm(timer);
        }
        found
    }

    pub fn paths(&self) -> Vec<PathId> {
        lock(&self.states).keys().cloned().collect()
    }

    /// Paths whose last renewal failed.
    pub fn stalled(&self) -> Vec<PathId> {
        lock(&self.states)
            .values()
            .filter(|s| matches!(s.health, RenewalHealth::Stalled { .. }))
            .map(|s| s.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.states).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.states).is_empty()
    }

    // ── Distribution records ──────────────────────────────────────────

    pub fn record_push(
        &self,
        path: &PathId,
        hop: &HopName,
        target: ConfigTarget,
        profile: ProfileIndex,
        activate: Option<ProfileIndex>,
    ) {
        lock(&self.records)
            .entry(path.clone())
            .or_default()
            .record_push(hop, target, profile, activate);
    }

    pub fn record(&self, path: &PathId) -> Option<DistributionRecord> {
        lock(&self.records).get(path).cloned()
    }

    /// Remove and return a path's distribution record.
    pub fn take_record(&self, path: &PathId) -> Option<DistributionRecord> {
        lock(&self.records).remove(path)
    }

    fn update(&self, path: &PathId, f: impl FnOnce(&mut RenewalState)) -> bool {
        match lock(&self.states).get_mut(path) {
            Some(state) => {
                f(state);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfigKey, EndpointId};

    fn registry() -> PathTimerRegistry {
        PathTimerRegistry::new(ScheduleWheel::new(Duration::from_millis(10), 8))
    }

    fn params() -> RenewalParams {
        RenewalParams {
            refresh_interval: Duration::from_millis(500),
            profile_count: 2,
            bit_width: 64,
            hops: vec!["sff1".into(), "sff2".into(), "sff3".into()],
        }
    }

    #[test]
    fn create_get_delete() {
        let reg = registry();
        let path = PathId::new("P1");
        let state = reg.create(path.clone(), params(), 1_000);
        assert_eq!(state.active_index, 0);
        assert_eq!(state.hop_count, 3);
        assert_eq!(state.health, RenewalHealth::Active);
        assert_eq!(reg.get(&path), Some(state));

        assert!(reg.delete(&path).is_some());
        assert!(reg.get(&path).is_none());
        assert!(reg.delete(&path).is_none());
    }

    #[test]
    fn delete_disarms_timer() {
        let reg = registry();
        let path = PathId::new("P1");
        reg.create(path.clone(), params(), 0);
        let timer = reg.wheel().arm(|| {}, Duration::from_secs(1));
        assert!(reg.set_timer(&path, timer));
        assert!(reg.wheel().is_armed(timer));

        reg.delete(&path);
        assert!(!reg.wheel().is_armed(timer));
        assert_eq!(reg.wheel().pending(), 0);
    }

    #[test]
    fn set_timer_on_missing_path_disarms_it() {
        let reg = registry();
        let timer = reg.wheel().arm(|| {}, Duration::from_secs(1));
        assert!(!reg.set_timer(&PathId::new("gone"), timer));
        assert!(!reg.wheel().is_armed(timer));
    }

    #[test]
    fn set_timer_replaces_previous() {
        let reg = registry();
        let path = PathId::new("P1");
        reg.create(path.clone(), params(), 0);
        let first = reg.wheel().arm(|| {}, Duration::from_secs(1));
        let second = reg.wheel().arm(|| {}, Duration::from_secs(1));
        reg.set_timer(&path, first);
        reg.set_timer(&path, second);
        assert!(!reg.wheel().is_armed(first));
        assert!(reg.wheel().is_armed(second));
    }

    #[test]
    fn stalled_and_recovered() {
        let reg = registry();
        let path = PathId::new("P1");
        reg.create(path.clone(), params(), 0);
        assert!(reg.mark_stalled(&path, 5, "hop down".into()));
        assert_eq!(reg.stalled(), vec![path.clone()]);

        assert!(reg.set_active_index(&path, 1));
        assert!(reg.mark_renewed(&path, 10));
        let state = reg.get(&path).unwrap();
        assert_eq!(state.active_index, 1);
        assert_eq!(state.renewals, 1);
        assert_eq!(state.health, RenewalHealth::Active);
        assert!(reg.stalled().is_empty());
    }

    #[test]
    fn mark_stalled_disarms_pending_timer() {
        let reg = registry();
        let path = PathId::new("P1");
        reg.create(path.clone(), params(), 0);
        let timer = reg.wheel().arm(|| {}, Duration::from_secs(1));
        reg.set_timer(&path, timer);

        assert!(reg.mark_stalled(&path, 5, "hop down".into()));
        assert!(!reg.wheel().is_armed(timer));
        assert_eq!(reg.wheel().pending(), 0);
        assert!(reg.get(&path).unwrap().timer.is_none());
    }

    #[test]
    fn updates_on_missing_path_return_false() {
        let reg = registry();
        let path = PathId::new("nope");
        assert!(!reg.set_active_index(&path, 1));
        assert!(!reg.mark_renewed(&path, 1));
        assert!(!reg.mark_stalled(&path, 1, String::new()));
    }

    #[test]
    fn records_are_kept_per_path() {
        let reg = registry();
        let path = PathId::new("P1");
        let target = ConfigTarget {
            endpoint: EndpointId::new("ep1"),
            key: ConfigKey::for_path(&path),
        };
        reg.record_push(&path, &HopName::new("sff1"), target, 0, None);
        assert_eq!(reg.record(&path).map(|r| r.len()), Some(1));
        assert!(reg.record(&PathId::new("other")).is_none());

        assert!(reg.take_record(&path).is_some());
        assert!(reg.record(&path).is_none());
    }
}
