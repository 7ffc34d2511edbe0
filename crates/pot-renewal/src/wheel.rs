//! Schedule wheel: coarse one-shot timers with O(1) cancel.
//!
//! A hashed wheel of `slots` buckets, advanced once per `tick` by a single
//! driver task. An entry armed `t` ticks ahead lands in bucket
//! `(cursor + t) % slots` with `(t - 1) / slots` extra rounds to wait.
//!
//! Each entry also keeps its absolute deadline. When its bucket comes up
//! before the deadline (late driver start, arm racing a tick) it is moved
//! to the bucket matching the remaining time instead of firing, so a task
//! never runs before its delay has elapsed.
//!
//! Tasks run on the driver task, outside the wheel lock. They are expected
//! to be short (enqueue + signal); anything slow belongs on the worker.
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::util::lock;

/// Longest delay a timer can be armed with; longer requests are capped.
const MAX_DELAY: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

/// Work executed when a timer fires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to an armed timer. Stale handles are harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry {
    deadline: Instant,
    rounds: u64,
    task: TimerTask,
}

struct WheelState {
    slots: Vec<HashMap<u64, Entry>>,
    /// Timer id → bucket it currently sits in.
    index: HashMap<u64, usize>,
    cursor: usize,
    next_id: u64,
}

impl WheelState {
    fn place(&mut self, id: u64, mut entry: Entry, remaining: Duration, tick: Duration) {
        let n = self.slots.len() as u64;
        let ticks = ticks_for(remaining, tick);
        let slot = ((self.cursor as u64 + ticks) % n) as usize;
        entry.rounds = (ticks - 1) / n;
        self.slots[slot].insert(id, entry);
        self.index.insert(id, slot);
    }
}

/// Ticks to wait so that at least `delay` has elapsed, counting the
/// partially elapsed current tick as zero.
fn ticks_for(delay: Duration, tick: Duration) -> u64 {
    let tick_ns = tick.as_nanos().max(1);
    let whole = delay.as_nanos().div_ceil(tick_ns);
    u64::try_from(whole).unwrap_or(u64::MAX - 1) + 1
}

struct Inner {
    state: Mutex<WheelState>,
    tick: Duration,
}

/// Shared, cloneable schedule wheel.
#[derive(Clone)]
pub struct ScheduleWheel {
    inner: Arc<Inner>,
}

impl fmt::Debug for ScheduleWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleWheel")
            .field("tick", &self.inner.tick)
            .field("pending", &self.pending())
            .finish()
    }
}

impl ScheduleWheel {
    /// Create a wheel with `slots` buckets of `tick` each. Nothing fires until
    /// [`spawn_driver`](Self::spawn_driver) is called (or [`advance`](Self::advance)
    /// is driven by hand).
    pub fn new(tick: Duration, slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(WheelState {
                    slots: (0..slots).map(|_| HashMap::new()).collect(),
                    index: HashMap::new(),
                    cursor: 0,
                    next_id: 0,
                }),
                tick: tick.max(Duration::from_millis(1)),
            }),
        }
    }

    pub fn tick(&self) -> Duration {
        self.inner.tick
    }

    /// Schedule `task` to run once, no earlier than `delay` from now.
    pub fn arm<F>(&self, task: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = delay.min(MAX_DELAY);
        let deadline = Instant::now() + delay;
        let mut state = lock(&self.inner.state);
        let id = state.next_id;
        state.next_id += 1;
        state.place(
            id,
            Entry {
                deadline,
                rounds: 0,
                task: Box::new(task),
            },
            delay,
            self.inner.tick,
        );
        TimerHandle(id)
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub fn disarm(&self, handle: TimerHandle) -> bool {
        let mut state = lock(&self.inner.state);
        match state.index.remove(&handle.0) {
            Some(slot) => state.slots[slot].remove(&handle.0).is_some(),
            None => false,
        }
    }

    /// Whether the timer is still waiting to fire.
    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        lock(&self.inner.state).index.contains_key(&handle.0)
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        lock(&self.inner.state).index.len()
    }

    /// Advance one tick and run every task that came due. Returns how many ran.
    pub fn advance(&self) -> usize {
        let now = Instant::now();
        let due = {
            let mut state = lock(&self.inner.state);
            let n = state.slots.len();
            state.cursor = (state.cursor + 1) % n;
            let cursor = state.cursor;
            let bucket = std::mem::take(&mut state.slots[cursor]);

            let mut due = Vec::new();
            for (id, mut entry) in bucket {
                if entry.rounds > 0 {
                    entry.rounds -= 1;
                    state.slots[cursor].insert(id, entry);
                } else if entry.deadline <= now {
                    state.index.remove(&id);
                    due.push(entry.task);
                } else {
                    let remaining = entry.deadline - now;
                    state.place(id, entry, remaining, self.inner.tick);
                }
            }
            due
        };

        let fired = due.len();
        for task in due {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("schedule wheel: timer task panicked");
            }
        }
        fired
    }

    /// Spawn the task that advances the wheel every tick until `shutdown`.
    pub fn spawn_driver(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let wheel = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(wheel.tick());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let fired = wheel.advance();
                        if fired > 0 {
                            tracing::trace!(fired, "schedule wheel tick");
                        }
                    }
                }
            }
            tracing::debug!(pending = wheel.pending(), "schedule wheel driver stopped");
        })
    }
}
