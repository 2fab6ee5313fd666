//! Script timers (`setTimeout` / `setInterval`).
//!
//! The callbacks stay on the script side as handles; this table only knows
//! when each one is due. [`Timers::due`] is polled by the sandbox tick.

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

/// Shortest interval period accepted, so a zero period cannot spin.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// One scheduled callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub id: u32,
    pub owner: Option<String>,
    pub handle: u32,
    pub period: Option<Duration>,
    pub due: Instant,
}

impl Timer {
    pub fn is_interval(&self) -> bool {
        self.period.is_some()
    }
}

/// A timer that came due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub id: u32,
    pub handle: u32,
    /// Timeouts fire once; their handle can be released afterwards.
    pub once: bool,
}

#[derive(Debug, Default)]
pub struct Timers {
    next_id: Cell<u32>,
    timers: RefCell<Vec<Timer>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a handle. Intervals repeat every `delay`.
    pub fn set(&self, owner: Option<&str>, handle: u32, delay: Duration, repeat: bool, now: Instant) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        let period = repeat.then(|| delay.max(MIN_PERIOD));
        self.timers.borrow_mut().push(Timer {
            id,
            owner: owner.map(str::to_string),
            handle,
            period,
            due: now + delay,
        });
        id
    }

    /// Cancel a timer. Unknown ids are ignored.
    pub fn clear(&self, id: u32) -> Option<Timer> {
        let mut timers = self.timers.borrow_mut();
        let idx = timers.iter().position(|t| t.id == id)?;
        Some(timers.remove(idx))
    }

    /// Cancel every timer of a plugin.
    pub fn clear_owned_by(&self, owner: &str) -> Vec<Timer> {
        let mut removed = Vec::new();
        self.timers.borrow_mut().retain(|t| {
            if t.owner.as_deref() == Some(owner) {
                removed.push(t.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Take every timer due at `now`, in due order. Intervals are
    /// rescheduled, timeouts removed.
    pub fn due(&self, now: Instant) -> Vec<Fired> {
        let mut timers = self.timers.borrow_mut();
        let mut fired: Vec<(Instant, Fired)> = Vec::new();
        timers.retain_mut(|t| {
            if t.due > now {
                return true;
            }
            fired.push((t.due, Fired { id: t.id, handle: t.handle, once: t.period.is_none() }));
            match t.period {
                Some(period) => {
                    while t.due <= now {
                        t.due += period;
                    }
                    true
                }
                None => false,
            }
        });
        fired.sort_by_key(|(due, f)| (*due, f.id));
        fired.into_iter().map(|(_, f)| f).collect()
    }

    /// When the next timer is due.
    pub fn next_due(&self) -> Option<Instant> {
        self.timers.borrow().iter().map(|t| t.due).min()
    }

    /// Live intervals of a plugin.
    pub fn intervals_of(&self, owner: &str) -> usize {
        self.timers.borrow().iter().filter(|t| t.is_interval() && t.owner.as_deref() == Some(owner)).count()
    }

    /// Live timers of a plugin.
    pub fn count_for(&self, owner: &str) -> usize {
        self.timers.borrow().iter().filter(|t| t.owner.as_deref() == Some(owner)).count()
    }

    pub fn len(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_fires_once() {
        let timers = Timers::new();
        let start = Instant::now();
        let id = timers.set(Some("a"), 7, Duration::from_millis(50), false, start);
        assert!(timers.due(start).is_empty());
        let fired = timers.due(start + Duration::from_millis(60));
        assert_eq!(fired, vec![Fired { id, handle: 7, once: true }]);
        assert!(timers.due(start + Duration::from_secs(5)).is_empty());
        assert!(timers.is_empty());
    }

    #[test]
    fn test_interval_reschedules() {
        let timers = Timers::new();
        let start = Instant::now();
        timers.set(Some("a"), 1, Duration::from_millis(1000), true, start);
        assert_eq!(timers.due(start + Duration::from_millis(1000)).len(), 1);
        // A long stall fires once and catches up the schedule.
        assert_eq!(timers.due(start + Duration::from_millis(5500)).len(), 1);
        assert_eq!(timers.next_due(), Some(start + Duration::from_millis(6000)));
        assert_eq!(timers.intervals_of("a"), 1);
    }

    #[test]
    fn test_due_order() {
        let timers = Timers::new();
        let start = Instant::now();
        let late = timers.set(None, 1, Duration::from_millis(30), false, start);
        let early = timers.set(None, 2, Duration::from_millis(10), false, start);
        let ids: Vec<_> = timers.due(start + Duration::from_millis(40)).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[test]
    fn test_clear_owned_by() {
        let timers = Timers::new();
        let now = Instant::now();
        timers.set(Some("a"), 1, Duration::from_millis(10), true, now);
        timers.set(Some("a"), 2, Duration::from_millis(10), false, now);
        let keep = timers.set(Some("b"), 3, Duration::from_millis(10), true, now);
        assert_eq!(timers.clear_owned_by("a").len(), 2);
        assert_eq!(timers.count_for("a"), 0);
        assert!(timers.clear(keep).is_some());
        assert!(timers.clear(keep).is_none());
    }
}
