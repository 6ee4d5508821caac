use super::table::{EventId, TimeoutPolicy};
use serde::{Deserialize, Serialize};

/// Per-sojourn counters of the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Live {
    /// Cycles completed in the current state without a transition.
    pub ticks: u32,
    pub timestamp: u32,
    /// Absolute deadline, `None` while disarmed.
    pub deadline: Option<u32>,
    /// Module handlers that failed during the last dispatch.
    pub module_errors: u8,
}

impl Live {
    /// Restart the sojourn counters at `timestamp`. The module error count
    /// survives so the next timeout check sees the last dispatch.
    pub fn reset(&mut self, policy: TimeoutPolicy, timestamp: u32) {
        self.ticks = 0;
        self.timestamp = timestamp;
        self.deadline = policy.duration().map(|after| timestamp.wrapping_add(after));
    }
}

/// Wrap-safe `now >= deadline` for a free-running 32-bit clock.
pub fn reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) < 0x8000_0000
}

/// Applies the state's policy to the live counters and returns the event
/// to raise when the deadline has passed. A fired deadline is disarmed.
pub fn poll(policy: TimeoutPolicy, live: &mut Live) -> Option<EventId> {
    match policy {
        TimeoutPolicy::None => return None,
        TimeoutPolicy::Fixed { .. } => {}
        TimeoutPolicy::OkOnEntry { .. } => {
            if live.module_errors == 0 {
                live.deadline = None;
            }
        }
        TimeoutPolicy::OkWatchdog { after, .. } => {
            if live.module_errors == 0 {
                live.deadline = Some(live.timestamp.wrapping_add(after));
            }
        }
    }

    let deadline = live.deadline?;
    if reached(live.timestamp, deadline) {
        live.deadline = None;
        policy.event()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EV: EventId = EventId(3);

    fn at(timestamp: u32, errors: u8, live: &mut Live) {
        live.timestamp = timestamp;
        live.module_errors = errors;
    }

    #[test]
    fn test_fixed_fires_once() {
        let policy = TimeoutPolicy::Fixed { after: 2, event: EV };
        let mut live = Live::default();
        live.reset(policy, 10);
        at(11, 0, &mut live);
        assert_eq!(poll(policy, &mut live), None);
        at(12, 0, &mut live);
        assert_eq!(poll(policy, &mut live), Some(EV));
        at(13, 0, &mut live);
        assert_eq!(poll(policy, &mut live), None);
    }

    #[test]
    fn test_ok_on_entry_disarms_on_clean_pass() {
        let policy = TimeoutPolicy::OkOnEntry { after: 1, event: EV };
        let mut live = Live::default();
        live.reset(policy, 0);
        at(0, 0, &mut live);
        assert_eq!(poll(policy, &mut live), None);
        at(5, 3, &mut live);
        assert_eq!(poll(policy, &mut live), None);
        assert_eq!(live.deadline, None);
    }

    #[test]
    fn test_ok_on_entry_fires_while_failing() {
        let policy = TimeoutPolicy::OkOnEntry { after: 2, event: EV };
        let mut live = Live::default();
        live.reset(policy, 0);
        at(1, 1, &mut live);
        assert_eq!(poll(policy, &mut live), None);
        at(2, 1, &mut live);
        assert_eq!(poll(policy, &mut live), Some(EV));
    }

    #[test]
    fn test_watchdog_rearms_on_clean_pass() {
        let policy = TimeoutPolicy::OkWatchdog { after: 3, event: EV };
        let mut live = Live::default();
        live.reset(policy, 0);
        for t in 1..20 {
            at(t, 0, &mut live);
            assert_eq!(poll(policy, &mut live), None);
        }
        assert_eq!(live.deadline, Some(22));
    }

    #[test]
    fn test_deadline_across_clock_wrap() {
        assert!(reached(5, u32::MAX - 2));
        assert!(!reached(u32::MAX - 2, 5));
        assert!(reached(7, 7));
    }
}
