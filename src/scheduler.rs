use crate::config::TrackerConfig;
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const TASK_COUNT: usize = 6;

/// Low-rate work derived from the driving tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskId {
    LoraJoin,
    LoraSend,
    BleHousekeeping,
    StatusRefresh,
    TagPersistence,
    PositionRead,
}

impl TaskId {
    pub const ALL: [TaskId; TASK_COUNT] = [
        TaskId::LoraJoin,
        TaskId::LoraSend,
        TaskId::BleHousekeeping,
        TaskId::StatusRefresh,
        TaskId::TagPersistence,
        TaskId::PositionRead,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskSlot {
    /// `None` while the task is unset.
    pub divisor: Option<u32>,
    pub triggered: bool,
    pub fire_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub ticks: u32,
    pub total_fired: u32,
    pub total_consumed: u32,
    pub join_timeouts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub fired: ArrayVec<TaskId, TASK_COUNT>,
    /// The join watchdog cleared a stale in-progress flag.
    pub join_timed_out: bool,
}

/// `max(1, round(interval / period))`.
pub fn divisor_for(interval_ms: u32, period_ms: u32) -> u32 {
    let period = period_ms.max(1);
    (interval_ms.saturating_add(period / 2) / period).max(1)
}

/// Derives several periodic trigger flags from one fixed-period tick.
///
/// Task X fires whenever the shared counter is a multiple of its divisor.
/// Changing an interval never rewinds the counter, so tasks keep their
/// phase relative to it rather than to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecimationScheduler {
    period_ms: u32,
    counter: u32,
    tasks: [TaskSlot; TASK_COUNT],
    join_timeout_offset: u32,
    join_in_progress: bool,
    stats: SchedulerStats,
}

impl DecimationScheduler {
    pub fn new(period_ms: u32) -> Self {
        // NASA Rule 5: a zero period would make every divisor meaningless
        debug_assert!(period_ms > 0, "Decimation period must be non-zero");

        Self {
            period_ms: period_ms.max(1),
            counter: 0,
            tasks: [TaskSlot::default(); TASK_COUNT],
            join_timeout_offset: crate::config::DEFAULT_JOIN_TIMEOUT_MS / period_ms.max(1),
            join_in_progress: false,
            stats: SchedulerStats::default(),
        }
    }

    /// Applies every interval of `config`, as done on an engine restart.
    pub fn reconfigure(&mut self, config: &TrackerConfig) {
        self.period_ms = config.tick_period_ms.max(1);
        self.set_join_timeout(config.join_timeout_ms);
        for task in TaskId::ALL {
            let interval = config.tasks.get(task);
            self.set_interval(task, interval.interval_ms, interval.immediate);
        }
    }

    pub fn set_interval(&mut self, task: TaskId, interval_ms: u32, trigger_now: bool) {
        let divisor = divisor_for(interval_ms, self.period_ms);
        let slot = &mut self.tasks[task.index()];
        slot.divisor = Some(divisor);
        if trigger_now {
            slot.triggered = true;
        }
        debug!(?task, interval_ms, divisor, trigger_now, "task interval set");
    }

    pub fn unset(&mut self, task: TaskId) {
        let slot = &mut self.tasks[task.index()];
        slot.divisor = None;
        slot.triggered = false;
    }

    pub fn set_join_timeout(&mut self, timeout_ms: u32) {
        self.join_timeout_offset = timeout_ms / self.period_ms;
        if let Some(divisor) = self.tasks[TaskId::LoraJoin.index()].divisor {
            if self.join_timeout_offset >= divisor {
                warn!(offset = self.join_timeout_offset, divisor, "join timeout longer than join interval, watchdog inactive");
            }
        }
    }

    /// Raise a task's flag outside its period.
    pub fn trigger(&mut self, task: TaskId) {
        self.tasks[task.index()].triggered = true;
    }

    pub fn is_triggered(&self, task: TaskId) -> bool {
        self.tasks[task.index()].triggered
    }

    /// Returns and clears the task's flag.
    pub fn take(&mut self, task: TaskId) -> bool {
        let slot = &mut self.tasks[task.index()];
        let was_set = core::mem::take(&mut slot.triggered);
        if was_set {
            self.stats.total_consumed += 1;
        }
        was_set
    }

    pub fn divisor(&self, task: TaskId) -> Option<u32> {
        self.tasks[task.index()].divisor
    }

    pub fn tick(&mut self) -> TickReport {
        self.counter = self.counter.wrapping_add(1);
        self.stats.ticks = self.stats.ticks.wrapping_add(1);
        let mut report = TickReport::default();

        for task in TaskId::ALL {
            let slot = &mut self.tasks[task.index()];
            let Some(divisor) = slot.divisor else {
                continue;
            };
            if self.counter % divisor == 0 {
                slot.triggered = true;
                slot.fire_count = slot.fire_count.wrapping_add(1);
                self.stats.total_fired += 1;
                report.fired.push(task);
            }
        }

        if let Some(divisor) = self.tasks[TaskId::LoraJoin.index()].divisor {
            if self.join_in_progress && self.counter % divisor == self.join_timeout_offset {
                warn!(counter = self.counter, "join still in progress at timeout, clearing");
                self.join_in_progress = false;
                self.stats.join_timeouts += 1;
                report.join_timed_out = true;
            }
        }

        report
    }

    pub fn begin_join(&mut self) {
        self.join_in_progress = true;
    }

    pub fn complete_join(&mut self) {
        self.join_in_progress = false;
    }

    pub fn is_join_in_progress(&self) -> bool {
        self.join_in_progress
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

impl Default for DecimationScheduler {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TICK_PERIOD_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divisor_rounding() {
        assert_eq!(divisor_for(1_000, 100), 10);
        assert_eq!(divisor_for(1_049, 100), 10);
        assert_eq!(divisor_for(1_050, 100), 11);
        assert_eq!(divisor_for(10, 100), 1);
        assert_eq!(divisor_for(0, 100), 1);
    }

    #[test]
    fn test_unset_task_never_fires() {
        let mut scheduler = DecimationScheduler::new(100);
        for _ in 0..50 {
            assert!(scheduler.tick().fired.is_empty());
        }
        assert!(!scheduler.is_triggered(TaskId::LoraSend));
    }

    #[test]
    fn test_take_consumes_flag() {
        let mut scheduler = DecimationScheduler::new(100);
        scheduler.set_interval(TaskId::StatusRefresh, 200, true);
        assert!(scheduler.take(TaskId::StatusRefresh));
        assert!(!scheduler.take(TaskId::StatusRefresh));
        assert_eq!(scheduler.get_stats().total_consumed, 1);
    }

    #[test]
    fn test_interval_change_keeps_counter() {
        let mut scheduler = DecimationScheduler::new(100);
        scheduler.set_interval(TaskId::PositionRead, 300, false);
        for _ in 0..4 {
            scheduler.tick();
        }
        scheduler.set_interval(TaskId::PositionRead, 500, false);
        assert_eq!(scheduler.counter(), 4);
        let report = scheduler.tick();
        assert!(report.fired.contains(&TaskId::PositionRead));
    }
}
