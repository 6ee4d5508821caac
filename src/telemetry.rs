use crate::engine::{CycleStatus, Engine, EventId, Live, Priority, StateId};
use crate::orchestrator::app::AppStats;
use crate::orchestrator::{ModuleHandler, PlatformStatus, StateHandler, TrackerApp};
use crate::persistence::{BootReason, RegisterBank};
use crate::power::{CoordinatorState, WakeSource};
use crate::scheduler::SchedulerStats;
use crate::subsystems::Board;
use crate::tracker::TrackerState;
use heapless::Deque;
use serde::{Deserialize, Serialize};

const SNAPSHOT_HISTORY: usize = 16;

/// Point-in-time view of the whole tracker, rendered as JSON by the
/// simulator and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub machine: String,
    pub state: String,
    pub previous: Option<String>,
    pub status: CycleStatus,
    pub live: Live,
    pub pending_normal: Option<(EventId, Priority)>,
    pub pending_critical: Option<EventId>,
    pub marker: StateId,
    pub boot_reason: Option<BootReason>,
    pub wake_reason: WakeSource,
    pub ble_failures: u32,
    pub platform: PlatformStatus,
    pub scheduler_counter: u32,
    pub scheduler: SchedulerStats,
    pub power: CoordinatorState,
    pub app: AppStats,
    pub tracker: TrackerState,
}

impl Snapshot {
    pub fn capture<B: Board, R: RegisterBank>(
        engine: &Engine<StateHandler, ModuleHandler>,
        app: &TrackerApp<B, R>,
        tracker: &TrackerState,
    ) -> Self {
        let registers = app.registers();
        Self {
            machine: engine.name().to_string(),
            state: engine.state_name(engine.current_state()).to_string(),
            previous: engine.previous_state().map(|s| engine.state_name(s).to_string()),
            status: engine.status(),
            live: engine.get_live(),
            pending_normal: engine.events().pending_normal(),
            pending_critical: engine.events().pending_critical(),
            marker: registers.state_marker(),
            boot_reason: registers.boot_reason(),
            wake_reason: WakeSource::from_raw(registers.wake_reason()),
            ble_failures: registers.ble_failures(),
            platform: *app.status(),
            scheduler_counter: app.scheduler().counter(),
            scheduler: app.scheduler().get_stats().clone(),
            power: app.coordinator().get_state(),
            app: app.stats(),
            tracker: *tracker,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Bounded history of snapshots. The oldest entry is evicted when full.
#[derive(Debug)]
pub struct SnapshotLog {
    entries: Deque<Snapshot, SNAPSHOT_HISTORY>,
    evicted: u32,
}

impl SnapshotLog {
    pub fn new() -> Self {
        Self {
            entries: Deque::new(),
            evicted: 0,
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        if self.entries.is_full() {
            self.entries.pop_front();
            self.evicted = self.evicted.wrapping_add(1);
        }
        // Room was made above.
        let _ = self.entries.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evicted(&self) -> u32 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }
}

impl Default for SnapshotLog {
    fn default() -> Self {
        Self::new()
    }
}
