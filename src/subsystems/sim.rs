use super::{Board, BoardSignals, ButtonGesture, Subsystem, SubsystemCx, SubsystemFault, SubsystemId, SUBSYSTEM_COUNT};
use crate::power::WakeSource;
use crate::scheduler::TaskId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const DEFAULT_JOIN_LATENCY: u32 = 3;
const DEFAULT_USB_VOLTAGE_MV: u16 = 0;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimCounters {
    pub runs: u32,
    pub inits: u32,
    pub work_items: u32,
}

/// Stand-in peripheral. Consumes its decimation trigger and can be told to
/// fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSubsystem {
    id: SubsystemId,
    fault: Option<SubsystemFault>,
    initialized: bool,
    counters: SimCounters,
    join_wait: u32,
    join_latency: u32,
    joined: bool,
}

impl SimSubsystem {
    pub fn new(id: SubsystemId) -> Self {
        Self {
            id,
            fault: None,
            initialized: false,
            counters: SimCounters::default(),
            join_wait: 0,
            join_latency: DEFAULT_JOIN_LATENCY,
            joined: false,
        }
    }

    pub fn inject_fault(&mut self, fault: SubsystemFault) {
        self.fault = Some(fault);
    }

    pub fn clear_faults(&mut self) {
        self.fault = None;
    }

    pub fn counters(&self) -> SimCounters {
        self.counters
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn service_lora(&mut self, cx: &mut SubsystemCx<'_>) {
        if cx.tasks.is_join_in_progress() {
            self.join_wait += 1;
            if self.join_wait >= self.join_latency {
                cx.tasks.complete_join();
                self.joined = true;
                cx.status.link.lora_joined = true;
                info!("long-range radio joined");
            }
        } else if cx.tasks.take(TaskId::LoraJoin) && !self.joined {
            cx.tasks.begin_join();
            self.join_wait = 0;
            debug!("long-range radio join started");
        }

        if cx.tasks.take(TaskId::LoraSend) && self.joined {
            self.counters.work_items += 1;
        }
    }
}

impl Subsystem for SimSubsystem {
    fn id(&self) -> SubsystemId {
        self.id
    }

    fn init(&mut self, cx: &mut SubsystemCx<'_>) -> Result<(), SubsystemFault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        self.initialized = true;
        self.counters.inits += 1;
        if self.id == SubsystemId::Power {
            cx.status.power.adc_ready = true;
        }
        Ok(())
    }

    fn run(&mut self, cx: &mut SubsystemCx<'_>) -> Result<(), SubsystemFault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        self.counters.runs += 1;

        let task = match self.id {
            SubsystemId::Gnss => Some(TaskId::PositionRead),
            SubsystemId::Memory => Some(TaskId::TagPersistence),
            SubsystemId::Ble => Some(TaskId::BleHousekeeping),
            SubsystemId::Lora => {
                self.service_lora(cx);
                None
            }
            _ => None,
        };
        if let Some(task) = task {
            if cx.tasks.take(task) {
                self.counters.work_items += 1;
            }
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.fault.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BoardCounters {
    pub resets: u32,
    pub bring_ups: u32,
    pub run_preparations: u32,
    pub low_power_preparations: u32,
    pub shutdowns: u32,
    pub task_passes: u32,
    pub non_connectable_switches: u32,
}

/// Host-side board with scriptable interrupts.
#[derive(Debug, Clone)]
pub struct SimBoard {
    subsystems: [SimSubsystem; SUBSYSTEM_COUNT],
    signals: BoardSignals,
    counters: BoardCounters,
    ble_ready_after: Option<u32>,
    ble_ready_reported: bool,
    motion_after: Option<u32>,
    last_wake: Option<WakeSource>,
    degraded: bool,
    reset_requested: bool,
}

impl SimBoard {
    pub fn new() -> Self {
        let mut signals = BoardSignals::default();
        signals.usb_voltage_mv = Some(DEFAULT_USB_VOLTAGE_MV);
        Self {
            subsystems: SubsystemId::ALL.map(SimSubsystem::new),
            signals,
            counters: BoardCounters::default(),
            ble_ready_after: Some(0),
            ble_ready_reported: false,
            motion_after: None,
            last_wake: None,
            degraded: false,
            reset_requested: false,
        }
    }

    /// BLE reports ready after this many task-runner passes; `None` never.
    pub fn set_ble_ready_after(&mut self, passes: Option<u32>) {
        self.ble_ready_after = passes;
        self.ble_ready_reported = false;
    }

    /// Raise a motion interrupt after this many task-runner passes.
    pub fn set_motion_after(&mut self, passes: Option<u32>) {
        self.motion_after = passes.map(|p| self.counters.task_passes.saturating_add(p));
    }

    pub fn press(&mut self, gesture: ButtonGesture) {
        // Overflowing gestures are lost, as with a latched interrupt flag.
        let _ = self.signals.gestures.try_push(gesture);
    }

    pub fn raise_motion(&mut self) {
        self.signals.motion_interrupt = true;
    }

    pub fn set_ble_connected(&mut self, connected: bool) {
        self.signals.ble_connected = Some(connected);
    }

    pub fn set_usb_voltage(&mut self, millivolts: u16) {
        self.signals.usb_voltage_mv = Some(millivolts);
    }

    pub fn sim_subsystem(&mut self, id: SubsystemId) -> &mut SimSubsystem {
        &mut self.subsystems[id.index()]
    }

    pub fn inject_fault(&mut self, id: SubsystemId, fault: SubsystemFault) {
        self.subsystems[id.index()].inject_fault(fault);
    }

    pub fn clear_faults(&mut self) {
        for subsystem in &mut self.subsystems {
            subsystem.clear_faults();
        }
    }

    pub fn counters(&self) -> BoardCounters {
        self.counters
    }

    pub fn last_wake(&self) -> Option<WakeSource> {
        self.last_wake
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Set by `reset`, cleared by the simulator once it has rebooted.
    pub fn take_reset_request(&mut self) -> bool {
        core::mem::take(&mut self.reset_requested)
    }

    /// Peripheral state does not survive a reset.
    pub fn power_cycle(&mut self) {
        for subsystem in &mut self.subsystems {
            subsystem.initialized = false;
        }
        self.ble_ready_reported = false;
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Board for SimBoard {
    fn run_pending_tasks(&mut self) {
        self.counters.task_passes = self.counters.task_passes.wrapping_add(1);

        // The degraded fallback configuration always comes up.
        let ready = self.degraded || matches!(self.ble_ready_after, Some(after) if self.counters.task_passes >= after);
        if ready && !self.ble_ready_reported {
            self.signals.ble_ready = Some(true);
            self.ble_ready_reported = true;
        }

        if let Some(at) = self.motion_after {
            if self.counters.task_passes >= at {
                self.signals.motion_interrupt = true;
                self.motion_after = None;
            }
        }
    }

    fn take_signals(&mut self) -> BoardSignals {
        let signals = core::mem::take(&mut self.signals);
        self.signals.usb_voltage_mv = signals.usb_voltage_mv;
        signals
    }

    fn subsystem(&mut self, id: SubsystemId) -> Option<&mut dyn Subsystem> {
        self.subsystems.get_mut(id.index()).map(|s| s as &mut dyn Subsystem)
    }

    fn bring_up(&mut self) {
        self.counters.bring_ups += 1;
    }

    fn prepare_run(&mut self) {
        self.counters.run_preparations += 1;
    }

    fn prepare_low_power(&mut self, wake: WakeSource) {
        self.counters.low_power_preparations += 1;
        self.last_wake = Some(wake);
    }

    fn set_ble_connectable(&mut self, connectable: bool) {
        if !connectable {
            self.counters.non_connectable_switches += 1;
        }
    }

    fn shutdown(&mut self) {
        self.counters.shutdowns += 1;
    }

    fn configure_degraded(&mut self) {
        self.degraded = true;
    }

    fn reset(&mut self) {
        self.counters.resets += 1;
        self.reset_requested = true;
        info!(resets = self.counters.resets, "board reset");
    }
}
