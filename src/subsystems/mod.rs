//! Boundary to the tracker's peripherals.
//!
//! Drivers, radio stacks and tag encoding live behind [`Subsystem`]; the
//! board itself (power rails, reset, the cooperative task runner) behind
//! [`Board`]. The orchestration layer only ever talks to these traits.

pub mod sim;

pub use sim::{SimBoard, SimSubsystem};

use crate::orchestrator::PlatformStatus;
use crate::power::WakeSource;
use crate::scheduler::DecimationScheduler;
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SUBSYSTEM_COUNT: usize = 9;
pub const MAX_PENDING_GESTURES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubsystemId {
    Power,
    Button,
    Memory,
    Sensors,
    Gnss,
    Buzzer,
    Ble,
    Lora,
    SecureElement,
}

impl SubsystemId {
    pub const ALL: [SubsystemId; SUBSYSTEM_COUNT] = [
        SubsystemId::Power,
        SubsystemId::Button,
        SubsystemId::Memory,
        SubsystemId::Sensors,
        SubsystemId::Gnss,
        SubsystemId::Buzzer,
        SubsystemId::Ble,
        SubsystemId::Lora,
        SubsystemId::SecureElement,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum SubsystemFault {
    #[error("degraded")]
    Degraded,
    #[error("failed")]
    Failed,
    #[error("offline")]
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonGesture {
    Button1Short,
    Button1Long,
    Button2Short,
    Button2Long,
}

/// Events latched by interrupt handlers since the last sample. `None`
/// fields mean "unchanged".
#[derive(Debug, Clone, Default)]
pub struct BoardSignals {
    pub gestures: ArrayVec<ButtonGesture, MAX_PENDING_GESTURES>,
    pub motion_interrupt: bool,
    pub ble_connected: Option<bool>,
    pub ble_ready: Option<bool>,
    pub adc_ready: Option<bool>,
    pub usb_voltage_mv: Option<u16>,
}

/// What a subsystem handler may touch.
pub struct SubsystemCx<'a> {
    pub tasks: &'a mut DecimationScheduler,
    pub status: &'a mut PlatformStatus,
}

pub trait Subsystem {
    fn id(&self) -> SubsystemId;
    fn init(&mut self, cx: &mut SubsystemCx<'_>) -> Result<(), SubsystemFault>;
    fn run(&mut self, cx: &mut SubsystemCx<'_>) -> Result<(), SubsystemFault>;
    fn is_healthy(&self) -> bool;
}

pub trait Board {
    /// One pass of the platform's cooperative task runner.
    fn run_pending_tasks(&mut self);

    /// Drains interrupt-side flags.
    fn take_signals(&mut self) -> BoardSignals;

    fn subsystem(&mut self, id: SubsystemId) -> Option<&mut dyn Subsystem>;

    fn bring_up(&mut self);
    fn prepare_run(&mut self);
    fn prepare_low_power(&mut self, wake: WakeSource);
    fn set_ble_connectable(&mut self, connectable: bool);
    fn shutdown(&mut self);

    /// Fallback configuration after repeated radio start failures.
    fn configure_degraded(&mut self);

    /// Hardware reset. Never returns on target.
    fn reset(&mut self);
}

/// System reset on bare-metal Cortex-M targets.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn hardware_reset() -> ! {
    cortex_m::peripheral::SCB::sys_reset()
}
