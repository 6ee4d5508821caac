use crate::engine::{EngineError, EngineResult, HandlerCx, Priority};
use crate::orchestrator::AppEvent;
use crate::persistence::{BackupRegisters, RegisterBank};
use crate::subsystems::Board;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Wake configuration requested for the next low-power sojourn. The raw
/// value is what lands in the wake-reason register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WakeSource {
    None = 0,
    Ble = 1,
    Accelerometer = 2,
    BleAndAccelerometer = 3,
    Button = 4,
}

impl WakeSource {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => WakeSource::Ble,
            2 => WakeSource::Accelerometer,
            3 => WakeSource::BleAndAccelerometer,
            4 => WakeSource::Button,
            _ => WakeSource::None,
        }
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// The short-range radio stays advertising while asleep.
    pub const fn keeps_ble_connectable(self) -> bool {
        matches!(self, WakeSource::Ble | WakeSource::BleAndAccelerometer)
    }
}

/// Snapshot of everything that may veto a low-power switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SafetyConditions {
    pub ble_connected: bool,
    pub join_in_progress: bool,
    pub adc_ready: bool,
    pub usb_voltage_mv: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Blocker {
    BleConnected,
    JoinInProgress,
    AdcNotReady,
    UsbPowered,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PowerStats {
    pub scheduled: u32,
    pub executed: u32,
    pub deferred_polls: u32,
    pub ignored_requests: u32,
    pub wait_failures: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub pending: Option<WakeSource>,
    pub last_blocker: Option<Blocker>,
    pub wait_satisfied: bool,
    pub stats: PowerStats,
}

/// Run/LowPower decisions.
///
/// Low-power requests are two-phase: [`schedule`](Self::schedule) records the
/// wake configuration durably, and [`poll`](Self::poll) carries it out on a
/// later cycle once nothing vetoes it. The Wait state's readiness retry
/// lives here as well.
#[derive(Debug, Clone)]
pub struct PowerCoordinator {
    pending: Option<WakeSource>,
    usb_threshold_mv: u16,
    last_blocker: Option<Blocker>,
    wait_satisfied: bool,
    stats: PowerStats,
}

impl PowerCoordinator {
    pub fn new(usb_threshold_mv: u16) -> Self {
        Self {
            pending: None,
            usb_threshold_mv,
            last_blocker: None,
            wait_satisfied: false,
            stats: PowerStats::default(),
        }
    }

    /// Records a low-power request and persists its wake source. A request
    /// already pending wins and this one is dropped with `Busy`.
    pub fn schedule<R: RegisterBank>(
        &mut self,
        source: WakeSource,
        registers: &mut BackupRegisters<R>,
    ) -> EngineResult {
        if let Some(pending) = self.pending {
            warn!(?pending, requested = ?source, "low-power change already pending");
            self.stats.ignored_requests += 1;
            return Err(EngineError::Busy);
        }
        registers.set_wake_reason(source.raw())?;
        self.pending = Some(source);
        self.stats.scheduled += 1;
        info!(?source, "low-power change scheduled");
        Ok(())
    }

    pub fn clear<R: RegisterBank>(&mut self, registers: &mut BackupRegisters<R>) -> EngineResult {
        if self.pending.take().is_none() {
            debug!("no low-power change pending");
            return Ok(());
        }
        registers.set_wake_reason(WakeSource::None.raw())?;
        info!("low-power change cleared");
        Ok(())
    }

    pub fn pending(&self) -> Option<WakeSource> {
        self.pending
    }

    pub fn blocker(&self, conditions: &SafetyConditions) -> Option<Blocker> {
        if conditions.ble_connected {
            Some(Blocker::BleConnected)
        } else if conditions.join_in_progress {
            Some(Blocker::JoinInProgress)
        } else if !conditions.adc_ready {
            Some(Blocker::AdcNotReady)
        } else if conditions.usb_voltage_mv >= self.usb_threshold_mv {
            Some(Blocker::UsbPowered)
        } else {
            None
        }
    }

    /// Executes a pending request when it is safe. Returns `true` when the
    /// EnterLowPower event was raised.
    pub fn poll<B: Board + ?Sized>(
        &mut self,
        conditions: &SafetyConditions,
        board: &mut B,
        cx: &mut HandlerCx<'_>,
    ) -> EngineResult<bool> {
        let Some(source) = self.pending else {
            return Ok(false);
        };

        if let Some(blocker) = self.blocker(conditions) {
            if self.last_blocker != Some(blocker) {
                debug!(?blocker, "low-power change deferred");
            }
            self.last_blocker = Some(blocker);
            self.stats.deferred_polls += 1;
            return Ok(false);
        }

        board.prepare_low_power(source);
        cx.trigger(AppEvent::EnterLowPower.id(), Priority::Normal)?;
        self.pending = None;
        self.last_blocker = None;
        self.stats.executed += 1;
        info!(?source, "entering low power");
        Ok(true)
    }

    pub fn request_run(&self, cx: &mut HandlerCx<'_>) -> EngineResult {
        cx.trigger(AppEvent::EnterRun.id(), Priority::Normal)
    }

    pub fn request_low_power(&self, cx: &mut HandlerCx<'_>) -> EngineResult {
        cx.trigger(AppEvent::EnterLowPower.id(), Priority::Normal)
    }

    pub fn request_shutdown(&self, cx: &mut HandlerCx<'_>) -> EngineResult {
        cx.trigger(AppEvent::Shutdown.id(), Priority::Normal)
    }

    pub fn raise_error(&self, cx: &mut HandlerCx<'_>) -> EngineResult {
        cx.trigger(AppEvent::Error.id(), Priority::Critical)
    }

    /// Wait-state poll. Readiness clears the durable failure counter and
    /// raises GoAhead; otherwise the module reports `Waiting`, which keeps
    /// the state's deadline armed.
    pub fn poll_readiness<R: RegisterBank>(
        &mut self,
        ready: bool,
        registers: &mut BackupRegisters<R>,
        cx: &mut HandlerCx<'_>,
    ) -> EngineResult {
        if !ready {
            return Err(EngineError::Waiting);
        }
        if !self.wait_satisfied {
            registers.reset_ble_failures()?;
            self.wait_satisfied = true;
        }
        cx.trigger(AppEvent::GoAhead.id(), Priority::Normal)
    }

    /// Wait-state exit. Leaving without readiness counts one durable
    /// failure, returned so the caller can log it.
    pub fn leave_wait<R: RegisterBank>(&mut self, registers: &mut BackupRegisters<R>) -> EngineResult<Option<u32>> {
        if std::mem::take(&mut self.wait_satisfied) {
            return Ok(None);
        }
        let failures = registers.increment_ble_failures()?;
        self.stats.wait_failures += 1;
        warn!(failures, limit = registers.failure_limit(), "short-range radio not ready, failure recorded");
        Ok(Some(failures))
    }

    pub fn get_state(&self) -> CoordinatorState {
        CoordinatorState {
            pending: self.pending,
            last_blocker: self.last_blocker,
            wait_satisfied: self.wait_satisfied,
            stats: self.stats,
        }
    }
}

impl Default for PowerCoordinator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_USB_VOLTAGE_THRESHOLD_MV)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn safe() -> SafetyConditions {
        SafetyConditions {
            ble_connected: false,
            join_in_progress: false,
            adc_ready: true,
            usb_voltage_mv: 0,
        }
    }

    #[test]
    fn test_blocker_order() {
        let coordinator = PowerCoordinator::new(4_000);
        assert_eq!(coordinator.blocker(&safe()), None);
        let mut c = safe();
        c.usb_voltage_mv = 4_000;
        assert_eq!(coordinator.blocker(&c), Some(Blocker::UsbPowered));
        c.adc_ready = false;
        assert_eq!(coordinator.blocker(&c), Some(Blocker::AdcNotReady));
        c.join_in_progress = true;
        assert_eq!(coordinator.blocker(&c), Some(Blocker::JoinInProgress));
        c.ble_connected = true;
        assert_eq!(coordinator.blocker(&c), Some(Blocker::BleConnected));
    }

    #[test]
    fn test_wake_source_raw_values() {
        assert_eq!(WakeSource::from_raw(3), WakeSource::BleAndAccelerometer);
        assert_eq!(WakeSource::from_raw(99), WakeSource::None);
        assert_eq!(WakeSource::Button.raw(), 4);
        assert!(!WakeSource::Accelerometer.keeps_ble_connectable());
    }
}
