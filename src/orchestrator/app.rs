use super::input::{ButtonAction, ButtonMap};
use super::status::PlatformStatus;
use super::{AppEvent, AppState, ModuleHandler, StateHandler};
use crate::config::TrackerConfig;
use crate::engine::{Dispatch, EngineError, EngineResult, HandlerCx, Hook, ModuleId, Platform, Priority, StateId, Step};
use crate::persistence::{BackupRegisters, BootReason, RegisterBank};
use crate::power::{PowerCoordinator, WakeSource};
use crate::scheduler::{DecimationScheduler, TaskId};
use crate::subsystems::{Board, SubsystemCx, SubsystemId, SUBSYSTEM_COUNT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AppStats {
    pub manager_passes: u32,
    pub low_power_polls: u32,
    pub gestures_handled: u32,
    pub subsystem_faults: u32,
}

/// Everything the orchestration handlers act on: the board, the durable
/// registers, the decimation scheduler and the power coordinator.
///
/// Implements [`Platform`] and [`Dispatch`] so one value can be handed to
/// [`Engine::cycle`](crate::engine::Engine::cycle).
pub struct TrackerApp<B: Board, R: RegisterBank> {
    board: B,
    registers: BackupRegisters<R>,
    scheduler: DecimationScheduler,
    coordinator: PowerCoordinator,
    status: PlatformStatus,
    buttons: ButtonMap,
    config: TrackerConfig,
    initialized: [bool; SUBSYSTEM_COUNT],
    system_ready: bool,
    ble_configured: bool,
    stats: AppStats,
}

impl<B: Board, R: RegisterBank> TrackerApp<B, R> {
    pub fn new(board: B, registers: BackupRegisters<R>, config: TrackerConfig) -> Self {
        Self {
            board,
            registers,
            scheduler: DecimationScheduler::new(config.tick_period_ms),
            coordinator: PowerCoordinator::new(config.usb_voltage_threshold_mv),
            status: PlatformStatus::default(),
            buttons: ButtonMap::with_defaults(),
            config,
            initialized: [false; SUBSYSTEM_COUNT],
            system_ready: false,
            ble_configured: false,
            stats: AppStats::default(),
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn registers(&self) -> &BackupRegisters<R> {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut BackupRegisters<R> {
        &mut self.registers
    }

    pub fn scheduler(&self) -> &DecimationScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut DecimationScheduler {
        &mut self.scheduler
    }

    pub fn coordinator(&self) -> &PowerCoordinator {
        &self.coordinator
    }

    pub fn status(&self) -> &PlatformStatus {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut PlatformStatus {
        &mut self.status
    }

    pub fn buttons_mut(&mut self) -> &mut ButtonMap {
        &mut self.buttons
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn stats(&self) -> AppStats {
        self.stats
    }

    pub fn is_initialized(&self, id: SubsystemId) -> bool {
        self.initialized[id.index()]
    }

    /// Folds interrupt-side flags into the platform status.
    pub fn sample_signals(&mut self) {
        let signals = self.board.take_signals();
        self.status.apply(&signals);
    }

    pub fn schedule_low_power(&mut self, source: WakeSource) -> EngineResult {
        self.coordinator.schedule(source, &mut self.registers)
    }

    pub fn cancel_low_power(&mut self) -> EngineResult {
        self.coordinator.clear(&mut self.registers)
    }

    /// Hands back the board and register bank, the parts that outlive a
    /// reset.
    pub fn into_parts(self) -> (B, R) {
        (self.board, self.registers.into_bank())
    }

    fn ensure_system_init(&mut self) {
        if self.system_ready {
            return;
        }
        self.scheduler.reconfigure(&self.config);
        self.system_ready = true;
        info!(tick_ms = self.config.tick_period_ms, "system initialised");
    }

    fn drive(&mut self, id: SubsystemId, init: bool) -> EngineResult {
        let Some(subsystem) = self.board.subsystem(id) else {
            return Err(EngineError::InvalidParameter);
        };
        let mut sub_cx = SubsystemCx {
            tasks: &mut self.scheduler,
            status: &mut self.status,
        };
        let result = if init {
            subsystem.init(&mut sub_cx)
        } else {
            subsystem.run(&mut sub_cx)
        };

        match result {
            Ok(()) => {
                if init {
                    self.initialized[id.index()] = true;
                }
                Ok(())
            }
            Err(fault) => {
                self.stats.subsystem_faults = self.stats.subsystem_faults.wrapping_add(1);
                debug!(subsystem = ?id, %fault, init, "subsystem handler failed");
                Err(EngineError::Generic)
            }
        }
    }

    /// Scheduler tick, status refresh and any deferred low-power change.
    fn system_manager(&mut self, cx: &mut HandlerCx<'_>) -> EngineResult {
        self.stats.manager_passes = self.stats.manager_passes.wrapping_add(1);
        let report = self.scheduler.tick();
        if !report.fired.is_empty() {
            trace!(fired = ?report.fired, counter = self.scheduler.counter(), "tasks fired");
        }

        if self.scheduler.take(TaskId::StatusRefresh) {
            info!(
                ble_connected = self.status.link.ble_connected,
                lora_joined = self.status.link.lora_joined,
                usb_mv = self.status.power.usb_voltage_mv,
                "status refresh"
            );
        }

        let conditions = self.status.safety_conditions(self.scheduler.is_join_in_progress());
        self.coordinator.poll(&conditions, &mut self.board, cx)?;
        Ok(())
    }

    fn handle_gestures(&mut self, cx: &mut HandlerCx<'_>) {
        while let Some(gesture) = self.status.wake.take_gesture() {
            self.stats.gestures_handled = self.stats.gestures_handled.wrapping_add(1);
            let action = self.buttons.action_for(gesture);
            debug!(?gesture, ?action, "button gesture");

            let result = match action {
                ButtonAction::SendData => {
                    self.scheduler.trigger(TaskId::LoraSend);
                    self.scheduler.trigger(TaskId::TagPersistence);
                    Ok(())
                }
                ButtonAction::TogglePower => cx.trigger(AppEvent::ButtonPress.id(), Priority::Normal),
                ButtonAction::Shutdown => self.coordinator.request_shutdown(cx),
                ButtonAction::Reboot => self.coordinator.raise_error(cx),
                ButtonAction::Ignore => Ok(()),
            };
            if let Err(e) = result {
                debug!(?gesture, error = %e, "gesture action not queued");
            }
        }
    }

    /// Pumps the board until something wakes the tracker or the poll bound
    /// is reached.
    fn low_power_wait(&mut self, cx: &mut HandlerCx<'_>) -> EngineResult {
        if cx.has_pending() {
            return Ok(());
        }

        let wake = WakeSource::from_raw(self.registers.wake_reason());
        let mut polls = 0;
        while polls < self.config.low_power_poll_limit {
            self.board.run_pending_tasks();
            self.sample_signals();
            polls += 1;

            if !self.ble_configured && self.status.link.ble_ready {
                if matches!(wake, WakeSource::Accelerometer | WakeSource::Button) {
                    self.board.set_ble_connectable(false);
                    debug!(?wake, "short-range radio made non-connectable");
                }
                self.ble_configured = true;
            }

            if self.status.wake_pending() {
                break;
            }
        }
        self.stats.low_power_polls = self.stats.low_power_polls.wrapping_add(polls);

        if self.status.wake.any_gesture() {
            self.handle_gestures(cx);
        } else if core::mem::take(&mut self.status.wake.motion_interrupt) || self.status.link.ble_connected {
            info!(ble_connected = self.status.link.ble_connected, "woken from low power");
            self.coordinator.request_run(cx)?;
        }
        Ok(())
    }

    fn wait_ready(&mut self, cx: &mut HandlerCx<'_>) -> EngineResult {
        self.board.run_pending_tasks();
        self.sample_signals();
        self.coordinator.poll_readiness(self.status.link.ble_ready, &mut self.registers, cx)
    }
}

impl<B: Board, R: RegisterBank> Platform for TrackerApp<B, R> {
    fn load_persisted_state(&mut self) -> StateId {
        self.registers.state_marker()
    }

    fn save_persisted_state(&mut self, state: StateId) -> EngineResult {
        self.registers.set_state_marker(state).map_err(|e| {
            error!(marker = state.0, error = %e, "state marker not persisted");
            EngineError::from(e)
        })
    }

    fn reboot(&mut self) {
        if let Err(e) = self.registers.set_boot_reason(BootReason::None) {
            warn!(error = %e, "boot reason not persisted before reset");
        }
        warn!(marker = self.registers.state_marker().0, "rebooting");
        self.board.reset();
    }
}

impl<B: Board, R: RegisterBank> Dispatch for TrackerApp<B, R> {
    type StateHandler = StateHandler;
    type ModuleHandler = ModuleHandler;

    fn on_state(&mut self, handler: StateHandler, hook: Hook, step: Step, cx: &mut HandlerCx<'_>) -> EngineResult {
        trace!(?handler, ?hook, ?step, "state handler");
        match handler {
            StateHandler::BringUp => {
                self.board.bring_up();
                Ok(())
            }
            StateHandler::PrepareRun => {
                self.board.prepare_run();
                self.ensure_system_init();
                self.status.wake.motion_interrupt = false;
                // Run may be reached straight from a post-reset LowPower,
                // which never ran Start's init pass.
                let mut result = Ok(());
                for id in SubsystemId::ALL {
                    if !self.initialized[id.index()] {
                        if let Err(e) = self.drive(id, true) {
                            result = Err(e);
                        }
                    }
                }
                result
            }
            StateHandler::PrepareLowPower => {
                let wake = WakeSource::from_raw(self.registers.wake_reason());
                self.board.prepare_low_power(wake);
                self.ble_configured = false;
                Ok(())
            }
            StateHandler::Shutdown => {
                info!("shutdown requested");
                self.board.shutdown();
                Ok(())
            }
            StateHandler::WaitExit => {
                if let Some(failures) = self.coordinator.leave_wait(&mut self.registers)? {
                    warn!(failures, "leaving wait without a ready radio");
                }
                Ok(())
            }
            StateHandler::Reset => {
                info!(from = ?step.from, "error state, resetting");
                cx.request_reboot();
                Ok(())
            }
        }
    }

    fn on_module(
        &mut self,
        handler: ModuleHandler,
        module: ModuleId,
        state: StateId,
        cx: &mut HandlerCx<'_>,
    ) -> EngineResult {
        match handler {
            ModuleHandler::Start(id) => self.drive(id, true),
            ModuleHandler::Run(id) => self.drive(id, false),
            ModuleHandler::Input => {
                let result = self.drive(SubsystemId::Button, false);
                self.handle_gestures(cx);
                result
            }
            ModuleHandler::Idle => {
                trace!(module = module.0, "idle");
                Ok(())
            }
            ModuleHandler::Application => match AppState::from_id(state) {
                Some(AppState::Start) => {
                    self.ensure_system_init();
                    self.system_manager(cx)
                }
                Some(AppState::Run | AppState::End | AppState::Error) => self.system_manager(cx),
                _ => Ok(()),
            },
            ModuleHandler::LowPowerWait => self.low_power_wait(cx),
            ModuleHandler::WaitReady => self.wait_ready(cx),
        }
    }
}
