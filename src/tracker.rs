use crate::config::{ConfigError, TrackerConfig};
use crate::engine::{CycleReport, Engine, EngineError, EngineResult, Priority, StateId, Transition};
use crate::orchestrator::{AppEvent, AppState, ModuleHandler, StateHandler, TrackerApp, MACHINE};
use crate::persistence::{BackupRegisters, BootAction, BootInfo, MemoryRegisters, PersistError, RegisterBank};
use crate::power::WakeSource;
use crate::subsystems::{Board, ButtonGesture, SimBoard};
use crate::telemetry::Snapshot;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MACHINE_NAME: &str = "tracker";

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backup register error: {0}")]
    Registers(#[from] PersistError),
    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrackerState {
    pub running: bool,
    pub cycles: u32,
    pub transitions: u32,
    pub warnings: u32,
    pub last_error: Option<EngineError>,
    pub last_transition: Option<Transition>,
}

/// One boot of the tracker: the engine plus the host it drives.
///
/// A reset ends the value's life. [`into_parts`](Self::into_parts) hands
/// back the board and the register bank so the next boot can be built from
/// them.
pub struct Tracker<B: Board, R: RegisterBank> {
    engine: Engine<StateHandler, ModuleHandler>,
    app: TrackerApp<B, R>,
    boot: BootInfo,
    state: TrackerState,
}

impl<B: Board, R: RegisterBank> Tracker<B, R> {
    /// Evaluates the backup registers and restores the machine from the
    /// persisted marker. The machine is left stopped.
    pub fn boot(mut board: B, bank: R, config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;

        let mut registers = BackupRegisters::new(bank, MACHINE.start).with_failure_limit(config.ble_failure_limit);
        let boot = registers.boot_settled()?;
        match boot.action {
            BootAction::EnterDfu => warn!("bootloader requested, no bootloader on this target"),
            BootAction::Reset => warn!("boot still asks for a reset, continuing"),
            BootAction::Continue => {}
        }
        if boot.degraded {
            board.configure_degraded();
        }

        let mut app = TrackerApp::new(board, registers, config);
        app.status_mut().power.degraded = boot.degraded;
        let engine = Engine::init(MACHINE_NAME, &MACHINE, &mut app)?;

        info!(
            cold = boot.cold_boot,
            marker = MACHINE.state_name(boot.marker),
            failures = boot.ble_failures,
            degraded = boot.degraded,
            "tracker booted"
        );

        Ok(Self {
            engine,
            app,
            boot,
            state: TrackerState::default(),
        })
    }

    pub fn start(&mut self) {
        self.engine.start();
        self.state.running = true;
    }

    pub fn stop(&mut self) {
        self.engine.stop();
        self.state.running = false;
    }

    pub fn pause(&mut self) {
        self.engine.pause();
        self.state.running = false;
    }

    /// One cooperative step: sample interrupts, then cycle the engine.
    pub fn update(&mut self) -> EngineResult<CycleReport> {
        self.app.sample_signals();
        let result = self.engine.cycle(&mut self.app);
        self.state.cycles = self.state.cycles.wrapping_add(1);

        match &result {
            Ok(report) => {
                if let Some(transition) = report.transition {
                    self.state.transitions = self.state.transitions.wrapping_add(1);
                    self.state.last_transition = Some(transition);
                }
            }
            Err(e) if e.is_warning() => {
                self.state.warnings = self.state.warnings.wrapping_add(1);
                debug!(error = %e, "cycle skipped");
            }
            Err(e) => {
                self.state.last_error = Some(*e);
                warn!(error = %e, "cycle failed");
            }
        }
        result
    }

    /// Latches a gesture the way the button interrupt does.
    pub fn press_button(&mut self, gesture: ButtonGesture) {
        self.app.status_mut().wake.latch(gesture);
    }

    pub fn trigger(&mut self, event: AppEvent, priority: Priority) -> EngineResult {
        self.engine.trigger(event.id(), priority)
    }

    pub fn schedule_low_power(&mut self, source: WakeSource) -> EngineResult {
        self.app.schedule_low_power(source)
    }

    pub fn cancel_low_power(&mut self) -> EngineResult {
        self.app.cancel_low_power()
    }

    pub fn request_run(&mut self) -> EngineResult {
        self.trigger(AppEvent::EnterRun, Priority::Normal)
    }

    pub fn request_low_power(&mut self) -> EngineResult {
        self.trigger(AppEvent::EnterLowPower, Priority::Normal)
    }

    pub fn request_shutdown(&mut self) -> EngineResult {
        self.trigger(AppEvent::Shutdown, Priority::Normal)
    }

    pub fn raise_error(&mut self) -> EngineResult {
        self.trigger(AppEvent::Error, Priority::Critical)
    }

    pub fn current_state(&self) -> Option<AppState> {
        AppState::from_id(self.engine.current_state())
    }

    pub fn current_state_id(&self) -> StateId {
        self.engine.current_state()
    }

    pub fn reboot_pending(&self) -> bool {
        self.engine.reboot_pending()
    }

    pub fn boot_info(&self) -> &BootInfo {
        &self.boot
    }

    pub fn get_state(&self) -> &TrackerState {
        &self.state
    }

    pub fn engine(&self) -> &Engine<StateHandler, ModuleHandler> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<StateHandler, ModuleHandler> {
        &mut self.engine
    }

    pub fn app(&self) -> &TrackerApp<B, R> {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut TrackerApp<B, R> {
        &mut self.app
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.engine, &self.app, &self.state)
    }

    pub fn into_parts(self) -> (B, R) {
        self.app.into_parts()
    }
}

pub type SimTracker = Tracker<SimBoard, MemoryRegisters>;

impl Tracker<SimBoard, MemoryRegisters> {
    /// Host-side power-on with fresh registers.
    pub fn simulated(config: TrackerConfig) -> Result<Self, TrackerError> {
        Self::boot(SimBoard::new(), MemoryRegisters::new(), config)
    }

    /// Replays a reset: peripheral state is lost, the register bank and
    /// the board's scripted inputs survive. The new boot is started.
    pub fn reset(self) -> Result<Self, TrackerError> {
        let config = self.app.config().clone();
        let (mut board, bank) = self.into_parts();
        board.take_reset_request();
        board.power_cycle();
        let mut tracker = Self::boot(board, bank, config)?;
        tracker.start();
        Ok(tracker)
    }
}
