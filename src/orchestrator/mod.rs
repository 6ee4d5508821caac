//! The tracker's concrete machine.
//!
//! Six states, seven events and ten modules declared as `const` tables.
//! Handler slots hold [`StateHandler`] / [`ModuleHandler`] keys which
//! [`TrackerApp`] dispatches.
//!
//! | State    | Timeout           | Reset on entry | Entry             |
//! |----------|-------------------|----------------|-------------------|
//! | Start    | fixed 1 → EP      | yes            | board bring-up    |
//! | Run      | watchdog 10 → ER  | no             | prepare run       |
//! | LowPower | watchdog 10 → ER  | yes            | prepare low power |
//! | End      | -                 | no             | shutdown          |
//! | Wait     | on-entry 10 → ER  | no             | -                 |
//! | Error    | -                 | no             | reboot            |

pub mod app;
pub mod input;
pub mod status;

pub use app::TrackerApp;
pub use input::{ButtonAction, ButtonMap};
pub use status::{LinkStatus, PlatformStatus, PowerStatus, WakeStatus};

use crate::engine::{
    EventDef, EventId, MachineConfig, ModuleDef, ModuleId, StateDef, StateId, StateMatch, Target,
    TimeoutPolicy, TransitionDef, MAX_STATES,
};
use crate::subsystems::SubsystemId;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const STATE_COUNT: usize = 6;
pub const EVENT_COUNT: usize = 7;
pub const MODULE_COUNT: usize = 10;

/// Cycles of sustained module failure before Run/LowPower escalate.
pub const WATCHDOG_TICKS: u32 = 10;
pub const WAIT_TICKS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppState {
    Start = 0,
    Run = 1,
    LowPower = 2,
    End = 3,
    Wait = 4,
    Error = 5,
}

impl AppState {
    pub const ALL: [AppState; STATE_COUNT] = [
        AppState::Start,
        AppState::Run,
        AppState::LowPower,
        AppState::End,
        AppState::Wait,
        AppState::Error,
    ];

    pub const fn id(self) -> StateId {
        StateId(self as u8)
    }

    pub fn from_id(id: StateId) -> Option<Self> {
        Self::ALL.get(id.index()).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppEvent {
    /// Raised by Start's fixed timeout. Distinct from the engine's reserved
    /// Epsilon.
    Epsilon = 0,
    ButtonPress = 1,
    EnterLowPower = 2,
    EnterRun = 3,
    Shutdown = 4,
    Error = 5,
    GoAhead = 6,
}

impl AppEvent {
    pub const fn id(self) -> EventId {
        EventId(self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppModule {
    Power = 0,
    Button = 1,
    Memory = 2,
    Sensors = 3,
    Gnss = 4,
    App = 5,
    Buzzer = 6,
    Ble = 7,
    Lora = 8,
    SecureElement = 9,
}

impl AppModule {
    pub const fn id(self) -> ModuleId {
        ModuleId(self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateHandler {
    BringUp,
    PrepareRun,
    PrepareLowPower,
    Shutdown,
    /// Wait's exit. Records a radio failure if readiness never came.
    WaitExit,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleHandler {
    Start(SubsystemId),
    Run(SubsystemId),
    /// Button run pass plus gesture handling.
    Input,
    Idle,
    /// System manager: scheduler tick and deferred power changes.
    Application,
    LowPowerWait,
    WaitReady,
}

const_assert!(STATE_COUNT <= MAX_STATES);

pub const STATES: [StateDef<StateHandler>; STATE_COUNT] = [
    StateDef {
        id: AppState::Start.id(),
        name: Some("Start"),
        timeout: TimeoutPolicy::Fixed { after: 1, event: AppEvent::Epsilon.id() },
        entry: Some(StateHandler::BringUp),
        exit: None,
        requires_reboot: true,
    },
    StateDef {
        id: AppState::Run.id(),
        name: Some("Run"),
        timeout: TimeoutPolicy::OkWatchdog { after: WATCHDOG_TICKS, event: AppEvent::Error.id() },
        entry: Some(StateHandler::PrepareRun),
        exit: None,
        requires_reboot: false,
    },
    StateDef {
        id: AppState::LowPower.id(),
        name: Some("LowPower"),
        timeout: TimeoutPolicy::OkWatchdog { after: WATCHDOG_TICKS, event: AppEvent::Error.id() },
        entry: Some(StateHandler::PrepareLowPower),
        exit: None,
        requires_reboot: true,
    },
    StateDef {
        id: AppState::End.id(),
        name: Some("End"),
        timeout: TimeoutPolicy::None,
        entry: Some(StateHandler::Shutdown),
        exit: None,
        requires_reboot: false,
    },
    StateDef {
        id: AppState::Wait.id(),
        name: Some("Wait"),
        timeout: TimeoutPolicy::OkOnEntry { after: WAIT_TICKS, event: AppEvent::Error.id() },
        entry: None,
        exit: Some(StateHandler::WaitExit),
        requires_reboot: false,
    },
    StateDef {
        id: AppState::Error.id(),
        name: Some("Error"),
        timeout: TimeoutPolicy::None,
        entry: Some(StateHandler::Reset),
        exit: None,
        requires_reboot: false,
    },
];

pub const EVENTS: [EventDef; EVENT_COUNT] = [
    EventDef { id: AppEvent::Epsilon.id(), name: Some("EP") },
    EventDef { id: AppEvent::ButtonPress.id(), name: Some("BP") },
    EventDef { id: AppEvent::EnterLowPower.id(), name: Some("LP") },
    EventDef { id: AppEvent::EnterRun.id(), name: Some("RN") },
    EventDef { id: AppEvent::Shutdown.id(), name: Some("SD") },
    EventDef { id: AppEvent::Error.id(), name: Some("ER") },
    EventDef { id: AppEvent::GoAhead.id(), name: Some("GO") },
];

const fn edge(from: AppState, event: AppEvent, to: AppState) -> TransitionDef {
    TransitionDef { from: StateMatch::State(from.id()), event: event.id(), to: Target::State(to.id()) }
}

const fn any(event: AppEvent, to: AppState) -> TransitionDef {
    TransitionDef { from: StateMatch::Any, event: event.id(), to: Target::State(to.id()) }
}

pub const TRANSITIONS: [TransitionDef; 9] = [
    edge(AppState::Start, AppEvent::Epsilon, AppState::Wait),
    edge(AppState::Run, AppEvent::ButtonPress, AppState::LowPower),
    edge(AppState::LowPower, AppEvent::ButtonPress, AppState::Run),
    edge(AppState::Run, AppEvent::Shutdown, AppState::End),
    edge(AppState::LowPower, AppEvent::Shutdown, AppState::End),
    any(AppEvent::EnterLowPower, AppState::LowPower),
    any(AppEvent::EnterRun, AppState::Run),
    any(AppEvent::Error, AppState::Error),
    edge(AppState::Wait, AppEvent::GoAhead, AppState::Run),
];

use ModuleHandler as H;

/// Init in Start, service in Run, idle elsewhere.
const fn subsystem(id: SubsystemId) -> [Option<ModuleHandler>; STATE_COUNT] {
    [Some(H::Start(id)), Some(H::Run(id)), None, None, None, None]
}

const POWER: [Option<ModuleHandler>; STATE_COUNT] =
    [Some(H::Start(SubsystemId::Power)), Some(H::Run(SubsystemId::Power)), None, Some(H::Idle), None, None];
const BUTTON: [Option<ModuleHandler>; STATE_COUNT] =
    [Some(H::Start(SubsystemId::Button)), Some(H::Input), None, None, None, None];
const MEMORY: [Option<ModuleHandler>; STATE_COUNT] = subsystem(SubsystemId::Memory);
const SENSORS: [Option<ModuleHandler>; STATE_COUNT] = subsystem(SubsystemId::Sensors);
const GNSS: [Option<ModuleHandler>; STATE_COUNT] = subsystem(SubsystemId::Gnss);
const APP: [Option<ModuleHandler>; STATE_COUNT] = [
    Some(H::Application),
    Some(H::Application),
    Some(H::LowPowerWait),
    Some(H::Application),
    Some(H::WaitReady),
    Some(H::Application),
];
const BUZZER: [Option<ModuleHandler>; STATE_COUNT] = subsystem(SubsystemId::Buzzer);
const BLE: [Option<ModuleHandler>; STATE_COUNT] = subsystem(SubsystemId::Ble);
const LORA: [Option<ModuleHandler>; STATE_COUNT] = subsystem(SubsystemId::Lora);
const SECURE_ELEMENT: [Option<ModuleHandler>; STATE_COUNT] = subsystem(SubsystemId::SecureElement);

pub const MODULES: [ModuleDef<ModuleHandler>; MODULE_COUNT] = [
    ModuleDef { id: AppModule::Power.id(), name: Some("POWER"), handlers: &POWER },
    ModuleDef { id: AppModule::Button.id(), name: Some("BTN"), handlers: &BUTTON },
    ModuleDef { id: AppModule::Memory.id(), name: Some("MEM"), handlers: &MEMORY },
    ModuleDef { id: AppModule::Sensors.id(), name: Some("SENS"), handlers: &SENSORS },
    ModuleDef { id: AppModule::Gnss.id(), name: Some("GNSS"), handlers: &GNSS },
    ModuleDef { id: AppModule::App.id(), name: Some("APP"), handlers: &APP },
    ModuleDef { id: AppModule::Buzzer.id(), name: Some("BUZZER"), handlers: &BUZZER },
    ModuleDef { id: AppModule::Ble.id(), name: Some("BLE"), handlers: &BLE },
    ModuleDef { id: AppModule::Lora.id(), name: Some("LORA"), handlers: &LORA },
    ModuleDef { id: AppModule::SecureElement.id(), name: Some("SEC"), handlers: &SECURE_ELEMENT },
];

pub static MACHINE: MachineConfig<StateHandler, ModuleHandler> = MachineConfig {
    start: AppState::Start.id(),
    states: &STATES,
    events: &EVENTS,
    transitions: &TRANSITIONS,
    modules: &MODULES,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_validate() {
        assert!(MACHINE.validate().is_ok());
        assert_eq!(MACHINE.state_name(AppState::LowPower.id()), "LowPower");
        assert_eq!(MACHINE.module_by_name("APP"), Some(AppModule::App.id()));
    }

    #[test]
    fn test_error_reachable_from_every_state() {
        for state in AppState::ALL {
            let t = MACHINE.find_transition(state.id(), AppEvent::Error.id());
            assert_eq!(t.map(|t| t.to), Some(Target::State(AppState::Error.id())));
        }
    }

    #[test]
    fn test_only_app_runs_in_wait() {
        let wait = AppState::Wait.id();
        let active: Vec<_> = MACHINE.modules.iter().filter(|m| m.handler_for(wait).is_some()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, AppModule::App.id());
    }
}
