use asset_tracker::engine::{
    Dispatch, Engine, EngineError, EngineResult, EventDef, EventId, HandlerCx, Hook, MachineConfig, ModuleDef,
    ModuleId, Platform, Priority, StateDef, StateId, StateMatch, Step, Target, TimeoutPolicy, TransitionDef,
};

const IDLE: StateId = StateId(0);
const BUSY: StateId = StateId(1);
const DEEP: StateId = StateId(2);
const ALARM_ST: StateId = StateId(3);
const PROBE_ST: StateId = StateId(4);
const PASS: StateId = StateId(5);

const GO: EventId = EventId(0);
const SLEEP: EventId = EventId(1);
const ALARM: EventId = EventId(2);
const BACK: EventId = EventId(3);
const CALL: EventId = EventId(4);
const PROBE: EventId = EventId(5);

const WATCHDOG: u32 = 5;
const PROBE_WINDOW: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hs {
    Enter(u8),
    Leave(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hm {
    Health,
}

const fn state(id: StateId, name: &'static str, timeout: TimeoutPolicy, requires_reboot: bool) -> StateDef<Hs> {
    StateDef {
        id,
        name: Some(name),
        timeout,
        entry: Some(Hs::Enter(id.0)),
        exit: Some(Hs::Leave(id.0)),
        requires_reboot,
    }
}

const STATES: [StateDef<Hs>; 6] = [
    state(IDLE, "Idle", TimeoutPolicy::None, false),
    state(BUSY, "Busy", TimeoutPolicy::OkWatchdog { after: WATCHDOG, event: ALARM }, false),
    state(DEEP, "Deep", TimeoutPolicy::None, true),
    state(ALARM_ST, "Alarm", TimeoutPolicy::None, false),
    state(PROBE_ST, "Probe", TimeoutPolicy::OkOnEntry { after: PROBE_WINDOW, event: ALARM }, false),
    state(PASS, "Pass", TimeoutPolicy::None, false),
];

const EVENTS: [EventDef; 6] = [
    EventDef { id: GO, name: Some("GO") },
    EventDef { id: SLEEP, name: Some("SLEEP") },
    EventDef { id: ALARM, name: Some("ALARM") },
    EventDef { id: BACK, name: Some("BACK") },
    EventDef { id: CALL, name: None },
    EventDef { id: PROBE, name: Some("PROBE") },
];

const TRANSITIONS: [TransitionDef; 8] = [
    TransitionDef { from: StateMatch::State(IDLE), event: GO, to: Target::State(BUSY) },
    TransitionDef { from: StateMatch::State(BUSY), event: SLEEP, to: Target::State(DEEP) },
    TransitionDef { from: StateMatch::State(DEEP), event: GO, to: Target::State(BUSY) },
    TransitionDef { from: StateMatch::Any, event: ALARM, to: Target::State(ALARM_ST) },
    TransitionDef { from: StateMatch::State(ALARM_ST), event: BACK, to: Target::Return },
    TransitionDef { from: StateMatch::State(IDLE), event: CALL, to: Target::State(PASS) },
    TransitionDef { from: StateMatch::State(PASS), event: EventId::EPSILON, to: Target::State(IDLE) },
    TransitionDef { from: StateMatch::State(IDLE), event: PROBE, to: Target::State(PROBE_ST) },
];

const HEALTH: [Option<Hm>; 6] = [Some(Hm::Health), Some(Hm::Health), Some(Hm::Health), None, Some(Hm::Health), None];
const MODULES: [ModuleDef<Hm>; 1] = [ModuleDef { id: ModuleId(0), name: Some("health"), handlers: &HEALTH }];

static CONFIG: MachineConfig<Hs, Hm> = MachineConfig {
    start: IDLE,
    states: &STATES,
    events: &EVENTS,
    transitions: &TRANSITIONS,
    modules: &MODULES,
};

#[derive(Default)]
struct Host {
    marker: Option<StateId>,
    clock: Option<u32>,
    failing: bool,
    save_fails: bool,
    reboots: u32,
    hooks: Vec<Hs>,
    transitions: Vec<(&'static str, &'static str, &'static str)>,
}

impl Host {
    fn new() -> Self {
        Self { marker: Some(IDLE), ..Self::default() }
    }
}

impl Platform for Host {
    fn monotonic_ticks(&mut self) -> Option<u32> {
        self.clock
    }

    fn load_persisted_state(&mut self) -> StateId {
        self.marker.unwrap_or(StateId(0xFF))
    }

    fn save_persisted_state(&mut self, state: StateId) -> EngineResult {
        if self.save_fails {
            return Err(EngineError::Generic);
        }
        self.marker = Some(state);
        Ok(())
    }

    fn reboot(&mut self) {
        self.reboots += 1;
    }

    fn log_transition(&mut self, from: &'static str, event: &'static str, to: &'static str) {
        self.transitions.push((from, event, to));
    }
}

impl Dispatch for Host {
    type StateHandler = Hs;
    type ModuleHandler = Hm;

    fn on_state(&mut self, handler: Hs, _hook: Hook, _step: Step, _cx: &mut HandlerCx<'_>) -> EngineResult {
        self.hooks.push(handler);
        Ok(())
    }

    fn on_module(&mut self, handler: Hm, _module: ModuleId, _state: StateId, _cx: &mut HandlerCx<'_>) -> EngineResult {
        match handler {
            Hm::Health if self.failing => Err(EngineError::Generic),
            Hm::Health => Ok(()),
        }
    }
}

fn running(host: &mut Host) -> Engine<Hs, Hm> {
    let mut engine = Engine::init("test", &CONFIG, host).unwrap();
    engine.start();
    engine
}

/// Drives the engine from Idle into `event`'s target and returns it there.
fn enter_via(host: &mut Host, event: EventId) -> Engine<Hs, Hm> {
    let mut engine = running(host);
    engine.cycle(host).unwrap();
    engine.trigger(event, Priority::Normal).unwrap();
    let report = engine.cycle(host).unwrap();
    assert!(report.transition.is_some());
    engine
}

#[test]
fn test_cycle_requires_running_machine() {
    let mut host = Host::new();
    let mut engine = Engine::init("test", &CONFIG, &mut host).unwrap();
    assert_eq!(engine.cycle(&mut host), Err(EngineError::Stopped));
    engine.start();
    assert!(engine.is_running());
    engine.pause();
    assert_eq!(engine.cycle(&mut host), Err(EngineError::Paused));
}

#[test]
fn test_first_cycle_runs_entry_once() {
    let mut host = Host::new();
    let mut engine = running(&mut host);
    engine.cycle(&mut host).unwrap();
    engine.cycle(&mut host).unwrap();
    assert_eq!(host.hooks, vec![Hs::Enter(0)]);
    assert_eq!(engine.get_live().ticks, 2);
}

#[test]
fn test_transition_runs_exit_then_entry_and_logs() {
    let mut host = Host::new();
    let engine = enter_via(&mut host, GO);
    assert_eq!(engine.current_state(), BUSY);
    assert_eq!(engine.previous_state(), Some(IDLE));
    assert_eq!(host.hooks, vec![Hs::Enter(0), Hs::Leave(0), Hs::Enter(1)]);
    assert_eq!(host.transitions, vec![("Idle", "GO", "Busy")]);
    assert_eq!(engine.get_live().ticks, 0);
}

#[test]
fn test_lower_priority_is_rejected() {
    let mut host = Host::new();
    let mut engine = running(&mut host);

    engine.trigger(GO, Priority::Low).unwrap();
    engine.trigger(PROBE, Priority::High).unwrap();
    assert_eq!(engine.events().pending_normal(), Some((PROBE, Priority::High)));

    assert_eq!(engine.trigger(GO, Priority::Low), Err(EngineError::NoPriority));
    assert_eq!(engine.events().pending_normal(), Some((PROBE, Priority::High)));

    engine.trigger(CALL, Priority::High).unwrap();
    assert_eq!(engine.events().pending_normal(), Some((CALL, Priority::High)));
}

#[test]
fn test_critical_survives_normal_but_not_second_critical() {
    let mut host = Host::new();
    let mut engine = running(&mut host);

    engine.trigger(ALARM, Priority::Critical).unwrap();
    engine.trigger(GO, Priority::High).unwrap();
    assert_eq!(engine.events().pending_critical(), Some(ALARM));

    engine.trigger(SLEEP, Priority::Critical).unwrap();
    assert_eq!(engine.events().pending_critical(), Some(SLEEP));
}

#[test]
fn test_unmatched_critical_waits_while_normal_is_evaluated() {
    let mut host = Host::new();
    let mut engine = running(&mut host);
    engine.cycle(&mut host).unwrap();

    // Idle has no SLEEP edge, Busy does.
    engine.trigger(SLEEP, Priority::Critical).unwrap();
    engine.trigger(GO, Priority::Normal).unwrap();
    let report = engine.cycle(&mut host).unwrap();
    assert_eq!(report.transition.map(|t| t.to), Some(BUSY));
    assert_eq!(engine.events().pending_critical(), Some(SLEEP));

    let report = engine.cycle(&mut host).unwrap();
    assert_eq!(report.transition.map(|t| t.to), Some(DEEP));
    assert_eq!(engine.events().pending_critical(), None);
}

#[test]
fn test_unmatched_normal_event_is_dropped() {
    let mut host = Host::new();
    let mut engine = running(&mut host);
    engine.cycle(&mut host).unwrap();
    engine.trigger(BACK, Priority::Normal).unwrap();
    let report = engine.cycle(&mut host).unwrap();
    assert!(report.transition.is_none());
    assert_eq!(engine.events().pending_normal(), None);
}

#[test]
fn test_reserved_and_unknown_triggers_rejected() {
    let mut host = Host::new();
    let mut engine = running(&mut host);
    assert_eq!(engine.trigger(EventId::EPSILON, Priority::Normal), Err(EngineError::InvalidParameter));
    assert_eq!(engine.trigger(EventId(6), Priority::Normal), Err(EngineError::InvalidParameter));
    assert!(engine.trigger(EventId::RETURN, Priority::Normal).is_ok());
}

#[test]
fn test_epsilon_fires_on_first_cycle_only_and_keeps_normal_pending() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, CALL);
    assert_eq!(engine.current_state(), PASS);

    engine.trigger(GO, Priority::Normal).unwrap();
    let report = engine.cycle(&mut host).unwrap();
    let t = report.transition.unwrap();
    assert_eq!((t.from, t.event, t.to), (PASS, EventId::EPSILON, IDLE));
    assert_eq!(engine.events().pending_normal(), Some((GO, Priority::Normal)));

    let report = engine.cycle(&mut host).unwrap();
    assert_eq!(report.transition.map(|t| t.to), Some(BUSY));
}

#[test]
fn test_watchdog_fires_after_sustained_failure() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, GO);
    assert_eq!(engine.current_state(), BUSY);

    let mut fired_at = None;
    for cycle in 0..40u32 {
        host.failing = cycle >= 10;
        let report = engine.cycle(&mut host).unwrap();
        if let Some(t) = report.transition {
            assert_eq!(t.event, ALARM);
            assert!(fired_at.is_none());
            fired_at = Some(cycle);
        }
    }
    assert_eq!(fired_at, Some(10 + WATCHDOG));
    assert_eq!(engine.current_state(), ALARM_ST);
}

#[test]
fn test_watchdog_tolerates_short_failures() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, GO);
    for cycle in 0..50u32 {
        // Four failing cycles out of every eight never reach the deadline.
        host.failing = cycle % 8 < 4;
        let report = engine.cycle(&mut host).unwrap();
        assert!(report.transition.is_none());
    }
}

#[test]
fn test_watchdog_with_platform_clock() {
    let mut host = Host::new();
    host.clock = Some(u32::MAX - 2);
    let mut engine = enter_via(&mut host, GO);

    host.failing = true;
    let mut fired = false;
    for _ in 0..(WATCHDOG + 3) {
        host.clock = host.clock.map(|c| c.wrapping_add(1));
        if engine.cycle(&mut host).unwrap().transition.is_some() {
            fired = true;
            break;
        }
    }
    assert!(fired);
    assert_eq!(engine.current_state(), ALARM_ST);
}

#[test]
fn test_on_entry_disarms_after_clean_pass() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, PROBE);
    assert_eq!(engine.current_state(), PROBE_ST);

    engine.cycle(&mut host).unwrap();
    assert_eq!(engine.get_live().deadline, None);
    host.failing = true;
    for _ in 0..20 {
        assert!(engine.cycle(&mut host).unwrap().transition.is_none());
    }
}

#[test]
fn test_on_entry_escalates_when_never_clean() {
    let mut host = Host::new();
    host.failing = true;
    let mut engine = enter_via(&mut host, PROBE);

    let mut cycles = 0;
    while engine.current_state() == PROBE_ST && cycles < 20 {
        engine.cycle(&mut host).unwrap();
        cycles += 1;
    }
    assert_eq!(engine.current_state(), ALARM_ST);
    assert_eq!(cycles, PROBE_WINDOW + 1);
}

#[test]
fn test_module_errors_are_counted_not_propagated() {
    let mut host = Host::new();
    host.failing = true;
    let mut engine = running(&mut host);
    let report = engine.cycle(&mut host).unwrap();
    assert_eq!(report.module_errors, 1);
    assert_eq!(engine.get_live().module_errors, 1);
}

#[test]
fn test_wildcard_reaches_alarm_from_every_state() {
    let mut host = Host::new();
    let engine = running(&mut host);
    for def in CONFIG.states {
        assert_eq!(engine.get_next_state(def.id, ALARM), Some(ALARM_ST));
    }
}

#[test]
fn test_return_sentinel_pops_return_state() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, GO);
    engine.set_current_state_as_return();

    engine.trigger(ALARM, Priority::Critical).unwrap();
    engine.cycle(&mut host).unwrap();
    assert_eq!(engine.current_state(), ALARM_ST);

    engine.trigger(BACK, Priority::Normal).unwrap();
    let report = engine.cycle(&mut host).unwrap();
    assert_eq!(report.transition.map(|t| t.to), Some(BUSY));
    assert_eq!(engine.return_state(), None);
}

#[test]
fn test_return_event_falls_back_to_previous_state() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, GO);
    engine.trigger(EventId::RETURN, Priority::Normal).unwrap();
    let report = engine.cycle(&mut host).unwrap();
    assert_eq!(report.transition.map(|t| t.to), Some(IDLE));
    assert!(engine.set_return_state(StateId(9)).is_err());
}

#[test]
fn test_reboot_flagged_entry_resets_exactly_once() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, GO);

    engine.trigger(SLEEP, Priority::Normal).unwrap();
    let report = engine.cycle(&mut host).unwrap();
    assert!(report.rebooted);
    assert_eq!(host.reboots, 1);
    assert_eq!(host.marker, Some(DEEP));
    assert!(engine.reboot_pending());
    assert_eq!(engine.cycle(&mut host), Err(EngineError::Busy));

    // Next boot resumes straight in Deep.
    let mut engine = running(&mut host);
    assert_eq!(engine.current_state(), DEEP);
    assert_eq!(host.marker, Some(DEEP));
    let report = engine.cycle(&mut host).unwrap();
    assert!(!report.rebooted);
    assert_eq!(host.reboots, 1);
    assert_eq!(host.marker, Some(IDLE));
    assert_eq!(host.hooks.last(), Some(&Hs::Enter(2)));

    for _ in 0..5 {
        assert!(!engine.cycle(&mut host).unwrap().rebooted);
    }
    assert_eq!(host.reboots, 1);
}

#[test]
fn test_failed_marker_write_retries_entry() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, GO);

    host.save_fails = true;
    engine.trigger(SLEEP, Priority::Normal).unwrap();
    assert_eq!(engine.cycle(&mut host), Err(EngineError::Generic));
    assert_eq!(host.reboots, 0);
    assert_eq!(engine.current_state(), DEEP);

    host.save_fails = false;
    let report = engine.cycle(&mut host).unwrap();
    assert!(report.rebooted);
    assert_eq!(host.marker, Some(DEEP));
}

#[test]
fn test_safety_net_reboots_on_armed_marker() {
    let mut host = Host::new();
    host.marker = Some(DEEP);
    let mut engine = running(&mut host);
    engine.cycle(&mut host).unwrap();
    assert_eq!(host.reboots, 0);

    // Someone armed a reset into another state without issuing it.
    host.marker = Some(BUSY);
    let report = engine.cycle(&mut host).unwrap();
    assert!(report.rebooted);
    assert_eq!(host.reboots, 1);
}

#[test]
fn test_invalid_marker_falls_back_to_start() {
    let mut host = Host::new();
    host.marker = None;
    let engine = Engine::init("test", &CONFIG, &mut host).unwrap();
    assert_eq!(engine.current_state(), IDLE);
    assert_eq!(host.marker, Some(IDLE));
}

#[test]
fn test_stop_rewinds_to_start() {
    let mut host = Host::new();
    let mut engine = enter_via(&mut host, GO);
    engine.stop();
    assert_eq!(engine.current_state(), IDLE);
    engine.start();
    engine.cycle(&mut host).unwrap();
    assert_eq!(host.hooks.last(), Some(&Hs::Enter(0)));
}

#[test]
fn test_lookups_by_name() {
    let mut host = Host::new();
    let engine = running(&mut host);
    assert_eq!(engine.state_by_name("Deep"), Some(DEEP));
    assert_eq!(engine.event_by_name("<Epsilon>"), Some(EventId::EPSILON));
    assert_eq!(engine.event_name(CALL), "<None>");
    assert_eq!(engine.module_by_name("health"), Some(ModuleId(0)));
    assert_eq!(engine.state_name(StateId(8)), "<Unknown>");
}

const fn plain(id: u8) -> StateDef<Hs> {
    StateDef { id: StateId(id), name: None, timeout: TimeoutPolicy::None, entry: None, exit: None, requires_reboot: false }
}

const TOO_MANY: [StateDef<Hs>; 11] =
    [plain(0), plain(1), plain(2), plain(3), plain(4), plain(5), plain(6), plain(7), plain(8), plain(9), plain(10)];

static OVERSIZED: MachineConfig<Hs, Hm> =
    MachineConfig { start: StateId(0), states: &TOO_MANY, events: &[], transitions: &[], modules: &[] };

#[test]
fn test_init_rejects_oversized_table() {
    let mut host = Host::new();
    assert!(matches!(Engine::init("big", &OVERSIZED, &mut host), Err(EngineError::InvalidParameter)));
}

const TOGGLE_STATES: [StateDef<Hs>; 3] = [
    StateDef {
        id: StateId(0),
        name: Some("Start"),
        timeout: TimeoutPolicy::None,
        entry: Some(Hs::Enter(0)),
        exit: None,
        requires_reboot: true,
    },
    state(StateId(1), "Run", TimeoutPolicy::None, false),
    state(StateId(2), "LowPower", TimeoutPolicy::None, true),
];
const TOGGLE_EVENTS: [EventDef; 1] = [EventDef { id: EventId(0), name: Some("BP") }];
const TOGGLE_TRANSITIONS: [TransitionDef; 3] = [
    TransitionDef { from: StateMatch::State(StateId(0)), event: EventId::EPSILON, to: Target::State(StateId(1)) },
    TransitionDef { from: StateMatch::State(StateId(1)), event: EventId(0), to: Target::State(StateId(2)) },
    TransitionDef { from: StateMatch::State(StateId(2)), event: EventId(0), to: Target::State(StateId(1)) },
];

static TOGGLE: MachineConfig<Hs, Hm> = MachineConfig {
    start: StateId(0),
    states: &TOGGLE_STATES,
    events: &TOGGLE_EVENTS,
    transitions: &TOGGLE_TRANSITIONS,
    modules: &[],
};

fn boot_toggle(host: &mut Host) -> Engine<Hs, Hm> {
    let mut engine = Engine::init("toggle", &TOGGLE, host).unwrap();
    engine.start();
    engine
}

#[test]
fn test_toggle_scenario_resets_once_per_low_power_entry() {
    let mut host = Host::new();
    let mut engine = boot_toggle(&mut host);

    // Start proceeds on its own marker, then Epsilon leaves it.
    let report = engine.cycle(&mut host).unwrap();
    assert!(!report.rebooted);
    assert_eq!(engine.current_state(), StateId(1));
    assert_eq!(host.marker, Some(StateId(0)));

    for round in 1..=2 {
        engine.trigger(EventId(0), Priority::Normal).unwrap();
        assert!(engine.cycle(&mut host).unwrap().rebooted);
        assert_eq!(host.reboots, round);
        assert_eq!(host.marker, Some(StateId(2)));

        engine = boot_toggle(&mut host);
        assert_eq!(engine.current_state(), StateId(2));
        assert!(!engine.cycle(&mut host).unwrap().rebooted);
        assert_eq!(host.reboots, round);

        engine.trigger(EventId(0), Priority::Normal).unwrap();
        let report = engine.cycle(&mut host).unwrap();
        assert_eq!(report.transition.map(|t| t.to), Some(StateId(1)));
        assert!(!report.rebooted);
    }
}
