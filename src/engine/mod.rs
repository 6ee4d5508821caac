//! Generic cooperative state-machine engine.
//!
//! A machine is a set of `const` tables ([`MachineConfig`]) plus one
//! [`Engine`] that owns every piece of mutable runtime state. The host
//! drives it by calling [`Engine::cycle`] once per tick and hands in an
//! object implementing [`Platform`] (clock, durable marker, reset) and
//! [`Dispatch`] (state and module handlers keyed by small `Copy` enums).
//!
//! Each cycle resolves at most one transition, in this order: Epsilon on
//! the first cycle of a sojourn, the critical event, the normal event, and
//! finally the active state's timeout policy. Module handlers bound to the
//! resulting state then run and their failures are counted for the next
//! timeout check.

pub mod error;
pub mod events;
pub mod table;
pub mod timeout;

pub use error::{EngineError, EngineResult};
pub use events::{EventQueue, HandlerCx, Priority};
pub use table::{
    EventDef, EventId, MachineConfig, ModuleDef, ModuleId, StateDef, StateId, StateMatch, Target,
    TimeoutPolicy, TransitionDef, MAX_STATES, NAME_INVALID,
};
pub use timeout::Live;

use crate::persistence::{self, EntryGate};
use core::fmt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Services the engine needs from the board.
pub trait Platform {
    /// Free-running clock. `None` makes the engine count its own cycles.
    fn monotonic_ticks(&mut self) -> Option<u32> {
        None
    }

    fn load_persisted_state(&mut self) -> StateId;

    /// Must not return `Ok` before the value is durable.
    fn save_persisted_state(&mut self, state: StateId) -> EngineResult;

    /// Never returns on hardware. Simulated hosts record the request.
    fn reboot(&mut self);

    fn log_transition(&mut self, from: &'static str, event: &'static str, to: &'static str) {
        info!(target: "asset_tracker::engine", from, event, to, "transition");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hook {
    Entry,
    Exit,
}

/// The step a state handler is running for. `from` is `None` on the first
/// entry after init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub from: Option<StateId>,
    pub event: Option<EventId>,
    pub to: StateId,
}

/// Handler dispatch. The tables store handler keys; the host matches on
/// them and runs the corresponding code.
pub trait Dispatch {
    type StateHandler: Copy + fmt::Debug + 'static;
    type ModuleHandler: Copy + fmt::Debug + 'static;

    fn on_state(
        &mut self,
        handler: Self::StateHandler,
        hook: Hook,
        step: Step,
        cx: &mut HandlerCx<'_>,
    ) -> EngineResult;

    fn on_module(
        &mut self,
        handler: Self::ModuleHandler,
        module: ModuleId,
        state: StateId,
        cx: &mut HandlerCx<'_>,
    ) -> EngineResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Stopped,
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StateId,
    pub event: EventId,
    pub to: StateId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub transition: Option<Transition>,
    pub module_errors: u8,
    /// The cycle ended in a platform reset.
    pub rebooted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeHandle {
    pub current: StateId,
    pub previous: Option<StateId>,
    pub return_state: Option<StateId>,
    pub status: CycleStatus,
    pub live: Live,
    entered: bool,
    reboot_issued: bool,
}

#[derive(Debug, Clone, Copy)]
struct Resolved {
    event: EventId,
    to: StateId,
    through_return: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Rebooted,
}

pub struct Engine<S: 'static, M: 'static> {
    name: &'static str,
    config: &'static MachineConfig<S, M>,
    runtime: RuntimeHandle,
    queue: EventQueue,
}

impl<S, M> Engine<S, M>
where
    S: Copy + fmt::Debug + 'static,
    M: Copy + fmt::Debug + 'static,
{
    /// Validates the tables, stops the machine and restores the first state
    /// from the durable marker. An unknown marker falls back to the start
    /// state and is rewritten.
    pub fn init<P: Platform + ?Sized>(
        name: &'static str,
        config: &'static MachineConfig<S, M>,
        platform: &mut P,
    ) -> EngineResult<Self> {
        config.validate()?;

        let mut engine = Self {
            name,
            config,
            runtime: RuntimeHandle {
                current: config.start,
                previous: None,
                return_state: None,
                status: CycleStatus::Stopped,
                live: Live::default(),
                entered: false,
                reboot_issued: false,
            },
            queue: EventQueue::new(config.events.len()),
        };
        engine.stop();
        engine.runtime.previous = None;

        let first = platform.load_persisted_state();
        if config.is_valid_state(first) {
            engine.runtime.current = first;
        } else {
            warn!(machine = name, marker = first.0, "persisted state invalid, starting from default");
            platform.save_persisted_state(config.start)?;
        }

        debug!(machine = name, first = config.state_name(engine.runtime.current), "engine initialised");
        Ok(engine)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &'static MachineConfig<S, M> {
        self.config
    }

    pub fn start(&mut self) {
        self.runtime.status = CycleStatus::Running;
    }

    pub fn pause(&mut self) {
        self.runtime.status = CycleStatus::Paused;
    }

    /// Stops and rewinds to the start state. The next `start` replays its
    /// entry handler.
    pub fn stop(&mut self) {
        self.runtime.status = CycleStatus::Stopped;
        self.runtime.previous = Some(self.runtime.current);
        self.runtime.current = self.config.start;
        self.runtime.entered = false;
        self.runtime.live.reset(TimeoutPolicy::None, 0);
        self.queue.clear();
    }

    pub fn status(&self) -> CycleStatus {
        self.runtime.status
    }

    pub fn is_running(&self) -> bool {
        self.runtime.status == CycleStatus::Running
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn get_live(&self) -> Live {
        self.runtime.live
    }

    pub fn current_state(&self) -> StateId {
        self.runtime.current
    }

    pub fn previous_state(&self) -> Option<StateId> {
        self.runtime.previous
    }

    pub fn return_state(&self) -> Option<StateId> {
        self.runtime.return_state
    }

    pub fn set_return_state(&mut self, state: StateId) -> EngineResult {
        if !self.config.is_valid_state(state) {
            return Err(EngineError::InvalidParameter);
        }
        self.runtime.return_state = Some(state);
        Ok(())
    }

    pub fn set_current_state_as_return(&mut self) {
        self.runtime.return_state = Some(self.runtime.current);
    }

    pub fn clear_return_state(&mut self) {
        self.runtime.return_state = None;
    }

    /// True once `reboot` was issued and the engine is waiting for reset.
    pub fn reboot_pending(&self) -> bool {
        self.runtime.reboot_issued
    }

    pub fn events(&self) -> &EventQueue {
        &self.queue
    }

    pub fn trigger(&mut self, event: EventId, priority: Priority) -> EngineResult {
        self.queue.trigger(event, priority)
    }

    /// State `event` would lead to from `state`, without touching the handle.
    pub fn get_next_state(&self, state: StateId, event: EventId) -> Option<StateId> {
        self.resolve(state, event).map(|r| r.to)
    }

    pub fn find_transition(&self, state: StateId, event: EventId) -> Option<&'static TransitionDef> {
        self.config.find_transition(state, event)
    }

    pub fn state_name(&self, state: StateId) -> &'static str {
        self.config.state_name(state)
    }

    pub fn event_name(&self, event: EventId) -> &'static str {
        self.config.event_name(event)
    }

    pub fn module_name(&self, module: ModuleId) -> &'static str {
        self.config.module_name(module)
    }

    pub fn state_by_name(&self, name: &str) -> Option<StateId> {
        self.config.state_by_name(name)
    }

    pub fn event_by_name(&self, name: &str) -> Option<EventId> {
        self.config.event_by_name(name)
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.config.module_by_name(name)
    }

    /// Runs one cooperative step. See the module docs for the ordering.
    pub fn cycle<H>(&mut self, host: &mut H) -> EngineResult<CycleReport>
    where
        H: Platform + Dispatch<StateHandler = S, ModuleHandler = M>,
    {
        if self.runtime.reboot_issued {
            return Err(EngineError::Busy);
        }
        match self.runtime.status {
            CycleStatus::Paused => return Err(EngineError::Paused),
            CycleStatus::Stopped => return Err(EngineError::Stopped),
            CycleStatus::Running => {}
        }

        let config = self.config;
        let mut state = config
            .state(self.runtime.current)
            .ok_or(EngineError::NoRunnableState)?;
        let mut report = CycleReport::default();

        let now = self.now(host);
        self.runtime.live.timestamp = now;
        let mut next = self.resolve_events();

        if !self.runtime.entered {
            self.reset_live(host, state.timeout);
            let step = Step { from: None, event: None, to: state.id };
            let flow = self.enter(host, state, step)?;
            self.runtime.entered = true;
            if flow == Flow::Rebooted {
                report.rebooted = true;
                return Ok(report);
            }
        }

        if next.is_none() {
            next = self.poll_timeout(state);
        }

        if let Some(resolved) = next {
            let from = state.id;
            let step = Step { from: Some(from), event: Some(resolved.event), to: resolved.to };
            if self.run_state_handler(host, state.exit, Hook::Exit, step) == Flow::Rebooted {
                report.rebooted = true;
                return Ok(report);
            }

            state = config.state(resolved.to).ok_or(EngineError::NoRunnableState)?;
            self.runtime.previous = Some(from);
            self.runtime.current = resolved.to;
            if resolved.through_return {
                self.runtime.return_state = None;
            }
            self.reset_live(host, state.timeout);

            host.log_transition(
                config.state_name(from),
                config.event_name(resolved.event),
                config.state_name(resolved.to),
            );
            report.transition = Some(Transition { from, event: resolved.event, to: resolved.to });

            // A failed marker write leaves the entry to be retried next cycle.
            let flow = self.enter(host, state, step).map_err(|e| {
                self.runtime.entered = false;
                e
            })?;
            if flow == Flow::Rebooted {
                report.rebooted = true;
                return Ok(report);
            }
        } else {
            self.runtime.live.ticks = self.runtime.live.ticks.wrapping_add(1);
        }

        if self.dispatch_modules(host, state.id) == Flow::Rebooted {
            report.rebooted = true;
            return Ok(report);
        }
        report.module_errors = self.runtime.live.module_errors;

        if state.requires_reboot && persistence::armed_elsewhere(host, state.id, config.start) {
            warn!(machine = self.name, state = config.state_name(state.id), "persisted marker disagrees with active state");
            self.issue_reboot(host);
            report.rebooted = true;
        }

        Ok(report)
    }

    fn now<P: Platform + ?Sized>(&self, platform: &mut P) -> u32 {
        platform.monotonic_ticks().unwrap_or(self.runtime.live.ticks)
    }

    /// Sojourn restart. Without a platform clock time restarts at zero.
    fn reset_live<P: Platform + ?Sized>(&mut self, platform: &mut P, policy: TimeoutPolicy) {
        let now = platform.monotonic_ticks().unwrap_or(0);
        self.runtime.live.reset(policy, now);
    }

    fn resolve(&self, state: StateId, event: EventId) -> Option<Resolved> {
        if event == EventId::RETURN {
            let to = self.runtime.return_state.or(self.runtime.previous)?;
            return Some(Resolved { event, to, through_return: true });
        }
        match self.config.find_transition(state, event)?.to {
            Target::State(to) => Some(Resolved { event, to, through_return: false }),
            Target::Return => {
                let to = self.runtime.return_state?;
                Some(Resolved { event, to, through_return: true })
            }
        }
    }

    fn resolve_events(&mut self) -> Option<Resolved> {
        let current = self.runtime.current;

        if self.runtime.live.ticks == 0 {
            if let Some(resolved) = self.resolve(current, EventId::EPSILON) {
                return Some(resolved);
            }
        }

        if let Some(event) = self.queue.pending_critical() {
            if let Some(resolved) = self.resolve(current, event) {
                self.queue.consume_critical();
                return Some(resolved);
            }
        }

        let event = self.queue.take_normal()?;
        let resolved = self.resolve(current, event);
        if resolved.is_none() {
            debug!(
                machine = self.name,
                state = self.config.state_name(current),
                event = self.config.event_name(event),
                next = NAME_INVALID,
                "event dropped"
            );
        }
        resolved
    }

    fn poll_timeout(&mut self, state: &StateDef<S>) -> Option<Resolved> {
        let event = timeout::poll(state.timeout, &mut self.runtime.live)?;
        let resolved = self.resolve(state.id, event);
        if resolved.is_none() {
            debug!(
                machine = self.name,
                state = self.config.state_name(state.id),
                event = self.config.event_name(event),
                "timeout event has no transition"
            );
        }
        resolved
    }

    /// Entry with the reboot gate in front of the handler.
    fn enter<H>(&mut self, host: &mut H, state: &StateDef<S>, step: Step) -> EngineResult<Flow>
    where
        H: Platform + Dispatch<StateHandler = S, ModuleHandler = M>,
    {
        if state.requires_reboot {
            match persistence::guard_entry(host, state.id, self.config.start)? {
                EntryGate::Proceed => {}
                EntryGate::Reboot => {
                    warn!(machine = self.name, state = self.config.state_name(state.id), "entry requires a cold reset");
                    self.issue_reboot(host);
                    return Ok(Flow::Rebooted);
                }
            }
        }
        Ok(self.run_state_handler(host, state.entry, Hook::Entry, step))
    }

    fn run_state_handler<H>(&mut self, host: &mut H, handler: Option<S>, hook: Hook, step: Step) -> Flow
    where
        H: Platform + Dispatch<StateHandler = S, ModuleHandler = M>,
    {
        let Some(handler) = handler else {
            return Flow::Continue;
        };
        let mut cx = HandlerCx::new(&mut self.queue);
        if let Err(e) = host.on_state(handler, hook, step, &mut cx) {
            warn!(machine = self.name, ?handler, ?hook, error = %e, "state handler failed");
        }
        if cx.reboot_requested() {
            self.issue_reboot(host);
            return Flow::Rebooted;
        }
        Flow::Continue
    }

    fn dispatch_modules<H>(&mut self, host: &mut H, state: StateId) -> Flow
    where
        H: Platform + Dispatch<StateHandler = S, ModuleHandler = M>,
    {
        let mut errors: u8 = 0;
        for module in self.config.modules {
            let Some(handler) = module.handler_for(state) else {
                continue;
            };
            let mut cx = HandlerCx::new(&mut self.queue);
            if let Err(e) = host.on_module(handler, module.id, state, &mut cx) {
                errors = errors.saturating_add(1);
                debug!(machine = self.name, module = self.config.module_name(module.id), error = %e, "module handler failed");
            }
            if cx.reboot_requested() {
                self.runtime.live.module_errors = errors;
                self.issue_reboot(host);
                return Flow::Rebooted;
            }
        }
        self.runtime.live.module_errors = errors;
        Flow::Continue
    }

    fn issue_reboot<P: Platform + ?Sized>(&mut self, platform: &mut P) {
        self.runtime.reboot_issued = true;
        platform.reboot();
    }
}
