use super::error::{EngineError, EngineResult};
use core::fmt;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Hard ceiling on the number of states a machine may declare.
pub const MAX_STATES: usize = 10;
/// First id of the reserved event range.
pub const RESERVED_EVENT_BASE: u8 = 0x40;

const_assert!(MAX_STATES <= RESERVED_EVENT_BASE as usize);

pub const NAME_NONE: &str = "<None>";
pub const NAME_UNKNOWN: &str = "<Unknown>";
pub const NAME_EPSILON: &str = "<Epsilon>";
pub const NAME_RETURN: &str = "<Return>";
pub const NAME_INVALID: &str = "<Invalid>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub u8);

impl StateId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u8);

impl EventId {
    /// Fires on the first cycle after a state is entered.
    pub const EPSILON: EventId = EventId(RESERVED_EVENT_BASE);
    /// Resolves to the return state, or the previous state when none is set.
    pub const RETURN: EventId = EventId(RESERVED_EVENT_BASE + 1);

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_reserved(self) -> bool {
        self.0 >= RESERVED_EVENT_BASE
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EventId::EPSILON => f.write_str(NAME_EPSILON),
            EventId::RETURN => f.write_str(NAME_RETURN),
            EventId(id) => write!(f, "E{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u8);

impl ModuleId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a state's deadline is armed and when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    None,
    /// Raise `event` once `after` ticks have elapsed since entry.
    Fixed { after: u32, event: EventId },
    /// A clean module pass disarms the deadline for the rest of the sojourn.
    OkOnEntry { after: u32, event: EventId },
    /// Every clean module pass pushes the deadline `after` ticks forward.
    OkWatchdog { after: u32, event: EventId },
}

impl TimeoutPolicy {
    pub const fn duration(self) -> Option<u32> {
        match self {
            TimeoutPolicy::None => None,
            TimeoutPolicy::Fixed { after, .. }
            | TimeoutPolicy::OkOnEntry { after, .. }
            | TimeoutPolicy::OkWatchdog { after, .. } => Some(after),
        }
    }

    pub const fn event(self) -> Option<EventId> {
        match self {
            TimeoutPolicy::None => None,
            TimeoutPolicy::Fixed { event, .. }
            | TimeoutPolicy::OkOnEntry { event, .. }
            | TimeoutPolicy::OkWatchdog { event, .. } => Some(event),
        }
    }
}

/// One row of the state table. `S` is the host's state-handler key.
#[derive(Debug, Clone, Copy)]
pub struct StateDef<S> {
    pub id: StateId,
    pub name: Option<&'static str>,
    pub timeout: TimeoutPolicy,
    pub entry: Option<S>,
    pub exit: Option<S>,
    /// Entry must happen from a cold reset.
    pub requires_reboot: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct EventDef {
    pub id: EventId,
    pub name: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateMatch {
    Any,
    State(StateId),
}

impl StateMatch {
    pub fn matches(self, state: StateId) -> bool {
        match self {
            StateMatch::Any => true,
            StateMatch::State(s) => s == state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    State(StateId),
    /// Resolves to the return state at the time the transition is taken.
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDef {
    pub from: StateMatch,
    pub event: EventId,
    pub to: Target,
}

/// A module binds at most one handler per state, indexed by state id.
/// `None` means inactive in that state.
#[derive(Debug, Clone, Copy)]
pub struct ModuleDef<M: 'static> {
    pub id: ModuleId,
    pub name: Option<&'static str>,
    pub handlers: &'static [Option<M>],
}

impl<M: Copy + 'static> ModuleDef<M> {
    pub fn handler_for(&self, state: StateId) -> Option<M> {
        self.handlers.get(state.index()).copied().flatten()
    }
}

/// Static description of a machine. Built once as `const` tables.
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig<S: 'static, M: 'static> {
    pub start: StateId,
    pub states: &'static [StateDef<S>],
    pub events: &'static [EventDef],
    pub transitions: &'static [TransitionDef],
    pub modules: &'static [ModuleDef<M>],
}

impl<S: Copy + 'static, M: Copy + 'static> MachineConfig<S, M> {
    /// Checks table density, id ranges and cross references.
    pub fn validate(&self) -> EngineResult {
        if self.states.is_empty() || self.states.len() > MAX_STATES {
            return Err(EngineError::InvalidParameter);
        }
        if self.events.len() > RESERVED_EVENT_BASE as usize {
            return Err(EngineError::InvalidParameter);
        }
        if !self.is_valid_state(self.start) {
            return Err(EngineError::InvalidParameter);
        }

        let dense_states = self.states.iter().enumerate().all(|(i, s)| s.id.index() == i);
        let dense_events = self.events.iter().enumerate().all(|(i, e)| e.id.index() == i);
        let dense_modules = self.modules.iter().enumerate().all(|(i, m)| m.id.index() == i);
        if !(dense_states && dense_events && dense_modules) {
            return Err(EngineError::InvalidParameter);
        }

        for state in self.states {
            if let Some(event) = state.timeout.event() {
                if !self.is_valid_event(event) {
                    return Err(EngineError::InvalidParameter);
                }
            }
        }

        for t in self.transitions {
            let from_ok = match t.from {
                StateMatch::Any => true,
                StateMatch::State(s) => self.is_valid_state(s),
            };
            let to_ok = match t.to {
                Target::Return => true,
                Target::State(s) => self.is_valid_state(s),
            };
            if !(from_ok && to_ok && self.is_valid_event(t.event)) {
                return Err(EngineError::InvalidParameter);
            }
        }

        if self.modules.iter().any(|m| m.handlers.len() != self.states.len()) {
            return Err(EngineError::InvalidParameter);
        }

        Ok(())
    }

    pub fn state(&self, id: StateId) -> Option<&StateDef<S>> {
        self.states.get(id.index())
    }

    pub fn is_valid_state(&self, id: StateId) -> bool {
        id.index() < self.states.len()
    }

    /// Table events plus the two reserved ids.
    pub fn is_valid_event(&self, id: EventId) -> bool {
        id == EventId::EPSILON || id == EventId::RETURN || id.index() < self.events.len()
    }

    pub fn is_valid_module(&self, id: ModuleId) -> bool {
        id.index() < self.modules.len()
    }

    /// First transition in declaration order leaving `state` on `event`.
    pub fn find_transition(&self, state: StateId, event: EventId) -> Option<&TransitionDef> {
        self.transitions
            .iter()
            .find(|t| t.event == event && t.from.matches(state))
    }

    pub fn state_name(&self, id: StateId) -> &'static str {
        match self.state(id) {
            Some(def) => def.name.unwrap_or(NAME_NONE),
            None => NAME_UNKNOWN,
        }
    }

    pub fn event_name(&self, id: EventId) -> &'static str {
        match id {
            EventId::EPSILON => NAME_EPSILON,
            EventId::RETURN => NAME_RETURN,
            _ => match self.events.get(id.index()) {
                Some(def) => def.name.unwrap_or(NAME_NONE),
                None => NAME_UNKNOWN,
            },
        }
    }

    pub fn module_name(&self, id: ModuleId) -> &'static str {
        match self.modules.get(id.index()) {
            Some(def) => def.name.unwrap_or(NAME_NONE),
            None => NAME_UNKNOWN,
        }
    }

    pub fn state_by_name(&self, name: &str) -> Option<StateId> {
        self.states.iter().find(|s| s.name == Some(name)).map(|s| s.id)
    }

    pub fn event_by_name(&self, name: &str) -> Option<EventId> {
        match name {
            NAME_EPSILON => Some(EventId::EPSILON),
            NAME_RETURN => Some(EventId::RETURN),
            _ => self.events.iter().find(|e| e.name == Some(name)).map(|e| e.id),
        }
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules.iter().find(|m| m.name == Some(name)).map(|m| m.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: StateId = StateId(0);
    const B: StateId = StateId(1);
    const GO: EventId = EventId(0);

    const STATES: [StateDef<()>; 2] = [
        StateDef { id: A, name: Some("A"), timeout: TimeoutPolicy::None, entry: None, exit: None, requires_reboot: false },
        StateDef { id: B, name: None, timeout: TimeoutPolicy::None, entry: None, exit: None, requires_reboot: false },
    ];
    const EVENTS: [EventDef; 1] = [EventDef { id: GO, name: Some("GO") }];
    const TRANSITIONS: [TransitionDef; 2] = [
        TransitionDef { from: StateMatch::State(A), event: GO, to: Target::State(B) },
        TransitionDef { from: StateMatch::Any, event: GO, to: Target::State(A) },
    ];
    const CONFIG: MachineConfig<(), ()> = MachineConfig {
        start: A,
        states: &STATES,
        events: &EVENTS,
        transitions: &TRANSITIONS,
        modules: &[],
    };

    #[test]
    fn test_first_match_wins() {
        assert_eq!(CONFIG.find_transition(A, GO).map(|t| t.to), Some(Target::State(B)));
        assert_eq!(CONFIG.find_transition(B, GO).map(|t| t.to), Some(Target::State(A)));
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(CONFIG.state_name(B), NAME_NONE);
        assert_eq!(CONFIG.state_name(StateId(7)), NAME_UNKNOWN);
        assert_eq!(CONFIG.event_name(EventId::EPSILON), NAME_EPSILON);
        assert_eq!(CONFIG.event_by_name("GO"), Some(GO));
        assert_eq!(CONFIG.state_by_name("A"), Some(A));
        assert!(CONFIG.validate().is_ok());
    }

    #[test]
    fn test_rejects_sparse_state_ids() {
        const SPARSE: [StateDef<()>; 1] = [StateDef {
            id: StateId(3),
            name: None,
            timeout: TimeoutPolicy::None,
            entry: None,
            exit: None,
            requires_reboot: false,
        }];
        let config: MachineConfig<(), ()> = MachineConfig {
            start: StateId(0),
            states: &SPARSE,
            events: &[],
            transitions: &[],
            modules: &[],
        };
        assert_eq!(config.validate(), Err(EngineError::InvalidParameter));
    }
}
