use super::error::{EngineError, EngineResult};
use super::table::EventId;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    None = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    /// Routed to the dedicated critical slot.
    Critical = 4,
}

/// Pending events: one normal slot arbitrated by priority and one critical
/// slot that is only cleared when a transition consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQueue {
    normal: Option<(EventId, Priority)>,
    critical: Option<EventId>,
    event_count: u8,
}

impl EventQueue {
    pub fn new(event_count: usize) -> Self {
        Self {
            normal: None,
            critical: None,
            event_count: event_count.min(u8::MAX as usize) as u8,
        }
    }

    pub fn trigger(&mut self, event: EventId, priority: Priority) -> EngineResult {
        if event == EventId::EPSILON || (!event.is_reserved() && event.0 >= self.event_count) {
            return Err(EngineError::InvalidParameter);
        }
        if event.is_reserved() && event != EventId::RETURN {
            return Err(EngineError::InvalidParameter);
        }

        if priority == Priority::Critical {
            // Last write wins while the slot is still unconsumed.
            if let Some(previous) = self.critical.replace(event) {
                debug!(%previous, %event, "critical event overwritten before it was consumed");
            }
            return Ok(());
        }

        match self.normal {
            Some((pending, pending_priority)) if priority < pending_priority => {
                debug!(%event, %pending, "event rejected by pending priority");
                Err(EngineError::NoPriority)
            }
            _ => {
                self.normal = Some((event, priority));
                Ok(())
            }
        }
    }

    pub fn pending_normal(&self) -> Option<(EventId, Priority)> {
        self.normal
    }

    pub fn pending_critical(&self) -> Option<EventId> {
        self.critical
    }

    pub(crate) fn take_normal(&mut self) -> Option<EventId> {
        self.normal.take().map(|(event, _)| event)
    }

    pub(crate) fn consume_critical(&mut self) {
        self.critical = None;
    }

    pub fn clear(&mut self) {
        self.normal = None;
        self.critical = None;
    }
}

/// What a handler may do to the machine while it runs inside a cycle.
pub struct HandlerCx<'a> {
    queue: &'a mut EventQueue,
    reboot: bool,
}

impl<'a> HandlerCx<'a> {
    pub fn new(queue: &'a mut EventQueue) -> Self {
        Self { queue, reboot: false }
    }

    pub fn trigger(&mut self, event: EventId, priority: Priority) -> EngineResult {
        self.queue.trigger(event, priority)
    }

    /// An event is already waiting for the next cycle.
    pub fn has_pending(&self) -> bool {
        self.queue.normal.is_some() || self.queue.critical.is_some()
    }

    /// Ask the engine to reset the platform once this handler returns.
    pub fn request_reboot(&mut self) {
        self.reboot = true;
    }

    pub fn reboot_requested(&self) -> bool {
        self.reboot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_priority_replaces_pending() {
        let mut queue = EventQueue::new(4);
        assert!(queue.trigger(EventId(0), Priority::Low).is_ok());
        assert!(queue.trigger(EventId(1), Priority::High).is_ok());
        assert_eq!(queue.pending_normal(), Some((EventId(1), Priority::High)));
    }

    #[test]
    fn test_lower_priority_rejected() {
        let mut queue = EventQueue::new(4);
        assert!(queue.trigger(EventId(1), Priority::High).is_ok());
        assert_eq!(queue.trigger(EventId(0), Priority::Low), Err(EngineError::NoPriority));
        assert_eq!(queue.pending_normal(), Some((EventId(1), Priority::High)));
    }

    #[test]
    fn test_equal_priority_replaces_pending() {
        let mut queue = EventQueue::new(4);
        assert!(queue.trigger(EventId(1), Priority::Normal).is_ok());
        assert!(queue.trigger(EventId(2), Priority::Normal).is_ok());
        assert_eq!(queue.pending_normal(), Some((EventId(2), Priority::Normal)));
    }

    #[test]
    fn test_out_of_range_and_epsilon_rejected() {
        let mut queue = EventQueue::new(2);
        assert_eq!(queue.trigger(EventId(2), Priority::Normal), Err(EngineError::InvalidParameter));
        assert_eq!(queue.trigger(EventId::EPSILON, Priority::Normal), Err(EngineError::InvalidParameter));
        assert!(queue.trigger(EventId::RETURN, Priority::Normal).is_ok());
    }

    #[test]
    fn test_handler_context_records_reboot() {
        let mut queue = EventQueue::new(1);
        let mut cx = HandlerCx::new(&mut queue);
        assert!(!cx.reboot_requested());
        cx.request_reboot();
        assert!(cx.reboot_requested());
        assert!(cx.trigger(EventId(0), Priority::Critical).is_ok());
        assert_eq!(queue.pending_critical(), Some(EventId(0)));
    }
}
