use crate::subsystems::ButtonGesture;
use heapless::Vec;
use serde::{Deserialize, Serialize};

const MAX_BINDINGS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonAction {
    /// Queue an immediate uplink and tag write.
    SendData,
    /// Run <-> LowPower toggle.
    TogglePower,
    Shutdown,
    Reboot,
    Ignore,
}

/// Gesture to action table, filled at system init.
#[derive(Debug, Clone)]
pub struct ButtonMap {
    bindings: Vec<(ButtonGesture, ButtonAction), MAX_BINDINGS>,
}

impl ButtonMap {
    pub fn new() -> Self {
        Self { bindings: Vec::new() }
    }

    pub fn with_defaults() -> Self {
        let mut map = Self::new();
        map.register_defaults();
        map
    }

    pub fn register_defaults(&mut self) {
        self.bindings.clear();
        // Four bindings always fit.
        let _ = self.register(ButtonGesture::Button1Short, ButtonAction::SendData);
        let _ = self.register(ButtonGesture::Button1Long, ButtonAction::Shutdown);
        let _ = self.register(ButtonGesture::Button2Short, ButtonAction::TogglePower);
        let _ = self.register(ButtonGesture::Button2Long, ButtonAction::Reboot);
    }

    /// Binds or rebinds a gesture.
    pub fn register(&mut self, gesture: ButtonGesture, action: ButtonAction) -> Result<(), &'static str> {
        if let Some(binding) = self.bindings.iter_mut().find(|(g, _)| *g == gesture) {
            binding.1 = action;
            return Ok(());
        }
        self.bindings
            .push((gesture, action))
            .map_err(|_| "Button binding table full")
    }

    pub fn action_for(&self, gesture: ButtonGesture) -> ButtonAction {
        self.bindings
            .iter()
            .find(|(g, _)| *g == gesture)
            .map_or(ButtonAction::Ignore, |(_, action)| *action)
    }
}

impl Default for ButtonMap {
    fn default() -> Self {
        Self::with_defaults()
    }
}
