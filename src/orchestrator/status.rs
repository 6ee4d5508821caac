use crate::power::SafetyConditions;
use crate::subsystems::{BoardSignals, ButtonGesture};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkStatus {
    pub ble_ready: bool,
    pub ble_connected: bool,
    pub lora_joined: bool,
}

/// Latched wake-up causes. Cleared once consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WakeStatus {
    pub motion_interrupt: bool,
    pub button1_short: bool,
    pub button1_long: bool,
    pub button2_short: bool,
    pub button2_long: bool,
}

impl WakeStatus {
    pub fn latch(&mut self, gesture: ButtonGesture) {
        match gesture {
            ButtonGesture::Button1Short => self.button1_short = true,
            ButtonGesture::Button1Long => self.button1_long = true,
            ButtonGesture::Button2Short => self.button2_short = true,
            ButtonGesture::Button2Long => self.button2_long = true,
        }
    }

    pub fn any_gesture(&self) -> bool {
        self.button1_short || self.button1_long || self.button2_short || self.button2_long
    }

    /// Clears and returns one latched gesture, button 1 first.
    pub fn take_gesture(&mut self) -> Option<ButtonGesture> {
        if core::mem::take(&mut self.button1_short) {
            Some(ButtonGesture::Button1Short)
        } else if core::mem::take(&mut self.button1_long) {
            Some(ButtonGesture::Button1Long)
        } else if core::mem::take(&mut self.button2_short) {
            Some(ButtonGesture::Button2Short)
        } else if core::mem::take(&mut self.button2_long) {
            Some(ButtonGesture::Button2Long)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PowerStatus {
    pub adc_ready: bool,
    pub usb_voltage_mv: u16,
    pub degraded: bool,
}

/// Cross-cutting flags shared by module handlers within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub link: LinkStatus,
    pub wake: WakeStatus,
    pub power: PowerStatus,
}

impl PlatformStatus {
    pub fn apply(&mut self, signals: &BoardSignals) {
        for gesture in &signals.gestures {
            self.wake.latch(*gesture);
        }
        if signals.motion_interrupt {
            self.wake.motion_interrupt = true;
        }
        if let Some(connected) = signals.ble_connected {
            self.link.ble_connected = connected;
        }
        if let Some(ready) = signals.ble_ready {
            self.link.ble_ready = ready;
        }
        if let Some(ready) = signals.adc_ready {
            self.power.adc_ready = ready;
        }
        if let Some(mv) = signals.usb_voltage_mv {
            self.power.usb_voltage_mv = mv;
        }
    }

    /// Any condition that ends the low-power polling loop.
    pub fn wake_pending(&self) -> bool {
        self.wake.motion_interrupt || self.link.ble_connected || self.wake.any_gesture()
    }

    pub fn safety_conditions(&self, join_in_progress: bool) -> SafetyConditions {
        SafetyConditions {
            ble_connected: self.link.ble_connected,
            join_in_progress,
            adc_ready: self.power.adc_ready,
            usb_voltage_mv: self.power.usb_voltage_mv,
        }
    }
}
