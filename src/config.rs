use crate::scheduler::TaskId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driving tick of the system manager.
pub const DEFAULT_TICK_PERIOD_MS: u32 = 100;
pub const DEFAULT_JOIN_TIMEOUT_MS: u32 = 15_000;
pub const DEFAULT_USB_VOLTAGE_THRESHOLD_MV: u16 = 4_000;
pub const DEFAULT_BLE_FAILURE_LIMIT: u32 = 3;
pub const DEFAULT_LOW_POWER_POLL_LIMIT: u32 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("tick period must be non-zero")]
    ZeroTickPeriod,
    #[error("interval for {0:?} must be non-zero")]
    ZeroInterval(TaskId),
    #[error("BLE failure limit must be at least 1")]
    ZeroFailureLimit,
    #[error("low-power poll limit must be at least 1")]
    ZeroPollLimit,
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInterval {
    pub interval_ms: u32,
    /// Fire once as soon as the interval is applied.
    pub immediate: bool,
}

impl TaskInterval {
    pub const fn new(interval_ms: u32, immediate: bool) -> Self {
        Self { interval_ms, immediate }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskIntervals {
    pub lora_join: TaskInterval,
    pub lora_send: TaskInterval,
    pub ble_housekeeping: TaskInterval,
    pub status_refresh: TaskInterval,
    pub tag_persistence: TaskInterval,
    pub position_read: TaskInterval,
}

impl TaskIntervals {
    pub fn get(&self, task: TaskId) -> TaskInterval {
        match task {
            TaskId::LoraJoin => self.lora_join,
            TaskId::LoraSend => self.lora_send,
            TaskId::BleHousekeeping => self.ble_housekeeping,
            TaskId::StatusRefresh => self.status_refresh,
            TaskId::TagPersistence => self.tag_persistence,
            TaskId::PositionRead => self.position_read,
        }
    }
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            lora_join: TaskInterval::new(20_000, false),
            lora_send: TaskInterval::new(60_000, true),
            ble_housekeeping: TaskInterval::new(5_000, true),
            status_refresh: TaskInterval::new(60_000, false),
            tag_persistence: TaskInterval::new(30_000, true),
            position_read: TaskInterval::new(1_000, false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub tick_period_ms: u32,
    pub tasks: TaskIntervals,
    pub join_timeout_ms: u32,
    /// Low power is refused while USB is above this voltage.
    pub usb_voltage_threshold_mv: u16,
    pub ble_failure_limit: u32,
    /// Polls of the board task runner per LowPower module call.
    pub low_power_poll_limit: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            tasks: TaskIntervals::default(),
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            usb_voltage_threshold_mv: DEFAULT_USB_VOLTAGE_THRESHOLD_MV,
            ble_failure_limit: DEFAULT_BLE_FAILURE_LIMIT,
            low_power_poll_limit: DEFAULT_LOW_POWER_POLL_LIMIT,
        }
    }
}

impl TrackerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_ms == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if let Some(task) = TaskId::ALL.iter().copied().find(|t| self.tasks.get(*t).interval_ms == 0) {
            return Err(ConfigError::ZeroInterval(task));
        }
        if self.ble_failure_limit == 0 {
            return Err(ConfigError::ZeroFailureLimit);
        }
        if self.low_power_poll_limit == 0 {
            return Err(ConfigError::ZeroPollLimit);
        }
        Ok(())
    }
}
