//! Durable backup registers and the reboot gate.
//!
//! Entering a reboot-flagged state is a two-phase commit: persist the
//! target id, reset, then on the next boot find the marker equal to the
//! state being entered and clear it. The gate functions below only speak
//! the [`Platform`] marker contract; [`BackupRegisters`] is the typed view of
//! the register file the board implements it with.

use crate::engine::{EngineError, EngineResult, Platform, StateId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const REGISTER_COUNT: usize = 32;

pub const CHECK_WORD_0: u32 = 0xA6;
pub const CHECK_WORD_1: u32 = 0xA7;

pub const BLE_FAILURE_LIMIT: u32 = 3;

/// Fixed slots in the backup register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    CheckWord0 = 0,
    CheckWord1 = 1,
    BootReason = 2,
    WakeReason = 3,
    BleHealth = 10,
    StateMarker = 11,
}

impl Slot {
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootReason {
    Normal = 0,
    None = 1,
    Dfu = 2,
    Option1 = 3,
    Option2 = 4,
    Option3 = 5,
    BootUpdate = 6,
}

impl BootReason {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(BootReason::Normal),
            1 => Some(BootReason::None),
            2 => Some(BootReason::Dfu),
            3 => Some(BootReason::Option1),
            4 => Some(BootReason::Option2),
            5 => Some(BootReason::Option3),
            6 => Some(BootReason::BootUpdate),
            _ => None,
        }
    }
}

/// What the bring-up path must do after reading the registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootAction {
    Continue,
    /// Reset once more before running the application.
    Reset,
    /// Hand over to the system bootloader.
    EnterDfu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    pub cold_boot: bool,
    pub reason: Option<BootReason>,
    pub action: BootAction,
    pub wake_reason: u32,
    pub ble_failures: u32,
    /// The short-range radio failed to come up too many times in a row.
    pub degraded: bool,
    pub marker: StateId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("register flush failed")]
    Flush,
    #[error("slot {slot:?} read back {read:#x} after writing {wrote:#x}")]
    Verify { slot: Slot, wrote: u32, read: u32 },
}

impl From<PersistError> for EngineError {
    fn from(_: PersistError) -> Self {
        EngineError::Generic
    }
}

/// Raw fixed-width register file that survives a reset.
pub trait RegisterBank {
    fn read(&self, index: usize) -> u32;
    fn write(&mut self, index: usize, value: u32);
    fn flush(&mut self) -> Result<(), PersistError>;
}

/// RAM-backed bank for simulation. Owned outside the firmware so it
/// survives simulated resets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRegisters {
    registers: [u32; REGISTER_COUNT],
    write_protected: bool,
    flush_count: u32,
}

impl MemoryRegisters {
    pub fn new() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            write_protected: false,
            flush_count: 0,
        }
    }

    /// Drops every write, which makes read-back verification fail.
    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    pub fn flush_count(&self) -> u32 {
        self.flush_count
    }
}

impl Default for MemoryRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank for MemoryRegisters {
    fn read(&self, index: usize) -> u32 {
        self.registers.get(index).copied().unwrap_or(0)
    }

    fn write(&mut self, index: usize, value: u32) {
        if self.write_protected {
            return;
        }
        if let Some(register) = self.registers.get_mut(index) {
            *register = value;
        }
    }

    fn flush(&mut self) -> Result<(), PersistError> {
        self.flush_count += 1;
        Ok(())
    }
}

/// Typed access to the slots of a [`RegisterBank`].
#[derive(Debug, Clone)]
pub struct BackupRegisters<R: RegisterBank> {
    bank: R,
    failure_limit: u32,
    default_state: StateId,
}

impl<R: RegisterBank> BackupRegisters<R> {
    pub fn new(bank: R, default_state: StateId) -> Self {
        Self {
            bank,
            failure_limit: BLE_FAILURE_LIMIT,
            default_state,
        }
    }

    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.failure_limit = limit.max(1);
        self
    }

    pub fn bank(&self) -> &R {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut R {
        &mut self.bank
    }

    pub fn into_bank(self) -> R {
        self.bank
    }

    /// Write, flush and read back. Nothing may reset the board until this
    /// returns `Ok`.
    pub fn commit(&mut self, slot: Slot, value: u32) -> Result<(), PersistError> {
        self.bank.write(slot.index(), value);
        self.bank.flush()?;
        let read = self.bank.read(slot.index());
        if read != value {
            error!(?slot, wrote = value, read, "backup register verification failed");
            return Err(PersistError::Verify { slot, wrote: value, read });
        }
        Ok(())
    }

    /// Runs once per boot, before the engine is built. A cold boot (check
    /// words missing) initialises every slot and asks for one more reset.
    pub fn boot(&mut self) -> Result<BootInfo, PersistError> {
        let valid = self.bank.read(Slot::CheckWord0.index()) == CHECK_WORD_0
            && self.bank.read(Slot::CheckWord1.index()) == CHECK_WORD_1;

        if !valid {
            info!("backup registers uninitialised, formatting");
            for index in 0..REGISTER_COUNT {
                self.bank.write(index, 0);
            }
            self.commit(Slot::CheckWord0, CHECK_WORD_0)?;
            self.commit(Slot::CheckWord1, CHECK_WORD_1)?;
            self.commit(Slot::StateMarker, u32::from(self.default_state.0))?;
            return Ok(BootInfo {
                cold_boot: true,
                reason: None,
                action: BootAction::Reset,
                wake_reason: 0,
                ble_failures: 0,
                degraded: false,
                marker: self.default_state,
            });
        }

        let mut ble_failures = self.ble_failures();
        let degraded = ble_failures >= self.failure_limit;
        if degraded {
            warn!(ble_failures, "short-range radio failed repeatedly, booting degraded");
            ble_failures = self.failure_limit;
            self.commit(Slot::BleHealth, ble_failures)?;
        }

        let reason = BootReason::from_raw(self.bank.read(Slot::BootReason.index()));
        let action = match reason {
            // Power-on path: reset once more so peripherals start clean.
            Some(BootReason::Normal) => {
                self.set_boot_reason(BootReason::None)?;
                BootAction::Reset
            }
            Some(BootReason::Dfu) => {
                self.set_boot_reason(BootReason::Normal)?;
                BootAction::EnterDfu
            }
            Some(_) | None => {
                self.set_boot_reason(BootReason::Normal)?;
                BootAction::Continue
            }
        };
        debug!(?reason, ?action, "boot reason evaluated");

        Ok(BootInfo {
            cold_boot: false,
            reason,
            action,
            wake_reason: self.wake_reason(),
            ble_failures,
            degraded,
            marker: self.state_marker(),
        })
    }

    /// Repeats [`boot`](Self::boot) while it asks for a reset, the way a
    /// host simulation replays bring-up.
    pub fn boot_settled(&mut self) -> Result<BootInfo, PersistError> {
        let mut info = self.boot()?;
        for _ in 0..3 {
            if info.action != BootAction::Reset {
                break;
            }
            info = self.boot()?;
        }
        Ok(info)
    }

    pub fn boot_reason(&self) -> Option<BootReason> {
        BootReason::from_raw(self.bank.read(Slot::BootReason.index()))
    }

    pub fn set_boot_reason(&mut self, reason: BootReason) -> Result<(), PersistError> {
        self.commit(Slot::BootReason, reason as u32)
    }

    pub fn wake_reason(&self) -> u32 {
        self.bank.read(Slot::WakeReason.index())
    }

    pub fn set_wake_reason(&mut self, reason: u32) -> Result<(), PersistError> {
        self.commit(Slot::WakeReason, reason)
    }

    pub fn ble_failures(&self) -> u32 {
        self.bank.read(Slot::BleHealth.index())
    }

    pub fn increment_ble_failures(&mut self) -> Result<u32, PersistError> {
        let count = self.ble_failures().saturating_add(1);
        self.commit(Slot::BleHealth, count)?;
        Ok(count)
    }

    pub fn reset_ble_failures(&mut self) -> Result<(), PersistError> {
        self.commit(Slot::BleHealth, 0)
    }

    pub fn failure_limit(&self) -> u32 {
        self.failure_limit
    }

    pub fn state_marker(&self) -> StateId {
        let raw = self.bank.read(Slot::StateMarker.index());
        u8::try_from(raw).map_or(StateId(u8::MAX), StateId)
    }

    pub fn set_state_marker(&mut self, state: StateId) -> Result<(), PersistError> {
        self.commit(Slot::StateMarker, u32::from(state.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryGate {
    Proceed,
    Reboot,
}

/// Decides whether entering `target` needs a reset. A marker equal to the
/// target means this boot already is that reset: the marker is cleared back
/// to `cleared` and entry proceeds. Otherwise the target is persisted and
/// the caller must reset.
pub fn guard_entry<P: Platform + ?Sized>(platform: &mut P, target: StateId, cleared: StateId) -> EngineResult<EntryGate> {
    let marker = platform.load_persisted_state();
    if marker == target {
        platform.save_persisted_state(cleared)?;
        Ok(EntryGate::Proceed)
    } else {
        platform.save_persisted_state(target)?;
        Ok(EntryGate::Reboot)
    }
}

/// True when the marker holds a reset target that is neither the active
/// state nor the cleared value.
pub fn armed_elsewhere<P: Platform + ?Sized>(platform: &mut P, current: StateId, cleared: StateId) -> bool {
    let marker = platform.load_persisted_state();
    marker != current && marker != cleared
}
