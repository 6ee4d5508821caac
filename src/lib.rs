//! # Asset Tracker
//!
//! Cooperative state-machine engine and system orchestration for a
//! battery-powered asset tracker.
//!
//! ## Features
//!
//! - **Table-driven engine**: `const` state, event, transition and module tables
//! - **Event arbitration**: one priority-ordered normal slot plus a critical slot
//! - **Timeout policies**: fixed, on-entry and watchdog deadlines per state
//! - **Reboot persistence**: states that may only be entered from a cold reset
//! - **Decimation scheduling**: low-rate task triggers derived from one tick
//! - **Power coordination**: deferred low-power entry once nothing vetoes it
//!
//! ## Quick Start
//!
//! ```rust
//! use asset_tracker::{SimTracker, TrackerConfig};
//!
//! let mut tracker = SimTracker::simulated(TrackerConfig::default()).unwrap();
//! tracker.start();
//!
//! for _ in 0..5 {
//!     let report = tracker.update().unwrap();
//!     if let Some(t) = report.transition {
//!         println!("{} -> {}", t.from, t.to);
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`engine`] - Generic machine: tables, event queue, timeouts, `cycle`
//! - [`orchestrator`] - The tracker's tables and handlers
//! - [`persistence`] - Backup registers and the reboot gate
//! - [`scheduler`] - Decimation of the driving tick
//! - [`power`] - Run/LowPower coordinator and Wait readiness
//! - [`subsystems`] - Board and peripheral boundary, plus a host simulation
//! - [`tracker`] - One boot of the firmware
//! - [`telemetry`] - JSON snapshots

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod persistence;
pub mod power;
pub mod scheduler;
pub mod subsystems;
pub mod telemetry;
pub mod tracker;

pub use config::TrackerConfig;
pub use engine::{Engine, EngineError, EngineResult, Priority};
pub use orchestrator::{AppEvent, AppState, MACHINE};
pub use tracker::{SimTracker, Tracker, TrackerError};
