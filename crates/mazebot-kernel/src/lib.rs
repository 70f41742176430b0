//! `mazebot-kernel` – Safety
//!
//! Enforces rules on what reaches the wheels; it makes no decisions itself.
//!
//! # Modules
//!
//! - [`state_verifier`] – [`StateVerifier`][state_verifier::StateVerifier]:
//!   a rule engine that validates every [`DriveCommand`][mazebot_types::DriveCommand]
//!   against the wire range and the configured robot limits before it is
//!   actuated.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]:
//!   tracks heartbeats from pose sources and links and reports the ones that
//!   went silent.

pub mod state_verifier;
pub mod watchdog;

pub use state_verifier::{Rule, SpeedCapRule, StateVerifier, WireRangeRule};
pub use watchdog::{ComponentHealth, Watchdog};
