//! `mazebot-hal` – the boundary to the motors.
//!
//! - [`drive`] – the [`DriveSink`][drive::DriveSink] trait the control loop
//!   writes wheel setpoints to, with logging and recording sinks.
//! - [`pid`] – PID controller used for heading control.

pub mod drive;
pub mod pid;

pub use drive::{DriveSink, LoggingDrive, RecordingDrive};
pub use pid::PidController;
