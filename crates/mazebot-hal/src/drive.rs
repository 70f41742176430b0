//! Wheel drive output.
//!
//! The control loop is the only writer of drive commands.  It hands every
//! verified [`DriveCommand`] to a [`DriveSink`]; the motor driver behind the
//! sink is an external collaborator, so the loop never depends on hardware.

use std::sync::Arc;

use mazebot_types::{DriveCommand, MazeError};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Destination of drive setpoints (motor driver, simulator, test double).
pub trait DriveSink: Send {
    /// Apply `cmd` to the wheels.
    ///
    /// # Errors
    ///
    /// Returns [`MazeError::FatalSensorFault`] if the driver reports a fault.
    fn apply(&mut self, cmd: DriveCommand) -> Result<(), MazeError>;

    /// The command most recently applied.
    fn current(&self) -> DriveCommand;
}

/// Logs every change of setpoint; used when no motor driver is attached.
#[derive(Debug, Default)]
pub struct LoggingDrive {
    current: DriveCommand,
}

impl LoggingDrive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DriveSink for LoggingDrive {
    fn apply(&mut self, cmd: DriveCommand) -> Result<(), MazeError> {
        if cmd != self.current {
            info!(speed = cmd.speed, steering = cmd.steering, "drive setpoint");
        } else {
            debug!(speed = cmd.speed, steering = cmd.steering, "drive setpoint held");
        }
        self.current = cmd;
        Ok(())
    }

    fn current(&self) -> DriveCommand {
        self.current
    }
}

/// Keeps the full command history behind a shared handle.
///
/// Clones share the same history, so a test can keep one clone while the
/// controller owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingDrive {
    history: Arc<Mutex<Vec<DriveCommand>>>,
}

impl RecordingDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command applied so far, oldest first.
    pub fn history(&self) -> Vec<DriveCommand> {
        self.history.lock().clone()
    }

    pub fn last(&self) -> Option<DriveCommand> {
        self.history.lock().last().copied()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }
}

impl DriveSink for RecordingDrive {
    fn apply(&mut self, cmd: DriveCommand) -> Result<(), MazeError> {
        self.history.lock().push(cmd);
        Ok(())
    }

    fn current(&self) -> DriveCommand {
        self.last().unwrap_or_default()
    }
}
