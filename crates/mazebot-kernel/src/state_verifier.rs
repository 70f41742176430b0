//! [`StateVerifier`] – drive command interlock.
//!
//! Before a [`DriveCommand`] reaches the motors, pass it through
//! [`StateVerifier::verify`].  Every registered [`Rule`] is evaluated in
//! order; the first violation returns a [`MazeError::LimitViolation`] and the
//! command is **not** applied.
//!
//! Two built-in rules are provided:
//! - [`WireRangeRule`] – rejects values outside `[-8191, 8191]`.
//! - [`SpeedCapRule`] – rejects speed or steering magnitudes above the
//!   configured robot limits.

use mazebot_types::{DRIVE_LIMIT, DriveCommand, MazeError};
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single invariant a drive command must satisfy.
pub trait Rule: Send + Sync {
    /// Human-readable name used in fault messages.
    fn name(&self) -> &str;

    /// Return `Ok(())` when `cmd` satisfies the invariant.
    fn check(&self, cmd: &DriveCommand) -> Result<(), MazeError>;
}

// ────────────────────────────────────────────────────────────────────────────
// StateVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine that validates a [`DriveCommand`] against all registered
/// [`Rule`]s.
///
/// # Example
///
/// ```
/// use mazebot_kernel::state_verifier::{SpeedCapRule, StateVerifier};
/// use mazebot_types::DriveCommand;
///
/// let mut verifier = StateVerifier::new();
/// verifier.add_rule(Box::new(SpeedCapRule { max_speed: 4000, max_steering: 4000 }));
///
/// assert!(verifier.verify(&DriveCommand::new(3000, -200)).is_ok());
/// assert!(verifier.verify(&DriveCommand::new(5000, 0)).is_err());
/// ```
#[derive(Default)]
pub struct StateVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl StateVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifier preloaded with [`WireRangeRule`] and a [`SpeedCapRule`].
    pub fn with_limits(max_speed: i16, max_steering: i16) -> Self {
        let mut v = Self::new();
        v.add_rule(Box::new(WireRangeRule));
        v.add_rule(Box::new(SpeedCapRule {
            max_speed,
            max_steering,
        }));
        v
    }

    /// Register a new [`Rule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Validate `cmd` against every registered rule.
    pub fn verify(&self, cmd: &DriveCommand) -> Result<(), MazeError> {
        for rule in &self.rules {
            rule.check(cmd)?;
        }
        Ok(())
    }

    /// `cmd` if it passes every rule, otherwise a stop command.
    pub fn verified_or_stop(&self, cmd: DriveCommand) -> DriveCommand {
        match self.verify(&cmd) {
            Ok(()) => cmd,
            Err(e) => {
                warn!(speed = cmd.speed, steering = cmd.steering, error = %e, "drive command rejected");
                DriveCommand::STOP
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects commands outside the drive value range of the wire protocol.
pub struct WireRangeRule;

impl Rule for WireRangeRule {
    fn name(&self) -> &str {
        "wire_range"
    }

    fn check(&self, cmd: &DriveCommand) -> Result<(), MazeError> {
        for (field, value) in [("speed", cmd.speed), ("steering", cmd.steering)] {
            if !(-DRIVE_LIMIT..=DRIVE_LIMIT).contains(&value) {
                return Err(MazeError::LimitViolation {
                    rule: self.name().to_string(),
                    details: format!("{field} {value} outside ±{DRIVE_LIMIT}"),
                });
            }
        }
        Ok(())
    }
}

/// Rejects commands whose speed or steering magnitude exceeds a cap.
pub struct SpeedCapRule {
    pub max_speed: i16,
    pub max_steering: i16,
}

impl Rule for SpeedCapRule {
    fn name(&self) -> &str {
        "speed_cap"
    }

    fn check(&self, cmd: &DriveCommand) -> Result<(), MazeError> {
        if cmd.speed.unsigned_abs() > self.max_speed.unsigned_abs() {
            return Err(MazeError::LimitViolation {
                rule: self.name().to_string(),
                details: format!("speed {} exceeds cap {}", cmd.speed, self.max_speed),
            });
        }
        if cmd.steering.unsigned_abs() > self.max_steering.unsigned_abs() {
            return Err(MazeError::LimitViolation {
                rule: self.name().to_string(),
                details: format!("steering {} exceeds cap {}", cmd.steering, self.max_steering),
            });
        }
        Ok(())
    }
}
