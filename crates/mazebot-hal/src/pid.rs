//! PID (Proportional–Integral–Derivative) controller.
//!
//! The path follower uses it to turn heading error into steering.  The
//! controller can wrap its error into `(−π, π]` so that a target just across
//! the ±π seam produces a short turn instead of a full revolution.
//!
//! # Example
//!
//! ```rust
//! use mazebot_hal::pid::PidController;
//!
//! let mut pid = PidController::new(4000.0, 0.0, 0.0).with_angle_wrap();
//! pid.set_output_limits(-8191.0, 8191.0);
//! pid.set_set_point(0.0);
//!
//! // Heading 0.1 rad left of the target: steer clockwise (positive).
//! let steering = pid.update(0.1, 0.02);
//! assert!(steering > 0.0);
//! ```

use mazebot_types::normalize_angle;

/// A tunable PID controller for closed-loop feedback control.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    set_point: f32,
    integral: f32,
    last_error: Option<f32>,
    output_min: f32,
    output_max: f32,
    wrap_angles: bool,
}

impl PidController {
    /// Create a new controller with the given gains.
    ///
    /// Output is unclamped by default (`f32::NEG_INFINITY` to `f32::INFINITY`).
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            set_point: 0.0,
            integral: 0.0,
            last_error: None,
            output_min: f32::NEG_INFINITY,
            output_max: f32::INFINITY,
            wrap_angles: false,
        }
    }

    /// Treat set-point and measurement as angles in radians.
    pub fn with_angle_wrap(mut self) -> Self {
        self.wrap_angles = true;
        self
    }

    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    pub fn set_set_point(&mut self, set_point: f32) {
        self.set_point = set_point;
    }

    pub fn set_point(&self) -> f32 {
        self.set_point
    }

    /// Clamp the controller output (and the integral contribution) to
    /// `[min, max]`.
    pub fn set_output_limits(&mut self, min: f32, max: f32) {
        self.output_min = min;
        self.output_max = max;
    }

    /// Compute the next output from a measurement.
    ///
    /// The error is `measurement − set_point`, so a measurement above the
    /// set-point yields a positive output.  Returns `0.0` without touching
    /// internal state if `dt` is not positive or the error is not finite.
    pub fn update(&mut self, measurement: f32, dt: f32) -> f32 {
        let mut error = measurement - self.set_point;
        if self.wrap_angles {
            error = normalize_angle(error);
        }
        self.update_error(error, dt)
    }

    /// Compute the next output from an error the caller already computed.
    pub fn update_error(&mut self, error: f32, dt: f32) -> f32 {
        if dt <= 0.0 || !error.is_finite() {
            return 0.0;
        }

        let p = self.kp * error;

        self.integral += error * dt;
        let i = (self.ki * self.integral).clamp(self.output_min, self.output_max);
        // Back-calculate so the accumulator never exceeds the limits.
        if self.ki.abs() > f32::EPSILON {
            self.integral = i / self.ki;
        }

        let d = match self.last_error {
            Some(prev) => {
                let mut delta = error - prev;
                if self.wrap_angles {
                    delta = normalize_angle(delta);
                }
                self.kd * delta / dt
            }
            None => 0.0,
        };
        self.last_error = Some(error);

        (p + i + d).clamp(self.output_min, self.output_max)
    }

    /// Reset the integral accumulator and derivative memory.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
    }
}
