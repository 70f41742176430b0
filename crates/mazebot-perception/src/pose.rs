//! Pose estimation.
//!
//! Combines three sources into one [`Pose`] estimate:
//! - **MAIN April tag** – absolute pose from the host's camera; always
//!   overwrites the estimate.
//! - **ADDITIONAL April tag** – absolute pose of a secondary tag; only used
//!   while no MAIN pose arrived within the freshness window.
//! - **Wheel odometry** – encoder deltas from [`Telemetry`] integrated with
//!   differential-drive kinematics on top of the current estimate.
//!
//! A non-finite observation is rejected and latches a fault until
//! [`PoseEstimator::clear_fault`].  All state sits behind one mutex, so
//! [`PoseEstimator::current_pose`] never observes a half-written pose.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use mazebot_perception::pose::PoseEstimator;
//! use mazebot_types::Pose;
//!
//! let estimator = PoseEstimator::new(Duration::from_millis(50));
//! estimator.update_main(Pose::new(100.0, 0.0, 7.0)).unwrap();
//!
//! let pose = estimator.current_pose();
//! assert!(pose.theta <= std::f32::consts::PI);
//! ```

use std::time::{Duration, Instant};

use mazebot_types::{AprilTagType, GetPose, MazeError, Pose, RobotParameters, Telemetry};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

/// Where the latest estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseSource {
    /// Nothing received yet.
    None,
    Main,
    Additional,
    Odometry,
}

#[derive(Debug)]
struct EstimatorState {
    pose: Pose,
    source: PoseSource,
    last_main: Option<Instant>,
    last_fix: Option<Instant>,
    last_encoders: Option<(i16, i16)>,
    fault: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// PoseEstimator
// ────────────────────────────────────────────────────────────────────────────

/// Thread-safe owner of the fused robot pose.
#[derive(Debug)]
pub struct PoseEstimator {
    freshness: Duration,
    state: Mutex<EstimatorState>,
}

impl PoseEstimator {
    /// `freshness` is how long a MAIN pose keeps ADDITIONAL poses out.
    pub fn new(freshness: Duration) -> Self {
        Self {
            freshness,
            state: Mutex::new(EstimatorState {
                pose: Pose::default(),
                source: PoseSource::None,
                last_main: None,
                last_fix: None,
                last_encoders: None,
                fault: None,
            }),
        }
    }

    /// Fold in a MAIN April-tag pose.
    pub fn update_main(&self, pose: Pose) -> Result<(), MazeError> {
        self.update_main_at(pose, Instant::now())
    }

    pub fn update_main_at(&self, pose: Pose, now: Instant) -> Result<(), MazeError> {
        let mut state = self.state.lock();
        check_finite(&mut state, "pose.main", &pose)?;
        state.pose = pose.normalized();
        state.source = PoseSource::Main;
        state.last_main = Some(now);
        state.last_fix = Some(now);
        trace!(x = pose.x, y = pose.y, theta = state.pose.theta, "main pose");
        Ok(())
    }

    /// Fold in an ADDITIONAL April-tag pose.
    ///
    /// Returns whether the pose was applied; it is ignored while a MAIN pose
    /// is fresh.
    pub fn update_additional(&self, pose: Pose) -> Result<bool, MazeError> {
        self.update_additional_at(pose, Instant::now())
    }

    pub fn update_additional_at(&self, pose: Pose, now: Instant) -> Result<bool, MazeError> {
        let mut state = self.state.lock();
        check_finite(&mut state, "pose.additional", &pose)?;
        if let Some(t) = state.last_main
            && now.saturating_duration_since(t) <= self.freshness
        {
            debug!("additional pose ignored, main pose is fresh");
            return Ok(false);
        }
        state.pose = pose.normalized();
        state.source = PoseSource::Additional;
        state.last_fix = Some(now);
        Ok(true)
    }

    /// Integrate wheel encoder movement since the previous telemetry frame.
    ///
    /// The first frame only establishes the encoder baseline.
    pub fn update_odometry(
        &self,
        telemetry: &Telemetry,
        params: &RobotParameters,
    ) -> Result<(), MazeError> {
        let mut state = self.state.lock();
        let right = telemetry.encoder1;
        let left = telemetry.encoder2;
        let Some((prev_right, prev_left)) = state.last_encoders.replace((right, left)) else {
            return Ok(());
        };

        let dr = right.wrapping_sub(prev_right) as f32 * params.dist_per_tick;
        let dl = left.wrapping_sub(prev_left) as f32 * params.dist_per_tick;
        let dist = (dr + dl) / 2.0;
        let dtheta = (dr - dl) / params.axle_width;
        let heading = state.pose.theta + dtheta / 2.0;
        let next = Pose::new(
            state.pose.x + dist * heading.cos(),
            state.pose.y + dist * heading.sin(),
            state.pose.theta + dtheta,
        );
        check_finite(&mut state, "pose.odometry", &next)?;
        state.pose = next.normalized();
        if state.source == PoseSource::None {
            state.source = PoseSource::Odometry;
        }
        Ok(())
    }

    /// Copy of the current estimate.
    pub fn current_pose(&self) -> Pose {
        self.state.lock().pose
    }

    /// Source of the last absolute fix, or odometry if there was none.
    pub fn source(&self) -> PoseSource {
        self.state.lock().source
    }

    /// Time of the last absolute (April-tag) fix.
    pub fn last_fix(&self) -> Option<Instant> {
        self.state.lock().last_fix
    }

    /// Overwrite the estimate, e.g. when the robot is placed at a known start.
    pub fn reset(&self, pose: Pose) {
        let mut state = self.state.lock();
        state.pose = pose.normalized();
        state.source = PoseSource::None;
        state.last_main = None;
        state.last_fix = None;
    }

    pub fn is_faulted(&self) -> bool {
        self.state.lock().fault.is_some()
    }

    /// Description of the latched fault, if any.
    pub fn fault(&self) -> Option<String> {
        self.state.lock().fault.clone()
    }

    pub fn clear_fault(&self) {
        self.state.lock().fault = None;
    }

    /// Request the host to send the pose of `tag`.
    pub fn pose_request(&self, tag: AprilTagType) -> GetPose {
        GetPose { april_tag: tag }
    }
}

fn check_finite(state: &mut EstimatorState, component: &str, pose: &Pose) -> Result<(), MazeError> {
    if pose.is_finite() {
        return Ok(());
    }
    let details = format!("non-finite pose ({}, {}, {})", pose.x, pose.y, pose.theta);
    error!(component, %details, "pose fault latched");
    state.fault = Some(details.clone());
    Err(MazeError::FatalSensorFault {
        component: component.to_string(),
        details,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};
    use std::sync::Arc;
    use std::thread;

    const FRESH: Duration = Duration::from_millis(50);

    fn params() -> RobotParameters {
        RobotParameters {
            axle_width: 100.0,
            dist_per_tick: 1.0,
            user1: 0.0,
            user2: 0.0,
        }
    }

    fn telemetry(right: i16, left: i16) -> Telemetry {
        Telemetry {
            encoder1: right,
            encoder2: left,
            ..Default::default()
        }
    }

    #[test]
    fn starts_at_origin_without_fix() {
        let est = PoseEstimator::new(FRESH);
        assert_eq!(est.current_pose(), Pose::default());
        assert_eq!(est.source(), PoseSource::None);
        assert!(est.last_fix().is_none());
    }

    #[test]
    fn main_pose_overwrites_and_normalizes() {
        let est = PoseEstimator::new(FRESH);
        est.update_main(Pose::new(10.0, 20.0, 3.0 * PI - 0.5)).unwrap();
        let pose = est.current_pose();
        assert_eq!((pose.x, pose.y), (10.0, 20.0));
        assert!((pose.theta - (PI - 0.5)).abs() < 1e-4);
        assert_eq!(est.source(), PoseSource::Main);
    }

    #[test]
    fn additional_ignored_while_main_is_fresh() {
        let t0 = Instant::now();
        let est = PoseEstimator::new(FRESH);
        est.update_main_at(Pose::new(1.0, 1.0, 0.0), t0).unwrap();

        let applied = est
            .update_additional_at(Pose::new(9.0, 9.0, 0.0), t0 + Duration::from_millis(10))
            .unwrap();
        assert!(!applied);
        assert_eq!(est.current_pose().x, 1.0);

        let applied = est
            .update_additional_at(Pose::new(9.0, 9.0, 0.0), t0 + Duration::from_millis(80))
            .unwrap();
        assert!(applied);
        assert_eq!(est.current_pose().x, 9.0);
        assert_eq!(est.source(), PoseSource::Additional);
    }

    #[test]
    fn additional_used_without_any_main() {
        let est = PoseEstimator::new(FRESH);
        assert!(est.update_additional(Pose::new(5.0, 0.0, 0.0)).unwrap());
    }

    #[test]
    fn non_finite_pose_latches_fault() {
        let est = PoseEstimator::new(FRESH);
        est.update_main(Pose::new(1.0, 2.0, 0.0)).unwrap();
        let err = est.update_main(Pose::new(f32::NAN, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, MazeError::FatalSensorFault { .. }));
        assert!(est.is_faulted());
        // Rejected pose did not overwrite the estimate.
        assert_eq!(est.current_pose().x, 1.0);

        est.clear_fault();
        assert!(!est.is_faulted());
        assert!(est.fault().is_none());
    }

    #[test]
    fn odometry_first_frame_is_baseline() {
        let est = PoseEstimator::new(FRESH);
        est.update_odometry(&telemetry(500, 500), &params()).unwrap();
        assert_eq!(est.current_pose(), Pose::default());
    }

    #[test]
    fn odometry_straight_line() {
        let est = PoseEstimator::new(FRESH);
        est.update_odometry(&telemetry(0, 0), &params()).unwrap();
        est.update_odometry(&telemetry(100, 100), &params()).unwrap();
        let pose = est.current_pose();
        assert!((pose.x - 100.0).abs() < 1e-3);
        assert!(pose.y.abs() < 1e-3);
        assert!(pose.theta.abs() < 1e-6);
        assert_eq!(est.source(), PoseSource::Odometry);
    }

    #[test]
    fn odometry_turn_in_place() {
        let est = PoseEstimator::new(FRESH);
        est.update_odometry(&telemetry(0, 0), &params()).unwrap();
        // Right wheel forward, left backward: counter-clockwise turn.
        let quarter = (FRAC_PI_2 * 50.0).round() as i16;
        est.update_odometry(&telemetry(quarter, -quarter), &params())
            .unwrap();
        let pose = est.current_pose();
        assert!(pose.x.abs() < 1e-3 && pose.y.abs() < 1e-3);
        assert!((pose.theta - FRAC_PI_2).abs() < 0.02, "{}", pose.theta);
    }

    #[test]
    fn odometry_handles_counter_wrap() {
        let est = PoseEstimator::new(FRESH);
        est.update_odometry(&telemetry(i16::MAX - 4, i16::MAX - 4), &params())
            .unwrap();
        est.update_odometry(&telemetry(i16::MIN + 5, i16::MIN + 5), &params())
            .unwrap();
        assert!((est.current_pose().x - 10.0).abs() < 1e-3);
    }

    #[test]
    fn odometry_builds_on_absolute_fix() {
        let est = PoseEstimator::new(FRESH);
        est.update_main(Pose::new(0.0, 0.0, FRAC_PI_2)).unwrap();
        est.update_odometry(&telemetry(0, 0), &params()).unwrap();
        est.update_odometry(&telemetry(10, 10), &params()).unwrap();
        let pose = est.current_pose();
        assert!(pose.x.abs() < 1e-3);
        assert!((pose.y - 10.0).abs() < 1e-3);
    }

    #[test]
    fn pose_request_carries_tag() {
        let est = PoseEstimator::new(FRESH);
        assert_eq!(
            est.pose_request(AprilTagType::Additional).april_tag,
            AprilTagType::Additional
        );
    }

    #[test]
    fn reset_places_robot() {
        let est = PoseEstimator::new(FRESH);
        est.update_main(Pose::new(1.0, 1.0, 1.0)).unwrap();
        est.reset(Pose::new(-5.0, 5.0, 0.0));
        assert_eq!(est.current_pose(), Pose::new(-5.0, 5.0, 0.0));
        assert!(est.last_fix().is_none());
    }

    /// Writers keep `y == 2x`; a torn read would break the relation.
    #[test]
    fn concurrent_reads_are_never_torn() {
        let est = Arc::new(PoseEstimator::new(FRESH));
        let writer = {
            let est = est.clone();
            thread::spawn(move || {
                for i in 0..5_000 {
                    let x = i as f32;
                    est.update_main(Pose::new(x, 2.0 * x, 0.0)).unwrap();
                }
            })
        };
        for _ in 0..5_000 {
            let p = est.current_pose();
            assert_eq!(p.y, 2.0 * p.x);
        }
        writer.join().unwrap();
    }
}
