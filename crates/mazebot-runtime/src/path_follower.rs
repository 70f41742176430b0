//! [`PathFollower`] – turns a waypoint list into drive commands.
//!
//! # State machine
//!
//! | From | Command | To |
//! |---|---|---|
//! | IDLE / READY | NEWPATH | READY (path loaded or replaced) |
//! | READY | START | RUNNING (rewinds a completed path) |
//! | RUNNING | PAUSE | PAUSED |
//! | PAUSED | START | RUNNING (same target as before) |
//! | READY / RUNNING / PAUSED / FAULTED | RESET | IDLE |
//! | RUNNING | NEWPATH | FAULTED |
//! | any | fatal pose fault | FAULTED |
//!
//! Every other command leaves the state alone and sets
//! [`FollowerErrorCode::InvalidTransition`] in the status, except while
//! FAULTED, where the fault code is kept.
//!
//! # Control law
//!
//! While RUNNING, [`PathFollower::step`] projects the robot onto the current
//! segment, picks a point `lookahead_distance` further along it and steers
//! towards that point with a heading PID.  Speed is scaled down by heading
//! misalignment and, on the last segment, by the remaining distance.  A
//! waypoint is passed once the robot is within `position_tolerance` of it;
//! at most `segment_limit` waypoints are passed per cycle.

use mazebot_hal::PidController;
use mazebot_perception::LabyrinthMap;
use mazebot_types::{
    DRIVE_LIMIT, DriveCommand, FPoint, FollowerErrorCode, FollowerState, MazeError,
    PathFollowerCommand, PathFollowerControl, PathFollowerParameters, PathFollowerStatus, Point,
    Pose, normalize_angle,
};
use tracing::{debug, info, warn};

/// Fraction of cruise speed kept when arriving at the final waypoint.
const MIN_APPROACH_SCALE: f32 = 0.2;

pub struct PathFollower {
    state: FollowerState,
    error: FollowerErrorCode,
    params: PathFollowerParameters,
    pid: PidController,
    max_speed: i16,
    max_steering: i16,
    path: Vec<FPoint>,
    /// Index of the waypoint currently being approached.
    target: usize,
    /// Start of the current segment; the robot's position when the run began
    /// for the first segment.
    origin: Option<FPoint>,
    lookahead: FPoint,
    completed: bool,
}

impl PathFollower {
    pub fn new(params: PathFollowerParameters) -> Self {
        let mut pid = PidController::new(params.steering_gain, 0.0, 0.0).with_angle_wrap();
        let limit = f32::from(DRIVE_LIMIT);
        pid.set_output_limits(-limit, limit);
        Self {
            state: FollowerState::Idle,
            error: FollowerErrorCode::None,
            params,
            pid,
            max_speed: DRIVE_LIMIT,
            max_steering: DRIVE_LIMIT,
            path: Vec::new(),
            target: 0,
            origin: None,
            lookahead: FPoint::default(),
            completed: false,
        }
    }

    /// Cap the emitted speed and steering magnitudes.
    pub fn with_limits(mut self, max_speed: i16, max_steering: i16) -> Self {
        self.max_speed = max_speed.clamp(0, DRIVE_LIMIT);
        self.max_steering = max_steering.clamp(0, DRIVE_LIMIT);
        let limit = f32::from(self.max_steering);
        self.pid.set_output_limits(-limit, limit);
        self
    }

    pub fn set_params(&mut self, params: PathFollowerParameters) {
        self.params = params;
        self.pid.set_gains(params.steering_gain, 0.0, 0.0);
        self.pid.reset();
    }

    pub fn params(&self) -> &PathFollowerParameters {
        &self.params
    }

    pub fn state(&self) -> FollowerState {
        self.state
    }

    pub fn error(&self) -> FollowerErrorCode {
        self.error
    }

    /// Number of waypoints already reached.
    pub fn progress_index(&self) -> usize {
        self.target
    }

    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    /// Fraction of waypoints reached.
    pub fn progress(&self) -> f32 {
        if self.completed {
            1.0
        } else if self.path.is_empty() {
            0.0
        } else {
            self.target as f32 / self.path.len() as f32
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Commands
    // ────────────────────────────────────────────────────────────────────────

    /// Apply one host command.
    ///
    /// # Errors
    ///
    /// - [`MazeError::InvalidTransition`] when the command does not apply in
    ///   the current state (the state is unchanged, except for NEWPATH while
    ///   RUNNING which faults the follower).
    /// - [`MazeError::InvalidParameter`] for a NEWPATH without points.
    pub fn handle(&mut self, control: &PathFollowerControl) -> Result<(), MazeError> {
        use FollowerState::*;
        use PathFollowerCommand::*;

        match (self.state, control.command) {
            (Idle | Ready, NewPath) if control.path.is_empty() => {
                self.error = FollowerErrorCode::InvalidPath;
                warn!(state = ?self.state, "rejected empty path");
                Err(MazeError::InvalidParameter {
                    name: "path",
                    details: "path has no points".to_string(),
                })
            }
            (Idle | Ready, NewPath) => {
                self.path = control.path.iter().copied().map(FPoint::from).collect();
                self.rewind();
                self.error = FollowerErrorCode::None;
                info!(points = self.path.len(), "path loaded");
                self.transition(Ready);
                Ok(())
            }
            (Running, NewPath) => {
                self.error = FollowerErrorCode::PathReplacedWhileRunning;
                self.transition(Faulted);
                Err(MazeError::InvalidTransition {
                    state: Running,
                    command: NewPath,
                })
            }
            (Ready, Start) => {
                if self.completed {
                    self.rewind();
                }
                self.error = FollowerErrorCode::None;
                self.transition(Running);
                Ok(())
            }
            (Paused, Start) => {
                self.error = FollowerErrorCode::None;
                self.pid.reset();
                self.transition(Running);
                Ok(())
            }
            (Running, Pause) => {
                self.error = FollowerErrorCode::None;
                self.transition(Paused);
                Ok(())
            }
            (Ready | Running | Paused | Faulted, Reset) => {
                self.path.clear();
                self.rewind();
                self.error = FollowerErrorCode::None;
                self.transition(Idle);
                Ok(())
            }
            (state, command) => {
                // The fault reason stays visible until RESET.
                if state != Faulted {
                    self.error = FollowerErrorCode::InvalidTransition;
                }
                warn!(?state, ?command, "command rejected");
                Err(MazeError::InvalidTransition { state, command })
            }
        }
    }

    /// Enter FAULTED because the pose can no longer be trusted.
    pub fn fault(&mut self, reason: &str) {
        if self.state == FollowerState::Faulted {
            return;
        }
        warn!(state = ?self.state, reason, "path follower faulted");
        self.error = FollowerErrorCode::SensorFault;
        self.pid.reset();
        self.transition(FollowerState::Faulted);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Control cycle
    // ────────────────────────────────────────────────────────────────────────

    /// Advance one control cycle of `dt` seconds and return the drive
    /// command.  Anything but RUNNING yields a stop.
    pub fn step(&mut self, pose: &Pose, map: &LabyrinthMap, dt: f32) -> DriveCommand {
        if self.state != FollowerState::Running {
            return DriveCommand::STOP;
        }
        let position = pose.position();
        self.origin.get_or_insert(position);

        let mut passed: u8 = 0;
        while self.target < self.path.len()
            && passed < self.params.segment_limit
            && position.distance_to(self.path[self.target]) <= self.params.position_tolerance
        {
            self.origin = Some(self.path[self.target]);
            self.target += 1;
            passed += 1;
        }
        if passed > 0 {
            debug!(reached = self.target, of = self.path.len(), "waypoint reached");
        }

        if self.target >= self.path.len() {
            self.completed = true;
            self.error = FollowerErrorCode::None;
            self.lookahead = self.path.last().copied().unwrap_or(position);
            self.pid.reset();
            info!(points = self.path.len(), "path completed");
            self.transition(FollowerState::Ready);
            return DriveCommand::STOP;
        }

        let goal = self.path[self.target];
        if blocked_by_wall(map, position, goal) {
            if self.error != FollowerErrorCode::PathBlocked {
                warn!(x = goal.x, y = goal.y, "next waypoint is behind a wall");
            }
            self.error = FollowerErrorCode::PathBlocked;
            self.pid.reset();
            return DriveCommand::STOP;
        }
        if self.error == FollowerErrorCode::PathBlocked {
            self.error = FollowerErrorCode::None;
        }

        let start = self.origin.unwrap_or(position);
        self.lookahead = lookahead_point(start, goal, position, self.params.lookahead_distance);

        let bearing = (self.lookahead.y - position.y).atan2(self.lookahead.x - position.x);
        self.pid.set_set_point(bearing);
        let steering = self.pid.update(pose.theta, dt);

        let alignment = normalize_angle(bearing - pose.theta).cos().max(0.0);
        let approach = if self.target + 1 == self.path.len() {
            (position.distance_to(goal) / self.params.lookahead_distance)
                .clamp(MIN_APPROACH_SCALE, 1.0)
        } else {
            1.0
        };
        let speed = f32::from(self.params.speed) * alignment * approach;

        DriveCommand::new(
            saturate(speed, self.max_speed),
            saturate(steering, self.max_steering),
        )
    }

    /// Status record for the host.
    pub fn status(&self) -> PathFollowerStatus {
        let seg_end = self
            .path
            .get(self.target)
            .or_else(|| self.path.last())
            .copied()
            .unwrap_or_default();
        let seg_start = self.origin.unwrap_or(seg_end);
        PathFollowerStatus {
            state: self.state,
            error: self.error,
            progress: self.progress(),
            seg_start: Point::from_fpoint(seg_start),
            seg_end: Point::from_fpoint(seg_end),
            lookahead: self.lookahead,
        }
    }

    fn rewind(&mut self) {
        self.target = 0;
        self.origin = None;
        self.completed = false;
        self.lookahead = FPoint::default();
        self.pid.reset();
    }

    fn transition(&mut self, to: FollowerState) {
        if self.state != to {
            info!(from = ?self.state, ?to, "path follower transition");
            self.state = to;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry helpers
// ────────────────────────────────────────────────────────────────────────────

/// Point `distance` ahead of `position`'s projection on `start → end`,
/// clamped to the segment.
fn lookahead_point(start: FPoint, end: FPoint, position: FPoint, distance: f32) -> FPoint {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        return end;
    }
    let len = len_sq.sqrt();
    let along = ((position.x - start.x) * dx + (position.y - start.y) * dy) / len_sq;
    let t = (along + distance / len).clamp(0.0, 1.0);
    FPoint::new(start.x + t * dx, start.y + t * dy)
}

/// The goal sits in an unexplored neighbouring cell and the map records a
/// wall towards it.
fn blocked_by_wall(map: &LabyrinthMap, position: FPoint, goal: FPoint) -> bool {
    let (Some(here), Some(next)) = (LabyrinthMap::cell_at(position), LabyrinthMap::cell_at(goal))
    else {
        return false;
    };
    here != next && !map.is_visited(next) && map.wall_between(here, next) == Some(true)
}

fn saturate(value: f32, limit: i16) -> i16 {
    if !value.is_finite() {
        return 0;
    }
    let limit = f32::from(limit);
    value.round().clamp(-limit, limit) as i16
}
