//! Load-once parameter slots.
//!
//! Robot geometry and follower tuning are set exactly once per controller,
//! either from the config file at startup or from the first host packet.
//! Every load is validated first; a second load is rejected and logged.

use mazebot_types::{MazeError, PathFollowerParameters, RobotParameters};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct ParamSlots {
    robot: OnceCell<RobotParameters>,
    follower: OnceCell<PathFollowerParameters>,
}

impl ParamSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store robot parameters if none were loaded yet.
    pub fn load_robot(&self, params: RobotParameters) -> Result<(), MazeError> {
        params.validate()?;
        load_once(&self.robot, params, "robot parameters")?;
        info!(
            axle_width = params.axle_width,
            dist_per_tick = params.dist_per_tick,
            "robot parameters loaded"
        );
        Ok(())
    }

    /// Store follower parameters if none were loaded yet.
    pub fn load_follower(&self, params: PathFollowerParameters) -> Result<(), MazeError> {
        params.validate()?;
        load_once(&self.follower, params, "path follower parameters")?;
        info!(
            speed = params.speed,
            lookahead = params.lookahead_distance,
            "path follower parameters loaded"
        );
        Ok(())
    }

    pub fn robot(&self) -> Option<RobotParameters> {
        self.robot.get().copied()
    }

    pub fn follower(&self) -> Option<PathFollowerParameters> {
        self.follower.get().copied()
    }
}

fn load_once<T>(slot: &OnceCell<T>, value: T, what: &'static str) -> Result<(), MazeError> {
    slot.set(value).map_err(|_| {
        warn!(what, "ignoring second parameter load");
        MazeError::AlreadyLoaded(what)
    })
}
