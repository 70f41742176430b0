//! Operator command translation.
//!
//! The host UI sends bare command ids on `CH_IN_USER_COMMAND`.
//! [`UserCommandGateway::translate`] maps them to [`GatewayAction`]s the
//! controller executes; [`UserCommandGateway::user_data`] packs the reply
//! block for `CH_OUT_USER_DATA`.
//!
//! | id | action |
//! |---|---|
//! | 0 | stop (pause a running follower, else zero drive) |
//! | 1 | follower START |
//! | 2 | follower PAUSE |
//! | 3 | follower RESET |
//! | 4 | send the labyrinth walls |
//! | 5 | clear the labyrinth map |
//! | 6 | request the MAIN tag pose |
//! | 7 | request the ADDITIONAL tag pose |
//! | 8 | send user data |

use mazebot_types::{AprilTagType, FollowerState, PathFollowerCommand, Pose, UserCommand, UserData};
use tracing::warn;

/// What the controller should do for one operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayAction {
    Stop,
    Follower(PathFollowerCommand),
    SendWalls,
    ClearMap,
    RequestPose(AprilTagType),
    SendUserData,
}

/// Controller state summarized for [`UserCommandGateway::user_data`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlSnapshot {
    pub progress_index: usize,
    pub progress: f32,
    pub state: FollowerState,
    pub packets_delivered: u64,
    pub visited_cells: usize,
    pub pose: Pose,
}

pub struct UserCommandGateway;

impl UserCommandGateway {
    /// Action for `cmd`, or `None` for an unknown id.
    pub fn translate(cmd: UserCommand) -> Option<GatewayAction> {
        let action = match cmd.id {
            0 => GatewayAction::Stop,
            1 => GatewayAction::Follower(PathFollowerCommand::Start),
            2 => GatewayAction::Follower(PathFollowerCommand::Pause),
            3 => GatewayAction::Follower(PathFollowerCommand::Reset),
            4 => GatewayAction::SendWalls,
            5 => GatewayAction::ClearMap,
            6 => GatewayAction::RequestPose(AprilTagType::Main),
            7 => GatewayAction::RequestPose(AprilTagType::Additional),
            8 => GatewayAction::SendUserData,
            id => {
                warn!(id, "unknown user command ignored");
                return None;
            }
        };
        Some(action)
    }

    /// Reply block; integer fields saturate instead of wrapping.
    pub fn user_data(snapshot: &ControlSnapshot) -> UserData {
        UserData {
            uint16: u16::try_from(snapshot.progress_index).unwrap_or(u16::MAX),
            uint32: u32::try_from(snapshot.packets_delivered).unwrap_or(u32::MAX),
            int16: i16::from(snapshot.state as u8),
            int32: i32::try_from(snapshot.visited_cells).unwrap_or(i32::MAX),
            float1: snapshot.pose.x,
            float2: snapshot.pose.y,
            float3: snapshot.pose.theta,
            float4: snapshot.progress,
        }
    }
}
