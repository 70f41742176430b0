//! Logical channels of the robot ⇄ host link.
//!
//! Every channel carries exactly one record type and has a fixed direction
//! relative to the robot.  The numeric ids are shared by both peers and must
//! never be renumbered.  IN and OUT channels reuse the same id space (e.g.
//! `0x01` is `CH_IN_DRIVE` inbound and `CH_OUT_TELEMETRY` outbound), so a wire
//! id is only meaningful together with a [`LinkDirection`].
//!
//! | IN (host → robot) | id | OUT (robot → host) | id |
//! |---|---|---|---|
//! | [`Channel::InDebug`] | `0x00` | [`Channel::OutDebug`] | `0x00` |
//! | [`Channel::InDrive`] | `0x01` | [`Channel::OutTelemetry`] | `0x01` |
//! | [`Channel::InRobotParams`] | `0x02` | [`Channel::OutPose`] | `0x02` |
//! | [`Channel::InPathFollowCtrl`] | `0x03` | [`Channel::OutPathFollowStatus`] | `0x03` |
//! | [`Channel::InPathFollowParams`] | `0x04` | [`Channel::OutLabyWalls`] | `0x04` |
//! | [`Channel::InPose`] | `0x05` | [`Channel::OutGetPose`] | `0x05` |
//! | [`Channel::InUserCommand`] | `0x06` | [`Channel::OutUserData`] | `0x06` |
//! | | | [`Channel::OutRdp`] | `0x07` |
//! | [`Channel::InAdditionalPose`] | `0x08` | [`Channel::OutLabyCellInfo`] | `0x08` |
//! | | | [`Channel::OutLabyWallInfo`] | `0x09` |

use serde::{Deserialize, Serialize};

use crate::packet::{
    DriveCommand, GetPose, LabyrinthCellInfo, LabyrinthWallInfo, LabyrinthWalls,
    PathFollowerParameters, PathFollowerStatus, Pose, RobotParameters, Telemetry, UserCommand,
    UserData, MAX_DEBUG_TEXT, MAX_OPAQUE_PAYLOAD, MAX_PATH_POINTS,
};

/// Direction of travel relative to the robot controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkDirection {
    /// Host → robot.
    Inbound,
    /// Robot → host.
    Outbound,
}

/// Expected payload size of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSize {
    /// The payload is always exactly this many bytes.
    Fixed(usize),
    /// The payload carries its own length (or is opaque) within these bounds.
    Variable { min: usize, max: usize },
}

impl PayloadSize {
    /// `true` when a payload of `len` bytes fits this layout.
    pub fn accepts(self, len: usize) -> bool {
        match self {
            PayloadSize::Fixed(n) => len == n,
            PayloadSize::Variable { min, max } => (min..=max).contains(&len),
        }
    }
}

/// One directional logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    InDebug,
    InDrive,
    InRobotParams,
    InPathFollowCtrl,
    InPathFollowParams,
    InPose,
    InUserCommand,
    InAdditionalPose,
    OutDebug,
    OutTelemetry,
    OutPose,
    OutPathFollowStatus,
    OutLabyWalls,
    OutGetPose,
    OutUserData,
    OutRdp,
    OutLabyCellInfo,
    OutLabyWallInfo,
}

impl Channel {
    /// Every host → robot channel.
    pub const INBOUND: [Channel; 8] = [
        Channel::InDebug,
        Channel::InDrive,
        Channel::InRobotParams,
        Channel::InPathFollowCtrl,
        Channel::InPathFollowParams,
        Channel::InPose,
        Channel::InUserCommand,
        Channel::InAdditionalPose,
    ];

    /// Every robot → host channel.
    pub const OUTBOUND: [Channel; 10] = [
        Channel::OutDebug,
        Channel::OutTelemetry,
        Channel::OutPose,
        Channel::OutPathFollowStatus,
        Channel::OutLabyWalls,
        Channel::OutGetPose,
        Channel::OutUserData,
        Channel::OutRdp,
        Channel::OutLabyCellInfo,
        Channel::OutLabyWallInfo,
    ];

    /// Stable wire id of this channel.
    pub const fn id(self) -> u8 {
        match self {
            Channel::InDebug | Channel::OutDebug => 0x00,
            Channel::InDrive | Channel::OutTelemetry => 0x01,
            Channel::InRobotParams | Channel::OutPose => 0x02,
            Channel::InPathFollowCtrl | Channel::OutPathFollowStatus => 0x03,
            Channel::InPathFollowParams | Channel::OutLabyWalls => 0x04,
            Channel::InPose | Channel::OutGetPose => 0x05,
            Channel::InUserCommand | Channel::OutUserData => 0x06,
            Channel::OutRdp => 0x07,
            Channel::InAdditionalPose | Channel::OutLabyCellInfo => 0x08,
            Channel::OutLabyWallInfo => 0x09,
        }
    }

    /// Direction this channel travels in.
    pub const fn direction(self) -> LinkDirection {
        match self {
            Channel::InDebug
            | Channel::InDrive
            | Channel::InRobotParams
            | Channel::InPathFollowCtrl
            | Channel::InPathFollowParams
            | Channel::InPose
            | Channel::InUserCommand
            | Channel::InAdditionalPose => LinkDirection::Inbound,
            _ => LinkDirection::Outbound,
        }
    }

    /// Resolve a wire id received in `direction`.
    pub fn from_id(direction: LinkDirection, id: u8) -> Option<Channel> {
        let table: &[Channel] = match direction {
            LinkDirection::Inbound => &Self::INBOUND,
            LinkDirection::Outbound => &Self::OUTBOUND,
        };
        table.iter().copied().find(|c| c.id() == id)
    }

    /// Payload layout carried by this channel.
    pub const fn payload_size(self) -> PayloadSize {
        match self {
            Channel::InDebug | Channel::OutRdp => PayloadSize::Variable {
                min: 0,
                max: MAX_OPAQUE_PAYLOAD,
            },
            Channel::OutDebug => PayloadSize::Variable {
                min: 1,
                max: 1 + MAX_DEBUG_TEXT,
            },
            Channel::InPathFollowCtrl => PayloadSize::Variable {
                min: 2,
                max: 2 + 4 * MAX_PATH_POINTS,
            },
            Channel::InDrive => PayloadSize::Fixed(DriveCommand::WIRE_SIZE),
            Channel::InRobotParams => PayloadSize::Fixed(RobotParameters::WIRE_SIZE),
            Channel::InPathFollowParams => PayloadSize::Fixed(PathFollowerParameters::WIRE_SIZE),
            Channel::InPose | Channel::InAdditionalPose | Channel::OutPose => {
                PayloadSize::Fixed(Pose::WIRE_SIZE)
            }
            Channel::InUserCommand => PayloadSize::Fixed(UserCommand::WIRE_SIZE),
            Channel::OutTelemetry => PayloadSize::Fixed(Telemetry::WIRE_SIZE),
            Channel::OutPathFollowStatus => PayloadSize::Fixed(PathFollowerStatus::WIRE_SIZE),
            Channel::OutLabyWalls => PayloadSize::Fixed(LabyrinthWalls::WIRE_SIZE),
            Channel::OutGetPose => PayloadSize::Fixed(GetPose::WIRE_SIZE),
            Channel::OutUserData => PayloadSize::Fixed(UserData::WIRE_SIZE),
            Channel::OutLabyCellInfo => PayloadSize::Fixed(LabyrinthCellInfo::WIRE_SIZE),
            Channel::OutLabyWallInfo => PayloadSize::Fixed(LabyrinthWallInfo::WIRE_SIZE),
        }
    }
}
