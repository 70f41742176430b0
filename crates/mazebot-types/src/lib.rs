//! Shared vocabulary of the mazebot workspace: channel table, wire records,
//! bus events and the error types every other crate returns.

pub mod channel;
pub mod packet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use channel::{Channel, LinkDirection, PayloadSize};
pub use packet::*;

/// Number of labyrinth rows.
pub const LABYRINTH_ROWS: usize = 7;
/// Number of labyrinth columns.
pub const LABYRINTH_COLS: usize = 7;
/// Clear inner width of one cell, mm.
pub const LABY_INNER_CELLSIZE: f32 = 250.0;
/// Cell pitch including one wall thickness, mm.
pub const LABY_CELLSIZE: f32 = LABY_INNER_CELLSIZE + 3.3;

/// Unified event wrapper for the headless event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "mazebot-middleware::router"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A `[channel id][payload]` unit crossing the link.
    Frame {
        direction: LinkDirection,
        bytes: Vec<u8>,
    },
    /// The path follower changed state.
    FollowerTransition {
        from: FollowerState,
        to: FollowerState,
    },
    /// A component reported a fault.
    Fault { component: String, message: String },
}

/// Failure to turn bytes into a [`Packet`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{channel:?}: payload of {actual} bytes does not match {expected:?}")]
    LengthMismatch {
        channel: Channel,
        expected: PayloadSize,
        actual: usize,
    },

    #[error("unknown {direction:?} channel id {id:#04x}")]
    UnknownChannel { direction: LinkDirection, id: u8 },

    #[error("{channel:?}: invalid {field} value {value:#04x}")]
    InvalidField {
        channel: Channel,
        field: &'static str,
        value: u8,
    },

    #[error("frame has no channel byte")]
    EmptyFrame,
}

/// Global error type of the robot core.
#[derive(Error, Debug)]
pub enum MazeError {
    #[error("Decode Error: {0}")]
    Decode(#[from] DecodeError),

    #[error("No handler bound for {0:?}")]
    RoutingMiss(Channel),

    #[error("Invalid Transition: {command:?} in state {state:?}")]
    InvalidTransition {
        state: FollowerState,
        command: PathFollowerCommand,
    },

    #[error("Cell ({row}, {col}) is outside the labyrinth")]
    BoundsViolation { row: u8, col: u8 },

    #[error("Sensor Fault on {component}: {details}")]
    FatalSensorFault { component: String, details: String },

    #[error("Invalid parameter {name}: {details}")]
    InvalidParameter { name: &'static str, details: String },

    #[error("Limit Violation [{rule}]: {details}")]
    LimitViolation { rule: String, details: String },

    #[error("{channel:?} cannot be sent in this direction")]
    WrongDirection { channel: Channel },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("{0} already loaded")]
    AlreadyLoaded(&'static str),
}
