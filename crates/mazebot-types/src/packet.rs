//! Fixed-layout records exchanged over the link, plus the [`Packet`] tagged
//! union that pairs each record with its [`Channel`].
//!
//! All records are packed little-endian on the wire; `WIRE_SIZE` constants give
//! the encoded size of fixed records.  Distances are millimetres, angles
//! radians.

use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::{LABYRINTH_COLS, LABYRINTH_ROWS};

/// Largest magnitude of a drive speed or steering value.
pub const DRIVE_LIMIT: i16 = 8191;

/// Maximum number of points in one `NEWPATH` upload (length byte is a `u8`).
pub const MAX_PATH_POINTS: usize = 255;

/// Maximum text length of an outbound debug message (excluding the level byte).
pub const MAX_DEBUG_TEXT: usize = 256;

/// Maximum size of opaque payloads (inbound debug, remote data processing).
pub const MAX_OPAQUE_PAYLOAD: usize = 256;

/// `info` value that clears a cell or wall annotation on the host.
pub const INFO_CLEAR: i8 = -128;

/// Total number of walls in the grid: vertical walls then horizontal walls.
pub const WALL_COUNT: usize =
    (LABYRINTH_COLS + 1) * LABYRINTH_ROWS + (LABYRINTH_ROWS + 1) * LABYRINTH_COLS;

/// Size of the wall bitset in bytes.
pub const WALL_BYTES: usize = WALL_COUNT.div_ceil(8);

/// Wrap an angle into `(−π, π]`.
///
/// Non-finite input is returned unchanged so callers can detect it.
pub fn normalize_angle(theta: f32) -> f32 {
    if !theta.is_finite() {
        return theta;
    }
    let wrapped = theta.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

// ────────────────────────────────────────────────────────────────────────────
// Grid vocabulary
// ────────────────────────────────────────────────────────────────────────────

/// Cardinal direction of a wall relative to its cell.  North is row − 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Direction::North),
            1 => Some(Direction::East),
            2 => Some(Direction::South),
            3 => Some(Direction::West),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    /// Bit of this direction inside a 4-bit wall mask.
    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// `(row, col)` step towards the neighbour in this direction.
    pub fn offset(self) -> (i16, i16) {
        match self {
            Direction::North => (-1, 0),
            Direction::East => (0, 1),
            Direction::South => (1, 0),
            Direction::West => (0, -1),
        }
    }
}

/// Zero-based `(row, col)` address of a labyrinth cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIndex {
    pub row: u8,
    pub col: u8,
}

impl CellIndex {
    pub fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    pub fn in_bounds(self) -> bool {
        (self.row as usize) < LABYRINTH_ROWS && (self.col as usize) < LABYRINTH_COLS
    }

    /// The adjacent cell in `dir`, or `None` when it would leave the grid.
    pub fn neighbor(self, dir: Direction) -> Option<CellIndex> {
        let (dr, dc) = dir.offset();
        let row = self.row as i16 + dr;
        let col = self.col as i16 + dc;
        if row < 0 || col < 0 || row >= LABYRINTH_ROWS as i16 || col >= LABYRINTH_COLS as i16 {
            return None;
        }
        Some(CellIndex::new(row as u8, col as u8))
    }

    /// Direction from `self` to an orthogonally adjacent `other`.
    pub fn direction_to(self, other: CellIndex) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|d| self.neighbor(*d) == Some(other))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Robot state records
// ────────────────────────────────────────────────────────────────────────────

/// Raw sensor snapshot produced by the hardware collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    /// Bumper onsets in the lowest five bits.
    pub bumpers: u8,
    /// Number of registered bumper contacts.
    pub contacts: u8,
    /// Right wheel encoder, running tick counter (wraps).
    pub encoder1: i16,
    /// Left wheel encoder, running tick counter (wraps).
    pub encoder2: i16,
    /// Infrared distances, mm.
    pub infrared: [u16; 5],
    pub user1: i16,
    pub user2: f32,
}

impl Telemetry {
    pub const WIRE_SIZE: usize = 22;
}

/// Differential drive setpoint.  `steering > 0` turns clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveCommand {
    /// Directional speed in `[-8191, 8191]`.
    pub speed: i16,
    /// Steering in `[-8191, 8191]`.
    pub steering: i16,
}

impl DriveCommand {
    pub const WIRE_SIZE: usize = 4;
    pub const STOP: DriveCommand = DriveCommand {
        speed: 0,
        steering: 0,
    };

    pub fn new(speed: i16, steering: i16) -> Self {
        Self { speed, steering }
    }

    pub fn is_stop(&self) -> bool {
        self.speed == 0 && self.steering == 0
    }
}

/// Robot pose in the maze frame.  `theta = 0` points east, `π/2` north.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
}

impl Pose {
    pub const WIRE_SIZE: usize = 12;

    pub fn new(x: f32, y: f32, theta: f32) -> Self {
        Self { x, y, theta }
    }

    /// Copy with the heading wrapped into `(−π, π]`.
    pub fn normalized(self) -> Self {
        Self {
            theta: normalize_angle(self.theta),
            ..self
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.theta.is_finite()
    }

    pub fn position(&self) -> FPoint {
        FPoint::new(self.x, self.y)
    }
}

/// Physical robot constants; loaded once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotParameters {
    /// Distance between the wheels, mm.
    pub axle_width: f32,
    /// Travelled distance per encoder tick, mm.
    pub dist_per_tick: f32,
    #[serde(default)]
    pub user1: f32,
    #[serde(default)]
    pub user2: f32,
}

impl RobotParameters {
    pub const WIRE_SIZE: usize = 16;

    /// Reject values that would make odometry meaningless.
    pub fn validate(&self) -> Result<(), crate::MazeError> {
        if !self.axle_width.is_finite() || self.axle_width <= 0.0 {
            return Err(crate::MazeError::InvalidParameter {
                name: "axle_width",
                details: format!("{} must be a positive finite distance", self.axle_width),
            });
        }
        if !self.dist_per_tick.is_finite() || self.dist_per_tick <= 0.0 {
            return Err(crate::MazeError::InvalidParameter {
                name: "dist_per_tick",
                details: format!("{} must be a positive finite distance", self.dist_per_tick),
            });
        }
        Ok(())
    }
}

impl Default for RobotParameters {
    fn default() -> Self {
        Self {
            axle_width: 105.0,
            dist_per_tick: 0.4,
            user1: 0.0,
            user2: 0.0,
        }
    }
}

/// Integer 2-D point, mm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

impl Point {
    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    /// Nearest integer point, saturating at the `i16` range.
    pub fn from_fpoint(p: FPoint) -> Self {
        Self {
            x: p.x.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16,
            y: p.y.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16,
        }
    }
}

/// Floating 2-D point, mm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FPoint {
    pub x: f32,
    pub y: f32,
}

impl FPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: FPoint) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

impl From<Point> for FPoint {
    fn from(p: Point) -> Self {
        FPoint::new(p.x as f32, p.y as f32)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Path follower records
// ────────────────────────────────────────────────────────────────────────────

/// Path follower state reported in [`PathFollowerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FollowerState {
    /// No path loaded.
    #[default]
    Idle = 0,
    /// Path loaded, not moving.
    Ready = 1,
    /// Actively following.
    Running = 2,
    /// Suspended mid-path.
    Paused = 3,
    /// Terminal error state; only `RESET` leaves it.
    Faulted = 4,
}

impl FollowerState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FollowerState::Idle),
            1 => Some(FollowerState::Ready),
            2 => Some(FollowerState::Running),
            3 => Some(FollowerState::Paused),
            4 => Some(FollowerState::Faulted),
            _ => None,
        }
    }
}

/// Error code carried in [`PathFollowerStatus`]; anything but `None` is the
/// status error flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FollowerErrorCode {
    #[default]
    None = 0,
    /// Command not applicable in the current state.
    InvalidTransition = 1,
    /// `NEWPATH` arrived while running.
    PathReplacedWhileRunning = 2,
    /// Pose source unusable.
    SensorFault = 3,
    /// `NEWPATH` without points.
    InvalidPath = 4,
    /// Next waypoint is behind a recorded wall in unexplored territory.
    PathBlocked = 5,
}

impl FollowerErrorCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FollowerErrorCode::None),
            1 => Some(FollowerErrorCode::InvalidTransition),
            2 => Some(FollowerErrorCode::PathReplacedWhileRunning),
            3 => Some(FollowerErrorCode::SensorFault),
            4 => Some(FollowerErrorCode::InvalidPath),
            5 => Some(FollowerErrorCode::PathBlocked),
            _ => None,
        }
    }
}

/// Heartbeat of the path follower, published every control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PathFollowerStatus {
    pub state: FollowerState,
    pub error: FollowerErrorCode,
    /// Fraction of waypoints reached, `0.0..=1.0`.
    pub progress: f32,
    /// Start of the current path segment.
    pub seg_start: Point,
    /// End of the current path segment (the target waypoint).
    pub seg_end: Point,
    /// Point the robot is currently steering towards.
    pub lookahead: FPoint,
}

impl PathFollowerStatus {
    pub const WIRE_SIZE: usize = 22;

    pub fn has_error(&self) -> bool {
        self.error != FollowerErrorCode::None
    }
}

/// Command byte of [`PathFollowerControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PathFollowerCommand {
    NewPath = 0,
    Start = 1,
    Pause = 2,
    Reset = 3,
}

impl PathFollowerCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PathFollowerCommand::NewPath),
            1 => Some(PathFollowerCommand::Start),
            2 => Some(PathFollowerCommand::Pause),
            3 => Some(PathFollowerCommand::Reset),
            _ => None,
        }
    }
}

/// Follower command with an optional path payload (only used by `NEWPATH`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFollowerControl {
    pub command: PathFollowerCommand,
    pub path: Vec<Point>,
}

impl PathFollowerControl {
    pub fn new_path(path: Vec<Point>) -> Self {
        Self {
            command: PathFollowerCommand::NewPath,
            path,
        }
    }

    pub fn command(command: PathFollowerCommand) -> Self {
        Self {
            command,
            path: Vec::new(),
        }
    }
}

/// Tuning of the path follower.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathFollowerParameters {
    /// Distance ahead of the robot's projection on the segment, mm.
    pub lookahead_distance: f32,
    /// Maximum number of waypoints that may be passed in one control cycle.
    pub segment_limit: u8,
    /// A waypoint counts as reached within this radius, mm.
    pub position_tolerance: f32,
    /// Cruise speed in drive units.
    pub speed: i16,
    /// Steering units per radian of heading error.
    pub steering_gain: f32,
}

impl PathFollowerParameters {
    pub const WIRE_SIZE: usize = 15;

    /// Bounds check applied on every load.
    pub fn validate(&self) -> Result<(), crate::MazeError> {
        let invalid = |name: &'static str, details: String| {
            Err(crate::MazeError::InvalidParameter { name, details })
        };
        if !self.lookahead_distance.is_finite() || self.lookahead_distance <= 0.0 {
            return invalid(
                "lookahead_distance",
                format!("{} must be positive", self.lookahead_distance),
            );
        }
        if self.segment_limit == 0 {
            return invalid("segment_limit", "must be at least 1".to_string());
        }
        if !self.position_tolerance.is_finite() || self.position_tolerance <= 0.0 {
            return invalid(
                "position_tolerance",
                format!("{} must be positive", self.position_tolerance),
            );
        }
        if self.speed <= 0 || self.speed > DRIVE_LIMIT {
            return invalid("speed", format!("{} outside 1..={DRIVE_LIMIT}", self.speed));
        }
        if !self.steering_gain.is_finite() || self.steering_gain < 0.0 {
            return invalid(
                "steering_gain",
                format!("{} must be finite and non-negative", self.steering_gain),
            );
        }
        Ok(())
    }
}

impl Default for PathFollowerParameters {
    fn default() -> Self {
        Self {
            lookahead_distance: 150.0,
            segment_limit: 1,
            position_tolerance: 40.0,
            speed: 3000,
            steering_gain: 4000.0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Labyrinth records
// ────────────────────────────────────────────────────────────────────────────

/// Full-grid wall snapshot.
///
/// The first `(COLS + 1) * ROWS` bits are the western/eastern walls of row 0,
/// row 1, …; the remaining `(ROWS + 1) * COLS` bits are the northern/southern
/// walls of column 0, column 1, ….  A wall shared by two cells has exactly one
/// bit, so the snapshot is symmetric by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabyrinthWalls {
    pub cols: u8,
    pub rows: u8,
    pub walls: [u8; WALL_BYTES],
}

impl Default for LabyrinthWalls {
    fn default() -> Self {
        Self {
            cols: LABYRINTH_COLS as u8,
            rows: LABYRINTH_ROWS as u8,
            walls: [0; WALL_BYTES],
        }
    }
}

impl LabyrinthWalls {
    pub const WIRE_SIZE: usize = 2 + WALL_BYTES;

    /// Bit number of the wall on side `dir` of `(row, col)`, or `None` for a
    /// cell outside the grid.
    pub fn wall_index(row: u8, col: u8, dir: Direction) -> Option<u16> {
        if !CellIndex::new(row, col).in_bounds() {
            return None;
        }
        let (row, col) = (row as u16, col as u16);
        let rows = LABYRINTH_ROWS as u16;
        let cols = LABYRINTH_COLS as u16;
        let idx = match dir {
            Direction::West => row * (cols + 1) + col,
            Direction::East => row * (cols + 1) + col + 1,
            Direction::North => col * (rows + 1) + row + rows * (cols + 1),
            Direction::South => col * (rows + 1) + row + 1 + rows * (cols + 1),
        };
        Some(idx)
    }

    pub fn has_wall(&self, row: u8, col: u8, dir: Direction) -> bool {
        match Self::wall_index(row, col, dir) {
            Some(i) => self.walls[(i >> 3) as usize] & (1 << (i & 0x07)) != 0,
            None => false,
        }
    }

    pub fn set_wall(&mut self, row: u8, col: u8, dir: Direction, present: bool) {
        if let Some(i) = Self::wall_index(row, col, dir) {
            let byte = &mut self.walls[(i >> 3) as usize];
            if present {
                *byte |= 1 << (i & 0x07);
            } else {
                *byte &= !(1 << (i & 0x07));
            }
        }
    }

    /// Number of walls currently set.
    pub fn count(&self) -> u32 {
        self.walls.iter().map(|b| b.count_ones()).sum()
    }
}

/// Source of an April-tag pose request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AprilTagType {
    Main = 0,
    Additional = 1,
}

impl AprilTagType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AprilTagType::Main),
            1 => Some(AprilTagType::Additional),
            _ => None,
        }
    }
}

/// Request for the host to report a tracked tag pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPose {
    pub april_tag: AprilTagType,
}

impl GetPose {
    pub const WIRE_SIZE: usize = 1;
}

/// Operator command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCommand {
    pub id: u8,
}

impl UserCommand {
    pub const WIRE_SIZE: usize = 1;
}

/// Operator-facing data block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UserData {
    pub uint16: u16,
    pub uint32: u32,
    pub int16: i16,
    pub int32: i32,
    pub float1: f32,
    pub float2: f32,
    pub float3: f32,
    pub float4: f32,
}

impl UserData {
    pub const WIRE_SIZE: usize = 28;
}

/// Per-cell exploration metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabyrinthCellInfo {
    pub col: u8,
    pub row: u8,
    /// Annotation in `-127..=127`; [`INFO_CLEAR`] clears it.
    pub info: i8,
}

impl LabyrinthCellInfo {
    pub const WIRE_SIZE: usize = 3;

    pub fn cell(&self) -> CellIndex {
        CellIndex::new(self.row, self.col)
    }
}

/// Single wall observation.  `info > 0` means the wall is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabyrinthWallInfo {
    pub col: u8,
    pub row: u8,
    pub dir: Direction,
    pub info: i8,
}

impl LabyrinthWallInfo {
    pub const WIRE_SIZE: usize = 4;

    pub fn observation(cell: CellIndex, dir: Direction, present: bool) -> Self {
        Self {
            col: cell.col,
            row: cell.row,
            dir,
            info: if present { 1 } else { 0 },
        }
    }

    pub fn cell(&self) -> CellIndex {
        CellIndex::new(self.row, self.col)
    }

    pub fn is_present(&self) -> bool {
        self.info > 0
    }
}

/// Severity byte of an outbound debug message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Finest = 0,
    Finer = 1,
    Fine = 2,
    Config = 3,
    Info = 4,
    Warning = 5,
    Severe = 6,
}

impl LogLevel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LogLevel::Finest),
            1 => Some(LogLevel::Finer),
            2 => Some(LogLevel::Fine),
            3 => Some(LogLevel::Config),
            4 => Some(LogLevel::Info),
            5 => Some(LogLevel::Warning),
            6 => Some(LogLevel::Severe),
            _ => None,
        }
    }
}

/// Text log line sent to the host console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    pub level: LogLevel,
    pub text: String,
}

impl DebugMessage {
    /// Build a message, truncating `text` to [`MAX_DEBUG_TEXT`] bytes on a
    /// character boundary.
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        let mut text = text.into();
        if text.len() > MAX_DEBUG_TEXT {
            let mut cut = MAX_DEBUG_TEXT;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Self { level, text }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Packet
// ────────────────────────────────────────────────────────────────────────────

/// A record tagged with the channel it travels on.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `CH_IN_DEBUG`: opaque bytes from the host debug view.
    HostDebug(Vec<u8>),
    /// `CH_IN_DRIVE`
    Drive(DriveCommand),
    /// `CH_IN_ROBOT_PARAMS`
    RobotParams(RobotParameters),
    /// `CH_IN_PATH_FOLLOW_CTRL`
    PathFollowCtrl(PathFollowerControl),
    /// `CH_IN_PATH_FOLLOW_PARAMS`
    PathFollowParams(PathFollowerParameters),
    /// `CH_IN_POSE`: pose of the main April tag.
    Pose(Pose),
    /// `CH_IN_USER_COMMAND`
    UserCommand(UserCommand),
    /// `CH_IN_ADDITIONAL_POSE`: pose of the additional April tag.
    AdditionalPose(Pose),
    /// `CH_OUT_DEBUG`
    Log(DebugMessage),
    /// `CH_OUT_TELEMETRY`
    Telemetry(Telemetry),
    /// `CH_OUT_POSE`: the robot's own estimate.
    PoseReport(Pose),
    /// `CH_OUT_PATH_FOLLOW_STATUS`
    PathFollowStatus(PathFollowerStatus),
    /// `CH_OUT_LABY_WALLS`
    LabyWalls(LabyrinthWalls),
    /// `CH_OUT_GET_POSE`
    GetPose(GetPose),
    /// `CH_OUT_USER_DATA`
    UserData(UserData),
    /// `CH_OUT_RDP`: opaque remote data processing command.
    Rdp(Vec<u8>),
    /// `CH_OUT_LABY_CELL_INFO`
    LabyCellInfo(LabyrinthCellInfo),
    /// `CH_OUT_LABY_WALL_INFO`
    LabyWallInfo(LabyrinthWallInfo),
}

impl Packet {
    /// The channel this packet travels on.
    pub fn channel(&self) -> Channel {
        match self {
            Packet::HostDebug(_) => Channel::InDebug,
            Packet::Drive(_) => Channel::InDrive,
            Packet::RobotParams(_) => Channel::InRobotParams,
            Packet::PathFollowCtrl(_) => Channel::InPathFollowCtrl,
            Packet::PathFollowParams(_) => Channel::InPathFollowParams,
            Packet::Pose(_) => Channel::InPose,
            Packet::UserCommand(_) => Channel::InUserCommand,
            Packet::AdditionalPose(_) => Channel::InAdditionalPose,
            Packet::Log(_) => Channel::OutDebug,
            Packet::Telemetry(_) => Channel::OutTelemetry,
            Packet::PoseReport(_) => Channel::OutPose,
            Packet::PathFollowStatus(_) => Channel::OutPathFollowStatus,
            Packet::LabyWalls(_) => Channel::OutLabyWalls,
            Packet::GetPose(_) => Channel::OutGetPose,
            Packet::UserData(_) => Channel::OutUserData,
            Packet::Rdp(_) => Channel::OutRdp,
            Packet::LabyCellInfo(_) => Channel::OutLabyCellInfo,
            Packet::LabyWallInfo(_) => Channel::OutLabyWallInfo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn normalize_angle_range() {
        assert!((normalize_angle(3.0 * PI - 0.5) - (PI - 0.5)).abs() < 1e-4);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-5);
        assert!((normalize_angle(-FRAC_PI_2) + FRAC_PI_2).abs() < 1e-6);
        assert!((normalize_angle(5.0 * FRAC_PI_2) - FRAC_PI_2).abs() < 1e-5);
        for i in -50..50 {
            let a = normalize_angle(i as f32 * 0.37);
            assert!(a > -PI && a <= PI, "{a}");
        }
        assert!(normalize_angle(f32::NAN).is_nan());
    }

    #[test]
    fn direction_opposites_and_bits() {
        for d in Direction::ALL {
            assert_eq!(d.opposite().opposite(), d);
            assert_eq!(Direction::from_u8(d as u8), Some(d));
        }
        let mask: u8 = Direction::ALL.iter().map(|d| d.bit()).sum();
        assert_eq!(mask, 0x0F);
        assert_eq!(Direction::from_u8(4), None);
    }

    #[test]
    fn neighbor_stays_in_grid() {
        let corner = CellIndex::new(0, 0);
        assert_eq!(corner.neighbor(Direction::North), None);
        assert_eq!(corner.neighbor(Direction::West), None);
        assert_eq!(corner.neighbor(Direction::South), Some(CellIndex::new(1, 0)));
        assert_eq!(corner.neighbor(Direction::East), Some(CellIndex::new(0, 1)));
        let far = CellIndex::new(6, 6);
        assert_eq!(far.neighbor(Direction::South), None);
        assert_eq!(far.neighbor(Direction::East), None);
        assert_eq!(
            CellIndex::new(2, 2).direction_to(CellIndex::new(2, 3)),
            Some(Direction::East)
        );
        assert_eq!(CellIndex::new(2, 2).direction_to(CellIndex::new(3, 3)), None);
    }

    #[test]
    fn shared_wall_has_one_index() {
        assert_eq!(
            LabyrinthWalls::wall_index(0, 0, Direction::South),
            LabyrinthWalls::wall_index(1, 0, Direction::North)
        );
        assert_eq!(
            LabyrinthWalls::wall_index(3, 2, Direction::East),
            LabyrinthWalls::wall_index(3, 3, Direction::West)
        );
        assert_eq!(LabyrinthWalls::wall_index(7, 0, Direction::North), None);
        assert_eq!(
            LabyrinthWalls::wall_index(6, 6, Direction::South),
            Some((WALL_COUNT - 1) as u16)
        );
    }

    #[test]
    fn walls_bitset_set_and_clear() {
        let mut walls = LabyrinthWalls::default();
        walls.set_wall(2, 4, Direction::North, true);
        assert!(walls.has_wall(1, 4, Direction::South));
        assert_eq!(walls.count(), 1);
        walls.set_wall(1, 4, Direction::South, false);
        assert!(!walls.has_wall(2, 4, Direction::North));
        assert_eq!(walls.count(), 0);
        assert_eq!(LabyrinthWalls::WIRE_SIZE, 16);
    }

    #[test]
    fn follower_parameters_bounds() {
        assert!(PathFollowerParameters::default().validate().is_ok());
        let bad = PathFollowerParameters {
            position_tolerance: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PathFollowerParameters {
            speed: DRIVE_LIMIT + 1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PathFollowerParameters {
            lookahead_distance: f32::NAN,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn robot_parameters_bounds() {
        assert!(RobotParameters::default().validate().is_ok());
        let bad = RobotParameters {
            axle_width: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn debug_message_truncates_on_char_boundary() {
        let text = "ä".repeat(200);
        let msg = DebugMessage::new(LogLevel::Info, text);
        assert!(msg.text.len() <= MAX_DEBUG_TEXT);
        assert!(msg.text.chars().all(|c| c == 'ä'));
    }

    #[test]
    fn packet_channels() {
        assert_eq!(Packet::Drive(DriveCommand::STOP).channel(), Channel::InDrive);
        assert_eq!(
            Packet::AdditionalPose(Pose::default()).channel(),
            Channel::InAdditionalPose
        );
        assert_eq!(
            Packet::LabyWalls(LabyrinthWalls::default()).channel(),
            Channel::OutLabyWalls
        );
    }

    #[test]
    fn params_serde_roundtrip() {
        let params = PathFollowerParameters::default();
        let json = serde_json::to_string(&params).unwrap();
        let back: PathFollowerParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
