//! Byte layout of every channel record.
//!
//! A frame is `[channel id][payload]`; payloads are packed little-endian.
//! Encoding is total and deterministic.  Decoding checks the payload length
//! against [`Channel::payload_size`] before touching any field, and rejects
//! out-of-domain enum bytes.  Neither direction normalizes values.
//!
//! Records built past their channel bounds (more than 255 path points, more
//! than 256 opaque or debug text bytes) still encode, but not decodably;
//! [`ChannelRouter::send`](crate::router::ChannelRouter::send) refuses them.

use mazebot_types::{
    AprilTagType, Channel, DebugMessage, DecodeError, Direction, DriveCommand, FPoint,
    FollowerErrorCode, FollowerState, GetPose, LabyrinthCellInfo, LabyrinthWallInfo,
    LabyrinthWalls, LinkDirection, LogLevel, Packet, PathFollowerCommand, PathFollowerControl,
    PathFollowerParameters, PathFollowerStatus, PayloadSize, Point, Pose, RobotParameters,
    Telemetry, UserCommand, UserData, WALL_BYTES,
};

/// Encode the payload of `packet` (without the channel byte).
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut w = Writer::with_capacity(32);
    match packet {
        Packet::HostDebug(bytes) | Packet::Rdp(bytes) => w.bytes(bytes),
        Packet::Drive(cmd) => {
            w.i16(cmd.speed);
            w.i16(cmd.steering);
        }
        Packet::RobotParams(p) => {
            w.f32(p.axle_width);
            w.f32(p.dist_per_tick);
            w.f32(p.user1);
            w.f32(p.user2);
        }
        Packet::PathFollowCtrl(ctrl) => {
            w.u8(ctrl.command as u8);
            w.u8(ctrl.path.len() as u8);
            for p in &ctrl.path {
                w.point(*p);
            }
        }
        Packet::PathFollowParams(p) => {
            w.f32(p.lookahead_distance);
            w.u8(p.segment_limit);
            w.f32(p.position_tolerance);
            w.i16(p.speed);
            w.f32(p.steering_gain);
        }
        Packet::Pose(p) | Packet::AdditionalPose(p) | Packet::PoseReport(p) => w.pose(*p),
        Packet::UserCommand(c) => w.u8(c.id),
        Packet::Log(msg) => {
            w.u8(msg.level as u8);
            w.bytes(msg.text.as_bytes());
        }
        Packet::Telemetry(t) => {
            w.u8(t.bumpers);
            w.u8(t.contacts);
            w.i16(t.encoder1);
            w.i16(t.encoder2);
            for ir in t.infrared {
                w.u16(ir);
            }
            w.i16(t.user1);
            w.f32(t.user2);
        }
        Packet::PathFollowStatus(s) => {
            w.u8(s.state as u8);
            w.u8(s.error as u8);
            w.f32(s.progress);
            w.point(s.seg_start);
            w.point(s.seg_end);
            w.f32(s.lookahead.x);
            w.f32(s.lookahead.y);
        }
        Packet::LabyWalls(walls) => {
            w.u8(walls.cols);
            w.u8(walls.rows);
            w.bytes(&walls.walls);
        }
        Packet::GetPose(g) => w.u8(g.april_tag as u8),
        Packet::UserData(d) => {
            w.u16(d.uint16);
            w.u32(d.uint32);
            w.i16(d.int16);
            w.i32(d.int32);
            w.f32(d.float1);
            w.f32(d.float2);
            w.f32(d.float3);
            w.f32(d.float4);
        }
        Packet::LabyCellInfo(c) => {
            w.u8(c.col);
            w.u8(c.row);
            w.i8(c.info);
        }
        Packet::LabyWallInfo(c) => {
            w.u8(c.col);
            w.u8(c.row);
            w.u8(c.dir as u8);
            w.i8(c.info);
        }
    }
    w.into_inner()
}

/// Encode `[channel id][payload]`.
pub fn encode_frame(packet: &Packet) -> Vec<u8> {
    let payload = encode(packet);
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(packet.channel().id());
    frame.extend_from_slice(&payload);
    frame
}

/// Decode the payload `bytes` received on `channel`.
pub fn decode(channel: Channel, bytes: &[u8]) -> Result<Packet, DecodeError> {
    let expected = channel.payload_size();
    if !expected.accepts(bytes.len()) {
        return Err(DecodeError::LengthMismatch {
            channel,
            expected,
            actual: bytes.len(),
        });
    }
    let mut r = Reader::new(bytes);
    let packet = match channel {
        Channel::InDebug => Packet::HostDebug(bytes.to_vec()),
        Channel::OutRdp => Packet::Rdp(bytes.to_vec()),
        Channel::InDrive => Packet::Drive(DriveCommand {
            speed: r.i16(),
            steering: r.i16(),
        }),
        Channel::InRobotParams => Packet::RobotParams(RobotParameters {
            axle_width: r.f32(),
            dist_per_tick: r.f32(),
            user1: r.f32(),
            user2: r.f32(),
        }),
        Channel::InPathFollowCtrl => {
            let raw = r.u8();
            let command = PathFollowerCommand::from_u8(raw).ok_or(DecodeError::InvalidField {
                channel,
                field: "command",
                value: raw,
            })?;
            let len = r.u8() as usize;
            if bytes.len() != 2 + 4 * len {
                return Err(DecodeError::LengthMismatch {
                    channel,
                    expected: PayloadSize::Fixed(2 + 4 * len),
                    actual: bytes.len(),
                });
            }
            let path = (0..len).map(|_| r.point()).collect();
            Packet::PathFollowCtrl(PathFollowerControl { command, path })
        }
        Channel::InPathFollowParams => Packet::PathFollowParams(PathFollowerParameters {
            lookahead_distance: r.f32(),
            segment_limit: r.u8(),
            position_tolerance: r.f32(),
            speed: r.i16(),
            steering_gain: r.f32(),
        }),
        Channel::InPose => Packet::Pose(r.pose()),
        Channel::InAdditionalPose => Packet::AdditionalPose(r.pose()),
        Channel::OutPose => Packet::PoseReport(r.pose()),
        Channel::InUserCommand => Packet::UserCommand(UserCommand { id: r.u8() }),
        Channel::OutDebug => {
            let raw = r.u8();
            let level = LogLevel::from_u8(raw).ok_or(DecodeError::InvalidField {
                channel,
                field: "level",
                value: raw,
            })?;
            let text = std::str::from_utf8(&bytes[1..]).map_err(|e| DecodeError::InvalidField {
                channel,
                field: "text",
                value: bytes[1 + e.valid_up_to()],
            })?;
            Packet::Log(DebugMessage {
                level,
                text: text.to_owned(),
            })
        }
        Channel::OutTelemetry => Packet::Telemetry(Telemetry {
            bumpers: r.u8(),
            contacts: r.u8(),
            encoder1: r.i16(),
            encoder2: r.i16(),
            infrared: [r.u16(), r.u16(), r.u16(), r.u16(), r.u16()],
            user1: r.i16(),
            user2: r.f32(),
        }),
        Channel::OutPathFollowStatus => {
            let raw = r.u8();
            let state = FollowerState::from_u8(raw).ok_or(DecodeError::InvalidField {
                channel,
                field: "state",
                value: raw,
            })?;
            let raw = r.u8();
            let error = FollowerErrorCode::from_u8(raw).ok_or(DecodeError::InvalidField {
                channel,
                field: "error",
                value: raw,
            })?;
            Packet::PathFollowStatus(PathFollowerStatus {
                state,
                error,
                progress: r.f32(),
                seg_start: r.point(),
                seg_end: r.point(),
                lookahead: FPoint::new(r.f32(), r.f32()),
            })
        }
        Channel::OutLabyWalls => {
            let cols = r.u8();
            let rows = r.u8();
            let mut walls = [0u8; WALL_BYTES];
            walls.copy_from_slice(r.take(WALL_BYTES));
            Packet::LabyWalls(LabyrinthWalls { cols, rows, walls })
        }
        Channel::OutGetPose => {
            let raw = r.u8();
            let april_tag = AprilTagType::from_u8(raw).ok_or(DecodeError::InvalidField {
                channel,
                field: "april_tag_type",
                value: raw,
            })?;
            Packet::GetPose(GetPose { april_tag })
        }
        Channel::OutUserData => Packet::UserData(UserData {
            uint16: r.u16(),
            uint32: r.u32(),
            int16: r.i16(),
            int32: r.i32(),
            float1: r.f32(),
            float2: r.f32(),
            float3: r.f32(),
            float4: r.f32(),
        }),
        Channel::OutLabyCellInfo => Packet::LabyCellInfo(LabyrinthCellInfo {
            col: r.u8(),
            row: r.u8(),
            info: r.i8(),
        }),
        Channel::OutLabyWallInfo => {
            let col = r.u8();
            let row = r.u8();
            let raw = r.u8();
            let dir = Direction::from_u8(raw).ok_or(DecodeError::InvalidField {
                channel,
                field: "dir",
                value: raw,
            })?;
            Packet::LabyWallInfo(LabyrinthWallInfo {
                col,
                row,
                dir,
                info: r.i8(),
            })
        }
    };
    Ok(packet)
}

/// Decode a `[channel id][payload]` frame travelling in `direction`.
pub fn decode_frame(direction: LinkDirection, frame: &[u8]) -> Result<Packet, DecodeError> {
    let (&id, payload) = frame.split_first().ok_or(DecodeError::EmptyFrame)?;
    let channel =
        Channel::from_id(direction, id).ok_or(DecodeError::UnknownChannel { direction, id })?;
    decode(channel, payload)
}

// ────────────────────────────────────────────────────────────────────────────
// Little-endian helpers
// ────────────────────────────────────────────────────────────────────────────

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    fn u16(&mut self, v: u16) {
        self.bytes(&v.to_le_bytes());
    }

    fn i16(&mut self, v: i16) {
        self.bytes(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.bytes(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.bytes(&v.to_le_bytes());
    }

    fn point(&mut self, p: Point) {
        self.i16(p.x);
        self.i16(p.y);
    }

    fn pose(&mut self, p: Pose) {
        self.f32(p.x);
        self.f32(p.y);
        self.f32(p.theta);
    }
}

/// Cursor over a payload whose length was already validated.
///
/// Reads past the end yield zeroes instead of panicking; `decode` never
/// reaches that case because it checks lengths first.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let end = (self.pos + n).min(self.bytes.len());
        let start = self.pos.min(end);
        self.pos += n;
        &self.bytes[start..end]
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let src = self.take(N);
        out[..src.len()].copy_from_slice(src);
        out
    }

    fn u8(&mut self) -> u8 {
        self.array::<1>()[0]
    }

    fn i8(&mut self) -> i8 {
        self.u8() as i8
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.array())
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.array())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.array())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.array())
    }

    fn point(&mut self) -> Point {
        Point::new(self.i16(), self.i16())
    }

    fn pose(&mut self) -> Pose {
        Pose::new(self.f32(), self.f32(), self.f32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let bytes = encode(&packet);
        assert!(
            packet.channel().payload_size().accepts(bytes.len()),
            "{:?} encoded to {} bytes",
            packet.channel(),
            bytes.len()
        );
        let back = decode(packet.channel(), &bytes).expect("decode");
        assert_eq!(back, packet);
    }

    #[test]
    fn every_channel_roundtrips() {
        let samples = vec![
            Packet::HostDebug(b"ping".to_vec()),
            Packet::Drive(DriveCommand::new(-8191, 1200)),
            Packet::RobotParams(RobotParameters::default()),
            Packet::PathFollowCtrl(PathFollowerControl::new_path(vec![
                Point::new(0, 0),
                Point::new(253, -506),
            ])),
            Packet::PathFollowCtrl(PathFollowerControl::command(PathFollowerCommand::Pause)),
            Packet::PathFollowParams(PathFollowerParameters::default()),
            Packet::Pose(Pose::new(1.5, -2.25, 0.5)),
            Packet::UserCommand(UserCommand { id: 7 }),
            Packet::AdditionalPose(Pose::new(-100.0, 30.0, -3.0)),
            Packet::Log(DebugMessage::new(LogLevel::Warning, "wall ahead")),
            Packet::Telemetry(Telemetry {
                bumpers: 0b10101,
                contacts: 3,
                encoder1: -42,
                encoder2: 17,
                infrared: [10, 20, 30, 40, 50],
                user1: -1,
                user2: 0.25,
            }),
            Packet::PoseReport(Pose::new(0.0, 0.0, 3.0)),
            Packet::PathFollowStatus(PathFollowerStatus {
                state: FollowerState::Running,
                error: FollowerErrorCode::PathBlocked,
                progress: 0.5,
                seg_start: Point::new(1, 2),
                seg_end: Point::new(3, 4),
                lookahead: FPoint::new(2.5, 3.5),
            }),
            Packet::LabyWalls({
                let mut w = LabyrinthWalls::default();
                w.set_wall(3, 3, Direction::East, true);
                w
            }),
            Packet::GetPose(GetPose {
                april_tag: AprilTagType::Additional,
            }),
            Packet::UserData(UserData {
                uint16: 1,
                uint32: 2,
                int16: -3,
                int32: -4,
                float1: 5.0,
                float2: 6.0,
                float3: 7.0,
                float4: 8.0,
            }),
            Packet::Rdp(vec![0xde, 0xad]),
            Packet::LabyCellInfo(LabyrinthCellInfo {
                col: 6,
                row: 0,
                info: -128,
            }),
            Packet::LabyWallInfo(LabyrinthWallInfo {
                col: 1,
                row: 2,
                dir: Direction::West,
                info: 1,
            }),
        ];
        for packet in samples {
            roundtrip(packet);
        }
    }

    #[test]
    fn drive_layout_is_little_endian() {
        let bytes = encode(&Packet::Drive(DriveCommand::new(0x0102, -2)));
        assert_eq!(bytes, vec![0x02, 0x01, 0xfe, 0xff]);
        let frame = encode_frame(&Packet::Drive(DriveCommand::new(0x0102, -2)));
        assert_eq!(frame[0], 0x01);
        assert_eq!(&frame[1..], &bytes[..]);
    }

    #[test]
    fn fixed_sizes_match_records() {
        assert_eq!(encode(&Packet::Telemetry(Telemetry::default())).len(), 22);
        assert_eq!(
            encode(&Packet::PathFollowStatus(PathFollowerStatus::default())).len(),
            22
        );
        assert_eq!(encode(&Packet::UserData(UserData::default())).len(), 28);
        assert_eq!(
            encode(&Packet::PathFollowParams(PathFollowerParameters::default())).len(),
            15
        );
    }

    #[test]
    fn short_drive_payload_is_length_mismatch() {
        let err = decode(Channel::InDrive, &[0x01, 0x02, 0x03]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthMismatch {
                channel: Channel::InDrive,
                expected: PayloadSize::Fixed(4),
                actual: 3,
            }
        );
    }

    #[test]
    fn path_length_prefix_must_match() {
        // Claims two points, carries one.
        let bytes = [0x00, 0x02, 0x01, 0x00, 0x02, 0x00];
        assert!(matches!(
            decode(Channel::InPathFollowCtrl, &bytes),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn invalid_enum_bytes_rejected() {
        assert_eq!(
            decode(Channel::InPathFollowCtrl, &[0x09, 0x00]).unwrap_err(),
            DecodeError::InvalidField {
                channel: Channel::InPathFollowCtrl,
                field: "command",
                value: 0x09,
            }
        );
        assert!(matches!(
            decode(Channel::OutLabyWallInfo, &[0, 0, 4, 1]),
            Err(DecodeError::InvalidField { field: "dir", .. })
        ));
        assert!(matches!(
            decode(Channel::OutDebug, &[0x04, 0xff, 0xfe]),
            Err(DecodeError::InvalidField { field: "text", .. })
        ));
    }

    #[test]
    fn frame_errors() {
        assert_eq!(
            decode_frame(LinkDirection::Inbound, &[]).unwrap_err(),
            DecodeError::EmptyFrame
        );
        assert_eq!(
            decode_frame(LinkDirection::Inbound, &[0x07]).unwrap_err(),
            DecodeError::UnknownChannel {
                direction: LinkDirection::Inbound,
                id: 0x07,
            }
        );
        let packet = decode_frame(LinkDirection::Inbound, &[0x06, 0x04]).unwrap();
        assert_eq!(packet, Packet::UserCommand(UserCommand { id: 4 }));
        let packet = decode_frame(LinkDirection::Outbound, &[0x05, 0x01]).unwrap();
        assert_eq!(
            packet,
            Packet::GetPose(GetPose {
                april_tag: AprilTagType::Additional
            })
        );
    }

    #[test]
    fn codec_does_not_normalize() {
        let pose = Pose::new(0.0, 0.0, 10.0);
        let back = decode(Channel::InPose, &encode(&Packet::Pose(pose))).unwrap();
        assert_eq!(back, Packet::Pose(pose));
    }
}
