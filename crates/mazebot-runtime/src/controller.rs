//! [`Controller`] – the robot side of the link, wired together.
//!
//! Reception tasks call [`ChannelRouter::dispatch_frame`] on the shared
//! [`router`][Controller::router].  Pose and parameter packets are applied
//! right inside their handlers; follower commands, operator commands, manual
//! drive and host debug text are queued and picked up by the next
//! [`tick`][Controller::tick].
//!
//! Each tick:
//!
//! 1. **Drain** – apply every queued input.
//! 2. **Check** – fault the follower on a latched pose fault, or when the
//!    pose watchdog expires while running.
//! 3. **Decide** – RUNNING asks the [`PathFollower`]; IDLE / READY replay the
//!    last manual drive command; PAUSED / FAULTED stop.
//! 4. **Gatekeep** – the command passes the [`StateVerifier`] or becomes a
//!    stop.
//! 5. **Act** – the command goes to the [`DriveSink`].
//! 6. **Report** – follower status every cycle, the wall snapshot when the
//!    map changed, and a MAIN pose request every `pose_request_every` cycles.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mazebot_hal::RecordingDrive;
//! use mazebot_middleware::InMemoryTransport;
//! use mazebot_runtime::controller::{Controller, ControllerConfig};
//!
//! let transport = Arc::new(InMemoryTransport::new());
//! let mut controller = Controller::new(
//!     ControllerConfig::default(),
//!     transport.clone(),
//!     Box::new(RecordingDrive::new()),
//! )
//! .expect("controller");
//! controller.tick();
//! assert!(!transport.is_empty());
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use mazebot_hal::DriveSink;
use mazebot_kernel::{StateVerifier, Watchdog};
use mazebot_middleware::{ChannelRouter, EventBus, Topic, Transport};
use mazebot_perception::{LabyrinthMap, PoseEstimator};
use mazebot_types::{
    AprilTagType, CellIndex, Channel, DRIVE_LIMIT, DebugMessage, Direction, DriveCommand, Event,
    EventPayload, FollowerState, LabyrinthCellInfo, LabyrinthWallInfo, LogLevel, MazeError,
    Packet, PathFollowerCommand, PathFollowerControl, PathFollowerParameters, PathFollowerStatus,
    RobotParameters, Telemetry, UserCommand,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::gateway::{ControlSnapshot, GatewayAction, UserCommandGateway};
use crate::params::ParamSlots;
use crate::path_follower::PathFollower;

const EVENT_SOURCE: &str = "mazebot-runtime::controller";
const POSE_WATCHDOG_ID: &str = "pose";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Immutable settings for one [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Period of [`Controller::tick`]; also the follower's `dt`.
    pub control_period: Duration,
    /// How long a MAIN pose shadows ADDITIONAL poses; one control period
    /// when `None`.
    pub pose_freshness: Option<Duration>,
    /// Fault a running follower when no April-tag pose arrives for this
    /// long.  Disabled when `None`.
    pub pose_timeout: Option<Duration>,
    /// Send `GetPose(MAIN)` every this many cycles; `0` disables.
    pub pose_request_every: u32,
    /// Outbound debug packets per second; `0` disables the limit.
    pub debug_rate_limit: u32,
    pub max_speed: i16,
    pub max_steering: i16,
    /// Loaded at startup when present; otherwise the first host packet wins.
    pub robot_params: Option<RobotParameters>,
    pub follower_params: Option<PathFollowerParameters>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_period: Duration::from_millis(20),
            pose_freshness: None,
            pose_timeout: None,
            pose_request_every: 25,
            debug_rate_limit: 20,
            max_speed: DRIVE_LIMIT,
            max_steering: DRIVE_LIMIT,
            robot_params: None,
            follower_params: None,
        }
    }
}

/// Input queued by a reception task for the control task.
#[derive(Debug)]
enum ControlInput {
    Follower(PathFollowerControl),
    FollowerParams(PathFollowerParameters),
    User(UserCommand),
    Drive(DriveCommand),
    HostDebug(usize),
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

pub struct Controller {
    config: ControllerConfig,
    router: Arc<ChannelRouter>,
    estimator: Arc<PoseEstimator>,
    map: Arc<LabyrinthMap>,
    params: Arc<ParamSlots>,
    follower: PathFollower,
    verifier: StateVerifier,
    watchdog: Watchdog,
    drive: Box<dyn DriveSink>,
    inputs: mpsc::UnboundedReceiver<ControlInput>,
    bus: EventBus,
    /// Last manual command; replayed while IDLE / READY.
    manual: DriveCommand,
    cycles: u64,
    walls_sent: Option<u64>,
    pose_seen: Option<Instant>,
}

impl Controller {
    /// Build the controller and bind a handler to every IN channel.
    ///
    /// # Errors
    ///
    /// Returns [`MazeError::InvalidParameter`] if the configured parameters
    /// fail validation.
    pub fn new(
        config: ControllerConfig,
        transport: Arc<dyn Transport>,
        drive: Box<dyn DriveSink>,
    ) -> Result<Self, MazeError> {
        let params = Arc::new(ParamSlots::new());
        if let Some(p) = config.robot_params {
            params.load_robot(p)?;
        }
        if let Some(p) = config.follower_params {
            params.load_follower(p)?;
        }

        let bus = EventBus::default();
        let router = Arc::new(
            ChannelRouter::robot(transport)
                .with_debug_rate_limit(config.debug_rate_limit)
                .with_bus(bus.clone()),
        );
        let estimator = Arc::new(PoseEstimator::new(
            config.pose_freshness.unwrap_or(config.control_period),
        ));
        let map = Arc::new(LabyrinthMap::new());

        let follower = PathFollower::new(params.follower().unwrap_or_default())
            .with_limits(config.max_speed, config.max_steering);
        let verifier = StateVerifier::with_limits(config.max_speed, config.max_steering);

        let mut watchdog = Watchdog::new();
        if let Some(timeout) = config.pose_timeout {
            watchdog.register(POSE_WATCHDOG_ID, timeout);
        }

        let (tx, inputs) = mpsc::unbounded_channel();
        bind_handlers(&router, &estimator, &params, tx)?;

        info!(
            period_ms = config.control_period.as_millis() as u64,
            max_speed = config.max_speed,
            "controller ready"
        );

        Ok(Self {
            config,
            router,
            estimator,
            map,
            params,
            follower,
            verifier,
            watchdog,
            drive,
            inputs,
            bus,
            manual: DriveCommand::STOP,
            cycles: 0,
            walls_sent: None,
            pose_seen: None,
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Accessors
    // ────────────────────────────────────────────────────────────────────────

    /// Shared router; reception tasks feed it with `[channel][payload]` frames.
    pub fn router(&self) -> Arc<ChannelRouter> {
        Arc::clone(&self.router)
    }

    /// Event bus carrying inbound frames and follower alerts.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn estimator(&self) -> Arc<PoseEstimator> {
        Arc::clone(&self.estimator)
    }

    pub fn map(&self) -> Arc<LabyrinthMap> {
        Arc::clone(&self.map)
    }

    pub fn params(&self) -> Arc<ParamSlots> {
        Arc::clone(&self.params)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn follower_state(&self) -> FollowerState {
        self.follower.state()
    }

    pub fn follower_status(&self) -> PathFollowerStatus {
        self.follower.status()
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            progress_index: self.follower.progress_index(),
            progress: self.follower.progress(),
            state: self.follower.state(),
            packets_delivered: self.router.counters().delivered,
            visited_cells: self.map.visited_count(),
            pose: self.estimator.current_pose(),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Control cycle
    // ────────────────────────────────────────────────────────────────────────

    /// Run one control cycle and return the command applied to the wheels.
    pub fn tick(&mut self) -> DriveCommand {
        self.drain_inputs();
        self.check_pose();

        let requested = match self.follower.state() {
            FollowerState::Running => {
                let pose = self.estimator.current_pose();
                let dt = self.config.control_period.as_secs_f32();
                let map = Arc::clone(&self.map);
                self.track(|f| f.step(&pose, &map, dt))
            }
            FollowerState::Idle | FollowerState::Ready => self.manual,
            FollowerState::Paused | FollowerState::Faulted => DriveCommand::STOP,
        };

        let cmd = self.verifier.verified_or_stop(requested);
        if let Err(e) = self.drive.apply(cmd) {
            error!(error = %e, "drive sink failed");
            let reason = e.to_string();
            self.track(|f| f.fault(&reason));
        }

        self.report();
        cmd
    }

    /// Stop the wheels regardless of follower state, e.g. on shutdown.
    pub fn halt(&mut self) {
        self.manual = DriveCommand::STOP;
        match self.drive.apply(DriveCommand::STOP) {
            Ok(()) => info!("drive halted"),
            Err(e) => error!(error = %e, "failed to halt drive"),
        }
    }

    /// Telemetry from the hardware: integrate odometry and forward to the
    /// host.
    pub fn on_telemetry(&self, telemetry: Telemetry) {
        match self.params.robot() {
            Some(p) => {
                if let Err(e) = self.estimator.update_odometry(&telemetry, &p) {
                    debug!(error = %e, "odometry update rejected");
                }
            }
            None => trace!("no robot parameters yet, odometry skipped"),
        }
        self.send(Packet::Telemetry(telemetry));
    }

    /// A wall sensor saw (or did not see) a wall on side `dir` of `cell`.
    pub fn observe_wall(
        &self,
        cell: CellIndex,
        dir: Direction,
        present: bool,
    ) -> Result<(), MazeError> {
        self.map.record_wall(cell, dir, present)?;
        self.send(Packet::LabyWallInfo(LabyrinthWallInfo::observation(
            cell, dir, present,
        )));
        Ok(())
    }

    /// The robot entered `cell`; `info` annotates it for the host.
    pub fn visit_cell(&self, cell: CellIndex, info: i8) -> Result<(), MazeError> {
        let record = LabyrinthCellInfo {
            col: cell.col,
            row: cell.row,
            info,
        };
        self.map.record_cell_info(&record)?;
        self.send(Packet::LabyCellInfo(record));
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Private helpers
    // ────────────────────────────────────────────────────────────────────────

    fn drain_inputs(&mut self) {
        while let Ok(input) = self.inputs.try_recv() {
            match input {
                ControlInput::Follower(control) => self.apply_follower(&control),
                ControlInput::FollowerParams(params) => {
                    if self.follower.state() == FollowerState::Running {
                        debug!("applying follower parameters mid-run");
                    }
                    self.follower.set_params(params);
                }
                ControlInput::User(cmd) => self.apply_user(cmd),
                ControlInput::Drive(cmd) => match self.follower.state() {
                    FollowerState::Idle | FollowerState::Ready => self.manual = cmd,
                    state => debug!(?state, "manual drive ignored while following"),
                },
                ControlInput::HostDebug(len) => {
                    let ack = DebugMessage::new(LogLevel::Info, format!("debug: {len} bytes received"));
                    self.send(Packet::Log(ack));
                }
            }
        }
    }

    fn apply_follower(&mut self, control: &PathFollowerControl) {
        let was_faulted = self.follower.state() == FollowerState::Faulted;
        if let Err(e) = self.track(|f| f.handle(control)) {
            debug!(error = %e, "follower command not applied");
            return;
        }
        if was_faulted && control.command == PathFollowerCommand::Reset {
            self.estimator.clear_fault();
        }
    }

    fn apply_user(&mut self, cmd: UserCommand) {
        let Some(action) = UserCommandGateway::translate(cmd) else {
            return;
        };
        debug!(id = cmd.id, ?action, "user command");
        match action {
            GatewayAction::Stop if self.follower.state() == FollowerState::Running => {
                self.apply_follower(&PathFollowerControl::command(PathFollowerCommand::Pause));
            }
            GatewayAction::Stop => self.manual = DriveCommand::STOP,
            GatewayAction::Follower(command) => {
                self.apply_follower(&PathFollowerControl::command(command));
            }
            GatewayAction::SendWalls => self.send(Packet::LabyWalls(self.map.snapshot())),
            GatewayAction::ClearMap => self.map.clear(),
            GatewayAction::RequestPose(tag) => {
                self.send(Packet::GetPose(self.estimator.pose_request(tag)));
            }
            GatewayAction::SendUserData => {
                let data = UserCommandGateway::user_data(&self.snapshot());
                self.send(Packet::UserData(data));
            }
        }
    }

    fn check_pose(&mut self) {
        if let Some(reason) = self.estimator.fault() {
            self.track(|f| f.fault(&reason));
            return;
        }

        if let Some(fix) = self.estimator.last_fix()
            && self.pose_seen != Some(fix)
        {
            self.watchdog.heartbeat_at(POSE_WATCHDOG_ID, fix);
            self.pose_seen = Some(fix);
        }
        if self.config.pose_timeout.is_some()
            && self.follower.state() == FollowerState::Running
            && !self.watchdog.check_all().is_empty()
        {
            self.track(|f| f.fault("pose timed out"));
        }
    }

    fn report(&mut self) {
        self.send(Packet::PathFollowStatus(self.follower.status()));

        let revision = self.map.revision();
        if self.walls_sent != Some(revision) {
            self.send(Packet::LabyWalls(self.map.snapshot()));
            self.walls_sent = Some(revision);
        }

        self.cycles += 1;
        let every = u64::from(self.config.pose_request_every);
        if every > 0 && self.cycles % every == 0 {
            self.send(Packet::GetPose(self.estimator.pose_request(AprilTagType::Main)));
        }
    }

    /// Run `f` on the follower and announce any state change.
    fn track<R>(&mut self, f: impl FnOnce(&mut PathFollower) -> R) -> R {
        let from = self.follower.state();
        let result = f(&mut self.follower);
        let to = self.follower.state();
        if from != to {
            self.manual = DriveCommand::STOP;
            self.alert(EventPayload::FollowerTransition { from, to });
            if to == FollowerState::Faulted {
                self.alert(EventPayload::Fault {
                    component: "path_follower".to_string(),
                    message: format!("{:?}", self.follower.error()),
                });
            }
        }
        result
    }

    fn alert(&self, payload: EventPayload) {
        // No subscribers is fine.
        let _ = self
            .bus
            .publish_to(Topic::Alerts, Event::new(EVENT_SOURCE, payload));
    }

    fn send(&self, packet: Packet) {
        if let Err(e) = self.router.send(&packet) {
            debug!(channel = ?packet.channel(), error = %e, "packet not sent");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

fn bind_handlers(
    router: &ChannelRouter,
    estimator: &Arc<PoseEstimator>,
    params: &Arc<ParamSlots>,
    tx: mpsc::UnboundedSender<ControlInput>,
) -> Result<(), MazeError> {
    let queue = move |input: ControlInput| {
        if tx.send(input).is_err() {
            warn!("controller gone, input dropped");
        }
    };

    let q = queue.clone();
    router.register(Channel::InDebug, move |packet| {
        if let Packet::HostDebug(bytes) = packet {
            debug!(text = %String::from_utf8_lossy(&bytes), "host debug");
            q(ControlInput::HostDebug(bytes.len()));
        }
    })?;

    let q = queue.clone();
    router.register(Channel::InDrive, move |packet| {
        if let Packet::Drive(cmd) = packet {
            q(ControlInput::Drive(cmd));
        }
    })?;

    let p = Arc::clone(params);
    router.register(Channel::InRobotParams, move |packet| {
        if let Packet::RobotParams(robot) = packet
            && let Err(e) = p.load_robot(robot)
        {
            debug!(error = %e, "robot parameters not loaded");
        }
    })?;

    let q = queue.clone();
    router.register(Channel::InPathFollowCtrl, move |packet| {
        if let Packet::PathFollowCtrl(control) = packet {
            q(ControlInput::Follower(control));
        }
    })?;

    let p = Arc::clone(params);
    let q = queue.clone();
    router.register(Channel::InPathFollowParams, move |packet| {
        if let Packet::PathFollowParams(follower) = packet {
            match p.load_follower(follower) {
                Ok(()) => q(ControlInput::FollowerParams(follower)),
                Err(e) => debug!(error = %e, "path follower parameters not loaded"),
            }
        }
    })?;

    let e = Arc::clone(estimator);
    router.register(Channel::InPose, move |packet| {
        if let Packet::Pose(pose) = packet
            && let Err(err) = e.update_main(pose)
        {
            debug!(error = %err, "main pose rejected");
        }
    })?;

    let e = Arc::clone(estimator);
    router.register(Channel::InAdditionalPose, move |packet| {
        if let Packet::AdditionalPose(pose) = packet
            && let Err(err) = e.update_additional(pose)
        {
            debug!(error = %err, "additional pose rejected");
        }
    })?;

    router.register(Channel::InUserCommand, move |packet| {
        if let Packet::UserCommand(cmd) = packet {
            queue(ControlInput::User(cmd));
        }
    })?;

    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mazebot_hal::RecordingDrive;
    use mazebot_middleware::{InMemoryTransport, codec};
    use mazebot_types::{FollowerErrorCode, LinkDirection, Point, Pose};

    struct Rig {
        controller: Controller,
        transport: Arc<InMemoryTransport>,
        drive: RecordingDrive,
    }

    impl Rig {
        fn new(config: ControllerConfig) -> Self {
            let transport = Arc::new(InMemoryTransport::new());
            let drive = RecordingDrive::new();
            let controller =
                Controller::new(config, transport.clone(), Box::new(drive.clone())).unwrap();
            Self {
                controller,
                transport,
                drive,
            }
        }

        fn host(&self, packet: Packet) {
            let frame = codec::encode_frame(&packet);
            self.controller.router().dispatch_frame(&frame).unwrap();
        }

        fn user(&self, id: u8) {
            self.host(Packet::UserCommand(UserCommand { id }));
        }

        fn follower(&self, command: PathFollowerCommand) {
            self.host(Packet::PathFollowCtrl(PathFollowerControl::command(command)));
        }

        fn sent(&self) -> Vec<Packet> {
            self.transport
                .take()
                .iter()
                .map(|f| codec::decode_frame(LinkDirection::Outbound, f).unwrap())
                .collect()
        }

        fn last_status(&self) -> PathFollowerStatus {
            self.sent()
                .into_iter()
                .rev()
                .find_map(|p| match p {
                    Packet::PathFollowStatus(s) => Some(s),
                    _ => None,
                })
                .unwrap()
        }
    }

    fn quiet() -> ControllerConfig {
        ControllerConfig {
            pose_request_every: 0,
            ..ControllerConfig::default()
        }
    }

    /// Unicycle model matching the follower tests: 0.1 mm/s per speed unit.
    fn simulate(pose: Pose, cmd: DriveCommand, dt: f32) -> Pose {
        let v = f32::from(cmd.speed) * 0.1;
        let omega = -f32::from(cmd.steering) * 0.001;
        let theta = pose.theta + omega * dt;
        Pose::new(
            pose.x + v * dt * theta.cos(),
            pose.y + v * dt * theta.sin(),
            theta,
        )
    }

    #[test]
    fn every_inbound_channel_is_bound() {
        let rig = Rig::new(quiet());
        for channel in Channel::INBOUND {
            assert!(rig.controller.router().is_registered(channel), "{channel:?}");
        }
    }

    #[test]
    fn path_run_converges_then_holds_still() {
        let mut rig = Rig::new(quiet());
        let dt = rig.controller.config().control_period.as_secs_f32();
        let path = vec![Point::new(400, 0), Point::new(400, 300)];
        rig.host(Packet::PathFollowCtrl(PathFollowerControl::new_path(path)));
        rig.follower(PathFollowerCommand::Start);

        let mut pose = Pose::default();
        rig.host(Packet::Pose(pose));
        let mut finished = false;
        for _ in 0..3000 {
            let cmd = rig.controller.tick();
            if rig.controller.follower_state() == FollowerState::Ready {
                finished = true;
                break;
            }
            assert_eq!(rig.controller.follower_state(), FollowerState::Running);
            pose = simulate(pose, cmd, dt);
            rig.host(Packet::Pose(pose));
        }
        assert!(finished, "never reached the end of the path");

        let status = rig.last_status();
        assert_eq!(status.state, FollowerState::Ready);
        assert_eq!(status.progress, 1.0);

        rig.drive.clear();
        for _ in 0..20 {
            rig.controller.tick();
        }
        assert!(rig.drive.history().iter().all(DriveCommand::is_stop));
    }

    #[test]
    fn pause_freezes_and_start_resumes_same_target() {
        let mut rig = Rig::new(quiet());
        let path = vec![Point::new(0, 0), Point::new(500, 0), Point::new(900, 0)];
        rig.host(Packet::PathFollowCtrl(PathFollowerControl::new_path(path)));
        rig.user(1);
        rig.host(Packet::Pose(Pose::default()));
        assert!(rig.controller.tick().speed > 0);
        let running = rig.last_status();
        assert!(running.progress > 0.0);

        rig.user(2);
        assert_eq!(rig.controller.tick(), DriveCommand::STOP);
        rig.host(Packet::Pose(Pose::new(500.0, 0.0, 0.0)));
        rig.controller.tick();
        let paused = rig.last_status();
        assert_eq!(paused.state, FollowerState::Paused);
        assert_eq!(paused.progress, running.progress);
        assert_eq!(paused.seg_end, running.seg_end);

        rig.host(Packet::Pose(Pose::new(100.0, 0.0, 0.0)));
        rig.user(1);
        rig.controller.tick();
        let resumed = rig.last_status();
        assert_eq!(resumed.state, FollowerState::Running);
        assert_eq!(resumed.seg_end, running.seg_end);
    }

    #[test]
    fn malformed_drive_is_dropped() {
        let mut rig = Rig::new(quiet());
        let router = rig.controller.router();
        assert!(router.dispatch_frame(&[0x01, 0x10, 0x00, 0x20]).is_err());

        let counters = router.counters();
        assert_eq!(counters.decode_errors, 1);
        assert_eq!(counters.delivered, 0);
        assert_eq!(rig.controller.tick(), DriveCommand::STOP);
    }

    #[test]
    fn manual_drive_only_when_idle_or_ready() {
        let mut rig = Rig::new(quiet());
        rig.host(Packet::Drive(DriveCommand::new(1000, -200)));
        assert_eq!(rig.controller.tick(), DriveCommand::new(1000, -200));
        // Held until replaced.
        assert_eq!(rig.controller.tick(), DriveCommand::new(1000, -200));

        rig.host(Packet::PathFollowCtrl(PathFollowerControl::new_path(vec![
            Point::new(2000, 0),
        ])));
        rig.host(Packet::Pose(Pose::default()));
        // Loading a path changes state, which drops the manual command.
        assert_eq!(rig.controller.tick(), DriveCommand::STOP);

        rig.follower(PathFollowerCommand::Start);
        rig.host(Packet::Drive(DriveCommand::new(-500, 0)));
        let cmd = rig.controller.tick();
        assert!(cmd.speed > 0, "{cmd:?}");
    }

    #[test]
    fn halt_stops_the_wheels() {
        let mut rig = Rig::new(quiet());
        rig.host(Packet::Drive(DriveCommand::new(800, 0)));
        rig.controller.tick();
        rig.controller.halt();
        assert_eq!(rig.drive.last(), Some(DriveCommand::STOP));
        assert_eq!(rig.controller.tick(), DriveCommand::STOP);
    }

    #[test]
    fn user_stop_zeroes_manual_drive() {
        let mut rig = Rig::new(quiet());
        rig.host(Packet::Drive(DriveCommand::new(800, 0)));
        rig.controller.tick();
        rig.user(0);
        assert_eq!(rig.controller.tick(), DriveCommand::STOP);
    }

    #[test]
    fn over_limit_commands_become_stop() {
        let mut rig = Rig::new(ControllerConfig {
            max_speed: 500,
            ..quiet()
        });
        rig.host(Packet::Drive(DriveCommand::new(900, 0)));
        assert_eq!(rig.controller.tick(), DriveCommand::STOP);
        rig.host(Packet::Drive(DriveCommand::new(400, 0)));
        assert_eq!(rig.controller.tick(), DriveCommand::new(400, 0));
    }

    #[test]
    fn non_finite_pose_faults_until_reset() {
        let mut rig = Rig::new(quiet());
        rig.host(Packet::PathFollowCtrl(PathFollowerControl::new_path(vec![
            Point::new(500, 0),
        ])));
        rig.follower(PathFollowerCommand::Start);
        rig.host(Packet::Pose(Pose::default()));
        assert!(rig.controller.tick().speed > 0);

        rig.host(Packet::Pose(Pose::new(f32::NAN, 0.0, 0.0)));
        assert_eq!(rig.controller.tick(), DriveCommand::STOP);
        let status = rig.last_status();
        assert_eq!(status.state, FollowerState::Faulted);
        assert_eq!(status.error, FollowerErrorCode::SensorFault);

        rig.follower(PathFollowerCommand::Reset);
        rig.controller.tick();
        assert_eq!(rig.controller.follower_state(), FollowerState::Idle);
        assert!(!rig.controller.estimator().is_faulted());
    }

    #[test]
    fn silent_pose_source_faults_a_running_follower() {
        let mut rig = Rig::new(ControllerConfig {
            pose_timeout: Some(Duration::from_millis(1)),
            ..quiet()
        });
        rig.host(Packet::PathFollowCtrl(PathFollowerControl::new_path(vec![
            Point::new(500, 0),
        ])));
        rig.follower(PathFollowerCommand::Start);
        rig.host(Packet::Pose(Pose::default()));
        rig.controller.tick();
        std::thread::sleep(Duration::from_millis(20));
        rig.controller.tick();
        assert_eq!(rig.controller.follower_state(), FollowerState::Faulted);
    }

    #[test]
    fn walls_are_sent_when_the_map_changes() {
        let mut rig = Rig::new(quiet());
        rig.controller.tick();
        let first = rig.sent();
        assert!(first.iter().any(|p| matches!(p, Packet::LabyWalls(_))));

        rig.controller.tick();
        assert!(!rig.sent().iter().any(|p| matches!(p, Packet::LabyWalls(_))));

        let cell = CellIndex::new(2, 2);
        rig.controller.observe_wall(cell, Direction::North, true).unwrap();
        rig.controller.tick();
        let sent = rig.sent();
        assert!(sent.contains(&Packet::LabyWallInfo(LabyrinthWallInfo::observation(
            cell,
            Direction::North,
            true
        ))));
        let walls = sent
            .iter()
            .find_map(|p| match p {
                Packet::LabyWalls(w) => Some(*w),
                _ => None,
            })
            .unwrap();
        assert!(walls.has_wall(1, 2, Direction::South));
    }

    #[test]
    fn out_of_bounds_observations_are_rejected() {
        let rig = Rig::new(quiet());
        assert!(matches!(
            rig.controller.observe_wall(CellIndex::new(7, 0), Direction::North, true),
            Err(MazeError::BoundsViolation { .. })
        ));
        assert!(rig.controller.visit_cell(CellIndex::new(0, 9), 1).is_err());
        assert!(rig.transport.is_empty());
    }

    #[test]
    fn user_commands_reach_map_and_pose_requests() {
        let mut rig = Rig::new(quiet());
        rig.controller.visit_cell(CellIndex::new(3, 3), 5).unwrap();
        rig.controller.tick();
        rig.sent();

        rig.user(7);
        rig.user(8);
        rig.user(5);
        rig.user(200);
        rig.controller.tick();
        let sent = rig.sent();
        assert!(sent.contains(&Packet::GetPose(mazebot_types::GetPose {
            april_tag: AprilTagType::Additional
        })));
        let data = sent
            .iter()
            .find_map(|p| match p {
                Packet::UserData(d) => Some(*d),
                _ => None,
            })
            .unwrap();
        assert_eq!(data.int32, 1);
        assert_eq!(rig.controller.map().visited_count(), 0);
    }

    #[test]
    fn main_pose_is_requested_periodically() {
        let mut rig = Rig::new(ControllerConfig {
            pose_request_every: 3,
            ..ControllerConfig::default()
        });
        for _ in 0..6 {
            rig.controller.tick();
        }
        let requests = rig
            .sent()
            .into_iter()
            .filter(|p| matches!(p, Packet::GetPose(g) if g.april_tag == AprilTagType::Main))
            .count();
        assert_eq!(requests, 2);
    }

    #[test]
    fn host_debug_is_acknowledged() {
        let mut rig = Rig::new(quiet());
        rig.host(Packet::HostDebug(b"hello".to_vec()));
        rig.controller.tick();
        assert!(rig.sent().iter().any(
            |p| matches!(p, Packet::Log(m) if m.level == LogLevel::Info && m.text.contains('5'))
        ));
    }

    #[test]
    fn host_parameters_load_once() {
        let rig = Rig::new(quiet());
        let first = RobotParameters {
            axle_width: 90.0,
            ..RobotParameters::default()
        };
        rig.host(Packet::RobotParams(first));
        rig.host(Packet::RobotParams(RobotParameters::default()));
        assert_eq!(rig.controller.params().robot(), Some(first));

        rig.host(Packet::PathFollowParams(PathFollowerParameters::default()));
        assert!(rig.controller.params().follower().is_some());
    }

    #[test]
    fn configured_parameters_win_over_host() {
        let rig = Rig::new(ControllerConfig {
            robot_params: Some(RobotParameters::default()),
            ..quiet()
        });
        rig.host(Packet::RobotParams(RobotParameters {
            axle_width: 10.0,
            ..RobotParameters::default()
        }));
        assert_eq!(rig.controller.params().robot(), Some(RobotParameters::default()));
    }

    #[test]
    fn invalid_configured_parameters_are_an_error() {
        let config = ControllerConfig {
            robot_params: Some(RobotParameters {
                axle_width: 0.0,
                ..RobotParameters::default()
            }),
            ..quiet()
        };
        let result = Controller::new(
            config,
            Arc::new(InMemoryTransport::new()),
            Box::new(RecordingDrive::new()),
        );
        assert!(matches!(result, Err(MazeError::InvalidParameter { .. })));
    }

    #[test]
    fn telemetry_drives_odometry_and_is_forwarded() {
        let rig = Rig::new(ControllerConfig {
            robot_params: Some(RobotParameters {
                axle_width: 100.0,
                dist_per_tick: 1.0,
                ..RobotParameters::default()
            }),
            ..quiet()
        });
        rig.controller.on_telemetry(Telemetry::default());
        rig.controller.on_telemetry(Telemetry {
            encoder1: 50,
            encoder2: 50,
            ..Telemetry::default()
        });
        let pose = rig.controller.estimator().current_pose();
        assert!((pose.x - 50.0).abs() < 1e-3, "{pose:?}");
        assert_eq!(
            rig.sent()
                .iter()
                .filter(|p| matches!(p, Packet::Telemetry(_)))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn transitions_are_published_on_the_bus() {
        let mut rig = Rig::new(quiet());
        let mut alerts = rig.controller.bus().subscribe_to(Topic::Alerts);
        rig.host(Packet::PathFollowCtrl(PathFollowerControl::new_path(vec![
            Point::new(100, 0),
        ])));
        rig.controller.tick();

        let event = alerts.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::FollowerTransition {
                from: FollowerState::Idle,
                to: FollowerState::Ready
            }
        ));
        assert_eq!(event.source, EVENT_SOURCE);
    }

    #[tokio::test]
    async fn faults_are_published_with_their_reason() {
        let mut rig = Rig::new(quiet());
        let mut alerts = rig.controller.bus().subscribe_to(Topic::Alerts);
        rig.host(Packet::Pose(Pose::new(f32::NAN, 0.0, 0.0)));
        rig.controller.tick();

        let transition = alerts.recv().await.unwrap();
        assert!(matches!(
            transition.payload,
            EventPayload::FollowerTransition {
                to: FollowerState::Faulted,
                ..
            }
        ));
        match alerts.recv().await.unwrap().payload {
            EventPayload::Fault { component, message } => {
                assert_eq!(component, "path_follower");
                assert_eq!(message, "SensorFault");
            }
            other => panic!("unexpected alert {other:?}"),
        }
    }
}
