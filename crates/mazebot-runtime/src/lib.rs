//! `mazebot-runtime` – the robot's control loop.
//!
//! # Modules
//!
//! - [`controller`] – [`Controller`][controller::Controller]: binds every IN
//!   channel, runs the per-cycle drain / check / decide / gatekeep / act /
//!   report sequence and owns the drive output.
//! - [`path_follower`] – [`PathFollower`][path_follower::PathFollower]: the
//!   IDLE / READY / RUNNING / PAUSED / FAULTED state machine and its
//!   lookahead steering law.
//! - [`gateway`] – [`UserCommandGateway`][gateway::UserCommandGateway]:
//!   operator command ids to controller actions, and the user data reply.
//! - [`params`] – [`ParamSlots`][params::ParamSlots]: load-once robot and
//!   follower parameters.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging with optional OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod controller;
pub mod gateway;
pub mod params;
pub mod path_follower;
pub mod telemetry;

pub use controller::{Controller, ControllerConfig};
pub use gateway::{ControlSnapshot, GatewayAction, UserCommandGateway};
pub use params::ParamSlots;
pub use path_follower::PathFollower;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
