//! `mazebot-perception` – what the robot knows about itself and the maze.
//!
//! # Modules
//!
//! - [`pose`] – [`PoseEstimator`][pose::PoseEstimator]: fuses April-tag poses
//!   and wheel odometry into one heading-normalized pose.
//! - [`labyrinth`] – [`LabyrinthMap`][labyrinth::LabyrinthMap]: the wall grid
//!   built incrementally from wall observations, with symmetric recording.

pub mod labyrinth;
pub mod pose;

pub use labyrinth::LabyrinthMap;
pub use pose::{PoseEstimator, PoseSource};
