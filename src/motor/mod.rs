// Motor control module for the Picaterpillar base
//
// Provides:
// - Differential drive unit conversions (steps <-> meters/degrees)
// - Firmware command line formatting
// - Status decoding and the cached motor state
// - High-level motor controller API

pub mod commands;
mod controller;
pub mod kinematics;
pub mod state;

pub use commands::MotorCommand;
pub use controller::{CONSUMER_NAME, MotorController, MotorParams};
pub use kinematics::DriveGeometry;
pub use state::{
    MotorState, Obstacle, Position, Sensor, StatusReport, UltrasonicRanges, WheelStatus,
};
