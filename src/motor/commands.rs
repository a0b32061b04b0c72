// Outbound command lines for the motor microcontroller
//
// Line formats (fields are positional, the firmware parses them as such):
//   M:C:<steps_per_rev>:<min_distance>:<max_rpm>:<kp>:<ki>:<kd>
//   M:M:<lo>:<ls>:<ro>:<rs>:<revs>:<diff_revs>:<duration>:<auto_stop>
//   M:S
//   P:0
//   P:<speed>:<timeout>:false

use serde_json::Number;
use std::fmt;

/// Commands understood by the motor firmware
#[derive(Debug, Clone, PartialEq)]
pub enum MotorCommand {
    /// One-time setup of step resolution, speed limit and PID gains.
    /// Tuning values go out as configured (`1.0` stays `1.0`).
    Calibrate {
        steps_per_revolution: u32,
        min_distance: Number,
        max_rpm: u32,
        kp: Number,
        ki: Number,
        kd: Number,
    },
    Move {
        left_orientation: i32,
        left_speed: i32,
        right_orientation: i32,
        right_speed: i32,
        revolutions: f64,
        diff_revolutions: f64,
        duration_ms: u32,
        auto_stop: bool,
    },
    Stop,
    CancelPatrol,
    Patrol { speed: Number, timeout_s: u32 },
}

/// The firmware compares against Python-style booleans
fn firmware_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

impl fmt::Display for MotorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calibrate {
                steps_per_revolution,
                min_distance,
                max_rpm,
                kp,
                ki,
                kd,
            } => write!(
                f,
                "M:C:{}:{}:{}:{}:{}:{}",
                steps_per_revolution, min_distance, max_rpm, kp, ki, kd
            ),
            Self::Move {
                left_orientation,
                left_speed,
                right_orientation,
                right_speed,
                revolutions,
                diff_revolutions,
                duration_ms,
                auto_stop,
            } => write!(
                f,
                "M:M:{}:{}:{}:{}:{:.2}:{:.2}:{}:{}",
                left_orientation,
                left_speed,
                right_orientation,
                right_speed,
                revolutions,
                diff_revolutions,
                duration_ms,
                firmware_bool(*auto_stop)
            ),
            Self::Stop => f.write_str("M:S"),
            Self::CancelPatrol => f.write_str("P:0"),
            Self::Patrol { speed, timeout_s } => write!(f, "P:{}:{}:false", speed, timeout_s),
        }
    }
}
