// Motor status decoding and the cached drive state

use serde::Serialize;

use super::kinematics::DriveGeometry;
use crate::uart::{LinkError, WireMessage};

/// Payload fields of an `M:S` status line
pub const STATUS_FIELDS: usize = 10;

/// Raw values of one status line, before unit conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    pub left_duty: i32,
    pub left_speed: i32,
    pub right_duty: i32,
    pub right_speed: i32,
    pub steps: f64,
    pub abs_steps: f64,
    pub diff_steps: f64,
    pub us_left: f64,
    pub us_front: f64,
    pub us_right: f64,
}

impl StatusReport {
    /// Decode the payload of a status message. Either every field parses or
    /// nothing is returned.
    pub fn parse(message: &WireMessage<'_>) -> Result<Self, LinkError> {
        let fields = Fields(&message.payload);
        if fields.0.len() != STATUS_FIELDS {
            return Err(fields.error(format!(
                "expected {} status fields, got {}",
                STATUS_FIELDS,
                fields.0.len()
            )));
        }

        Ok(Self {
            left_duty: fields.int(0, "left duty")?,
            left_speed: fields.int(1, "left speed")?,
            right_duty: fields.int(2, "right duty")?,
            right_speed: fields.int(3, "right speed")?,
            steps: fields.float(4, "steps")?,
            abs_steps: fields.float(5, "absolute steps")?,
            diff_steps: fields.float(6, "differential steps")?,
            us_left: fields.float(7, "left ultrasonic")?,
            us_front: fields.float(8, "front ultrasonic")?,
            us_right: fields.float(9, "right ultrasonic")?,
        })
    }
}

struct Fields<'a>(&'a [&'a str]);

impl Fields<'_> {
    fn error(&self, reason: String) -> LinkError {
        LinkError::malformed(self.0.join(":"), reason)
    }

    fn int(&self, index: usize, name: &str) -> Result<i32, LinkError> {
        self.0[index]
            .trim()
            .parse::<i32>()
            .map_err(|e| self.error(format!("{} (field {}): {}", name, index, e)))
    }

    fn float(&self, index: usize, name: &str) -> Result<f64, LinkError> {
        let value = self.0[index]
            .trim()
            .parse::<f64>()
            .map_err(|e| self.error(format!("{} (field {}): {}", name, index, e)))?;
        if !value.is_finite() {
            return Err(self.error(format!("{} (field {}) is not finite", name, index)));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WheelStatus {
    pub speed_rpm: i32,
    pub duty: i32,
}

/// Ultrasonic ranges in meters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UltrasonicRanges {
    pub left: f64,
    pub front: f64,
    pub right: f64,
}

/// Planar pose; x/y in meters, heading in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensor {
    Left,
    Front,
    Right,
}

/// Something an ultrasonic sensor sees within the obstacle range
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Obstacle {
    pub sensor: Sensor,
    pub distance: f64,
}

/// Last known drive state. All zero until the first status is decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MotorState {
    pub left: WheelStatus,
    pub right: WheelStatus,
    /// Signed distance traveled (m)
    pub distance: f64,
    pub abs_distance: f64,
    /// Cumulative rotation (degrees)
    pub rotation: f64,
    pub us: UltrasonicRanges,
    pub position: Position,
    pub obstacles: Vec<Obstacle>,
}

impl MotorState {
    /// Build the state described by a status report.
    /// Position is not integrated: x/y stay at the origin and the heading
    /// follows the cumulative rotation.
    pub fn from_report(
        report: &StatusReport,
        geometry: &DriveGeometry,
        obstacle_range: f64,
    ) -> Self {
        let rotation = geometry.diff_steps_to_rotation(report.diff_steps);
        let us = UltrasonicRanges {
            left: report.us_left,
            front: report.us_front,
            right: report.us_right,
        };

        Self {
            left: WheelStatus {
                speed_rpm: report.left_speed,
                duty: report.left_duty,
            },
            right: WheelStatus {
                speed_rpm: report.right_speed,
                duty: report.right_duty,
            },
            distance: geometry.steps_to_distance(report.steps),
            abs_distance: geometry.abs_steps_to_distance(report.abs_steps),
            rotation,
            us,
            position: Position {
                x: 0.0,
                y: 0.0,
                heading: rotation,
            },
            obstacles: detect_obstacles(&us, obstacle_range),
        }
    }
}

/// Readings of zero or below mean "no echo"
fn detect_obstacles(us: &UltrasonicRanges, range: f64) -> Vec<Obstacle> {
    [
        (Sensor::Left, us.left),
        (Sensor::Front, us.front),
        (Sensor::Right, us.right),
    ]
    .into_iter()
    .filter(|&(_, distance)| distance > 0.0 && distance <= range)
    .map(|(sensor, distance)| Obstacle { sensor, distance })
    .collect()
}
