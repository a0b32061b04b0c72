// Differential drive unit conversions
// Converts between the motor controller's step/revolution counts and
// physical units (meters, degrees).

use std::f64::consts::PI;

/// Drive geometry, both values in millimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveGeometry {
    pub wheel_diameter: f64,
    pub robot_width: f64,
}

impl DriveGeometry {
    pub fn new(wheel_diameter: f64, robot_width: f64) -> Self {
        Self {
            wheel_diameter,
            robot_width,
        }
    }

    /// Signed distance (m) for a forward step count
    pub fn steps_to_distance(&self, steps: f64) -> f64 {
        steps * PI * self.wheel_diameter / 1000.0
    }

    /// Absolute distance for an absolute step count.
    ///
    /// Unlike `steps_to_distance` this is not divided by 1000; the value has
    /// always been published on this scale and consumers depend on it.
    pub fn abs_steps_to_distance(&self, abs_steps: f64) -> f64 {
        abs_steps.abs() * PI * self.wheel_diameter
    }

    /// Rotation (degrees) for a differential step count
    pub fn diff_steps_to_rotation(&self, diff_steps: f64) -> f64 {
        diff_steps * 180.0 * self.wheel_diameter / self.robot_width
    }

    /// Wheel revolutions needed to travel `distance` meters
    pub fn distance_to_revolutions(&self, distance: f64) -> f64 {
        1000.0 * distance / (PI * self.wheel_diameter)
    }

    /// Differential revolutions needed to turn `rotation` degrees
    pub fn rotation_to_diff_revolutions(&self, rotation: f64) -> f64 {
        rotation * self.robot_width / (180.0 * self.wheel_diameter)
    }
}
