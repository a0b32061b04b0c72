// Define message types exchanged with the control panel over zenoh

use serde::{Deserialize, Serialize};

use crate::uart::{DispatchStats, LinkState, LinkStats};

/// Orientation and speed (RPM) of one wheel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelDrive {
    pub orientation: i32,
    pub speed: f64,
}

fn default_auto_stop() -> bool {
    true
}

/// Motion request: per-wheel drive plus optional distance/rotation targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub left: WheelDrive,
    pub right: WheelDrive,
    pub duration_ms: u32,
    /// Target distance in meters
    #[serde(default)]
    pub distance: Option<f64>,
    /// Target rotation in degrees
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default = "default_auto_stop")]
    pub auto_stop: bool,
}

// Command from control panel/scripts -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MotorRequest {
    Move(MoveRequest),
    Stop,
    Patrol,
}

/// Health status published by runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub link: LinkState,
    pub traffic: LinkStats,
    pub dispatch: DispatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move_request() {
        let json = r#"{
            "action": "move",
            "left": {"orientation": 1, "speed": 50},
            "right": {"orientation": 0, "speed": 40.5},
            "duration_ms": 2000,
            "distance": 0.5
        }"#;
        let request: MotorRequest = serde_json::from_str(json).unwrap();
        let MotorRequest::Move(m) = request else {
            panic!("expected a move request");
        };
        assert_eq!(m.left.speed, 50.0);
        assert_eq!(m.right.orientation, 0);
        assert_eq!(m.distance, Some(0.5));
        assert_eq!(m.rotation, None);
        assert!(m.auto_stop);
    }

    #[test]
    fn test_parse_unit_requests() {
        let stop: MotorRequest = serde_json::from_str(r#"{"action": "stop"}"#).unwrap();
        assert_eq!(stop, MotorRequest::Stop);
        let patrol: MotorRequest = serde_json::from_str(r#"{"action": "patrol"}"#).unwrap();
        assert_eq!(patrol, MotorRequest::Patrol);
        assert!(serde_json::from_str::<MotorRequest>(r#"{"action": "fly"}"#).is_err());
    }

    #[test]
    fn test_health_report_json() {
        let report = HealthReport {
            link: LinkState::Lost("peer gone".to_string()),
            traffic: LinkStats::default(),
            dispatch: DispatchStats::default(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["link"]["state"], "lost");
        assert_eq!(json["link"]["reason"], "peer gone");
        assert_eq!(json["traffic"]["write_failures"], 0);
    }
}
