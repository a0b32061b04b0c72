// High-level motor controller
//
// Keeps the latest decoded motor status and turns motion requests into
// firmware command lines. Registered with the dispatcher as the consumer of
// motor status messages.

use serde_json::Number;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::{debug, info};

use super::commands::MotorCommand;
use super::kinematics::DriveGeometry;
use super::state::{MotorState, Obstacle, Position, StatusReport, UltrasonicRanges, WheelStatus};
use crate::config::{
    Config, ConfigError, KEY_KD, KEY_KI, KEY_KP, KEY_MAX_RPM, KEY_MIN_DISTANCE,
    KEY_OBSTACLE_RANGE, KEY_PATROL_SPEED, KEY_ROBOT_WIDTH, KEY_STEPS_PER_ROTATION,
    KEY_WHEEL_DIAMETER, PATROL_TIMEOUT_S,
};
use crate::messages::MoveRequest;
use crate::uart::{
    Dispatcher, LineWriter, LinkError, MessageConsumer, MessageType, Originator, WireMessage,
};

/// Registry name of the motor controller
pub const CONSUMER_NAME: &str = "motor_controller";

/// Motor constants, read once from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MotorParams {
    pub geometry: DriveGeometry,
    pub max_rpm: u32,
    pub steps_per_revolution: u32,
    pub min_distance: Number,
    pub kp: Number,
    pub ki: Number,
    pub kd: Number,
    pub patrol_speed: Number,
    /// Ultrasonic readings at or below this range (m) count as obstacles
    pub obstacle_range: f64,
}

impl MotorParams {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            geometry: DriveGeometry::new(
                config.get_f64(KEY_WHEEL_DIAMETER)?,
                config.get_f64(KEY_ROBOT_WIDTH)?,
            ),
            max_rpm: config.get_u32(KEY_MAX_RPM)?,
            steps_per_revolution: config.get_u32(KEY_STEPS_PER_ROTATION)?,
            min_distance: config.get_number(KEY_MIN_DISTANCE)?,
            kp: config.get_number(KEY_KP)?,
            ki: config.get_number(KEY_KI)?,
            kd: config.get_number(KEY_KD)?,
            patrol_speed: config.get_number(KEY_PATROL_SPEED)?,
            obstacle_range: config.get_f64(KEY_OBSTACLE_RANGE)?,
        })
    }

    pub fn calibration(&self) -> MotorCommand {
        MotorCommand::Calibrate {
            steps_per_revolution: self.steps_per_revolution,
            min_distance: self.min_distance.clone(),
            max_rpm: self.max_rpm,
            kp: self.kp.clone(),
            ki: self.ki.clone(),
            kd: self.kd.clone(),
        }
    }
}

pub struct MotorController {
    link: Arc<dyn LineWriter>,
    params: MotorParams,
    state: RwLock<MotorState>,
}

impl MotorController {
    pub fn new(link: Arc<dyn LineWriter>, params: MotorParams) -> Self {
        Self {
            link,
            params,
            state: RwLock::new(MotorState::default()),
        }
    }

    /// Send the calibration command and subscribe to motor status messages.
    /// Calling it again re-sends the calibration.
    pub fn setup(self: &Arc<Self>, dispatcher: &Dispatcher) {
        info!(
            "Calibrating motors: {} steps/rev, max {} rpm",
            self.params.steps_per_revolution, self.params.max_rpm
        );
        self.send(self.params.calibration());

        dispatcher.register(
            CONSUMER_NAME,
            Arc::clone(self) as Arc<dyn MessageConsumer>,
            Some(Originator::Motor),
            Some(MessageType::Status),
        );
    }

    /// Start a motion. Speeds are truncated to whole RPM, optional distance
    /// (m) and rotation (degrees) targets become revolution counts.
    pub fn drive(&self, request: &MoveRequest) {
        let geometry = &self.params.geometry;
        let revolutions = request
            .distance
            .map_or(0.0, |d| geometry.distance_to_revolutions(d));
        let diff_revolutions = request
            .rotation
            .map_or(0.0, |r| geometry.rotation_to_diff_revolutions(r));

        self.send(MotorCommand::Move {
            left_orientation: request.left.orientation,
            left_speed: request.left.speed as i32,
            right_orientation: request.right.orientation,
            right_speed: request.right.speed as i32,
            revolutions,
            diff_revolutions,
            duration_ms: request.duration_ms,
            auto_stop: request.auto_stop,
        });
    }

    /// Stop the motors and cancel any patrol, whatever the current state
    pub fn stop(&self) {
        info!("Stopping motors");
        self.send(MotorCommand::Stop);
        self.send(MotorCommand::CancelPatrol);
    }

    pub fn patrol(&self) {
        info!("Starting patrol at speed {}", self.params.patrol_speed);
        self.send(MotorCommand::Patrol {
            speed: self.params.patrol_speed.clone(),
            timeout_s: PATROL_TIMEOUT_S,
        });
    }

    fn send(&self, command: MotorCommand) {
        self.link.send(&command.to_string());
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MotorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// (left, right) wheel status
    pub fn get_motor_status(&self) -> (WheelStatus, WheelStatus) {
        let state = self.read_state();
        (state.left, state.right)
    }

    /// (signed distance, absolute distance)
    pub fn get_distance(&self) -> (f64, f64) {
        let state = self.read_state();
        (state.distance, state.abs_distance)
    }

    pub fn get_us_distances(&self) -> UltrasonicRanges {
        self.read_state().us
    }

    pub fn get_position(&self) -> Position {
        self.read_state().position
    }

    pub fn get_obstacles(&self) -> Vec<Obstacle> {
        self.read_state().obstacles.clone()
    }

    pub fn snapshot(&self) -> MotorState {
        self.read_state().clone()
    }

    pub fn params(&self) -> &MotorParams {
        &self.params
    }
}

impl MessageConsumer for MotorController {
    fn receive(&self, message: &WireMessage<'_>) -> Result<(), LinkError> {
        let report = StatusReport::parse(message)?;
        let next =
            MotorState::from_report(&report, &self.params.geometry, self.params.obstacle_range);
        debug!("Motor status: {:?}", report);

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::WheelDrive;
    use crate::uart::testing::RecordingWriter;

    fn controller() -> (Arc<RecordingWriter>, Arc<MotorController>) {
        let writer = Arc::new(RecordingWriter::default());
        let params = MotorParams::from_config(&Config::default()).unwrap();
        let motor = Arc::new(MotorController::new(writer.clone(), params));
        (writer, motor)
    }

    fn forward(distance: Option<f64>, rotation: Option<f64>) -> MoveRequest {
        MoveRequest {
            left: WheelDrive {
                orientation: 1,
                speed: 50.0,
            },
            right: WheelDrive {
                orientation: 1,
                speed: 50.0,
            },
            duration_ms: 1000,
            distance,
            rotation,
            auto_stop: true,
        }
    }

    #[test]
    fn test_setup_calibrates_and_registers() {
        let (writer, motor) = controller();
        let dispatcher = Dispatcher::new(writer.clone());
        motor.setup(&dispatcher);

        assert_eq!(writer.lines(), vec!["M:C:20:0.05:200:1.0:0.1:0.05"]);
        assert_eq!(dispatcher.consumer_names(), vec![CONSUMER_NAME]);

        // a second setup re-sends calibration but keeps one registration
        motor.setup(&dispatcher);
        assert_eq!(writer.lines().len(), 2);
        assert_eq!(dispatcher.consumer_names().len(), 1);
    }

    #[test]
    fn test_configured_values_sent_as_written() {
        let config = Config::from_json_str(
            r#"{
                "motor_kp": 1.0, "motor_ki": 0.0, "motor_kd": 2.0,
                "motor_max_rpm": 200.0, "motor_patrol_speed": 50.0
            }"#,
        )
        .unwrap();
        let writer = Arc::new(RecordingWriter::default());
        let params = MotorParams::from_config(&config).unwrap();
        let motor = Arc::new(MotorController::new(writer.clone(), params));

        motor.setup(&Dispatcher::new(writer.clone()));
        motor.patrol();
        assert_eq!(
            writer.lines(),
            vec!["M:C:20:0.05:200:1.0:0.0:2.0", "P:50.0:300:false"]
        );
    }

    #[test]
    fn test_drive_with_distance() {
        let (writer, motor) = controller();
        motor.drive(&forward(Some(1.0), None));
        assert_eq!(writer.lines(), vec!["M:M:1:50:1:50:4.90:0.00:1000:True"]);
    }

    #[test]
    fn test_drive_with_rotation_truncates_speed() {
        let (writer, motor) = controller();
        let mut request = forward(None, Some(90.0));
        request.left.speed = 30.9;
        request.right.orientation = 0;
        request.right.speed = 30.2;
        request.auto_stop = false;
        motor.drive(&request);
        assert_eq!(writer.lines(), vec!["M:M:1:30:0:30:0.00:1.23:1000:False"]);
    }

    #[test]
    fn test_stop_always_sends_both_lines() {
        let (writer, motor) = controller();
        writer.set_failing(true);
        motor.stop();
        assert_eq!(writer.lines(), vec!["M:S", "P:0"]);
    }

    #[test]
    fn test_patrol() {
        let (writer, motor) = controller();
        motor.patrol();
        assert_eq!(writer.lines(), vec!["P:50:300:false"]);
    }

    #[test]
    fn test_status_updates_cached_state() {
        let (writer, motor) = controller();
        let dispatcher = Dispatcher::new(writer.clone());
        motor.setup(&dispatcher);

        assert_eq!(motor.snapshot(), MotorState::default());
        let line = "M:S:40:120:38:118:2:3:1:0.8:0.2:1.5";
        assert_eq!(dispatcher.dispatch(line), 1);

        let (left, right) = motor.get_motor_status();
        assert_eq!(
            left,
            WheelStatus {
                speed_rpm: 120,
                duty: 40
            }
        );
        assert_eq!(
            right,
            WheelStatus {
                speed_rpm: 118,
                duty: 38
            }
        );

        let geometry = motor.params().geometry;
        let (distance, abs_distance) = motor.get_distance();
        assert_eq!(distance, geometry.steps_to_distance(2.0));
        assert_eq!(abs_distance, geometry.abs_steps_to_distance(3.0));
        assert_eq!(motor.get_position().heading, geometry.diff_steps_to_rotation(1.0));
        assert_eq!(motor.get_us_distances().front, 0.2);
        assert_eq!(motor.get_obstacles().len(), 1);

        // same input, same cached state
        let first = motor.snapshot();
        dispatcher.dispatch(line);
        assert_eq!(motor.snapshot(), first);
    }

    #[test]
    fn test_bad_status_leaves_state_untouched() {
        let (writer, motor) = controller();
        let dispatcher = Dispatcher::new(writer.clone());
        motor.setup(&dispatcher);

        dispatcher.dispatch("M:S:40:120:38:118:2:3:1:0.8:0.2:1.5");
        let before = motor.snapshot();

        // valid leading fields, garbage at the end
        dispatcher.dispatch("M:S:99:99:99:99:9:9:9:9:9:oops");
        dispatcher.dispatch("M:S:1:2:3");
        assert_eq!(motor.snapshot(), before);
        assert_eq!(dispatcher.stats().consumer_failures, 2);
    }

    #[test]
    fn test_other_messages_ignored() {
        let (writer, motor) = controller();
        let dispatcher = Dispatcher::new(writer.clone());
        motor.setup(&dispatcher);

        assert_eq!(dispatcher.dispatch("B:S:12.4"), 0);
        assert_eq!(dispatcher.dispatch("M:X:1:2:3:4:5:6:7:8:9:10"), 0);
        assert_eq!(motor.snapshot(), MotorState::default());
    }
}
