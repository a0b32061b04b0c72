// Timeouts, topics, tunable robot parameters
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// Runtime loop frequency (command drain + state publish)
pub const LOOP_HZ: u64 = 10;

// Zenoh topics
pub const TOPIC_CMD_MOTOR: &str = "picaterpillar/cmd/motor"; // motion requests
pub const TOPIC_STATE_MOTOR: &str = "picaterpillar/state/motor"; // cached motor state
pub const TOPIC_HEALTH: &str = "picaterpillar/state/health"; // link health

// Serial link
pub const DEFAULT_UART_PORT: &str = "/dev/serial0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Read timeout of the reader thread, bounds how long close() waits for it
pub const READ_TIMEOUT: Duration = Duration::from_millis(50);

// Patrol timeout sent with every patrol command (seconds)
pub const PATROL_TIMEOUT_S: u32 = 300;

// Configuration keys
pub const KEY_UART_PORT: &str = "uart_port";
pub const KEY_UART_BAUDRATE: &str = "uart_baudrate";
pub const KEY_WHEEL_DIAMETER: &str = "wheel_d";
pub const KEY_ROBOT_WIDTH: &str = "robot_width";
pub const KEY_MAX_RPM: &str = "motor_max_rpm";
pub const KEY_STEPS_PER_ROTATION: &str = "motor_steps_per_rotation";
pub const KEY_MIN_DISTANCE: &str = "motor_min_distance";
pub const KEY_KP: &str = "motor_kp";
pub const KEY_KI: &str = "motor_ki";
pub const KEY_KD: &str = "motor_kd";
pub const KEY_PATROL_SPEED: &str = "motor_patrol_speed";
pub const KEY_OBSTACLE_RANGE: &str = "us_obstacle_range";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing config key: {key}")]
    Missing { key: String },

    #[error("Config key {key} is not a valid {expected}: {value}")]
    InvalidType {
        key: String,
        expected: &'static str,
        value: Value,
    },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config file must contain a JSON object")]
    NotAnObject,
}

/// Process-wide key/value store of tunable robot parameters
#[derive(Debug, Clone)]
pub struct Config {
    values: HashMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = [
            (KEY_UART_PORT, Value::from(DEFAULT_UART_PORT)),
            (KEY_UART_BAUDRATE, Value::from(DEFAULT_BAUDRATE)),
            (KEY_WHEEL_DIAMETER, Value::from(65)), // mm
            (KEY_ROBOT_WIDTH, Value::from(160)),   // mm
            (KEY_MAX_RPM, Value::from(200)),
            (KEY_STEPS_PER_ROTATION, Value::from(20)),
            (KEY_MIN_DISTANCE, Value::from(0.05)),
            (KEY_KP, Value::from(1.0)),
            (KEY_KI, Value::from(0.1)),
            (KEY_KD, Value::from(0.05)),
            (KEY_PATROL_SPEED, Value::from(50)),
            (KEY_OBSTACLE_RANGE, Value::from(0.3)), // m
        ];

        Self {
            values: defaults
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }
}

impl Config {
    /// Empty store, nothing set
    pub fn empty() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Load a JSON object from `path` and merge it over the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse a JSON object and merge it over the defaults
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let overrides: Map<String, Value> = match serde_json::from_str(text)? {
            Value::Object(map) => map,
            _ => return Err(ConfigError::NotAnObject),
        };

        let mut config = Self::default();
        config.values.extend(overrides);
        Ok(config)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn require(&self, key: &str) -> Result<&Value, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing {
            key: key.to_string(),
        })
    }

    fn invalid(key: &str, expected: &'static str, value: &Value) -> ConfigError {
        ConfigError::InvalidType {
            key: key.to_string(),
            expected,
            value: value.clone(),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ConfigError> {
        let value = self.require(key)?;
        value
            .as_str()
            .ok_or_else(|| Self::invalid(key, "string", value))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        let value = self.require(key)?;
        value
            .as_f64()
            .ok_or_else(|| Self::invalid(key, "number", value))
    }

    /// Number exactly as configured, so `1.0` is written back as `1.0`
    pub fn get_number(&self, key: &str) -> Result<Number, ConfigError> {
        match self.require(key)? {
            Value::Number(n) => Ok(n.clone()),
            other => Err(Self::invalid(key, "number", other)),
        }
    }

    /// Whole numbers written as decimals (`200.0`) are accepted
    pub fn get_u32(&self, key: &str) -> Result<u32, ConfigError> {
        let value = self.require(key)?;
        value
            .as_u64()
            .or_else(|| {
                value
                    .as_f64()
                    .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                    .map(|v| v as u64)
            })
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Self::invalid(key, "unsigned integer", value))
    }
}
