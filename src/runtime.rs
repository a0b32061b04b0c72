// Fixed-rate loop bridging the control panel (zenoh) and the motor link
// Drains motion requests, publishes the cached motor state and link health,
// and stops when the serial link is lost.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

// local imports
use crate::config::{Config, LOOP_HZ, TOPIC_CMD_MOTOR, TOPIC_HEALTH, TOPIC_STATE_MOTOR};
use crate::messages::{HealthReport, MotorRequest};
use crate::motor::{MotorController, MotorParams};
use crate::uart::{Dispatcher, LinkConfig, LinkState, SerialTransport};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct Runtime {
    transport: Arc<SerialTransport>,
    dispatcher: Arc<Dispatcher>,
    motor: Arc<MotorController>,
}

impl Runtime {
    /// Open the serial link described by `config` and set up the motors
    pub fn start(config: &Config) -> Result<Self, BoxError> {
        let link_config = LinkConfig::from_config(config)?;
        let params = MotorParams::from_config(config)?;

        let transport = Arc::new(SerialTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(transport.clone()));
        transport.open(&link_config, dispatcher.clone())?;

        Ok(Self::new(transport, dispatcher, params))
    }

    /// Wire a motor controller onto an existing transport/dispatcher pair
    pub fn new(
        transport: Arc<SerialTransport>,
        dispatcher: Arc<Dispatcher>,
        params: MotorParams,
    ) -> Self {
        let motor = Arc::new(MotorController::new(transport.clone(), params));
        motor.setup(&dispatcher);

        Self {
            transport,
            dispatcher,
            motor,
        }
    }

    /// Process incoming request
    fn on_request(&self, request: MotorRequest) {
        info!("Received request: {:?}", &request);
        match request {
            MotorRequest::Move(m) => self.motor.drive(&m),
            MotorRequest::Stop => self.motor.stop(),
            MotorRequest::Patrol => self.motor.patrol(),
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            link: self.transport.state(),
            traffic: self.transport.stats(),
            dispatch: self.dispatcher.stats(),
        }
    }

    pub fn motor(&self) -> &Arc<MotorController> {
        &self.motor
    }

    /// Stop the robot and release the port
    pub async fn shutdown(&self) {
        self.motor.stop();
        self.transport.close().await;
    }
}

pub async fn run(config: Config) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_MOTOR).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE_MOTOR).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let runtime = Runtime::start(&config)?;
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Runtime started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_CMD_MOTOR);
    info!("Publishing to: {}, {}", TOPIC_STATE_MOTOR, TOPIC_HEALTH);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping motors");
                runtime.shutdown().await;
                return Ok(());
            }
        }

        // 1. Drain all pending requests (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MotorRequest>(&payload) {
                Ok(request) => runtime.on_request(request),
                Err(e) => warn!("Failed to parse request: {}", e),
            }
        }

        // 2. Publish cached motor state
        let state_json = serde_json::to_string(&runtime.motor.snapshot())?;
        pub_state.put(state_json).await?;

        // 3. Publish health
        let health = runtime.health();
        let health_json = serde_json::to_string(&health)?;
        pub_health.put(health_json).await?;

        // 4. Reconnecting is not our call; give up when the link is gone
        if let LinkState::Lost(reason) = health.link {
            error!("Serial link lost: {}", reason);
            return Err(format!("serial link lost: {}", reason).into());
        }
    }
}
