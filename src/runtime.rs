// 50 Hz drivetrain loop with watchdog
// If the command stream stops (teleop crashed, link dropped) the watchdog
// stops the drivetrain instead of repeating the last velocity forever.

use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    CMD_TIMEOUT, DrivetrainConfig, TOPIC_CMD_BASE, TOPIC_CMD_CONTROL, TOPIC_HEALTH, TOPIC_TELEMETRY,
};
use crate::drive::{DriveError, DriveTelemetry, Drivetrain, Pose};
use crate::drive::sim::SimRobot;
use crate::messages::{BaseCommand, ControlCommand, RuntimeHealth};

/// Direct module command that stays active until a base command or stop.
/// The other modules are held stopped while it is active.
#[derive(Debug, Clone, Copy)]
enum ModuleOverride {
    State { index: usize, speed: f64, angle_deg: f64 },
    Output { index: usize, drive: f64, steer: f64 },
}

impl ModuleOverride {
    fn apply(&self, drivetrain: &mut Drivetrain) -> Result<(), DriveError> {
        match *self {
            ModuleOverride::State {
                index,
                speed,
                angle_deg,
            } => drivetrain.set_module_state(index, speed, angle_deg),
            ModuleOverride::Output { index, drive, steer } => {
                drivetrain.set_module_raw_output(index, drive, steer)
            }
        }
    }
}

pub struct Runtime {
    drivetrain: Drivetrain,
    latest_cmd: Option<BaseCommand>,
    cmd_received_at: Instant,
    module_override: Option<ModuleOverride>,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(drivetrain: Drivetrain) -> Self {
        Self {
            drivetrain,
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            module_override: None,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn drivetrain(&self) -> &Drivetrain {
        &self.drivetrain
    }

    /// Process incoming body velocity command
    pub fn on_command(&mut self, cmd: BaseCommand, now: Instant) {
        debug!("Received command: {:?}", &cmd);
        if self.module_override.take().is_some() {
            info!("Module override cleared by base command");
        }
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    /// Process incoming control request
    pub fn on_control(&mut self, cmd: ControlCommand) {
        info!("Received control: {:?}", &cmd);
        match cmd {
            ControlCommand::Stop => {
                self.latest_cmd = None;
                self.module_override = None;
                self.drivetrain.stop();
            }
            ControlCommand::Reset => {
                self.latest_cmd = None;
                self.module_override = None;
                self.drivetrain.reset();
            }
            ControlCommand::ResetPose { x, y, theta } => {
                self.drivetrain.reset_pose(Pose::new(x, y, theta));
            }
            ControlCommand::SetMaxSpeed { speed } => self.drivetrain.set_max_speed(speed),
            ControlCommand::SetMaxAngularSpeed { speed } => {
                self.drivetrain.set_max_angular_speed(speed)
            }
            ControlCommand::SetModuleState {
                index,
                speed,
                angle_deg,
            } => self.start_override(ModuleOverride::State {
                index,
                speed,
                angle_deg,
            }),
            ControlCommand::SetModuleOutput { index, drive, steer } => {
                self.start_override(ModuleOverride::Output { index, drive, steer })
            }
        }
    }

    fn start_override(&mut self, module_override: ModuleOverride) {
        self.drivetrain.stop();
        match module_override.apply(&mut self.drivetrain) {
            Ok(()) => self.module_override = Some(module_override),
            Err(e) => warn!("Rejected module command: {}", e),
        }
    }

    /// Run one cycle now.
    pub fn step(&mut self) -> DriveTelemetry {
        self.step_at(Instant::now())
    }

    /// Run one cycle: apply the command (or the watchdog), update odometry,
    /// refresh health and return the telemetry snapshot.
    pub fn step_at(&mut self, now: Instant) -> DriveTelemetry {
        let stale = match (self.module_override, self.latest_cmd) {
            (Some(o), _) => {
                // Only the overridden module may move
                self.drivetrain.stop();
                if let Err(e) = o.apply(&mut self.drivetrain) {
                    warn!("Module override failed: {}", e);
                    self.module_override = None;
                }
                false
            }
            (None, Some(cmd)) if now.saturating_duration_since(self.cmd_received_at) <= CMD_TIMEOUT => {
                self.drivetrain
                    .drive(cmd.x_vel, cmd.y_vel, cmd.theta_vel, cmd.field_relative);
                false
            }
            (None, cmd) => {
                // Watchdog triggered (or no command ever received) - stop the robot
                if cmd.is_some() && self.health == RuntimeHealth::Ok {
                    let cmd_age = now.saturating_duration_since(self.cmd_received_at);
                    warn!("Command stale ({:?} old), stopping drivetrain", cmd_age);
                }
                self.drivetrain.stop();
                true
            }
        };

        self.drivetrain.periodic();
        let telemetry = self.drivetrain.telemetry();

        let health = if telemetry.has_sensor_fault() {
            RuntimeHealth::SensorFault
        } else if stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        };
        if health != self.health {
            info!("Health: {:?} -> {:?}", self.health, health);
        }
        self.health = health;

        telemetry
    }
}

pub async fn run(config: DrivetrainConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let period = config.period_s;
    let sim = SimRobot::new(&config);
    let drivetrain = Drivetrain::new(config, sim.hardware())?;
    info!("Using simulated drivetrain hardware");

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_base = session.declare_subscriber(TOPIC_CMD_BASE).await?;
    let sub_control = session.declare_subscriber(TOPIC_CMD_CONTROL).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(drivetrain);
    let mut tick = interval(Duration::from_secs_f64(period));

    info!(
        "Runtime started: {:.0}Hz loop, {}ms watchdog timeout",
        1.0 / period,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_BASE, TOPIC_CMD_CONTROL);
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Advance the simulated plant by one period
        sim.step(period);

        // 2. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_base.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<BaseCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd, Instant::now()),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_control.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ControlCommand>(&payload) {
                Ok(cmd) => runtime.on_control(cmd),
                Err(e) => warn!("Failed to parse control command: {}", e),
            }
        }

        // 3. Run the drivetrain cycle (includes watchdog logic)
        let telemetry = runtime.step();

        // 4. Publish telemetry and health
        let telemetry_json = serde_json::to_string(&telemetry)?;
        pub_telemetry.put(telemetry_json).await?;

        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}
