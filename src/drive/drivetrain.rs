// Drivetrain coordinator
// Owns the four modules, the kinematics and the pose estimator. Commands
// flow body velocity -> module states -> actuators; measurements flow
// module states + heading -> pose.

use tracing::{debug, info, warn};

use super::DriveError;
use super::geometry::{ChassisSpeeds, ModuleState, Pose, Translation2d, normalize_angle};
use super::hardware::{DrivetrainHardware, HeadingSensor, Reading, SensorGuard, VoltageSource};
use super::kinematics::{MODULE_COUNT, SwerveKinematics, apply_deadband, desaturate};
use super::module::SwerveModule;
use super::odometry::PoseEstimator;
use super::telemetry::{DriveTelemetry, ModuleTelemetry};
use crate::config::{ConfigError, DrivetrainConfig};

pub struct Drivetrain {
    config: DrivetrainConfig,
    kinematics: SwerveKinematics,
    modules: [SwerveModule; MODULE_COUNT],
    odometry: PoseEstimator,

    heading_sensor: Box<dyn HeadingSensor>,
    voltage_source: Box<dyn VoltageSource>,
    heading_guard: SensorGuard,
    voltage_guard: SensorGuard,
    // Raw degrees / volts, valid until the end of periodic()
    heading_sample: Option<Reading>,
    voltage_sample: Option<Reading>,
    last_heading: Reading,
    last_voltage: Reading,

    max_speed: f64,
    max_angular_speed: f64,
    commanded: ChassisSpeeds,
}

impl Drivetrain {
    /// Validate `config`, take ownership of the devices, zero the heading
    /// sensor and start odometry at the origin.
    pub fn new(config: DrivetrainConfig, hardware: DrivetrainHardware) -> Result<Self, ConfigError> {
        config.validate()?;
        let kinematics = SwerveKinematics::new(config.locations())?;

        let DrivetrainHardware {
            modules,
            heading,
            voltage,
        } = hardware;

        let mut index = 0;
        let modules = modules.map(|hw| {
            let module = SwerveModule::new(&config.modules[index], &config, hw);
            index += 1;
            module
        });

        let odometry = PoseEstimator::new(kinematics.clone(), 0.0, Pose::default());

        let mut drivetrain = Self {
            max_speed: config.max_speed_mps,
            max_angular_speed: config.max_angular_speed_rps,
            kinematics,
            modules,
            odometry,
            heading_sensor: heading,
            voltage_source: voltage,
            heading_guard: SensorGuard::new("heading sensor"),
            voltage_guard: SensorGuard::new("bus voltage"),
            heading_sample: None,
            voltage_sample: None,
            last_heading: Reading::Lost,
            last_voltage: Reading::Lost,
            commanded: ChassisSpeeds::default(),
            config,
        };

        drivetrain.zero_heading();
        let heading = drivetrain.heading();
        drivetrain.odometry.reset(Pose::default(), heading);
        drivetrain.voltage();
        drivetrain.finish_cycle();

        info!(
            "Drivetrain ready: {} modules, max {:.2} m/s, {:.2} rad/s",
            MODULE_COUNT, drivetrain.max_speed, drivetrain.max_angular_speed
        );
        Ok(drivetrain)
    }

    /// Command a body velocity in m/s and rad/s.
    ///
    /// Axes below the deadband are zeroed, the translation and rotation are
    /// limited to the current speed caps, and the resulting module speeds
    /// are desaturated to the rated maximum.
    pub fn drive(&mut self, vx: f64, vy: f64, omega: f64, field_relative: bool) {
        let vx = finite_or_zero("vx", vx);
        let vy = finite_or_zero("vy", vy);
        let omega = finite_or_zero("omega", omega);

        let linear_threshold = self.config.deadband * self.config.max_speed_mps;
        let angular_threshold = self.config.deadband * self.config.max_angular_speed_rps;

        self.command(
            apply_deadband(vx, linear_threshold),
            apply_deadband(vy, linear_threshold),
            apply_deadband(omega, angular_threshold),
            field_relative,
        );
    }

    /// Command fractions of the current speed caps, each in `[-1, 1]`.
    pub fn drive_percent(&mut self, x: f64, y: f64, rot: f64, field_relative: bool) {
        let scale = |name: &'static str, value: f64| {
            let value = finite_or_zero(name, value).clamp(-1.0, 1.0);
            apply_deadband(value, self.config.deadband)
        };
        let x = scale("x", x);
        let y = scale("y", y);
        let rot = scale("rot", rot);

        self.command(
            x * self.max_speed,
            y * self.max_speed,
            rot * self.max_angular_speed,
            field_relative,
        );
    }

    /// Runtime cap on translation speed, clamped to `[0, rated]`.
    pub fn set_max_speed(&mut self, speed: f64) {
        if !speed.is_finite() {
            warn!("Ignoring non-finite max speed {}", speed);
            return;
        }
        self.max_speed = speed.clamp(0.0, self.config.max_speed_mps);
        info!("Max speed set to {:.2} m/s", self.max_speed);
    }

    /// Runtime cap on rotation rate, clamped to `[0, rated]`.
    pub fn set_max_angular_speed(&mut self, speed: f64) {
        if !speed.is_finite() {
            warn!("Ignoring non-finite max angular speed {}", speed);
            return;
        }
        self.max_angular_speed = speed.clamp(0.0, self.config.max_angular_speed_rps);
        info!("Max angular speed set to {:.2} rad/s", self.max_angular_speed);
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// End-of-cycle update: integrate odometry from the measured module
    /// states and the heading sensor, then release this cycle's samples.
    pub fn periodic(&mut self) {
        let heading = self.heading_reading();
        let states: [ModuleState; MODULE_COUNT] =
            std::array::from_fn(|i| self.modules[i].measured_state());
        let usable = self.modules.iter_mut().all(|m| m.is_usable());

        match heading.value() {
            Some(deg) if usable => {
                let heading = self.to_heading(deg);
                let pose = self.odometry.update(heading, &states, self.config.period_s);
                debug!("Pose {}", pose);
            }
            _ => debug!("Sensors unusable, pose update skipped"),
        }

        // Bus voltage is tracked even on cycles with no closed-loop command
        self.voltage();
        self.finish_cycle();
    }

    /// Stop all modules.
    pub fn stop(&mut self) {
        self.commanded = ChassisSpeeds::default();
        for module in &mut self.modules {
            module.stop();
        }
    }

    /// Zero the heading sensor, reset every module and put the pose back at
    /// the origin.
    pub fn reset(&mut self) {
        self.commanded = ChassisSpeeds::default();
        self.zero_heading();
        for module in &mut self.modules {
            module.reset();
        }
        let heading = self.heading();
        self.odometry.reset(Pose::default(), heading);
        info!("Drivetrain reset");
    }

    pub fn get_pose(&self) -> Pose {
        self.odometry.pose()
    }

    /// Replace the pose estimate; the current heading maps to `pose.theta`.
    pub fn reset_pose(&mut self, pose: Pose) {
        let heading = self.heading();
        self.odometry.reset(pose, heading);
        info!("Pose reset to {}", pose);
    }

    /// Sensor heading (rad, CCW positive, normalized), without the pose
    /// offset. Falls back to the last good value, then to zero.
    pub fn heading(&mut self) -> f64 {
        let reading = self.heading_reading();
        reading
            .value()
            .or_else(|| self.heading_guard.last_good())
            .map(|deg| self.to_heading(deg))
            .unwrap_or(0.0)
    }

    pub fn get_module_measured_state(&mut self, index: usize) -> Result<ModuleState, DriveError> {
        Ok(self.module_mut(index)?.measured_state())
    }

    pub fn get_module_desired_state(&self, index: usize) -> Result<ModuleState, DriveError> {
        check_index(index)?;
        Ok(self.modules[index].desired_state())
    }

    /// Drive one module directly, bypassing the kinematics.
    pub fn set_module_state(&mut self, index: usize, speed: f64, angle_deg: f64) -> Result<(), DriveError> {
        check_finite("speed", speed)?;
        check_finite("angle_deg", angle_deg)?;
        check_index(index)?;

        let voltage = self.voltage();
        self.modules[index].set_desired_state(ModuleState::from_degrees(speed, angle_deg), voltage);
        Ok(())
    }

    /// Command one module's actuators directly with fractional outputs.
    pub fn set_module_raw_output(&mut self, index: usize, drive: f64, steer: f64) -> Result<(), DriveError> {
        check_finite("drive", drive)?;
        check_finite("steer", steer)?;
        self.module_mut(index)?.set_raw_output(drive, steer);
        Ok(())
    }

    /// Snapshot of the last completed cycle. Never touches hardware.
    pub fn telemetry(&self) -> DriveTelemetry {
        let modules: [ModuleTelemetry; MODULE_COUNT] =
            std::array::from_fn(|i| self.modules[i].telemetry());
        let measured: [ModuleState; MODULE_COUNT] = std::array::from_fn(|i| modules[i].measured);

        let heading = self
            .last_heading
            .value()
            .or_else(|| self.heading_guard.last_good())
            .map(|deg| self.to_heading(deg))
            .unwrap_or(0.0);

        DriveTelemetry {
            pose: self.odometry.pose(),
            heading,
            measured_speeds: self.kinematics.to_body_velocity(&measured),
            commanded_speeds: self.commanded,
            max_speed_mps: self.max_speed,
            max_angular_speed_rps: self.max_angular_speed,
            bus_voltage: self.last_voltage.value().unwrap_or(self.config.nominal_voltage),
            heading_sensor: self.last_heading.status(),
            voltage_sensor: self.last_voltage.status(),
            modules,
        }
    }

    fn command(&mut self, vx: f64, vy: f64, omega: f64, field_relative: bool) {
        // Runtime caps; the translation is scaled as a vector to keep its direction
        let translation = Translation2d::new(vx, vy);
        let norm = translation.norm();
        let (vx, vy) = if norm > self.max_speed {
            let scale = self.max_speed / norm;
            (vx * scale, vy * scale)
        } else {
            (vx, vy)
        };
        let omega = omega.clamp(-self.max_angular_speed, self.max_angular_speed);

        let speeds = if field_relative {
            let heading = self.heading();
            ChassisSpeeds::from_field_relative(vx, vy, omega, heading)
        } else {
            ChassisSpeeds::new(vx, vy, omega)
        };

        self.apply_speeds(speeds);
    }

    fn apply_speeds(&mut self, speeds: ChassisSpeeds) {
        self.commanded = speeds;
        let voltage = self.voltage();

        if speeds.is_zero() {
            // No direction information: hold the wheels where they point
            for module in &mut self.modules {
                let hold = ModuleState::new(0.0, module.desired_state().angle);
                module.set_desired_state(hold, voltage);
            }
            return;
        }

        let mut states = self.kinematics.to_module_states(speeds);
        desaturate(&mut states, self.config.max_speed_mps);
        debug!("Commanded {} -> {:?}", speeds, states);

        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_desired_state(state, voltage);
        }
    }

    fn module_mut(&mut self, index: usize) -> Result<&mut SwerveModule, DriveError> {
        check_index(index)?;
        Ok(&mut self.modules[index])
    }

    fn heading_reading(&mut self) -> Reading {
        if let Some(reading) = self.heading_sample {
            return reading;
        }
        let sample = self.heading_sensor.angle_deg();
        let reading = self.heading_guard.accept(sample, |_| true);
        self.heading_sample = Some(reading);
        self.last_heading = reading;
        reading
    }

    /// Bus voltage for this cycle, or the nominal voltage when lost.
    fn voltage(&mut self) -> f64 {
        let reading = match self.voltage_sample {
            Some(reading) => reading,
            None => {
                let (min, max) = (self.config.min_voltage, self.config.max_voltage);
                let sample = self.voltage_source.bus_voltage();
                let reading = self
                    .voltage_guard
                    .accept(sample, |v| (min..=max).contains(&v));
                self.voltage_sample = Some(reading);
                self.last_voltage = reading;
                reading
            }
        };
        reading.value().unwrap_or(self.config.nominal_voltage)
    }

    fn to_heading(&self, deg: f64) -> f64 {
        let rad = deg.to_radians();
        normalize_angle(if self.config.heading_inverted { -rad } else { rad })
    }

    fn zero_heading(&mut self) {
        if let Err(e) = self.heading_sensor.reset() {
            warn!("Failed to reset heading sensor: {}", e);
        }
        self.heading_guard.clear();
        self.heading_sample = None;
    }

    fn finish_cycle(&mut self) {
        for module in &mut self.modules {
            module.finish_cycle();
        }
        self.heading_sample = None;
        self.voltage_sample = None;
    }
}

fn check_index(index: usize) -> Result<(), DriveError> {
    if index < MODULE_COUNT {
        Ok(())
    } else {
        Err(DriveError::InvalidModule {
            index,
            count: MODULE_COUNT,
        })
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<(), DriveError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DriveError::NonFinite { field, value })
    }
}

fn finite_or_zero(name: &str, value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!("Non-finite {} command {}, using 0", name, value);
        0.0
    }
}
