// Wheel module controller
// One drive actuator, one steering actuator and one absolute angle sensor,
// closed-loop on speed and steering angle every cycle.

use tracing::{debug, warn};

use super::control::{PidController, ProfiledAngleController, SimpleFeedforward};
use super::geometry::{ModuleState, normalize_angle};
use super::hardware::{ModuleHardware, Reading, SensorGuard};
use super::telemetry::ModuleTelemetry;
use crate::config::{DrivetrainConfig, ModuleConfig};

/// Absolute encoder readings outside this magnitude (deg) are rejected.
const MAX_ENCODER_DEG: f64 = 360.0;

/// Sensor values of one cycle, after validation.
#[derive(Debug, Clone, Copy)]
struct ModuleSample {
    /// Wheel speed (m/s).
    speed: Reading,
    /// Wheel distance (m).
    distance: Reading,
    /// Steering angle (rad), offset applied.
    angle: Reading,
}

/// Last commanded actuator outputs.
#[derive(Debug, Clone, Copy, Default)]
struct ModuleOutputs {
    drive: f64,
    steer: f64,
    steer_pid: f64,
    steer_ff: f64,
    drive_saturated: bool,
    steer_saturated: bool,
    write_fault: bool,
}

pub struct SwerveModule {
    name: String,
    hw: ModuleHardware,

    pulses_per_meter: f64,
    velocity_samples_per_second: f64,
    angle_offset_deg: f64,
    max_sensor_speed: f64,

    drive_pid: PidController,
    drive_ff: SimpleFeedforward,
    steer_controller: ProfiledAngleController,
    steer_ff: SimpleFeedforward,

    desired: ModuleState,

    speed_guard: SensorGuard,
    distance_guard: SensorGuard,
    angle_guard: SensorGuard,
    // Valid until finish_cycle()
    sample: Option<ModuleSample>,
    last_sample: ModuleSample,
    outputs: ModuleOutputs,
}

impl SwerveModule {
    /// Build a module and point its steering profile at the current
    /// measured angle.
    pub fn new(module: &ModuleConfig, config: &DrivetrainConfig, hw: ModuleHardware) -> Self {
        let name = module.name.clone();
        let lost = ModuleSample {
            speed: Reading::Lost,
            distance: Reading::Lost,
            angle: Reading::Lost,
        };

        let mut this = Self {
            hw,
            pulses_per_meter: config.encoder.pulses_per_meter(),
            velocity_samples_per_second: config.encoder.velocity_samples_per_second,
            angle_offset_deg: module.angle_offset_deg,
            max_sensor_speed: config.max_sensor_speed_mps,
            drive_pid: PidController::new(config.drive.pid, config.period_s),
            drive_ff: config.drive.feedforward,
            steer_controller: ProfiledAngleController::new(
                config.steer.pid,
                config.steer.constraints(),
                config.period_s,
            ),
            steer_ff: config.steer.feedforward,
            desired: ModuleState::default(),
            speed_guard: SensorGuard::new(format!("{} drive velocity", name)),
            distance_guard: SensorGuard::new(format!("{} drive position", name)),
            angle_guard: SensorGuard::new(format!("{} steering encoder", name)),
            sample: None,
            last_sample: lost,
            outputs: ModuleOutputs::default(),
            name,
        };
        this.reset();
        this
    }

    /// Requested state, as given (before minimal-rotation optimization).
    pub fn desired_state(&self) -> ModuleState {
        self.desired
    }

    /// Measured speed and angle for this cycle.
    ///
    /// A lost speed sensor reads as zero speed; a lost angle sensor falls
    /// back to the last good angle.
    pub fn measured_state(&mut self) -> ModuleState {
        let sample = self.sample();
        ModuleState::new(
            sample.speed.value().unwrap_or(0.0),
            self.angle_or_last_good(sample.angle),
        )
    }

    /// Both speed and angle produced a value this cycle.
    pub fn is_usable(&mut self) -> bool {
        let sample = self.sample();
        sample.speed.value().is_some() && sample.angle.value().is_some()
    }

    /// Drive the module toward `desired` for one cycle.
    ///
    /// `voltage` is the supply voltage used to turn controller volts into
    /// output fractions.
    pub fn set_desired_state(&mut self, desired: ModuleState, voltage: f64) {
        self.desired = ModuleState::new(desired.speed, desired.angle);

        let sample = self.sample();
        let (speed, angle) = match (sample.speed.value(), sample.angle.value()) {
            (Some(speed), Some(angle)) => (speed, angle),
            _ => {
                debug!("{}: sensors unusable, outputs held at zero", self.name);
                self.outputs.steer_pid = 0.0;
                self.outputs.steer_ff = 0.0;
                self.write_outputs(0.0, 0.0);
                return;
            }
        };

        let target = self.desired.optimize(angle);

        let drive_volts =
            self.drive_pid.calculate(speed, target.speed) + self.drive_ff.calculate(target.speed);

        let steer_pid = self.steer_controller.calculate(angle, target.angle);
        let steer_ff = self
            .steer_ff
            .calculate(self.steer_controller.setpoint().velocity);

        self.outputs.steer_pid = steer_pid;
        self.outputs.steer_ff = steer_ff;
        self.write_outputs(drive_volts / voltage, (steer_pid + steer_ff) / voltage);
    }

    /// Bypass the controllers and command fractional outputs directly.
    pub fn set_raw_output(&mut self, drive: f64, steer: f64) {
        self.outputs.steer_pid = 0.0;
        self.outputs.steer_ff = 0.0;
        self.write_outputs(drive, steer);
    }

    /// Zero both outputs. The desired state is left alone.
    pub fn stop(&mut self) {
        self.set_raw_output(0.0, 0.0);
    }

    /// Stop, clear controller history and restart the steering profile from
    /// this cycle's angle measurement.
    pub fn reset(&mut self) {
        self.stop();
        self.drive_pid.reset();

        let sample = self.sample();
        let angle = self.angle_or_last_good(sample.angle);
        self.steer_controller.reset(angle);
    }

    /// Drop this cycle's sensor cache; the next access samples again.
    pub fn finish_cycle(&mut self) {
        self.sample = None;
    }

    pub fn telemetry(&self) -> ModuleTelemetry {
        let sample = self.last_sample;
        ModuleTelemetry {
            name: self.name.clone(),
            desired: self.desired,
            measured: ModuleState::new(
                sample.speed.value().unwrap_or(0.0),
                self.angle_or_last_good(sample.angle),
            ),
            distance_m: sample.distance.value().unwrap_or(0.0),
            drive_output: self.outputs.drive,
            steer_output: self.outputs.steer,
            steer_pid_volts: self.outputs.steer_pid,
            steer_ff_volts: self.outputs.steer_ff,
            drive_saturated: self.outputs.drive_saturated,
            steer_saturated: self.outputs.steer_saturated,
            write_fault: self.outputs.write_fault,
            speed_sensor: sample.speed.status(),
            distance_sensor: sample.distance.status(),
            angle_sensor: sample.angle.status(),
        }
    }

    fn sample(&mut self) -> ModuleSample {
        if let Some(sample) = self.sample {
            return sample;
        }

        let ppm = self.pulses_per_meter;
        let per_second = self.velocity_samples_per_second;
        let max_speed = self.max_sensor_speed;

        let speed = self
            .hw
            .drive
            .velocity_raw()
            .map(|raw| raw * per_second / ppm);
        let speed = self.speed_guard.accept(speed, |v| v.abs() <= max_speed);

        let distance = self.hw.drive.position_raw().map(|raw| raw / ppm);
        let distance = self.distance_guard.accept(distance, |_| true);

        let angle_deg = self.hw.encoder.position_deg();
        let offset = self.angle_offset_deg;
        let angle = self
            .angle_guard
            .accept(angle_deg, |deg| deg.abs() <= MAX_ENCODER_DEG)
            .map(|deg| encoder_angle(deg, offset));

        let sample = ModuleSample {
            speed,
            distance,
            angle,
        };
        self.sample = Some(sample);
        self.last_sample = sample;
        sample
    }

    fn angle_or_last_good(&self, angle: Reading) -> f64 {
        angle
            .value()
            .or_else(|| {
                self.angle_guard
                    .last_good()
                    .map(|deg| encoder_angle(deg, self.angle_offset_deg))
            })
            .unwrap_or(0.0)
    }

    fn write_outputs(&mut self, drive: f64, steer: f64) {
        let drive = if drive.is_finite() { drive } else { 0.0 };
        let steer = if steer.is_finite() { steer } else { 0.0 };

        self.outputs.drive = drive.clamp(-1.0, 1.0);
        self.outputs.steer = steer.clamp(-1.0, 1.0);
        self.outputs.drive_saturated = drive.abs() > 1.0;
        self.outputs.steer_saturated = steer.abs() > 1.0;

        let drive_result = self.hw.drive.set_output(self.outputs.drive);
        let steer_result = self.hw.steer.set_output(self.outputs.steer);

        match drive_result.and(steer_result) {
            Ok(()) => {
                self.outputs.write_fault = false;
            }
            Err(e) => {
                if !self.outputs.write_fault {
                    warn!("{}: actuator write failed: {}", self.name, e);
                }
                self.outputs.write_fault = true;
            }
        }
    }
}

/// Steering angle (rad) from a raw absolute encoder reading.
fn encoder_angle(deg: f64, offset_deg: f64) -> f64 {
    normalize_angle((deg - offset_deg).to_radians())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::hardware::SensorStatus;
    use crate::drive::sim::SimRobot;

    const EPSILON: f64 = 1e-9;

    fn front_left(config: &DrivetrainConfig, sim: &SimRobot) -> SwerveModule {
        let [hw, ..] = sim.hardware().modules;
        SwerveModule::new(&config.modules[0], config, hw)
    }

    #[test]
    fn test_measured_state_scales_encoder_units() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        sim.set_wheel(0, 1.25, 30f64.to_radians());
        let mut module = front_left(&config, &sim);

        let measured = module.measured_state();
        assert!((measured.speed - 1.25).abs() < 1e-9);
        assert!((measured.angle_degrees() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_angle_offset_is_subtracted() {
        let mut config = DrivetrainConfig::default();
        config.modules[0].angle_offset_deg = 90.0;
        let sim = SimRobot::new(&config);
        // Wheel points forward; the encoder reads the offset
        sim.set_wheel(0, 0.0, 0.0);
        let mut module = front_left(&config, &sim);
        assert!(module.measured_state().angle.abs() < 1e-9);
        sim.set_encoder_reading(0, Some(0.0));
        module.finish_cycle();
        assert!((module.measured_state().angle_degrees() + 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_desired_state_is_stored_unoptimized() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        let mut module = front_left(&config, &sim);

        let desired = ModuleState::from_degrees(1.0, 170.0);
        module.set_desired_state(desired, 12.0);
        assert_eq!(module.desired_state(), desired);

        // Wheel at 0 deg: optimized command drives backwards
        assert!(sim.drive_output(0) < 0.0);
    }

    #[test]
    fn test_outputs_are_clamped_and_flagged() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        let mut module = front_left(&config, &sim);

        module.set_desired_state(ModuleState::new(3.0, 0.0), 4.5);
        let telemetry = module.telemetry();
        assert_eq!(telemetry.drive_output, 1.0);
        assert!(telemetry.drive_saturated);
        assert_eq!(sim.drive_output(0), 1.0);
    }

    #[test]
    fn test_stop_keeps_desired_state() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        let mut module = front_left(&config, &sim);

        let desired = ModuleState::from_degrees(2.0, 45.0);
        module.set_desired_state(desired, 12.0);
        module.stop();
        assert_eq!(sim.drive_output(0), 0.0);
        assert_eq!(sim.steer_output(0), 0.0);
        assert_eq!(module.desired_state(), desired);
    }

    #[test]
    fn test_sensor_is_sampled_once_per_cycle() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        let mut module = front_left(&config, &sim);

        sim.set_wheel(0, 0.5, 0.0);
        let first = module.measured_state();
        sim.set_wheel(0, 1.5, 0.0);
        assert_eq!(module.measured_state(), first);

        module.finish_cycle();
        assert!((module.measured_state().speed - 1.5).abs() < EPSILON);
    }

    #[test]
    fn test_one_bad_sample_holds_then_disables() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        sim.set_wheel(0, 0.0, 20f64.to_radians());
        let mut module = front_left(&config, &sim);
        module.finish_cycle();

        let desired = ModuleState::new(1.0, 20f64.to_radians());
        module.set_desired_state(desired, 12.0);
        module.finish_cycle();

        // First faulty cycle: last good angle is used and the module still drives
        sim.set_encoder_failed(0, true);
        module.set_desired_state(desired, 12.0);
        assert_eq!(module.telemetry().angle_sensor, SensorStatus::Held);
        assert!(sim.drive_output(0) > 0.0);
        module.finish_cycle();

        // Second faulty cycle: outputs zeroed
        module.set_desired_state(desired, 12.0);
        let telemetry = module.telemetry();
        assert_eq!(telemetry.angle_sensor, SensorStatus::Lost);
        assert!(telemetry.has_sensor_fault());
        assert_eq!(sim.drive_output(0), 0.0);
        assert_eq!(sim.steer_output(0), 0.0);
        assert!((module.measured_state().angle_degrees() - 20.0).abs() < 1e-9);
        module.finish_cycle();

        // Recovery
        sim.set_encoder_failed(0, false);
        module.set_desired_state(desired, 12.0);
        assert_eq!(module.telemetry().angle_sensor, SensorStatus::Ok);
        assert!(sim.drive_output(0) > 0.0);
    }

    #[test]
    fn test_reset_restarts_profile_at_measured_angle() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        let mut module = front_left(&config, &sim);

        // Wheel turned by hand while the profile still sits at 0
        sim.set_wheel(0, 0.0, 120f64.to_radians());
        module.finish_cycle();
        module.reset();
        assert!((module.steer_controller.setpoint().position - 120f64.to_radians()).abs() < EPSILON);

        module.set_desired_state(ModuleState::from_degrees(0.0, 120.0), 12.0);
        let telemetry = module.telemetry();
        assert!(telemetry.steer_pid_volts.abs() < EPSILON);
        assert!(telemetry.steer_ff_volts.abs() < EPSILON);
        assert!((module.steer_controller.setpoint().position - 120f64.to_radians()).abs() < EPSILON);
        assert!(sim.steer_output(0).abs() < EPSILON);
    }

    #[test]
    fn test_reset_reuses_cycle_sample() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        sim.set_wheel(0, 0.0, 20f64.to_radians());
        let mut module = front_left(&config, &sim);
        module.finish_cycle();

        sim.set_encoder_failed(0, true);
        module.set_desired_state(ModuleState::from_degrees(1.0, 20.0), 12.0);
        assert_eq!(module.telemetry().angle_sensor, SensorStatus::Held);

        // Same cycle: one bad sample, still held
        module.reset();
        assert_eq!(module.telemetry().angle_sensor, SensorStatus::Held);
        assert!((module.steer_controller.setpoint().position - 20f64.to_radians()).abs() < EPSILON);
        assert_eq!(sim.drive_output(0), 0.0);
    }

    #[test]
    fn test_lost_speed_sensor_reads_zero() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        sim.set_wheel(0, 1.0, 0.0);
        let mut module = front_left(&config, &sim);
        module.finish_cycle();

        sim.set_drive_sensor_failed(0, true);
        module.finish_cycle();
        assert!((module.measured_state().speed - 1.0).abs() < EPSILON); // held
        module.finish_cycle();
        assert_eq!(module.measured_state().speed, 0.0);
        assert!(!module.is_usable());
    }

    #[test]
    fn test_implausible_speed_is_rejected() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        sim.set_wheel(0, 50.0, 0.0);
        let mut module = front_left(&config, &sim);
        assert_eq!(module.telemetry().speed_sensor, SensorStatus::Lost);
        assert_eq!(module.measured_state().speed, 0.0);
    }

    #[test]
    fn test_write_failure_is_flagged() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        let mut module = front_left(&config, &sim);

        sim.set_actuators_failed(0, true);
        module.set_desired_state(ModuleState::new(1.0, 0.0), 12.0);
        assert!(module.telemetry().write_fault);

        sim.set_actuators_failed(0, false);
        module.set_desired_state(ModuleState::new(1.0, 0.0), 12.0);
        assert!(!module.telemetry().write_fault);
    }

    #[test]
    fn test_steering_converges_in_sim() {
        let config = DrivetrainConfig::default();
        let sim = SimRobot::new(&config);
        let mut module = front_left(&config, &sim);
        let desired = ModuleState::from_degrees(0.5, 60.0);

        for _ in 0..150 {
            module.set_desired_state(desired, 12.0);
            module.finish_cycle();
            sim.step(config.period_s);
        }

        let measured = module.measured_state();
        assert!((measured.angle_degrees() - 60.0).abs() < 1.0);
        assert!((measured.speed - 0.5).abs() < 0.01);
    }
}
