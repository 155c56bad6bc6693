// Pull-based drivetrain snapshot published by the runtime
use serde::{Deserialize, Serialize};

use super::geometry::{ChassisSpeeds, ModuleState, Pose};
use super::hardware::SensorStatus;
use super::kinematics::MODULE_COUNT;

/// State of one module at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleTelemetry {
    pub name: String,
    pub desired: ModuleState,
    pub measured: ModuleState,
    /// Wheel distance since power-on (m).
    pub distance_m: f64,
    /// Commanded fractional outputs after clamping.
    pub drive_output: f64,
    pub steer_output: f64,
    /// Steering PID and feedforward contributions (V) before scaling.
    pub steer_pid_volts: f64,
    pub steer_ff_volts: f64,
    pub drive_saturated: bool,
    pub steer_saturated: bool,
    /// Last actuator write failed.
    pub write_fault: bool,
    pub speed_sensor: SensorStatus,
    pub distance_sensor: SensorStatus,
    pub angle_sensor: SensorStatus,
}

impl ModuleTelemetry {
    pub fn has_sensor_fault(&self) -> bool {
        [self.speed_sensor, self.distance_sensor, self.angle_sensor]
            .iter()
            .any(|s| *s != SensorStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub pose: Pose,
    /// Sensor heading (rad), before the pose offset.
    pub heading: f64,
    /// Body velocity fitted to the measured module states.
    pub measured_speeds: ChassisSpeeds,
    /// Last body velocity sent to the kinematics.
    pub commanded_speeds: ChassisSpeeds,
    pub max_speed_mps: f64,
    pub max_angular_speed_rps: f64,
    pub bus_voltage: f64,
    pub heading_sensor: SensorStatus,
    pub voltage_sensor: SensorStatus,
    pub modules: [ModuleTelemetry; MODULE_COUNT],
}

impl DriveTelemetry {
    /// True when any sensor was held or lost this cycle.
    pub fn has_sensor_fault(&self) -> bool {
        self.heading_sensor != SensorStatus::Ok
            || self.voltage_sensor != SensorStatus::Ok
            || self.modules.iter().any(ModuleTelemetry::has_sensor_fault)
    }
}
