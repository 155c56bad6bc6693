// Timeouts, topics, drivetrain configuration
use std::f64::consts::{PI, TAU};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drive::control::{PidGains, ProfileConstraints, SimpleFeedforward};
use crate::drive::geometry::Translation2d;
use crate::drive::kinematics::MODULE_COUNT;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Accepted control period range (s)
const MIN_PERIOD_S: f64 = 0.001;
const MAX_PERIOD_S: f64 = 1.0;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_BASE: &str = "swerve/cmd/base"; // body velocity commands
pub const TOPIC_CMD_CONTROL: &str = "swerve/cmd/control"; // stop, reset, overrides
pub const TOPIC_TELEMETRY: &str = "swerve/state/telemetry"; // drivetrain snapshot
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

/// Errors raised while loading or validating drivetrain parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid module geometry: {0}")]
    Geometry(String),
}

/// Placement and calibration of one swerve module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    /// Contact point offset forward of the center (m).
    pub x_m: f64,
    /// Contact point offset left of the center (m).
    pub y_m: f64,
    /// Absolute encoder reading (deg) when the wheel points forward.
    #[serde(default)]
    pub angle_offset_deg: f64,
}

impl ModuleConfig {
    pub fn location(&self) -> Translation2d {
        Translation2d::new(self.x_m, self.y_m)
    }
}

/// Drive motor encoder and gearing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub wheel_radius_m: f64,
    /// Pulses per motor revolution.
    pub resolution: f64,
    /// Motor revolutions per wheel revolution.
    pub gear_ratio: f64,
    /// How many raw velocity periods make up one second (10 for per-100 ms).
    pub velocity_samples_per_second: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            wheel_radius_m: 0.047625,
            resolution: 2048.0,
            gear_ratio: 8.14,
            velocity_samples_per_second: 10.0,
        }
    }
}

impl EncoderConfig {
    pub fn pulses_per_meter(&self) -> f64 {
        self.resolution * self.gear_ratio / (TAU * self.wheel_radius_m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveGains {
    pub pid: PidGains,
    pub feedforward: SimpleFeedforward,
}

impl Default for DriveGains {
    fn default() -> Self {
        Self {
            pid: PidGains::new(1.0, 0.0, 0.0),
            feedforward: SimpleFeedforward::new(1.0, 3.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteerGains {
    pub pid: PidGains,
    pub feedforward: SimpleFeedforward,
    pub max_velocity_rps: f64,
    pub max_acceleration_rps2: f64,
}

impl Default for SteerGains {
    fn default() -> Self {
        Self {
            pid: PidGains::new(7.0, 0.0, 0.0),
            feedforward: SimpleFeedforward::new(1.0, 0.5),
            max_velocity_rps: PI,
            max_acceleration_rps2: TAU,
        }
    }
}

impl SteerGains {
    pub fn constraints(&self) -> ProfileConstraints {
        ProfileConstraints {
            max_velocity: self.max_velocity_rps,
            max_acceleration: self.max_acceleration_rps2,
        }
    }
}

/// Every tunable of the drivetrain. Missing fields fall back to the
/// defaults of the reference robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivetrainConfig {
    pub modules: [ModuleConfig; MODULE_COUNT],
    /// Rated top wheel speed; also the desaturation ceiling (m/s).
    pub max_speed_mps: f64,
    /// Rated top rotation rate (rad/s).
    pub max_angular_speed_rps: f64,
    /// Fraction of full scale below which an axis command is zeroed.
    pub deadband: f64,
    /// Control period (s).
    pub period_s: f64,
    pub nominal_voltage: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
    /// Measured wheel speeds above this are treated as sensor faults (m/s).
    pub max_sensor_speed_mps: f64,
    /// Set when the heading sensor reports clockwise-positive angles.
    pub heading_inverted: bool,
    pub encoder: EncoderConfig,
    pub drive: DriveGains,
    pub steer: SteerGains,
}

impl Default for DrivetrainConfig {
    fn default() -> Self {
        let module = |name: &str, x_m: f64, y_m: f64| ModuleConfig {
            name: name.to_string(),
            x_m,
            y_m,
            angle_offset_deg: 0.0,
        };

        Self {
            modules: [
                module("Front Left", 0.34925, 0.24765),
                module("Front Right", 0.34925, -0.24765),
                module("Back Left", -0.34925, 0.24765),
                module("Back Right", -0.34925, -0.24765),
            ],
            max_speed_mps: 3.0,
            max_angular_speed_rps: PI,
            deadband: 0.02,
            period_s: 1.0 / LOOP_HZ as f64,
            nominal_voltage: 12.0,
            min_voltage: 4.5,
            max_voltage: 16.0,
            max_sensor_speed_mps: 10.0,
            heading_inverted: false,
            encoder: EncoderConfig::default(),
            drive: DriveGains::default(),
            steer: SteerGains::default(),
        }
    }
}

impl DrivetrainConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn locations(&self) -> [Translation2d; MODULE_COUNT] {
        std::array::from_fn(|i| self.modules[i].location())
    }

    /// Check every numeric parameter. Geometry is checked separately when
    /// the kinematics are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("max_speed_mps", self.max_speed_mps)?;
        positive("max_angular_speed_rps", self.max_angular_speed_rps)?;
        positive("period_s", self.period_s)?;
        if !(MIN_PERIOD_S..=MAX_PERIOD_S).contains(&self.period_s) {
            return Err(invalid("period_s", "must be between 1 ms and 1 s"));
        }
        positive("nominal_voltage", self.nominal_voltage)?;
        positive("min_voltage", self.min_voltage)?;
        positive("max_sensor_speed_mps", self.max_sensor_speed_mps)?;

        if !(0.0..1.0).contains(&self.deadband) {
            return Err(invalid("deadband", "must be in [0, 1)"));
        }
        if !(self.min_voltage..=self.max_voltage).contains(&self.nominal_voltage) {
            return Err(invalid("nominal_voltage", "must lie between min_voltage and max_voltage"));
        }

        positive("encoder.wheel_radius_m", self.encoder.wheel_radius_m)?;
        positive("encoder.resolution", self.encoder.resolution)?;
        positive("encoder.gear_ratio", self.encoder.gear_ratio)?;
        positive(
            "encoder.velocity_samples_per_second",
            self.encoder.velocity_samples_per_second,
        )?;

        gains("drive.pid", &self.drive.pid)?;
        feedforward("drive.feedforward", &self.drive.feedforward)?;
        gains("steer.pid", &self.steer.pid)?;
        feedforward("steer.feedforward", &self.steer.feedforward)?;
        positive("steer.max_velocity_rps", self.steer.max_velocity_rps)?;
        positive("steer.max_acceleration_rps2", self.steer.max_acceleration_rps2)?;

        for (i, module) in self.modules.iter().enumerate() {
            if !module.angle_offset_deg.is_finite() {
                return Err(invalid(&format!("modules[{}].angle_offset_deg", i), "must be finite"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be finite and positive, got {}", value)))
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be finite and non-negative, got {}", value)))
    }
}

fn gains(field: &str, pid: &PidGains) -> Result<(), ConfigError> {
    non_negative(&format!("{}.kp", field), pid.kp)?;
    non_negative(&format!("{}.ki", field), pid.ki)?;
    non_negative(&format!("{}.kd", field), pid.kd)?;
    non_negative(&format!("{}.integral_limit", field), pid.integral_limit)
}

fn feedforward(field: &str, ff: &SimpleFeedforward) -> Result<(), ConfigError> {
    non_negative(&format!("{}.ks", field), ff.ks)?;
    non_negative(&format!("{}.kv", field), ff.kv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DrivetrainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.modules[1].name, "Front Right");
    }

    #[test]
    fn test_pulses_per_meter() {
        let encoder = EncoderConfig::default();
        let expected = 2048.0 * 8.14 / (2.0 * PI * 0.047625);
        assert!((encoder.pulses_per_meter() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_nan_gain() {
        let mut config = DrivetrainConfig::default();
        config.drive.pid.kp = f64::NAN;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "drive.pid.kp"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_period() {
        let config = DrivetrainConfig {
            period_s: 0.0,
            ..DrivetrainConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_period_outside_timer_range() {
        for period_s in [1e-12, 0.0005, 5.0] {
            let config = DrivetrainConfig {
                period_s,
                ..DrivetrainConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { ref field, .. }) if field == "period_s"
            ));
        }

        let config = DrivetrainConfig {
            period_s: 0.001,
            ..DrivetrainConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DrivetrainConfig =
            serde_json::from_str(r#"{"max_speed_mps": 2.5, "steer": {"max_velocity_rps": 2.0}}"#).unwrap();
        assert_eq!(config.max_speed_mps, 2.5);
        assert_eq!(config.steer.max_velocity_rps, 2.0);
        assert_eq!(config.steer.pid, PidGains::new(7.0, 0.0, 0.0));
        assert_eq!(config.deadband, 0.02);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = DrivetrainConfig::load("/nonexistent/swerve.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
