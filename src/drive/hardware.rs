// Hardware interfaces consumed by the drivetrain
//
// Device drivers (motor controllers, absolute encoders, gyro, power
// distribution) live outside this crate and plug in through these traits.
// Every call is synchronous and expected to finish well inside one cycle.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::kinematics::MODULE_COUNT;

/// Error types for device access
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Timeout waiting for response from {device}")]
    Timeout { device: String },

    #[error("{device} reported fault: {reason}")]
    DeviceFault { device: String, reason: String },

    #[error("{device} is disconnected")]
    Disconnected { device: String },
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Wheel drive motor with an integrated relative encoder.
pub trait DriveMotor: Send {
    /// Command a fractional output in `[-1, 1]`.
    fn set_output(&mut self, fraction: f64) -> Result<()>;

    /// Encoder velocity in pulses per 100 ms.
    fn velocity_raw(&mut self) -> Result<f64>;

    /// Encoder position in pulses since power-on.
    fn position_raw(&mut self) -> Result<f64>;
}

/// Module steering motor.
pub trait SteerMotor: Send {
    /// Command a fractional output in `[-1, 1]`.
    fn set_output(&mut self, fraction: f64) -> Result<()>;
}

/// Absolute steering angle sensor.
pub trait AbsoluteEncoder: Send {
    /// Absolute position in degrees.
    fn position_deg(&mut self) -> Result<f64>;
}

/// Robot heading source (gyro / IMU).
pub trait HeadingSensor: Send {
    /// Cumulative heading in degrees (not wrapped).
    fn angle_deg(&mut self) -> Result<f64>;

    /// Make the current heading read as zero.
    fn reset(&mut self) -> Result<()>;
}

/// Supply bus voltage, used to turn feedforward volts into fractions.
pub trait VoltageSource: Send {
    fn bus_voltage(&mut self) -> Result<f64>;
}

/// Devices belonging to one swerve module.
pub struct ModuleHardware {
    pub drive: Box<dyn DriveMotor>,
    pub steer: Box<dyn SteerMotor>,
    pub encoder: Box<dyn AbsoluteEncoder>,
}

/// Every device the drivetrain talks to, injected at construction.
pub struct DrivetrainHardware {
    pub modules: [ModuleHardware; MODULE_COUNT],
    pub heading: Box<dyn HeadingSensor>,
    pub voltage: Box<dyn VoltageSource>,
}

/// Health of one sensor channel for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    #[default]
    Ok,
    /// Bad sample replaced by the last good value.
    Held,
    /// Bad for more than one cycle; no usable value.
    Lost,
}

/// Outcome of validating one sensor sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Fresh(f64),
    Held(f64),
    Lost,
}

impl Reading {
    pub fn value(&self) -> Option<f64> {
        match *self {
            Reading::Fresh(v) | Reading::Held(v) => Some(v),
            Reading::Lost => None,
        }
    }

    /// Convert the carried value, keeping freshness.
    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Reading {
        match self {
            Reading::Fresh(v) => Reading::Fresh(f(v)),
            Reading::Held(v) => Reading::Held(f(v)),
            Reading::Lost => Reading::Lost,
        }
    }

    pub fn status(&self) -> SensorStatus {
        match self {
            Reading::Fresh(_) => SensorStatus::Ok,
            Reading::Held(_) => SensorStatus::Held,
            Reading::Lost => SensorStatus::Lost,
        }
    }
}

/// Last-known-good filter for a sensor sampled once per cycle.
///
/// A sample that fails, is not finite, or is out of range is replaced by the
/// previous good value for exactly one cycle. A second consecutive bad
/// sample reports the channel as lost until a good sample arrives.
#[derive(Debug, Clone, Default)]
pub struct SensorGuard {
    name: String,
    last_good: Option<f64>,
    held: bool,
    lost: bool,
}

impl SensorGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn accept(&mut self, sample: Result<f64>, in_range: impl Fn(f64) -> bool) -> Reading {
        let fault = match sample {
            Ok(v) if v.is_finite() && in_range(v) => {
                if self.held || self.lost {
                    info!("{} recovered", self.name);
                }
                self.last_good = Some(v);
                self.held = false;
                self.lost = false;
                return Reading::Fresh(v);
            }
            Ok(v) => format!("value {} out of range", v),
            Err(e) => e.to_string(),
        };

        match self.last_good {
            Some(v) if !self.held && !self.lost => {
                warn!("{}: {}, holding last good value {:.4}", self.name, fault, v);
                self.held = true;
                Reading::Held(v)
            }
            _ => {
                if !self.lost {
                    warn!("{}: {}, sensor lost", self.name, fault);
                }
                self.held = false;
                self.lost = true;
                Reading::Lost
            }
        }
    }

    pub fn last_good(&self) -> Option<f64> {
        self.last_good
    }

    /// Forget history, e.g. after the sensor itself was re-zeroed.
    pub fn clear(&mut self) {
        self.last_good = None;
        self.held = false;
        self.lost = false;
    }
}
