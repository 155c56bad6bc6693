// In-process simulated drivetrain hardware
//
// Implements every hardware trait against a shared first-order model of the
// base. The runtime binary drives it when no real devices are attached, and
// the coordinator tests use its fault hooks.

use std::sync::Arc;

use parking_lot::Mutex;

use super::control::SimpleFeedforward;
use super::geometry::{ModuleState, Translation2d, normalize_angle};
use super::hardware::{
    AbsoluteEncoder, DriveMotor, DrivetrainHardware, HardwareError, HeadingSensor, ModuleHardware,
    Result, SteerMotor, VoltageSource,
};
use super::kinematics::MODULE_COUNT;
use crate::config::DrivetrainConfig;

#[derive(Debug, Clone, Copy, Default)]
struct SimWheel {
    drive_output: f64,
    steer_output: f64,
    /// Ground speed (m/s).
    speed: f64,
    /// True steering angle (rad).
    angle: f64,
    /// Distance rolled (m).
    distance: f64,
    encoder_override: Option<f64>,
    encoder_failed: bool,
    drive_sensor_failed: bool,
    actuators_failed: bool,
}

#[derive(Debug)]
struct SimState {
    wheels: [SimWheel; MODULE_COUNT],
    locations: [Translation2d; MODULE_COUNT],
    angle_offsets_deg: [f64; MODULE_COUNT],
    pulses_per_meter: f64,
    velocity_samples_per_second: f64,
    drive_plant: SimpleFeedforward,
    steer_kv: f64,
    /// True heading (rad, CCW, unwrapped).
    heading: f64,
    heading_zero: f64,
    heading_inverted: bool,
    heading_failed: bool,
    voltage: f64,
}

impl SimState {
    /// Least-squares rotation rate of the wheel velocities about the
    /// module centroid.
    fn body_omega(&self) -> f64 {
        let n = MODULE_COUNT as f64;
        let velocities: [Translation2d; MODULE_COUNT] =
            std::array::from_fn(|i| ModuleState::new(self.wheels[i].speed, self.wheels[i].angle).velocity());

        let centroid = self
            .locations
            .iter()
            .fold(Translation2d::default(), |acc, l| Translation2d::new(acc.x + l.x / n, acc.y + l.y / n));
        let mean = velocities
            .iter()
            .fold(Translation2d::default(), |acc, v| Translation2d::new(acc.x + v.x / n, acc.y + v.y / n));

        let mut moment = 0.0;
        let mut inertia = 0.0;
        for (location, velocity) in self.locations.iter().zip(&velocities) {
            let r = Translation2d::new(location.x - centroid.x, location.y - centroid.y);
            let v = Translation2d::new(velocity.x - mean.x, velocity.y - mean.y);
            moment += r.x * v.y - r.y * v.x;
            inertia += r.x * r.x + r.y * r.y;
        }

        if inertia > 0.0 { moment / inertia } else { 0.0 }
    }
}

/// Shared simulated robot. Cloned handles all see the same state.
#[derive(Clone)]
pub struct SimRobot {
    state: Arc<Mutex<SimState>>,
}

impl SimRobot {
    pub fn new(config: &DrivetrainConfig) -> Self {
        let state = SimState {
            wheels: [SimWheel::default(); MODULE_COUNT],
            locations: config.locations(),
            angle_offsets_deg: std::array::from_fn(|i| config.modules[i].angle_offset_deg),
            pulses_per_meter: config.encoder.pulses_per_meter(),
            velocity_samples_per_second: config.encoder.velocity_samples_per_second,
            drive_plant: config.drive.feedforward,
            steer_kv: config.steer.feedforward.kv,
            heading: 0.0,
            heading_zero: 0.0,
            heading_inverted: config.heading_inverted,
            heading_failed: false,
            voltage: config.nominal_voltage,
        };

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Fresh device handles backed by this robot.
    pub fn hardware(&self) -> DrivetrainHardware {
        let modules = std::array::from_fn(|index| ModuleHardware {
            drive: Box::new(SimDriveMotor {
                state: self.state.clone(),
                index,
            }) as Box<dyn DriveMotor>,
            steer: Box::new(SimSteerMotor {
                state: self.state.clone(),
                index,
            }) as Box<dyn SteerMotor>,
            encoder: Box::new(SimEncoder {
                state: self.state.clone(),
                index,
            }) as Box<dyn AbsoluteEncoder>,
        });

        DrivetrainHardware {
            modules,
            heading: Box::new(SimHeading {
                state: self.state.clone(),
            }),
            voltage: Box::new(SimVoltage {
                state: self.state.clone(),
            }),
        }
    }

    /// Advance the physics by `dt` seconds using the current outputs.
    ///
    /// Drive wheels reach the speed the drive feedforward predicts for the
    /// applied voltage (static friction included). Steering is a
    /// frictionless velocity plant.
    pub fn step(&self, dt: f64) {
        let mut state = self.state.lock();
        let voltage = state.voltage;
        let plant = state.drive_plant;
        let steer_kv = state.steer_kv;

        for wheel in state.wheels.iter_mut() {
            let drive_volts = wheel.drive_output * voltage;
            let effective = (drive_volts.abs() - plant.ks).max(0.0);
            wheel.speed = drive_volts.signum() * effective / plant.kv;
            wheel.distance += wheel.speed * dt;

            let steer_rate = wheel.steer_output * voltage / steer_kv;
            wheel.angle = normalize_angle(wheel.angle + steer_rate * dt);
        }

        let omega = state.body_omega();
        state.heading += omega * dt;
    }

    /// Place a wheel at a given speed and angle.
    pub fn set_wheel(&self, index: usize, speed: f64, angle: f64) {
        let mut state = self.state.lock();
        state.wheels[index].speed = speed;
        state.wheels[index].angle = normalize_angle(angle);
    }

    /// True robot heading in degrees, CCW positive.
    pub fn set_heading_deg(&self, deg: f64) {
        self.state.lock().heading = deg.to_radians();
    }

    pub fn set_voltage(&self, voltage: f64) {
        self.state.lock().voltage = voltage;
    }

    /// Force the absolute encoder to report `reading` (deg) instead of the
    /// true angle.
    pub fn set_encoder_reading(&self, index: usize, reading: Option<f64>) {
        self.state.lock().wheels[index].encoder_override = reading;
    }

    pub fn set_encoder_failed(&self, index: usize, failed: bool) {
        self.state.lock().wheels[index].encoder_failed = failed;
    }

    pub fn set_drive_sensor_failed(&self, index: usize, failed: bool) {
        self.state.lock().wheels[index].drive_sensor_failed = failed;
    }

    pub fn set_actuators_failed(&self, index: usize, failed: bool) {
        self.state.lock().wheels[index].actuators_failed = failed;
    }

    pub fn set_heading_failed(&self, failed: bool) {
        self.state.lock().heading_failed = failed;
    }

    pub fn drive_output(&self, index: usize) -> f64 {
        self.state.lock().wheels[index].drive_output
    }

    pub fn steer_output(&self, index: usize) -> f64 {
        self.state.lock().wheels[index].steer_output
    }

    /// True heading in radians, normalized.
    pub fn heading(&self) -> f64 {
        normalize_angle(self.state.lock().heading)
    }
}

struct SimDriveMotor {
    state: Arc<Mutex<SimState>>,
    index: usize,
}

impl DriveMotor for SimDriveMotor {
    fn set_output(&mut self, fraction: f64) -> Result<()> {
        let mut state = self.state.lock();
        let wheel = &mut state.wheels[self.index];
        if wheel.actuators_failed {
            return Err(HardwareError::Disconnected {
                device: format!("drive motor {}", self.index),
            });
        }
        wheel.drive_output = fraction;
        Ok(())
    }

    fn velocity_raw(&mut self) -> Result<f64> {
        let state = self.state.lock();
        let wheel = &state.wheels[self.index];
        if wheel.drive_sensor_failed {
            return Err(HardwareError::Timeout {
                device: format!("drive encoder {}", self.index),
            });
        }
        Ok(wheel.speed * state.pulses_per_meter / state.velocity_samples_per_second)
    }

    fn position_raw(&mut self) -> Result<f64> {
        let state = self.state.lock();
        let wheel = &state.wheels[self.index];
        if wheel.drive_sensor_failed {
            return Err(HardwareError::Timeout {
                device: format!("drive encoder {}", self.index),
            });
        }
        Ok(wheel.distance * state.pulses_per_meter)
    }
}

struct SimSteerMotor {
    state: Arc<Mutex<SimState>>,
    index: usize,
}

impl SteerMotor for SimSteerMotor {
    fn set_output(&mut self, fraction: f64) -> Result<()> {
        let mut state = self.state.lock();
        let wheel = &mut state.wheels[self.index];
        if wheel.actuators_failed {
            return Err(HardwareError::Disconnected {
                device: format!("steer motor {}", self.index),
            });
        }
        wheel.steer_output = fraction;
        Ok(())
    }
}

struct SimEncoder {
    state: Arc<Mutex<SimState>>,
    index: usize,
}

impl AbsoluteEncoder for SimEncoder {
    fn position_deg(&mut self) -> Result<f64> {
        let state = self.state.lock();
        let wheel = &state.wheels[self.index];
        if wheel.encoder_failed {
            return Err(HardwareError::DeviceFault {
                device: format!("absolute encoder {}", self.index),
                reason: "magnet too weak".to_string(),
            });
        }
        Ok(wheel
            .encoder_override
            .unwrap_or_else(|| wheel.angle.to_degrees() + state.angle_offsets_deg[self.index]))
    }
}

struct SimHeading {
    state: Arc<Mutex<SimState>>,
}

impl HeadingSensor for SimHeading {
    fn angle_deg(&mut self) -> Result<f64> {
        let state = self.state.lock();
        if state.heading_failed {
            return Err(HardwareError::Timeout {
                device: "heading sensor".to_string(),
            });
        }
        let deg = (state.heading - state.heading_zero).to_degrees();
        Ok(if state.heading_inverted { -deg } else { deg })
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.heading_zero = state.heading;
        Ok(())
    }
}

struct SimVoltage {
    state: Arc<Mutex<SimState>>,
}

impl VoltageSource for SimVoltage {
    fn bus_voltage(&mut self) -> Result<f64> {
        Ok(self.state.lock().voltage)
    }
}
