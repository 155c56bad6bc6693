// Define message types for the runtime

use serde::{Deserialize, Serialize};

pub use crate::drive::telemetry::{DriveTelemetry, ModuleTelemetry};

// Body velocity command from teleop/scripts -> runtime
// Units are m/s and rad/s; field_relative defaults to robot-relative
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseCommand {
    pub x_vel: f64,
    pub y_vel: f64,
    pub theta_vel: f64,
    #[serde(default)]
    pub field_relative: bool,
}

// One-shot control requests, tagged by "type"
// e.g. {"type": "reset_pose", "x": 1.0, "y": 0.0, "theta": 0.0}
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Stop,
    Reset,
    ResetPose { x: f64, y: f64, theta: f64 },
    SetMaxSpeed { speed: f64 },
    SetMaxAngularSpeed { speed: f64 },
    /// Drive one module directly until the next base command or stop.
    SetModuleState { index: usize, speed: f64, angle_deg: f64 },
    /// Open-loop fractional outputs for one module, same lifetime as above.
    SetModuleOutput { index: usize, drive: f64, steer: f64 },
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    SensorFault,
}
