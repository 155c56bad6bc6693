// Swerve drivetrain: kinematics, module control, odometry
pub mod control;
pub mod drivetrain;
pub mod geometry;
pub mod hardware;
pub mod kinematics;
pub mod module;
pub mod odometry;
pub mod sim;
pub mod telemetry;

pub use drivetrain::Drivetrain;
pub use geometry::{ChassisSpeeds, ModuleState, Pose, Translation2d};
pub use hardware::{DrivetrainHardware, HardwareError, ModuleHardware, SensorStatus};
pub use kinematics::{MODULE_COUNT, SwerveKinematics};
pub use telemetry::{DriveTelemetry, ModuleTelemetry};

/// Misuse of the drivetrain API.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DriveError {
    #[error("module index {index} out of range (have {count})")]
    InvalidModule { index: usize, count: usize },

    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },
}
