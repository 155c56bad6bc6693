// Swerve kinematics for the four-module base
// Converts body-frame velocities into per-module speed/angle targets, and
// measured module states back into a best-fit body velocity.

use nalgebra::{SMatrix, SVector};

use super::geometry::{ChassisSpeeds, ModuleState, Translation2d};
use crate::config::ConfigError;

/// Number of swerve modules on the base.
pub const MODULE_COUNT: usize = 4;

/// Rows are (vx, vy) pairs per module, columns are (vx, vy, omega).
type ForwardMatrix = SMatrix<f64, { 2 * MODULE_COUNT }, 3>;
type InverseMatrix = SMatrix<f64, 3, { 2 * MODULE_COUNT }>;

/// Cross products smaller than this (m^2) treat three modules as collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-6;

/// Kinematic model of the base built from fixed module locations.
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    locations: [Translation2d; MODULE_COUNT],
    forward: ForwardMatrix,
    inverse: InverseMatrix,
}

impl SwerveKinematics {
    /// Build the model from module contact-point offsets (meters, body
    /// frame, relative to the center of rotation).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Geometry` if any offset is not finite, if two
    /// modules share a location, or if all modules lie on one line (the
    /// rotation rate is then unobservable).
    pub fn new(locations: [Translation2d; MODULE_COUNT]) -> Result<Self, ConfigError> {
        validate_geometry(&locations)?;

        let mut forward = ForwardMatrix::zeros();
        for (i, location) in locations.iter().enumerate() {
            // v_i = v + omega x r_i
            forward[(2 * i, 0)] = 1.0;
            forward[(2 * i, 2)] = -location.y;
            forward[(2 * i + 1, 1)] = 1.0;
            forward[(2 * i + 1, 2)] = location.x;
        }

        let inverse = forward
            .pseudo_inverse(1e-9)
            .map_err(|e| ConfigError::Geometry(e.to_string()))?;

        Ok(Self {
            locations,
            forward,
            inverse,
        })
    }

    pub fn locations(&self) -> &[Translation2d; MODULE_COUNT] {
        &self.locations
    }

    /// Inverse kinematics: the speed and direction every module needs to
    /// realize `speeds`.
    ///
    /// A module with zero resulting velocity gets angle 0.
    pub fn to_module_states(&self, speeds: ChassisSpeeds) -> [ModuleState; MODULE_COUNT] {
        let chassis = SVector::<f64, 3>::new(speeds.vx, speeds.vy, speeds.omega);
        let module_velocities = self.forward * chassis;

        std::array::from_fn(|i| {
            let velocity = Translation2d::new(module_velocities[2 * i], module_velocities[2 * i + 1]);
            ModuleState::new(velocity.norm(), velocity.angle())
        })
    }

    /// Forward kinematics: least-squares body velocity explaining the four
    /// module states.
    pub fn to_body_velocity(&self, states: &[ModuleState; MODULE_COUNT]) -> ChassisSpeeds {
        let mut module_velocities = SVector::<f64, { 2 * MODULE_COUNT }>::zeros();
        for (i, state) in states.iter().enumerate() {
            let velocity = state.velocity();
            module_velocities[2 * i] = velocity.x;
            module_velocities[2 * i + 1] = velocity.y;
        }

        let chassis = self.inverse * module_velocities;
        ChassisSpeeds::new(chassis[0], chassis[1], chassis[2])
    }
}

/// Scale all module speeds down so none exceeds `ceiling`.
///
/// Speeds keep their ratios to one another, so the direction of body motion
/// is preserved when the request is infeasible. Angles are untouched.
pub fn desaturate(states: &mut [ModuleState; MODULE_COUNT], ceiling: f64) {
    let max = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);

    if max > ceiling {
        let scale = ceiling / max;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
    }
}

/// Force `value` to exactly zero when its magnitude is below `threshold`.
pub fn apply_deadband(value: f64, threshold: f64) -> f64 {
    if value.abs() < threshold { 0.0 } else { value }
}

fn validate_geometry(locations: &[Translation2d; MODULE_COUNT]) -> Result<(), ConfigError> {
    if let Some(i) = locations.iter().position(|l| !l.is_finite()) {
        return Err(ConfigError::Geometry(format!("module {} location is not finite", i)));
    }

    for i in 0..MODULE_COUNT {
        for j in (i + 1)..MODULE_COUNT {
            let a = locations[i];
            let b = locations[j];
            if (a.x - b.x).hypot(a.y - b.y) < COLLINEAR_TOLERANCE {
                return Err(ConfigError::Geometry(format!(
                    "modules {} and {} share a location",
                    i, j
                )));
            }
        }
    }

    // Not collinear if any third module sits off the line through the first two
    let origin = locations[0];
    let axis = Translation2d::new(locations[1].x - origin.x, locations[1].y - origin.y);
    let spans_plane = locations[2..].iter().any(|l| {
        let offset = Translation2d::new(l.x - origin.x, l.y - origin.y);
        (axis.x * offset.y - axis.y * offset.x).abs() > COLLINEAR_TOLERANCE
    });

    if spans_plane {
        Ok(())
    } else {
        Err(ConfigError::Geometry("module locations are collinear".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const EPSILON: f64 = 1e-9;

    fn default_locations() -> [Translation2d; MODULE_COUNT] {
        [
            Translation2d::new(0.34925, 0.24765),
            Translation2d::new(0.34925, -0.24765),
            Translation2d::new(-0.34925, 0.24765),
            Translation2d::new(-0.34925, -0.24765),
        ]
    }

    fn kinematics() -> SwerveKinematics {
        SwerveKinematics::new(default_locations()).unwrap()
    }

    #[test]
    fn test_straight_forward() {
        let states = kinematics().to_module_states(ChassisSpeeds::new(3.0, 0.0, 0.0));
        for state in &states {
            assert!((state.speed - 3.0).abs() < EPSILON);
            assert!(state.angle.abs() < EPSILON);
        }

        let mut desaturated = states;
        desaturate(&mut desaturated, 3.0);
        assert_eq!(desaturated, states);
    }

    #[test]
    fn test_strafe_left() {
        let states = kinematics().to_module_states(ChassisSpeeds::new(0.0, 1.5, 0.0));
        for state in &states {
            assert!((state.speed - 1.5).abs() < EPSILON);
            assert!((state.angle - PI / 2.0).abs() < EPSILON);
        }
    }

    #[test]
    fn test_pure_rotation() {
        let kin = kinematics();
        let states = kin.to_module_states(ChassisSpeeds::new(0.0, 0.0, PI));

        for (state, location) in states.iter().zip(kin.locations()) {
            // Speed proportional to the distance from the center
            assert!((state.speed - PI * location.norm()).abs() < EPSILON);

            // Wheel direction is perpendicular to the offset, CCW
            let along = state.velocity();
            let dot = along.x * location.x + along.y * location.y;
            assert!(dot.abs() < 1e-9);
            let cross = location.x * along.y - location.y * along.x;
            assert!(cross > 0.0);
        }
    }

    #[test]
    fn test_zero_velocity_gives_zero_states() {
        let states = kinematics().to_module_states(ChassisSpeeds::default());
        for state in &states {
            assert_eq!(state.speed, 0.0);
            assert_eq!(state.angle, 0.0);
        }
    }

    #[test]
    fn test_round_trip_recovers_body_velocity() {
        let kin = kinematics();
        let speeds = ChassisSpeeds::new(1.2, -0.7, 2.1);
        let recovered = kin.to_body_velocity(&kin.to_module_states(speeds));
        assert!((recovered.vx - speeds.vx).abs() < 1e-9);
        assert!((recovered.vy - speeds.vy).abs() < 1e-9);
        assert!((recovered.omega - speeds.omega).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_is_least_squares_fit() {
        // One wheel reads faster than the rest; the estimate lands between
        let kin = kinematics();
        let states = [
            ModuleState::new(1.4, 0.0),
            ModuleState::new(1.0, 0.0),
            ModuleState::new(1.0, 0.0),
            ModuleState::new(1.0, 0.0),
        ];
        let speeds = kin.to_body_velocity(&states);
        assert!((speeds.vx - 1.1).abs() < 1e-9);
        assert!(speeds.vy.abs() < 1e-9);
    }

    #[test]
    fn test_desaturate_preserves_ratios() {
        let kin = kinematics();
        let mut states = kin.to_module_states(ChassisSpeeds::new(3.0, 1.0, PI));
        let before = states;
        desaturate(&mut states, 3.0);

        let max = states.iter().map(|s| s.speed.abs()).fold(0.0, f64::max);
        assert!(max <= 3.0 + EPSILON);
        assert!((max - 3.0).abs() < EPSILON);

        for i in 0..MODULE_COUNT {
            assert_eq!(states[i].angle, before[i].angle);
            for j in 0..MODULE_COUNT {
                let ratio_before = before[i].speed / before[j].speed;
                let ratio_after = states[i].speed / states[j].speed;
                assert!((ratio_before - ratio_after).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_desaturate_leaves_feasible_request() {
        let mut states = [ModuleState::new(1.0, 0.3); MODULE_COUNT];
        desaturate(&mut states, 3.0);
        assert!(states.iter().all(|s| s.speed == 1.0));
    }

    #[test]
    fn test_deadband() {
        assert_eq!(apply_deadband(0.019, 0.02), 0.0);
        assert_eq!(apply_deadband(-0.019, 0.02), 0.0);
        assert_eq!(apply_deadband(0.02, 0.02), 0.02);
        assert_eq!(apply_deadband(-0.5, 0.02), -0.5);
    }

    #[test]
    fn test_rejects_collinear_modules() {
        let locations = [
            Translation2d::new(-0.3, 0.0),
            Translation2d::new(-0.1, 0.0),
            Translation2d::new(0.1, 0.0),
            Translation2d::new(0.3, 0.0),
        ];
        assert!(matches!(SwerveKinematics::new(locations), Err(ConfigError::Geometry(_))));
    }

    #[test]
    fn test_rejects_non_finite_location() {
        let mut locations = default_locations();
        locations[2].y = f64::NAN;
        assert!(matches!(SwerveKinematics::new(locations), Err(ConfigError::Geometry(_))));
    }
}
