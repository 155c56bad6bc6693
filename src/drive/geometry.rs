// Planar geometry for the swerve base
// Angles, translations, poses and velocity types shared by kinematics,
// module control and odometry. All angles are radians, CCW positive.

use std::f64::consts::{PI, TAU};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Wrap an angle into `(-PI, PI]`.
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    if a > PI { a - TAU } else { a }
}

/// Shortest signed rotation taking `from` onto `to`, in `(-PI, PI]`.
///
/// Every place that compares two angles goes through this function so that
/// the +-PI seam is handled in exactly one way.
pub fn angle_difference(to: f64, from: f64) -> f64 {
    normalize_angle(to - from)
}

/// A 2-D vector in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Translation2d {
    pub x: f64,
    pub y: f64,
}

impl Translation2d {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Direction of the vector. The zero vector points along +x.
    pub fn angle(&self) -> f64 {
        if self.x == 0.0 && self.y == 0.0 {
            0.0
        } else {
            self.y.atan2(self.x)
        }
    }

    pub fn rotate_by(&self, theta: f64) -> Self {
        let (sin, cos) = theta.sin_cos();
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A change in pose expressed in the frame of the starting pose.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist2d {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

/// Field-frame pose `(x, y, theta)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Field x position (m).
    pub x: f64,
    /// Field y position (m).
    pub y: f64,
    /// Heading (rad), normalized to `(-PI, PI]`.
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: normalize_angle(theta),
        }
    }

    pub fn translation(&self) -> Translation2d {
        Translation2d::new(self.x, self.y)
    }

    /// Apply a body-frame twist using the SE(2) exponential map.
    ///
    /// Motion along a constant-curvature arc is integrated exactly, so a
    /// twist with `dtheta == 0` moves the pose in a straight line along its
    /// heading.
    pub fn exp(&self, twist: Twist2d) -> Pose {
        let Twist2d { dx, dy, dtheta } = twist;
        let (sin_theta, cos_theta) = dtheta.sin_cos();

        // Series expansion near zero avoids dividing by a vanishing angle
        let (s, c) = if dtheta.abs() < 1e-9 {
            (1.0 - dtheta * dtheta / 6.0, 0.5 * dtheta)
        } else {
            (sin_theta / dtheta, (1.0 - cos_theta) / dtheta)
        };

        let local = Translation2d::new(dx * s - dy * c, dx * c + dy * s);
        let field = local.rotate_by(self.theta);

        Pose::new(self.x + field.x, self.y + field.y, self.theta + dtheta)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(x: {:.3} m, y: {:.3} m, θ: {:.1}°)",
            self.x,
            self.y,
            self.theta.to_degrees()
        )
    }
}

/// Body velocity of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisSpeeds {
    /// Forward velocity (m/s).
    pub vx: f64,
    /// Leftward velocity (m/s).
    pub vy: f64,
    /// Rotation rate (rad/s), CCW positive.
    pub omega: f64,
}

impl ChassisSpeeds {
    pub const fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self { vx, vy, omega }
    }

    /// Convert a field-relative command into the body frame given the
    /// robot's current heading.
    pub fn from_field_relative(vx: f64, vy: f64, omega: f64, heading: f64) -> Self {
        let body = Translation2d::new(vx, vy).rotate_by(-heading);
        Self::new(body.x, body.y, omega)
    }

    pub fn is_zero(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }
}

impl fmt::Display for ChassisSpeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(vx: {:.2} m/s, vy: {:.2} m/s, ω: {:.2} rad/s)",
            self.vx, self.vy, self.omega
        )
    }
}

/// Speed and heading of a single wheel module.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleState {
    /// Wheel ground speed (m/s), signed.
    pub speed: f64,
    /// Wheel direction (rad) in the body frame, normalized to `(-PI, PI]`.
    pub angle: f64,
}

impl ModuleState {
    pub fn new(speed: f64, angle: f64) -> Self {
        Self {
            speed,
            angle: normalize_angle(angle),
        }
    }

    pub fn from_degrees(speed: f64, angle_deg: f64) -> Self {
        Self::new(speed, angle_deg.to_radians())
    }

    pub fn angle_degrees(&self) -> f64 {
        self.angle.to_degrees()
    }

    /// Planar velocity vector of the wheel contact point.
    pub fn velocity(&self) -> Translation2d {
        let (sin, cos) = self.angle.sin_cos();
        Translation2d::new(self.speed * cos, self.speed * sin)
    }

    /// Pick the equivalent state that needs the least steering from
    /// `current_angle`.
    ///
    /// If reaching `self.angle` would turn the wheel more than 90 degrees,
    /// the wheel is pointed the opposite way and driven in reverse instead.
    pub fn optimize(&self, current_angle: f64) -> ModuleState {
        let delta = angle_difference(self.angle, current_angle);
        if delta.abs() > PI / 2.0 {
            ModuleState::new(-self.speed, self.angle + PI)
        } else {
            *self
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2} m/s @ {:.1}°)", self.speed, self.angle_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_normalize_angle_range() {
        assert!((normalize_angle(0.0)).abs() < EPSILON);
        assert!((normalize_angle(PI) - PI).abs() < EPSILON);
        assert!((normalize_angle(-PI) - PI).abs() < EPSILON); // -PI maps onto PI
        assert!((normalize_angle(3.0 * PI) - PI).abs() < EPSILON);
        assert!((normalize_angle(2.5 * PI) - 0.5 * PI).abs() < EPSILON);
        assert!((normalize_angle(-2.5 * PI) + 0.5 * PI).abs() < EPSILON);

        for i in -720..=720 {
            let a = normalize_angle((i as f64).to_radians() * 1.7);
            assert!(a > -PI && a <= PI, "angle {} out of range", a);
        }
    }

    #[test]
    fn test_degree_round_trip() {
        for deg in [-179.5, -90.0, -2.197, 0.0, 45.0, 88.066, 129.99, 180.0] {
            let state = ModuleState::from_degrees(1.0, deg);
            assert!((state.angle_degrees() - deg).abs() < 1e-9, "{} -> {}", deg, state.angle_degrees());
        }
    }

    #[test]
    fn test_angle_difference_takes_short_way() {
        let d = angle_difference(170f64.to_radians(), (-170f64).to_radians());
        assert!((d - (-20f64).to_radians()).abs() < EPSILON);

        let d = angle_difference((-170f64).to_radians(), 170f64.to_radians());
        assert!((d - 20f64.to_radians()).abs() < EPSILON);

        let d = angle_difference(0.5, 0.2);
        assert!((d - 0.3).abs() < EPSILON);
    }

    #[test]
    fn test_optimize_keeps_small_rotation() {
        let desired = ModuleState::from_degrees(2.0, 80.0);
        let optimized = desired.optimize(0.0);
        assert_eq!(optimized, desired);
    }

    #[test]
    fn test_optimize_flips_large_rotation() {
        let desired = ModuleState::from_degrees(2.0, 135.0);
        let optimized = desired.optimize(0.0);
        assert!((optimized.speed + 2.0).abs() < EPSILON);
        assert!((optimized.angle_degrees() - (-45.0)).abs() < 1e-9);
    }

    #[test]
    fn test_optimize_delta_always_within_quarter_turn() {
        for current in (-180..180).step_by(7) {
            for desired in (-180..180).step_by(11) {
                let current = (current as f64).to_radians();
                let state = ModuleState::from_degrees(1.5, desired as f64);
                let optimized = state.optimize(current);
                let delta = angle_difference(optimized.angle, current);
                assert!(delta.abs() <= PI / 2.0 + EPSILON);

                let flipped = angle_difference(state.angle, current).abs() > PI / 2.0;
                assert_eq!(optimized.speed < 0.0, flipped);
            }
        }
    }

    #[test]
    fn test_field_relative_rotates_by_negative_heading() {
        // Facing +y on the field, a field +x command is a rightward body command
        let speeds = ChassisSpeeds::from_field_relative(1.0, 0.0, 0.3, PI / 2.0);
        assert!(speeds.vx.abs() < EPSILON);
        assert!((speeds.vy + 1.0).abs() < EPSILON);
        assert!((speeds.omega - 0.3).abs() < EPSILON);
    }

    #[test]
    fn test_pose_exp_straight() {
        let pose = Pose::new(1.0, 1.0, PI / 2.0);
        let moved = pose.exp(Twist2d { dx: 2.0, dy: 0.0, dtheta: 0.0 });
        assert!((moved.x - 1.0).abs() < EPSILON);
        assert!((moved.y - 3.0).abs() < EPSILON);
        assert!((moved.theta - PI / 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_pose_exp_quarter_arc() {
        // Drive a quarter circle of radius 1 turning left
        let pose = Pose::default();
        let moved = pose.exp(Twist2d { dx: PI / 2.0, dy: 0.0, dtheta: PI / 2.0 });
        assert!((moved.x - 1.0).abs() < 1e-9);
        assert!((moved.y - 1.0).abs() < 1e-9);
        assert!((moved.theta - PI / 2.0).abs() < 1e-9);
    }
}
