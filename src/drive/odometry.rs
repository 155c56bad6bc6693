// Dead-reckoning pose estimate from module states and sensor heading
use super::geometry::{ModuleState, Pose, Twist2d, angle_difference, normalize_angle};
use super::kinematics::{MODULE_COUNT, SwerveKinematics};

/// Integrates wheel motion into a field-frame pose.
///
/// Translation comes from the least-squares body velocity of the four
/// modules; rotation always comes from the heading sensor.
#[derive(Debug, Clone)]
pub struct PoseEstimator {
    kinematics: SwerveKinematics,
    pose: Pose,
    // Added to the sensor heading to get pose.theta
    gyro_offset: f64,
    previous_angle: f64,
}

impl PoseEstimator {
    pub fn new(kinematics: SwerveKinematics, heading: f64, pose: Pose) -> Self {
        let mut estimator = Self {
            kinematics,
            pose,
            gyro_offset: 0.0,
            previous_angle: pose.theta,
        };
        estimator.reset(pose, heading);
        estimator
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Replace the estimate so that the current sensor `heading` maps to
    /// `pose.theta`.
    pub fn reset(&mut self, pose: Pose, heading: f64) {
        self.pose = pose;
        self.gyro_offset = angle_difference(pose.theta, heading);
        self.previous_angle = pose.theta;
    }

    /// Advance the estimate by one period of `dt` seconds.
    pub fn update(&mut self, heading: f64, states: &[ModuleState; MODULE_COUNT], dt: f64) -> Pose {
        let angle = normalize_angle(heading + self.gyro_offset);
        let speeds = self.kinematics.to_body_velocity(states);

        let twist = Twist2d {
            dx: speeds.vx * dt,
            dy: speeds.vy * dt,
            dtheta: angle_difference(angle, self.previous_angle),
        };

        let moved = self.pose.exp(twist);
        self.pose = Pose::new(moved.x, moved.y, angle);
        self.previous_angle = angle;
        self.pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::geometry::Translation2d;
    use std::f64::consts::PI;

    const EPSILON: f64 = 1e-9;

    fn estimator(heading: f64) -> PoseEstimator {
        let kinematics = SwerveKinematics::new([
            Translation2d::new(0.34925, 0.24765),
            Translation2d::new(0.34925, -0.24765),
            Translation2d::new(-0.34925, 0.24765),
            Translation2d::new(-0.34925, -0.24765),
        ])
        .unwrap();
        PoseEstimator::new(kinematics, heading, Pose::default())
    }

    #[test]
    fn test_straight_line_moves_along_heading() {
        let heading = PI / 6.0;
        let mut odom = estimator(0.0);
        odom.reset(Pose::new(0.0, 0.0, heading), 0.0);

        let states = [ModuleState::new(2.0, 0.0); MODULE_COUNT];
        let mut pose = odom.pose();
        for _ in 0..50 {
            pose = odom.update(0.0, &states, 0.02);
        }

        // 2 m/s for 1 s
        assert!((pose.x - 2.0 * heading.cos()).abs() < EPSILON);
        assert!((pose.y - 2.0 * heading.sin()).abs() < EPSILON);
        assert!((pose.theta - heading).abs() < EPSILON);
    }

    #[test]
    fn test_zero_velocity_leaves_pose_unchanged() {
        let mut odom = estimator(0.3);
        odom.reset(Pose::new(1.0, -2.0, 0.5), 0.3);
        let before = odom.pose();
        let after = odom.update(0.3, &[ModuleState::default(); MODULE_COUNT], 0.02);
        assert!((after.x - before.x).abs() < EPSILON);
        assert!((after.y - before.y).abs() < EPSILON);
        assert!((after.theta - before.theta).abs() < EPSILON);
    }

    #[test]
    fn test_rotation_comes_from_sensor() {
        let mut odom = estimator(0.0);
        // Wheels say nothing, sensor says we turned
        let pose = odom.update(0.4, &[ModuleState::default(); MODULE_COUNT], 0.02);
        assert!((pose.theta - 0.4).abs() < EPSILON);
        assert!(pose.x.abs() < EPSILON && pose.y.abs() < EPSILON);
    }

    #[test]
    fn test_reset_captures_heading_offset() {
        let mut odom = estimator(1.0);
        odom.reset(Pose::new(3.0, 4.0, -PI / 2.0), 1.0);
        assert_eq!(odom.pose(), Pose::new(3.0, 4.0, -PI / 2.0));

        let pose = odom.update(1.1, &[ModuleState::default(); MODULE_COUNT], 0.02);
        assert!((pose.theta - (-PI / 2.0 + 0.1)).abs() < EPSILON);
    }

    #[test]
    fn test_heading_wraps_across_seam() {
        let mut odom = estimator(0.0);
        odom.reset(Pose::new(0.0, 0.0, PI - 0.05), 0.0);
        let states = [ModuleState::new(1.0, 0.0); MODULE_COUNT];
        let pose = odom.update(0.1, &states, 0.02);

        assert!(pose.theta > -PI && pose.theta <= PI);
        assert!((angle_difference(pose.theta, -PI + 0.05)).abs() < EPSILON);
        // Moved about 0.02 m backwards along -x
        assert!((pose.x + 0.02).abs() < 1e-3);
    }
}
