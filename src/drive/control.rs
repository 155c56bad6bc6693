// Feedback and feedforward controllers for module actuators
//
// Provides:
// - PID controller with a clamped integrator
// - Trapezoidal motion profile
// - Profiled PID for continuous (wrapping) angle control
// - Static-friction plus velocity feedforward

use serde::{Deserialize, Serialize};

use super::geometry::{angle_difference, normalize_angle};

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Bound on the integral term's contribution to the output.
    #[serde(default = "default_integral_limit")]
    pub integral_limit: f64,
}

fn default_integral_limit() -> f64 {
    1.0
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral_limit: 1.0,
        }
    }
}

/// Discrete PID controller running at a fixed period.
#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    period: f64,
    integral: f64,
    prev_error: Option<f64>,
}

impl PidController {
    pub fn new(gains: PidGains, period: f64) -> Self {
        Self {
            gains,
            period,
            integral: 0.0,
            prev_error: None,
        }
    }

    /// Controller output driving `measurement` toward `setpoint`.
    pub fn calculate(&mut self, measurement: f64, setpoint: f64) -> f64 {
        self.calculate_from_error(setpoint - measurement)
    }

    /// Controller output for an error already computed by the caller (used
    /// for wrapping quantities).
    pub fn calculate_from_error(&mut self, error: f64) -> f64 {
        let PidGains {
            kp,
            ki,
            kd,
            integral_limit,
        } = self.gains;

        let derivative = match self.prev_error {
            Some(prev) => (error - prev) / self.period,
            None => 0.0,
        };
        self.prev_error = Some(error);

        if ki != 0.0 {
            let bound = (integral_limit / ki).abs();
            self.integral = (self.integral + error * self.period).clamp(-bound, bound);
        }

        kp * error + ki * self.integral + kd * derivative
    }

    /// Clear the integrator and derivative history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }
}

/// Velocity and acceleration bounds of a motion profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileConstraints {
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

/// Position and velocity of a profiled axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileState {
    pub position: f64,
    pub velocity: f64,
}

impl ProfileState {
    pub const fn new(position: f64, velocity: f64) -> Self {
        Self { position, velocity }
    }
}

/// Trapezoidal velocity profile from an initial state to a goal state.
///
/// The profile accelerates at the limit, cruises at the velocity limit if
/// there is room, then decelerates to arrive at the goal.
#[derive(Debug, Clone, Copy)]
pub struct TrapezoidProfile {
    constraints: ProfileConstraints,
    direction: f64,
    initial: ProfileState,
    goal: ProfileState,
    end_accel: f64,
    end_full_speed: f64,
    end_decel: f64,
}

impl TrapezoidProfile {
    pub fn new(constraints: ProfileConstraints, goal: ProfileState, initial: ProfileState) -> Self {
        // Work in a frame where the motion is always positive
        let direction = if initial.position > goal.position { -1.0 } else { 1.0 };
        let flip = |s: ProfileState| ProfileState::new(s.position * direction, s.velocity * direction);

        let mut initial = flip(initial);
        let goal = flip(goal);

        let max_v = constraints.max_velocity;
        let max_a = constraints.max_acceleration;

        if initial.velocity > max_v {
            initial.velocity = max_v;
        }

        // Extend the trapezoid back to zero velocity at both ends
        let cutoff_begin = initial.velocity / max_a;
        let cutoff_dist_begin = cutoff_begin * cutoff_begin * max_a / 2.0;

        let cutoff_end = goal.velocity / max_a;
        let cutoff_dist_end = cutoff_end * cutoff_end * max_a / 2.0;

        let full_trapezoid_dist =
            cutoff_dist_begin + (goal.position - initial.position) + cutoff_dist_end;
        let mut accel_time = max_v / max_a;

        let mut full_speed_dist = full_trapezoid_dist - accel_time * accel_time * max_a;

        // Triangle profile: never reaches the velocity limit
        if full_speed_dist < 0.0 {
            accel_time = (full_trapezoid_dist / max_a).sqrt();
            full_speed_dist = 0.0;
        }

        let end_accel = accel_time - cutoff_begin;
        let end_full_speed = end_accel + full_speed_dist / max_v;
        let end_decel = end_full_speed + accel_time - cutoff_end;

        Self {
            constraints,
            direction,
            initial,
            goal,
            end_accel,
            end_full_speed,
            end_decel,
        }
    }

    /// Profile state `t` seconds after the initial state.
    pub fn calculate(&self, t: f64) -> ProfileState {
        let max_v = self.constraints.max_velocity;
        let max_a = self.constraints.max_acceleration;
        let mut result = self.initial;

        if t < self.end_accel {
            result.velocity += t * max_a;
            result.position += (self.initial.velocity + t * max_a / 2.0) * t;
        } else if t < self.end_full_speed {
            result.velocity = max_v;
            result.position += (self.initial.velocity + self.end_accel * max_a / 2.0) * self.end_accel
                + max_v * (t - self.end_accel);
        } else if t <= self.end_decel {
            let time_left = self.end_decel - t;
            result.velocity = self.goal.velocity + time_left * max_a;
            result.position = self.goal.position - (self.goal.velocity + time_left * max_a / 2.0) * time_left;
        } else {
            result = self.goal;
        }

        ProfileState::new(result.position * self.direction, result.velocity * self.direction)
    }

    /// Total time to reach the goal.
    pub fn total_time(&self) -> f64 {
        self.end_decel
    }
}

/// PID on a wrapping angle whose setpoint follows a trapezoid profile.
///
/// The goal and the running setpoint are both re-expressed along the
/// shortest path from the measurement before each step, so the axis never
/// unwinds past a half turn.
#[derive(Debug, Clone)]
pub struct ProfiledAngleController {
    pid: PidController,
    constraints: ProfileConstraints,
    period: f64,
    setpoint: ProfileState,
}

impl ProfiledAngleController {
    pub fn new(gains: PidGains, constraints: ProfileConstraints, period: f64) -> Self {
        Self {
            pid: PidController::new(gains, period),
            constraints,
            period,
            setpoint: ProfileState::default(),
        }
    }

    /// Advance the profile one period toward `goal` and return the PID
    /// output for the new setpoint.
    pub fn calculate(&mut self, measurement: f64, goal: f64) -> f64 {
        let goal = measurement + angle_difference(goal, measurement);
        let current = ProfileState::new(
            measurement + angle_difference(self.setpoint.position, measurement),
            self.setpoint.velocity,
        );

        let profile = TrapezoidProfile::new(self.constraints, ProfileState::new(goal, 0.0), current);
        let next = profile.calculate(self.period);
        self.setpoint = ProfileState::new(normalize_angle(next.position), next.velocity);

        self.pid
            .calculate_from_error(angle_difference(self.setpoint.position, measurement))
    }

    /// Current profile setpoint; its velocity feeds the steering feedforward.
    pub fn setpoint(&self) -> ProfileState {
        self.setpoint
    }

    /// Restart the profile from `measurement` at rest.
    pub fn reset(&mut self, measurement: f64) {
        self.pid.reset();
        self.setpoint = ProfileState::new(normalize_angle(measurement), 0.0);
    }
}

/// Feedforward gains: static friction `ks` (volts) and velocity `kv`
/// (volts per unit/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleFeedforward {
    pub ks: f64,
    pub kv: f64,
}

impl SimpleFeedforward {
    pub const fn new(ks: f64, kv: f64) -> Self {
        Self { ks, kv }
    }

    /// Voltage needed to hold `velocity`. No static term at rest.
    pub fn calculate(&self, velocity: f64) -> f64 {
        let sign = if velocity == 0.0 { 0.0 } else { velocity.signum() };
        self.ks * sign + self.kv * velocity
    }
}
