//! Scalar PID (Proportional–Integral–Derivative) controller.
//!
//! Unlike a set-point controller, this one is fed the *error* directly: the
//! station-keeping code already works in error space (local position error,
//! orientation error).  The sample period `dt` is fixed at construction
//! because the external scheduler runs the control loop at a fixed tick rate.
//!
//! # Example
//!
//! ```rust
//! use formation_hal::pid::PidController;
//!
//! let mut pid = PidController::new(1.0, 0.1, 0.0, 5.0, 1.0 / 60.0);
//! let output = pid.control(2.0);
//! assert!(output > 0.0);
//! ```

use formation_types::TickRate;

/// Gains for one controlled axis, expressed for a loop that runs every game
/// tick.  [`PidGains::for_rate`] rescales them for slower loops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub integral_clamp: f64,
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64, integral_clamp: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral_clamp,
        }
    }

    /// Divide every gain and the integral clamp by the number of game ticks
    /// between evaluations, so the closed loop behaves the same at every
    /// [`TickRate`].
    pub fn for_rate(self, rate: TickRate) -> Self {
        let factor = f64::from(rate.ticks_per_run());
        Self {
            kp: self.kp / factor,
            ki: self.ki / factor,
            kd: self.kd / factor,
            integral_clamp: self.integral_clamp / factor,
        }
    }

    /// Build a controller for a loop running at `rate`.
    pub fn controller(self, rate: TickRate) -> PidController {
        let g = self.for_rate(rate);
        PidController::new(g.kp, g.ki, g.kd, g.integral_clamp, rate.seconds_per_run())
    }
}

/// A PID controller with a clamped integral term and an optional clamped
/// output.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    dt: f64,
    integral: f64,
    previous_error: f64,
    integral_clamp: f64,
    output_min: f64,
    output_max: f64,
}

impl PidController {
    /// Create a controller.  Output is unclamped by default.
    pub fn new(kp: f64, ki: f64, kd: f64, integral_clamp: f64, dt: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            dt,
            integral: 0.0,
            previous_error: 0.0,
            integral_clamp: integral_clamp.abs(),
            output_min: f64::NEG_INFINITY,
            output_max: f64::INFINITY,
        }
    }

    /// Clamp the controller output to `[min, max]`.
    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        self.output_min = min;
        self.output_max = max;
    }

    pub fn with_output_limits(mut self, min: f64, max: f64) -> Self {
        self.set_output_limits(min, max);
        self
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Feed one error sample and return the control output.
    ///
    /// Returns `0.0` without touching internal state when `dt` is not
    /// positive.
    pub fn control(&mut self, error: f64) -> f64 {
        if self.dt <= 0.0 {
            return 0.0;
        }

        // Anti-windup: the accumulator itself is bounded.
        self.integral = (self.integral + error * self.dt)
            .clamp(-self.integral_clamp, self.integral_clamp);

        let derivative = (error - self.previous_error) / self.dt;
        self.previous_error = error;

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        output.clamp(self.output_min, self.output_max)
    }

    /// Zero the integral and derivative memory.  Gains are kept.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
    }
}
