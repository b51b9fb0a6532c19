//! Actuator traits for the two vehicle families the formation stack drives.
//!
//! Free-flight vehicles expose [`Thruster`]s and [`Gyro`]s; ground vehicles
//! expose [`WheelSuspension`]s.  Station-keeping code only ever talks to these
//! traits, so drivers for real hardware and the simulated drivers in
//! [`crate::sim`] are interchangeable.

use formation_types::{FormationError, Vec3};

/// A linear thruster.
pub trait Thruster: Send {
    /// Stable identifier, e.g. `"thruster_aft_1"`.
    fn id(&self) -> &str;

    /// World-space direction in which this thruster accelerates the vehicle
    /// (opposite to its exhaust).
    fn thrust_direction(&self) -> Vec3;

    /// Maximum force the thruster can currently produce.
    fn max_effective_thrust(&self) -> f64;

    /// Command a fraction of maximum thrust in `[0, 1]`.  `0` releases the
    /// override.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::HardwareFault`] if the command cannot be
    /// applied.
    fn set_thrust_override(&mut self, fraction: f64) -> Result<(), FormationError>;
}

/// A gyroscope that can override the vehicle's angular velocity.
pub trait Gyro: Send {
    fn id(&self) -> &str;

    /// Command an angular velocity in the vehicle's local frame
    /// (`x` = pitch, `y` = yaw, `z` = roll, rad/s).  `None` releases the
    /// override.
    fn set_rate_override(&mut self, local_rate: Option<Vec3>) -> Result<(), FormationError>;
}

/// Per-wheel calibration written on the first control update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WheelCalibration {
    pub invert_steer: bool,
    pub invert_propulsion: bool,
    pub brake: bool,
}

/// A wheel suspension with optional steering and propulsion.
pub trait WheelSuspension: Send {
    fn id(&self) -> &str;

    /// Model subtype used to look up the rated propulsion force, e.g.
    /// `"Suspension3x3mirrored"`.
    fn subtype(&self) -> &str;

    fn position(&self) -> Vec3;

    /// World-space direction of the wheel's left axis.
    fn left(&self) -> Vec3;

    fn has_steering(&self) -> bool;

    fn has_propulsion(&self) -> bool;

    fn calibrate(&mut self, calibration: WheelCalibration) -> Result<(), FormationError>;

    /// Steering angle override.
    fn set_steer_override(&mut self, angle: f64) -> Result<(), FormationError>;

    /// Propulsion override as a fraction of rated force in `[-1, 1]`.
    fn set_propulsion_override(&mut self, fraction: f64) -> Result<(), FormationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockThruster {
        id: String,
        fraction: f64,
    }

    impl Thruster for MockThruster {
        fn id(&self) -> &str {
            &self.id
        }
        fn thrust_direction(&self) -> Vec3 {
            Vec3::new(0.0, 0.0, -1.0)
        }
        fn max_effective_thrust(&self) -> f64 {
            1000.0
        }
        fn set_thrust_override(&mut self, fraction: f64) -> Result<(), FormationError> {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(FormationError::HardwareFault {
                    component: self.id.clone(),
                    details: format!("override {fraction} out of range"),
                });
            }
            self.fraction = fraction;
            Ok(())
        }
    }

    #[test]
    fn mock_thruster_accepts_valid_fraction() {
        let mut t = MockThruster {
            id: "aft".to_string(),
            fraction: 0.0,
        };
        t.set_thrust_override(0.25).unwrap();
        assert!((t.fraction - 0.25).abs() < f64::EPSILON);
        assert!(matches!(
            t.set_thrust_override(1.5),
            Err(FormationError::HardwareFault { .. })
        ));
    }

    #[test]
    fn default_calibration_releases_everything() {
        let c = WheelCalibration::default();
        assert!(!c.invert_steer && !c.invert_propulsion && !c.brake);
    }
}
