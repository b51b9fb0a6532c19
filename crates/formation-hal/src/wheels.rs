//! Ground-vehicle station keeping over wheel suspensions.
//!
//! The position error is taken in the vehicle's local frame with the vertical
//! axis dropped.  Longitudinal error feeds a propulsion PID whose output,
//! scaled by vehicle mass, is a force spread across the wheels in order of
//! registration; lateral error feeds a steering PID.

use formation_types::{FormationError, TickRate, Vec3};
use tracing::{debug, trace};

use crate::actuator::{WheelCalibration, WheelSuspension};
use crate::controller::VehicleController;
use crate::pid::{PidController, PidGains};
use crate::station::{ActuatorCommand, StationGoal, StationKeeper};

const FORWARD_GAINS: PidGains = PidGains::new(0.5, 0.01, 1.0, 0.2);
const STEER_GAINS: PidGains = PidGains::new(0.1, 0.0, 0.05, 0.2);
/// Errors inside this band on either horizontal axis count as zero.
pub const DEAD_ZONE: f64 = 0.5;
const MAX_STEER: f64 = 1.0;
/// Seconds ahead of the vehicle to aim at when no target is given.
const LOOSE_LOOKAHEAD: f64 = 1.0;

/// Rated propulsion force of a wheel model, in newtons.
///
/// Mirrored variants share the force of their base model.
pub fn rated_force(subtype: &str) -> Option<f64> {
    let base = subtype.strip_suffix("mirrored").unwrap_or(subtype);
    match base {
        "Suspension1x1" => Some(20_000.0),
        "Suspension3x3" => Some(60_000.0),
        "Suspension5x5" => Some(100_000.0),
        "SmallSuspension1x1" => Some(120.0),
        "SmallSuspension3x3" => Some(1_920.0),
        "SmallSuspension5x5" => Some(4_800.0),
        _ => None,
    }
}

/// Spread `force` across wheels rated `ratings`, in order.
///
/// Each wheel takes as much of the remaining force as it can, as a fraction
/// in `[-1, 1]` of its rating; the rest carries to the next wheel.  Wheels
/// with no rating get `0`.
pub fn distribute_propulsion(force: f64, ratings: &[f64]) -> Vec<f64> {
    let mut remaining = force;
    ratings
        .iter()
        .map(|&max| {
            if max <= 0.0 {
                return 0.0;
            }
            let fraction = (remaining / max).clamp(-1.0, 1.0);
            remaining -= fraction * max;
            fraction
        })
        .collect()
}

fn dead_zone(value: f64) -> f64 {
    if value.abs() < DEAD_ZONE { 0.0 } else { value }
}

struct Wheel {
    device: Box<dyn WheelSuspension>,
    rated: f64,
}

/// Ground-vehicle [`StationKeeper`].
pub struct WheelControl {
    controller: Box<dyn VehicleController>,
    wheels: Vec<Wheel>,
    forward_pid: PidController,
    steer_pid: PidController,
    needs_calibration: bool,
}

impl WheelControl {
    /// # Errors
    ///
    /// [`FormationError::Configuration`] when a wheel's subtype has no
    /// rated force.
    pub fn new(
        controller: Box<dyn VehicleController>,
        wheels: Vec<Box<dyn WheelSuspension>>,
        rate: TickRate,
    ) -> Result<Self, FormationError> {
        let wheels = wheels
            .into_iter()
            .map(|device| {
                let rated = rated_force(device.subtype()).ok_or_else(|| {
                    FormationError::configuration(
                        device.id(),
                        format!("unknown wheel type '{}'", device.subtype()),
                    )
                })?;
                Ok(Wheel { device, rated })
            })
            .collect::<Result<Vec<_>, FormationError>>()?;

        let mut control = Self {
            controller,
            wheels,
            forward_pid: FORWARD_GAINS.controller(rate),
            steer_pid: STEER_GAINS
                .controller(rate)
                .with_output_limits(-MAX_STEER, MAX_STEER),
            needs_calibration: true,
        };
        control.reset()?;
        Ok(control)
    }

    fn calibrate(&mut self) -> Result<(), FormationError> {
        let frame = self.controller.world_matrix();
        let center = frame.inverse_transform_point(self.controller.center_of_mass());
        let forward = frame.forward();
        for wheel in &mut self.wheels {
            let local = frame.inverse_transform_point(wheel.device.position());
            let calibration = WheelCalibration {
                invert_steer: local.z > center.z,
                invert_propulsion: wheel.device.left().dot(forward) < 0.99,
                brake: false,
            };
            debug!(wheel = wheel.device.id(), ?calibration, "wheel calibrated");
            wheel.device.calibrate(calibration)?;
        }
        Ok(())
    }
}

impl StationKeeper for WheelControl {
    fn controller(&self) -> &dyn VehicleController {
        self.controller.as_ref()
    }

    fn compute(&mut self, goal: &StationGoal) -> ActuatorCommand {
        let frame = self.controller.world_matrix();
        let position = frame.translation;
        let target = goal
            .target
            .unwrap_or_else(|| position + goal.leader_velocity * LOOSE_LOOKAHEAD);

        let local = frame.inverse_transform_normal(position - target);
        let error = Vec3::new(dead_zone(local.x), 0.0, dead_zone(local.z));

        let propulsion_force = self.forward_pid.control(error.z) * self.controller.total_mass();
        let mut steer = self.steer_pid.control(-error.x);
        let local_velocity = frame.inverse_transform_normal(self.controller.linear_velocity());
        // Reversing: forward is -Z, so positive local z speed means backing up.
        // At rest the vehicle steers as if rolling forward.
        if local_velocity.z > 0.0 {
            steer = -steer;
        }
        trace!(?error, steer, propulsion_force, "wheel control");
        ActuatorCommand::Ground {
            steer,
            propulsion_force,
        }
    }

    fn apply(&mut self, command: &ActuatorCommand) -> Result<(), FormationError> {
        let ActuatorCommand::Ground {
            steer,
            propulsion_force,
        } = *command
        else {
            return Err(FormationError::HardwareFault {
                component: self.controller.name().to_string(),
                details: "flight command sent to a ground vehicle".to_string(),
            });
        };

        if self.needs_calibration {
            self.calibrate()?;
            self.needs_calibration = false;
        }

        let ratings: Vec<f64> = self
            .wheels
            .iter()
            .map(|w| if w.device.has_propulsion() { w.rated } else { 0.0 })
            .collect();
        let fractions = distribute_propulsion(propulsion_force, &ratings);
        for (wheel, fraction) in self.wheels.iter_mut().zip(fractions) {
            if wheel.device.has_steering() {
                wheel.device.set_steer_override(steer)?;
            }
            if wheel.device.has_propulsion() {
                wheel.device.set_propulsion_override(fraction)?;
            }
        }
        Ok(())
    }

    /// Zero overrides, clear inversion flags and set the parking brake.  The
    /// next [`apply`](StationKeeper::apply) calibrates again.
    fn reset(&mut self) -> Result<(), FormationError> {
        for wheel in &mut self.wheels {
            wheel.device.set_propulsion_override(0.0)?;
            wheel.device.set_steer_override(0.0)?;
            wheel.device.calibrate(WheelCalibration {
                brake: true,
                ..WheelCalibration::default()
            })?;
        }
        self.forward_pid.reset();
        self.steer_pid.reset();
        self.needs_calibration = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_world::{SimVehicle, SimWorld};
    use crate::station::station_keeper;
    use formation_types::{EntityId, RigidTransform};

    fn goal(target: Vec3) -> StationGoal {
        StationGoal {
            target: Some(target),
            leader: RigidTransform::identity(),
            leader_velocity: Vec3::ZERO,
            max_relative_speed: 10.0,
        }
    }

    #[test]
    fn rated_force_covers_mirrored_models() {
        assert_eq!(rated_force("Suspension3x3"), Some(60_000.0));
        assert_eq!(rated_force("Suspension3x3mirrored"), Some(60_000.0));
        assert_eq!(rated_force("SmallSuspension5x5mirrored"), Some(4_800.0));
        assert_eq!(rated_force("LargeStator"), None);
    }

    #[test]
    fn propulsion_fills_wheels_in_order() {
        let fractions = distribute_propulsion(150.0, &[100.0, 100.0, 100.0]);
        assert_eq!(fractions, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn propulsion_handles_reverse_and_saturation() {
        let fractions = distribute_propulsion(-500.0, &[100.0, 0.0, 100.0]);
        assert_eq!(fractions, vec![-1.0, 0.0, -1.0]);
    }

    #[test]
    fn dead_zone_suppresses_small_errors() {
        assert_eq!(dead_zone(0.49), 0.0);
        assert_eq!(dead_zone(-0.3), 0.0);
        assert_eq!(dead_zone(0.5), 0.5);
        assert_eq!(dead_zone(-2.0), -2.0);
    }

    #[test]
    fn target_inside_dead_zone_commands_nothing() {
        let world = SimWorld::new();
        let mut rover = SimVehicle::builder(EntityId(4), "Rover")
            .with_wheels("Suspension3x3")
            .build(&world);
        let mut keeper = station_keeper(&mut rover.registry, "", TickRate::Update1).unwrap();
        let command = keeper.compute(&goal(Vec3::new(0.3, 5.0, -0.4)));
        assert_eq!(
            command,
            ActuatorCommand::Ground {
                steer: 0.0,
                propulsion_force: 0.0
            }
        );
    }

    #[test]
    fn target_ahead_drives_forward_and_right_steers_right() {
        let world = SimWorld::new();
        let mut rover = SimVehicle::builder(EntityId(4), "Rover")
            .with_wheels("Suspension3x3")
            .build(&world);
        let mut keeper = station_keeper(&mut rover.registry, "", TickRate::Update1).unwrap();
        match keeper.compute(&goal(Vec3::new(10.0, 0.0, -20.0))) {
            ActuatorCommand::Ground {
                steer,
                propulsion_force,
            } => {
                assert!(propulsion_force > 0.0);
                assert!(steer > 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn steering_flips_when_reversing() {
        let world = SimWorld::new();
        let mut rover = SimVehicle::builder(EntityId(4), "Rover")
            .with_wheels("Suspension3x3")
            .build(&world);
        rover.body.lock().velocity = Vec3::new(0.0, 0.0, 3.0);
        let mut keeper = station_keeper(&mut rover.registry, "", TickRate::Update1).unwrap();
        match keeper.compute(&goal(Vec3::new(10.0, 0.0, 20.0))) {
            ActuatorCommand::Ground {
                steer,
                propulsion_force,
            } => {
                assert!(propulsion_force < 0.0);
                assert!(steer < 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn steering_is_not_flipped_at_rest() {
        let world = SimWorld::new();
        let mut rover = SimVehicle::builder(EntityId(4), "Rover")
            .with_wheels("Suspension3x3")
            .build(&world);
        let mut keeper = station_keeper(&mut rover.registry, "", TickRate::Update1).unwrap();
        match keeper.compute(&goal(Vec3::new(10.0, 0.0, 20.0))) {
            ActuatorCommand::Ground {
                steer,
                propulsion_force,
            } => {
                assert!(propulsion_force < 0.0);
                assert!(steer > 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn first_apply_calibrates_and_releases_brake() {
        let world = SimWorld::new();
        let mut rover = SimVehicle::builder(EntityId(4), "Rover")
            .with_wheels("Suspension3x3")
            .build(&world);
        let mut keeper = station_keeper(&mut rover.registry, "", TickRate::Update1).unwrap();
        assert!(rover.body.lock().wheels.iter().all(|w| w.calibration.brake));

        keeper.update(&goal(Vec3::new(0.0, 0.0, -20.0))).unwrap();
        let body = rover.body.lock();
        assert!(body.wheels.iter().all(|w| !w.calibration.brake));
        // Rear wheels sit behind the center of mass and steer inverted.
        for wheel in &body.wheels {
            assert_eq!(wheel.calibration.invert_steer, wheel.local_position.z > 0.0);
        }
    }

    #[test]
    fn reset_brakes_and_recalibrates() {
        let world = SimWorld::new();
        let mut rover = SimVehicle::builder(EntityId(4), "Rover")
            .with_wheels("Suspension3x3")
            .build(&world);
        let mut keeper = station_keeper(&mut rover.registry, "", TickRate::Update1).unwrap();
        keeper.update(&goal(Vec3::new(0.0, 0.0, -20.0))).unwrap();
        keeper.reset().unwrap();
        {
            let body = rover.body.lock();
            assert!(body.wheels.iter().all(|w| w.calibration.brake && w.propulsion == 0.0));
        }
        keeper.update(&goal(Vec3::new(0.0, 0.0, -20.0))).unwrap();
        assert!(rover.body.lock().wheels.iter().all(|w| !w.calibration.brake));
    }

    #[test]
    fn rover_drives_to_target_ahead() {
        let world = SimWorld::new();
        let rover = SimVehicle::builder(EntityId(4), "Rover")
            .mass(5_000.0)
            .with_wheels("Suspension3x3")
            .build(&world);
        let mut registry = rover.registry;
        let mut keeper = station_keeper(&mut registry, "", TickRate::Update1).unwrap();
        let target = Vec3::new(0.0, 0.0, -30.0);
        let dt = TickRate::Update1.seconds_per_run();
        for _ in 0..60 * 30 {
            keeper.update(&goal(target)).unwrap();
            world.step(dt);
        }
        let position = rover.body.lock().pose.translation;
        assert!(position.distance(target) < 2.0, "ended at {position:?}");
    }
}
