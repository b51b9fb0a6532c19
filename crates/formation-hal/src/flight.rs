//! Free-flight station keeping over thrusters and gyros.
//!
//! Two decoupled loops run every tick:
//!
//! - **Orientation** – one PID per local axis drives the gyros until the
//!   vehicle's forward/up axes match the leader's.
//! - **Position** – one PID per world axis turns position error into a
//!   velocity correction on top of the leader's velocity.  The resulting
//!   velocity set-point is capped at `|leader velocity| + max_relative_speed`
//!   and the difference to the current velocity becomes an acceleration,
//!   which is spread across the thrusters.
//!
//! With no target position (loose follow) the position loop is skipped and
//! the set-point is the leader's velocity.

use formation_types::{FormationError, TickRate, Vec3};
use tracing::trace;

use crate::actuator::{Gyro, Thruster};
use crate::controller::VehicleController;
use crate::pid::{PidController, PidGains};
use crate::station::{ActuatorCommand, StationGoal, StationKeeper};

const POSITION_GAINS: PidGains = PidGains::new(0.6, 0.02, 0.2, 5.0);
const ORIENTATION_GAINS: PidGains = PidGains::new(4.0, 0.0, 0.4, 1.0);
/// Gyro rate limit, rad/s.
const MAX_ANGULAR_RATE: f64 = 3.0;
/// Seconds over which a velocity error is cancelled.
const VELOCITY_RESPONSE: f64 = 0.5;
/// Two thrusters share a direction when their unit vectors agree this well.
const SAME_DIRECTION: f64 = 0.99;

/// Free-flight [`StationKeeper`].
pub struct FlightControl {
    controller: Box<dyn VehicleController>,
    thrusters: Vec<Box<dyn Thruster>>,
    gyros: Vec<Box<dyn Gyro>>,
    position_pids: [PidController; 3],
    orientation_pids: [PidController; 3],
}

impl FlightControl {
    pub fn new(
        controller: Box<dyn VehicleController>,
        thrusters: Vec<Box<dyn Thruster>>,
        gyros: Vec<Box<dyn Gyro>>,
        rate: TickRate,
    ) -> Self {
        let position = || POSITION_GAINS.controller(rate);
        let orientation = || {
            ORIENTATION_GAINS
                .controller(rate)
                .with_output_limits(-MAX_ANGULAR_RATE, MAX_ANGULAR_RATE)
        };
        Self {
            controller,
            thrusters,
            gyros,
            position_pids: [position(), position(), position()],
            orientation_pids: [orientation(), orientation(), orientation()],
        }
    }

    fn angular_rate(&mut self, forward: Vec3, up: Vec3) -> Vec3 {
        let error = orientation_error(&self.controller.world_matrix(), forward, up);
        Vec3::new(
            self.orientation_pids[0].control(error.x),
            self.orientation_pids[1].control(error.y),
            self.orientation_pids[2].control(error.z),
        )
    }

    fn velocity_setpoint(&mut self, goal: &StationGoal) -> Vec3 {
        let Some(target) = goal.target else {
            return goal.leader_velocity;
        };
        let error = target - self.controller.position();
        let correction = Vec3::new(
            self.position_pids[0].control(error.x),
            self.position_pids[1].control(error.y),
            self.position_pids[2].control(error.z),
        );
        let max_speed = goal.leader_velocity.length() + goal.max_relative_speed.max(0.0);
        (goal.leader_velocity + correction).clamp_length(max_speed)
    }
}

impl StationKeeper for FlightControl {
    fn controller(&self) -> &dyn VehicleController {
        self.controller.as_ref()
    }

    fn compute(&mut self, goal: &StationGoal) -> ActuatorCommand {
        let angular_rate = self.angular_rate(goal.leader.forward(), goal.leader.up);
        let setpoint = self.velocity_setpoint(goal);
        let velocity = self.controller.linear_velocity();
        let acceleration =
            (setpoint - velocity) * (1.0 / VELOCITY_RESPONSE) - self.controller.natural_gravity();
        trace!(?setpoint, ?acceleration, "flight control");
        ActuatorCommand::Flight {
            acceleration,
            angular_rate,
        }
    }

    fn apply(&mut self, command: &ActuatorCommand) -> Result<(), FormationError> {
        let ActuatorCommand::Flight {
            acceleration,
            angular_rate,
        } = *command
        else {
            return Err(FormationError::HardwareFault {
                component: self.controller.name().to_string(),
                details: "ground command sent to a free-flight vehicle".to_string(),
            });
        };

        let force = acceleration * self.controller.total_mass();
        let layout: Vec<(Vec3, f64)> = self
            .thrusters
            .iter()
            .map(|t| (t.thrust_direction(), t.max_effective_thrust()))
            .collect();
        for (thruster, fraction) in self.thrusters.iter_mut().zip(thrust_fractions(force, &layout)) {
            thruster.set_thrust_override(fraction)?;
        }
        for gyro in &mut self.gyros {
            gyro.set_rate_override(Some(angular_rate))?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), FormationError> {
        for thruster in &mut self.thrusters {
            thruster.set_thrust_override(0.0)?;
        }
        for gyro in &mut self.gyros {
            gyro.set_rate_override(None)?;
        }
        for pid in self.position_pids.iter_mut().chain(self.orientation_pids.iter_mut()) {
            pid.reset();
        }
        Ok(())
    }
}

/// Rotation needed to bring `me`'s forward/up axes onto `forward`/`up`,
/// expressed in `me`'s local frame (pitch, yaw, roll).
pub fn orientation_error(
    me: &formation_types::RigidTransform,
    forward: Vec3,
    up: Vec3,
) -> Vec3 {
    let my_forward = me.forward();
    let mut axis = my_forward.cross(forward.normalize()) + me.up.cross(up.normalize());
    // Facing exactly away: the cross products vanish, so yaw around our own up.
    if my_forward.dot(forward) < 0.0 && my_forward.cross(forward).length() < 1e-3 {
        axis += me.up;
    }
    me.inverse_transform_normal(axis)
}

/// Split a world-space force across thrusters.
///
/// Each thruster takes the component of `force` along its own direction,
/// divided by the combined rating of every thruster pointing the same way,
/// clamped to `[0, 1]`.
pub fn thrust_fractions(force: Vec3, thrusters: &[(Vec3, f64)]) -> Vec<f64> {
    thrusters
        .iter()
        .map(|&(direction, _)| {
            let direction = direction.normalize();
            let component = force.dot(direction);
            if component <= 0.0 {
                return 0.0;
            }
            let rated: f64 = thrusters
                .iter()
                .filter(|(d, _)| d.normalize().dot(direction) >= SAME_DIRECTION)
                .map(|(_, max)| max.max(0.0))
                .sum();
            if rated <= 0.0 {
                0.0
            } else {
                (component / rated).clamp(0.0, 1.0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::sim_world::{SimVehicle, SimWorld};
    use crate::station::station_keeper;
    use formation_types::{EntityId, RigidTransform};

    fn drone(world: &SimWorld) -> (crate::sim::SharedBody, DeviceRegistry) {
        let v = SimVehicle::builder(EntityId(2), "Drone")
            .mass(1000.0)
            .with_thruster_block(20_000.0)
            .with_gyro()
            .build(world);
        (v.body, v.registry)
    }

    #[test]
    fn thrust_fractions_share_load_between_parallel_thrusters() {
        let fwd = Vec3::new(0.0, 0.0, -1.0);
        let back = Vec3::new(0.0, 0.0, 1.0);
        let layout = [(fwd, 100.0), (fwd, 300.0), (back, 100.0)];
        let fractions = thrust_fractions(Vec3::new(0.0, 0.0, -200.0), &layout);
        assert!((fractions[0] - 0.5).abs() < 1e-9);
        assert!((fractions[1] - 0.5).abs() < 1e-9);
        assert_eq!(fractions[2], 0.0);
    }

    #[test]
    fn thrust_fractions_saturate() {
        let layout = [(Vec3::new(1.0, 0.0, 0.0), 10.0)];
        assert_eq!(thrust_fractions(Vec3::new(1e6, 0.0, 0.0), &layout), vec![1.0]);
    }

    #[test]
    fn orientation_error_is_zero_when_aligned() {
        let me = RigidTransform::identity();
        let e = orientation_error(&me, me.forward(), me.up);
        assert!(e.length() < 1e-12);
    }

    #[test]
    fn orientation_error_yaws_toward_target() {
        let me = RigidTransform::identity();
        // Target forward is to our right (+X): yaw right is negative about +Y.
        let e = orientation_error(&me, Vec3::new(1.0, 0.0, 0.0), me.up);
        assert!(e.y < 0.0);
        assert!(e.x.abs() < 1e-12);
    }

    #[test]
    fn orientation_error_handles_reverse_heading() {
        let me = RigidTransform::identity();
        let e = orientation_error(&me, Vec3::new(0.0, 0.0, 1.0), me.up);
        assert!(e.length() > 0.5);
    }

    #[test]
    fn loose_follow_matches_leader_velocity() {
        let world = SimWorld::new();
        let (body, mut registry) = drone(&world);
        body.lock().velocity = Vec3::new(0.0, 0.0, -5.0);
        let mut keeper = station_keeper(&mut registry, "", TickRate::Update1).unwrap();
        let goal = StationGoal {
            target: None,
            leader: RigidTransform::identity(),
            leader_velocity: Vec3::new(0.0, 0.0, -5.0),
            max_relative_speed: 10.0,
        };
        match keeper.compute(&goal) {
            ActuatorCommand::Flight { acceleration, .. } => {
                assert!(acceleration.length() < 1e-9, "got {acceleration:?}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn velocity_setpoint_respects_relative_speed_cap() {
        let world = SimWorld::new();
        let (_body, mut registry) = drone(&world);
        let controller = registry.take_controller("").unwrap();
        let mut flight = FlightControl::new(
            controller,
            registry.take_thrusters(),
            registry.take_gyros(),
            TickRate::Update1,
        );
        let goal = StationGoal {
            target: Some(Vec3::new(10_000.0, 0.0, 0.0)),
            leader: RigidTransform::identity(),
            leader_velocity: Vec3::new(3.0, 4.0, 0.0),
            max_relative_speed: 20.0,
        };
        let setpoint = flight.velocity_setpoint(&goal);
        assert!((setpoint.length() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn closed_loop_converges_on_target() {
        let world = SimWorld::new();
        let (body, mut registry) = drone(&world);
        let mut keeper = station_keeper(&mut registry, "", TickRate::Update1).unwrap();
        let target = Vec3::new(30.0, 10.0, -40.0);
        let goal = StationGoal {
            target: Some(target),
            leader: RigidTransform::identity(),
            leader_velocity: Vec3::ZERO,
            max_relative_speed: 20.0,
        };
        let dt = TickRate::Update1.seconds_per_run();
        for _ in 0..60 * 60 {
            keeper.update(&goal).unwrap();
            world.step(dt);
        }
        let pos = body.lock().pose.translation;
        assert!(pos.distance(target) < 1.0, "ended at {pos:?}");
    }

    #[test]
    fn reset_releases_thrusters_and_gyros() {
        let world = SimWorld::new();
        let (body, mut registry) = drone(&world);
        let mut keeper = station_keeper(&mut registry, "", TickRate::Update1).unwrap();
        let goal = StationGoal {
            target: Some(Vec3::new(100.0, 0.0, 0.0)),
            leader: RigidTransform::identity(),
            leader_velocity: Vec3::ZERO,
            max_relative_speed: 20.0,
        };
        keeper.update(&goal).unwrap();
        assert!(body.lock().thrust_local.iter().any(|f| f.length() > 0.0));
        keeper.reset().unwrap();
        let b = body.lock();
        assert!(b.thrust_local.iter().all(|f| f.length() == 0.0));
        assert!(b.gyro_override.is_none());
    }
}
