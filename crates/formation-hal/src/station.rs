//! Station keeping: drive the vehicle to a world position and hold it there.
//!
//! Two actuation variants exist, selected once from the devices a vehicle
//! actually has:
//!
//! | Variant | Devices | Module |
//! |---|---|---|
//! | Free flight | thrusters + gyros | [`crate::flight`] |
//! | Ground | wheel suspensions | [`crate::wheels`] |
//!
//! Callers hold a `Box<dyn StationKeeper>` and never re-detect the variant.

use formation_types::{FormationError, RigidTransform, TickRate, Vec3};
use tracing::info;

use crate::controller::VehicleController;
use crate::flight::FlightControl;
use crate::registry::DeviceRegistry;
use crate::wheels::WheelControl;

/// What the station keeper is asked to do this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationGoal {
    /// World position to hold.  `None` selects loose follow: match the
    /// leader's velocity without tracking a position.
    pub target: Option<Vec3>,
    /// Leader pose; the free-flight variant aligns with its forward/up axes.
    pub leader: RigidTransform,
    pub leader_velocity: Vec3,
    /// Speed the follower may exceed the leader's speed by while correcting.
    pub max_relative_speed: f64,
}

/// Output of one station-keeping evaluation, before it is written to
/// devices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCommand {
    Flight {
        /// World-space acceleration to produce, gravity compensation
        /// included.
        acceleration: Vec3,
        /// Angular rate in the vehicle's local frame (pitch, yaw, roll).
        angular_rate: Vec3,
    },
    Ground {
        steer: f64,
        /// Total propulsion force to spread across the wheels.
        propulsion_force: f64,
    },
}

/// Closed-loop position controller over one vehicle's actuators.
pub trait StationKeeper: Send {
    /// The controller whose frame and kinematics drive the loop.
    fn controller(&self) -> &dyn VehicleController;

    /// Evaluate the control loop for `goal`.  Advances PID state.
    fn compute(&mut self, goal: &StationGoal) -> ActuatorCommand;

    /// Write a command to the actuators.
    fn apply(&mut self, command: &ActuatorCommand) -> Result<(), FormationError>;

    /// Release every actuator override and zero all PID state.
    fn reset(&mut self) -> Result<(), FormationError>;

    /// Compute and apply in one step.
    fn update(&mut self, goal: &StationGoal) -> Result<ActuatorCommand, FormationError> {
        let command = self.compute(goal);
        self.apply(&command)?;
        Ok(command)
    }
}

/// Pick the station-keeping variant for the devices in `registry`.
///
/// Takes the controller (preferring `controller_name`) and the actuators out
/// of the registry; cameras and sensors stay behind for other consumers.
/// Wheels select the ground variant, otherwise thrusters select free flight.
///
/// # Errors
///
/// [`FormationError::Configuration`] when no controller is registered, when
/// the vehicle has neither wheels nor thrusters, or when a wheel model has no
/// known rated force.
pub fn station_keeper(
    registry: &mut DeviceRegistry,
    controller_name: &str,
    rate: TickRate,
) -> Result<Box<dyn StationKeeper>, FormationError> {
    let controller = registry.take_controller(controller_name)?;
    let wheels = registry.take_wheels();
    if !wheels.is_empty() {
        info!(
            controller = controller.name(),
            wheels = wheels.len(),
            "ground station keeping selected"
        );
        return Ok(Box::new(WheelControl::new(controller, wheels, rate)?));
    }

    let thrusters = registry.take_thrusters();
    if thrusters.is_empty() {
        return Err(FormationError::configuration(
            controller.name(),
            "vehicle has neither wheels nor thrusters",
        ));
    }
    let gyros = registry.take_gyros();
    info!(
        controller = controller.name(),
        thrusters = thrusters.len(),
        gyros = gyros.len(),
        "free-flight station keeping selected"
    );
    Ok(Box::new(FlightControl::new(controller, thrusters, gyros, rate)))
}
