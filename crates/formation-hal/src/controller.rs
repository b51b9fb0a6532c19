//! The vehicle controller: the cockpit or remote-control unit that supplies
//! the vehicle's reference frame, kinematics and operator presence.

use formation_types::{EntityId, RigidTransform, Vec3};

/// What kind of seat the controller is.  Used to pick a controller when the
/// configured name does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Cockpit,
    RemoteControl,
}

/// Read-only view of the vehicle as seen from its controller.
pub trait VehicleController: Send {
    /// Display name of the controller device.
    fn name(&self) -> &str;

    fn kind(&self) -> ControllerKind;

    /// Identifier of the whole vehicle.  Used for self-loop suppression.
    fn entity_id(&self) -> EntityId;

    /// Name of the whole vehicle, as other vehicles' sensors report it.
    fn vehicle_name(&self) -> &str;

    fn world_matrix(&self) -> RigidTransform;

    fn position(&self) -> Vec3 {
        self.world_matrix().translation
    }

    fn linear_velocity(&self) -> Vec3;

    fn center_of_mass(&self) -> Vec3;

    fn total_mass(&self) -> f64;

    /// Natural gravity acceleration at the controller; zero in space.
    fn natural_gravity(&self) -> Vec3;

    /// `true` while an operator sits in the controller.
    fn is_under_control(&self) -> bool;
}
