//! [`DeviceRegistry`] – the devices found on one vehicle.
//!
//! Device discovery happens outside this crate: whoever enumerates the
//! vehicle's blocks registers each driver here, then the formation roles take
//! what they need.  Taking moves the drivers out, so every device has exactly
//! one owner once the roles are built.
//!
//! Registration order is preserved; wheel propulsion is distributed in that
//! order.

use formation_types::FormationError;
use tracing::debug;

use crate::actuator::{Gyro, Thruster, WheelSuspension};
use crate::camera::{Camera, DetectionSensor};
use crate::controller::{ControllerKind, VehicleController};

/// Drivers for every device on one vehicle, grouped by kind.
#[derive(Default)]
pub struct DeviceRegistry {
    controllers: Vec<Box<dyn VehicleController>>,
    thrusters: Vec<Box<dyn Thruster>>,
    gyros: Vec<Box<dyn Gyro>>,
    wheels: Vec<Box<dyn WheelSuspension>>,
    cameras: Vec<Box<dyn Camera>>,
    sensors: Vec<Box<dyn DetectionSensor>>,
}

/// Insert `device`, replacing any earlier entry with the same id in place.
fn upsert<T: ?Sized>(devices: &mut Vec<Box<T>>, device: Box<T>, id: impl Fn(&T) -> &str) {
    let key = id(device.as_ref()).to_string();
    match devices.iter().position(|d| id(d.as_ref()) == key) {
        Some(index) => devices[index] = device,
        None => devices.push(device),
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller.  A controller with the same name is replaced.
    pub fn register_controller(&mut self, controller: Box<dyn VehicleController>) {
        upsert(&mut self.controllers, controller, |c| c.name());
    }

    pub fn register_thruster(&mut self, thruster: Box<dyn Thruster>) {
        upsert(&mut self.thrusters, thruster, |t| t.id());
    }

    pub fn register_gyro(&mut self, gyro: Box<dyn Gyro>) {
        upsert(&mut self.gyros, gyro, |g| g.id());
    }

    pub fn register_wheel(&mut self, wheel: Box<dyn WheelSuspension>) {
        upsert(&mut self.wheels, wheel, |w| w.id());
    }

    pub fn register_camera(&mut self, camera: Box<dyn Camera>) {
        upsert(&mut self.cameras, camera, |c| c.id());
    }

    pub fn register_sensor(&mut self, sensor: Box<dyn DetectionSensor>) {
        upsert(&mut self.sensors, sensor, |s| s.id());
    }

    /// Take the controller named `preferred`, falling back to the first
    /// cockpit and then the first remote control.
    ///
    /// # Errors
    ///
    /// [`FormationError::Configuration`] when no controller is registered.
    pub fn take_controller(
        &mut self,
        preferred: &str,
    ) -> Result<Box<dyn VehicleController>, FormationError> {
        let index = self
            .controllers
            .iter()
            .position(|c| !preferred.is_empty() && c.name() == preferred)
            .or_else(|| self.position_of(ControllerKind::Cockpit))
            .or_else(|| self.position_of(ControllerKind::RemoteControl))
            .ok_or_else(|| {
                FormationError::configuration("controller", "no ship controller found")
            })?;
        let controller = self.controllers.remove(index);
        if !preferred.is_empty() && controller.name() != preferred {
            debug!(
                preferred,
                chosen = controller.name(),
                "named controller not found, using fallback"
            );
        }
        Ok(controller)
    }

    fn position_of(&self, kind: ControllerKind) -> Option<usize> {
        self.controllers.iter().position(|c| c.kind() == kind)
    }

    pub fn take_thrusters(&mut self) -> Vec<Box<dyn Thruster>> {
        std::mem::take(&mut self.thrusters)
    }

    pub fn take_gyros(&mut self) -> Vec<Box<dyn Gyro>> {
        std::mem::take(&mut self.gyros)
    }

    pub fn take_wheels(&mut self) -> Vec<Box<dyn WheelSuspension>> {
        std::mem::take(&mut self.wheels)
    }

    pub fn take_cameras(&mut self) -> Vec<Box<dyn Camera>> {
        std::mem::take(&mut self.cameras)
    }

    pub fn take_sensors(&mut self) -> Vec<Box<dyn DetectionSensor>> {
        std::mem::take(&mut self.sensors)
    }
}
