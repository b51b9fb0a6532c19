//! [`SimWorld`] and the [`SimVehicle`] builder.
//!
//! # Example
//!
//! ```rust
//! use formation_hal::sim_world::{SimVehicle, SimWorld};
//! use formation_types::EntityId;
//!
//! let world = SimWorld::new();
//! let mut drone = SimVehicle::builder(EntityId(7), "Drone7")
//!     .with_thruster_block(20_000.0)
//!     .with_gyro()
//!     .build(&world);
//!
//! let controller = drone.registry.take_controller("").unwrap();
//! assert_eq!(controller.vehicle_name(), "Drone7");
//! ```

use std::sync::Arc;

use formation_types::{EntityId, RigidTransform, Vec3};
use parking_lot::Mutex;

use crate::actuator::WheelCalibration;
use crate::controller::ControllerKind;
use crate::registry::DeviceRegistry;
use crate::sim::{
    Bodies, SharedBody, SimBody, SimCamera, SimController, SimGyro, SimSensor, SimThruster,
    SimWheel, SimWheelState,
};

/// A set of bodies stepped together.  Clones share the same bodies.
#[derive(Clone, Default)]
pub struct SimWorld {
    bodies: Bodies,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bare body (an obstacle or a vehicle with no devices).
    pub fn add_body(&self, body: SimBody) -> SharedBody {
        let shared = Arc::new(Mutex::new(body));
        self.bodies.lock().push(shared.clone());
        shared
    }

    pub fn find(&self, id: EntityId) -> Option<SharedBody> {
        self.bodies.lock().iter().find(|b| b.lock().id == id).cloned()
    }

    /// Advance every body by `dt` seconds.
    pub fn step(&self, dt: f64) {
        let snapshot: Vec<SharedBody> = self.bodies.lock().clone();
        for body in snapshot {
            body.lock().step(dt);
        }
    }

    pub(crate) fn handle(&self) -> Bodies {
        self.bodies.clone()
    }
}

/// A simulated vehicle: its body plus a registry holding its device drivers.
pub struct SimVehicle {
    pub body: SharedBody,
    pub registry: DeviceRegistry,
}

impl SimVehicle {
    pub fn builder(id: EntityId, name: impl Into<String>) -> SimVehicleBuilder {
        SimVehicleBuilder {
            body: SimBody::new(id, name),
            controller: ("Cockpit".to_string(), ControllerKind::Cockpit),
            thruster_block: None,
            gyro: false,
            wheels: None,
            cameras: Vec::new(),
            sensor_range: None,
        }
    }
}

pub struct SimVehicleBuilder {
    body: SimBody,
    controller: (String, ControllerKind),
    thruster_block: Option<f64>,
    gyro: bool,
    wheels: Option<String>,
    cameras: Vec<(Vec3, f64)>,
    sensor_range: Option<f64>,
}

impl SimVehicleBuilder {
    pub fn at(mut self, pose: RigidTransform) -> Self {
        self.body.pose = pose;
        self
    }

    pub fn mass(mut self, mass: f64) -> Self {
        self.body.mass = mass;
        self
    }

    pub fn radius(mut self, radius: f64) -> Self {
        self.body.radius = radius;
        self
    }

    pub fn velocity(mut self, velocity: Vec3) -> Self {
        self.body.velocity = velocity;
        self
    }

    pub fn gravity(mut self, gravity: Vec3) -> Self {
        self.body.gravity = gravity;
        self
    }

    /// Replace the default cockpit with a remote control named `name`.
    pub fn remote_control(mut self, name: impl Into<String>) -> Self {
        self.controller = (name.into(), ControllerKind::RemoteControl);
        self
    }

    /// One thruster per local axis direction, each rated `max_thrust`.
    pub fn with_thruster_block(mut self, max_thrust: f64) -> Self {
        self.thruster_block = Some(max_thrust);
        self
    }

    pub fn with_gyro(mut self) -> Self {
        self.gyro = true;
        self
    }

    /// Four steering, driven wheels of model `subtype` at the corners of a
    /// 3 × 4 footprint.
    pub fn with_wheels(mut self, subtype: impl Into<String>) -> Self {
        self.wheels = Some(subtype.into());
        self
    }

    pub fn with_forward_camera(mut self, range: f64) -> Self {
        self.cameras.push((Vec3::new(0.0, 0.0, -1.0), range));
        self
    }

    /// A camera looking along `local_direction` instead of forward.
    pub fn with_camera(mut self, local_direction: Vec3, range: f64) -> Self {
        self.cameras.push((local_direction, range));
        self
    }

    pub fn with_sensor(mut self, range: f64) -> Self {
        self.sensor_range = Some(range);
        self
    }

    pub fn build(self, world: &SimWorld) -> SimVehicle {
        let body = world.add_body(self.body);
        let mut registry = DeviceRegistry::new();
        let (name, kind) = self.controller;
        registry.register_controller(SimController::new(name, kind, body.clone()));

        if let Some(max) = self.thruster_block {
            let axes = [
                ("right", Vec3::new(1.0, 0.0, 0.0)),
                ("left", Vec3::new(-1.0, 0.0, 0.0)),
                ("up", Vec3::new(0.0, 1.0, 0.0)),
                ("down", Vec3::new(0.0, -1.0, 0.0)),
                ("back", Vec3::new(0.0, 0.0, 1.0)),
                ("forward", Vec3::new(0.0, 0.0, -1.0)),
            ];
            for (label, direction) in axes {
                registry.register_thruster(SimThruster::new(
                    format!("thruster_{label}"),
                    body.clone(),
                    direction,
                    max,
                ));
            }
        }

        if self.gyro {
            registry.register_gyro(SimGyro::new("gyro", body.clone()));
        }

        if let Some(subtype) = self.wheels {
            // Port-side blocks are mounted with their left axis along the
            // body's forward; starboard blocks are mirrored.
            let corners = [
                ("front_left", Vec3::new(-1.5, -1.0, -2.0)),
                ("front_right", Vec3::new(1.5, -1.0, -2.0)),
                ("rear_left", Vec3::new(-1.5, -1.0, 2.0)),
                ("rear_right", Vec3::new(1.5, -1.0, 2.0)),
            ];
            for (label, local_position) in corners {
                let local_left = if local_position.x < 0.0 {
                    Vec3::new(0.0, 0.0, -1.0)
                } else {
                    Vec3::new(0.0, 0.0, 1.0)
                };
                let state = SimWheelState {
                    id: format!("wheel_{label}"),
                    subtype: subtype.clone(),
                    local_position,
                    local_left,
                    has_steering: true,
                    has_propulsion: true,
                    calibration: WheelCalibration::default(),
                    steer: 0.0,
                    propulsion: 0.0,
                };
                registry.register_wheel(SimWheel::new(state, body.clone()));
            }
        }

        for (index, (direction, range)) in self.cameras.into_iter().enumerate() {
            registry.register_camera(SimCamera::new(
                format!("camera_{index}"),
                body.clone(),
                world.handle(),
                direction,
                range,
            ));
        }

        if let Some(range) = self.sensor_range {
            registry.register_sensor(SimSensor::new("sensor", body.clone(), world.handle(), range));
        }

        SimVehicle { body, registry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_registers_requested_devices() {
        let world = SimWorld::new();
        let mut v = SimVehicle::builder(EntityId(1), "Ship")
            .with_thruster_block(100.0)
            .with_gyro()
            .with_forward_camera(500.0)
            .with_sensor(1000.0)
            .build(&world);
        assert_eq!(v.registry.take_thrusters().len(), 6);
        assert_eq!(v.registry.take_gyros().len(), 1);
        assert_eq!(v.registry.take_cameras().len(), 1);
        assert_eq!(v.registry.take_sensors().len(), 1);
        assert!(v.registry.take_wheels().is_empty());
        assert_eq!(v.body.lock().thrust_local.len(), 6);
    }

    #[test]
    fn sensor_sees_other_bodies_in_range() {
        let world = SimWorld::new();
        let mut me = SimVehicle::builder(EntityId(1), "Me").with_sensor(100.0).build(&world);
        SimVehicle::builder(EntityId(2), "Near")
            .at(RigidTransform::identity().with_translation(Vec3::new(50.0, 0.0, 0.0)))
            .build(&world);
        SimVehicle::builder(EntityId(3), "Far")
            .at(RigidTransform::identity().with_translation(Vec3::new(500.0, 0.0, 0.0)))
            .build(&world);

        let sensor = me.registry.take_sensors().remove(0);
        let seen: Vec<EntityId> = sensor.detected_entities().iter().map(|e| e.id).collect();
        assert_eq!(seen, vec![EntityId(2)]);
    }

    #[test]
    fn forward_camera_raycasts_other_vehicle() {
        let world = SimWorld::new();
        let mut me = SimVehicle::builder(EntityId(1), "Me")
            .with_forward_camera(200.0)
            .build(&world);
        SimVehicle::builder(EntityId(2), "Target")
            .at(RigidTransform::identity().with_translation(Vec3::new(0.0, 0.0, -100.0)))
            .build(&world);

        let mut camera = me.registry.take_cameras().remove(0);
        camera.enable_raycast();
        let hit = camera.raycast_distance(200.0).unwrap();
        assert_eq!(hit.name, "Target");
        assert!(camera.raycast_point(Vec3::new(100.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn remote_control_and_side_camera() {
        let world = SimWorld::new();
        let mut v = SimVehicle::builder(EntityId(1), "Rover")
            .remote_control("Remote")
            .with_camera(Vec3::new(1.0, 0.0, 0.0), 100.0)
            .build(&world);
        SimVehicle::builder(EntityId(2), "Beside")
            .at(RigidTransform::identity().with_translation(Vec3::new(50.0, 0.0, 0.0)))
            .build(&world);

        let controller = v.registry.take_controller("Remote").unwrap();
        assert_eq!(controller.kind(), ControllerKind::RemoteControl);
        let mut camera = v.registry.take_cameras().remove(0);
        camera.enable_raycast();
        assert_eq!(camera.raycast_distance(100.0).unwrap().id, EntityId(2));
    }

    #[test]
    fn world_step_moves_every_body() {
        let world = SimWorld::new();
        let a = world.add_body(SimBody::new(EntityId(1), "A"));
        a.lock().velocity = Vec3::new(1.0, 0.0, 0.0);
        world.step(2.0);
        assert!((a.lock().position().x - 2.0).abs() < 1e-12);
        assert!(world.find(EntityId(1)).is_some());
        assert!(world.find(EntityId(9)).is_none());
    }
}
