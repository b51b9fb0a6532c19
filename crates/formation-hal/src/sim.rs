//! In-process simulated vehicles for tests and headless runs.
//!
//! Every simulated device holds a handle to the shared [`SimBody`] it is
//! mounted on.  Actuator drivers write their commands into the body; the
//! world integrates bodies in [`SimBody::step`].  Cameras and sensors see
//! every body registered in the same [`crate::sim_world::SimWorld`].
//!
//! # Physics
//!
//! | Vehicle | Model |
//! |---|---|
//! | Free flight | point mass under summed thrust + gravity; gyros set angular rate directly |
//! | Ground | velocity constrained to the forward axis; yaw rate from steer × speed |
//!
//! Bodies are spheres of `radius` for raycasting.

use std::sync::Arc;

use formation_types::{DetectedEntity, EntityId, FormationError, RigidTransform, Vec3};
use parking_lot::Mutex;

use crate::actuator::{Gyro, Thruster, WheelCalibration, WheelSuspension};
use crate::camera::{Camera, DetectionSensor};
use crate::controller::{ControllerKind, VehicleController};
use crate::wheels::rated_force;

pub type SharedBody = Arc<Mutex<SimBody>>;
pub(crate) type Bodies = Arc<Mutex<Vec<SharedBody>>>;

/// Distance between axles used for the ground turning model.
const WHEELBASE: f64 = 2.5;
/// Fraction of ground speed lost per second while rolling.
const ROLLING_DRAG: f64 = 0.3;
/// Fraction of ground speed lost per second with the parking brake set.
const BRAKE_DRAG: f64 = 5.0;
/// Half-angle of a camera's scan cone, radians.
const CAMERA_HALF_ANGLE: f64 = std::f64::consts::FRAC_PI_4;

/// State of one simulated wheel suspension.
#[derive(Debug, Clone, PartialEq)]
pub struct SimWheelState {
    pub id: String,
    pub subtype: String,
    pub local_position: Vec3,
    /// Block left axis in the body frame.
    pub local_left: Vec3,
    pub has_steering: bool,
    pub has_propulsion: bool,
    pub calibration: WheelCalibration,
    pub steer: f64,
    pub propulsion: f64,
}

impl SimWheelState {
    /// +1 when the block is mounted with its left axis along the body's
    /// forward, -1 when mirrored.
    fn mounting_sign(&self) -> f64 {
        if self.local_left.dot(Vec3::new(0.0, 0.0, -1.0)) >= 0.99 {
            1.0
        } else {
            -1.0
        }
    }

    fn net_propulsion(&self) -> f64 {
        let invert = if self.calibration.invert_propulsion { -1.0 } else { 1.0 };
        self.propulsion * invert * self.mounting_sign()
    }

    fn net_steer(&self) -> f64 {
        if self.calibration.invert_steer { -self.steer } else { self.steer }
    }
}

/// One rigid body in the simulated world.
#[derive(Debug, Clone)]
pub struct SimBody {
    pub id: EntityId,
    pub name: String,
    pub pose: RigidTransform,
    pub velocity: Vec3,
    /// World-frame angular velocity, rad/s.
    pub angular_velocity: Vec3,
    pub mass: f64,
    pub local_center_of_mass: Vec3,
    pub gravity: Vec3,
    pub under_control: bool,
    pub radius: f64,
    /// Force currently produced by each thruster slot, body frame.
    pub thrust_local: Vec<Vec3>,
    /// Local-frame rate commanded by the gyros.
    pub gyro_override: Option<Vec3>,
    pub wheels: Vec<SimWheelState>,
}

impl SimBody {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            pose: RigidTransform::identity(),
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: 1000.0,
            local_center_of_mass: Vec3::ZERO,
            gravity: Vec3::ZERO,
            under_control: false,
            radius: 5.0,
            thrust_local: Vec::new(),
            gyro_override: None,
            wheels: Vec::new(),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.pose.translation
    }

    /// What another vehicle's sensor reports about this body.
    pub fn detection(&self, hit_position: Option<Vec3>) -> DetectedEntity {
        DetectedEntity {
            id: self.id,
            name: self.name.clone(),
            orientation: self.pose,
            velocity: self.velocity,
            hit_position,
        }
    }

    /// Advance the body by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        if self.wheels.is_empty() {
            self.step_flight(dt);
        } else {
            self.step_ground(dt);
        }
        self.pose.translation += self.velocity * dt;
        self.rotate(self.angular_velocity * dt);
    }

    fn step_flight(&mut self, dt: f64) {
        let thrust = self
            .thrust_local
            .iter()
            .fold(Vec3::ZERO, |sum, f| sum + self.pose.transform_normal(*f));
        let acceleration = thrust * (1.0 / self.mass) + self.gravity;
        self.velocity += acceleration * dt;
        if let Some(local) = self.gyro_override {
            self.angular_velocity = self.pose.transform_normal(local);
        }
    }

    fn step_ground(&mut self, dt: f64) {
        let forward = self.pose.forward();
        let mut speed = self.velocity.dot(forward);

        let force: f64 = self
            .wheels
            .iter()
            .filter(|w| w.has_propulsion)
            .map(|w| w.net_propulsion() * rated_force(&w.subtype).unwrap_or(0.0))
            .sum();
        speed += force / self.mass * dt;

        let drag = if self.wheels.iter().any(|w| w.calibration.brake) {
            BRAKE_DRAG
        } else {
            ROLLING_DRAG
        };
        speed *= (1.0 - drag * dt).max(0.0);

        let center_z = self.local_center_of_mass.z;
        let steering: Vec<f64> = self
            .wheels
            .iter()
            .filter(|w| w.has_steering)
            .map(|w| {
                let axle = if w.local_position.z < center_z { 1.0 } else { -1.0 };
                w.net_steer() * axle
            })
            .collect();
        let steer = if steering.is_empty() {
            0.0
        } else {
            (steering.iter().sum::<f64>() / steering.len() as f64).clamp(-1.0, 1.0)
        };

        self.velocity = forward * speed;
        // Positive steer turns right, which is negative yaw about up.
        self.angular_velocity = self.pose.up * (-steer * speed / WHEELBASE);
    }

    fn rotate(&mut self, rotation: Vec3) {
        let angle = rotation.length();
        if angle < 1e-12 {
            return;
        }
        let axis = rotation * (1.0 / angle);
        let turn = |v: Vec3| {
            v * angle.cos() + axis.cross(v) * angle.sin() + axis * (axis.dot(v) * (1.0 - angle.cos()))
        };
        let forward = turn(self.pose.forward());
        let up = turn(self.pose.up);
        self.pose = RigidTransform::create_world(self.pose.translation, forward, up);
    }
}

/// Closest intersection of a ray with the bodies in `bodies`, skipping any
/// body whose sphere contains the ray origin.
pub(crate) fn raycast(
    bodies: &Bodies,
    origin: Vec3,
    direction: Vec3,
    length: f64,
) -> Option<DetectedEntity> {
    let direction = direction.normalize();
    if direction.is_zero() {
        return None;
    }
    let snapshot: Vec<SharedBody> = bodies.lock().clone();
    let mut best: Option<(f64, DetectedEntity)> = None;
    for shared in snapshot {
        let body = shared.lock();
        let to_center = body.position() - origin;
        let r2 = body.radius * body.radius;
        if to_center.length_squared() <= r2 {
            continue;
        }
        let along = to_center.dot(direction);
        let closest_sq = to_center.length_squared() - along * along;
        if along < 0.0 || closest_sq > r2 {
            continue;
        }
        let t = along - (r2 - closest_sq).sqrt();
        if t > length || best.as_ref().is_some_and(|(d, _)| *d <= t) {
            continue;
        }
        best = Some((t, body.detection(Some(origin + direction * t))));
    }
    best.map(|(_, hit)| hit)
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

pub struct SimController {
    name: String,
    kind: ControllerKind,
    vehicle_name: String,
    id: EntityId,
    body: SharedBody,
}

impl SimController {
    pub fn new(name: impl Into<String>, kind: ControllerKind, body: SharedBody) -> Box<Self> {
        let (id, vehicle_name) = {
            let b = body.lock();
            (b.id, b.name.clone())
        };
        Box::new(Self {
            name: name.into(),
            kind,
            vehicle_name,
            id,
            body,
        })
    }
}

impl VehicleController for SimController {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ControllerKind {
        self.kind
    }

    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn vehicle_name(&self) -> &str {
        &self.vehicle_name
    }

    fn world_matrix(&self) -> RigidTransform {
        self.body.lock().pose
    }

    fn linear_velocity(&self) -> Vec3 {
        self.body.lock().velocity
    }

    fn center_of_mass(&self) -> Vec3 {
        let b = self.body.lock();
        b.pose.transform_point(b.local_center_of_mass)
    }

    fn total_mass(&self) -> f64 {
        self.body.lock().mass
    }

    fn natural_gravity(&self) -> Vec3 {
        self.body.lock().gravity
    }

    fn is_under_control(&self) -> bool {
        self.body.lock().under_control
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Actuators
// ────────────────────────────────────────────────────────────────────────────

pub struct SimThruster {
    id: String,
    body: SharedBody,
    slot: usize,
    local_direction: Vec3,
    max_thrust: f64,
}

impl SimThruster {
    /// Mount a thruster pushing the body along `local_direction`.
    pub fn new(
        id: impl Into<String>,
        body: SharedBody,
        local_direction: Vec3,
        max_thrust: f64,
    ) -> Box<Self> {
        let slot = {
            let mut b = body.lock();
            b.thrust_local.push(Vec3::ZERO);
            b.thrust_local.len() - 1
        };
        Box::new(Self {
            id: id.into(),
            body,
            slot,
            local_direction: local_direction.normalize(),
            max_thrust,
        })
    }
}

impl Thruster for SimThruster {
    fn id(&self) -> &str {
        &self.id
    }

    fn thrust_direction(&self) -> Vec3 {
        self.body.lock().pose.transform_normal(self.local_direction)
    }

    fn max_effective_thrust(&self) -> f64 {
        self.max_thrust
    }

    fn set_thrust_override(&mut self, fraction: f64) -> Result<(), FormationError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(FormationError::HardwareFault {
                component: self.id.clone(),
                details: format!("thrust override {fraction} outside [0, 1]"),
            });
        }
        self.body.lock().thrust_local[self.slot] = self.local_direction * (fraction * self.max_thrust);
        Ok(())
    }
}

pub struct SimGyro {
    id: String,
    body: SharedBody,
}

impl SimGyro {
    pub fn new(id: impl Into<String>, body: SharedBody) -> Box<Self> {
        Box::new(Self { id: id.into(), body })
    }
}

impl Gyro for SimGyro {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_rate_override(&mut self, local_rate: Option<Vec3>) -> Result<(), FormationError> {
        if local_rate.is_some_and(|r| !r.is_finite()) {
            return Err(FormationError::HardwareFault {
                component: self.id.clone(),
                details: "non-finite rate override".to_string(),
            });
        }
        let mut body = self.body.lock();
        body.gyro_override = local_rate;
        if local_rate.is_none() {
            body.angular_velocity = Vec3::ZERO;
        }
        Ok(())
    }
}

/// Driver for one entry of [`SimBody::wheels`].
pub struct SimWheel {
    id: String,
    subtype: String,
    body: SharedBody,
    index: usize,
}

impl SimWheel {
    pub fn new(state: SimWheelState, body: SharedBody) -> Box<Self> {
        let id = state.id.clone();
        let subtype = state.subtype.clone();
        let index = {
            let mut b = body.lock();
            b.wheels.push(state);
            b.wheels.len() - 1
        };
        Box::new(Self {
            id,
            subtype,
            body,
            index,
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&RigidTransform, &mut SimWheelState) -> R) -> R {
        let mut body = self.body.lock();
        let pose = body.pose;
        f(&pose, &mut body.wheels[self.index])
    }
}

impl WheelSuspension for SimWheel {
    fn id(&self) -> &str {
        &self.id
    }

    fn subtype(&self) -> &str {
        &self.subtype
    }

    fn position(&self) -> Vec3 {
        self.with_state(|pose, w| pose.transform_point(w.local_position))
    }

    fn left(&self) -> Vec3 {
        self.with_state(|pose, w| pose.transform_normal(w.local_left))
    }

    fn has_steering(&self) -> bool {
        self.with_state(|_, w| w.has_steering)
    }

    fn has_propulsion(&self) -> bool {
        self.with_state(|_, w| w.has_propulsion)
    }

    fn calibrate(&mut self, calibration: WheelCalibration) -> Result<(), FormationError> {
        self.with_state(|_, w| w.calibration = calibration);
        Ok(())
    }

    fn set_steer_override(&mut self, angle: f64) -> Result<(), FormationError> {
        self.with_state(|_, w| w.steer = angle.clamp(-1.0, 1.0));
        Ok(())
    }

    fn set_propulsion_override(&mut self, fraction: f64) -> Result<(), FormationError> {
        if !(-1.0..=1.0).contains(&fraction) {
            return Err(FormationError::HardwareFault {
                component: self.id.clone(),
                details: format!("propulsion override {fraction} outside [-1, 1]"),
            });
        }
        self.with_state(|_, w| w.propulsion = fraction);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cameras and sensors
// ────────────────────────────────────────────────────────────────────────────

/// A raycast camera at the body origin, looking along `local_forward`.
pub struct SimCamera {
    id: String,
    body: SharedBody,
    world: Bodies,
    local_forward: Vec3,
    range: f64,
    armed: bool,
}

impl SimCamera {
    pub(crate) fn new(
        id: impl Into<String>,
        body: SharedBody,
        world: Bodies,
        local_forward: Vec3,
        range: f64,
    ) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            body,
            world,
            local_forward: local_forward.normalize(),
            range,
            armed: false,
        })
    }

    fn origin_and_forward(&self) -> (Vec3, Vec3) {
        let pose = self.body.lock().pose;
        (pose.translation, pose.transform_normal(self.local_forward))
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn world_matrix(&self) -> RigidTransform {
        let pose = self.body.lock().pose;
        let forward = pose.transform_normal(self.local_forward);
        let up = if forward.cross(pose.up).is_zero() {
            pose.backward
        } else {
            pose.up
        };
        RigidTransform::create_world(pose.translation, forward, up)
    }

    fn enable_raycast(&mut self) {
        self.armed = true;
    }

    fn is_raycast_enabled(&self) -> bool {
        self.armed
    }

    fn can_scan_point(&self, target: Vec3) -> bool {
        if !self.armed {
            return false;
        }
        let (origin, forward) = self.origin_and_forward();
        let to_target = target - origin;
        let distance = to_target.length();
        if distance > self.range {
            return false;
        }
        distance == 0.0 || to_target.normalize().dot(forward) >= CAMERA_HALF_ANGLE.cos()
    }

    fn can_scan_distance(&self, distance: f64) -> bool {
        self.armed && distance <= self.range
    }

    fn raycast_point(&mut self, target: Vec3) -> Option<DetectedEntity> {
        if !self.can_scan_point(target) {
            return None;
        }
        let (origin, _) = self.origin_and_forward();
        raycast(&self.world, origin, target - origin, origin.distance(target))
    }

    fn raycast_distance(&mut self, distance: f64) -> Option<DetectedEntity> {
        if !self.can_scan_distance(distance) {
            return None;
        }
        let (origin, forward) = self.origin_and_forward();
        raycast(&self.world, origin, forward, distance)
    }
}

/// Reports every other body within `range` of the mounting body.
pub struct SimSensor {
    id: String,
    body: SharedBody,
    world: Bodies,
    range: f64,
}

impl SimSensor {
    pub(crate) fn new(id: impl Into<String>, body: SharedBody, world: Bodies, range: f64) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            body,
            world,
            range,
        })
    }
}

impl DetectionSensor for SimSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn detected_entities(&self) -> Vec<DetectedEntity> {
        let (own_id, origin) = {
            let b = self.body.lock();
            (b.id, b.position())
        };
        let snapshot: Vec<SharedBody> = self.world.lock().clone();
        snapshot
            .iter()
            .filter_map(|shared| {
                let body = shared.lock();
                (body.id != own_id && body.position().distance(origin) <= self.range)
                    .then(|| body.detection(None))
            })
            .collect()
    }
}
