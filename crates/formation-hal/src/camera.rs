//! Raycast cameras and entity-detection sensors.

use formation_types::{DetectedEntity, RigidTransform, Vec3};

/// A camera able to cast rays at points or straight ahead.
///
/// A raycast returns the first entity hit, or `None` when the ray hit
/// nothing.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"cam_nose"`.
    fn id(&self) -> &str;

    fn world_matrix(&self) -> RigidTransform;

    fn position(&self) -> Vec3 {
        self.world_matrix().translation
    }

    /// Power the camera and arm its raycast mode.
    fn enable_raycast(&mut self);

    fn is_raycast_enabled(&self) -> bool;

    /// Whether `target` lies inside the camera's cone and charged range.
    fn can_scan_point(&self, target: Vec3) -> bool;

    /// Whether the camera has charged enough range to cast `distance`
    /// straight ahead.
    fn can_scan_distance(&self, distance: f64) -> bool;

    fn raycast_point(&mut self, target: Vec3) -> Option<DetectedEntity>;

    fn raycast_distance(&mut self, distance: f64) -> Option<DetectedEntity>;
}

/// A volume sensor reporting every entity currently inside it.
pub trait DetectionSensor: Send {
    fn id(&self) -> &str;

    fn detected_entities(&self) -> Vec<DetectedEntity>;
}
