//! Raycast collision avoidance between a follower and its target.
//!
//! Every tick the follower casts a ray from each of its forward cameras at
//! the point it is steering toward.  An obstacle in between makes it hold its
//! current offset from the leader until the line of sight clears.  Only the
//! straight line to the target is checked; the path actually flown is not.

use formation_hal::camera::Camera;
use formation_types::{EntityId, Vec3};
use tracing::{debug, warn};

/// Hits closer than this to the camera are ignored.
pub const MIN_HIT_DISTANCE: f64 = 0.1;
/// A camera counts as forward-facing when its forward axis is within this
/// dot product of the controller's.
pub const FORWARD_ALIGNMENT: f64 = 0.99;

/// Keep only the cameras looking the same way as `forward`.
pub fn forward_cameras(cameras: Vec<Box<dyn Camera>>, forward: Vec3) -> Vec<Box<dyn Camera>> {
    let forward = forward.normalize();
    cameras
        .into_iter()
        .filter(|c| c.world_matrix().forward().dot(forward) >= FORWARD_ALIGNMENT)
        .collect()
}

/// Obstacle state plus the cameras that feed it.
pub struct CollisionAvoidance {
    cameras: Vec<Box<dyn Camera>>,
    self_id: EntityId,
    obstacle_offset: Option<Vec3>,
}

impl CollisionAvoidance {
    /// Arms every camera for raycasting.  `self_id` is the follower's own
    /// entity, whose hits are ignored.
    pub fn new(mut cameras: Vec<Box<dyn Camera>>, self_id: EntityId) -> Self {
        if cameras.is_empty() {
            warn!("collision avoidance enabled without forward cameras");
        }
        for camera in &mut cameras {
            camera.enable_raycast();
        }
        Self {
            cameras,
            self_id,
            obstacle_offset: None,
        }
    }

    /// Leader-frame offset being held because of an obstacle.
    pub fn obstacle_offset(&self) -> Option<Vec3> {
        self.obstacle_offset
    }

    pub fn clear(&mut self) {
        self.obstacle_offset = None;
    }

    /// Distance from its camera to the nearest hit on the way to `target`.
    ///
    /// `None` when no camera can scan `target`; `Some(f64::INFINITY)` when
    /// the cameras that could scan it saw nothing.
    pub fn nearest_hit(&mut self, target: Vec3) -> Option<f64> {
        let mut scanned = false;
        let mut nearest = f64::INFINITY;
        for camera in &mut self.cameras {
            if !camera.is_raycast_enabled() {
                camera.enable_raycast();
            }
            if !camera.can_scan_point(target) {
                continue;
            }
            scanned = true;
            let Some(hit) = camera.raycast_point(target) else {
                continue;
            };
            if hit.id == self.self_id {
                continue;
            }
            let Some(at) = hit.hit_position else {
                continue;
            };
            let distance = camera.position().distance(at);
            if distance > MIN_HIT_DISTANCE && distance < nearest {
                nearest = distance;
            }
        }
        scanned.then_some(nearest)
    }

    /// Update the obstacle state for `target` and return it.
    ///
    /// `current_offset` is where the follower sits right now, in the leader's
    /// frame; it becomes the held offset when an obstacle is found.  When no
    /// camera can scan `target` the previous state is kept.
    pub fn check(&mut self, target: Vec3, current_offset: Vec3) -> Option<Vec3> {
        match self.nearest_hit(target) {
            None => {}
            Some(d) if d.is_infinite() => {
                if self.obstacle_offset.take().is_some() {
                    debug!("path to target clear");
                }
            }
            Some(d) => {
                if self.obstacle_offset.is_none() {
                    debug!(distance = d, "obstacle between follower and target");
                }
                self.obstacle_offset = Some(current_offset);
            }
        }
        self.obstacle_offset
    }
}
