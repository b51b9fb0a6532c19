//! Per-role settings.  Every field has a default, so a partial TOML table
//! (or none at all) is a valid configuration.

use formation_types::{TickRate, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowerSettings {
    /// Formation the follower listens to.  Shared with the leader.
    pub system_id: String,
    /// Identifier addressed commands are filtered against.
    pub follower_id: String,
    /// Offset of the `default` configuration on first start.
    pub default_offset: Vec3,
    pub enable_collision_avoidance: bool,
    /// Preferred vehicle controller name.  Empty picks the first cockpit.
    pub controller_name: String,
    /// Release the controls while an operator is seated.
    pub auto_stop: bool,
    /// When the operator leaves, hold the position they left the vehicle in.
    pub auto_start_here: bool,
    /// Speed allowed on top of the leader's while closing on the target.
    pub max_speed: f64,
    pub tick_rate: TickRate,
    /// Dead-reckon the leader between pose broadcasts.
    pub calculate_missing_ticks: bool,
    /// Cap on dead reckoning, in runs.  Older poses are a weak signal.
    pub max_missing_ticks: u64,
    /// Accept poses without a source id (no self-loop check possible).
    pub accept_legacy_poses: bool,
}

impl Default for FollowerSettings {
    fn default() -> Self {
        Self {
            system_id: "System1".to_string(),
            follower_id: "Drone1".to_string(),
            default_offset: Vec3::new(50.0, 0.0, 0.0),
            enable_collision_avoidance: false,
            controller_name: String::new(),
            auto_stop: true,
            auto_start_here: false,
            max_speed: 20.0,
            tick_rate: TickRate::Update1,
            calculate_missing_ticks: true,
            max_missing_ticks: 100,
            accept_legacy_poses: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderSettings {
    pub system_id: String,
    pub tick_rate: TickRate,
    /// Range of the forward raycast used by `scan`.
    pub scan_distance: f64,
    pub controller_name: String,
    /// Re-validate a persisted target against the sensors on start.
    pub attempt_reconnection: bool,
    /// Broadcast the leader's own pose when it has no other target.
    pub allow_follow_self: bool,
    /// Re-acquire a target lost by the sensors with a predicted raycast.
    pub active_raycasting: bool,
    pub align_followers_to_gravity: bool,
    pub broadcast_self_while_searching: bool,
}

impl Default for LeaderSettings {
    fn default() -> Self {
        Self {
            system_id: "System1".to_string(),
            tick_rate: TickRate::Update1,
            scan_distance: 1000.0,
            controller_name: String::new(),
            attempt_reconnection: true,
            allow_follow_self: true,
            active_raycasting: false,
            align_followers_to_gravity: false,
            broadcast_self_while_searching: false,
        }
    }
}
