//! `formation-types` – data model shared by leader and followers.
//!
//! # Modules
//!
//! - [`geometry`] – [`Vec3`] and [`RigidTransform`], the only spatial types
//!   that cross crate boundaries.

pub mod geometry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use geometry::{RigidTransform, Vec3};

/// Opaque identifier of a world entity (a whole vehicle, not a device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entity reported by a detection sensor or a camera raycast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub id: EntityId,
    /// Display name of the entity (ship name).
    pub name: String,
    /// Pose of the entity; `translation` is its reference position.
    pub orientation: RigidTransform,
    pub velocity: Vec3,
    /// Point where a raycast struck the entity.  `None` for sensor
    /// detections.
    pub hit_position: Option<Vec3>,
}

impl DetectedEntity {
    pub fn position(&self) -> Vec3 {
        self.orientation.translation
    }
}

/// The last leader pose a follower accepted from the pose channel.
///
/// A follower holds `Option<LeaderPose>`; `None` means no leader is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeaderPose {
    pub transform: RigidTransform,
    pub velocity: Vec3,
    /// `None` when the pose arrived in the legacy two-field shape.
    pub source_id: Option<EntityId>,
    /// Follower run counter at the moment the pose was accepted.
    pub received_at_tick: u64,
}

/// How often the external scheduler runs a script.
///
/// One game tick is 1/60 s; a script configured at [`TickRate::Update10`]
/// runs every tenth game tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickRate {
    #[default]
    Update1,
    Update10,
    Update100,
}

impl TickRate {
    pub const GAME_TICKS_PER_SECOND: f64 = 60.0;

    /// Game ticks between two runs.
    pub fn ticks_per_run(self) -> u32 {
        match self {
            TickRate::Update1 => 1,
            TickRate::Update10 => 10,
            TickRate::Update100 => 100,
        }
    }

    /// Wall-clock seconds between two runs.
    pub fn seconds_per_run(self) -> f64 {
        f64::from(self.ticks_per_run()) / Self::GAME_TICKS_PER_SECOND
    }

    /// Runs between two status echoes (roughly every 100 game ticks).
    pub fn echo_interval(self) -> u64 {
        match self {
            TickRate::Update1 => 100,
            TickRate::Update10 => 10,
            TickRate::Update100 => 1,
        }
    }
}

impl fmt::Display for TickRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickRate::Update1 => write!(f, "update1"),
            TickRate::Update10 => write!(f, "update10"),
            TickRate::Update100 => write!(f, "update100"),
        }
    }
}

impl FromStr for TickRate {
    type Err = FormationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "update1" | "1" => Ok(TickRate::Update1),
            "update10" | "10" => Ok(TickRate::Update10),
            "update100" | "100" => Ok(TickRate::Update100),
            other => Err(FormationError::Parse(format!("unknown tick rate '{other}'"))),
        }
    }
}

/// Error type shared by every formation crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormationError {
    /// Startup cannot proceed: missing controller, unknown device model, …
    #[error("Configuration Error on {component}: {details}")]
    Configuration { component: String, details: String },

    /// A persisted record or configuration line could not be decoded.
    #[error("Parse Error: {0}")]
    Parse(String),

    /// A broadcast payload did not match the expected schema.
    #[error("Protocol Mismatch: {0}")]
    ProtocolMismatch(String),

    /// Unknown command, wrong arity or rejected argument.
    #[error("Command Error: {0}")]
    Command(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },
}

impl FormationError {
    pub fn configuration(component: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            details: details.into(),
        }
    }
}
