//! Wire shapes carried by the broadcast medium.
//!
//! Two channels exist per formation system, named after the system id:
//!
//! | Channel | Tag | Payload |
//! |---|---|---|
//! | Pose | `FSLeader<system>` | [`PoseMessage`] |
//! | Command | `FSCommand<system>` | [`CommandMessage`] |
//!
//! Payloads travel as JSON arrays, mirroring the tuple shapes leaders have
//! always sent.  A pose is either `[matrix, velocity, source_id]` or the
//! legacy `[matrix, velocity]` without a source id.

use std::fmt;

use formation_types::{EntityId, RigidTransform, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Pose,
    Command,
}

/// A channel of one formation system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub channel: Channel,
    pub system_id: String,
}

impl ChannelKey {
    pub fn pose(system_id: impl Into<String>) -> Self {
        Self {
            channel: Channel::Pose,
            system_id: system_id.into(),
        }
    }

    pub fn command(system_id: impl Into<String>) -> Self {
        Self {
            channel: Channel::Command,
            system_id: system_id.into(),
        }
    }

    /// Tag string the frame is broadcast under.
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.channel {
            Channel::Pose => "FSLeader",
            Channel::Command => "FSCommand",
        };
        write!(f, "{prefix}{}", self.system_id)
    }
}

/// One leader pose broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PoseMessage {
    Extended([f64; 12], [f64; 3], i64),
    Legacy([f64; 12], [f64; 3]),
}

impl PoseMessage {
    pub fn new(transform: &RigidTransform, velocity: Vec3, source: EntityId) -> Self {
        Self::Extended(
            transform.to_wire(),
            [velocity.x, velocity.y, velocity.z],
            source.0,
        )
    }

    pub fn legacy(transform: &RigidTransform, velocity: Vec3) -> Self {
        Self::Legacy(transform.to_wire(), [velocity.x, velocity.y, velocity.z])
    }

    pub fn transform(&self) -> RigidTransform {
        match self {
            Self::Extended(m, _, _) | Self::Legacy(m, _) => RigidTransform::from_wire(m),
        }
    }

    pub fn velocity(&self) -> Vec3 {
        match self {
            Self::Extended(_, [x, y, z], _) | Self::Legacy(_, [x, y, z]) => Vec3::new(*x, *y, *z),
        }
    }

    /// `None` for the legacy shape.
    pub fn source_id(&self) -> Option<EntityId> {
        match self {
            Self::Extended(_, _, id) => Some(EntityId(*id)),
            Self::Legacy(..) => None,
        }
    }
}

/// An addressed text command: `(targets, command)`.
///
/// `targets` is a `;`-separated list of follower ids; empty addresses every
/// follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage(pub String, pub String);

impl CommandMessage {
    pub fn new(targets: impl Into<String>, command: impl Into<String>) -> Self {
        Self(targets.into(), command.into())
    }

    pub fn broadcast(command: impl Into<String>) -> Self {
        Self(String::new(), command.into())
    }

    pub fn targets(&self) -> &str {
        &self.0
    }

    pub fn command(&self) -> &str {
        &self.1
    }

    /// Whether the follower `id` should act on this command.
    pub fn addresses(&self, id: &str) -> bool {
        self.0.is_empty() || self.0.split(';').any(|t| t == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_tags_carry_system_id() {
        assert_eq!(ChannelKey::pose("System1").tag(), "FSLeaderSystem1");
        assert_eq!(ChannelKey::command("Alpha").tag(), "FSCommandAlpha");
    }

    #[test]
    fn extended_pose_keeps_source() {
        let t = RigidTransform::identity().with_translation(Vec3::new(1.0, 2.0, 3.0));
        let json = serde_json::to_value(PoseMessage::new(&t, Vec3::new(0.0, 0.0, -4.0), EntityId(77)))
            .unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(3));
        let back: PoseMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.source_id(), Some(EntityId(77)));
        assert_eq!(back.transform(), t);
        assert_eq!(back.velocity(), Vec3::new(0.0, 0.0, -4.0));
    }

    #[test]
    fn legacy_pose_decodes_without_source() {
        let mut raw: Vec<serde_json::Value> = Vec::new();
        raw.push(serde_json::to_value(RigidTransform::identity().to_wire()).unwrap());
        raw.push(serde_json::json!([1.0, 0.0, 0.0]));
        let msg: PoseMessage = serde_json::from_value(serde_json::Value::Array(raw)).unwrap();
        assert!(matches!(msg, PoseMessage::Legacy(..)));
        assert_eq!(msg.source_id(), None);
    }

    #[test]
    fn malformed_pose_is_rejected() {
        let short = serde_json::json!([[1.0, 0.0], [0.0, 0.0, 0.0], 5]);
        assert!(serde_json::from_value::<PoseMessage>(short).is_err());
        let text = serde_json::json!(["setoffset;1;2;3"]);
        assert!(serde_json::from_value::<PoseMessage>(text).is_err());
    }

    #[test]
    fn command_addressing() {
        let all = CommandMessage::broadcast("stop");
        assert!(all.addresses("Drone1"));

        let some = CommandMessage::new("Drone1;Drone3", "stop");
        assert!(some.addresses("Drone1"));
        assert!(some.addresses("Drone3"));
        assert!(!some.addresses("Drone2"));
        assert!(!some.addresses("Drone"));
    }

    #[test]
    fn command_wire_shape_is_pair() {
        let json = serde_json::to_value(CommandMessage::new("Drone1", "start")).unwrap();
        assert_eq!(json, serde_json::json!(["Drone1", "start"]));
    }
}
