//! The leader instance and its target-acquisition state machine.
//!
//! ```text
//!            reset                 find;name              match by name
//!   Idle ─────────────▶ FollowSelf ─────────▶ SearchingByName ───────────▶ Locked
//!     ▲  (self-follow      ▲                        ▲                       │ ▲
//!     │   permitted)       └──────── reset ─────────┴──────── reset ────────┘ │
//!     └─────────────── reset (self-follow not permitted) ◀──────── scan hit ──┘
//! ```
//!
//! Each run the leader broadcasts one pose on its formation's pose channel:
//! its own while following itself, the tracked entity's while locked.  A
//! locked target that drops out of the detection sensors can be re-acquired
//! by a raycast at its dead-reckoned position when active raycasting is on.
//!
//! Operator input goes through [`Leader::process_command`]:
//!
//! | Line | Effect |
//! |---|---|
//! | `targets:payload` | relay `payload` to the `;`-separated follower ids in `targets` |
//! | `scan` | raycast straight ahead, lock onto whatever is hit |
//! | `find;name` | search the sensors for an entity called `name` |
//! | `stop` / `start` | pause / resume broadcasting |
//! | `reset` | drop the target |
//! | anything else | relay to every follower |

use formation_hal::camera::{Camera, DetectionSensor};
use formation_hal::controller::VehicleController;
use formation_hal::registry::DeviceRegistry;
use formation_middleware::bus::BroadcastMedium;
use formation_middleware::wire::{ChannelKey, CommandMessage, PoseMessage};
use formation_perception::collision::FORWARD_ALIGNMENT;
use formation_types::{DetectedEntity, EntityId, FormationError, RigidTransform, TickRate, Vec3};
use tracing::{debug, info, instrument, trace, warn};

use crate::settings::LeaderSettings;
use crate::status::{self, LeaderStatus};
use crate::storage::{LeaderRecord, TextStore};

/// What the leader is broadcasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackState {
    Idle,
    FollowSelf,
    SearchingByName(String),
    Locked { id: EntityId, name: String },
}

impl TrackState {
    fn record(&self, disabled: bool) -> LeaderRecord {
        let target = match self {
            TrackState::Idle | TrackState::FollowSelf => None,
            TrackState::SearchingByName(name) => Some((None, name.clone())),
            TrackState::Locked { id, name } => Some((Some(*id), name.clone())),
        };
        LeaderRecord { disabled, target }
    }
}

enum SelfCommand {
    Handled,
    Ignored,
    NotMine,
}

pub struct Leader {
    settings: LeaderSettings,
    controller: Box<dyn VehicleController>,
    sensors: Vec<Box<dyn DetectionSensor>>,
    cameras: Vec<Box<dyn Camera>>,
    /// Indices into `cameras` looking along the controller's forward axis.
    forward: Vec<usize>,
    state: TrackState,
    disabled: bool,
    /// Last sighting of the target and the run it was made on.
    last_hit: Option<(DetectedEntity, u64)>,
    runtime: u64,
    medium: BroadcastMedium,
    pose_key: ChannelKey,
    command_key: ChannelKey,
    store: Box<dyn TextStore>,
}

impl Leader {
    /// Take the leader's controller, sensors and cameras out of `registry`
    /// and restore its target from `store`.
    ///
    /// # Errors
    ///
    /// [`FormationError::Configuration`] when the vehicle has no controller.
    pub fn new(
        settings: LeaderSettings,
        registry: &mut DeviceRegistry,
        medium: &BroadcastMedium,
        store: impl TextStore + 'static,
    ) -> Result<Self, FormationError> {
        let controller = registry.take_controller(&settings.controller_name)?;
        let sensors = registry.take_sensors();
        let mut cameras = registry.take_cameras();

        let ahead = controller.world_matrix().forward();
        let forward: Vec<usize> = cameras
            .iter()
            .enumerate()
            .filter(|(_, c)| c.world_matrix().forward().dot(ahead) >= FORWARD_ALIGNMENT)
            .map(|(i, _)| i)
            .collect();
        for (i, camera) in cameras.iter_mut().enumerate() {
            if settings.active_raycasting || forward.contains(&i) {
                camera.enable_raycast();
            }
        }
        if sensors.is_empty() {
            warn!("leader has no detection sensors; only self-follow and scan are available");
        }

        let mut leader = Self {
            pose_key: ChannelKey::pose(settings.system_id.clone()),
            command_key: ChannelKey::command(settings.system_id.clone()),
            settings,
            controller,
            sensors,
            cameras,
            forward,
            state: TrackState::Idle,
            disabled: false,
            last_hit: None,
            runtime: 0,
            medium: medium.clone(),
            store: Box::new(store),
        };

        let stored = leader.store.read().and_then(|text| match text {
            Some(text) => LeaderRecord::decode(&text).map(Some),
            None => Ok(None),
        });
        let record = match stored {
            Ok(Some(record)) => record,
            Ok(None) => LeaderRecord { disabled: false, target: None },
            Err(e) => {
                warn!(error = %e, "leader record unreadable, rewriting defaults");
                LeaderRecord { disabled: false, target: None }
            }
        };
        leader.disabled = record.disabled;
        leader.state = leader.restore(record.target);
        leader.persist();
        info!(
            system = %leader.settings.system_id,
            state = ?leader.state,
            disabled = leader.disabled,
            "leader ready"
        );
        Ok(leader)
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn status(&self) -> LeaderStatus {
        LeaderStatus {
            disabled: self.disabled,
            state: self.state.clone(),
        }
    }

    /// Rate the scheduler should run the leader at.  Detections do not
    /// refresh faster than every tenth game tick, so tracking another entity
    /// at `Update1` is slowed to `Update10`.
    pub fn suggested_tick_rate(&self) -> TickRate {
        match (&self.state, self.settings.tick_rate) {
            (TrackState::SearchingByName(_) | TrackState::Locked { .. }, TickRate::Update1) => {
                TickRate::Update10
            }
            (_, rate) => rate,
        }
    }

    fn baseline(&self) -> TrackState {
        if self.settings.allow_follow_self {
            TrackState::FollowSelf
        } else {
            TrackState::Idle
        }
    }

    fn restore(&self, target: Option<(Option<EntityId>, String)>) -> TrackState {
        let Some((id, name)) = target else {
            return self.baseline();
        };
        if !self.settings.attempt_reconnection {
            return match id {
                Some(id) => TrackState::Locked { id, name },
                None => TrackState::SearchingByName(name),
            };
        }
        match self.reacquire(id, &name) {
            Some(found) => {
                info!(id = %found.id, name = %found.name, "reconnected to target");
                TrackState::Locked {
                    id: found.id,
                    name: found.name,
                }
            }
            None => {
                info!(name = %name, "previous target not visible, searching");
                TrackState::SearchingByName(name)
            }
        }
    }

    /// The exact id wins outright.  Otherwise the last name match seen wins,
    /// sensors taken in order.
    fn reacquire(&self, id: Option<EntityId>, name: &str) -> Option<DetectedEntity> {
        let mut by_name = None;
        for sensor in &self.sensors {
            for entity in sensor.detected_entities() {
                if Some(entity.id) == id {
                    return Some(entity);
                }
                if entity.name == name {
                    by_name = Some(entity);
                }
            }
        }
        by_name
    }

    fn find(&self, matches: impl Fn(&DetectedEntity) -> bool) -> Option<DetectedEntity> {
        self.sensors
            .iter()
            .find_map(|sensor| sensor.detected_entities().into_iter().find(|e| matches(e)))
    }

    /// One scheduled run.
    #[instrument(level = "trace", skip_all, fields(tick = self.runtime))]
    pub fn on_tick(&mut self) {
        if self.disabled {
            return;
        }
        if self.runtime % self.suggested_tick_rate().echo_interval() == 0 {
            status::echo(&self.status());
        }
        self.runtime += 1;

        match self.state.clone() {
            TrackState::Idle => {
                if self.settings.allow_follow_self {
                    self.state = TrackState::FollowSelf;
                    self.broadcast_self();
                }
            }
            TrackState::FollowSelf => self.broadcast_self(),
            TrackState::SearchingByName(name) => match self.find(|e| e.name == name) {
                Some(entity) => {
                    info!(id = %entity.id, name = %entity.name, "target found");
                    self.state = TrackState::Locked {
                        id: entity.id,
                        name: entity.name.clone(),
                    };
                    self.persist();
                    self.track(entity);
                }
                None => {
                    if self.settings.broadcast_self_while_searching {
                        self.broadcast_self();
                    }
                }
            },
            TrackState::Locked { id, .. } => {
                match self.find(|e| e.id == id).or_else(|| self.raycast_predicted(id)) {
                    Some(entity) => self.track(entity),
                    None => trace!(%id, "target not visible"),
                }
            }
        }
    }

    fn track(&mut self, entity: DetectedEntity) {
        let pose = self.aligned(RigidTransform::create_world(
            entity.position(),
            entity.orientation.forward(),
            entity.orientation.up,
        ));
        self.medium
            .transmit(&self.pose_key, &PoseMessage::new(&pose, entity.velocity, entity.id));
        if self.settings.active_raycasting {
            self.last_hit = Some((entity, self.runtime));
        }
    }

    fn broadcast_self(&mut self) {
        let pose = self.aligned(self.controller.world_matrix());
        let message = PoseMessage::new(
            &pose,
            self.controller.linear_velocity(),
            self.controller.entity_id(),
        );
        self.medium.transmit(&self.pose_key, &message);
    }

    /// Raycast at where the last sighting should be by now.  Only the first
    /// camera able to reach that point is tried.
    fn raycast_predicted(&mut self, id: EntityId) -> Option<DetectedEntity> {
        if !self.settings.active_raycasting {
            return None;
        }
        let seconds_per_run = self.suggested_tick_rate().seconds_per_run();
        let (hit, seen_at) = self.last_hit.as_ref()?;
        let elapsed = self.runtime.abs_diff(*seen_at) as f64 * seconds_per_run;
        let predicted = hit.position() + hit.velocity * elapsed;

        for camera in &mut self.cameras {
            if !camera.is_raycast_enabled() {
                camera.enable_raycast();
            }
            if !camera.can_scan_point(predicted) {
                continue;
            }
            let found = camera.raycast_point(predicted).filter(|e| e.id == id);
            if found.is_some() {
                debug!(%id, "target re-acquired by raycast");
            }
            return found;
        }
        None
    }

    /// Replace `pose`'s up axis by the inverse of natural gravity when
    /// gravity alignment is on and gravity is present.
    fn aligned(&self, pose: RigidTransform) -> RigidTransform {
        if !self.settings.align_followers_to_gravity {
            return pose;
        }
        let gravity = self.controller.natural_gravity();
        if gravity.length_squared() < 1e-12 {
            return pose;
        }
        let up = -gravity.normalize();
        let right = pose.forward().cross(up);
        if right.length_squared() < 1e-12 {
            return pose;
        }
        let right = right.normalize();
        let forward: Vec3 = up.cross(right);
        RigidTransform {
            right,
            up,
            backward: -forward,
            translation: pose.translation,
        }
    }

    /// Handle one operator line.
    #[instrument(level = "debug", skip(self))]
    pub fn process_command(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if let Some((targets, payload)) = line.split_once(':') {
            self.relay(CommandMessage::new(targets.trim(), payload.trim()));
            return;
        }
        match self.self_command(line) {
            SelfCommand::Handled => {
                self.persist();
                status::echo(&self.status());
            }
            SelfCommand::Ignored => {}
            SelfCommand::NotMine => self.relay(CommandMessage::broadcast(line)),
        }
    }

    fn relay(&self, message: CommandMessage) {
        let listeners = self.medium.transmit(&self.command_key, &message);
        info!(
            targets = message.targets(),
            command = message.command(),
            listeners,
            "command relayed"
        );
    }

    fn self_command(&mut self, line: &str) -> SelfCommand {
        let mut args = line.split(';').map(str::trim);
        let head = args.next().unwrap_or_default().to_ascii_lowercase();
        match head.as_str() {
            "stop" => self.disabled = true,
            "start" => self.disabled = false,
            "reset" => {
                self.disabled = false;
                self.state = self.baseline();
                self.last_hit = None;
            }
            "scan" => {
                self.disabled = false;
                self.scan();
            }
            "find" => {
                let Some(name) = args.next().filter(|n| !n.is_empty()) else {
                    debug!("find needs a name");
                    return SelfCommand::Ignored;
                };
                self.disabled = false;
                self.state = TrackState::SearchingByName(name.to_string());
                self.last_hit = None;
            }
            _ => return SelfCommand::NotMine,
        }
        info!(command = %head, state = ?self.state, disabled = self.disabled, "leader command");
        SelfCommand::Handled
    }

    fn scan(&mut self) {
        let distance = self.settings.scan_distance;
        let ready = self
            .forward
            .iter()
            .copied()
            .find(|&i| self.cameras[i].can_scan_distance(distance));
        let Some(camera) = ready else {
            warn!(distance, "no forward camera ready to scan");
            return;
        };
        match self.cameras[camera].raycast_distance(distance) {
            Some(hit) => {
                info!(id = %hit.id, name = %hit.name, "scan locked target");
                self.state = TrackState::Locked {
                    id: hit.id,
                    name: hit.name,
                };
                self.last_hit = None;
            }
            None => info!(distance, "scan found nothing"),
        }
    }

    fn persist(&mut self) {
        let text = self.state.record(self.disabled).encode();
        if let Err(e) = self.store.write(&text) {
            warn!(error = %e, "leader record not saved");
        }
    }
}
