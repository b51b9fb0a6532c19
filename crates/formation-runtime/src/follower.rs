//! The follower instance.
//!
//! A [`Follower`] owns everything one follower vehicle needs: its station
//! keeper, optional collision avoidance, the last accepted leader pose, the
//! command-mutable [`FollowerState`] and the stores that state is persisted
//! to.  The scheduler calls [`Follower::on_tick`] once per run and
//! [`Follower::on_messages`] whenever the broadcast medium has traffic; the
//! two are never called concurrently.
//!
//! Per run, with a leader known and the follower enabled:
//!
//! 1. auto-stop: an operator in the seat releases the controls and skips
//!    motion;
//! 2. the commanded offset is projected through the dead-reckoned leader
//!    pose;
//! 3. collision avoidance may replace that target with the current offset;
//! 4. the station keeper drives toward the target.

use formation_hal::station::{StationGoal, StationKeeper, station_keeper};
use formation_hal::registry::DeviceRegistry;
use formation_middleware::bus::{BroadcastMedium, Listener};
use formation_middleware::wire::{ChannelKey, CommandMessage, PoseMessage};
use formation_perception::collision::{CollisionAvoidance, forward_cameras};
use formation_perception::prediction::PosePredictor;
use formation_types::{EntityId, FormationError, LeaderPose, Vec3};
use tracing::{debug, info, instrument, trace, warn};

use crate::command::{Effects, FollowerCommand, FollowerState};
use crate::settings::FollowerSettings;
use crate::status::{self, FollowerStatus, LinkStatus};
use crate::storage::{ConfigSet, FollowerRecord, MemoryStore, TextStore};

/// Where a follower keeps its run-state record and its configurations.
pub struct FollowerStores {
    pub record: Box<dyn TextStore>,
    pub configs: Box<dyn TextStore>,
}

impl FollowerStores {
    pub fn new(record: impl TextStore + 'static, configs: impl TextStore + 'static) -> Self {
        Self {
            record: Box::new(record),
            configs: Box::new(configs),
        }
    }

    /// Fresh in-memory stores.
    pub fn memory() -> Self {
        Self::new(MemoryStore::new(), MemoryStore::new())
    }
}

pub struct Follower {
    settings: FollowerSettings,
    state: FollowerState,
    keeper: Box<dyn StationKeeper>,
    collision: Option<CollisionAvoidance>,
    predictor: PosePredictor,
    poses: Listener<PoseMessage>,
    commands: Listener<CommandMessage>,
    leader: Option<LeaderPose>,
    self_id: EntityId,
    runtime: u64,
    operator_in_control: bool,
    stores: FollowerStores,
}

impl Follower {
    /// Take the follower's devices out of `registry`, restore its state and
    /// start listening on its formation's channels.
    ///
    /// # Errors
    ///
    /// [`FormationError::Configuration`] when the vehicle has no usable
    /// controller or actuators.
    pub fn new(
        settings: FollowerSettings,
        registry: &mut DeviceRegistry,
        medium: &BroadcastMedium,
        mut stores: FollowerStores,
    ) -> Result<Self, FormationError> {
        let keeper = station_keeper(registry, &settings.controller_name, settings.tick_rate)?;
        let self_id = keeper.controller().entity_id();

        let collision = settings.enable_collision_avoidance.then(|| {
            let forward = keeper.controller().world_matrix().forward();
            CollisionAvoidance::new(forward_cameras(registry.take_cameras(), forward), self_id)
        });

        let state = restore_state(&settings, &mut stores);
        let predictor = PosePredictor::new(
            settings.tick_rate,
            settings.calculate_missing_ticks,
            settings.max_missing_ticks,
        );
        info!(
            follower = %settings.follower_id,
            system = %settings.system_id,
            config = %state.current_config,
            offset = %state.offset,
            disabled = state.disabled,
            "follower ready"
        );

        Ok(Self {
            poses: medium.listen(ChannelKey::pose(settings.system_id.clone())),
            commands: medium.listen(ChannelKey::command(settings.system_id.clone())),
            settings,
            state,
            keeper,
            collision,
            predictor,
            leader: None,
            self_id,
            runtime: 0,
            operator_in_control: false,
            stores,
        })
    }

    pub fn id(&self) -> &str {
        &self.settings.follower_id
    }

    pub fn state(&self) -> &FollowerState {
        &self.state
    }

    pub fn leader(&self) -> Option<&LeaderPose> {
        self.leader.as_ref()
    }

    pub fn runtime(&self) -> u64 {
        self.runtime
    }

    /// Where the vehicle sits right now in the leader's frame.
    pub fn current_offset(&self) -> Option<Vec3> {
        let here = self.keeper.controller().position();
        self.leader
            .map(|leader| leader.transform.inverse_transform_point(here))
    }

    pub fn status(&self) -> FollowerStatus {
        let link = match &self.leader {
            None => LinkStatus::NoLeader,
            Some(pose) if self.predictor.is_signal_weak(pose, self.runtime) => {
                LinkStatus::Weak(self.runtime.abs_diff(pose.received_at_tick))
            }
            Some(_) => LinkStatus::Fresh,
        };
        FollowerStatus {
            disabled: self.state.disabled,
            configs: self.state.configs.names().map(str::to_string).collect(),
            current_config: self.state.current_config.clone(),
            offset: self.state.offset,
            link,
            under_control: self.operator_in_control,
            obstacle: self
                .collision
                .as_ref()
                .is_some_and(|c| c.obstacle_offset().is_some()),
        }
    }

    /// One scheduled run.
    ///
    /// # Errors
    ///
    /// [`FormationError::HardwareFault`] from an actuator driver.
    #[instrument(level = "trace", skip_all, fields(follower = %self.settings.follower_id, tick = self.runtime))]
    pub fn on_tick(&mut self) -> Result<(), FormationError> {
        if self.runtime % self.settings.tick_rate.echo_interval() == 0 {
            status::echo(&self.status());
        }
        let result = self.step();
        self.runtime += 1;
        result
    }

    fn step(&mut self) -> Result<(), FormationError> {
        if self.state.disabled {
            return Ok(());
        }
        let Some(leader) = self.leader else {
            return Ok(());
        };
        if self.settings.auto_stop && self.operator_seated()? {
            return Ok(());
        }

        let mut target = self
            .predictor
            .predict(&leader, self.state.offset, self.runtime);
        let mut holding = false;
        if let Some(collision) = self.collision.as_mut() {
            let here = self.keeper.controller().position();
            let current = leader.transform.inverse_transform_point(here);
            if let Some(hold) = collision.check(target, current) {
                target = leader.transform.transform_point(hold);
                holding = true;
            }
        }

        let goal = StationGoal {
            target: (holding || !self.state.offset.is_zero()).then_some(target),
            leader: leader.transform,
            leader_velocity: leader.velocity,
            max_relative_speed: self.settings.max_speed,
        };
        let command = self.keeper.update(&goal)?;
        trace!(?command, "actuators updated");
        Ok(())
    }

    /// Track operator presence; `true` while someone is in the seat.
    fn operator_seated(&mut self) -> Result<bool, FormationError> {
        let seated = self.keeper.controller().is_under_control();
        if seated == self.operator_in_control {
            return Ok(seated);
        }
        self.operator_in_control = seated;
        if seated {
            info!("operator took control, releasing actuators");
        } else {
            info!("operator left the controls");
            if self.settings.auto_start_here {
                if let Some(here) = self.current_offset() {
                    self.state.offset = here;
                    self.persist_record();
                }
            }
        }
        self.keeper.reset()?;
        Ok(seated)
    }

    /// Drain both channels.  Every pose is considered, so the newest
    /// acceptable one wins; commands are applied in arrival order.
    ///
    /// # Errors
    ///
    /// [`FormationError::HardwareFault`] when releasing the actuators fails.
    #[instrument(level = "trace", skip_all, fields(follower = %self.settings.follower_id))]
    pub fn on_messages(&mut self) -> Result<(), FormationError> {
        for pose in self.poses.drain() {
            self.accept_pose(pose)?;
        }
        for message in self.commands.drain() {
            if message.addresses(&self.settings.follower_id) {
                self.on_command(message.command())?;
            } else {
                trace!(targets = message.targets(), "command for other followers");
            }
        }
        Ok(())
    }

    fn accept_pose(&mut self, pose: PoseMessage) -> Result<(), FormationError> {
        match pose.source_id() {
            Some(id) if id == self.self_id => {
                debug!("own pose heard on the pose channel");
                return self.forget_leader();
            }
            None if !self.settings.accept_legacy_poses => {
                debug!("pose without source id dropped");
                return Ok(());
            }
            _ => {}
        }
        if self.leader.is_none() {
            info!(source = ?pose.source_id(), "leader found");
        }
        self.leader = Some(LeaderPose {
            transform: pose.transform(),
            velocity: pose.velocity(),
            source_id: pose.source_id(),
            received_at_tick: self.runtime,
        });
        Ok(())
    }

    fn forget_leader(&mut self) -> Result<(), FormationError> {
        if let Some(collision) = self.collision.as_mut() {
            collision.clear();
        }
        if self.leader.take().is_some() {
            info!("leader forgotten");
            self.keeper.reset()?;
        }
        Ok(())
    }

    /// Apply one command line addressed to this follower.  Lines that do not
    /// parse are dropped.
    ///
    /// # Errors
    ///
    /// [`FormationError::HardwareFault`] when releasing the actuators fails.
    pub fn on_command(&mut self, line: &str) -> Result<(), FormationError> {
        let command = match FollowerCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                debug!(line, error = %e, "command ignored");
                return Ok(());
            }
        };
        let effects = self.state.apply(&command, self.current_offset());
        if effects == Effects::default() {
            debug!(line, ?command, "command changed nothing");
            return Ok(());
        }
        info!(line, ?command, "command applied");

        if effects.forget_leader {
            self.forget_leader()?;
        }
        if effects.release || effects.resume {
            self.keeper.reset()?;
        }
        if effects.persist_record {
            self.persist_record();
        }
        if effects.persist_configs {
            self.persist_configs();
        }
        status::echo(&self.status());
        Ok(())
    }

    fn persist_record(&mut self) {
        let text = self.state.record().encode();
        if let Err(e) = self.stores.record.write(&text) {
            warn!(error = %e, "follower record not saved");
        }
    }

    fn persist_configs(&mut self) {
        let text = self.state.configs.encode();
        if let Err(e) = self.stores.configs.write(&text) {
            warn!(error = %e, "configurations not saved");
        }
    }
}

fn restore_state(settings: &FollowerSettings, stores: &mut FollowerStores) -> FollowerState {
    let configs = match stores.configs.read() {
        Ok(Some(text)) if !text.trim().is_empty() => ConfigSet::decode(&text, settings.default_offset),
        Ok(_) => {
            let configs = ConfigSet::new(settings.default_offset);
            if let Err(e) = stores.configs.write(&configs.encode()) {
                warn!(error = %e, "configurations not saved");
            }
            configs
        }
        Err(e) => {
            warn!(error = %e, "configurations unreadable, using defaults");
            ConfigSet::new(settings.default_offset)
        }
    };

    let stored = stores.record.read().and_then(|text| match text {
        Some(text) => FollowerRecord::decode(&text).map(Some),
        None => Ok(None),
    });
    match stored {
        Ok(Some(record)) => FollowerState::restore(record, configs),
        other => {
            if let Err(e) = other {
                warn!(error = %e, "follower record unreadable, rewriting defaults");
            }
            let state = FollowerState::fresh(configs);
            if let Err(e) = stores.record.write(&state.record().encode()) {
                warn!(error = %e, "follower record not saved");
            }
            state
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formation_hal::sim::SharedBody;
    use formation_hal::sim_world::{SimVehicle, SimWorld};
    use formation_types::{RigidTransform, TickRate};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    const LEADER: EntityId = EntityId(1);
    const ME: EntityId = EntityId(2);

    struct Rig {
        world: SimWorld,
        medium: BroadcastMedium,
        body: SharedBody,
        follower: Follower,
        record: MemoryStore,
        configs: MemoryStore,
    }

    fn rig_with(settings: FollowerSettings, record: MemoryStore, configs: MemoryStore) -> Rig {
        let world = SimWorld::new();
        let medium = BroadcastMedium::default();
        let mut vehicle = SimVehicle::builder(ME, "Drone")
            .at(RigidTransform::identity().with_translation(Vec3::new(0.0, 0.0, 20.0)))
            .with_thruster_block(20_000.0)
            .with_gyro()
            .with_forward_camera(500.0)
            .build(&world);
        let follower = Follower::new(
            settings,
            &mut vehicle.registry,
            &medium,
            FollowerStores::new(record.clone(), configs.clone()),
        )
        .unwrap();
        Rig {
            world,
            medium,
            body: vehicle.body,
            follower,
            record,
            configs,
        }
    }

    fn rig() -> Rig {
        rig_with(FollowerSettings::default(), MemoryStore::new(), MemoryStore::new())
    }

    fn send_pose(rig: &Rig, at: Vec3, source: EntityId) {
        let t = RigidTransform::identity().with_translation(at);
        rig.medium
            .transmit(&ChannelKey::pose("System1"), &PoseMessage::new(&t, Vec3::ZERO, source));
    }

    fn send_command(rig: &Rig, targets: &str, line: &str) {
        rig.medium
            .transmit(&ChannelKey::command("System1"), &CommandMessage::new(targets, line));
    }

    #[test]
    fn fresh_start_writes_default_records() {
        let rig = rig();
        assert_eq!(rig.record.text().as_deref(), Some("0;default;50;0;0"));
        assert_eq!(rig.configs.text().as_deref(), Some("default 50 0 0\n"));
        assert_eq!(rig.follower.status().link, LinkStatus::NoLeader);
    }

    #[test]
    fn corrupt_record_is_rewritten() {
        let rig = rig_with(
            FollowerSettings::default(),
            MemoryStore::with_text("not;a;record"),
            MemoryStore::with_text("wing -20 0 5\n"),
        );
        assert_eq!(rig.follower.state().current_config, "wing");
        assert_eq!(rig.follower.state().offset, Vec3::new(-20.0, 0.0, 5.0));
        assert_eq!(rig.record.text().as_deref(), Some("0;wing;-20;0;5"));
    }

    #[test]
    fn stored_record_is_restored() {
        let rig = rig_with(
            FollowerSettings::default(),
            MemoryStore::with_text("1;wing;1;2;3"),
            MemoryStore::with_text("default 50 0 0\nwing -20 0 5\n"),
        );
        let state = rig.follower.state();
        assert!(state.disabled);
        assert_eq!(state.current_config, "wing");
        assert_eq!(state.offset, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn own_pose_is_never_accepted() {
        let mut rig = rig();
        send_pose(&rig, Vec3::ZERO, ME);
        rig.follower.on_messages().unwrap();
        assert!(rig.follower.leader().is_none());

        send_pose(&rig, Vec3::ZERO, LEADER);
        rig.follower.on_messages().unwrap();
        assert_eq!(rig.follower.leader().unwrap().source_id, Some(LEADER));
    }

    /// Counts events on the status target.
    struct StatusEchoes(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for StatusEchoes {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().target() == "formation::status" {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn commands_without_effect_are_not_echoed() {
        let mut rig = rig();
        let echoes = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(StatusEchoes(echoes.clone()));
        tracing::subscriber::with_default(subscriber, || {
            for line in ["load;nowhere", "starthere", "savehere;wing", "save;bad name"] {
                rig.follower.on_command(line).unwrap();
            }
            assert_eq!(echoes.load(Ordering::SeqCst), 0);

            rig.follower.on_command("stop").unwrap();
            assert_eq!(echoes.load(Ordering::SeqCst), 1);
        });
        assert_eq!(rig.record.text().as_deref(), Some("1;default;50;0;0"));
    }

    #[test]
    fn legacy_pose_acceptance_is_configurable() {
        let settings = FollowerSettings {
            accept_legacy_poses: false,
            ..FollowerSettings::default()
        };
        let mut strict = rig_with(settings, MemoryStore::new(), MemoryStore::new());
        let legacy = PoseMessage::legacy(&RigidTransform::identity(), Vec3::ZERO);
        strict.medium.transmit(&ChannelKey::pose("System1"), &legacy);
        strict.follower.on_messages().unwrap();
        assert!(strict.follower.leader().is_none());

        let mut lenient = rig();
        lenient.medium.transmit(&ChannelKey::pose("System1"), &legacy);
        lenient.follower.on_messages().unwrap();
        assert_eq!(lenient.follower.leader().unwrap().source_id, None);
    }

    #[test]
    fn newest_pose_wins_when_draining() {
        let mut rig = rig();
        send_pose(&rig, Vec3::new(1.0, 0.0, 0.0), LEADER);
        send_pose(&rig, Vec3::new(2.0, 0.0, 0.0), LEADER);
        rig.follower.on_messages().unwrap();
        assert_eq!(
            rig.follower.leader().unwrap().transform.translation,
            Vec3::new(2.0, 0.0, 0.0)
        );
    }

    #[test]
    fn commands_are_filtered_by_target() {
        let mut rig = rig();
        send_command(&rig, "Drone2;Drone3", "setoffset;1;1;1");
        send_command(&rig, "Drone1;Drone3", "addoffset;0;5;0");
        send_command(&rig, "", "addoffset;1;0;0");
        rig.follower.on_messages().unwrap();
        assert_eq!(rig.follower.state().offset, Vec3::new(51.0, 5.0, 0.0));
        assert_eq!(rig.record.text().as_deref(), Some("0;default;51;5;0"));
    }

    #[test]
    fn unknown_commands_leave_state_alone() {
        let mut rig = rig();
        let before = rig.follower.state().clone();
        rig.follower.on_command("warp;9").unwrap();
        rig.follower.on_command("save;base 1").unwrap();
        assert_eq!(rig.follower.state(), &before);
        assert_eq!(rig.configs.text().as_deref(), Some("default 50 0 0\n"));
    }

    #[test]
    fn savehere_stores_relative_position() {
        let mut rig = rig();
        send_pose(&rig, Vec3::new(0.0, 0.0, -10.0), LEADER);
        rig.follower.on_messages().unwrap();
        rig.follower.on_command("savehere;behind").unwrap();
        assert_eq!(
            rig.follower.state().configs.get("behind"),
            Some(Vec3::new(0.0, 0.0, 30.0))
        );
        assert_eq!(
            rig.configs.text().as_deref(),
            Some("default 50 0 0\nbehind 0 0 30\n")
        );
    }

    #[test]
    fn clear_forgets_leader() {
        let mut rig = rig();
        send_pose(&rig, Vec3::ZERO, LEADER);
        rig.follower.on_messages().unwrap();
        rig.follower.on_command("clear").unwrap();
        assert!(rig.follower.leader().is_none());
    }

    #[test]
    fn stop_releases_thrusters() {
        let mut rig = rig();
        send_pose(&rig, Vec3::new(0.0, 0.0, -200.0), LEADER);
        rig.follower.on_messages().unwrap();
        rig.follower.on_tick().unwrap();
        assert!(rig.body.lock().thrust_local.iter().any(|f| f.length() > 0.0));

        rig.follower.on_command("stop").unwrap();
        assert!(rig.body.lock().thrust_local.iter().all(|f| f.length() == 0.0));
        rig.follower.on_tick().unwrap();
        assert!(rig.body.lock().thrust_local.iter().all(|f| f.length() == 0.0));
        assert_eq!(rig.record.text().as_deref(), Some("1;default;50;0;0"));
    }

    #[test]
    fn operator_in_seat_suspends_motion() {
        let settings = FollowerSettings {
            auto_start_here: true,
            ..FollowerSettings::default()
        };
        let mut rig = rig_with(settings, MemoryStore::new(), MemoryStore::new());
        send_pose(&rig, Vec3::ZERO, LEADER);
        rig.follower.on_messages().unwrap();

        rig.body.lock().under_control = true;
        rig.follower.on_tick().unwrap();
        assert!(rig.body.lock().thrust_local.iter().all(|f| f.length() == 0.0));
        assert!(rig.follower.status().under_control);

        rig.body.lock().pose.translation = Vec3::new(5.0, 0.0, 5.0);
        rig.body.lock().under_control = false;
        rig.follower.on_tick().unwrap();
        assert_eq!(rig.follower.state().offset, Vec3::new(5.0, 0.0, 5.0));
    }

    #[test]
    fn weak_signal_is_reported() {
        let settings = FollowerSettings {
            max_missing_ticks: 3,
            ..FollowerSettings::default()
        };
        let mut rig = rig_with(settings, MemoryStore::new(), MemoryStore::new());
        send_pose(&rig, Vec3::new(0.0, 0.0, -100.0), LEADER);
        rig.follower.on_messages().unwrap();
        for _ in 0..5 {
            rig.follower.on_tick().unwrap();
        }
        assert_eq!(rig.follower.status().link, LinkStatus::Weak(5));
    }

    #[test]
    fn follower_settles_at_offset() {
        let mut rig = rig();
        let dt = TickRate::Update1.seconds_per_run();
        for _ in 0..60 * 60 {
            send_pose(&rig, Vec3::ZERO, LEADER);
            rig.follower.on_messages().unwrap();
            rig.follower.on_tick().unwrap();
            rig.world.step(dt);
        }
        let pos = rig.body.lock().position();
        assert!(pos.distance(Vec3::new(50.0, 0.0, 0.0)) < 1.5, "ended at {pos}");
    }

    #[test]
    fn obstacle_holds_position() {
        let settings = FollowerSettings {
            enable_collision_avoidance: true,
            default_offset: Vec3::new(0.0, 0.0, -100.0),
            ..FollowerSettings::default()
        };
        let mut rig = rig_with(settings, MemoryStore::new(), MemoryStore::new());
        rig.world.add_body({
            let mut rock = formation_hal::sim::SimBody::new(EntityId(9), "Rock");
            rock.pose.translation = Vec3::new(0.0, 0.0, -40.0);
            rock
        });
        send_pose(&rig, Vec3::ZERO, LEADER);
        rig.follower.on_messages().unwrap();
        rig.follower.on_tick().unwrap();
        assert!(rig.follower.status().obstacle);
    }
}
