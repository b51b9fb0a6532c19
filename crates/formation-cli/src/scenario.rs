//! Headless formation run: one leader cruising straight ahead and a wedge of
//! followers, all in one simulated world.
//!
//! [`Scenario::step`] is one game tick (1/60 s).  Each instance runs on the
//! game ticks its tick rate selects, and followers see broadcast traffic on
//! every game tick, the way an in-game scheduler would deliver it.

use std::path::Path;

use formation_hal::sim::SharedBody;
use formation_hal::sim_world::{SimVehicle, SimWorld};
use formation_middleware::bus::BroadcastMedium;
use formation_runtime::{
    FileStore, Follower, FollowerSettings, FollowerStores, Leader, MemoryStore,
};
use formation_types::{EntityId, FormationError, RigidTransform, TickRate, Vec3};
use tracing::info;

use crate::config::Config;

const LEADER_ID: EntityId = EntityId(1);

/// Offset of the `index`-th follower (0-based): alternating right and left
/// of the leader, each pair one slot further back.
pub fn wedge_offset(index: usize, spacing: f64) -> Vec3 {
    let rank = (index / 2 + 1) as f64;
    let side = if index % 2 == 0 { 1.0 } else { -1.0 };
    Vec3::new(side * rank * spacing, 0.0, rank * spacing)
}

pub struct Scenario {
    world: SimWorld,
    leader: Leader,
    leader_body: SharedBody,
    leader_speed: f64,
    followers: Vec<(Follower, SharedBody)>,
    follower_rate: TickRate,
    game_tick: u64,
}

impl Scenario {
    /// Build the world described by `cfg`.
    ///
    /// # Errors
    ///
    /// [`FormationError::Configuration`] when a vehicle cannot be wired.
    pub fn build(cfg: &Config) -> Result<Self, FormationError> {
        let sim = &cfg.simulation;
        let world = SimWorld::new();
        let medium = BroadcastMedium::default().with_loss(sim.drop_every);
        let state_dir = sim.state_dir.as_deref();

        let mut leader_vehicle = SimVehicle::builder(LEADER_ID, "Mothership")
            .mass(50_000.0)
            .radius(15.0)
            .velocity(Vec3::new(0.0, 0.0, -sim.leader_speed))
            .with_sensor(2_000.0)
            .with_forward_camera(5_000.0)
            .build(&world);
        let leader = match state_dir {
            Some(dir) => Leader::new(
                cfg.leader.clone(),
                &mut leader_vehicle.registry,
                &medium,
                FileStore::new(dir.join("leader.txt")),
            )?,
            None => Leader::new(
                cfg.leader.clone(),
                &mut leader_vehicle.registry,
                &medium,
                MemoryStore::new(),
            )?,
        };

        let mut followers = Vec::with_capacity(sim.followers);
        for index in 0..sim.followers {
            let settings = FollowerSettings {
                follower_id: format!("Drone{}", index + 1),
                default_offset: wedge_offset(index, sim.spacing),
                ..cfg.follower.clone()
            };
            // Start scattered near the slot so the formation has to close up.
            let start = settings.default_offset * 0.5 + Vec3::new(0.0, 10.0, 30.0);
            let id = EntityId(index as i64 + 2);
            let mut vehicle = SimVehicle::builder(id, settings.follower_id.clone())
                .at(RigidTransform::identity().with_translation(start))
                .mass(1_000.0)
                .with_thruster_block(20_000.0)
                .with_gyro()
                .with_forward_camera(500.0)
                .build(&world);
            let stores = follower_stores(state_dir, &settings.follower_id);
            let follower = Follower::new(settings, &mut vehicle.registry, &medium, stores)?;
            followers.push((follower, vehicle.body));
        }

        info!(followers = followers.len(), system = %cfg.leader.system_id, "scenario ready");
        Ok(Self {
            world,
            leader,
            leader_body: leader_vehicle.body,
            leader_speed: sim.leader_speed,
            followers,
            follower_rate: cfg.follower.tick_rate,
            game_tick: 0,
        })
    }

    pub fn leader(&self) -> &Leader {
        &self.leader
    }

    pub fn followers(&self) -> impl Iterator<Item = &Follower> {
        self.followers.iter().map(|(f, _)| f)
    }

    pub fn game_tick(&self) -> u64 {
        self.game_tick
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.game_tick as f64 / TickRate::GAME_TICKS_PER_SECOND
    }

    /// Distance of each follower from its commanded slot.
    pub fn slot_errors(&self) -> Vec<(String, Option<f64>)> {
        self.followers
            .iter()
            .map(|(f, _)| {
                let error = f
                    .current_offset()
                    .map(|here| here.distance(f.state().offset));
                (f.id().to_string(), error)
            })
            .collect()
    }

    /// Pass an operator line to the leader.
    pub fn command(&mut self, line: &str) {
        self.leader.process_command(line);
    }

    /// Advance one game tick.
    ///
    /// # Errors
    ///
    /// [`FormationError::HardwareFault`] from a follower's actuators.
    pub fn step(&mut self) -> Result<(), FormationError> {
        let leader_every = u64::from(self.leader.suggested_tick_rate().ticks_per_run());
        if self.game_tick % leader_every == 0 {
            self.leader.on_tick();
        }

        let follower_every = u64::from(self.follower_rate.ticks_per_run());
        for (follower, _) in &mut self.followers {
            follower.on_messages()?;
            if self.game_tick % follower_every == 0 {
                follower.on_tick()?;
            }
        }

        // The leader is flown by hand: hold its cruise velocity.
        {
            let mut body = self.leader_body.lock();
            body.velocity = body.pose.forward() * self.leader_speed;
        }
        self.world.step(1.0 / TickRate::GAME_TICKS_PER_SECOND);
        self.game_tick += 1;
        Ok(())
    }
}

fn follower_stores(state_dir: Option<&Path>, id: &str) -> FollowerStores {
    match state_dir {
        Some(dir) => FollowerStores::new(
            FileStore::new(dir.join(format!("{id}.txt"))),
            FileStore::new(dir.join(format!("{id}.configs"))),
        ),
        None => FollowerStores::memory(),
    }
}
