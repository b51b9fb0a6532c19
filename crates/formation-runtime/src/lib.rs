//! `formation-runtime` – the leader and follower instances.
//!
//! Each instance owns its devices, its state and its channel listeners, and
//! is driven by an external scheduler: `on_tick` once per run and, for
//! followers, `on_messages` when the broadcast medium has traffic.  Nothing
//! here blocks or spawns.
//!
//! # Modules
//!
//! - [`follower`] – [`Follower`][follower::Follower]: dead reckoning,
//!   collision avoidance and station keeping toward the commanded offset.
//! - [`leader`] – [`Leader`][leader::Leader] and its
//!   [`TrackState`][leader::TrackState] machine; relays operator commands.
//! - [`command`] – follower command grammar and the
//!   [`FollowerState`][command::FollowerState] it mutates.
//! - [`storage`] – persisted records, named configurations and the
//!   [`TextStore`][storage::TextStore] they are written to.
//! - [`settings`] – per-role settings with defaults.
//! - [`status`] – status text echoed on the `formation::status` target.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: subscriber
//!   setup with optional OTLP span export.

pub mod command;
pub mod follower;
pub mod leader;
pub mod settings;
pub mod status;
pub mod storage;
pub mod telemetry;

pub use follower::{Follower, FollowerStores};
pub use leader::{Leader, TrackState};
pub use settings::{FollowerSettings, LeaderSettings};
pub use storage::{FileStore, MemoryStore, TextStore};
pub use telemetry::{TracerProviderGuard, init_tracing};
