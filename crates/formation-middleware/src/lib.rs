//! `formation-middleware` – the radio between leader and followers.
//!
//! Moves typed payloads over an unreliable broadcast medium without caring
//! what they mean.
//!
//! # Modules
//!
//! - [`bus`] – [`BroadcastMedium`][bus::BroadcastMedium] and typed
//!   [`Listener`][bus::Listener]s built on Tokio broadcast channels.
//! - [`wire`] – channel keys and the pose and command payload shapes.

pub mod bus;
pub mod wire;

pub use bus::{BroadcastMedium, Listener};
pub use wire::{ChannelKey, CommandMessage, PoseMessage};
