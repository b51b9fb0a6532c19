//! `formation-perception` – what a follower believes about where it should be.
//!
//! # Modules
//!
//! - [`prediction`] – [`PosePredictor`][prediction::PosePredictor]:
//!   dead reckoning of a stale leader pose along its last known velocity.
//! - [`collision`] – [`CollisionAvoidance`][collision::CollisionAvoidance]:
//!   camera raycasts toward the target that switch the follower to holding
//!   its current offset while something is in the way.

pub mod collision;
pub mod prediction;
