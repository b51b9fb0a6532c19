//! Dead reckoning of a stale leader pose.
//!
//! The leader and its followers tick independently and the pose channel drops
//! messages, so the last accepted [`LeaderPose`] is usually a few runs old.
//! [`PosePredictor`] shifts the follower's target along the leader's last
//! known velocity by the number of runs that have passed since, up to a cap.
//!
//! # Example
//!
//! ```rust
//! use formation_perception::prediction::PosePredictor;
//! use formation_types::{LeaderPose, RigidTransform, TickRate, Vec3};
//!
//! let predictor = PosePredictor::new(TickRate::Update1, true, 100);
//! let pose = LeaderPose {
//!     transform: RigidTransform::identity(),
//!     velocity: Vec3::new(0.0, 0.0, -60.0),
//!     source_id: None,
//!     received_at_tick: 10,
//! };
//! // Thirty runs at 60 Hz is half a second of travel.
//! let target = predictor.predict(&pose, Vec3::ZERO, 40);
//! assert!((target.z + 30.0).abs() < 1e-9);
//! ```

use formation_types::{LeaderPose, TickRate, Vec3};

/// Extrapolates the follower's target world position from a leader pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosePredictor {
    rate: TickRate,
    enabled: bool,
    max_missing_ticks: u64,
}

impl PosePredictor {
    /// `max_missing_ticks` counts script runs, not game ticks.
    pub fn new(rate: TickRate, enabled: bool, max_missing_ticks: u64) -> Self {
        Self {
            rate,
            enabled,
            max_missing_ticks,
        }
    }

    /// Runs to extrapolate over: the distance between `now` and the pose's
    /// receipt tick in either direction, capped.  Zero when prediction is off.
    pub fn elapsed_ticks(&self, pose: &LeaderPose, now: u64) -> u64 {
        if !self.enabled {
            return 0;
        }
        now.abs_diff(pose.received_at_tick).min(self.max_missing_ticks)
    }

    /// World position of `offset` (leader frame) after dead reckoning.
    pub fn predict(&self, pose: &LeaderPose, offset: Vec3, now: u64) -> Vec3 {
        let target = pose.transform.transform_point(offset);
        let elapsed = self.elapsed_ticks(pose, now);
        if elapsed == 0 {
            return target;
        }
        let seconds = elapsed as f64 * self.rate.seconds_per_run();
        target + pose.velocity * seconds
    }

    /// The pose is older than the extrapolation cap.  Always `false` when
    /// prediction is off.
    pub fn is_signal_weak(&self, pose: &LeaderPose, now: u64) -> bool {
        self.enabled && now.abs_diff(pose.received_at_tick) > self.max_missing_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formation_types::RigidTransform;
    use proptest::prelude::*;

    fn pose_at(tick: u64, velocity: Vec3) -> LeaderPose {
        LeaderPose {
            transform: RigidTransform::identity()
                .with_translation(Vec3::new(100.0, 0.0, 0.0)),
            velocity,
            source_id: None,
            received_at_tick: tick,
        }
    }

    #[test]
    fn fresh_pose_is_not_extrapolated() {
        let p = PosePredictor::new(TickRate::Update1, true, 100);
        let pose = pose_at(5, Vec3::new(10.0, 0.0, 0.0));
        let target = p.predict(&pose, Vec3::new(50.0, 0.0, 0.0), 5);
        assert_eq!(target, Vec3::new(150.0, 0.0, 0.0));
    }

    #[test]
    fn offset_is_in_leader_frame() {
        let p = PosePredictor::new(TickRate::Update1, false, 100);
        let mut pose = pose_at(0, Vec3::ZERO);
        // Leader facing +X: its right is +Z.
        pose.transform = RigidTransform::create_world(
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let target = p.predict(&pose, Vec3::new(50.0, 0.0, 0.0), 0);
        assert!(target.distance(Vec3::new(0.0, 0.0, 50.0)) < 1e-9);
    }

    #[test]
    fn slower_rates_cover_more_time_per_run() {
        let pose = pose_at(0, Vec3::new(6.0, 0.0, 0.0));
        let fast = PosePredictor::new(TickRate::Update1, true, 100).predict(&pose, Vec3::ZERO, 10);
        let slow = PosePredictor::new(TickRate::Update10, true, 100).predict(&pose, Vec3::ZERO, 10);
        // 10 runs: 1/6 s at Update1, 10/6 s at Update10.
        assert!((fast.x - 101.0).abs() < 1e-9);
        assert!((slow.x - 110.0).abs() < 1e-9);
    }

    #[test]
    fn extrapolation_is_capped_and_flags_weak_signal() {
        let p = PosePredictor::new(TickRate::Update1, true, 100);
        let pose = pose_at(0, Vec3::new(60.0, 0.0, 0.0));
        assert_eq!(p.elapsed_ticks(&pose, 1_000), 100);
        assert!(p.is_signal_weak(&pose, 101));
        assert!(!p.is_signal_weak(&pose, 100));
        let target = p.predict(&pose, Vec3::ZERO, 1_000);
        assert!((target.x - 200.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_prediction_holds_last_pose() {
        let p = PosePredictor::new(TickRate::Update1, false, 100);
        let pose = pose_at(0, Vec3::new(60.0, 0.0, 0.0));
        assert_eq!(p.elapsed_ticks(&pose, 50), 0);
        assert_eq!(p.predict(&pose, Vec3::ZERO, 50), Vec3::new(100.0, 0.0, 0.0));
        assert!(!p.is_signal_weak(&pose, 5_000));
    }

    #[test]
    fn receipt_after_now_uses_absolute_difference() {
        let p = PosePredictor::new(TickRate::Update1, true, 100);
        let pose = pose_at(20, Vec3::new(60.0, 0.0, 0.0));
        assert_eq!(p.elapsed_ticks(&pose, 10), 10);
    }

    proptest! {
        #[test]
        fn travel_never_exceeds_cap(
            received in 0u64..10_000,
            now in 0u64..10_000,
            speed in 0.0f64..500.0,
            cap in 0u64..300,
        ) {
            let p = PosePredictor::new(TickRate::Update1, true, cap);
            let pose = pose_at(received, Vec3::new(speed, 0.0, 0.0));
            let travelled = p.predict(&pose, Vec3::ZERO, now).x - 100.0;
            let limit = speed * cap as f64 * TickRate::Update1.seconds_per_run();
            prop_assert!(travelled <= limit + 1e-6);
            prop_assert!(travelled >= 0.0);
        }

        #[test]
        fn travel_grows_with_staleness(
            received in 0u64..1_000,
            gap in 0u64..200,
            speed in 0.1f64..500.0,
        ) {
            let p = PosePredictor::new(TickRate::Update10, true, 100);
            let pose = pose_at(received, Vec3::new(speed, 0.0, 0.0));
            let sooner = p.predict(&pose, Vec3::ZERO, received + gap).x;
            let later = p.predict(&pose, Vec3::ZERO, received + gap + 1).x;
            prop_assert!(later >= sooner);
        }
    }
}
