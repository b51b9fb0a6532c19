//! Operator-facing status text, echoed periodically on the
//! `formation::status` tracing target.

use std::fmt;

use formation_types::Vec3;
use tracing::info;

use crate::leader::TrackState;

/// Emit `status` on the status target.
pub fn echo(status: &impl fmt::Display) {
    info!(target: "formation::status", "{status}");
}

/// How fresh the follower's leader pose is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    NoLeader,
    Fresh,
    /// Last pose accepted this many runs ago, past the dead-reckoning cap.
    Weak(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowerStatus {
    pub disabled: bool,
    pub configs: Vec<String>,
    pub current_config: String,
    pub offset: Vec3,
    pub link: LinkStatus,
    pub under_control: bool,
    pub obstacle: bool,
}

impl fmt::Display for FollowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", if self.disabled { "Stopped." } else { "Running." })?;
        writeln!(f, "Configs:")?;
        for name in &self.configs {
            let marker = if *name == self.current_config { '*' } else { ' ' };
            writeln!(f, "{marker}{name}")?;
        }
        write!(f, "Offset: {}", self.offset)?;
        match self.link {
            LinkStatus::NoLeader => write!(f, "\nNo messages received.")?,
            LinkStatus::Weak(ago) => {
                write!(f, "\nWeak signal, message received {ago} ticks ago.")?
            }
            LinkStatus::Fresh => {}
        }
        if self.under_control {
            write!(f, "\nCockpit is under control.")?;
        }
        if self.obstacle {
            write!(f, "\nObstacle Detected! Stopping the ship.")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderStatus {
    pub disabled: bool,
    pub state: TrackState,
}

impl fmt::Display for LeaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.disabled {
            return write!(f, "Stopped.");
        }
        match &self.state {
            TrackState::Idle => write!(f, "Idle."),
            TrackState::FollowSelf => write!(f, "Running.\nFollowing me."),
            TrackState::SearchingByName(name) => write!(f, "Running.\nSearching for {name}..."),
            TrackState::Locked { name, .. } => write!(f, "Running.\nFollowing {name}"),
        }
    }
}
