//! Reads/writes `~/.formation/config.toml`.
//!
//! ```toml
//! [leader]
//! system_id = "System1"
//! active_raycasting = true
//!
//! [follower]
//! max_speed = 25.0
//!
//! [simulation]
//! followers = 4
//! ```
//!
//! Every table and field is optional.  `[follower]` is the template each
//! simulated follower starts from; its id and default offset are filled in
//! per follower.

use std::fs;
use std::path::{Path, PathBuf};

use formation_runtime::{FollowerSettings, LeaderSettings};
use formation_types::TickRate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of followers flying with the leader.
    pub followers: usize,
    /// Distance between formation slots.
    pub spacing: f64,
    /// Cruise speed of the leader along its forward axis.
    pub leader_speed: f64,
    /// Stop after this many simulated seconds; `0` runs until quit.
    pub duration_secs: f64,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
    /// Lose every n-th broadcast frame; `0` delivers everything.
    pub drop_every: u64,
    /// Directory for persisted records.  Unset keeps them in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            followers: 3,
            spacing: 40.0,
            leader_speed: 10.0,
            duration_secs: 0.0,
            time_scale: 1.0,
            drop_every: 0,
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub leader: LeaderSettings,
    pub follower: FollowerSettings,
    pub simulation: SimulationConfig,
}

/// Return the path to `~/.formation/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".formation").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    Ok(load_from(&config_path())?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `FORMATION_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FORMATION_SYSTEM_ID` | `leader.system_id`, `follower.system_id` |
/// | `FORMATION_TICK_RATE` | `leader.tick_rate`, `follower.tick_rate` |
/// | `FORMATION_FOLLOWERS` | `simulation.followers` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("FORMATION_SYSTEM_ID") {
        cfg.leader.system_id = v.clone();
        cfg.follower.system_id = v;
    }
    if let Ok(v) = std::env::var("FORMATION_TICK_RATE")
        && let Ok(rate) = v.parse::<TickRate>()
    {
        cfg.leader.tick_rate = rate;
        cfg.follower.tick_rate = rate;
    }
    if let Ok(v) = std::env::var("FORMATION_FOLLOWERS")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.simulation.followers = n;
    }
}

/// Save the config to disk, creating `~/.formation/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
