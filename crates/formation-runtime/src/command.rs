//! Follower command router.
//!
//! A command line is `;`-separated, the first field naming the command:
//!
//! | Command | Effect |
//! |---|---|
//! | `setoffset;x;y;z` | replace the offset; a blank field keeps that component |
//! | `addoffset;x;y;z` | add to the offset; a blank field adds 0 |
//! | `stop` / `start` | disable / enable station keeping |
//! | `starthere` | hold the current position relative to the leader, then start |
//! | `reset` | reload the active configuration's offset |
//! | `save[;name]` | store the offset under `name` (default: active configuration) |
//! | `savehere[;name]` | store the current relative position under `name` |
//! | `load;name` | switch configuration; unknown names are ignored |
//! | `clear` | forget the leader |
//!
//! [`FollowerCommand::parse`] rejects anything else with
//! [`FormationError::Command`]; the follower drops those silently.

use formation_types::{FormationError, Vec3};
use tracing::{debug, info};

use crate::storage::{ConfigSet, FollowerRecord, is_valid_config_name};

#[derive(Debug, Clone, PartialEq)]
pub enum FollowerCommand {
    SetOffset([Option<f64>; 3]),
    AddOffset(Vec3),
    Stop,
    Start,
    StartHere,
    Reset,
    Save(Option<String>),
    SaveHere(Option<String>),
    Load(String),
    Clear,
}

fn component(field: &str, blank: Option<f64>) -> Result<Option<f64>, FormationError> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(blank);
    }
    match field.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(FormationError::Command(format!("'{field}' is not a number"))),
    }
}

fn vector_fields<'a>(name: &str, args: &[&'a str]) -> Result<[&'a str; 3], FormationError> {
    match args {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(FormationError::Command(format!(
            "{name} takes 3 fields, got {}",
            args.len()
        ))),
    }
}

fn config_name(args: &[&str]) -> Result<Option<String>, FormationError> {
    match args.first().map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(name) if is_valid_config_name(name) => Ok(Some(name.to_string())),
        Some(name) => Err(FormationError::Command(format!(
            "invalid configuration name '{name}'"
        ))),
    }
}

impl FollowerCommand {
    pub fn parse(line: &str) -> Result<Self, FormationError> {
        let fields: Vec<&str> = line.trim().split(';').collect();
        let (head, args) = fields
            .split_first()
            .ok_or_else(|| FormationError::Command("empty command".to_string()))?;
        match head.trim().to_ascii_lowercase().as_str() {
            "setoffset" => {
                let [x, y, z] = vector_fields("setoffset", args)?;
                Ok(Self::SetOffset([
                    component(x, None)?,
                    component(y, None)?,
                    component(z, None)?,
                ]))
            }
            "addoffset" => {
                let [x, y, z] = vector_fields("addoffset", args)?;
                Ok(Self::AddOffset(Vec3::new(
                    component(x, Some(0.0))?.unwrap_or_default(),
                    component(y, Some(0.0))?.unwrap_or_default(),
                    component(z, Some(0.0))?.unwrap_or_default(),
                )))
            }
            "stop" => Ok(Self::Stop),
            "start" => Ok(Self::Start),
            "starthere" => Ok(Self::StartHere),
            "reset" => Ok(Self::Reset),
            "save" => Ok(Self::Save(config_name(args)?)),
            "savehere" => Ok(Self::SaveHere(config_name(args)?)),
            "load" => match config_name(args)? {
                Some(name) => Ok(Self::Load(name)),
                None => Err(FormationError::Command("load needs a name".to_string())),
            },
            "clear" => Ok(Self::Clear),
            other => Err(FormationError::Command(format!("unknown command '{other}'"))),
        }
    }
}

/// What the follower must do after a command changed its state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    pub persist_record: bool,
    pub persist_configs: bool,
    /// Release every actuator override.
    pub release: bool,
    /// Station keeping resumes; PID state must start from zero.
    pub resume: bool,
    pub forget_leader: bool,
}

/// The part of a follower that commands mutate and that is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowerState {
    pub offset: Vec3,
    pub current_config: String,
    pub configs: ConfigSet,
    pub disabled: bool,
}

impl FollowerState {
    /// Restore from stored records.  An active configuration missing from
    /// `configs` falls back to the first one.
    pub fn restore(record: FollowerRecord, configs: ConfigSet) -> Self {
        let current_config = if configs.contains(&record.current_config) {
            record.current_config
        } else {
            configs.first().0.to_string()
        };
        Self {
            offset: record.offset,
            current_config,
            configs,
            disabled: record.disabled,
        }
    }

    /// Fresh state: the first configuration, enabled.
    pub fn fresh(configs: ConfigSet) -> Self {
        let (name, offset) = configs.first();
        Self {
            offset,
            current_config: name.to_string(),
            disabled: false,
            configs,
        }
    }

    pub fn record(&self) -> FollowerRecord {
        FollowerRecord {
            disabled: self.disabled,
            current_config: self.current_config.clone(),
            offset: self.offset,
        }
    }

    fn enable(&mut self, effects: &mut Effects) {
        if self.disabled {
            effects.resume = true;
        }
        self.disabled = false;
    }

    /// Apply `command`.  `current_offset` is where the vehicle sits in the
    /// leader's frame, `None` while no leader is known; commands that need it
    /// are ignored without one.
    pub fn apply(&mut self, command: &FollowerCommand, current_offset: Option<Vec3>) -> Effects {
        let mut effects = Effects::default();
        match command {
            FollowerCommand::SetOffset([x, y, z]) => {
                self.offset = Vec3::new(
                    x.unwrap_or(self.offset.x),
                    y.unwrap_or(self.offset.y),
                    z.unwrap_or(self.offset.z),
                );
                effects.persist_record = true;
            }
            FollowerCommand::AddOffset(delta) => {
                self.offset += *delta;
                effects.persist_record = true;
            }
            FollowerCommand::Stop => {
                self.disabled = true;
                effects.release = true;
                effects.persist_record = true;
            }
            FollowerCommand::Start => {
                self.enable(&mut effects);
                effects.persist_record = true;
            }
            FollowerCommand::StartHere => {
                let Some(here) = current_offset else {
                    debug!("starthere ignored: no leader known");
                    return effects;
                };
                self.offset = here;
                self.enable(&mut effects);
                effects.persist_record = true;
            }
            FollowerCommand::Reset => {
                match self.configs.get(&self.current_config) {
                    Some(offset) => self.offset = offset,
                    None => {
                        let (name, offset) = self.configs.first();
                        self.current_config = name.to_string();
                        self.offset = offset;
                    }
                }
                effects.persist_record = true;
            }
            FollowerCommand::Save(name) => {
                let key = name.clone().unwrap_or_else(|| self.current_config.clone());
                effects.persist_configs = self.store(&key, self.offset);
            }
            FollowerCommand::SaveHere(name) => {
                let Some(here) = current_offset else {
                    debug!("savehere ignored: no leader known");
                    return effects;
                };
                let key = name.clone().unwrap_or_else(|| self.current_config.clone());
                effects.persist_configs = self.store(&key, here);
            }
            FollowerCommand::Load(name) => {
                let Some(offset) = self.configs.get(name) else {
                    debug!(config = %name, "load ignored: unknown configuration");
                    return effects;
                };
                self.offset = offset;
                self.current_config = name.clone();
                self.enable(&mut effects);
                effects.persist_record = true;
            }
            FollowerCommand::Clear => effects.forget_leader = true,
        }
        effects
    }

    fn store(&mut self, key: &str, offset: Vec3) -> bool {
        match self.configs.insert(key, offset) {
            Ok(()) => {
                info!(config = key, %offset, "configuration saved");
                true
            }
            Err(e) => {
                debug!(error = %e, "save ignored");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(offset: Vec3) -> FollowerState {
        let mut configs = ConfigSet::new(Vec3::new(50.0, 0.0, 0.0));
        configs.insert("wing", Vec3::new(-30.0, 0.0, 10.0)).unwrap();
        FollowerState {
            offset,
            current_config: "default".into(),
            configs,
            disabled: false,
        }
    }

    fn run(s: &mut FollowerState, line: &str) -> Effects {
        let cmd = FollowerCommand::parse(line).unwrap();
        s.apply(&cmd, Some(Vec3::new(7.0, 8.0, 9.0)))
    }

    #[test]
    fn setoffset_blank_fields_keep_components() {
        let mut s = state(Vec3::new(1.0, 2.0, 3.0));
        let fx = run(&mut s, "setoffset;;5;");
        assert_eq!(s.offset, Vec3::new(1.0, 5.0, 3.0));
        assert!(fx.persist_record);
    }

    #[test]
    fn addoffset_adds_with_blank_as_zero() {
        let mut s = state(Vec3::new(1.0, 2.0, 3.0));
        run(&mut s, "addoffset;1;0;-1");
        assert_eq!(s.offset, Vec3::new(2.0, 2.0, 2.0));
        run(&mut s, "addoffset;;1;");
        assert_eq!(s.offset, Vec3::new(2.0, 3.0, 2.0));
    }

    #[test]
    fn save_rejects_names_with_space() {
        assert!(FollowerCommand::parse("save;base 1").is_err());
        let mut s = state(Vec3::ZERO);
        let before = s.configs.clone();
        // Even if such a command were built directly, the set refuses it.
        let fx = s.apply(&FollowerCommand::Save(Some("base 1".into())), None);
        assert!(!fx.persist_configs);
        assert_eq!(s.configs, before);
    }

    #[test]
    fn save_defaults_to_active_configuration() {
        let mut s = state(Vec3::new(1.0, 1.0, 1.0));
        let fx = run(&mut s, "save");
        assert!(fx.persist_configs);
        assert_eq!(s.configs.get("default"), Some(Vec3::new(1.0, 1.0, 1.0)));
        run(&mut s, "savehere;spot");
        assert_eq!(s.configs.get("spot"), Some(Vec3::new(7.0, 8.0, 9.0)));
    }

    #[test]
    fn load_switches_configuration_and_enables() {
        let mut s = state(Vec3::ZERO);
        s.disabled = true;
        let fx = run(&mut s, "load;wing");
        assert_eq!(s.current_config, "wing");
        assert_eq!(s.offset, Vec3::new(-30.0, 0.0, 10.0));
        assert!(!s.disabled);
        assert!(fx.resume);
    }

    #[test]
    fn load_unknown_is_noop() {
        let mut s = state(Vec3::new(1.0, 2.0, 3.0));
        let before = s.clone();
        assert_eq!(run(&mut s, "load;nowhere"), Effects::default());
        assert_eq!(s, before);
    }

    #[test]
    fn reset_falls_back_to_first_configuration() {
        let mut s = state(Vec3::new(1.0, 2.0, 3.0));
        run(&mut s, "reset");
        assert_eq!(s.offset, Vec3::new(50.0, 0.0, 0.0));
        s.current_config = "gone".into();
        s.offset = Vec3::ZERO;
        run(&mut s, "reset");
        assert_eq!(s.current_config, "default");
        assert_eq!(s.offset, Vec3::new(50.0, 0.0, 0.0));
    }

    #[test]
    fn stop_and_start_toggle_and_flag_resume() {
        let mut s = state(Vec3::ZERO);
        let fx = run(&mut s, "stop");
        assert!(s.disabled && fx.release);
        let fx = run(&mut s, "start");
        assert!(!s.disabled && fx.resume);
        let fx = run(&mut s, "start");
        assert!(!fx.resume);
    }

    #[test]
    fn starthere_needs_a_leader() {
        let mut s = state(Vec3::ZERO);
        s.disabled = true;
        let fx = s.apply(&FollowerCommand::StartHere, None);
        assert_eq!(fx, Effects::default());
        assert!(s.disabled);
        run(&mut s, "starthere");
        assert_eq!(s.offset, Vec3::new(7.0, 8.0, 9.0));
        assert!(!s.disabled);
    }

    #[test]
    fn malformed_commands_rejected() {
        for bad in ["", "fly", "setoffset;1;2", "addoffset;1;x;3", "load", "load;"] {
            assert!(
                matches!(FollowerCommand::parse(bad), Err(FormationError::Command(_))),
                "accepted {bad:?}"
            );
        }
        assert_eq!(FollowerCommand::parse("CLEAR").unwrap(), FollowerCommand::Clear);
    }

    #[test]
    fn restore_repairs_missing_active_configuration() {
        let configs = ConfigSet::new(Vec3::new(50.0, 0.0, 0.0));
        let s = FollowerState::restore(
            FollowerRecord {
                disabled: true,
                current_config: "deleted".into(),
                offset: Vec3::new(1.0, 0.0, 0.0),
            },
            configs,
        );
        assert_eq!(s.current_config, "default");
        assert_eq!(s.offset, Vec3::new(1.0, 0.0, 0.0));
        assert!(s.disabled);
    }
}
