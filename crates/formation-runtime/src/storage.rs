//! Persisted run state and named offset configurations.
//!
//! Each role keeps two plain-text blobs in a [`TextStore`]:
//!
//! | Blob | Format |
//! |---|---|
//! | Follower record | `disabled;config;x;y;z`, e.g. `0;default;50;0;0` |
//! | Leader record | `disabled` or `disabled;target_id;target_name` (`target_id` 0 = searching) |
//! | Follower configs | one `name x y z` line per configuration |
//!
//! Decoding never panics: a bad record is a [`FormationError::Parse`] that
//! the owning role answers by falling back to defaults and rewriting it.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use formation_types::{EntityId, FormationError, Vec3};
use parking_lot::Mutex;
use tracing::warn;

/// Name of the configuration every fresh follower starts with.
pub const DEFAULT_CONFIG: &str = "default";

/// Somewhere a role can keep one text blob between runs.
pub trait TextStore: Send {
    /// `Ok(None)` when nothing has been stored yet.
    fn read(&self) -> Result<Option<String>, FormationError>;

    fn write(&mut self, text: &str) -> Result<(), FormationError>;
}

/// In-memory store.  Clones share the same slot, so a test can keep one
/// clone to inspect what the role wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(text.into()))),
        }
    }

    pub fn text(&self) -> Option<String> {
        self.slot.lock().clone()
    }
}

impl TextStore for MemoryStore {
    fn read(&self) -> Result<Option<String>, FormationError> {
        Ok(self.slot.lock().clone())
    }

    fn write(&mut self, text: &str) -> Result<(), FormationError> {
        *self.slot.lock() = Some(text.to_string());
        Ok(())
    }
}

/// A store backed by one file.  A missing file reads as empty.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TextStore for FileStore {
    fn read(&self) -> Result<Option<String>, FormationError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FormationError::Channel(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write(&mut self, text: &str) -> Result<(), FormationError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FormationError::Channel(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        fs::write(&self.path, text).map_err(|e| {
            FormationError::Channel(format!("cannot write {}: {e}", self.path.display()))
        })
    }
}

fn parse_f64(field: &str, what: &str) -> Result<f64, FormationError> {
    let value: f64 = field
        .trim()
        .parse()
        .map_err(|_| FormationError::Parse(format!("{what}: '{field}' is not a number")))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FormationError::Parse(format!("{what}: '{field}' is not finite")))
    }
}

fn parse_flag(field: &str) -> Result<bool, FormationError> {
    match field {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(FormationError::Parse(format!("disabled flag '{other}'"))),
    }
}

fn flag(value: bool) -> char {
    if value { '1' } else { '0' }
}

// ────────────────────────────────────────────────────────────────────────────
// Follower record
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FollowerRecord {
    pub disabled: bool,
    pub current_config: String,
    pub offset: Vec3,
}

impl FollowerRecord {
    pub fn encode(&self) -> String {
        format!(
            "{};{};{};{};{}",
            flag(self.disabled),
            self.current_config,
            self.offset.x,
            self.offset.y,
            self.offset.z
        )
    }

    pub fn decode(text: &str) -> Result<Self, FormationError> {
        let fields: Vec<&str> = text.trim().split(';').collect();
        let [disabled, config, x, y, z] = fields.as_slice() else {
            return Err(FormationError::Parse(format!(
                "follower record has {} fields, expected 5",
                fields.len()
            )));
        };
        Ok(Self {
            disabled: parse_flag(disabled)?,
            current_config: (*config).to_string(),
            offset: Vec3::new(
                parse_f64(x, "offset x")?,
                parse_f64(y, "offset y")?,
                parse_f64(z, "offset z")?,
            ),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Leader record
// ────────────────────────────────────────────────────────────────────────────

/// Persisted leader target: `None` id with a name means "searching".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderRecord {
    pub disabled: bool,
    pub target: Option<(Option<EntityId>, String)>,
}

impl LeaderRecord {
    pub fn encode(&self) -> String {
        match &self.target {
            None => flag(self.disabled).to_string(),
            Some((id, name)) => format!(
                "{};{};{}",
                flag(self.disabled),
                id.map_or(0, |id| id.0),
                name
            ),
        }
    }

    pub fn decode(text: &str) -> Result<Self, FormationError> {
        let mut fields = text.trim().splitn(3, ';');
        let disabled = parse_flag(fields.next().unwrap_or_default())?;
        let target = match (fields.next(), fields.next()) {
            (None, _) => None,
            (Some(id), Some(name)) => {
                let id: i64 = id
                    .parse()
                    .map_err(|_| FormationError::Parse(format!("target id '{id}'")))?;
                Some(((id != 0).then_some(EntityId(id)), name.to_string()))
            }
            (Some(_), None) => {
                return Err(FormationError::Parse(
                    "leader record has a target id but no name".to_string(),
                ));
            }
        };
        Ok(Self { disabled, target })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Named configurations
// ────────────────────────────────────────────────────────────────────────────

/// A configuration name is usable when it is non-empty and has no
/// whitespace, so it survives the line format.
pub fn is_valid_config_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

/// Named offsets, in insertion order.  Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSet {
    entries: Vec<(String, Vec3)>,
}

impl ConfigSet {
    /// A set holding only [`DEFAULT_CONFIG`].
    pub fn new(default_offset: Vec3) -> Self {
        Self {
            entries: vec![(DEFAULT_CONFIG.to_string(), default_offset)],
        }
    }

    pub fn get(&self, name: &str) -> Option<Vec3> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The first entry; always present.
    pub fn first(&self) -> (&str, Vec3) {
        let (name, offset) = &self.entries[0];
        (name, *offset)
    }

    /// Insert or replace `name`.
    ///
    /// # Errors
    ///
    /// [`FormationError::Command`] when `name` fails
    /// [`is_valid_config_name`].
    pub fn insert(&mut self, name: &str, offset: Vec3) -> Result<(), FormationError> {
        if !is_valid_config_name(name) {
            return Err(FormationError::Command(format!(
                "invalid configuration name '{name}'"
            )));
        }
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = offset,
            None => self.entries.push((name.to_string(), offset)),
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(name, v)| format!("{name} {} {} {}\n", v.x, v.y, v.z))
            .collect()
    }

    /// Parse `name x y z` lines.  Blank lines are ignored and malformed ones
    /// skipped with a warning; with no usable line the result holds only
    /// [`DEFAULT_CONFIG`] at `default_offset`.
    pub fn decode(text: &str, default_offset: Vec3) -> Self {
        let mut set = Self { entries: Vec::new() };
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_config_line(line) {
                Ok((name, offset)) => {
                    // Names were validated by the parser.
                    let _ = set.insert(name, offset);
                }
                Err(e) => warn!(line = number + 1, error = %e, "skipping configuration line"),
            }
        }
        if set.entries.is_empty() {
            return Self::new(default_offset);
        }
        set
    }
}

fn parse_config_line(line: &str) -> Result<(&str, Vec3), FormationError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [name, x, y, z] = fields.as_slice() else {
        return Err(FormationError::Parse(format!(
            "expected 'name x y z', got '{line}'"
        )));
    };
    Ok((
        name,
        Vec3::new(parse_f64(x, name)?, parse_f64(y, name)?, parse_f64(z, name)?),
    ))
}
