//! Persisted identity and lifecycle state of a plugin.
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::version::PluginVersion;

/// Globally unique plugin identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(Uuid);

impl PluginId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PluginId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Lifecycle state. Only `Enabled` plugins take part in dispatch and cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    NotInstalled,
    Disabled,
    Enabled,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::NotInstalled => write!(f, "not installed"),
            PluginState::Disabled => write!(f, "disabled"),
            PluginState::Enabled => write!(f, "enabled"),
        }
    }
}

/// The externally triggered lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Install,
    Enable,
    Disable,
    Uninstall,
    Remove,
}

impl Transition {
    /// State a plugin must be in for this transition to be legal.
    pub fn required_state(&self) -> PluginState {
        match self {
            Transition::Install => PluginState::NotInstalled,
            Transition::Enable => PluginState::Disabled,
            Transition::Disable => PluginState::Enabled,
            Transition::Uninstall => PluginState::Disabled,
            Transition::Remove => PluginState::NotInstalled,
        }
    }

    /// State after a successful transition; `None` when the descriptor is deleted.
    pub fn target_state(&self) -> Option<PluginState> {
        match self {
            Transition::Install => Some(PluginState::Disabled),
            Transition::Enable => Some(PluginState::Enabled),
            Transition::Disable => Some(PluginState::Disabled),
            Transition::Uninstall => Some(PluginState::NotInstalled),
            Transition::Remove => None,
        }
    }

    /// Name of the plugin hook driven by this transition.
    pub fn hook_name(&self) -> &'static str {
        match self {
            Transition::Install => "install",
            Transition::Enable => "enable",
            Transition::Disable => "disable",
            Transition::Uninstall => "uninstall",
            Transition::Remove => "remove",
        }
    }

    /// Reject the transition unless `state` is exactly the required one.
    pub fn check(&self, plugin_id: PluginId, state: PluginState) -> Result<(), PluginSystemError> {
        if state == self.required_state() {
            Ok(())
        } else {
            Err(PluginSystemError::InvalidStateTransition {
                plugin_id,
                transition: *self,
                state,
            })
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hook_name())
    }
}

/// Persisted plugin record.
///
/// The identifier is fixed at construction and has no setter; every other
/// column may change and is saved through [`PluginDescriptor::changes_since`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    id: PluginId,
    pub title: String,
    pub directory: PathBuf,
    pub class_path: String,
    pub version: PluginVersion,
    pub state: PluginState,
    pub priority: i32,
    /// Set while a directory reconciliation has not yet seen this plugin.
    #[serde(default)]
    pub stale: bool,
}

impl PluginDescriptor {
    pub fn new(
        id: PluginId,
        title: impl Into<String>,
        directory: impl Into<PathBuf>,
        class_path: impl Into<String>,
        version: PluginVersion,
        priority: i32,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            directory: directory.into(),
            class_path: class_path.into(),
            version,
            state: PluginState::NotInstalled,
            priority,
            stale: false,
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.state == PluginState::Enabled
    }

    /// Columns that differ from `baseline`, carrying their new values.
    pub fn changes_since(&self, baseline: &PluginDescriptor) -> Vec<DescriptorField> {
        let mut fields = Vec::new();
        if self.title != baseline.title {
            fields.push(DescriptorField::Title(self.title.clone()));
        }
        if self.directory != baseline.directory {
            fields.push(DescriptorField::Directory(self.directory.clone()));
        }
        if self.class_path != baseline.class_path {
            fields.push(DescriptorField::ClassPath(self.class_path.clone()));
        }
        if self.version != baseline.version {
            fields.push(DescriptorField::Version(self.version));
        }
        if self.state != baseline.state {
            fields.push(DescriptorField::State(self.state));
        }
        if self.priority != baseline.priority {
            fields.push(DescriptorField::Priority(self.priority));
        }
        if self.stale != baseline.stale {
            fields.push(DescriptorField::Stale(self.stale));
        }
        fields
    }

    /// Write a single column value.
    pub fn apply(&mut self, field: &DescriptorField) {
        match field {
            DescriptorField::Title(v) => self.title = v.clone(),
            DescriptorField::Directory(v) => self.directory = v.clone(),
            DescriptorField::ClassPath(v) => self.class_path = v.clone(),
            DescriptorField::Version(v) => self.version = *v,
            DescriptorField::State(v) => self.state = *v,
            DescriptorField::Priority(v) => self.priority = *v,
            DescriptorField::Stale(v) => self.stale = *v,
        }
    }
}

/// One changed descriptor column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorField {
    Title(String),
    Directory(PathBuf),
    ClassPath(String),
    Version(PluginVersion),
    State(PluginState),
    Priority(i32),
    Stale(bool),
}

impl DescriptorField {
    pub fn column(&self) -> &'static str {
        match self {
            DescriptorField::Title(_) => "title",
            DescriptorField::Directory(_) => "directory",
            DescriptorField::ClassPath(_) => "class_path",
            DescriptorField::Version(_) => "version",
            DescriptorField::State(_) => "state",
            DescriptorField::Priority(_) => "priority",
            DescriptorField::Stale(_) => "stale",
        }
    }
}

/// Result of saving a descriptor against its persisted baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing differed; no write was issued.
    NoOp,
    /// The listed columns were written.
    Saved { columns: Vec<&'static str> },
}
