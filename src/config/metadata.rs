//! Work item type, state, and priority metadata.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};

/// A `{label, value}` pair handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Display text.
    pub label: String,
    /// Value submitted back to the service.
    pub value: String,
}

impl SelectOption {
    /// Create an option.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// A workflow state of a work item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDef {
    /// The state name (e.g., "To Do", "Doing", "Done").
    pub name: String,
    /// Whether the remote service refuses to create items in this state.
    #[serde(default)]
    pub terminal: bool,
}

impl StateDef {
    /// Create a non-terminal state.
    pub fn open(name: &str) -> Self {
        Self {
            name: name.to_string(),
            terminal: false,
        }
    }

    /// Create a terminal state.
    pub fn terminal(name: &str) -> Self {
        Self {
            name: name.to_string(),
            terminal: true,
        }
    }
}

impl fmt::Display for StateDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A work item type (Task, Bug, Epic, ...) with its states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemTypeDef {
    /// The type name as the remote service knows it.
    pub name: String,
    /// Ordered workflow states.
    #[serde(default)]
    pub states: Vec<StateDef>,
    /// Field values applied on creation when the caller leaves them out.
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
}

impl WorkItemTypeDef {
    /// Create a type with the given states and no defaults.
    pub fn new(name: &str, states: Vec<StateDef>) -> Self {
        Self {
            name: name.to_string(),
            states,
            defaults: BTreeMap::new(),
        }
    }

    /// Validate this type.
    ///
    /// Every type needs a name and at least one non-terminal state usable as
    /// a creation default.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "work item type name cannot be empty".to_string(),
            ));
        }

        if self.states.iter().any(|s| s.name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "work item type '{}': state names cannot be empty",
                self.name
            )));
        }

        if self.default_state().is_none() {
            return Err(ConfigError::ValidationError(format!(
                "work item type '{}' has no non-terminal state",
                self.name
            )));
        }

        Ok(())
    }

    /// The first non-terminal state.
    pub fn default_state(&self) -> Option<&StateDef> {
        self.states.iter().find(|s| !s.terminal)
    }

    /// Whether `state` names a terminal state (case-insensitive).
    pub fn is_terminal(&self, state: &str) -> bool {
        let state = state.trim();
        self.states
            .iter()
            .any(|s| s.terminal && s.name.eq_ignore_ascii_case(state))
    }
}

impl fmt::Display for WorkItemTypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A priority level; lower numbers are more urgent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityDef {
    /// The numeric level sent to the remote service.
    pub level: u32,
    /// Display label.
    pub label: String,
}

impl PriorityDef {
    /// Create a priority level.
    pub fn new(level: u32, label: &str) -> Self {
        Self {
            level,
            label: label.to_string(),
        }
    }

    /// Validate a single level.
    pub fn validate(&self) -> Result<()> {
        if self.level == 0 {
            return Err(ConfigError::ValidationError(format!(
                "priority '{}': level must be at least 1",
                self.label
            )));
        }
        if self.label.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "priority {}: label cannot be empty",
                self.level
            )));
        }
        Ok(())
    }

    /// Whether a sorted sequence runs 1, 2, 3, ... without gaps or repeats.
    pub fn is_contiguous(sorted: &[PriorityDef]) -> bool {
        !sorted.is_empty()
            && sorted
                .iter()
                .enumerate()
                .all(|(index, p)| p.level as usize == index + 1)
    }
}

/// The built-in levels used when the configuration declares none.
pub fn default_priorities() -> Vec<PriorityDef> {
    vec![
        PriorityDef::new(1, "1 - Critical"),
        PriorityDef::new(2, "2 - High"),
        PriorityDef::new(3, "3 - Medium"),
        PriorityDef::new(4, "4 - Low"),
    ]
}
