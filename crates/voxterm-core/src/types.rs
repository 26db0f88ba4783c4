//! Shared types for the voxterm dispatch engine.
//!
//! These types are used across voxterm-lib, voxterm-cli and any external
//! caller of the HTTP API. Keeping them in voxterm-core means consumers can
//! depend on them without pulling in tokio, rodio, or other heavy deps.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── Modes ─────────────────────────────────────────────────────────────────

/// Global run mode a module or trigger entry is visible in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Normal,
    Debug,
    Any,
}

impl RunMode {
    /// Whether this mode is visible while the global debug flag is `debug`.
    pub fn visible(self, debug: bool) -> bool {
        match self {
            RunMode::Any => true,
            RunMode::Normal => !debug,
            RunMode::Debug => debug,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Normal => "normal",
            RunMode::Debug => "debug",
            RunMode::Any => "any",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" | "nm" => Ok(RunMode::Normal),
            "debug" | "dm" => Ok(RunMode::Debug),
            "any" => Ok(RunMode::Any),
            other => Err(format!("unknown run mode: {other}")),
        }
    }
}

/// How a trigger phrase is compared against an utterance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    Equals,
    #[default]
    StartsWith,
    EndsWith,
}

impl CompareMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareMode::Equals => "equals",
            CompareMode::StartsWith => "starts_with",
            CompareMode::EndsWith => "ends_with",
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equals" | "eq" => Ok(CompareMode::Equals),
            "starts_with" | "startswith" => Ok(CompareMode::StartsWith),
            "ends_with" | "endswith" => Ok(CompareMode::EndsWith),
            other => Err(format!("unknown comparison mode: {other}")),
        }
    }
}

// ─── Identity ──────────────────────────────────────────────────────────────

/// Opaque, stable module identity. Both registries key on it and the
/// override store persists under it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ─── Dispatch results ──────────────────────────────────────────────────────

/// Which dispatch path produced a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Matched by trigger phrase.
    #[default]
    Phrase,
    /// Routed to an explicitly supplied target (ask continuation).
    Direct,
    /// Intercepted by the one-way override.
    OneWay,
}

impl Activation {
    /// Numeric activation code: 0 phrase, 1 direct, 2 one-way.
    pub fn code(self) -> u8 {
        match self {
            Activation::Phrase => 0,
            Activation::Direct => 1,
            Activation::OneWay => 2,
        }
    }
}

/// Result of one `process()` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Spoken reply for this turn, if any.
    pub reply: Option<String>,
    /// Module to pass as direct target with the next utterance.
    pub follow_up: Option<ModuleId>,
    /// Module that consumed the utterance.
    pub module: Option<ModuleId>,
    pub activation: Activation,
}

impl Turn {
    pub fn awaiting_follow_up(&self) -> bool {
        self.follow_up.is_some()
    }
}

// ─── Snapshots ─────────────────────────────────────────────────────────────

/// Dispatch state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub debug: bool,
    pub one_way: Option<ModuleId>,
    pub follow_up: Option<ModuleId>,
    pub activation: Activation,
    pub active_model: Option<String>,
    pub static_modules: usize,
    pub dynamic_modules: usize,
}

/// Listing entry for a single module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub description: String,
    pub mode: RunMode,
    pub enabled: bool,
    pub hardcoded: bool,
    pub dynamic: bool,
}

/// Persisted per-module flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOverride {
    pub enabled: bool,
    pub mode: RunMode,
    pub hardcoded: bool,
}

/// Stored representation of all static module flags, keyed by module id.
pub type Overrides = BTreeMap<ModuleId, ModuleOverride>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_visibility() {
        assert!(RunMode::Any.visible(true));
        assert!(RunMode::Any.visible(false));
        assert!(RunMode::Normal.visible(false));
        assert!(!RunMode::Normal.visible(true));
        assert!(RunMode::Debug.visible(true));
        assert!(!RunMode::Debug.visible(false));
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("DM".parse::<RunMode>(), Ok(RunMode::Debug));
        assert_eq!("equals".parse::<CompareMode>(), Ok(CompareMode::Equals));
        assert_eq!("endswith".parse::<CompareMode>(), Ok(CompareMode::EndsWith));
        assert!("sometimes".parse::<CompareMode>().is_err());
    }

    #[test]
    fn overrides_serialize_keyed_by_id() {
        let mut overrides = Overrides::new();
        overrides.insert(
            ModuleId::from("system.help"),
            ModuleOverride {
                enabled: false,
                mode: RunMode::Any,
                hardcoded: false,
            },
        );
        let json = serde_json::to_value(&overrides).unwrap();
        assert_eq!(json["system.help"]["enabled"], false);
        assert_eq!(json["system.help"]["mode"], "any");
    }

    #[test]
    fn activation_codes() {
        assert_eq!(Activation::Phrase.code(), 0);
        assert_eq!(Activation::Direct.code(), 1);
        assert_eq!(Activation::OneWay.code(), 2);
    }
}
