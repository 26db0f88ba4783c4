//! Assistant configuration, read from a JSON file. Every field is optional.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use voxterm_core::locale::Language;
use voxterm_core::types::ModuleId;

use crate::modules::FORWARD_ID;
use crate::speech::VoiceBackend;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub language: Language,
    /// Kokoro server; speech is only logged when unset.
    pub kokoro_url: Option<String>,
    pub voice: String,
    pub speed: f32,
    pub overrides_path: PathBuf,
    /// Home-automation endpoint unmatched commands are forwarded to.
    pub forward_url: Option<String>,
    /// Module ids the conflict check skips.
    pub conflict_allowlist: Vec<ModuleId>,
    /// Longest pause after a low-priority phrase, in seconds.
    pub low_priority_pause_cap: f32,
    /// HTTP API listen address.
    pub listen: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            language: Language::Ru,
            kokoro_url: None,
            voice: "af_heart".into(),
            speed: 1.0,
            overrides_path: PathBuf::from("voxterm-overrides.json"),
            forward_url: None,
            conflict_allowlist: vec![ModuleId::from(FORWARD_ID)],
            low_priority_pause_cap: 5.0,
            listen: "127.0.0.1:2004".into(),
        }
    }
}

impl AssistantConfig {
    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("config: {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!("config: loaded {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "speed must be positive, got {}",
                self.speed
            )));
        }
        if !(self.low_priority_pause_cap.is_finite() && self.low_priority_pause_cap >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "low_priority_pause_cap must be a non-negative number of seconds, got {}",
                self.low_priority_pause_cap
            )));
        }
        Ok(())
    }

    pub fn pause_cap(&self) -> Duration {
        Duration::from_secs_f32(self.low_priority_pause_cap.max(0.0))
    }

    pub fn voice_backend(&self) -> VoiceBackend {
        match &self.kokoro_url {
            Some(url) => VoiceBackend::Kokoro {
                url: url.clone(),
                voice: self.voice.clone(),
                speed: self.speed,
            },
            None => VoiceBackend::Log,
        }
    }
}
