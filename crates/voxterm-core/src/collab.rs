//! Collaborator contracts the engine calls out to.
//!
//! Speech output and termination are fire-and-forget; the engine never waits
//! on them. The override store is read at (re)load and written by whoever
//! owns shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::types::Overrides;

/// Speech output.
pub trait Speaker: Send + Sync {
    fn say(&self, text: &str);
    /// Queue behind any normal speech, then hold `pause` before the next phrase.
    fn say_low(&self, text: &str, pause: Duration);
}

/// Process exit / restart scheduling.
pub trait Terminator: Send + Sync {
    fn die_in(&self, delay: Duration, reload: bool);
}

/// Persisted per-module overrides.
pub trait OverrideStore: Send + Sync {
    /// Raw stored entries keyed by module id. Values are validated by the
    /// registry, not here.
    fn load(&self) -> Result<Map<String, Value>, StoreError>;
    fn save(&self, overrides: &Overrides) -> Result<(), StoreError>;
}

/// Collaborators handed to the dispatcher.
#[derive(Clone)]
pub struct Collaborators {
    pub speaker: Arc<dyn Speaker>,
    pub terminator: Arc<dyn Terminator>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            speaker: Arc::new(Silent),
            terminator: Arc::new(Silent),
        }
    }
}

/// Drops speech and termination requests; logs them at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Speaker for Silent {
    fn say(&self, text: &str) {
        debug!("silent: say {text:?}");
    }

    fn say_low(&self, text: &str, pause: Duration) {
        debug!("silent: say_low {text:?} (+{pause:?})");
    }
}

impl Terminator for Silent {
    fn die_in(&self, delay: Duration, reload: bool) {
        debug!("silent: die_in {delay:?} reload={reload}");
    }
}

/// In-memory override store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn with_entries(entries: Map<String, Value>) -> Self {
        Self {
            inner: Mutex::new(entries),
        }
    }
}

impl OverrideStore for MemoryStore {
    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, overrides: &Overrides) -> Result<(), StoreError> {
        let value = serde_json::to_value(overrides)?;
        let map = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = map;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records low-priority speech and termination requests.
    #[derive(Default)]
    pub(crate) struct Recorder {
        low: Mutex<Vec<(String, Duration)>>,
        terminations: Mutex<Vec<(Duration, bool)>>,
    }

    impl Recorder {
        pub(crate) fn low(&self) -> Vec<(String, Duration)> {
            self.low.lock().unwrap().clone()
        }

        pub(crate) fn terminations(&self) -> Vec<(Duration, bool)> {
            self.terminations.lock().unwrap().clone()
        }
    }

    impl Speaker for Recorder {
        fn say(&self, _text: &str) {}

        fn say_low(&self, text: &str, pause: Duration) {
            self.low.lock().unwrap().push((text.to_string(), pause));
        }
    }

    impl Terminator for Recorder {
        fn die_in(&self, delay: Duration, reload: bool) {
            self.terminations.lock().unwrap().push((delay, reload));
        }
    }

    pub(crate) fn recording() -> (Collaborators, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let collab = Collaborators {
            speaker: recorder.clone(),
            terminator: recorder.clone(),
        };
        (collab, recorder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModuleId, ModuleOverride, RunMode};

    #[test]
    fn memory_store_round_trips_through_json() {
        let store = MemoryStore::default();
        let mut overrides = Overrides::new();
        overrides.insert(
            ModuleId::from("t.help"),
            ModuleOverride {
                enabled: false,
                mode: RunMode::Debug,
                hardcoded: false,
            },
        );
        store.save(&overrides).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded["t.help"]["mode"], "debug");
    }
}
