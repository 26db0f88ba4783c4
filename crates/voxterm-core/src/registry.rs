//! Module registry: static modules in declaration order plus a LIFO stack of
//! dynamically inserted modules.
//!
//! Static modules are built once per (re)load by [`ModuleRegistry::finalize`],
//! which validates the whole set and applies persisted overrides. Dynamic
//! modules come and go at runtime, are tried before every static module
//! (newest first) and are never persisted.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::RegistrationError;
use crate::module::{Module, ModuleDraft};
use crate::types::{ModuleId, ModuleInfo, ModuleOverride, Overrides, RunMode};

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
    index: HashMap<ModuleId, usize>,
    /// Insertion order; traversed back to front.
    dynamic: Vec<Module>,
}

/// Module names grouped by how they take part in matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub active: Vec<String>,
    pub inactive: Vec<String>,
    pub disabled: Vec<String>,
}

impl ModuleRegistry {
    /// Validate a declared module set and apply persisted overrides.
    ///
    /// Fails on the first invalid module, duplicate name or duplicate id. The
    /// caller keeps whatever registry it had before.
    pub fn finalize(
        drafts: Vec<ModuleDraft>,
        overrides: &Map<String, Value>,
    ) -> Result<Self, RegistrationError> {
        let mut modules: Vec<Module> = Vec::with_capacity(drafts.len());
        let mut index = HashMap::with_capacity(drafts.len());
        let mut names: HashMap<String, ModuleId> = HashMap::with_capacity(drafts.len());

        for draft in drafts {
            let module = draft.build()?;
            if let Some(&i) = index.get(&module.id) {
                let first: &Module = &modules[i];
                return Err(RegistrationError::DuplicateId {
                    id: module.id,
                    first: first.name.clone(),
                    second: module.name,
                });
            }
            if let Some(first) = names.get(&module.name) {
                return Err(RegistrationError::DuplicateName {
                    name: module.name,
                    first: first.clone(),
                    second: module.id,
                });
            }
            names.insert(module.name.clone(), module.id.clone());
            index.insert(module.id.clone(), modules.len());
            modules.push(module);
        }

        let mut registry = Self {
            modules,
            index,
            dynamic: Vec::new(),
        };
        registry.apply_overrides(overrides);
        registry.log_summary();
        Ok(registry)
    }

    /// Apply `enabled` / `mode` from the store. Bad values are rejected one
    /// field at a time and the compiled default stays.
    fn apply_overrides(&mut self, overrides: &Map<String, Value>) {
        for (key, raw) in overrides {
            let Some(&i) = self.index.get(&ModuleId::from(key.as_str())) else {
                debug!("overrides: ignoring unknown module {key}");
                continue;
            };
            let module = &mut self.modules[i];
            if module.hardcoded {
                debug!("overrides: {} is hardcoded, ignoring", module.name);
                continue;
            }
            let Some(fields) = raw.as_object() else {
                warn!("overrides: entry for {key} is not an object: {raw}");
                continue;
            };

            match fields.get("enabled") {
                None => {}
                Some(Value::Bool(enabled)) => module.enabled = *enabled,
                Some(other) => warn!(
                    "overrides: {}.enabled must be a bool, got {other}; keeping {}",
                    module.name, module.enabled
                ),
            }

            match fields.get("mode").map(|v| v.as_str().map(str::parse::<RunMode>)) {
                None => {}
                Some(Some(Ok(mode))) => module.mode = mode,
                Some(_) => warn!(
                    "overrides: {}.mode is not a run mode: {}; keeping {}",
                    module.name, fields["mode"], module.mode
                ),
            }
        }
    }

    pub fn summary(&self, debug: bool) -> Summary {
        let mut summary = Summary::default();
        for module in &self.modules {
            let bucket = if !module.enabled {
                &mut summary.disabled
            } else if module.mode.visible(debug) {
                &mut summary.active
            } else {
                &mut summary.inactive
            };
            bucket.push(module.name.clone());
        }
        summary
    }

    pub fn log_summary(&self) {
        let s = self.summary(false);
        info!(
            "modules loaded: active [{}], inactive [{}], disabled [{}]",
            s.active.join(", "),
            s.inactive.join(", "),
            s.disabled.join(", ")
        );
    }

    // ─── Lookup ────────────────────────────────────────────────────────────

    /// Any module by id, dynamic ones first.
    pub fn get(&self, id: &ModuleId) -> Option<&Module> {
        self.dynamic
            .iter()
            .rev()
            .find(|m| &m.id == id)
            .or_else(|| self.get_static(id))
    }

    pub fn get_static(&self, id: &ModuleId) -> Option<&Module> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    /// Static module by its human-readable name.
    pub fn find_by_name(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Dynamic modules, newest first.
    pub fn dynamic(&self) -> impl Iterator<Item = &Module> {
        self.dynamic.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn dynamic_len(&self) -> usize {
        self.dynamic.len()
    }

    /// Modules taking part in matching under `debug`, in priority order.
    pub fn candidates(&self, debug: bool) -> impl Iterator<Item = &Module> {
        self.dynamic
            .iter()
            .rev()
            .chain(self.modules.iter())
            .filter(move |m| m.visible(debug))
    }

    pub fn infos(&self) -> Vec<ModuleInfo> {
        self.dynamic()
            .map(|m| m.info(true))
            .chain(self.modules.iter().map(|m| m.info(false)))
            .collect()
    }

    // ─── Dynamic modules ───────────────────────────────────────────────────

    /// Push a dynamic module to the front of the matching order.
    ///
    /// Returns `false` without side effects if it has no triggers or its id
    /// is already in the dynamic collection.
    pub fn insert(&mut self, module: Module) -> bool {
        if module.triggers.is_empty() {
            warn!("dynamic module {} has no triggers, rejected", module.id);
            return false;
        }
        if self.dynamic.iter().any(|m| m.id == module.id) {
            warn!("dynamic module {} already inserted, rejected", module.id);
            return false;
        }
        debug!("dynamic module {} inserted", module.id);
        self.dynamic.push(module);
        true
    }

    /// Remove a dynamic module. Unknown ids return `false`.
    pub fn remove(&mut self, id: &ModuleId) -> bool {
        let before = self.dynamic.len();
        self.dynamic.retain(|m| &m.id != id);
        let removed = self.dynamic.len() != before;
        if removed {
            debug!("dynamic module {id} removed");
        }
        removed
    }

    /// Hand the dynamic collection over to a freshly finalized registry.
    pub(crate) fn adopt_dynamic(&mut self, previous: &mut ModuleRegistry) {
        self.dynamic = std::mem::take(&mut previous.dynamic);
    }

    // ─── Runtime flags ─────────────────────────────────────────────────────

    /// Change a static module's run mode. Returns whether anything changed.
    pub fn set_mode(&mut self, id: &ModuleId, mode: RunMode) -> bool {
        let Some(module) = self.configurable(id, "mode") else {
            return false;
        };
        if module.mode == mode {
            info!("module {} already in {mode} mode", module.name);
            return false;
        }
        info!("module {}: mode {} -> {mode}", module.name, module.mode);
        module.mode = mode;
        true
    }

    /// Enable or disable a static module. Returns whether anything changed.
    pub fn set_enabled(&mut self, id: &ModuleId, enabled: bool) -> bool {
        let Some(module) = self.configurable(id, "enabled") else {
            return false;
        };
        if module.enabled == enabled {
            info!("module {} already {}", module.name, if enabled { "enabled" } else { "disabled" });
            return false;
        }
        info!("module {}: enabled {} -> {enabled}", module.name, module.enabled);
        module.enabled = enabled;
        true
    }

    fn configurable(&mut self, id: &ModuleId, field: &str) -> Option<&mut Module> {
        let Some(&i) = self.index.get(id) else {
            warn!("cannot change {field} of unknown module {id}");
            return None;
        };
        let module = &mut self.modules[i];
        if module.hardcoded {
            warn!("cannot change {field} of hardcoded module {}", module.name);
            return None;
        }
        Some(module)
    }

    /// Flags of every static module, keyed by id.
    pub fn persist(&self) -> Overrides {
        self.modules
            .iter()
            .map(|m| {
                (
                    m.id.clone(),
                    ModuleOverride {
                        enabled: m.enabled,
                        mode: m.mode,
                        hardcoded: m.hardcoded,
                    },
                )
            })
            .collect()
    }
}
