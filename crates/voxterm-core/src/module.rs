//! Module descriptors and the registrar handler authors declare them with.
//!
//! ```text
//! let mut registrar = Registrar::new();
//! registrar
//!     .declare("system.help", RunMode::Any, "help", "Lists what I can do")
//!     .trigger(["помощь", "что ты умеешь"])
//!     .hardcoded()
//!     .handle(help);
//! let registry = ModuleRegistry::finalize(registrar.into_drafts(), &overrides)?;
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::effects::Outcome;
use crate::error::{HandlerError, RegistrationError};
use crate::registry::ModuleRegistry;
use crate::trigger::{Phrases, TriggerTable};
use crate::types::{Activation, ModuleId, ModuleInfo, RunMode};

// ─── Handler ───────────────────────────────────────────────────────────────

/// Everything a handler gets to see for one call.
pub struct Invocation<'a> {
    /// Id of the module being invoked.
    pub module: &'a ModuleId,
    /// Matched phrase (empty for wildcard, one-way and direct calls).
    pub phrase: &'a str,
    /// Utterance with the matched phrase stripped.
    pub remainder: &'a str,
    /// Full folded utterance.
    pub utterance: &'a str,
    pub activation: Activation,
    pub active_model: Option<&'a str>,
    pub debug: bool,
    pub one_way: Option<&'a ModuleId>,
    /// Read-only view of the registry.
    pub modules: &'a ModuleRegistry,
}

/// A module body.
pub trait Handler: Send + Sync {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Invocation<'_>) -> Result<Outcome, HandlerError> + Send + Sync,
{
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        self(call)
    }
}

/// Pin a closure to the handler signature so its lifetimes infer correctly.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&Invocation<'_>) -> Result<Outcome, HandlerError> + Send + Sync,
{
    f
}

// ─── Module ────────────────────────────────────────────────────────────────

/// A validated module: identity, flags, triggers and body.
#[derive(Clone)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub description: String,
    /// Effective mode after overrides and runtime changes.
    pub mode: RunMode,
    pub enabled: bool,
    pub hardcoded: bool,
    pub triggers: TriggerTable,
    handler: Arc<dyn Handler>,
}

impl Module {
    /// Start a standalone draft, e.g. for a dynamic module.
    pub fn draft(
        id: impl Into<ModuleId>,
        mode: RunMode,
        name: &str,
        description: &str,
    ) -> ModuleDraft {
        ModuleDraft::new(id.into(), mode, name, description)
    }

    /// Whether the module takes part in matching under `debug`.
    pub fn visible(&self, debug: bool) -> bool {
        self.enabled && self.mode.visible(debug)
    }

    pub fn call(&self, invocation: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        self.handler.handle(invocation)
    }

    pub fn info(&self, dynamic: bool) -> ModuleInfo {
        ModuleInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mode: self.mode,
            enabled: self.enabled,
            hardcoded: self.hardcoded,
            dynamic,
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("enabled", &self.enabled)
            .field("hardcoded", &self.hardcoded)
            .field("triggers", &self.triggers.len())
            .finish()
    }
}

// ─── Drafts ────────────────────────────────────────────────────────────────

/// A module under construction. Validated by [`ModuleDraft::build`] or
/// [`ModuleRegistry::finalize`].
pub struct ModuleDraft {
    pub(crate) id: ModuleId,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) mode: RunMode,
    pub(crate) hardcoded: bool,
    pub(crate) triggers: TriggerTable,
    handler: Option<Arc<dyn Handler>>,
}

impl ModuleDraft {
    fn new(id: ModuleId, mode: RunMode, name: &str, description: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            mode,
            hardcoded: false,
            triggers: TriggerTable::new(),
            handler: None,
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add phrases visible in every run mode.
    pub fn trigger(&mut self, phrases: impl Into<Phrases>) -> &mut Self {
        self.triggers.register(phrases, RunMode::Any);
        self
    }

    /// Add phrases visible only in `run_mode`.
    pub fn trigger_in(&mut self, run_mode: RunMode, phrases: impl Into<Phrases>) -> &mut Self {
        self.triggers.register(phrases, run_mode);
        self
    }

    /// Add phrases from JSON, see [`Phrases::from_json`].
    pub fn trigger_json(
        &mut self,
        run_mode: RunMode,
        phrases: &Value,
    ) -> Result<&mut Self, RegistrationError> {
        let phrases = Phrases::from_json(&self.name, phrases)?;
        self.triggers.register(phrases, run_mode);
        Ok(self)
    }

    /// The module cannot be reconfigured at runtime or through overrides.
    pub fn hardcoded(&mut self) -> &mut Self {
        self.hardcoded = true;
        self
    }

    pub fn handle(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Validate shape and produce a module.
    pub fn build(self) -> Result<Module, RegistrationError> {
        validate_name(&self.id, &self.name)?;
        if self.triggers.is_empty() {
            return Err(RegistrationError::NoTriggers { name: self.name });
        }
        let Some(handler) = self.handler else {
            return Err(RegistrationError::NoHandler { name: self.name });
        };
        Ok(Module {
            id: self.id,
            name: self.name,
            description: self.description,
            mode: self.mode,
            enabled: true,
            hardcoded: self.hardcoded,
            triggers: self.triggers,
            handler,
        })
    }
}

/// Longest accepted module name, in chars.
pub const MAX_NAME_LEN: usize = 30;

fn validate_name(id: &ModuleId, name: &str) -> Result<(), RegistrationError> {
    if name.is_empty() {
        return Err(RegistrationError::EmptyName { id: id.clone() });
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(RegistrationError::NameTooLong {
            name: name.to_string(),
            max: MAX_NAME_LEN,
        });
    }
    if name.to_lowercase() != name {
        return Err(RegistrationError::NameNotLowercase {
            name: name.to_string(),
        });
    }
    if name.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(RegistrationError::NameHasSeparator {
            name: name.to_string(),
        });
    }
    Ok(())
}

// ─── Registrar ─────────────────────────────────────────────────────────────

/// Ordered collection of static module declarations.
#[derive(Default)]
pub struct Registrar {
    drafts: Vec<ModuleDraft>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a module; declaration order is matching order.
    pub fn declare(
        &mut self,
        id: impl Into<ModuleId>,
        mode: RunMode,
        name: &str,
        description: &str,
    ) -> &mut ModuleDraft {
        self.drafts
            .push(ModuleDraft::new(id.into(), mode, name, description));
        let last = self.drafts.len() - 1;
        &mut self.drafts[last]
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub fn into_drafts(self) -> Vec<ModuleDraft> {
        self.drafts
    }
}
