//! The calling harness around the dispatch engine.
//!
//! Owns everything the engine leaves to its caller:
//!
//! - utterance normalization before dispatch
//! - the pending ask target, kept for exactly one following turn
//! - fault containment: handler errors and panics are logged and answered
//!   with silence
//! - speaking the turn's reply
//! - rebuilding built-in modules on a language switch

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use voxterm_core::collab::{Collaborators, OverrideStore, Speaker, Terminator};
use voxterm_core::dispatch::Dispatcher;
use voxterm_core::error::{RegistrationError, StoreError};
use voxterm_core::locale::{Language, LocaleError, LocalizationProvider};
use voxterm_core::registry::ModuleRegistry;
use voxterm_core::text::normalize_utterance;
use voxterm_core::types::{ModuleId, Overrides, Turn};

use crate::config::AssistantConfig;
use crate::modules::builtins;
use crate::modules::forward::ForwardHandler;
use crate::scripted::{ScriptError, module_from_json};

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Locale(#[from] LocaleError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to start forward worker: {0}")]
    Forward(std::io::Error),

    #[error("dynamic module {0} is already registered")]
    DuplicateDynamic(ModuleId),
}

pub struct Assistant {
    dispatcher: Arc<Dispatcher>,
    speaker: Arc<dyn Speaker>,
    store: Arc<dyn OverrideStore>,
    /// Language the built-in modules were last built with.
    locale: Arc<LocalizationProvider>,
    forward: Option<ForwardHandler>,
    /// Module that asked during the previous turn.
    pending: Mutex<Option<ModuleId>>,
}

impl Assistant {
    /// Declare built-ins, load overrides and check for conflicts.
    ///
    /// A store that cannot be read is logged and treated as empty; an invalid
    /// module set aborts startup.
    pub fn start(
        config: &AssistantConfig,
        speaker: Arc<dyn Speaker>,
        terminator: Arc<dyn Terminator>,
        store: Arc<dyn OverrideStore>,
    ) -> Result<Self, AssistantError> {
        let locale = Arc::new(LocalizationProvider::new(config.language));
        let forward = config
            .forward_url
            .as_ref()
            .map(|url| ForwardHandler::spawn(url.clone()))
            .transpose()
            .map_err(AssistantError::Forward)?;

        let overrides = store.load().unwrap_or_else(|e| {
            warn!("overrides unavailable, starting with defaults: {e}");
            Map::new()
        });
        let registry = ModuleRegistry::finalize(
            builtins(&locale, forward.clone()).into_drafts(),
            &overrides,
        )?;

        let collab = Collaborators {
            speaker: speaker.clone(),
            terminator,
        };
        let dispatcher = Dispatcher::new(registry, collab)
            .with_conflict_allowlist(config.conflict_allowlist.iter().cloned());
        dispatcher.analyze();
        info!("assistant ready ({} language)", locale.language());

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            speaker,
            store,
            locale,
            forward,
            pending: Mutex::new(None),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn language(&self) -> Language {
        self.locale.language()
    }

    /// Run one utterance through the engine and speak the reply.
    ///
    /// `target` resumes a specific module; without it the module that asked
    /// during the previous turn gets the utterance.
    pub async fn handle(&self, text: &str, target: Option<ModuleId>, model: Option<String>) -> Turn {
        let utterance = normalize_utterance(text);
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        let direct = target.or(pending);
        debug!("heard {utterance:?} (direct: {direct:?})");

        let dispatcher = self.dispatcher.clone();
        let result = tokio::task::spawn_blocking(move || {
            dispatcher.process(&utterance, direct.as_ref(), model.as_deref())
        })
        .await;

        let turn = match result {
            Ok(Ok(turn)) => turn,
            Ok(Err(e)) => {
                error!("dispatch failed: {e}");
                return Turn::default();
            }
            Err(e) => {
                error!(critical = true, "handler panicked: {e}");
                return Turn::default();
            }
        };

        if let Some(asker) = &turn.follow_up {
            *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(asker.clone());
        }
        if let Some(reply) = &turn.reply {
            self.speaker.say(reply);
        }
        turn
    }

    /// Speak text directly, outside any turn.
    pub fn say(&self, text: &str) {
        self.speaker.say(text);
    }

    /// Switch language and rebuild the built-in modules with the current
    /// runtime flags.
    ///
    /// The new modules get their own provider. The active language changes
    /// only once the rebuilt registry is in place, so nothing served by the
    /// old registry sees the new texts.
    pub fn set_language(&self, language: &str) -> Result<Language, AssistantError> {
        let language: Language = language.parse()?;
        if language == self.locale.language() {
            return Ok(language);
        }

        let fresh = Arc::new(LocalizationProvider::new(language));
        let flags = overrides_map(&self.dispatcher.persist());
        let drafts = builtins(&fresh, self.forward.clone()).into_drafts();
        self.dispatcher.reload(drafts, &flags)?;
        self.locale.reload(language.code())?;
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(language)
    }

    /// Build a scripted module from JSON and push it on the dynamic stack.
    pub fn insert_script(&self, description: Value) -> Result<ModuleId, AssistantError> {
        let module = module_from_json(description)?;
        let id = module.id.clone();
        if !self.dispatcher.insert(module) {
            return Err(AssistantError::DuplicateDynamic(id));
        }
        info!("dynamic module {id} added");
        Ok(id)
    }

    pub fn remove_dynamic(&self, id: &ModuleId) -> bool {
        self.dispatcher.remove(id)
    }

    /// Write the static modules' flags to the override store.
    pub fn persist(&self) -> Result<(), AssistantError> {
        self.store.save(&self.dispatcher.persist())?;
        Ok(())
    }
}

fn overrides_map(overrides: &Overrides) -> Map<String, Value> {
    overrides
        .iter()
        .filter_map(|(id, flags)| {
            serde_json::to_value(flags)
                .ok()
                .map(|value| (id.as_str().to_string(), value))
        })
        .collect()
}
