//! Assistant housekeeping: help, debug mode, lock, module management,
//! shutdown and status.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use voxterm_core::effects::{Effect, Outcome, StateChange};
use voxterm_core::error::HandlerError;
use voxterm_core::locale::LocalizationProvider;
use voxterm_core::module::{Handler, Invocation};
use voxterm_core::text::fold;
use voxterm_core::types::{Activation, RunMode};

/// Delay between the goodbye phrase and the actual exit.
pub const SHUTDOWN_DELAY: Duration = Duration::from_secs(2);

fn folded(locale: &LocalizationProvider, key: &str) -> Vec<String> {
    locale.phrases(key).iter().map(|p| fold(p)).collect()
}

// ─── help ──────────────────────────────────────────────────────────────────

pub struct HelpHandler {
    pub locale: Arc<LocalizationProvider>,
}

impl Handler for HelpHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        let names: Vec<&str> = call
            .modules
            .candidates(call.debug)
            .filter(|m| m.id != *call.module)
            .map(|m| m.name.as_str())
            .collect();
        if names.is_empty() {
            return Ok(Outcome::say(self.locale.text("help.empty")));
        }
        Ok(Outcome::say(
            self.locale.format("help.reply", &[&names.join(", ")]),
        ))
    }
}

// ─── debug ─────────────────────────────────────────────────────────────────

/// Enter phrases are only visible in normal mode and leave phrases only in
/// debug mode, so the current flag tells which one matched.
pub struct DebugHandler {
    pub locale: Arc<LocalizationProvider>,
}

impl Handler for DebugHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        let on = !call.debug;
        let reply = self.locale.text(if on { "debug.on" } else { "debug.off" });
        Ok(Outcome::set([StateChange::Debug(on)]).then(Effect::Say(reply)))
    }
}

// ─── lock ──────────────────────────────────────────────────────────────────

/// Takes every utterance through the one-way override until the unlock
/// phrase is heard.
pub struct LockHandler {
    pub locale: Arc<LocalizationProvider>,
    unlock: Vec<String>,
}

impl LockHandler {
    pub fn new(locale: Arc<LocalizationProvider>) -> Self {
        let unlock = folded(&locale, "lock.unlock");
        Self { locale, unlock }
    }
}

impl Handler for LockHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        if call.activation == Activation::Phrase {
            info!("lock engaged");
            return Ok(Outcome::set([StateChange::OneWay(Some(call.module.clone()))])
                .then(Effect::Say(self.locale.text("lock.locked"))));
        }
        if self.unlock.iter().any(|p| p == call.utterance) {
            info!("lock released");
            return Ok(Outcome::set([StateChange::OneWay(None)])
                .then(Effect::Say(self.locale.text("lock.unlocked"))));
        }
        debug!("lock: swallowed {:?}", call.utterance);
        Ok(Outcome::say(self.locale.text("lock.locked")))
    }
}

// ─── modules ───────────────────────────────────────────────────────────────

/// `<enable|disable> <name>` and `<mode phrase> <name> <mode>`.
pub struct ModulesHandler {
    pub locale: Arc<LocalizationProvider>,
    enable: Vec<String>,
    disable: Vec<String>,
}

impl ModulesHandler {
    pub fn new(locale: Arc<LocalizationProvider>) -> Self {
        let enable = folded(&locale, "modules.enable");
        let disable = folded(&locale, "modules.disable");
        Self {
            locale,
            enable,
            disable,
        }
    }

    fn parse_mode(&self, word: &str) -> Option<RunMode> {
        [RunMode::Normal, RunMode::Debug, RunMode::Any]
            .into_iter()
            .find(|mode| fold(&self.locale.text(&format!("mode.{}", mode.as_str()))) == word)
            .or_else(|| word.parse().ok())
    }
}

impl Handler for ModulesHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        let mut words = call.remainder.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(Outcome::next());
        };
        let Some(target) = call.modules.find_by_name(name) else {
            return Ok(Outcome::say(self.locale.format("modules.unknown", &[&name])));
        };
        if target.hardcoded {
            return Ok(Outcome::say(self.locale.format("modules.fixed", &[&name])));
        }

        let phrase = call.phrase.to_string();
        if self.enable.contains(&phrase) || self.disable.contains(&phrase) {
            let enabled = self.enable.contains(&phrase);
            let key = if enabled { "modules.enabled" } else { "modules.disabled" };
            return Ok(Outcome::set([StateChange::Enabled {
                module: target.id.clone(),
                enabled,
            }])
            .then(Effect::Say(self.locale.format(key, &[&name]))));
        }

        let word = words.collect::<Vec<_>>().join(" ");
        match self.parse_mode(&word) {
            Some(mode) => Ok(Outcome::set([StateChange::Mode {
                module: target.id.clone(),
                mode,
            }])
            .then(Effect::Say(self.locale.format("modules.moded", &[&name, &word])))),
            None => Ok(Outcome::say(self.locale.format("modules.bad_mode", &[&word]))),
        }
    }
}

// ─── shutdown ──────────────────────────────────────────────────────────────

/// Asks for confirmation, then schedules exit or reload.
pub struct ShutdownHandler {
    pub locale: Arc<LocalizationProvider>,
    reload: Vec<String>,
    yes: Vec<String>,
    /// Reload flag of the question awaiting an answer.
    pending: Mutex<Option<bool>>,
}

impl ShutdownHandler {
    pub fn new(locale: Arc<LocalizationProvider>) -> Self {
        let reload = folded(&locale, "shutdown.reload");
        let yes = folded(&locale, "shutdown.yes");
        Self {
            locale,
            reload,
            yes,
            pending: Mutex::new(None),
        }
    }
}

impl Handler for ShutdownHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        if call.activation == Activation::Phrase {
            let reload = self.reload.iter().any(|p| p == call.phrase);
            *pending = Some(reload);
            let key = if reload { "shutdown.confirm_reload" } else { "shutdown.confirm" };
            return Ok(Outcome::ask(self.locale.text(key)));
        }

        let Some(reload) = pending.take() else {
            return Ok(Outcome::next());
        };
        let confirmed = self
            .yes
            .iter()
            .any(|y| call.utterance.split_whitespace().any(|w| w == y));
        if !confirmed {
            info!("shutdown cancelled");
            return Ok(Outcome::say(self.locale.text("shutdown.cancel")));
        }
        let key = if reload { "shutdown.restart" } else { "shutdown.bye" };
        Ok(Outcome::set([StateChange::Terminate {
            delay: SHUTDOWN_DELAY,
            reload,
        }])
        .then(Effect::Say(self.locale.text(key))))
    }
}

// ─── status ────────────────────────────────────────────────────────────────

pub struct StatusHandler {
    pub locale: Arc<LocalizationProvider>,
}

impl Handler for StatusHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        let none = self.locale.text("common.none");
        let debug = self.locale.text(if call.debug { "common.on" } else { "common.off" });
        let one_way = call
            .one_way
            .and_then(|id| call.modules.get(id))
            .map(|m| m.name.clone())
            .unwrap_or_else(|| none.clone());
        let dynamic = call.modules.dynamic_len();
        let model = call.active_model.unwrap_or(none.as_str()).to_string();
        Ok(Outcome::say(self.locale.format(
            "status.reply",
            &[&debug, &one_way, &dynamic, &model],
        )))
    }
}
